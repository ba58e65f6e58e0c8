//! URL cleaning for navigate actions
//!
//! Models and users type "example.com" or "www.example.com"; the driver needs a
//! full http(s) URL.

use thiserror::Error;
use url::{Host, Url};

pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("URL exceeds {} characters", MAX_URL_LENGTH)]
    TooLong,

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    Invalid(String),
}

/// Trim, add `https://` when no scheme is given, drop a leading `www.` and validate the host
pub fn clean_url(raw: &str) -> Result<String, UrlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(UrlError::TooLong);
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&candidate).map_err(|e| UrlError::Invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(url.scheme().to_string()));
    }

    let domain = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => return Ok(url.into()),
        None => return Err(UrlError::Invalid("missing host".to_string())),
    };

    let bare = domain.strip_prefix("www.").unwrap_or(&domain);
    if !is_valid_domain(bare) {
        return Err(UrlError::Invalid(format!("'{}' is not a valid domain", bare)));
    }
    if bare.len() != domain.len() {
        url.set_host(Some(bare))
            .map_err(|e| UrlError::Invalid(e.to_string()))?;
    }

    Ok(url.into())
}

fn is_valid_domain(domain: &str) -> bool {
    if domain == "localhost" {
        return true;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    let tld = labels[labels.len() - 1];
    labels_ok && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}
