//! Supervisor: capacity, isolation, cancellation and bookkeeping

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_stream::StreamExt;
use tokio_test::{assert_err, assert_ok};

use agent_executive::agent::TaskEventKind;
use agent_executive::config::OverflowPolicy;
use agent_executive::core::{SupervisorError, TaskError, TaskErrorKind};
use agent_executive::{LoopPhase, TaskId, TaskStatus, TaskSupervisor};

use common::*;

fn gated_factory(gate: &Arc<Semaphore>) -> Arc<FakeFactory> {
    Arc::new(FakeFactory::with_defaults(DriverOptions {
        observe_gate: Some(gate.clone()),
        ..DriverOptions::default()
    }))
}

async fn wait_idle(sup: &TaskSupervisor) {
    let idle = async {
        while sup.running() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(TEST_DEADLINE, idle)
        .await
        .expect("slots never freed");
}

#[tokio::test]
async fn test_reject_when_full() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(1, OverflowPolicy::Reject), model, factory.clone());

    let first = assert_ok!(sup.start("first", "tester"));
    factory.wait_for_observe(first, 1).await;

    let rejected = assert_err!(sup.start("second", "tester"));
    assert_eq!(rejected, SupervisorError::CapacityExceeded { limit: 1 });
    // a rejected start registers nothing
    assert_eq!(sup.list().len(), 1);

    gate.add_permits(10);
    assert_eq!(wait_done(&sup, first).await.status, TaskStatus::Completed);
    wait_idle(&sup).await;

    let third = assert_ok!(sup.start("third", "tester"));
    assert_eq!(wait_done(&sup, third).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_queue_when_full() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(1, OverflowPolicy::Queue), model, factory.clone());

    let first = sup.start("first", "tester").unwrap();
    factory.wait_for_observe(first, 1).await;
    let second = sup.start("second", "tester").unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let queued = sup.status(second).unwrap();
    assert_eq!(queued.status, TaskStatus::Pending);
    assert_eq!(queued.phase, LoopPhase::Pending);
    assert_eq!(sup.running(), 1);
    assert_eq!(factory.opened(), 1);

    gate.add_permits(10);
    assert_eq!(wait_done(&sup, first).await.status, TaskStatus::Completed);
    assert_eq!(wait_done(&sup, second).await.status, TaskStatus::Completed);
    assert_eq!(factory.opened(), 2);
}

#[tokio::test]
async fn test_panicking_task_is_isolated() {
    let factory = Arc::new(FakeFactory::new());
    factory.configure(
        TaskId(1),
        DriverOptions {
            panic_on_observe: true,
            ..DriverOptions::default()
        },
    );
    let model = Arc::new(ScriptedModel::repeating(finish("Example Domain")));
    let sup = supervisor(fast_config(2, OverflowPolicy::Queue), model, factory.clone());

    let doomed = sup.start("crash", "tester").unwrap();
    let healthy = sup.start("survive", "tester").unwrap();
    assert_eq!(doomed, TaskId(1));

    let crashed = wait_done(&sup, doomed).await;
    assert_eq!(crashed.status, TaskStatus::Failed);
    match crashed.error {
        Some(TaskError::Panicked { message }) => assert!(message.contains("renderer crashed")),
        other => panic!("expected a panic error, got {:?}", other),
    }
    // the crashed loop's session is still torn down
    assert_eq!(DriverState::count(&factory.session(doomed).unwrap().closes), 1);

    let fine = wait_done(&sup, healthy).await;
    assert_eq!(fine.status, TaskStatus::Completed);
    assert_eq!(fine.summary.as_deref(), Some("Example Domain"));

    // the supervisor keeps accepting work
    let later = sup.start("after the crash", "tester").unwrap();
    assert_eq!(wait_done(&sup, later).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_session_open_failure_fails_only_that_task() {
    let factory = Arc::new(FakeFactory::new());
    factory.refuse(TaskId(1));
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(2, OverflowPolicy::Queue), model.clone(), factory.clone());

    let refused = sup.start("no browser", "tester").unwrap();
    let other = sup.start("with browser", "tester").unwrap();

    let failed = wait_done(&sup, refused).await;
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error.unwrap().kind(), TaskErrorKind::Session);
    assert!(factory.session(refused).is_none());

    assert_eq!(wait_done(&sup, other).await.status, TaskStatus::Completed);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_cancel_queued_task_never_opens_session() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(1, OverflowPolicy::Queue), model, factory.clone());

    let running = sup.start("running", "tester").unwrap();
    factory.wait_for_observe(running, 1).await;
    let queued = sup.start("queued", "tester").unwrap();

    sup.cancel(queued).unwrap();
    let cancelled = wait_done(&sup, queued).await;
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(factory.session(queued).is_none());

    gate.add_permits(10);
    assert_eq!(wait_done(&sup, running).await.status, TaskStatus::Completed);
    assert_eq!(factory.opened(), 1);
}

#[tokio::test]
async fn test_cancel_terminal_task_changes_nothing() {
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(
        fast_config(1, OverflowPolicy::Queue),
        model,
        Arc::new(FakeFactory::new()),
    );

    let id = sup.start("quick", "tester").unwrap();
    let done = wait_done(&sup, id).await;
    assert_ok!(sup.cancel(id));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let after = sup.status(id).unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.log.len(), done.log.len());
}

#[tokio::test]
async fn test_reap_removes_only_finished_tasks() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = Arc::new(FakeFactory::new());
    factory.configure(
        TaskId(2),
        DriverOptions {
            observe_gate: Some(gate.clone()),
            ..DriverOptions::default()
        },
    );
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(2, OverflowPolicy::Queue), model, factory.clone());

    let quick = sup.start("quick", "tester").unwrap();
    let slow = sup.start("slow", "tester").unwrap();
    wait_done(&sup, quick).await;
    factory.wait_for_observe(slow, 1).await;

    assert_eq!(sup.reap(), vec![quick]);
    assert_eq!(sup.status(quick).err(), Some(SupervisorError::UnknownTask(quick)));
    assert_eq!(sup.status(slow).unwrap().phase, LoopPhase::Observing);

    gate.add_permits(10);
    wait_done(&sup, slow).await;
    assert_eq!(sup.reap(), vec![slow]);
    assert!(sup.list().is_empty());
}

#[tokio::test]
async fn test_unknown_task_id() {
    let sup = supervisor(
        fast_config(1, OverflowPolicy::Queue),
        Arc::new(ScriptedModel::new(Vec::new())),
        Arc::new(FakeFactory::new()),
    );
    let ghost = TaskId(42);

    assert_eq!(sup.status(ghost).err(), Some(SupervisorError::UnknownTask(ghost)));
    assert_eq!(sup.cancel(ghost), Err(SupervisorError::UnknownTask(ghost)));
    assert_eq!(sup.reply(ghost, "hi"), Err(SupervisorError::UnknownTask(ghost)));
    assert_eq!(sup.wait(ghost).await.err(), Some(SupervisorError::UnknownTask(ghost)));
}

#[tokio::test]
async fn test_reply_requires_pending_question() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(1, OverflowPolicy::Queue), model, factory.clone());

    let id = sup.start("busy", "tester").unwrap();
    factory.wait_for_observe(id, 1).await;

    assert_eq!(
        sup.reply(id, "hello?"),
        Err(SupervisorError::NotWaitingOnUser(id))
    );

    gate.add_permits(10);
    wait_done(&sup, id).await;
}

#[tokio::test]
async fn test_list_is_ordered_and_counts_slots() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(2, OverflowPolicy::Queue), model, factory.clone());

    let ids: Vec<TaskId> = (0..3)
        .map(|n| sup.start(format!("task {}", n), "tester").unwrap())
        .collect();
    factory.wait_for_observe(ids[0], 1).await;
    factory.wait_for_observe(ids[1], 1).await;

    let listed: Vec<TaskId> = sup.list().iter().map(|s| s.id).collect();
    assert_eq!(listed, ids);
    assert_eq!(sup.running(), 2);
    assert_eq!(sup.capacity(), 2);
    assert_eq!(sup.status(ids[2]).unwrap().status, TaskStatus::Pending);

    gate.add_permits(10);
    for id in ids {
        assert_eq!(wait_done(&sup, id).await.status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn test_shutdown_cancels_everything() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(1, OverflowPolicy::Queue), model.clone(), factory.clone());

    let active = sup.start("active", "tester").unwrap();
    let queued = sup.start("queued", "tester").unwrap();
    factory.wait_for_observe(active, 1).await;

    let stopping = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    // the in-flight observe has to finish before the loop can stop
    gate.add_permits(10);
    tokio::time::timeout(TEST_DEADLINE, stopping)
        .await
        .expect("shutdown finished")
        .unwrap();

    assert_eq!(sup.status(active).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(sup.status(queued).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(model.calls(), 0);
    assert_eq!(
        sup.start("too late", "tester"),
        Err(SupervisorError::ShuttingDown)
    );
}

#[tokio::test]
async fn test_close_joins_and_forgets() {
    let gate = Arc::new(Semaphore::new(0));
    let factory = gated_factory(&gate);
    let model = Arc::new(ScriptedModel::repeating(finish("done")));
    let sup = supervisor(fast_config(1, OverflowPolicy::Queue), model, factory.clone());

    let id = sup.start("closing", "tester").unwrap();
    let session = factory.wait_for_observe(id, 1).await;

    let closing = {
        let sup = sup.clone();
        tokio::spawn(async move { sup.close(id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.add_permits(10);
    let closed = tokio::time::timeout(TEST_DEADLINE, closing)
        .await
        .expect("close finished")
        .unwrap()
        .unwrap();

    assert_eq!(closed.status, TaskStatus::Cancelled);
    assert_eq!(DriverState::count(&session.closes), 1);
    assert!(sup.list().is_empty());
}

#[tokio::test]
async fn test_event_stream_reports_lifecycle() {
    let model = Arc::new(ScriptedModel::repeating(finish("Example Domain")));
    let sup = supervisor(
        fast_config(1, OverflowPolicy::Queue),
        model,
        Arc::new(FakeFactory::new()),
    );
    let events = sup.events();
    tokio::pin!(events);

    let id = sup.start("Read the title", "researcher").unwrap();

    let first = events.next().await.expect("created event");
    assert_eq!(first.task_id, id);
    assert_eq!(first.kind, TaskEventKind::Created);
    assert_eq!(first.status, TaskStatus::Pending);

    let terminal = tokio::time::timeout(TEST_DEADLINE, async {
        while let Some(event) = events.next().await {
            if event.phase.is_terminal() {
                return event;
            }
        }
        panic!("stream ended early");
    })
    .await
    .expect("terminal event in time");

    assert_eq!(terminal.status, TaskStatus::Completed);
    assert_eq!(terminal.summary, "Example Domain");
}

#[tokio::test]
async fn test_event_stream_ends_once_supervisor_is_dropped() {
    let model = Arc::new(ScriptedModel::repeating(finish("Example Domain")));
    let sup = supervisor(
        fast_config(1, OverflowPolicy::Queue),
        model,
        Arc::new(FakeFactory::new()),
    );
    let events = sup.events();
    tokio::pin!(events);

    let id = sup.start("Read the title", "researcher").unwrap();
    wait_done(&sup, id).await;
    sup.shutdown().await;
    drop(sup);

    // a printer draining this stream finishes instead of being aborted mid-flush
    let drained = tokio::time::timeout(TEST_DEADLINE, async {
        let mut seen = Vec::new();
        while let Some(event) = events.next().await {
            seen.push(event);
        }
        seen
    })
    .await
    .expect("stream ends after the supervisor is gone");

    let last = drained.last().expect("buffered events are still delivered");
    assert_eq!(last.task_id, id);
    assert_eq!(last.status, TaskStatus::Completed);
}
