//! Session rollback: strict reverse order, errors collected, log drained,
//! failed steps kept for retry, and replay from a stored snapshot.

use std::sync::Mutex;

use async_trait::async_trait;
use rigup_core::{
    Component, OperationResult, RollbackAction, RollbackExecutor, RollbackIntent, Session,
    SessionStatus, Status,
};

#[derive(Default)]
struct RecordingExecutor {
    applied: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

#[async_trait]
impl RollbackExecutor for RecordingExecutor {
    async fn apply(&self, intent: &RollbackIntent) -> anyhow::Result<()> {
        let path = match intent {
            RollbackIntent::RemoveFile { path } => path.clone(),
            other => other.describe(),
        };
        if self.fail_on.as_deref() == Some(path.as_str()) {
            anyhow::bail!("cannot remove {}", path);
        }
        self.applied.lock().unwrap().push(path);
        Ok(())
    }
}

fn remove(path: &str) -> RollbackIntent {
    RollbackIntent::RemoveFile {
        path: path.to_string(),
    }
}

fn session_with(paths: &[&str]) -> Session {
    let session = Session::new("installation");
    for p in paths {
        session.record(OperationResult::new(
            *p,
            Component::Core,
            Status::Completed,
            "done",
        ));
        session.register_rollback(RollbackAction::new(Component::Core.into(), remove(p)));
    }
    session
}

#[tokio::test]
async fn rollback_runs_in_reverse_registration_order() {
    let session = session_with(&["A", "B", "C"]);
    let executor = RecordingExecutor::default();

    let errors = session.rollback(&executor).await;
    assert!(errors.is_empty());
    assert_eq!(*executor.applied.lock().unwrap(), vec!["C", "B", "A"]);
}

#[tokio::test]
async fn rollback_collects_errors_and_keeps_going() {
    let session = session_with(&["A", "B", "C"]);
    let executor = RecordingExecutor {
        fail_on: Some("B".to_string()),
        ..Default::default()
    };

    let errors = session.rollback(&executor).await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].reason.contains("cannot remove B"));
    assert_eq!(*executor.applied.lock().unwrap(), vec!["C", "A"]);
}

#[tokio::test]
async fn rollback_drains_the_log() {
    let session = session_with(&["A"]);
    let executor = RecordingExecutor::default();
    assert!(session.can_rollback());

    session.rollback(&executor).await;
    assert!(!session.can_rollback());
    session.rollback(&executor).await;
    assert_eq!(executor.applied.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_undo_stays_in_the_log_for_retry() {
    let session = session_with(&["A", "B", "C"]);
    let failing = RecordingExecutor {
        fail_on: Some("B".to_string()),
        ..Default::default()
    };
    assert_eq!(session.rollback(&failing).await.len(), 1);
    assert!(session.can_rollback());
    assert_eq!(session.rollback_actions().len(), 1);

    let record = session.snapshot().unwrap();
    assert_eq!(record.rollback.len(), 1);

    let executor = RecordingExecutor::default();
    assert!(session.rollback(&executor).await.is_empty());
    assert_eq!(*executor.applied.lock().unwrap(), vec!["B"]);
    assert!(!session.can_rollback());
}

#[tokio::test]
async fn only_failed_batch_steps_are_retried() {
    let session = Session::new("setup");
    session.register_rollback(RollbackAction::new(
        Component::StatusBar.into(),
        RollbackIntent::Batch {
            steps: vec![remove("config"), remove("style.css"), remove("modules")],
        },
    ));
    let failing = RecordingExecutor {
        fail_on: Some("style.css".to_string()),
        ..Default::default()
    };
    session.rollback(&failing).await;
    assert_eq!(*failing.applied.lock().unwrap(), vec!["modules", "config"]);
    assert_eq!(session.rollback_actions()[0].intent, remove("style.css"));
}

#[tokio::test]
async fn batch_steps_undo_last_first() {
    let session = Session::new("setup");
    session.register_rollback(RollbackAction::new(
        Component::StatusBar.into(),
        RollbackIntent::Batch {
            steps: vec![remove("config"), remove("style.css")],
        },
    ));
    let executor = RecordingExecutor::default();
    session.rollback(&executor).await;
    assert_eq!(*executor.applied.lock().unwrap(), vec!["style.css", "config"]);
}

#[tokio::test]
async fn restored_snapshot_replays_rollback() {
    let session = session_with(&["A", "B"]);
    session.complete();
    let record = session.snapshot().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);

    let restored = Session::restore(&record).unwrap();
    let executor = RecordingExecutor::default();
    let errors = restored.rollback(&executor).await;
    assert!(errors.is_empty());
    assert_eq!(*executor.applied.lock().unwrap(), vec!["B", "A"]);
}

#[tokio::test]
async fn concurrent_readers_see_consistent_results() {
    let session = std::sync::Arc::new(Session::new("concurrent"));
    let writer = {
        let session = session.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                session.record(OperationResult::new(
                    format!("op{i}"),
                    Component::Core,
                    Status::Completed,
                    "",
                ));
                tokio::task::yield_now().await;
            }
        })
    };
    let reader = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..100 {
                let n = session.results().len();
                assert!(n >= last);
                last = n;
                tokio::task::yield_now().await;
            }
        })
    };
    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(session.len(), 100);
}
