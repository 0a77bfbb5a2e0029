//! InstallationService: start / execute / status / list / cancel / rollback.

use std::sync::Arc;
use std::time::Duration;

use rigup_core::{Component, ProgressSink, SessionStatus};
use rigup_install::fakes::{FakeConfigDeployer, FakePackageManager, FakeServiceManager, StaticProbe};
use rigup_install::{
    Collaborators, ExecutionStatus, InstallRequest, InstallationPipeline, InstallationService,
    PipelineState, RigupConfig, ServiceError,
};
use rigup_state::fakes::{MemoryHistoryRecorder, MemorySessionRepository};
use rigup_state::{SessionId, SessionRecord, SessionRepository};

struct Fixture {
    packages: Arc<FakePackageManager>,
    sessions: Arc<MemorySessionRepository>,
    service: InstallationService,
    _home: tempfile::TempDir,
}

fn fixture_with(packages: FakePackageManager, sessions: Arc<MemorySessionRepository>) -> Fixture {
    let home = tempfile::tempdir().unwrap();
    let config = RigupConfig {
        home_dir: home.path().to_path_buf(),
        state_dir: home.path().join("state"),
        wallpaper_source: home.path().join("missing.png"),
        ..RigupConfig::default()
    };
    let packages = Arc::new(packages);
    let collab = Collaborators {
        packages: packages.clone(),
        query: packages.clone(),
        services: Arc::new(FakeServiceManager::new()),
        deployer: Arc::new(FakeConfigDeployer::new()),
        probe: Arc::new(StaticProbe::default()),
        history: Arc::new(MemoryHistoryRecorder::new()),
    };
    let pipeline = InstallationPipeline::new(collab, Arc::new(config));
    Fixture {
        packages,
        service: InstallationService::new(pipeline, sessions.clone()),
        sessions,
        _home: home,
    }
}

fn fixture() -> Fixture {
    fixture_with(
        FakePackageManager::new(),
        Arc::new(MemorySessionRepository::new()),
    )
}

fn core_request() -> InstallRequest {
    InstallRequest::latest(&[Component::Core, Component::Terminal])
}

async fn wait_terminal(service: &InstallationService, id: &str) -> ExecutionStatus {
    for _ in 0..200 {
        let status = service.status(id).await.unwrap();
        if status.status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never finished", id);
}

async fn wait_saved(sessions: &MemorySessionRepository, id: &str) -> SessionRecord {
    for _ in 0..200 {
        if let Ok(record) = sessions.find_by_id(&SessionId::from(id)).await {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never saved", id);
}

#[tokio::test]
async fn start_rejects_invalid_requests() {
    let f = fixture();

    let err = f.service.start(InstallRequest::latest(&[])).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.to_string(), "installation must select at least one component");

    let err = f
        .service
        .start(InstallRequest::latest(&[Component::Terminal]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert!(f.service.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn start_registers_a_pending_session() {
    let f = fixture();
    let started = f.service.start(core_request()).await.unwrap();
    assert_eq!(started.component_count, 2);

    let status = f.service.status(&started.session_id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Pending);
    assert_eq!(status.phase, PipelineState::Pending);
    assert_eq!(status.percent_complete, 0);
    assert_eq!(f.packages.install_calls(), 0);
}

#[tokio::test]
async fn execute_runs_in_background_and_saves_the_session() {
    let f = fixture();
    let id = f.service.start(core_request()).await.unwrap().session_id;

    f.service.execute(&id).await.unwrap();
    let status = wait_terminal(&f.service, &id).await;
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.phase, PipelineState::Completed);
    assert_eq!(status.percent_complete, 100);

    let record = wait_saved(&f.sessions, &id).await;
    assert_eq!(record.status, SessionStatus::Completed);
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn second_execute_is_a_conflict() {
    let f = fixture();
    let id = f.service.start(core_request()).await.unwrap().session_id;
    f.service.run(&id, &ProgressSink::none()).await.unwrap();

    let err = f.service.execute(&id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn run_streams_progress_to_the_caller() {
    let f = fixture();
    let id = f.service.start(core_request()).await.unwrap().session_id;
    let (sink, mut rx) = ProgressSink::channel(64);

    let outcome = f.service.run(&id, &sink).await.unwrap();
    assert!(outcome.succeeded());

    let mut last = None;
    while let Ok(update) = rx.try_recv() {
        assert_eq!(update.session_id, id);
        last = Some(update);
    }
    assert_eq!(last.unwrap().percent, 100);
}

#[tokio::test]
async fn cancel_before_execute_finishes_the_session() {
    let f = fixture();
    let id = f.service.start(core_request()).await.unwrap().session_id;

    let status = f.service.cancel(&id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Cancelled);
    assert_eq!(status.phase, PipelineState::Cancelled);

    let err = f.service.execute(&id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(f.packages.install_calls(), 0);

    let record = f.sessions.find_by_id(&SessionId::from(id.as_str())).await.unwrap();
    assert_eq!(record.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn cancel_after_completion_is_a_conflict() {
    let f = fixture();
    let id = f.service.start(core_request()).await.unwrap().session_id;
    f.service.run(&id, &ProgressSink::none()).await.unwrap();

    let err = f.service.cancel(&id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let f = fixture();
    for err in [
        f.service.status("nope").await.unwrap_err(),
        f.service.cancel("nope").await.unwrap_err(),
        f.service.execute("nope").await.unwrap_err(),
        f.service.rollback("nope").await.unwrap_err(),
    ] {
        assert_eq!(err.status_code(), 404, "{}", err);
        assert_eq!(err.kind(), "not_found");
    }
}

#[tokio::test]
async fn list_is_newest_first() {
    let f = fixture();
    let first = f.service.start(core_request()).await.unwrap().session_id;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = f.service.start(core_request()).await.unwrap().session_id;

    let listed: Vec<String> = f
        .service
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(listed, vec![second, first]);
}

#[tokio::test]
async fn rollback_after_failure_removes_installed_packages() {
    let f = fixture_with(
        FakePackageManager::new().failing("foot"),
        Arc::new(MemorySessionRepository::new()),
    );
    let id = f.service.start(core_request()).await.unwrap().session_id;
    let outcome = f.service.run(&id, &ProgressSink::none()).await.unwrap();
    assert_eq!(outcome.state, PipelineState::Failed);

    let report = f.service.rollback(&id).await.unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(f.packages.calls().contains(&"remove sway".to_string()));

    let record = f.sessions.find_by_id(&SessionId::from(id.as_str())).await.unwrap();
    assert!(record.rollback.is_empty());
}

#[tokio::test]
async fn finished_sessions_leave_the_registry_but_stay_reachable() {
    let f = fixture();
    let finished = f.service.start(core_request()).await.unwrap().session_id;
    let pending = f.service.start(core_request()).await.unwrap().session_id;
    assert_eq!(f.service.live_sessions().await, 2);

    f.service.run(&finished, &ProgressSink::none()).await.unwrap();
    assert_eq!(f.service.live_sessions().await, 1);

    let status = f.service.status(&finished).await.unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.percent_complete, 100);

    let listed: Vec<String> = f
        .service
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert!(listed.contains(&finished));
    assert!(listed.contains(&pending));

    let report = f.service.rollback(&finished).await.unwrap();
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(f.packages.calls().contains(&"remove sway".to_string()));

    f.service.cancel(&pending).await.unwrap();
    assert_eq!(f.service.live_sessions().await, 0);
    let status = f.service.status(&pending).await.unwrap();
    assert_eq!(status.status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn background_execution_evicts_after_saving() {
    let f = fixture();
    let id = f.service.start(core_request()).await.unwrap().session_id;
    f.service.execute(&id).await.unwrap();
    wait_saved(&f.sessions, &id).await;

    for _ in 0..200 {
        if f.service.live_sessions().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.service.live_sessions().await, 0);
    assert_eq!(f.service.execute(&id).await.unwrap_err().status_code(), 409);
}

#[tokio::test]
async fn stored_sessions_survive_a_new_service() {
    let sessions = Arc::new(MemorySessionRepository::new());
    let id = {
        let f = fixture_with(FakePackageManager::new(), sessions.clone());
        let id = f.service.start(core_request()).await.unwrap().session_id;
        f.service.run(&id, &ProgressSink::none()).await.unwrap();
        id
    };

    let f = fixture_with(FakePackageManager::new(), sessions);
    let status = f.service.status(&id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.phase, PipelineState::Completed);
    assert_eq!(status.components_total, 2);
    assert_eq!(f.service.list().await.unwrap().len(), 1);

    let err = f.service.cancel(&id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    let session = f.service.session(&id).await.unwrap();
    assert!(session.can_rollback());
    let report = f.service.rollback(&id).await.unwrap();
    assert!(report.errors.is_empty());
    assert_eq!(f.packages.calls().iter().filter(|c| c.starts_with("remove")).count(), 2);
}
