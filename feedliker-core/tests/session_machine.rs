mod support;

use std::sync::Arc;

use feedliker_core::session::{SessionError, SessionMachine, SessionState, Validation};
use support::{config, world, FakeLauncher, FakeQr};

fn machine(dir: &tempfile::TempDir, world: &support::SharedWorld) -> SessionMachine {
    SessionMachine::new(
        config(dir),
        Arc::new(FakeLauncher::new(world.clone())),
        Arc::new(FakeQr),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn persisted_login_validates_as_active() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    world.borrow_mut().authenticated = true;
    let mut machine = machine(&dir, &world);

    let session = match machine.establish(true).await.unwrap() {
        Validation::Active(session) => session,
        Validation::Expired(_) => panic!("expected an active session"),
    };

    assert!(session.authenticated());
    assert_eq!(machine.state(), SessionState::Active);
    session.close().await.unwrap();
    assert_eq!(world.borrow().opened, world.borrow().closed);
}

#[tokio::test(start_paused = true)]
async fn first_run_hands_back_unauthenticated_session() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    let mut machine = machine(&dir, &world);

    let session = match machine.establish(true).await.unwrap() {
        Validation::Expired(session) => session,
        Validation::Active(_) => panic!("expected an expired session"),
    };

    assert!(!session.authenticated());
    assert!(!world.borrow().events.contains(&"wait"));
    assert_eq!(world.borrow().opened, 1);
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn later_runs_log_in_and_revalidate() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    let config = config(&dir);
    let mut machine = SessionMachine::new(
        config.clone(),
        Arc::new(FakeLauncher::new(world.clone())),
        Arc::new(FakeQr),
    )
    .unwrap();

    let session = match machine.establish(false).await.unwrap() {
        Validation::Active(session) => session,
        Validation::Expired(_) => panic!("expected login to succeed"),
    };

    assert!(config.paths.session.exists());
    assert!(config.paths.qrcode.exists());
    session.close().await.unwrap();
    let world = world.borrow();
    assert_eq!(world.opened, 3);
    assert_eq!(world.closed, 3);
}

#[tokio::test(start_paused = true)]
async fn unscanned_code_times_out_fatally() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    world.borrow_mut().scan_succeeds = false;
    let mut machine = machine(&dir, &world);

    let result = machine.establish(false).await;

    assert!(matches!(result, Err(SessionError::LoginTimeout(300))));
    assert_eq!(machine.state(), SessionState::Fatal);
    assert_eq!(world.borrow().opened, world.borrow().closed);
}

#[tokio::test(start_paused = true)]
async fn missing_qr_image_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    world.borrow_mut().serve_qr = false;
    let mut machine = machine(&dir, &world);

    let result = machine.establish(false).await;

    assert!(matches!(result, Err(SessionError::QrUnavailable(_))));
    assert!(!world.borrow().events.contains(&"wait"));
    assert_eq!(world.borrow().opened, world.borrow().closed);
}

#[tokio::test(start_paused = true)]
async fn stale_qr_image_is_removed_before_login() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    world.borrow_mut().serve_qr = false;
    let config = config(&dir);
    std::fs::write(&config.paths.qrcode, b"old").unwrap();
    let mut machine = SessionMachine::new(
        config.clone(),
        Arc::new(FakeLauncher::new(world.clone())),
        Arc::new(FakeQr),
    )
    .unwrap();

    let result = machine.establish(false).await;

    assert!(matches!(result, Err(SessionError::QrUnavailable(_))));
    assert!(!config.paths.qrcode.exists());
}

#[tokio::test]
async fn launch_failure_reports_backend_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let world = world();
    world.borrow_mut().launch_fails = true;
    let mut machine = machine(&dir, &world);

    let result = machine.validate().await;

    assert!(matches!(result, Err(SessionError::Backend(_))));
}
