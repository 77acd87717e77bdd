mod common;

use common::{wait_for_stops, Behaviour, BoundRuntime, Call, FakeRuntime};
use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock_container::{
    ConfiguredPath, ContainerHandle, ContainerState, Error, ImageSpec, MountKind, MountPlanner,
};

fn image() -> ImageSpec {
    ImageSpec::new("mock/server", "latest").unwrap()
}

/// Run `scenario` on a fresh current-thread runtime, on its own thread, failing the test if the
/// runtime gets stuck.
fn on_current_thread<S, F, T>(scenario: S) -> T
where
    S: FnOnce() -> F + Send + 'static,
    F: Future<Output = T>,
    T: Send + 'static,
{
    let (done, finished) = mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _ = done.send(runtime.block_on(scenario()));
    });
    match finished.recv_timeout(Duration::from_secs(10)) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => panic!("The current-thread runtime got stuck"),
        Err(RecvTimeoutError::Disconnected) => panic!("The scenario panicked"),
    }
}

#[tokio::test]
async fn start_moves_the_container_to_running() {
    // Arrange
    let runtime = Arc::new(FakeRuntime::new());
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
    assert_eq!(handle.state(), ContainerState::Created);
    assert!(handle.port_bindings().is_empty());

    // Act
    handle.start().await.unwrap();

    // Assert
    assert_eq!(handle.state(), ContainerState::Running);
    assert_eq!(handle.id(), Some("fake-1"));
    assert_eq!(handle.host(), Some("localhost"));
    assert_eq!(handle.port_bindings().get(&8080), Some(&48080));
    assert_eq!(
        runtime.calls(),
        vec![
            Call::Create,
            Call::Start("fake-1".into()),
            Call::Inspect("fake-1".into())
        ]
    );
}

#[tokio::test]
async fn image_mounts_and_command_are_submitted_to_the_runtime() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let mapping = dir.path().join("hello.json");
    std::fs::write(&mapping, "{}").unwrap();
    let mounts = MountPlanner::new()
        .plan(&[ConfiguredPath::new(
            &mapping,
            MountKind::Mapping {
                name: "hello.json".into(),
            },
        )])
        .unwrap();
    let runtime = Arc::new(FakeRuntime::new());
    let mut handle = ContainerHandle::new(runtime.clone(), image(), mounts.clone())
        .with_command(vec!["--disable-banner".into()]);

    // Act
    handle.start().await.unwrap();

    // Assert
    let created = runtime.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].image, image());
    assert_eq!(created[0].mounts, mounts);
    assert_eq!(created[0].command, vec!["--disable-banner".to_owned()]);
    assert_eq!(handle.mounts(), mounts.as_slice());
}

#[tokio::test]
async fn a_container_can_only_be_started_once() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
    handle.start().await.unwrap();

    let outcome = handle.start().await;

    assert!(matches!(outcome, Err(Error::Configuration(_))));
    assert_eq!(handle.state(), ContainerState::Running);
}

#[tokio::test]
async fn a_rejected_creation_fails_the_container() {
    // Arrange
    let runtime =
        Arc::new(FakeRuntime::new().behaviour(Behaviour::RejectCreate("no such image".into())));
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);

    // Act
    let outcome = handle.start().await;

    // Assert
    match outcome {
        Err(Error::RuntimeLaunch(message)) => assert!(message.contains("no such image")),
        other => panic!("Expected a launch error, got {:?}", other),
    }
    assert_eq!(handle.state(), ContainerState::Failed);
    assert!(handle.port_bindings().is_empty());
    // Nothing was allocated, nothing to release.
    assert_eq!(runtime.stops(), 0);
}

#[tokio::test]
async fn a_rejected_start_releases_the_created_container() {
    let runtime =
        Arc::new(FakeRuntime::new().behaviour(Behaviour::RejectStart("port is taken".into())));
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);

    let outcome = handle.start().await;

    match outcome {
        Err(Error::RuntimeLaunch(message)) => assert!(message.contains("port is taken")),
        other => panic!("Expected a launch error, got {:?}", other),
    }
    assert_eq!(handle.state(), ContainerState::Failed);
    assert_eq!(runtime.stops(), 1);
    assert_eq!(handle.id(), None);
}

#[tokio::test]
async fn a_container_exiting_on_startup_reports_its_logs() {
    let runtime = Arc::new(
        FakeRuntime::new()
            .behaviour(Behaviour::Exits(1))
            .logs("Error: Unable to access jarfile"),
    );
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);

    let outcome = handle.start().await;

    match outcome {
        Err(Error::RuntimeLaunch(message)) => {
            assert!(message.contains("exited with code 1"));
            assert!(message.contains("Unable to access jarfile"));
        }
        other => panic!("Expected a launch error, got {:?}", other),
    }
    assert_eq!(handle.state(), ContainerState::Failed);
}

#[tokio::test]
async fn stop_is_idempotent() {
    // Arrange
    let runtime = Arc::new(FakeRuntime::new());
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
    handle.start().await.unwrap();

    // Act
    handle.stop().await;
    handle.stop().await;

    // Assert
    assert_eq!(handle.state(), ContainerState::Stopped);
    assert!(handle.port_bindings().is_empty());
    assert_eq!(handle.host(), None);
    assert_eq!(runtime.stops(), 1);
}

#[tokio::test]
async fn stopping_a_container_that_never_started_is_a_no_op() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);

    handle.stop().await;

    assert_eq!(handle.state(), ContainerState::Created);
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn stop_failures_are_not_surfaced() {
    let runtime = Arc::new(FakeRuntime::new().failing_stop());
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
    handle.start().await.unwrap();

    // Act - does not panic, does not return an error
    handle.stop().await;

    assert_eq!(handle.state(), ContainerState::Stopped);
    assert_eq!(runtime.stops(), 1);
}

#[tokio::test]
async fn logs_are_a_restartable_snapshot() {
    let runtime = Arc::new(FakeRuntime::new().logs("line one\nline two\n"));
    let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
    assert_eq!(handle.logs().await.unwrap(), "");
    handle.start().await.unwrap();

    let first = handle.logs().await.unwrap();
    let second = handle.logs().await.unwrap();

    assert_eq!(first, "line one\nline two\n");
    assert_eq!(first, second);
}

#[tokio::test]
async fn dropping_a_running_container_stops_it() {
    let runtime = Arc::new(FakeRuntime::new());
    {
        let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
        handle.start().await.unwrap();
    }

    wait_for_stops(&runtime, 1).await;
    assert_eq!(runtime.stops(), 1);
}

#[test]
fn dropping_on_a_current_thread_runtime_does_not_starve_the_runtime_client() {
    // Arrange
    let engine = Arc::new(FakeRuntime::new());
    let observed = engine.clone();

    // Act
    let stops = on_current_thread(move || async move {
        let mut handle =
            ContainerHandle::new(Arc::new(BoundRuntime::new(engine.clone())), image(), vec![]);
        handle.start().await.unwrap();

        drop(handle);

        // The teardown needs the runtime to make progress.
        wait_for_stops(&engine, 1).await;
        engine.stops()
    });

    // Assert
    assert_eq!(stops, 1);
    assert_eq!(observed.stops(), 1);
}

#[test]
fn dropping_on_a_current_thread_runtime_uses_a_detached_client_when_available() {
    let engine = Arc::new(FakeRuntime::new());

    let stops_right_after_drop = on_current_thread({
        let engine = engine.clone();
        move || async move {
            let runtime = BoundRuntime::new(engine.clone()).detachable();
            let mut handle = ContainerHandle::new(Arc::new(runtime), image(), vec![]);
            handle.start().await.unwrap();

            drop(handle);

            engine.stops()
        }
    });

    assert_eq!(stops_right_after_drop, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_on_a_multi_threaded_runtime_waits_for_the_runtime_client() {
    let engine = Arc::new(FakeRuntime::new());
    {
        let mut handle =
            ContainerHandle::new(Arc::new(BoundRuntime::new(engine.clone())), image(), vec![]);
        handle.start().await.unwrap();
    }

    assert_eq!(engine.stops(), 1);
}

#[test]
fn dropping_a_handle_that_outlived_its_runtime_still_stops_the_container() {
    // Arrange
    let engine = Arc::new(FakeRuntime::new());
    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let handle = tokio_runtime.block_on(async {
        let mut handle = ContainerHandle::new(engine.clone(), image(), vec![]);
        handle.start().await.unwrap();
        handle
    });
    drop(tokio_runtime);

    // Act
    drop(handle);

    // Assert
    assert_eq!(engine.stops(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_a_running_container_stops_it_on_a_multi_threaded_runtime() {
    let runtime = Arc::new(FakeRuntime::new());
    {
        let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
        handle.start().await.unwrap();
    }

    assert_eq!(runtime.stops(), 1);
}

#[tokio::test]
async fn dropping_a_stopped_container_does_not_stop_it_again() {
    let runtime = Arc::new(FakeRuntime::new());
    {
        let mut handle = ContainerHandle::new(runtime.clone(), image(), vec![]);
        handle.start().await.unwrap();
        handle.stop().await;
    }

    assert_eq!(runtime.stops(), 1);
}

#[tokio::test]
async fn the_stop_signal_fires_on_stop() {
    let runtime = Arc::new(FakeRuntime::new());
    let mut handle = ContainerHandle::new(runtime, image(), vec![]);
    handle.start().await.unwrap();
    let mut signal = handle.stop_signal();
    assert!(!signal.is_stopped());

    handle.stop().await;

    assert!(signal.is_stopped());
    // Resolves right away.
    signal.stopped().await;
}

#[test]
fn independent_handles_do_not_share_state() {
    let runtime = Arc::new(FakeRuntime::new());
    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    tokio_runtime.block_on(async {
        let mut first = ContainerHandle::new(runtime.clone(), image(), vec![]);
        let mut second = ContainerHandle::new(runtime.clone(), image(), vec![]);
        first.start().await.unwrap();
        second.start().await.unwrap();

        first.stop().await;

        assert_eq!(first.state(), ContainerState::Stopped);
        assert_eq!(second.state(), ContainerState::Running);
        assert_ne!(first.id(), second.id());
        second.stop().await;
    });
}
