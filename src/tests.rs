use std::{
    collections::VecDeque,
    convert::Infallible,
    future,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tempfile::TempDir;

use crate::{
    control::{self, ControlError},
    BackoffPolicy, Phase, ResourceKind, RetryPolicy, SuperviseError, Supervisor, SupervisorConfig,
    Watcher, WatcherState,
};

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Plays back a fixed list of step outcomes, then waits forever.
pub(crate) struct Scripted(VecDeque<Result<(), String>>);

impl Scripted {
    pub(crate) fn new<'a>(outcomes: impl IntoIterator<Item = Result<(), &'a str>>) -> Self {
        Self(
            outcomes
                .into_iter()
                .map(|outcome| outcome.map_err(str::to_owned))
                .collect(),
        )
    }

    pub(crate) fn failing() -> Self {
        Self::new([Err("stream reset")])
    }

    pub(crate) fn idle() -> Self {
        Self::new([])
    }
}

impl Watcher for Scripted {
    type Error = String;

    async fn step(&mut self) -> Result<(), String> {
        match self.0.pop_front() {
            Some(outcome) => {
                tokio::task::yield_now().await;
                outcome
            }
            None => future::pending().await,
        }
    }
}

/// Succeeds forever, one step per millisecond.
struct Ticker;

impl Watcher for Ticker {
    type Error = Infallible;

    async fn step(&mut self) -> Result<(), Infallible> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(())
    }
}

/// Fails every step without ever suspending.
struct Broken;

impl Watcher for Broken {
    type Error = &'static str;

    async fn step(&mut self) -> Result<(), &'static str> {
        Err("malformed event")
    }
}

fn ticker() -> future::Ready<Result<Ticker, Infallible>> {
    future::ready(Ok(Ticker))
}

fn config(dir: &TempDir) -> SupervisorConfig {
    SupervisorConfig::default().with_control_path(dir.path().join("watch.ctl"))
}

fn steps(health: &crate::Health, kind: ResourceKind) -> u64 {
    health.get(kind).map_or(0, |h| h.steps)
}

async fn exit(path: &Path) {
    assert_eq!(control::call(path, "exit", &[]).await.unwrap(), None);
}

#[tokio::test]
async fn failing_endpoint_factory_leaves_other_kinds_running() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let endpoint_factory = {
        let calls = Arc::clone(&calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            future::ready(match call {
                1 => Ok(Scripted::failing()),
                2 => Ok(Scripted::new([Ok(()), Err("watch expired")])),
                _ => Err("apiserver unavailable".to_owned()),
            })
        }
    };

    let supervisor = Supervisor::new(config(&dir))
        .watch(ResourceKind::Pod, ticker)
        .watch(ResourceKind::Service, ticker)
        .watch_with_policy(ResourceKind::Endpoint, RetryPolicy::fail_fast(), endpoint_factory);
    let health = supervisor.health();
    let path = supervisor.control_path().to_owned();
    let running = tokio::spawn(supervisor.run());

    eventually(|| {
        matches!(
            health.get(ResourceKind::Endpoint).map(|h| h.state),
            Some(WatcherState::Failed { .. })
        )
    })
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(steps(&health, ResourceKind::Endpoint), 1);

    for kind in [ResourceKind::Pod, ResourceKind::Service] {
        let before = steps(&health, kind);
        eventually(|| steps(&health, kind) > before + 5).await;
        assert_eq!(health.get(kind).unwrap().state, WatcherState::Running);
    }
    assert!(!health.is_healthy());

    let status = control::call(&path, "status", &[]).await.unwrap().unwrap();
    assert!(status.contains("endpoint: failed: endpoint watcher could not be created"));
    assert!(status.contains("pod: running, generation 1"));

    exit(&path).await;
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn permanently_failing_factory_does_not_delay_other_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let policy = RetryPolicy::unbounded().with_backoff(BackoffPolicy::constant(
        Duration::from_millis(1),
    ));
    let supervisor = Supervisor::new(config(&dir).with_retry(policy))
        .watch(ResourceKind::Pod, || {
            future::ready(Err::<Ticker, _>("connection refused".to_owned()))
        })
        .watch(ResourceKind::Service, ticker)
        .watch(ResourceKind::Endpoint, || future::ready(Ok::<_, Infallible>(Broken)));
    let health = supervisor.health();
    let path = supervisor.control_path().to_owned();
    let running = tokio::spawn(supervisor.run());

    eventually(|| steps(&health, ResourceKind::Service) > 20).await;
    eventually(|| {
        matches!(
            health.get(ResourceKind::Pod).map(|h| h.state),
            Some(WatcherState::Recreating { attempt }) if attempt > 3
        )
    })
    .await;
    assert!(health.get(ResourceKind::Endpoint).unwrap().recycles > 0);
    // retrying forever is not a permanent failure
    assert!(health.is_healthy());

    exit(&path).await;
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn exit_while_runners_are_mid_step() {
    let dir = tempfile::tempdir().unwrap();
    let processor_started = Arc::new(AtomicBool::new(false));

    let mut supervisor = Supervisor::new(config(&dir));
    for kind in ResourceKind::ALL {
        supervisor = supervisor.watch(kind, || future::ready(Ok::<_, Infallible>(Scripted::idle())));
    }
    let supervisor = supervisor.task("processor", {
        let started = Arc::clone(&processor_started);
        async move {
            started.store(true, Ordering::SeqCst);
            future::pending::<()>().await
        }
    });
    let health = supervisor.health();
    let phase = supervisor.phase();
    let path = supervisor.control_path().to_owned();
    assert_eq!(*phase.borrow(), Phase::Starting);
    let running = tokio::spawn(supervisor.run());

    eventually(|| {
        ResourceKind::ALL
            .iter()
            .all(|kind| health.get(*kind).map(|h| h.state) == Some(WatcherState::Running))
    })
    .await;
    eventually(|| processor_started.load(Ordering::SeqCst)).await;
    assert_eq!(*phase.borrow(), Phase::Running);

    exit(&path).await;
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(*phase.borrow(), Phase::Terminated);
    assert!(!path.exists());
}

#[tokio::test]
async fn exit_after_shutdown_began_has_no_effect() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&dir)).watch(ResourceKind::Pod, ticker);
    let phase = supervisor.phase();
    let path = supervisor.control_path().to_owned();
    let running = tokio::spawn(supervisor.run());

    eventually(|| path.exists()).await;
    let mut client = control::ControlClient::connect(&path).await.unwrap();
    assert_eq!(client.call("exit", &[]).await.unwrap(), None);
    assert!(matches!(
        client.call("exit", &[]).await,
        Err(ControlError::Closed)
    ));

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
    assert!(control::call(&path, "exit", &[]).await.is_err());
    assert_eq!(*phase.borrow(), Phase::Terminated);
}

#[tokio::test]
async fn shutdown_handle_stops_the_supervisor() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&dir)).task("short-lived", async {});
    let shutdown = supervisor.shutdown();
    let phase = supervisor.phase();
    let running = tokio::spawn(supervisor.run());

    eventually(|| *phase.borrow() == Phase::Running).await;
    assert!(shutdown.trigger());
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(*phase.borrow(), Phase::Terminated);
}

#[tokio::test]
async fn rejects_second_watcher_for_a_kind() {
    let dir = tempfile::tempdir().unwrap();
    let result = Supervisor::new(config(&dir))
        .watch(ResourceKind::Service, ticker)
        .watch(ResourceKind::Service, ticker)
        .run()
        .await;
    assert!(matches!(
        result,
        Err(SuperviseError::DuplicateKind(ResourceKind::Service))
    ));
}

#[tokio::test]
async fn control_bind_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig::default()
        .with_control_path(dir.path().join("missing").join("watch.ctl"));
    let result = Supervisor::new(config)
        .watch(ResourceKind::Pod, ticker)
        .run()
        .await;
    assert!(matches!(
        result,
        Err(SuperviseError::Control(ControlError::Bind { .. }))
    ));
}

#[tokio::test]
async fn custom_commands_are_served() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&dir)).command(
        "kinds",
        "",
        0,
        0,
        |_, reply| {
            let names: Vec<_> = ResourceKind::ALL.iter().map(|k| k.as_str()).collect();
            reply.ok(Some(names.join(",")))
        },
    );
    let path = supervisor.control_path().to_owned();
    let running = tokio::spawn(supervisor.run());

    eventually(|| path.exists()).await;
    assert_eq!(
        control::call(&path, "kinds", &[]).await.unwrap().as_deref(),
        Some("pod,service,endpoint")
    );
    let help = control::call(&path, "help", &[]).await.unwrap().unwrap();
    for command in ["exit", "help", "kinds", "status", "version"] {
        assert!(help.contains(command), "{command} missing from help");
    }

    exit(&path).await;
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor did not stop")
        .unwrap()
        .unwrap();
}
