use std::{collections::BTreeSet, convert::Infallible, future::Future, path::Path};

use futures::future::BoxFuture;
use tokio::{
    sync::watch,
    task::{JoinError, JoinSet},
};

use crate::{
    control::{Commands, ControlChannel, ControlError, Reply},
    Health, RecycleError, RecyclingRunner, ResourceKind, RetryPolicy, Shutdown, SupervisorConfig,
    WatcherFactory,
};

/// Process lifetime as seen by the [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

type RunnerFuture = BoxFuture<'static, Result<Infallible, RecycleError>>;

/// Runs one [`RecyclingRunner`] per resource kind, the control channel,
/// and any number of opaque tasks, until `exit` is received.
pub struct Supervisor {
    config: SupervisorConfig,
    shutdown: Shutdown,
    health: Health,
    phase: watch::Sender<Phase>,
    commands: Commands,
    runners: Vec<(ResourceKind, RunnerFuture)>,
    tasks: Vec<(String, BoxFuture<'static, ()>)>,
}

enum Exit {
    Watcher(ResourceKind, RecycleError),
    Task(String),
}

impl Supervisor {
    /// Creates a supervisor with the `exit` and `status` control commands registered.
    pub fn new(config: SupervisorConfig) -> Self {
        let shutdown = Shutdown::new();
        let health = Health::default();
        let (phase, _) = watch::channel(Phase::Starting);

        let mut commands = Commands::new();
        {
            let shutdown = shutdown.clone();
            commands.register("exit", "", 0, 0, move |_, reply| {
                if shutdown.trigger() {
                    log::info!("exit requested over the control channel");
                }
                reply.ok(None);
            });
        }
        {
            let health = health.clone();
            commands.register("status", "", 0, 0, move |_, reply| {
                reply.ok(Some(health.report()))
            });
        }

        Self {
            config,
            shutdown,
            health,
            phase,
            commands,
            runners: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Watches `kind` with watchers built by `factory`, using the configured retry policy.
    pub fn watch<F: WatcherFactory>(self, kind: ResourceKind, factory: F) -> Self {
        let policy = self.config.retry;
        self.watch_with_policy(kind, policy, factory)
    }

    pub fn watch_with_policy<F: WatcherFactory>(
        mut self,
        kind: ResourceKind,
        policy: RetryPolicy,
        factory: F,
    ) -> Self {
        let runner = RecyclingRunner::new(policy, self.health.clone());
        self.health.update(kind, |_| {});
        self.runners.push((
            kind,
            Box::pin(async move { runner.start(kind, factory).await }),
        ));
        self
    }

    /// Adds an opaque task, e.g. the processor consuming the watchers' events.
    pub fn task(
        mut self,
        name: impl Into<String>,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        self.tasks.push((name.into(), Box::pin(task)));
        self
    }

    /// Registers an additional control command. See [`Commands::register`].
    pub fn command(
        mut self,
        name: impl Into<String>,
        usage: impl Into<String>,
        min_args: usize,
        max_args: usize,
        handler: impl Fn(&[String], Reply) + Send + Sync + 'static,
    ) -> Self {
        self.commands
            .register(name, usage, min_args, max_args, handler);
        self
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn health(&self) -> Health {
        self.health.clone()
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn control_path(&self) -> &Path {
        &self.config.control_path
    }

    /// Starts everything and waits for the shutdown.
    ///
    /// Watcher failures never end this call; a runner that gives up is logged and its kind is
    /// reported as failed by [`Health`]. Once the control channel has closed, the remaining tasks
    /// are dropped without being told to stop.
    pub async fn run(self) -> Result<(), SuperviseError> {
        let Self {
            config,
            shutdown,
            health: _,
            phase,
            commands,
            runners,
            tasks,
        } = self;

        let mut kinds = BTreeSet::new();
        for (kind, _) in &runners {
            if !kinds.insert(*kind) {
                return Err(SuperviseError::DuplicateKind(*kind));
            }
        }

        let control = ControlChannel::bind(&config.control_path, commands, shutdown.clone())?;
        let mut control = tokio::spawn(control.serve());

        let mut supervised = JoinSet::new();
        for (kind, runner) in runners {
            supervised.spawn(async move {
                match runner.await {
                    Ok(never) => match never {},
                    Err(err) => Exit::Watcher(kind, err),
                }
            });
        }
        for (name, task) in tasks {
            supervised.spawn(async move {
                task.await;
                Exit::Task(name)
            });
        }

        phase.send_replace(Phase::Running);
        log::info!(
            "supervising {} watchers ({}) and {} other tasks",
            kinds.len(),
            kinds
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            supervised.len() - kinds.len()
        );

        let served = loop {
            tokio::select! {
                served = &mut control => break served,
                () = shutdown.triggered(), if *phase.borrow() == Phase::Running => {
                    log::info!("shutting down");
                    phase.send_replace(Phase::ShuttingDown);
                }
                Some(exited) = supervised.join_next() => match exited {
                    Ok(Exit::Watcher(kind, err)) => {
                        log::error!("{kind} resources are no longer watched: {err}");
                    }
                    Ok(Exit::Task(name)) => log::warn!("supervised task {name} returned"),
                    Err(err) if err.is_panic() => log::error!("supervised task panicked: {err}"),
                    Err(_) => {}
                },
            }
        };

        phase.send_replace(Phase::ShuttingDown);
        if !supervised.is_empty() {
            log::debug!("abandoning {} supervised tasks", supervised.len());
        }
        drop(supervised);
        phase.send_replace(Phase::Terminated);

        served.map_err(SuperviseError::ControlTask)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SuperviseError {
    #[error("more than one watcher registered for {0} resources")]
    DuplicateKind(ResourceKind),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("control channel task failed: {0}")]
    ControlTask(#[source] JoinError),
}
