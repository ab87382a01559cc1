use std::{error::Error, io, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use k8s_openapi::{
    api::core::v1::{Endpoints, Pod, Service},
    NamespaceResourceScope,
};
use kube_client::{Api, Client};
use kube_core::Resource;
use kube_runtime::watcher;
use kube_watch_supervisor::{
    cluster::{self, ClusterEvent, WatchedResource},
    control, ResourceKind, RetryPolicy, Supervisor, SupervisorConfig,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};

/// Keeps the pod, service and endpoint watchers of a cluster alive.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Control socket path [default: $KUBE_WATCH_RUNDIR/kube-watch-supervisor.<pid>.ctl]
    #[arg(long, global = true, env = "KUBE_WATCH_CONTROL_PATH")]
    control: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct RunArgs {
    /// Only watch objects in this namespace
    #[arg(long, env = "KUBE_WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Capacity of the queue between the watchers and the processor
    #[arg(long, env = "KUBE_WATCH_QUEUE", default_value_t = 1024)]
    queue: usize,

    /// Stop watching a kind after this many consecutive failures to reopen its stream
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_factory_attempts: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a command to a running process, e.g. `exit`, `status` or `help`
    Ctl {
        command: String,
        args: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Ctl { command, args }) => {
            let path = cli
                .control
                .ok_or("--control is required to reach a running process")?;
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            if let Some(body) = control::call(&path, &command, &args).await? {
                println!("{body}");
            }
            Ok(())
        }
        None => run(cli.control, cli.run).await,
    }
}

async fn run(control_path: Option<PathBuf>, args: RunArgs) -> Result<(), Box<dyn Error>> {
    let mut retry = RetryPolicy::unbounded();
    if let Some(attempts) = args.max_factory_attempts {
        retry = retry.with_max_factory_attempts(attempts);
    }
    let mut config = SupervisorConfig::default().with_retry(retry);
    if let Some(path) = control_path {
        config = config.with_control_path(path);
    }

    let client = Client::try_default().await?;
    let (events, queue) = mpsc::channel(args.queue.max(1));
    let namespace = args.namespace.as_deref();

    let supervisor = Supervisor::new(config)
        .watch(
            ResourceKind::Pod,
            cluster::factory(
                api::<Pod>(&client, namespace),
                watcher::Config::default(),
                events.clone(),
            ),
        )
        .watch(
            ResourceKind::Service,
            cluster::factory(
                api::<Service>(&client, namespace),
                watcher::Config::default(),
                events.clone(),
            ),
        )
        .watch(
            ResourceKind::Endpoint,
            cluster::factory(
                api::<Endpoints>(&client, namespace),
                watcher::Config::default(),
                events,
            ),
        )
        .task("processor", process(queue));

    let shutdown = supervisor.shutdown();
    tokio::spawn(async move {
        match termination().await {
            Ok(()) => {
                log::info!("termination signal received");
                shutdown.trigger();
            }
            Err(err) => log::warn!("cannot listen for termination signals: {err}"),
        }
    });

    supervisor.run().await?;
    Ok(())
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: WatchedResource + Resource<Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Stand-in for the network processor: logs every change it receives.
async fn process(mut queue: mpsc::Receiver<ClusterEvent>) {
    while let Some(event) = queue.recv().await {
        log::info!("{}", event.describe());
    }
}

async fn termination() -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
