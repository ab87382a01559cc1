//! kube-watch-supervisor keeps a set of Kubernetes watch loops alive for as long as the process runs,
//! e.g. the pod, service and endpoint watchers feeding a network-configuration processor.
//!
//! Each resource kind is driven by a [`RecyclingRunner`]:
//! whenever a step of its [`Watcher`] fails, the watcher is discarded
//! and a fresh one, with a freshly opened stream, is built by the kind's [`WatcherFactory`].
//! The [`Supervisor`] runs these runners next to a Unix socket [control channel](control)
//! and arbitrary processing tasks, until the `exit` command fires the [`Shutdown`] signal.

mod config;
pub use config::{default_control_path, SupervisorConfig};
mod health;
pub use health::{Health, WatcherHealth, WatcherState};
mod kind;
pub use kind::{ResourceKind, UnknownKind};
mod policy;
pub use policy::{BackoffPolicy, RetryPolicy};
mod runner;
pub use runner::{RecycleError, RecyclingRunner};
mod shutdown;
pub use shutdown::Shutdown;
mod supervisor;
pub use supervisor::{Phase, SuperviseError, Supervisor};
mod watcher;
pub use watcher::{BoxError, Watcher, WatcherFactory, WatcherHandle};

pub mod cluster;
pub mod control;

#[cfg(test)]
mod tests;
