use std::{env, path::PathBuf, process};

use crate::RetryPolicy;

/// Directory for the control socket when no explicit path is configured.
const RUNDIR_ENV: &str = "KUBE_WATCH_RUNDIR";
const DEFAULT_RUNDIR: &str = "/var/run";

/// Parameters for [`Supervisor`](crate::Supervisor).
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Unix socket path of the control channel.
    pub control_path: PathBuf,
    /// Retry rules for runners registered with [`Supervisor::watch`](crate::Supervisor::watch).
    pub retry: RetryPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            control_path: default_control_path(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn with_control_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_path = path.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// `$KUBE_WATCH_RUNDIR/<crate>.<pid>.ctl`, falling back to `/var/run`.
pub fn default_control_path() -> PathBuf {
    let rundir = env::var_os(RUNDIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RUNDIR));
    rundir.join(format!("{}.{}.ctl", env!("CARGO_PKG_NAME"), process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_path_is_per_process() {
        let path = default_control_path();
        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some(format!("kube-watch-supervisor.{}.ctl", process::id()).as_str())
        );
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = SupervisorConfig::default()
            .with_control_path("/tmp/watch.ctl")
            .with_retry(RetryPolicy::fail_fast());
        assert_eq!(config.control_path, PathBuf::from("/tmp/watch.ctl"));
        assert_eq!(config.retry, RetryPolicy::fail_fast());
    }
}
