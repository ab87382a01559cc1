use std::{any, convert::Infallible};

use crate::{
    health::WatcherState,
    watcher::{BoxError, Watcher, WatcherFactory, WatcherHandle},
    Health, ResourceKind, RetryPolicy,
};

/// Drives one watcher forever, replacing it with a fresh one from its factory whenever a step fails.
///
/// Step failures are never classified: any error discards the watcher and the factory is called
/// again right away. Only factory failures are subject to backoff.
#[derive(Debug, Clone, Default)]
pub struct RecyclingRunner {
    policy: RetryPolicy,
    health: Health,
}

impl RecyclingRunner {
    pub fn new(policy: RetryPolicy, health: Health) -> Self {
        Self { policy, health }
    }

    /// Builds the first watcher with `factory`, then [runs](Self::run) it.
    pub async fn start<F: WatcherFactory>(
        &self,
        kind: ResourceKind,
        mut factory: F,
    ) -> Result<Infallible, RecycleError> {
        let watcher = self.create(kind, &mut factory).await?;
        self.run(WatcherHandle::new(kind, watcher, factory)).await
    }

    /// Steps the handle's watcher until the policy forbids another recycle
    /// or the factory cannot produce a replacement.
    ///
    /// With [`RetryPolicy::unbounded`] this only returns if the factory keeps failing.
    pub async fn run<F: WatcherFactory>(
        &self,
        handle: WatcherHandle<F>,
    ) -> Result<Infallible, RecycleError> {
        let WatcherHandle {
            kind,
            mut watcher,
            mut factory,
            mut generation,
        } = handle;
        let mut recycles: u64 = 0;

        self.health.update(kind, |h| {
            h.state = WatcherState::Running;
            h.generation = generation;
        });

        loop {
            let reason = match watcher.step().await {
                Ok(()) => {
                    self.health.update(kind, |h| h.steps += 1);
                    continue;
                }
                Err(err) => err.to_string(),
            };

            log::warn!(
                "{kind} watcher (generation {generation}) failed: {reason}; \
                 reconnecting to the stream via {}",
                any::type_name::<F>()
            );

            if !self.policy.allows_recycle(recycles) {
                let err = RecycleError::RecycleLimit {
                    kind,
                    limit: recycles,
                    last: reason,
                };
                self.fail(kind, &err);
                return Err(err);
            }

            drop(watcher);
            recycles += 1;
            self.health.update(kind, |h| {
                h.state = WatcherState::Recreating { attempt: 1 };
                h.recycles = recycles;
                h.last_error = Some(reason);
            });

            watcher = self.create(kind, &mut factory).await?;
            generation += 1;
            self.health.update(kind, |h| h.generation = generation);

            // a watcher that fails without suspending would otherwise starve the other tasks
            tokio::task::yield_now().await;
        }
    }

    async fn create<F: WatcherFactory>(
        &self,
        kind: ResourceKind,
        factory: &mut F,
    ) -> Result<F::Watcher, RecycleError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                self.health
                    .update(kind, |h| h.state = WatcherState::Recreating { attempt });
            }

            match factory.create().await.map_err(Into::<BoxError>::into) {
                Ok(watcher) => {
                    self.health.update(kind, |h| h.state = WatcherState::Running);
                    return Ok(watcher);
                }
                Err(err) => {
                    if !self.policy.allows_factory_retry(attempt) {
                        let err = RecycleError::Factory {
                            kind,
                            attempts: attempt,
                            source: err,
                        };
                        self.fail(kind, &err);
                        return Err(err);
                    }

                    let delay = self.policy.backoff.next(attempt - 1);
                    log::warn!(
                        "could not create {kind} watcher (attempt {attempt}): {err}; retrying in {delay:?}"
                    );
                    self.health
                        .update(kind, |h| h.last_error = Some(err.to_string()));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn fail(&self, kind: ResourceKind, err: &RecycleError) {
        log::error!("{err}");
        self.health.update(kind, |h| {
            h.state = WatcherState::Failed {
                reason: err.to_string(),
            }
        });
    }
}

/// Why a [`RecyclingRunner`] stopped.
#[derive(Debug, thiserror::Error)]
pub enum RecycleError {
    #[error("{kind} watcher could not be created after {attempts} attempts: {source}")]
    Factory {
        kind: ResourceKind,
        attempts: u32,
        #[source]
        source: BoxError,
    },
    #[error("{kind} watcher failed after reaching the limit of {limit} recycles: {last}")]
    RecycleLimit {
        kind: ResourceKind,
        limit: u64,
        last: String,
    },
}

impl RecycleError {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Factory { kind, .. } | Self::RecycleLimit { kind, .. } => *kind,
        }
    }
}
