//! The narrow interface the runners drive: a watcher with one blocking step,
//! and a factory that opens a fresh one.

use std::{error::Error as StdError, fmt, future::Future};

use crate::ResourceKind;

/// Type-erased error returned by a [`WatcherFactory`].
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// One live consumer of a watch stream.
pub trait Watcher: Send + 'static {
    /// Any failure while consuming the stream, e.g. connection loss or a closed stream.
    type Error: fmt::Display + Send;

    /// Consumes one unit of the stream (one event or one batch).
    ///
    /// Waits until data is available. The watcher is responsible for advancing its own stream.
    fn step(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Builds a new [`Watcher`] bound to a newly opened stream.
///
/// Implemented for every `FnMut() -> impl Future<Output = Result<W, E>>` closure.
pub trait WatcherFactory: Send + 'static {
    type Watcher: Watcher;
    type Error: Into<BoxError>;

    fn create(&mut self) -> impl Future<Output = Result<Self::Watcher, Self::Error>> + Send;
}

impl<F, Fut, W, E> WatcherFactory for F
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<W, E>> + Send,
    W: Watcher,
    E: Into<BoxError>,
{
    type Watcher = W;
    type Error = E;

    fn create(&mut self) -> impl Future<Output = Result<W, E>> + Send {
        self()
    }
}

/// Owned handle to the live watcher of one resource kind.
///
/// Holds the factory the watcher came from, so that a replacement is built with the same recipe.
pub struct WatcherHandle<F: WatcherFactory> {
    pub(crate) kind: ResourceKind,
    pub(crate) watcher: F::Watcher,
    pub(crate) factory: F,
    pub(crate) generation: u64,
}

impl<F: WatcherFactory> WatcherHandle<F> {
    /// Wraps a watcher that was built by `factory`.
    pub fn new(kind: ResourceKind, watcher: F::Watcher, factory: F) -> Self {
        Self {
            kind,
            watcher,
            factory,
            generation: 1,
        }
    }
}

impl<F: WatcherFactory> fmt::Debug for WatcherHandle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
