use std::{convert::Infallible, future};

use futures::{stream::BoxStream, Stream, StreamExt};
use kube_client::Api;
use kube_runtime::watcher;
use tokio::sync::mpsc;

use super::{ClusterEvent, WatchedResource};
use crate::{Watcher, WatcherFactory};

/// Consumes the watch stream of one object type, one event per step.
pub struct ResourceWatcher<K> {
    stream: BoxStream<'static, watcher::Result<watcher::Event<K>>>,
    sink: mpsc::Sender<ClusterEvent>,
}

impl<K: WatchedResource> ResourceWatcher<K> {
    /// Opens a new watch on `api`.
    ///
    /// The stream connects lazily, so connection errors surface from the first step.
    pub fn open(api: Api<K>, config: watcher::Config, sink: mpsc::Sender<ClusterEvent>) -> Self {
        Self::from_stream(watcher(api, config), sink)
    }

    pub fn from_stream(
        stream: impl Stream<Item = watcher::Result<watcher::Event<K>>> + Send + 'static,
        sink: mpsc::Sender<ClusterEvent>,
    ) -> Self {
        Self {
            stream: stream.boxed(),
            sink,
        }
    }
}

impl<K: WatchedResource> Watcher for ResourceWatcher<K> {
    type Error = StreamError;

    async fn step(&mut self) -> Result<(), StreamError> {
        let change = match self.stream.next().await {
            Some(event) => super::Change::from(event?),
            None => return Err(StreamError::Closed),
        };
        log::debug!("{} {}", K::KIND, change.describe());
        self.sink
            .send(K::into_event(change))
            .await
            .map_err(|_| StreamError::ProcessorGone)
    }
}

/// A failed step of a [`ResourceWatcher`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("watch stream ended")]
    Closed,
    #[error("watch failed: {0}")]
    Watch(#[from] watcher::Error),
    #[error("event processor is gone")]
    ProcessorGone,
}

/// Factory opening a fresh [`ResourceWatcher`] on every call.
pub fn factory<K: WatchedResource>(
    api: Api<K>,
    config: watcher::Config,
    sink: mpsc::Sender<ClusterEvent>,
) -> impl WatcherFactory<Watcher = ResourceWatcher<K>> {
    move || {
        future::ready(Ok::<_, Infallible>(ResourceWatcher::open(
            api.clone(),
            config.clone(),
            sink.clone(),
        )))
    }
}
