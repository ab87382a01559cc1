//! Watchers over the Kubernetes API for the supervised resource kinds.
//!
//! Each [`ResourceWatcher`] wraps one `kube_runtime` watch stream and forwards every event
//! into a channel as a [`ClusterEvent`], where the network processor consumes it.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube_core::Resource;
use kube_runtime::watcher;
use serde::de::DeserializeOwned;

use crate::ResourceKind;

/// Uniquely identifies an object of a known type by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// The object namespace, if any
    pub namespace: Option<String>,
    /// The object name
    pub name: String,
}

impl QualifiedName {
    pub fn from_resource<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.meta().namespace.clone(),
            name: resource.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One change observed on a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    /// The object was created or modified.
    Applied(K),
    /// The object was deleted.
    Deleted(K),
    /// The stream was (re)listed; this is the full current set.
    Restarted(Vec<K>),
}

impl<K> From<watcher::Event<K>> for Change<K> {
    fn from(event: watcher::Event<K>) -> Self {
        match event {
            watcher::Event::Applied(object) => Self::Applied(object),
            watcher::Event::Deleted(object) => Self::Deleted(object),
            watcher::Event::Restarted(objects) => Self::Restarted(objects),
        }
    }
}

impl<K: Resource> Change<K> {
    /// Short description for logs, e.g. `applied default/web`.
    pub fn describe(&self) -> String {
        match self {
            Self::Applied(object) => format!("applied {}", QualifiedName::from_resource(object)),
            Self::Deleted(object) => format!("deleted {}", QualifiedName::from_resource(object)),
            Self::Restarted(objects) => format!("restarted with {} objects", objects.len()),
        }
    }
}

/// A change to any of the supervised resource kinds, as delivered to the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    Pod(Change<Pod>),
    Service(Change<Service>),
    Endpoints(Change<Endpoints>),
}

impl ClusterEvent {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Pod(_) => ResourceKind::Pod,
            Self::Service(_) => ResourceKind::Service,
            Self::Endpoints(_) => ResourceKind::Endpoint,
        }
    }

    pub fn describe(&self) -> String {
        let change = match self {
            Self::Pod(change) => change.describe(),
            Self::Service(change) => change.describe(),
            Self::Endpoints(change) => change.describe(),
        };
        format!("{} {change}", self.kind())
    }
}

/// A Kubernetes object type that can be supervised.
pub trait WatchedResource:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    const KIND: ResourceKind;

    fn into_event(change: Change<Self>) -> ClusterEvent;
}

impl WatchedResource for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn into_event(change: Change<Self>) -> ClusterEvent {
        ClusterEvent::Pod(change)
    }
}

impl WatchedResource for Service {
    const KIND: ResourceKind = ResourceKind::Service;

    fn into_event(change: Change<Self>) -> ClusterEvent {
        ClusterEvent::Service(change)
    }
}

impl WatchedResource for Endpoints {
    const KIND: ResourceKind = ResourceKind::Endpoint;

    fn into_event(change: Change<Self>) -> ClusterEvent {
        ClusterEvent::Endpoints(change)
    }
}

pub mod objects;
pub use objects::{factory, ResourceWatcher, StreamError};
