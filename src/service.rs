//! Collaborator boundary for resolving reactive artifacts.
//!
//! The engine core does not bind, optimize, or persist query expressions;
//! it hands captured definitions to a [`ReactiveService`] and works with the
//! URIs it gets back. Every call is treated as a fallible remote operation.

use crate::error::{EngineError, Result};
use crate::subscription::Subscription;
use crate::types::{Observer, Uri};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An opaque captured observable definition.
///
/// The expression codec that produces these bytes lives outside the core;
/// here they are only carried and handed back to the service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservableDefinition(Vec<u8>);

impl ObservableDefinition {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ObservableDefinition(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ObservableDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObservableDefinition({} bytes)", self.0.len())
    }
}

/// Service used by bridges to materialize and tear down their upstream
/// dependencies. Implemented by the hosting environment.
pub trait ReactiveService<T>: Send + Sync {
    /// Materialize an observable from a captured definition, returning its
    /// identifier. Used by v1-era bridges, which persist the identifier.
    fn materialize_observable(&self, definition: &ObservableDefinition) -> Result<Uri>;

    /// Subscribe an observer to a previously materialized observable,
    /// returning the subscription identifier.
    fn subscribe_observable(
        &self,
        observable: &Uri,
        observer: Arc<dyn Observer<T>>,
    ) -> Result<Uri>;

    /// Resolve a definition and subscribe in one step, without creating a
    /// separately addressable observable artifact. Used by v2 bridges.
    fn subscribe_definition(
        &self,
        definition: &ObservableDefinition,
        observer: Arc<dyn Observer<T>>,
    ) -> Result<Uri>;

    /// Fetch an observer by identifier.
    fn observer(&self, uri: &Uri) -> Result<Arc<dyn Observer<T>>>;

    /// Dispose a previously created subscription.
    fn dispose_subscription(&self, uri: &Uri) -> Result<()>;

    /// Undefine a previously materialized observable.
    fn undefine_observable(&self, uri: &Uri) -> Result<()>;

    /// Bind a subscription-typed artifact by identifier.
    ///
    /// Unsupported by design for now; callers can distinguish this from a
    /// genuine fault by the error variant.
    fn bind_subscription(&self, _uri: &Uri) -> Result<Arc<dyn Subscription>> {
        Err(EngineError::NotImplemented(
            "binding a subscription-typed artifact",
        ))
    }
}
