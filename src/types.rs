//! Core types for the subscription runtime.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position in a reliable event sequence.
///
/// Sequence ids are assigned by the producing side and advance by exactly one
/// per delivered event. `SequenceId(0)` is the beginning of a sequence.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SequenceId(pub u64);

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceId {
    pub const ZERO: SequenceId = SequenceId(0);

    pub fn next(self) -> Self {
        SequenceId(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(SequenceId(self.0 - 1))
        } else {
            None
        }
    }
}

/// Identity of a reactive artifact (bridge, subject, observable, subscription)
/// in the reactive service's namespace.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Uri(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({})", self.0)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri(s.to_string())
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Uri(s)
    }
}

/// Push-model consumer of an event sequence.
///
/// This is the ordinary (volatile) observer used inside the engine: events
/// carry no sequence ids and delivery is not acknowledged. Reliable sources
/// are adapted to this model by [`crate::reliable::ReliableInput`].
pub trait Observer<T>: Send + Sync {
    /// Deliver the next value.
    fn on_next(&self, value: T);

    /// Terminate the sequence with an error. No further events follow.
    fn on_error(&self, error: Arc<EngineError>);

    /// Terminate the sequence normally. No further events follow.
    fn on_completed(&self);
}

impl<T, O: Observer<T> + ?Sized> Observer<T> for Arc<O> {
    fn on_next(&self, value: T) {
        (**self).on_next(value);
    }

    fn on_error(&self, error: Arc<EngineError>) {
        (**self).on_error(error);
    }

    fn on_completed(&self) {
        (**self).on_completed();
    }
}

/// A materialized observer event, used by buffered and scheduled delivery
/// paths that need to hold events before forwarding them.
#[derive(Clone, Debug)]
pub enum Notification<T> {
    Next(T),
    Error(Arc<EngineError>),
    Completed,
}

impl<T> Notification<T> {
    /// Replay this notification into an observer.
    pub fn accept(self, observer: &dyn Observer<T>) {
        match self {
            Notification::Next(value) => observer.on_next(value),
            Notification::Error(error) => observer.on_error(error),
            Notification::Completed => observer.on_completed(),
        }
    }

    /// Whether this notification terminates the sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }
}
