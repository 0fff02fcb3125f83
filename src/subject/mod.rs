//! Sealable multicast subjects used by higher-order operators.

mod inner;
mod refcount;

pub use inner::{InnerSubject, SubjectSubscription};
pub use refcount::RefCountSubject;
