//! Persisted bridge state record.

use crate::error::{EngineError, Result};
use crate::types::{SequenceId, Uri};
use serde::{Deserialize, Serialize};

/// Which checkpoint layout a bridge writes and which upstream-binding path
/// it takes on start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeVersion {
    /// Materializes a separately addressable upstream observable and
    /// persists its identifier alongside the subscription id.
    V1,
    /// Resolves the upstream definition inline on subscribe; no observable
    /// identifier is materialized or persisted.
    V2,
}

/// The bridge's persisted fields.
///
/// v1 records carry the upstream observable id; v2 records omit it. A bridge
/// holding a materialized observable writes the v1 layout so a recovered
/// bridge can still tear the observable down; all other saves are v2.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BridgeState {
    pub version: u8,
    pub upstream_subscription: Option<Uri>,
    pub upstream_observable: Option<Uri>,
    pub completion_notified: bool,
    pub low_watermark: SequenceId,
}

impl BridgeState {
    pub fn validate(&self) -> Result<()> {
        match self.version {
            1 | 2 => Ok(()),
            other => Err(EngineError::InvalidFormat(format!(
                "unsupported bridge state version: {}",
                other
            ))),
        }
    }
}
