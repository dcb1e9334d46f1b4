//! Basic type definitions for the relay server
//!
//! Provides the `ConnectionId` newtype used as the Registry key.

use serde::{Deserialize, Serialize};

/// Unique connection identifier (newtype pattern)
///
/// Issued by the `Registry` from a monotonic counter, so an identifier
/// is never handed out twice during the process lifetime.
/// Serializes as a plain JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
