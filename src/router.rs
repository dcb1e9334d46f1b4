//! Message Router
//!
//! Decides who receives an inbound message and what they receive.
//! The Router is the only extension point for delivery semantics:
//! a new policy implements `RoutingPolicy` and nothing else changes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::error::ConfigError;
use crate::message::{Envelope, Message};
use crate::registry::Registry;
use crate::types::ConnectionId;

/// Result of routing one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destinations, in delivery order
    pub targets: Vec<ConnectionId>,
    /// Text written to every destination
    pub payload: String,
}

/// A delivery policy
pub trait RoutingPolicy: Send + Sync + fmt::Debug {
    /// Compute destinations and payload for `message`
    fn route(&self, message: &Message, registry: &Registry) -> Delivery;
}

/// Replies to the origin only
#[derive(Debug, Clone)]
pub struct EchoPolicy {
    pub prefix: String,
}

impl RoutingPolicy for EchoPolicy {
    fn route(&self, message: &Message, _registry: &Registry) -> Delivery {
        Delivery {
            targets: vec![message.origin],
            payload: format!("{}{}", self.prefix, message.text),
        }
    }
}

/// Sends to every registered connection
#[derive(Debug, Clone, Default)]
pub struct BroadcastPolicy {
    /// Skip the sender itself
    pub exclude_origin: bool,
}

impl RoutingPolicy for BroadcastPolicy {
    fn route(&self, message: &Message, registry: &Registry) -> Delivery {
        let mut targets = registry.list_all();
        targets.sort_unstable();
        if self.exclude_origin {
            targets.retain(|id| *id != message.origin);
        }
        Delivery {
            targets,
            payload: format!("{}: {}", message.origin, message.text),
        }
    }
}

/// Sends to the ids named in a JSON envelope
#[derive(Debug, Clone, Default)]
pub struct TargetedPolicy;

impl RoutingPolicy for TargetedPolicy {
    fn route(&self, message: &Message, _registry: &Registry) -> Delivery {
        match Envelope::parse(&message.text) {
            Ok(envelope) => {
                let mut targets: Vec<ConnectionId> = Vec::with_capacity(envelope.to.len());
                for id in envelope.to {
                    if !targets.contains(&id) {
                        targets.push(id);
                    }
                }
                Delivery {
                    targets,
                    payload: format!("{}: {}", message.origin, envelope.text),
                }
            }
            Err(e) => {
                warn!("Invalid envelope from {}: {}", message.origin, e);
                Delivery {
                    targets: Vec::new(),
                    payload: String::new(),
                }
            }
        }
    }
}

/// Built-in policy names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Echo,
    Broadcast,
    Targeted,
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "echo" => Ok(PolicyKind::Echo),
            "broadcast" => Ok(PolicyKind::Broadcast),
            "targeted" => Ok(PolicyKind::Targeted),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Shared router used by every session
#[derive(Debug, Clone)]
pub struct Router {
    policy: Arc<dyn RoutingPolicy>,
}

impl Router {
    /// Wrap any policy, built-in or not
    pub fn new(policy: impl RoutingPolicy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Build a built-in policy by name
    ///
    /// This is the only place `UnknownPolicy` can surface, so a bad name
    /// stops startup instead of failing mid-stream.
    pub fn from_name(
        name: &str,
        echo_prefix: &str,
        broadcast_exclude_origin: bool,
    ) -> Result<Self, ConfigError> {
        let router = match name.parse::<PolicyKind>()? {
            PolicyKind::Echo => Self::new(EchoPolicy {
                prefix: echo_prefix.to_string(),
            }),
            PolicyKind::Broadcast => Self::new(BroadcastPolicy {
                exclude_origin: broadcast_exclude_origin,
            }),
            PolicyKind::Targeted => Self::new(TargetedPolicy),
        };
        Ok(router)
    }

    /// Route one message
    pub fn route(&self, message: &Message, registry: &Registry) -> Delivery {
        self.policy.route(message, registry)
    }
}
