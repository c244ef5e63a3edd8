//! Target resolution rules.
//!
//! A pure function of (config, detection snapshot) with no state and no
//! I/O, so the routing policy is unit-testable in isolation and
//! deterministic by construction.

use crate::config::RoutingConfig;
use crate::detector::DetectionSnapshot;
use crate::error::{BridgeError, Result};
use crate::target::Target;
use serde::Serialize;
use std::fmt;

/// Why a resolution chose its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionReason {
    /// The explicitly configured target was reachable.
    Configured,
    /// Automatic selection picked the first reachable target in order.
    Auto,
    /// The configured target was unreachable and a fallback took over.
    Fallback,
}

impl fmt::Display for ResolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionReason::Configured => write!(f, "configured"),
            ResolutionReason::Auto => write!(f, "auto"),
            ResolutionReason::Fallback => write!(f, "fallback"),
        }
    }
}

/// One resolution outcome. Transient; recomputed per cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub target: Target,
    pub reason: ResolutionReason,
    /// Remaining candidates, in priority order, that were not chosen.
    pub alternatives: Vec<Target>,
}

/// Decide which target to route to.
///
/// Rules, in order:
/// 1. an explicit, reachable configured target wins (`configured`);
/// 2. an explicit but unreachable target falls back, if enabled, to the
///    first reachable entry of `fallback.order`, excluding itself
///    (`fallback`);
/// 3. `auto` picks the first reachable entry of `fallback.order` (`auto`);
/// 4. otherwise there is no available target.
///
/// The order is a strict priority list: ties break by position, never
/// randomly, and explicit configuration always beats automatic selection
/// when it is reachable.
pub fn decide(config: &RoutingConfig, detection: &DetectionSnapshot) -> Result<ResolutionResult> {
    match config.target.explicit() {
        Some(configured) => {
            if detection.get(configured).ipc_connectable {
                return Ok(ResolutionResult {
                    target: configured,
                    reason: ResolutionReason::Configured,
                    alternatives: Vec::new(),
                });
            }

            if config.fallback.enabled {
                let alternative = config
                    .fallback
                    .order
                    .iter()
                    .filter(|t| **t != configured)
                    .find(|t| detection.get(**t).ipc_connectable);
                if let Some(target) = alternative {
                    return Ok(ResolutionResult {
                        target: *target,
                        reason: ResolutionReason::Fallback,
                        alternatives: Vec::new(),
                    });
                }
            }

            Err(BridgeError::NoAvailableTarget {
                configured: Some(configured),
            })
        }
        None => {
            for (i, target) in config.fallback.order.iter().enumerate() {
                if detection.get(*target).ipc_connectable {
                    return Ok(ResolutionResult {
                        target: *target,
                        reason: ResolutionReason::Auto,
                        alternatives: config
                            .fallback
                            .order
                            .iter()
                            .enumerate()
                            .filter(|(j, _)| *j != i)
                            .map(|(_, t)| *t)
                            .collect(),
                    });
                }
            }

            Err(BridgeError::NoAvailableTarget { configured: None })
        }
    }
}

/// Whether a single target is usable under a snapshot.
pub fn is_available(target: Target, detection: &DetectionSnapshot) -> bool {
    detection.get(target).ipc_connectable
}

/// Every usable target under a snapshot, in declaration order.
pub fn available_targets(detection: &DetectionSnapshot) -> Vec<Target> {
    Target::ALL
        .into_iter()
        .filter(|t| detection.get(*t).ipc_connectable)
        .collect()
}
