// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection policy + runtime controller for node allocation

use crate::FsError;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Operations that can be made to fail on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    /// Node Store allocation (directories and counter files alike).
    AllocateNode,
}

/// Individual rule describing which op should fail and how often.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    /// Optional number of leading invocations to skip before injecting faults.
    #[serde(default)]
    pub start_after: u64,
    /// Optional maximum number of injected failures for this rule.
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl Default for FaultRule {
    fn default() -> Self {
        Self {
            op: FaultOp::AllocateNode,
            start_after: 0,
            max_faults: None,
        }
    }
}

/// Serializable policy, embeddable in `FsConfig` or loaded from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FaultPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<FaultRule>,
}

impl FaultPolicy {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Fail every allocation after the first `start_after` ones.
    pub fn fail_allocations_after(start_after: u64) -> Self {
        Self {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::AllocateNode,
                start_after,
                max_faults: None,
            }],
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct RuleCounters {
    invocations: u64,
    hits: u64,
}

#[derive(Debug, Default)]
struct FaultState {
    policy: FaultPolicy,
    counters: Vec<RuleCounters>,
}

/// Runtime evaluator for a [`FaultPolicy`].
#[derive(Debug, Default)]
pub struct FaultInjector {
    state: Mutex<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: FaultPolicy) -> Self {
        let injector = Self::new();
        injector.set_policy(policy);
        injector
    }

    pub fn set_policy(&self, policy: FaultPolicy) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.counters = vec![RuleCounters::default(); policy.rules.len()];
        guard.policy = policy;
    }

    pub fn should_fault(&self, op: FaultOp) -> Option<FsError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.policy.enabled {
            return None;
        }
        let state = &mut *guard;
        for (rule, counters) in state.policy.rules.iter().zip(state.counters.iter_mut()) {
            if rule.op != op {
                continue;
            }
            counters.invocations = counters.invocations.saturating_add(1);
            if counters.invocations <= rule.start_after {
                continue;
            }
            if let Some(max) = rule.max_faults {
                if counters.hits >= max {
                    continue;
                }
            }
            counters.hits = counters.hits.saturating_add(1);
            return Some(FsError::OutOfResources);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fault_policy_json() {
        let json =
            br#"{ "enabled": true, "rules": [ { "op": "allocate_node", "max_faults": 2 } ] }"#;
        let policy = FaultPolicy::from_json_bytes(json).expect("policy");
        assert!(policy.enabled);
        assert_eq!(policy.rules.len(), 1);
        assert_eq!(policy.rules[0].start_after, 0);
        assert_eq!(policy.rules[0].max_faults, Some(2));
    }

    #[test]
    fn injector_respects_start_and_max_hits() {
        let injector = FaultInjector::new();
        injector.set_policy(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::AllocateNode,
                start_after: 1,
                max_faults: Some(2),
            }],
        });

        // First call skipped due to start_after
        assert!(injector.should_fault(FaultOp::AllocateNode).is_none());
        // Next two fail
        assert_eq!(
            injector.should_fault(FaultOp::AllocateNode),
            Some(FsError::OutOfResources)
        );
        assert!(injector.should_fault(FaultOp::AllocateNode).is_some());
        // Max hits reached
        assert!(injector.should_fault(FaultOp::AllocateNode).is_none());
    }

    #[test]
    fn disabled_policy_never_faults() {
        let injector = FaultInjector::with_policy(FaultPolicy {
            enabled: false,
            ..FaultPolicy::fail_allocations_after(0)
        });
        assert!(injector.should_fault(FaultOp::AllocateNode).is_none());

        injector.set_policy(FaultPolicy::fail_allocations_after(0));
        assert!(injector.should_fault(FaultOp::AllocateNode).is_some());
        injector.set_policy(FaultPolicy::default());
        assert!(injector.should_fault(FaultOp::AllocateNode).is_none());
    }
}
