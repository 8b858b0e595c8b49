//! Per-node outcomes of batch operations.
//!
//! Batch operations never stop at the first failing node; every outcome is
//! collected here instead.

use crate::error::SimError;
use std::fmt;
use tracing::{error, info};

/// Which step of a node's lifecycle an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Network interface and data directory setup.
    Provision,
    /// Agent process launch.
    Start,
    /// Agent process shutdown.
    Stop,
    /// Network interface and data directory removal.
    Release,
    /// Registry snapshot write.
    Export,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Provision => write!(f, "provision"),
            Phase::Start => write!(f, "start"),
            Phase::Stop => write!(f, "stop"),
            Phase::Release => write!(f, "release"),
            Phase::Export => write!(f, "export"),
        }
    }
}

/// Result of one phase for one node.
#[derive(Debug)]
pub struct NodeOutcome {
    /// Node name (or snapshot path for [`Phase::Export`]).
    pub node: String,
    /// Lifecycle phase.
    pub phase: Phase,
    /// What happened.
    pub result: Result<(), SimError>,
}

impl NodeOutcome {
    /// Create an outcome.
    pub fn new(node: impl Into<String>, phase: Phase, result: Result<(), SimError>) -> Self {
        Self {
            node: node.into(),
            phase,
            result,
        }
    }

    /// Whether this phase succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Ordered collection of outcomes from a batch operation.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<NodeOutcome>,
}

impl BatchReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome, logging failures as they arrive.
    pub fn record(&mut self, outcome: NodeOutcome) {
        if let Err(e) = &outcome.result {
            error!(node = %outcome.node, phase = %outcome.phase, error = %e, "Node operation failed");
        }
        self.outcomes.push(outcome);
    }

    /// Append every outcome of another report.
    pub fn extend(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
    }

    /// All outcomes, in the order they were recorded.
    pub fn outcomes(&self) -> &[NodeOutcome] {
        &self.outcomes
    }

    /// Failed outcomes only.
    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// Whether every recorded phase succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(NodeOutcome::is_ok)
    }

    /// Outcome of `phase` for `node`, if recorded.
    pub fn find(&self, node: &str, phase: Phase) -> Option<&NodeOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.node == node && o.phase == phase)
    }

    /// Log a one-line summary for `operation`.
    pub fn log_summary(&self, operation: &str) {
        let failed = self.failures().count();
        if failed == 0 {
            info!(operation, steps = self.outcomes.len(), "All node operations succeeded");
        } else {
            error!(
                operation,
                steps = self.outcomes.len(),
                failed,
                "Some node operations failed"
            );
        }
    }
}
