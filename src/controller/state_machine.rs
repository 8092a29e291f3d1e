//! Transition table for the reason of the Ready condition
//!
//! Any reason may replace any other, except that an in-progress Provisioning
//! and an in-progress Updating do not overwrite each other. Without that rule
//! a tenant would flap between the two while namespaces are created one per
//! pass during an update.

use std::fmt;
use std::str::FromStr;

/// Reasons carried by the Ready condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyReason {
    Provisioning,
    Provisioned,
    Updating,
    UpdateFailed,
    Terminating,
    TerminatingFailed,
    UnableToProvision,
    UnableToProvisionNamespace,
    UnableToProvisionClusterResources,
}

impl ReadyReason {
    pub const ALL: [ReadyReason; 9] = [
        ReadyReason::Provisioning,
        ReadyReason::Provisioned,
        ReadyReason::Updating,
        ReadyReason::UpdateFailed,
        ReadyReason::Terminating,
        ReadyReason::TerminatingFailed,
        ReadyReason::UnableToProvision,
        ReadyReason::UnableToProvisionNamespace,
        ReadyReason::UnableToProvisionClusterResources,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReadyReason::Provisioning => "Provisioning",
            ReadyReason::Provisioned => "Provisioned",
            ReadyReason::Updating => "Updating",
            ReadyReason::UpdateFailed => "UpdateFailed",
            ReadyReason::Terminating => "Terminating",
            ReadyReason::TerminatingFailed => "TerminatingFailed",
            ReadyReason::UnableToProvision => "UnableToProvision",
            ReadyReason::UnableToProvisionNamespace => "UnableToProvisionNamespace",
            ReadyReason::UnableToProvisionClusterResources => {
                "UnableToProvisionClusterResources"
            }
        }
    }

    /// Status value of the Ready condition for this reason
    pub fn is_ready(self) -> bool {
        self == ReadyReason::Provisioned
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ReadyReason::UpdateFailed
                | ReadyReason::TerminatingFailed
                | ReadyReason::UnableToProvision
                | ReadyReason::UnableToProvisionNamespace
                | ReadyReason::UnableToProvisionClusterResources
        )
    }
}

impl fmt::Display for ReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadyReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReadyReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown Ready reason '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,
    Suppress,
}

/// One rule of the table
#[derive(Debug)]
pub struct Transition {
    pub current: ReadyReason,
    pub requested: ReadyReason,
    pub verdict: Verdict,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        current: ReadyReason,
        requested: ReadyReason,
        verdict: Verdict,
        description: &'static str,
    ) -> Self {
        Self {
            current,
            requested,
            verdict,
            description,
        }
    }
}

/// Result of evaluating a requested reason against the current one
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Apply {
        from: Option<ReadyReason>,
        to: ReadyReason,
    },
    Suppressed {
        current: ReadyReason,
        requested: ReadyReason,
        description: &'static str,
    },
}

impl TransitionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionResult::Apply { .. })
    }
}

/// Table of `(current, requested) -> verdict` rules. Pairs without a rule apply.
pub struct ReadyTransitions {
    transitions: Vec<Transition>,
}

impl Default for ReadyTransitions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyTransitions {
    pub fn new() -> Self {
        Self {
            transitions: vec![
                Transition::new(
                    ReadyReason::Updating,
                    ReadyReason::Provisioning,
                    Verdict::Suppress,
                    "an update is in progress, stay in Updating",
                ),
                Transition::new(
                    ReadyReason::Provisioning,
                    ReadyReason::Updating,
                    Verdict::Suppress,
                    "provisioning is in progress, stay in Provisioning",
                ),
            ],
        }
    }

    pub fn rule(&self, current: ReadyReason, requested: ReadyReason) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.current == current && t.requested == requested)
    }

    /// Decide whether `requested` may replace `current` (`None` when no condition exists)
    pub fn evaluate(
        &self,
        current: Option<ReadyReason>,
        requested: ReadyReason,
    ) -> TransitionResult {
        if let Some(current) = current
            && let Some(rule) = self.rule(current, requested)
            && rule.verdict == Verdict::Suppress
        {
            return TransitionResult::Suppressed {
                current,
                requested,
                description: rule.description,
            };
        }
        TransitionResult::Apply {
            from: current,
            to: requested,
        }
    }
}
