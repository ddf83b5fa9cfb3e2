//! Per-family outcomes of redirect operations

use std::fmt;

use crate::error::HopNatError;
use crate::types::AddressFamily;

/// Why a family was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Controller binary is not installed
    ControllerUnavailable,
    /// IPv6 NAT probe failed
    Ipv6NatUnsupported,
    /// IPv6 handling turned off in configuration
    Disabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ControllerUnavailable => "controller not installed",
            SkipReason::Ipv6NatUnsupported => "IPv6 NAT not supported",
            SkipReason::Disabled => "disabled in configuration",
        }
    }
}

/// What an ensure operation did to the live rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyOutcome {
    Inserted,
    AlreadyPresent,
    Removed { count: u32 },
    AlreadyAbsent,
    Skipped(SkipReason),
}

impl FamilyOutcome {
    /// Returns true if the live rule set was mutated
    pub fn changed(&self) -> bool {
        matches!(self, FamilyOutcome::Inserted | FamilyOutcome::Removed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FamilyOutcome::Skipped(_))
    }
}

impl fmt::Display for FamilyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FamilyOutcome::Inserted => write!(f, "inserted"),
            FamilyOutcome::AlreadyPresent => write!(f, "already present"),
            FamilyOutcome::Removed { count } => write!(f, "removed {} rule(s)", count),
            FamilyOutcome::AlreadyAbsent => write!(f, "already absent"),
            FamilyOutcome::Skipped(reason) => write!(f, "skipped ({})", reason.as_str()),
        }
    }
}

/// Result of the best-effort persistence step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    /// No backend configured for this host
    NotConfigured,
    /// Family was skipped, nothing to save
    NotAttempted,
    Failed { message: String },
}

/// Outcome of one ensure operation on one family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleChange {
    pub outcome: FamilyOutcome,
    pub persistence: PersistOutcome,
}

impl RuleChange {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            outcome: FamilyOutcome::Skipped(reason),
            persistence: PersistOutcome::NotAttempted,
        }
    }
}

/// One family's entry in a [`RedirectReport`]
#[derive(Debug)]
pub struct FamilyReport {
    pub family: AddressFamily,
    pub result: Result<RuleChange, HopNatError>,
}

/// Independent per-family results of a multi-family operation
///
/// A hard failure in one family never hides the other family's result.
#[derive(Debug, Default)]
pub struct RedirectReport {
    entries: Vec<FamilyReport>,
}

impl RedirectReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, family: AddressFamily, result: Result<RuleChange, HopNatError>) {
        self.entries.push(FamilyReport { family, result });
    }

    pub fn entries(&self) -> &[FamilyReport] {
        &self.entries
    }

    /// Result for one family, if it was requested
    pub fn get(&self, family: AddressFamily) -> Option<&Result<RuleChange, HopNatError>> {
        self.entries
            .iter()
            .find(|e| e.family == family)
            .map(|e| &e.result)
    }

    /// Outcome for one family when it did not fail
    pub fn outcome(&self, family: AddressFamily) -> Option<FamilyOutcome> {
        match self.get(family) {
            Some(Ok(change)) => Some(change.outcome),
            _ => None,
        }
    }

    /// True when no requested family failed hard; skipped families count as success
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }

    /// Families that failed hard, with their errors
    pub fn failures(&self) -> impl Iterator<Item = (AddressFamily, &HopNatError)> {
        self.entries
            .iter()
            .filter_map(|e| e.result.as_ref().err().map(|err| (e.family, err)))
    }

    /// Advisory messages for soft conditions (skips, failed persistence)
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for entry in &self.entries {
            let Ok(change) = &entry.result else {
                continue;
            };
            if let FamilyOutcome::Skipped(reason) = change.outcome {
                warnings.push(format!("{} skipped: {}", entry.family, reason.as_str()));
            }
            if let PersistOutcome::Failed { message } = &change.persistence {
                let err = HopNatError::PersistenceFailed {
                    family: entry.family,
                    message: message.clone(),
                };
                warnings.push(err.to_string());
            }
        }
        warnings
    }
}
