//! Verification helpers for testing the redirect manager
//!
//! Provides assertion helpers over the fake chain state and the executed commands

use thiserror::Error;

use crate::fake::{Family, FakeNetfilter};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected {expected} copies of '{spec}' in {family:?} PREROUTING, found {actual}")]
    RuleCountMismatch {
        family: Family,
        spec: String,
        expected: usize,
        actual: usize,
    },

    #[error("{family:?} PREROUTING changed: expected {expected:?}, got {actual:?}")]
    ChainMismatch {
        family: Family,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Expected {expected} '{action}' commands, found {actual}: {commands:?}")]
    CommandCountMismatch {
        action: String,
        expected: usize,
        actual: usize,
        commands: Vec<String>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Snapshot of both fake chains, for before/after comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSnapshot {
    v4: Vec<String>,
    v6: Vec<String>,
}

impl ChainSnapshot {
    /// Capture the current chains of `fake`
    pub fn take(fake: &FakeNetfilter) -> Self {
        Self {
            v4: fake.rules(Family::V4),
            v6: fake.rules(Family::V6),
        }
    }

    fn family(&self, family: Family) -> &[String] {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }
}

/// Rule-set verifier over a [`FakeNetfilter`]
pub struct RuleVerifier<'a> {
    fake: &'a FakeNetfilter,
}

impl<'a> RuleVerifier<'a> {
    /// Create a new verifier
    pub fn new(fake: &'a FakeNetfilter) -> Self {
        Self { fake }
    }

    /// Verify how many copies of `spec` are installed
    pub fn assert_rule_count(
        &self,
        family: Family,
        spec: &str,
        expected: usize,
    ) -> VerifyResult<()> {
        let actual = self.fake.rule_count(family, spec);
        if actual != expected {
            return Err(VerificationError::RuleCountMismatch {
                family,
                spec: spec.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that both chains equal an earlier snapshot
    pub fn assert_unchanged_since(&self, snapshot: &ChainSnapshot) -> VerifyResult<()> {
        let now = ChainSnapshot::take(self.fake);
        for family in [Family::V4, Family::V6] {
            if now.family(family) != snapshot.family(family) {
                return Err(VerificationError::ChainMismatch {
                    family,
                    expected: snapshot.family(family).to_vec(),
                    actual: now.family(family).to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Verify how many controller commands used `action`
    pub fn assert_action_count(&self, action: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.fake.action_count(action);
        if actual != expected {
            return Err(VerificationError::CommandCountMismatch {
                action: action.to_string(),
                expected,
                actual,
                commands: self.fake.commands(),
            });
        }
        Ok(())
    }
}
