pub use crate::error::Error;
pub use burn::config::Config;

use serde::{Deserialize, Serialize};

/// How new ownership boundaries are chosen when rebalancing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RedistributionAssignment {
    /// Ownership is never rebalanced.
    Disabled,

    /// Equalize the owned-gaussian count per worker.
    ByCount,

    /// Balance the cumulative send-count telemetry per worker.
    BySendCost,
}

#[derive(Config, Debug, PartialEq)]
pub struct RedistributorConfig {
    #[config(default = "RedistributionAssignment::Disabled")]
    pub assignment: RedistributionAssignment,

    /// Rebalance every this many refinement passes.
    #[config(default = "1")]
    pub frequency: u64,
}

impl RedistributorConfig {
    pub fn check(&self) -> Result<&Self, Error> {
        if self.frequency == 0 {
            return Err(Error::InvalidRedistributionFrequency(self.frequency));
        }
        Ok(self)
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.assignment != RedistributionAssignment::Disabled
    }
}

impl Default for RedistributorConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn check() {
        use super::*;

        RedistributorConfig::default().check().unwrap();
        RedistributorConfig::new()
            .with_frequency(0)
            .check()
            .unwrap_err();
    }

    #[test]
    fn is_enabled() {
        use super::*;

        assert!(!RedistributorConfig::default().is_enabled());
        assert!(RedistributorConfig::new()
            .with_assignment(RedistributionAssignment::ByCount)
            .is_enabled());
    }
}
