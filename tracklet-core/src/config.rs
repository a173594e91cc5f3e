//! Fit configuration.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where the fit takes its correction coefficients from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DerivativeMode {
    /// Stored table coefficients for both representations (firmware behavior).
    #[default]
    Table,
    /// Exact floating coefficients, table fixed-point coefficients.
    ExactForFloating,
    /// Coefficients recomputed from the candidate's own geometry.
    Exact,
}

/// Configuration of the derivative table and the track fit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FitConfig {
    /// Bits of disk stereo-angle resolution per 2S disk hit (1..=3).
    pub alpha_bits: u32,
    /// Bits of curvature binning in the derivative table.
    pub rinv_bits: u32,
    /// Coefficient source.
    pub derivative_mode: DerivativeMode,
    /// Collect the hit pattern of every barrel-seeded fit.
    pub record_hit_patterns: bool,
    /// Emit per-stub chi-square comparisons at debug level.
    pub debug_chisq: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            alpha_bits: 2,
            rinv_bits: 3,
            derivative_mode: DerivativeMode::Table,
            record_hit_patterns: false,
            debug_chisq: false,
        }
    }
}

impl FitConfig {
    /// Creates a fit configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stereo-angle resolution.
    pub fn with_alpha_bits(mut self, bits: u32) -> Self {
        self.alpha_bits = bits;
        self
    }

    /// Sets the curvature binning.
    pub fn with_rinv_bits(mut self, bits: u32) -> Self {
        self.rinv_bits = bits;
        self
    }

    /// Sets the coefficient source.
    pub fn with_derivative_mode(mut self, mode: DerivativeMode) -> Self {
        self.derivative_mode = mode;
        self
    }

    /// Enables hit-pattern recording.
    pub fn with_record_hit_patterns(mut self, enabled: bool) -> Self {
        self.record_hit_patterns = enabled;
        self
    }

    /// Enables chi-square debug output.
    pub fn with_debug_chisq(mut self, enabled: bool) -> Self {
        self.debug_chisq = enabled;
        self
    }

    /// Number of curvature bins per alpha combination.
    #[inline]
    pub fn rinv_bins(&self) -> u32 {
        1 << self.rinv_bits
    }

    /// Largest pattern multiplicity the alpha index can address.
    #[inline]
    pub fn max_multiplicity(&self) -> u32 {
        1 << (3 * self.alpha_bits)
    }

    /// Checks that the configuration describes a realizable table.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] for unsupported bit widths.
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.alpha_bits) {
            return Err(Error::ConfigError(format!(
                "alpha_bits must be 1, 2 or 3, got {}",
                self.alpha_bits
            )));
        }
        if !(1..=8).contains(&self.rinv_bits) {
            return Err(Error::ConfigError(format!(
                "rinv_bits must be in 1..=8, got {}",
                self.rinv_bits
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_config() {
        let config = FitConfig::new()
            .with_alpha_bits(3)
            .with_rinv_bits(2)
            .with_derivative_mode(DerivativeMode::Exact)
            .with_record_hit_patterns(true)
            .with_debug_chisq(true);

        assert_eq!(config.alpha_bits, 3);
        assert_eq!(config.rinv_bins(), 4);
        assert_eq!(config.max_multiplicity(), 512);
        assert_eq!(config.derivative_mode, DerivativeMode::Exact);
        assert!(config.record_hit_patterns);
        assert!(config.debug_chisq);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        assert!(FitConfig::new().with_alpha_bits(0).validate().is_err());
        assert!(FitConfig::new().with_alpha_bits(4).validate().is_err());
        assert!(FitConfig::new().with_rinv_bits(0).validate().is_err());
    }
}
