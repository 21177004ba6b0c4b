use crate::register_read::{first_register_read, MeterValueName, RegisterReadSpec};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("no register read is configured for {0}")]
    MissingQuantity(MeterValueName),
    #[error("register read for {name} at address {address} is invalid: {reason}")]
    InvalidRead {
        name: MeterValueName,
        address: u16,
        reason: String,
    },
    #[error("poll interval {poll:?} must be non-zero and not exceed measurement interval {measurement:?}")]
    InvalidIntervals {
        poll: Duration,
        measurement: Duration,
    },
}

/// Outcome of validating a meter configuration, listing every problem found.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub failures: Vec<ConfigurationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    /// Quantities that have no register read at all.
    pub fn missing_quantities(&self) -> Vec<MeterValueName> {
        self.failures
            .iter()
            .filter_map(|failure| match failure {
                ConfigurationError::MissingQuantity(name) => Some(*name),
                _ => None,
            })
            .collect()
    }

    /// Combines the failures of two validations.
    pub fn merge(mut self, other: Self) -> Self {
        self.failures.extend(other.failures);
        self
    }

    /// `Ok` when nothing failed, otherwise the whole result as the error.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return f.write_str("configuration is valid");
        }
        f.write_str("invalid configuration: ")?;
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationResult {}

/// Checks that every required quantity has a usable register read.
///
/// Only the read that would actually be used, the first declared one, is
/// checked for decodability.
pub fn validate(
    appliance_id: &str,
    required: &[MeterValueName],
    register_reads: &[RegisterReadSpec],
) -> ValidationResult {
    let mut failures = Vec::new();
    for &name in required {
        match first_register_read(name, register_reads) {
            Some(read) => failures.extend(validate_read(read)),
            None => failures.push(ConfigurationError::MissingQuantity(name)),
        }
    }
    for failure in &failures {
        error!(appliance_id, %failure, "configuration check failed");
    }
    ValidationResult { failures }
}

/// Checks the first declared read of `name`, if any; absence is not a failure.
pub fn validate_optional(
    appliance_id: &str,
    name: MeterValueName,
    register_reads: &[RegisterReadSpec],
) -> ValidationResult {
    let failures: Vec<_> = first_register_read(name, register_reads)
        .and_then(validate_read)
        .into_iter()
        .collect();
    for failure in &failures {
        error!(appliance_id, %failure, "configuration check failed");
    }
    ValidationResult { failures }
}

pub fn validate_intervals(
    appliance_id: &str,
    poll: Duration,
    measurement: Duration,
) -> ValidationResult {
    if poll.is_zero() || poll > measurement {
        let failure = ConfigurationError::InvalidIntervals { poll, measurement };
        error!(appliance_id, %failure, "configuration check failed");
        return ValidationResult {
            failures: vec![failure],
        };
    }
    ValidationResult::default()
}

fn validate_read(read: &RegisterReadSpec) -> Option<ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidRead {
        name: read.name,
        address: read.address,
        reason,
    };
    if !read.decoding.supports_width(usize::from(read.bytes)) {
        return Some(invalid(format!(
            "{} bytes cannot be decoded as {:?}",
            read.bytes, read.decoding
        )));
    }
    if !read.factor_to_value.is_finite() || read.factor_to_value == 0.0 {
        return Some(invalid(format!(
            "factor to value {} is not usable",
            read.factor_to_value
        )));
    }
    None
}
