//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, PulseConfig, StorageBackend};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(err) if err.missing => Err(ConfigError::MissingField(err.path)),
            Some(err) => Err(ConfigError::InvalidValue {
                field: err.path,
                message: err.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
    missing: bool,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            missing: false,
        }
    }

    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: "required field is not set".to_string(),
            missing: true,
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_scheduler_into(&config.scheduler, &mut result);
        Self::validate_storage(config, &mut result);
        result
    }

    /// Validate only the scheduler section.
    pub fn validate_scheduler(config: &PulseConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_scheduler_into(config, &mut result);
        result
    }

    fn validate_scheduler_into(config: &PulseConfig, result: &mut ValidationResult) {
        if config.max_parallelism == 0 {
            result.add_error(ValidationError::new(
                "scheduler.max_parallelism",
                "must be at least 1",
            ));
        }

        if config.max_queue_size == 0 {
            result.add_warning(ValidationWarning::new(
                "scheduler.max_queue_size",
                "is 0, every schedule call will time out waiting for admission",
            ));
        }

        if config.job_max_run_time_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "scheduler.job_max_run_time_ms",
                "is 0, every job will be cancelled as soon as it starts",
            ));
        }

        if config.storage_maintain_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "scheduler.storage_maintain_interval_ms",
                "must be greater than 0",
            ));
        }
    }

    fn validate_storage(config: &Config, result: &mut ValidationResult) {
        match config.storage.backend {
            StorageBackend::Memory => {}
            StorageBackend::Filesystem => {
                if config.storage.path.is_none() {
                    result.add_error(ValidationError::missing("storage.path"));
                }
            }
            StorageBackend::Redis => {
                if config.storage.redis_url.is_none() {
                    result.add_error(ValidationError::missing("storage.redis_url"));
                }
            }
        }
    }
}

impl Config {
    /// Validate and return warnings, or the first error.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>, ConfigError> {
        ConfigValidator::validate(self).into_result()
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
