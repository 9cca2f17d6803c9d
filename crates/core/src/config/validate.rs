use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - At least one worker slot
/// - Loop intervals are not 0
/// - Memory ceiling ratio is in (0, 1]
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.scheduler.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_concurrent cannot be 0".to_string(),
        ));
    }

    if config.scheduler.admission_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.admission_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.executor.progress_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "executor.progress_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.memory.check_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "memory.check_interval_ms cannot be 0".to_string(),
        ));
    }

    let ratio = config.memory.ceiling_ratio;
    if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
        return Err(ConfigError::ValidationError(format!(
            "memory.ceiling_ratio must be in (0, 1], got {}",
            ratio
        )));
    }

    if config.executor.output_extension.is_empty() {
        return Err(ConfigError::ValidationError(
            "executor.output_extension cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, SchedulerConfig};

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency_fails() {
        let config = Config {
            scheduler: SchedulerConfig::default().with_max_concurrent(0),
            ..Default::default()
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_interval_fails() {
        let config = Config {
            scheduler: SchedulerConfig::default().with_admission_interval(0),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_ceiling_ratio_bounds() {
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            let config = Config {
                memory: MemoryConfig {
                    ceiling_ratio: ratio,
                    ..Default::default()
                },
                ..Default::default()
            };
            assert!(validate_config(&config).is_err(), "ratio {} accepted", ratio);
        }

        let config = Config {
            memory: MemoryConfig {
                ceiling_ratio: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }
}
