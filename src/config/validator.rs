use crate::config::{parse_duration, Config, SCHEMA_VERSION};
use crate::error::{Result, RetroError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_transport(config, &mut errors);
        Self::validate_pipeline(config, &mut errors);
        Self::validate_notify(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RetroError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.database_file.is_empty() {
            errors.push(ValidationError::new(
                "storage.database_file",
                "Database file name cannot be empty",
            ));
        }

        // zstd accepts 1..=22
        let level = config.storage.compression_level;
        if !(1..=22).contains(&level) {
            errors.push(ValidationError::new(
                "storage.compression_level",
                format!("Compression level must be between 1 and 22, got {}", level),
            ));
        }
    }

    fn validate_transport(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.transport.batch_size == 0 {
            errors.push(ValidationError::new(
                "transport.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_pipeline(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.pipeline.match_batch_size == 0 {
            errors.push(ValidationError::new(
                "pipeline.match_batch_size",
                "Match batch size must be greater than 0",
            ));
        }

        for (path, value) in [
            ("pipeline.read_timeout", &config.pipeline.read_timeout),
            ("pipeline.query_timeout", &config.pipeline.query_timeout),
            ("pipeline.notify_timeout", &config.pipeline.notify_timeout),
        ] {
            match parse_duration(value) {
                Some(d) if d.is_zero() => errors.push(ValidationError::new(
                    path,
                    "Timeout must be greater than 0",
                )),
                Some(_) => {}
                None => errors.push(ValidationError::new(
                    path,
                    format!("Invalid duration format: {}", value),
                )),
            }
        }
    }

    fn validate_notify(config: &Config, errors: &mut Vec<ValidationError>) {
        if let Some(url) = &config.notify.webhook_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                errors.push(ValidationError::new(
                    "notify.webhook_url",
                    format!("Webhook URL must be http(s), got '{}'", url),
                ));
            }
        }

        if config.notify.webhook_url_env.is_empty() {
            errors.push(ValidationError::new(
                "notify.webhook_url_env",
                "Webhook environment variable name cannot be empty",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = Config::default();
        config.transport.batch_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.pipeline.read_timeout = "soon".to_string();
        config.pipeline.notify_timeout = "0s".to_string();
        config.notify.webhook_url = Some("ftp://hooks.example.com".to_string());

        match ConfigValidator::validate(&config) {
            Err(RetroError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec![
                        "pipeline.read_timeout",
                        "pipeline.notify_timeout",
                        "notify.webhook_url"
                    ]
                );
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
