use crate::types::{BackendConfig, RmountConfig};
use crate::ConfigError;

impl RmountConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let effective = self.effective();

        if self.backends.is_empty() {
            errors.push(ConfigError::InvalidConfig(
                "At least one backend must be defined".to_string(),
            ));
        }

        // The mount must resolve to a defined backend
        match &effective.mount.backend {
            Some(name) if !self.backends.contains_key(name) => {
                errors.push(ConfigError::UndefinedBackend(name.clone()));
            }
            None if self.backends.len() > 1 => {
                errors.push(ConfigError::NoBackendSelected(self.backends.len()));
            }
            _ => {}
        }

        for (name, backend) in &self.backends {
            if let BackendConfig::Fs(fs) = backend {
                if fs.root.trim().is_empty() {
                    errors.push(ConfigError::InvalidConfig(format!(
                        "Backend '{}' has an empty root",
                        name
                    )));
                }
            }
        }

        if self.retry.max_attempts == 0 {
            errors.push(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.staging.chunk_size.as_bytes() == 0 {
            errors.push(ConfigError::InvalidConfig(
                "staging.chunk_size must be greater than zero".to_string(),
            ));
        }

        if let Some(dir) = &self.staging.dir {
            if dir.trim().is_empty() {
                errors.push(ConfigError::InvalidConfig(
                    "staging.dir must not be empty when set".to_string(),
                ));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FsBackendConfig, HumanBytes, MemoryBackendConfig};

    fn memory_config() -> RmountConfig {
        RmountConfig {
            backends: indexmap::indexmap! {
                "mem".to_string() => BackendConfig::Memory(MemoryBackendConfig {
                    capacity: HumanBytes(100),
                }),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(memory_config().validate().is_empty());
        assert!(memory_config().validate_or_err().is_ok());
    }

    #[test]
    fn test_no_backends() {
        let errors = RmountConfig::default().validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidConfig(msg) if msg.contains("backend"))));
    }

    #[test]
    fn test_undefined_backend() {
        let mut config = memory_config();
        config.mount.backend = Some("nonexistent".to_string());

        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::UndefinedBackend(name) if name == "nonexistent")));
    }

    #[test]
    fn test_ambiguous_backend() {
        let mut config = memory_config();
        config.backends.insert(
            "other".to_string(),
            BackendConfig::Memory(MemoryBackendConfig {
                capacity: HumanBytes(10),
            }),
        );

        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::NoBackendSelected(2))));
    }

    #[test]
    fn test_empty_fs_root() {
        let config = RmountConfig {
            backends: indexmap::indexmap! {
                "local".to_string() => BackendConfig::Fs(FsBackendConfig {
                    root: "  ".to_string(),
                    quota: HumanBytes(1024),
                }),
            },
            ..Default::default()
        };

        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ConfigError::InvalidConfig(msg) if msg.contains("empty root")));
    }

    #[test]
    fn test_zero_attempts_and_chunk_size() {
        let mut config = memory_config();
        config.retry.max_attempts = 0;
        config.staging.chunk_size = HumanBytes(0);

        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(config.validate_or_err().is_err());
    }
}
