mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Backend '{0}' referenced by the mount is not defined")]
    UndefinedBackend(String),

    #[error("No backend selected for the mount ({0} backends defined)")]
    NoBackendSelected(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RmountConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: RmountConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Backend configuration selected by the mount, after defaults.
    pub fn mount_backend(&self) -> Result<(&str, &BackendConfig), ConfigError> {
        let effective = self.effective();
        let name = effective
            .mount
            .backend
            .ok_or(ConfigError::NoBackendSelected(self.backends.len()))?;
        self.backends
            .get_key_value(&name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or(ConfigError::UndefinedBackend(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: warehouse
backends:
  local:
    type: fs
    root: ./data
"#;

        let config = RmountConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("warehouse".to_string()));
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.staging.chunk_size.as_bytes(), 64 * 1024);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
backends:
  primary:
    type: fs
    root: /srv/data
    quota: 2gb
  scratch:
    type: memory
    capacity: 100
mount:
  backend: scratch
  read_only: false
  file_mode: "0o600"
staging:
  dir: /var/tmp/rmount
  chunk_size: 1mb
retry:
  max_attempts: 3
  time_limit: 30s
  min_delay: 200ms
  max_delay: 5s
  backoff: linear
"#;

        let config = RmountConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mount.file_mode.bits(), 0o600);
        assert_eq!(config.staging.dir.as_deref(), Some("/var/tmp/rmount"));
        assert_eq!(config.retry.backoff, BackoffStrategy::Linear);
        assert_eq!(
            config.retry.min_delay.as_duration(),
            std::time::Duration::from_millis(200)
        );

        let (name, backend) = config.mount_backend().unwrap();
        assert_eq!(name, "scratch");
        assert!(matches!(backend, BackendConfig::Memory(m) if m.capacity.as_bytes() == 100));
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("RMOUNT_TEST_ROOT_PATH", "/tmp/test");

        let yaml = r#"
backends:
  local:
    type: fs
    root: ${RMOUNT_TEST_ROOT_PATH}
"#;

        let config = RmountConfig::from_yaml(yaml).unwrap();
        match &config.backends["local"] {
            BackendConfig::Fs(fs) => {
                assert_eq!(fs.root, "/tmp/test");
            }
            _ => panic!("Expected Fs backend"),
        }
    }

    #[test]
    fn test_mount_backend_inferred_from_single_backend() {
        let yaml = r#"
backends:
  only:
    type: memory
"#;

        let config = RmountConfig::from_yaml(yaml).unwrap();
        let (name, _) = config.mount_backend().unwrap();
        assert_eq!(name, "only");
    }

    #[test]
    fn test_mount_backend_ambiguous() {
        let yaml = r#"
backends:
  a:
    type: memory
  b:
    type: memory
"#;

        let config = RmountConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.mount_backend(),
            Err(ConfigError::NoBackendSelected(2))
        ));
    }

    #[test]
    fn test_unknown_backend_type_rejected() {
        let yaml = r#"
backends:
  remote:
    type: ftp
    root: /
"#;

        assert!(matches!(
            RmountConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }
}
