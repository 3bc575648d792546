use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linearly increasing delay
    Linear,
    /// Exponentially increasing delay
    #[default]
    Exponential,
}

/// Human-readable duration (e.g., "200ms", "5m", "1h").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub std::time::Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(std::time::Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn as_duration(&self) -> std::time::Duration {
        self.0
    }

    pub fn from_secs(secs: u64) -> Self {
        HumanDuration(std::time::Duration::from_secs(secs))
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
            (n, "ms")
        } else if let Some(n) = s.strip_suffix('s') {
            (n, "s")
        } else if let Some(n) = s.strip_suffix('m') {
            (n, "m")
        } else if let Some(n) = s.strip_suffix('h') {
            (n, "h")
        } else if let Some(n) = s.strip_suffix('d') {
            (n, "d")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => std::time::Duration::from_millis(num),
            "s" => std::time::Duration::from_secs(num),
            "m" => std::time::Duration::from_secs(num * 60),
            "h" => std::time::Duration::from_secs(num * 3600),
            "d" => std::time::Duration::from_secs(num * 86400),
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let millis = self.0.as_millis();

        if millis % 1000 != 0 || secs == 0 {
            write!(f, "{}ms", millis)
        } else if secs % 60 != 0 {
            write!(f, "{}s", secs)
        } else if secs % 3600 != 0 {
            write!(f, "{}m", secs / 60)
        } else if secs % 86400 != 0 {
            write!(f, "{}h", secs / 3600)
        } else {
            write!(f, "{}d", secs / 86400)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Human-readable bytes (e.g., "64kb", "10gb").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HumanBytes(pub u64);

impl HumanBytes {
    pub fn as_bytes(&self) -> u64 {
        self.0
    }
}

impl FromStr for HumanBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, multiplier) = if let Some(n) = s.strip_suffix("tb") {
            (n, 1024u64 * 1024 * 1024 * 1024)
        } else if let Some(n) = s.strip_suffix("gb") {
            (n, 1024u64 * 1024 * 1024)
        } else if let Some(n) = s.strip_suffix("mb") {
            (n, 1024u64 * 1024)
        } else if let Some(n) = s.strip_suffix("kb") {
            (n, 1024u64)
        } else if let Some(n) = s.strip_suffix('b') {
            (n, 1u64)
        } else {
            // Plain number means bytes
            (s.as_str(), 1u64)
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in bytes: {}", s))?;

        num.checked_mul(multiplier)
            .map(HumanBytes)
            .ok_or_else(|| format!("Byte size overflows u64: {}", s))
    }
}

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;
        const TB: u64 = GB * 1024;
        let bytes = self.0;

        if bytes >= TB && bytes % TB == 0 {
            write!(f, "{}tb", bytes / TB)
        } else if bytes >= GB && bytes % GB == 0 {
            write!(f, "{}gb", bytes / GB)
        } else if bytes >= MB && bytes % MB == 0 {
            write!(f, "{}mb", bytes / MB)
        } else if bytes >= KB && bytes % KB == 0 {
            write!(f, "{}kb", bytes / KB)
        } else {
            write!(f, "{}b", bytes)
        }
    }
}

impl Serialize for HumanBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(HumanBytes(n)),
            Raw::Str(s) => HumanBytes::from_str(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Unix permission bits, written either as an integer or an octal string
/// ("644", "0o644", "0644").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(pub u32);

impl Permissions {
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl FromStr for Permissions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix("0o").unwrap_or(s);
        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| format!("Invalid octal permissions: {}", s))?;
        if bits > 0o7777 {
            return Err(format!("Permissions out of range: {}", s));
        }
        Ok(Permissions(bits))
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0o{:o}", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u32),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) if n <= 0o7777 => Ok(Permissions(n)),
            Raw::Int(n) => Err(serde::de::Error::custom(format!(
                "Permissions out of range: {}",
                n
            ))),
            Raw::Str(s) => Permissions::from_str(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Local directory backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsBackendConfig {
    pub root: String,
    /// Capacity reported to admission control.
    #[serde(default = "default_quota")]
    pub quota: HumanBytes,
}

/// In-memory backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    #[serde(default = "default_quota")]
    pub capacity: HumanBytes,
}

fn default_quota() -> HumanBytes {
    HumanBytes(10 * 1024 * 1024 * 1024)
}

/// Tagged enum for backend configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Fs(FsBackendConfig),
    Memory(MemoryBackendConfig),
}

/// Mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_file_mode")]
    pub file_mode: Permissions,
    #[serde(default = "default_dir_mode")]
    pub dir_mode: Permissions,
}

fn default_file_mode() -> Permissions {
    Permissions(0o644)
}

fn default_dir_mode() -> Permissions {
    Permissions(0o755)
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            backend: None,
            read_only: false,
            file_mode: default_file_mode(),
            dir_mode: default_dir_mode(),
        }
    }
}

/// Local staging area for in-progress writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory for staging files (system temp dir when unset).
    #[serde(default)]
    pub dir: Option<String>,
    /// Size of each write issued to the remote during a flush.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: HumanBytes,
}

fn default_chunk_size() -> HumanBytes {
    HumanBytes(64 * 1024)
}

impl Default for StagingConfig {
    fn default() -> Self {
        StagingConfig {
            dir: None,
            chunk_size: default_chunk_size(),
        }
    }
}

/// Retry policy for flushing staged content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_time_limit")]
    pub time_limit: HumanDuration,
    #[serde(default = "default_min_delay")]
    pub min_delay: HumanDuration,
    #[serde(default = "default_max_delay")]
    pub max_delay: HumanDuration,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_time_limit() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_min_delay() -> HumanDuration {
    HumanDuration::from_secs(1)
}

fn default_max_delay() -> HumanDuration {
    HumanDuration::from_secs(60)
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            time_limit: default_time_limit(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            backoff: BackoffStrategy::default(),
        }
    }
}

/// Top-level rmount configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RmountConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backends: IndexMap<String, BackendConfig>,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_duration_parsing() {
        assert_eq!(
            HumanDuration::from_str("200ms").unwrap().as_duration(),
            std::time::Duration::from_millis(200)
        );
        assert_eq!(
            HumanDuration::from_str("5s").unwrap().as_duration(),
            std::time::Duration::from_secs(5)
        );
        assert_eq!(
            HumanDuration::from_str("5m").unwrap().as_duration(),
            std::time::Duration::from_secs(300)
        );
        assert_eq!(
            HumanDuration::from_str("1h").unwrap().as_duration(),
            std::time::Duration::from_secs(3600)
        );
        assert!(HumanDuration::from_str("soon").is_err());
    }

    #[test]
    fn test_human_duration_display_is_lossless() {
        assert_eq!(HumanDuration::from_str("1500ms").unwrap().to_string(), "1500ms");
        assert_eq!(HumanDuration::from_str("90s").unwrap().to_string(), "90s");
        assert_eq!(HumanDuration::from_str("5m").unwrap().to_string(), "5m");
    }

    #[test]
    fn test_human_bytes_parsing() {
        assert_eq!(HumanBytes::from_str("512b").unwrap().as_bytes(), 512);
        assert_eq!(HumanBytes::from_str("64kb").unwrap().as_bytes(), 65536);
        assert_eq!(
            HumanBytes::from_str("10gb").unwrap().as_bytes(),
            10 * 1024 * 1024 * 1024
        );
        assert_eq!(HumanBytes::from_str("100").unwrap().as_bytes(), 100);
        assert!(HumanBytes::from_str("99999999999tb").is_err());
    }

    #[test]
    fn test_human_bytes_accepts_yaml_integer() {
        let cfg: MemoryBackendConfig = serde_yaml::from_str("capacity: 100").unwrap();
        assert_eq!(cfg.capacity, HumanBytes(100));
    }

    #[test]
    fn test_permissions_parsing() {
        assert_eq!(Permissions::from_str("644").unwrap().bits(), 0o644);
        assert_eq!(Permissions::from_str("0o757").unwrap().bits(), 0o757);
        assert_eq!(Permissions::from_str("0755").unwrap().bits(), 0o755);
        assert!(Permissions::from_str("999").is_err());
        assert_eq!(Permissions(0o640).to_string(), "0o640");
    }

    #[test]
    fn test_mount_config_defaults() {
        let mount: MountConfig = serde_yaml::from_str("read_only: true").unwrap();
        assert!(mount.read_only);
        assert_eq!(mount.file_mode.bits(), 0o644);
        assert_eq!(mount.dir_mode.bits(), 0o755);
    }
}
