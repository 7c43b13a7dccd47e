//! Configuration management for atp-tunnel

mod serde_utils;
mod tunnel;

pub use tunnel::{BindConfig, SshConfig, TargetConfig, TunnelConfig, WalletConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "tunnel.toml";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atp-tunnel")
}

/// Resolve the configuration file to use when none is given explicitly
///
/// `./tunnel.toml` wins over the per-user config directory.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    default_config_dir().join(DEFAULT_CONFIG_FILE)
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config::<TunnelConfig>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(p) if p == path));
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ssh\nhostname = ").unwrap();
        let err = load_config::<TunnelConfig>(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[ssh]
hostname = "bastion.example.com"
username = "opc"

[target]
hostname = "adb.example.com"
port = 1522

[wallet]
path = "/opt/wallet"
name = "cwallet.sso"
"#
        )
        .unwrap();

        let config: TunnelConfig = load_config(file.path()).unwrap();
        assert_eq!(config.ssh.hostname, "bastion.example.com");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.target.address(), "adb.example.com:1522");
        assert_eq!(config.bind.address(), "localhost:1522");
        assert!(config.validate().is_ok());
    }
}
