use crate::policy::CapabilityPolicy;
use crate::sandbox::process::ProcessSandbox;
use crate::validator::Validator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub validator: ValidatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutorConfig {
    /// Interpreter name (resolved on PATH) or absolute path.
    pub interpreter: String,
    /// Parent directory for per-run workspaces; system temp dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidatorConfig {
    /// Only accept imports from the allow-list.
    pub strict_imports: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set.
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig {
                interpreter: "python3".to_string(),
                scratch_dir: None,
            },
            validator: ValidatorConfig {
                strict_imports: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Config {
    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Default location: ~/.pysandbox/config.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".pysandbox").join("config.toml"))
    }

    /// Load config from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`, falling back to defaults if it is missing or invalid.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!(
                    "Warning: Failed to read {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn policy(&self) -> CapabilityPolicy {
        if self.validator.strict_imports {
            CapabilityPolicy::strict()
        } else {
            CapabilityPolicy::default()
        }
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.policy())
    }

    /// Build the executor described by this config.
    pub fn sandbox(&self) -> ProcessSandbox {
        let sandbox =
            ProcessSandbox::new(self.validator()).with_interpreter(&self.executor.interpreter);
        match &self.executor.scratch_dir {
            Some(dir) => sandbox.with_scratch_dir(expand_home(dir)),
            None => sandbox,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.executor.interpreter, "python3");
        assert!(config.executor.scratch_dir.is_none());
        assert!(!config.validator.strict_imports);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();

        assert_eq!(parsed.executor.interpreter, config.executor.interpreter);
        assert_eq!(parsed.executor.scratch_dir, config.executor.scratch_dir);
        assert_eq!(
            parsed.validator.strict_imports,
            config.validator.strict_imports
        );
        assert_eq!(parsed.logging.level, config.logging.level);
    }

    #[test]
    fn test_config_parse_custom_values() {
        let toml_str = r#"
[executor]
interpreter = "/usr/local/bin/python"
scratch_dir = "/var/tmp/pysandbox"

[validator]
strict_imports = true

[logging]
level = "debug"
"#;
        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.executor.interpreter, "/usr/local/bin/python");
        assert_eq!(
            config.executor.scratch_dir.as_deref(),
            Some("/var/tmp/pysandbox")
        );
        assert!(config.validator.strict_imports);
        assert!(config.policy().strict_imports);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_parse_invalid_toml() {
        let result = Config::from_toml("this is not valid toml {{{");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_parse_missing_section() {
        // Missing [logging] section
        let toml_str = r#"
[executor]
interpreter = "python3"

[validator]
strict_imports = false
"#;
        assert!(Config::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_config_parse_wrong_type() {
        let toml_str = r#"
[executor]
interpreter = "python3"

[validator]
strict_imports = "yes"

[logging]
level = "info"
"#;
        assert!(Config::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_from_missing_file_returns_defaults() {
        let config = Config::load_from(Path::new("/nonexistent_dir_12345/config.toml"));
        assert_eq!(config.executor.interpreter, "python3");
    }

    #[test]
    fn test_load_from_invalid_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[executor\n").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.validator.strict_imports = true;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = Config::load_from(&path);
        assert!(loaded.validator.strict_imports);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/scratch"), home.join("scratch"));
        }
    }
}
