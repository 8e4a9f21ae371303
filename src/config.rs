//! Configuration for the bootstrap layer.
//!
//! Values come from three places, each overriding the one before: the
//! environment, an optional JSON or YAML file, and the command line (parsed
//! with `arrrg`).  The connection core never reads any of these itself; it is
//! handed a [`Config`] and a credential.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logger::Level;
use crate::retry::RetryPolicy;
use crate::types::DEFAULT_ENDPOINT_VALIDITY;

/// Environment variable naming the log file.
pub const LOG_FILE_PATH_VAR: &str = "ALARMIE_LOGFILEPATH";
/// Environment variable overriding the handshake endpoint.
pub const HANDSHAKE_URL_VAR: &str = "ALARMIE_HANDSHAKE_URL";
/// Environment variable overriding the upgrade `Origin`.
pub const ORIGIN_VAR: &str = "ALARMIE_ORIGIN";
/// Environment variable naming the default channel.
pub const CHANNEL_VAR: &str = "ALARMIE_CHANNEL";
/// Environment variable holding the credential.
pub const CREDENTIAL_VAR: &str = "SLACK_ALARMIE_TOKEN";

const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Command-line arguments for the alarmie binary.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct AlarmieArgs {
    /// Configuration file to merge over the environment.
    #[arrrg(optional, "JSON or YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Where log lines are appended.
    #[arrrg(optional, "Log file path (overrides ALARMIE_LOGFILEPATH)", "PATH")]
    pub log_file: Option<String>,

    /// Lowest level written to the log.
    #[arrrg(optional, "Minimum log level (default: debug)", "LEVEL")]
    pub log_level: Option<String>,

    /// Handshake endpoint override.
    #[arrrg(optional, "Handshake endpoint (default: https://slack.com/api/rtm.connect)", "URL")]
    pub handshake_url: Option<String>,

    /// `Origin` header for the stream upgrade.
    #[arrrg(optional, "Origin sent on the stream upgrade", "ORIGIN")]
    pub origin: Option<String>,

    /// Channel outbound messages go to by default.
    #[arrrg(optional, "Default channel for outbound messages", "CHANNEL")]
    pub channel: Option<String>,

    /// Connection attempts before giving up.
    #[arrrg(optional, "Connection attempts before giving up (default: 5)", "N")]
    pub max_attempts: Option<u32>,

    /// Seconds between keep-alive pings.
    #[arrrg(optional, "Seconds between keep-alive pings (default: off)", "SECS")]
    pub ping_interval: Option<u64>,
}

/// Resolved configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, alias = "LogFilePath", skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_validity_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connect_attempts: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,
}

impl Config {
    /// Read the environment.  Fails when the log file path is not set.
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok()).require_log_file_path()
    }

    /// Read whatever the lookup provides; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            log_file_path: get(LOG_FILE_PATH_VAR).map(PathBuf::from),
            handshake_url: get(HANDSHAKE_URL_VAR),
            origin: get(ORIGIN_VAR),
            channel: get(CHANNEL_VAR),
            ..Self::default()
        }
    }

    /// Read a configuration file.  Files ending in `.yaml` or `.yml` are YAML;
    /// anything else is JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::io(
                format!("could not read configuration file {}: {e}", path.display()),
                e,
            )
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&contents).map_err(|e| {
                Error::config(
                    format!("could not parse configuration file {}: {e}", path.display()),
                    Some(Box::new(e)),
                )
            })
        } else {
            serde_json::from_str(&contents).map_err(|e| {
                Error::config(
                    format!("could not parse configuration file {}: {e}", path.display()),
                    Some(Box::new(e)),
                )
            })
        }
    }

    /// Environment, then `args.config`, then the remaining arguments.
    pub fn load(args: &AlarmieArgs) -> Result<Self> {
        let mut config = Self::from_lookup(|key| env::var(key).ok());
        if let Some(path) = &args.config {
            config = config.merge(Self::from_file(Path::new(path))?);
        }
        config.apply_args(args).require_log_file_path()
    }

    /// Values set in `other` replace those in `self`.
    pub fn merge(self, other: Config) -> Self {
        Self {
            log_file_path: other.log_file_path.or(self.log_file_path),
            log_level: other.log_level.or(self.log_level),
            handshake_url: other.handshake_url.or(self.handshake_url),
            origin: other.origin.or(self.origin),
            channel: other.channel.or(self.channel),
            endpoint_validity_secs: other.endpoint_validity_secs.or(self.endpoint_validity_secs),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            max_connect_attempts: other.max_connect_attempts.or(self.max_connect_attempts),
            ping_interval_secs: other.ping_interval_secs.or(self.ping_interval_secs),
        }
    }

    /// Apply command-line overrides.
    pub fn apply_args(self, args: &AlarmieArgs) -> Self {
        self.merge(Config {
            log_file_path: args.log_file.as_ref().map(PathBuf::from),
            log_level: args.log_level.clone(),
            handshake_url: args.handshake_url.clone(),
            origin: args.origin.clone(),
            channel: args.channel.clone(),
            max_connect_attempts: args.max_attempts,
            ping_interval_secs: args.ping_interval,
            ..Config::default()
        })
    }

    fn require_log_file_path(self) -> Result<Self> {
        if self.log_file_path.is_none() {
            return Err(Error::config(
                format!(
                    "Could not locate values for configuration in environment: {}",
                    LOG_FILE_PATH_VAR
                ),
                None,
            ));
        }
        Ok(self)
    }

    /// The log file path.
    pub fn log_file_path(&self) -> Result<&Path> {
        self.log_file_path.as_deref().ok_or_else(|| {
            Error::config(format!("{LOG_FILE_PATH_VAR} is not set"), None)
        })
    }

    /// The minimum log level, `debug` when unset.
    pub fn log_level(&self) -> Result<Level> {
        match &self.log_level {
            Some(level) => level
                .parse::<Level>()
                .map_err(|e| Error::config(e, None)),
            None => Ok(Level::Debug),
        }
    }

    /// How long a stream endpoint may be dialed after its handshake.
    pub fn endpoint_validity(&self) -> Duration {
        self.endpoint_validity_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ENDPOINT_VALIDITY)
    }

    /// Handshake request timeout, if overridden.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Keep-alive interval; zero or unset disables pings.
    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// The retry policy for connecting.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_connect_attempts
                .unwrap_or(DEFAULT_MAX_CONNECT_ATTEMPTS),
        )
    }
}

/// Read the credential from `SLACK_ALARMIE_TOKEN`.
pub fn credential_from_env() -> Result<String> {
    credential_from_lookup(|key| env::var(key).ok())
}

/// Read the credential through `lookup`.  The value is never echoed back.
pub fn credential_from_lookup<F>(lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(CREDENTIAL_VAR) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(Error::config(
            format!("Could not locate credential in environment: {CREDENTIAL_VAR}"),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("alarmie-{}-{name}", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn environment_provides_log_file_path() {
        let config = Config::from_lookup(lookup(&[(LOG_FILE_PATH_VAR, "/foo/bar/baz")]))
            .require_log_file_path()
            .unwrap();
        assert_eq!(config.log_file_path().unwrap(), Path::new("/foo/bar/baz"));
    }

    #[test]
    fn missing_log_file_path_names_the_variable() {
        let err = Config::from_lookup(lookup(&[(LOG_FILE_PATH_VAR, "")]))
            .require_log_file_path()
            .unwrap_err();
        assert!(err.is_config());
        assert!(
            err.to_string()
                .contains("Could not locate values for configuration in environment")
        );
        assert!(err.to_string().contains(LOG_FILE_PATH_VAR));
    }

    #[test]
    fn json_file_uses_legacy_key() {
        let path = temp_file("legacy.json", r#"{"LogFilePath":"/baz/qux/quux"}"#);
        let config = Config::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.log_file_path, Some(PathBuf::from("/baz/qux/quux")));
    }

    #[test]
    fn yaml_file_is_parsed() {
        let path = temp_file(
            "config.yaml",
            concat!(
                "log_file_path: /var/log/alarmie.log\n",
                "origin: http://localhost\n",
                "max_connect_attempts: 2\n",
            ),
        );
        let config = Config::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.origin.as_deref(), Some("http://localhost"));
        assert_eq!(config.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn bad_files_are_reported() {
        let err = Config::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));

        let path = temp_file("broken.json", "{not json");
        let err = Config::from_file(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn file_and_args_override_environment() {
        let env = Config::from_lookup(lookup(&[
            (LOG_FILE_PATH_VAR, "/env.log"),
            (ORIGIN_VAR, "https://env.example.com"),
            (CHANNEL_VAR, "C-ENV"),
        ]));
        let file = Config {
            origin: Some("https://file.example.com".to_string()),
            endpoint_validity_secs: Some(10),
            ..Config::default()
        };
        let args = AlarmieArgs {
            log_file: Some("/args.log".to_string()),
            max_attempts: Some(9),
            ..AlarmieArgs::default()
        };
        let config = env.merge(file).apply_args(&args);
        assert_eq!(config.log_file_path, Some(PathBuf::from("/args.log")));
        assert_eq!(config.origin.as_deref(), Some("https://file.example.com"));
        assert_eq!(config.channel.as_deref(), Some("C-ENV"));
        assert_eq!(config.endpoint_validity(), Duration::from_secs(10));
        assert_eq!(config.retry_policy().max_attempts(), 9);
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.endpoint_validity(), DEFAULT_ENDPOINT_VALIDITY);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.ping_interval(), None);
        assert_eq!(config.log_level().unwrap(), Level::Debug);
        assert_eq!(
            config.retry_policy().max_attempts(),
            DEFAULT_MAX_CONNECT_ATTEMPTS
        );
        assert!(config.log_file_path().is_err());
    }

    #[test]
    fn invalid_log_level_is_config_error() {
        let config = Config {
            log_level: Some("loud".to_string()),
            ..Config::default()
        };
        assert!(config.log_level().unwrap_err().is_config());
    }

    #[test]
    fn credential_lookup() {
        assert_eq!(
            credential_from_lookup(lookup(&[(CREDENTIAL_VAR, " xoxb-123 ")])).unwrap(),
            "xoxb-123"
        );
        let err = credential_from_lookup(lookup(&[])).unwrap_err();
        assert!(err.is_config());
        let err = credential_from_lookup(lookup(&[(CREDENTIAL_VAR, "   ")])).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains(CREDENTIAL_VAR));
    }
}
