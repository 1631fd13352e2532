//! Configuration types for the EduBridge session service.
//!
//! Configuration is read from `edubridge.json`. Every field has a default so
//! an empty object (or a missing file) yields a runnable local setup that
//! logs emails instead of sending them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EduError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "edubridge.json";

/// Shortest accepted JWT signing secret.
const MIN_JWT_SECRET_LEN: usize = 16;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

const fn default_token_ttl_hours() -> u32 {
    24
}

const fn default_bcrypt_cost() -> u32 {
    10
}

fn default_from_address() -> String {
    "sessions@edubridge.local".to_string()
}

fn default_from_name() -> String {
    "EduBridge".to_string()
}

const fn default_mail_timeout() -> u32 {
    10
}

fn default_data_file() -> String {
    ".edubridge/data.json".to_string()
}

const fn default_autosave_seconds() -> u32 {
    5
}

fn default_public_url() -> String {
    "http://localhost:5173".to_string()
}

/// Main configuration for the session service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token and password settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Email provider settings.
    #[serde(default)]
    pub mailer: MailerConfig,

    /// Snapshot persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Base URL of the web client; invitation links point here.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Admin account created at startup if no user has its email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            mailer: MailerConfig::default(),
            storage: StorageConfig::default(),
            public_url: default_public_url(),
            bootstrap_admin: None,
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `edubridge.json`; returns defaults when it is absent.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            EduError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `edubridge.json` in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the (validated) defaults.
    ///
    /// # Errors
    ///
    /// Returns `EduError::ConfigParseError` if the file cannot be read or is
    /// not valid JSON, and `EduError::ConfigValidationError` if a value is
    /// out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(EduError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| EduError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns `host:port` for binding the listener.
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(EduError::config_validation(
                "server.port must be greater than 0",
                "Set server.port to a free TCP port in your edubridge.json",
            ));
        }

        if self.auth.jwt_secret.trim().len() < MIN_JWT_SECRET_LEN {
            return Err(EduError::config_validation(
                format!("auth.jwtSecret must be at least {MIN_JWT_SECRET_LEN} characters"),
                "Set auth.jwtSecret to a long random string in your edubridge.json",
            ));
        }

        if self.auth.token_ttl_hours == 0 {
            return Err(EduError::config_validation(
                "auth.tokenTtlHours must be greater than 0",
                "Set auth.tokenTtlHours to at least 1 in your edubridge.json",
            ));
        }

        if !(4..=31).contains(&self.auth.bcrypt_cost) {
            return Err(EduError::config_validation(
                "auth.bcryptCost must be between 4 and 31",
                "Use the default bcryptCost of 10 unless you have measured otherwise",
            ));
        }

        self.mailer.validate()?;

        if self.storage.data_file.trim().is_empty() {
            return Err(EduError::config_validation(
                "storage.dataFile must not be empty",
                "Provide a path for the data snapshot in your edubridge.json",
            ));
        }

        if self.storage.autosave_seconds == 0 {
            return Err(EduError::config_validation(
                "storage.autosaveSeconds must be greater than 0",
                "Set storage.autosaveSeconds to at least 1 in your edubridge.json",
            ));
        }

        if self.public_url.trim().is_empty() {
            return Err(EduError::config_validation(
                "publicUrl must not be empty",
                "Set publicUrl to the address of the web client",
            ));
        }

        if let Some(admin) = &self.bootstrap_admin {
            if admin.email.trim().is_empty() || admin.name.trim().is_empty() {
                return Err(EduError::config_validation(
                    "bootstrapAdmin needs a name and an email",
                    "Fill in bootstrapAdmin.name and bootstrapAdmin.email or remove the section",
                ));
            }
            if admin.password.chars().count() < crate::accounts::MIN_PASSWORD_LEN {
                return Err(EduError::config_validation(
                    "bootstrapAdmin.password is too short",
                    "Use a password of at least 8 characters",
                ));
            }
        }

        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Token and password settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// HS256 signing secret for bearer tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Token lifetime in hours.
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u32,

    /// bcrypt work factor for password hashes.
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

/// Email back-end selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MailProvider {
    /// Log messages instead of sending them (default).
    #[default]
    Log,
    /// Keep messages in an in-process outbox.
    Memory,
    /// Send through the provider HTTP API.
    Http,
}

impl MailProvider {
    /// Parses a string into a `MailProvider`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "log" => Some(Self::Log),
            "memory" => Some(Self::Memory),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for MailProvider {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid mail provider '{s}': expected one of 'log', 'memory', 'http'"
            ))
        })
    }
}

impl Serialize for MailProvider {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Log => "log",
            Self::Memory => "memory",
            Self::Http => "http",
        };
        serializer.serialize_str(s)
    }
}

/// Email provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailerConfig {
    /// Which back-end delivers messages.
    #[serde(default)]
    pub provider: MailProvider,

    /// Provider send endpoint (required for `http`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Provider API key (required for `http`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sender address.
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Sender display name.
    #[serde(default = "default_from_name")]
    pub from_name: String,

    /// Shared secret expected in the `x-webhook-secret` header of tracking
    /// webhooks. Unset means the webhook is unauthenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,

    /// Per-request timeout for the provider API, in seconds.
    #[serde(default = "default_mail_timeout")]
    pub timeout_seconds: u32,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            provider: MailProvider::default(),
            endpoint: None,
            api_key: None,
            from_address: default_from_address(),
            from_name: default_from_name(),
            webhook_secret: None,
            timeout_seconds: default_mail_timeout(),
        }
    }
}

impl MailerConfig {
    fn validate(&self) -> Result<()> {
        if self.provider == MailProvider::Http {
            let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
            if missing(&self.endpoint) {
                return Err(EduError::config_validation(
                    "mailer.endpoint is required for the http provider",
                    "Set mailer.endpoint to your provider's send URL",
                ));
            }
            if missing(&self.api_key) {
                return Err(EduError::config_validation(
                    "mailer.apiKey is required for the http provider",
                    "Set mailer.apiKey to your provider API key",
                ));
            }
        }

        if !self.from_address.contains('@') {
            return Err(EduError::config_validation(
                format!("mailer.fromAddress '{}' is not an email address", self.from_address),
                "Set mailer.fromAddress to a verified sender address",
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(EduError::config_validation(
                "mailer.timeoutSeconds must be greater than 0",
                "Set mailer.timeoutSeconds to at least 1 in your edubridge.json",
            ));
        }

        Ok(())
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Path of the JSON snapshot.
    #[serde(default = "default_data_file")]
    pub data_file: String,

    /// How often a changed store is written, in seconds.
    #[serde(default = "default_autosave_seconds")]
    pub autosave_seconds: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            autosave_seconds: default_autosave_seconds(),
        }
    }
}

/// Admin account provisioned at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Initial password.
    #[serde(skip_serializing)]
    pub password: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert_eq!(config.auth.bcrypt_cost, 10);
        assert_eq!(config.mailer.provider, MailProvider::Log);
        assert_eq!(config.storage.data_file, ".edubridge/data.json");
        assert_eq!(config.storage.autosave_seconds, 5);
        assert!(config.bootstrap_admin.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.public_url, "http://localhost:5173");
        assert_eq!(config.server_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "server": {"port": 8081},
            "mailer": {
                "provider": "HTTP",
                "endpoint": "https://mail.test/send",
                "apiKey": "k",
                "webhookSecret": "hook"
            },
            "storage": {"autosaveSeconds": 30},
            "bootstrapAdmin": {"name": "Root", "email": "root@example.com", "password": "rootroot"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.mailer.provider, MailProvider::Http);
        assert_eq!(config.mailer.webhook_secret.as_deref(), Some("hook"));
        assert_eq!(config.mailer.from_name, "EduBridge");
        assert_eq!(config.storage.autosave_seconds, 30);
        assert_eq!(config.bootstrap_admin.unwrap().email, "root@example.com");
    }

    #[test]
    fn test_mail_provider_case_insensitive() {
        for (raw, expected) in [
            ("log", MailProvider::Log),
            ("Memory", MailProvider::Memory),
            ("HTTP", MailProvider::Http),
        ] {
            let json = format!(r#"{{"mailer": {{"provider": "{raw}"}}}}"#);
            let config: Config = serde_json::from_str(&json).unwrap();
            assert_eq!(config.mailer.provider, expected);
        }
    }

    #[test]
    fn test_invalid_mail_provider_error() {
        let json = r#"{"mailer": {"provider": "pigeon"}}"#;
        let err = serde_json::from_str::<Config>(json).unwrap_err().to_string();
        assert!(err.contains("invalid mail provider"));
        assert!(err.contains("pigeon"));
    }

    #[test]
    fn test_mail_provider_serialization() {
        assert_eq!(serde_json::to_string(&MailProvider::Http).unwrap(), "\"http\"");
        assert_eq!(serde_json::to_string(&MailProvider::Log).unwrap(), "\"log\"");
    }

    #[test]
    fn test_bootstrap_password_not_serialized() {
        let config = Config {
            bootstrap_admin: Some(BootstrapAdmin {
                name: "Root".to_string(),
                email: "root@example.com".to_string(),
                password: "supersecret".to_string(),
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("supersecret"));
    }

    #[test]
    fn test_config_validation_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;

        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, EduError::ConfigValidationError { message, .. } if message.contains("server.port")),
            "Expected ConfigValidationError about server.port, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_short_jwt_secret() {
        let mut config = Config::default();
        config.auth.jwt_secret = "short".to_string();

        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, EduError::ConfigValidationError { message, .. } if message.contains("jwtSecret")),
            "Expected ConfigValidationError about jwtSecret, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_bcrypt_cost_range() {
        let mut config = Config::default();
        config.auth.bcrypt_cost = 3;
        assert!(config.validate().is_err());

        config.auth.bcrypt_cost = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_http_provider_requires_endpoint_and_key() {
        let mut config = Config::default();
        config.mailer.provider = MailProvider::Http;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mailer.endpoint"));

        config.mailer.endpoint = Some("https://mail.test/send".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mailer.apiKey"));

        config.mailer.api_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_from_address() {
        let mut config = Config::default();
        config.mailer.from_address = "nobody".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fromAddress"));
    }

    #[test]
    fn test_config_validation_empty_data_file() {
        let mut config = Config::default();
        config.storage.data_file = "   ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.dataFile"));
    }

    #[test]
    fn test_config_validation_bootstrap_admin_password() {
        let mut config = Config::default();
        config.bootstrap_admin = Some(BootstrapAdmin {
            name: "Root".to_string(),
            email: "root@example.com".to_string(),
            password: "short".to_string(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bootstrapAdmin.password"));
    }

    #[test]
    fn test_load_from_file_valid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_edubridge_valid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"server": {"port": 4100}, "publicUrl": "https://app.test"}"#)
            .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.public_url, "https://app.test");
        assert_eq!(config.auth.token_ttl_hours, 24);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_edubridge_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, EduError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_edubridge_validation.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"storage": {"autosaveSeconds": 0}}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, EduError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/edubridge.json")).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.mailer.provider, MailProvider::Log);
    }

    #[test]
    fn test_load_from_dir_finds_config() {
        use std::io::Write;

        let dir = std::env::temp_dir().join("test_edubridge_dir");
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("edubridge.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"server": {"host": "0.0.0.0"}}"#).unwrap();

        let config = Config::load_from_dir(&dir).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{"server": {"port": 3001, "workers": 4}, "theme": "dark"}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.port, 3001);
    }
}
