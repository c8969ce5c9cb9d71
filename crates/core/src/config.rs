use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::sequence::DocumentPrefixes;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub business: BusinessConfig,
    pub seed: SeedConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct BusinessConfig {
    pub budget_prefix: String,
    pub sale_prefix: String,
    /// Offset of the business's wall clock from UTC; drives the sequence year.
    pub utc_offset_minutes: i32,
    pub budget_validity_days: u32,
    pub allow_negative_stock: bool,
    pub max_message_length: usize,
}

#[derive(Clone, Debug)]
pub struct SeedConfig {
    pub company_name: String,
    pub owner_chat_identity: Option<String>,
    pub owner_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub allow_negative_stock: Option<bool>,
    pub owner_chat_identity: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://data/gestflow.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 5000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            business: BusinessConfig {
                budget_prefix: "ORC".to_string(),
                sale_prefix: "VEN".to_string(),
                utc_offset_minutes: -180,
                budget_validity_days: 7,
                allow_negative_stock: false,
                max_message_length: 1500,
            },
            seed: SeedConfig {
                company_name: "GESTFLOW".to_string(),
                owner_chat_identity: None,
                owner_name: "Owner".to_string(),
            },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl BusinessConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn prefixes(&self) -> DocumentPrefixes {
        DocumentPrefixes { budget: self.budget_prefix.clone(), sale: self.sale_prefix.clone() }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("gestflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(business) = patch.business {
            if let Some(budget_prefix) = business.budget_prefix {
                self.business.budget_prefix = budget_prefix;
            }
            if let Some(sale_prefix) = business.sale_prefix {
                self.business.sale_prefix = sale_prefix;
            }
            if let Some(utc_offset_minutes) = business.utc_offset_minutes {
                self.business.utc_offset_minutes = utc_offset_minutes;
            }
            if let Some(budget_validity_days) = business.budget_validity_days {
                self.business.budget_validity_days = budget_validity_days;
            }
            if let Some(allow_negative_stock) = business.allow_negative_stock {
                self.business.allow_negative_stock = allow_negative_stock;
            }
            if let Some(max_message_length) = business.max_message_length {
                self.business.max_message_length = max_message_length;
            }
        }

        if let Some(seed) = patch.seed {
            if let Some(company_name) = seed.company_name {
                self.seed.company_name = company_name;
            }
            if let Some(owner_chat_identity) = seed.owner_chat_identity {
                self.seed.owner_chat_identity = Some(owner_chat_identity);
            }
            if let Some(owner_name) = seed.owner_name {
                self.seed.owner_name = owner_name;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("GESTFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("GESTFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("GESTFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("GESTFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("GESTFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("GESTFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("GESTFLOW_SERVER_PORT") {
            self.server.port = parse_env("GESTFLOW_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("GESTFLOW_LOGGING_LEVEL").or_else(|| read_env("GESTFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("GESTFLOW_LOGGING_FORMAT").or_else(|| read_env("GESTFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("GESTFLOW_BUDGET_PREFIX") {
            self.business.budget_prefix = value;
        }
        if let Some(value) = read_env("GESTFLOW_SALE_PREFIX") {
            self.business.sale_prefix = value;
        }
        if let Some(value) = read_env("GESTFLOW_UTC_OFFSET_MINUTES") {
            self.business.utc_offset_minutes = parse_env("GESTFLOW_UTC_OFFSET_MINUTES", &value)?;
        }
        if let Some(value) = read_env("GESTFLOW_BUDGET_VALIDITY_DAYS") {
            self.business.budget_validity_days =
                parse_env("GESTFLOW_BUDGET_VALIDITY_DAYS", &value)?;
        }
        if let Some(value) = read_env("GESTFLOW_ALLOW_NEGATIVE_STOCK") {
            self.business.allow_negative_stock =
                parse_env("GESTFLOW_ALLOW_NEGATIVE_STOCK", &value)?;
        }
        if let Some(value) = read_env("GESTFLOW_MAX_MESSAGE_LENGTH") {
            self.business.max_message_length = parse_env("GESTFLOW_MAX_MESSAGE_LENGTH", &value)?;
        }

        if let Some(value) = read_env("GESTFLOW_COMPANY_NAME") {
            self.seed.company_name = value;
        }
        if let Some(value) = read_env("GESTFLOW_OWNER_WHATSAPP") {
            self.seed.owner_chat_identity = Some(value);
        }
        if let Some(value) = read_env("GESTFLOW_OWNER_NAME") {
            self.seed.owner_name = value;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(allow_negative_stock) = overrides.allow_negative_stock {
            self.business.allow_negative_stock = allow_negative_stock;
        }
        if let Some(owner_chat_identity) = overrides.owner_chat_identity {
            self.seed.owner_chat_identity = Some(owner_chat_identity);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_business(&self.business)?;
        validate_seed(&self.seed)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("gestflow.toml"), PathBuf::from("config/gestflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_business(business: &BusinessConfig) -> Result<(), ConfigError> {
    for (key, prefix) in
        [("business.budget_prefix", &business.budget_prefix), ("business.sale_prefix", &business.sale_prefix)]
    {
        let valid = !prefix.is_empty() && prefix.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !valid {
            return Err(ConfigError::Validation(format!(
                "{key} must be a non-empty alphanumeric string"
            )));
        }
    }
    if business.budget_prefix.eq_ignore_ascii_case(&business.sale_prefix) {
        return Err(ConfigError::Validation(
            "business.budget_prefix and business.sale_prefix must differ".to_string(),
        ));
    }

    if business.utc_offset_minutes.abs() > 14 * 60 {
        return Err(ConfigError::Validation(
            "business.utc_offset_minutes must be within -840..=840".to_string(),
        ));
    }

    if business.max_message_length < 160 {
        return Err(ConfigError::Validation(
            "business.max_message_length must be at least 160 characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_seed(seed: &SeedConfig) -> Result<(), ConfigError> {
    if seed.company_name.trim().is_empty() {
        return Err(ConfigError::Validation("seed.company_name must not be empty".to_string()));
    }
    if let Some(identity) = &seed.owner_chat_identity {
        if identity.trim().is_empty() {
            return Err(ConfigError::Validation(
                "seed.owner_chat_identity must not be blank when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    business: Option<BusinessPatch>,
    seed: Option<SeedPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct BusinessPatch {
    budget_prefix: Option<String>,
    sale_prefix: Option<String>,
    utc_offset_minutes: Option<i32>,
    budget_validity_days: Option<u32>,
    allow_negative_stock: Option<bool>,
    max_message_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SeedPatch {
    company_name: Option<String>,
    owner_chat_identity: Option<String>,
    owner_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_match_business_conventions() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.business.budget_prefix == "ORC", "budget prefix defaults to ORC")?;
        ensure(config.business.sale_prefix == "VEN", "sale prefix defaults to VEN")?;
        ensure(config.business.budget_validity_days == 7, "budgets are valid for 7 days")?;
        ensure(config.business.max_message_length == 1500, "replies cap at 1500 chars")?;
        ensure(
            config.business.offset().local_minus_utc() == -3 * 3600,
            "default offset is UTC-3",
        )?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logs by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GESTFLOW_OWNER", "whatsapp:+5571999990000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("gestflow.toml");
            fs::write(
                &path,
                r#"
[seed]
company_name = "Loja Centro"
owner_chat_identity = "${TEST_GESTFLOW_OWNER}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.seed.company_name == "Loja Centro", "company name is read from file")?;
            ensure(
                config.seed.owner_chat_identity.as_deref() == Some("whatsapp:+5571999990000"),
                "owner identity should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_GESTFLOW_OWNER"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GESTFLOW_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("GESTFLOW_SALE_PREFIX", "SL");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("gestflow.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[business]
sale_prefix = "SF"
budget_validity_days = 15

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.business.sale_prefix == "SL", "env prefix should win over file")?;
            ensure(config.business.budget_validity_days == 15, "file value should beat default")
        })();

        clear_vars(&["GESTFLOW_DATABASE_URL", "GESTFLOW_SALE_PREFIX"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GESTFLOW_BUDGET_PREFIX", "VEN");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("must differ")
            );
            ensure(has_message, "validation failure should mention clashing prefixes")
        })();

        clear_vars(&["GESTFLOW_BUDGET_PREFIX"]);
        result
    }

    #[test]
    fn invalid_env_numbers_are_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("GESTFLOW_ALLOW_NEGATIVE_STOCK", "maybe");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "GESTFLOW_ALLOW_NEGATIVE_STOCK",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["GESTFLOW_ALLOW_NEGATIVE_STOCK"]);
        result
    }
}
