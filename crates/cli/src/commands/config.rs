use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use gestflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

/// Effective configuration with the source of every value.
pub fn run() -> CommandResult {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => CommandResult::success("config", render(&config)),
        Err(error) => CommandResult::failure(
            "config",
            "config_validation",
            format!("config validation failed: {error}"),
            EXIT_CONFIG,
        ),
    }
}

struct ConfigField {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key: &'static str, value: String, env_keys: &'static [&'static str]) -> ConfigField {
    ConfigField { key, value, env_keys }
}

pub fn render(config: &AppConfig) -> String {
    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let owner = config.seed.owner_chat_identity.as_deref().map(mask_identity);
    let fields = [
        field("database.url", config.database.url.clone(), &["GESTFLOW_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["GESTFLOW_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["GESTFLOW_DATABASE_TIMEOUT_SECS"],
        ),
        field("server.bind_address", config.server.bind_address.clone(), &["GESTFLOW_SERVER_BIND_ADDRESS"]),
        field("server.port", config.server.port.to_string(), &["GESTFLOW_SERVER_PORT"]),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["GESTFLOW_LOGGING_LEVEL", "GESTFLOW_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["GESTFLOW_LOGGING_FORMAT", "GESTFLOW_LOG_FORMAT"],
        ),
        field("business.budget_prefix", config.business.budget_prefix.clone(), &["GESTFLOW_BUDGET_PREFIX"]),
        field("business.sale_prefix", config.business.sale_prefix.clone(), &["GESTFLOW_SALE_PREFIX"]),
        field(
            "business.utc_offset_minutes",
            config.business.utc_offset_minutes.to_string(),
            &["GESTFLOW_UTC_OFFSET_MINUTES"],
        ),
        field(
            "business.budget_validity_days",
            config.business.budget_validity_days.to_string(),
            &["GESTFLOW_BUDGET_VALIDITY_DAYS"],
        ),
        field(
            "business.allow_negative_stock",
            config.business.allow_negative_stock.to_string(),
            &["GESTFLOW_ALLOW_NEGATIVE_STOCK"],
        ),
        field(
            "business.max_message_length",
            config.business.max_message_length.to_string(),
            &["GESTFLOW_MAX_MESSAGE_LENGTH"],
        ),
        field("seed.company_name", config.seed.company_name.clone(), &["GESTFLOW_COMPANY_NAME"]),
        field(
            "seed.owner_chat_identity",
            owner.unwrap_or_else(|| "<unset>".to_string()),
            &["GESTFLOW_OWNER_WHATSAPP"],
        ),
        field("seed.owner_name", config.seed.owner_name.clone(), &["GESTFLOW_OWNER_NAME"]),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for ConfigField { key, value, env_keys } in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["gestflow.toml", "config/gestflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the last four characters of a phone-like identity.
fn mask_identity(identity: &str) -> String {
    let chars: Vec<char> = identity.trim().chars().collect();
    if chars.len() <= 4 {
        return "<redacted>".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}
