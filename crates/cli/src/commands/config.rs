use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cirrus_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let command_timeout = config
        .executor
        .command_timeout_secs
        .map(|secs| secs.to_string())
        .unwrap_or_else(|| "<unbounded>".to_string());
    let prompts_directory = config
        .prompts
        .directory
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<builtin>".to_string());

    let entries: Vec<(&str, &str, String)> = vec![
        ("database.url", "CIRRUS_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "CIRRUS_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        ("database.timeout_secs", "CIRRUS_DATABASE_TIMEOUT_SECS", config.database.timeout_secs.to_string()),
        ("llm.provider", "CIRRUS_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        ("llm.model", "CIRRUS_LLM_MODEL", config.llm.model.clone()),
        (
            "llm.base_url",
            "CIRRUS_LLM_BASE_URL",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        ("llm.api_key", "CIRRUS_LLM_API_KEY", llm_api_key.to_string()),
        ("llm.timeout_secs", "CIRRUS_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        ("llm.max_tokens", "CIRRUS_LLM_MAX_TOKENS", config.llm.max_tokens.to_string()),
        (
            "executor.provider_binary",
            "CIRRUS_EXECUTOR_PROVIDER_BINARY",
            config.executor.provider_binary.clone(),
        ),
        (
            "executor.default_profile",
            "CIRRUS_EXECUTOR_DEFAULT_PROFILE",
            config.executor.default_profile.clone(),
        ),
        ("executor.command_timeout_secs", "CIRRUS_EXECUTOR_COMMAND_TIMEOUT_SECS", command_timeout),
        ("prompts.directory", "CIRRUS_PROMPTS_DIRECTORY", prompts_directory),
        ("server.bind_address", "CIRRUS_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        ("server.port", "CIRRUS_SERVER_PORT", config.server.port.to_string()),
        (
            "server.graceful_shutdown_secs",
            "CIRRUS_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        ("logging.level", "CIRRUS_LOGGING_LEVEL", config.logging.level.clone()),
        ("logging.format", "CIRRUS_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .into_iter()
            .map(|(key_path, env_key, value)| render_line(key_path, &value, source(key_path, env_key))),
    );
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["cirrus.toml", "config/cirrus.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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
