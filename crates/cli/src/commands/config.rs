use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use orderly_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let callers = config
        .auth
        .callers
        .iter()
        .map(|caller| format!("{}:{}", caller.user_id, redact_token(caller.token.expose_secret())))
        .collect::<Vec<_>>()
        .join(", ");
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: String, env_keys: &[&str]| {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    };

    push("database.url", config.database.url.clone(), &["ORDERLY_DATABASE_URL"]);
    push(
        "database.max_connections",
        config.database.max_connections.to_string(),
        &["ORDERLY_DATABASE_MAX_CONNECTIONS"],
    );
    push(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        &["ORDERLY_DATABASE_TIMEOUT_SECS"],
    );
    push("llm.provider", format!("{:?}", config.llm.provider), &["ORDERLY_LLM_PROVIDER"]);
    push("llm.model", config.llm.model.clone(), &["ORDERLY_LLM_MODEL"]);
    push(
        "llm.base_url",
        config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        &["ORDERLY_LLM_BASE_URL"],
    );
    push("llm.api_key", llm_api_key.to_string(), &["ORDERLY_LLM_API_KEY"]);
    push("llm.temperature", config.llm.temperature.to_string(), &["ORDERLY_LLM_TEMPERATURE"]);
    push("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["ORDERLY_LLM_TIMEOUT_SECS"]);
    push(
        "agent.max_iterations",
        config.agent.max_iterations.to_string(),
        &["ORDERLY_AGENT_MAX_ITERATIONS"],
    );
    push(
        "agent.run_timeout_secs",
        config.agent.run_timeout_secs.to_string(),
        &["ORDERLY_AGENT_RUN_TIMEOUT_SECS"],
    );
    push("agent.ranker", format!("{:?}", config.agent.ranker), &["ORDERLY_AGENT_RANKER"]);
    push(
        "server.bind_address",
        config.server.bind_address.clone(),
        &["ORDERLY_SERVER_BIND_ADDRESS"],
    );
    push("server.port", config.server.port.to_string(), &["ORDERLY_SERVER_PORT"]);
    push(
        "server.graceful_shutdown_secs",
        config.server.graceful_shutdown_secs.to_string(),
        &["ORDERLY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
    );
    push("auth.callers", callers, &["ORDERLY_AUTH_TOKENS"]);
    push(
        "logging.level",
        config.logging.level.clone(),
        &["ORDERLY_LOGGING_LEVEL", "ORDERLY_LOG_LEVEL"],
    );
    push(
        "logging.format",
        format!("{:?}", config.logging.format),
        &["ORDERLY_LOGGING_FORMAT", "ORDERLY_LOG_FORMAT"],
    );

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["orderly.toml", "config/orderly.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
