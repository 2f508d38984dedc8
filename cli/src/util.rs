use std::io::Read;
use std::path::{Path, PathBuf};

use dosegate_core::config::LayerConfig;
use serde_json::json;

/// Exit codes: 0=success, 1=client error, 2=server error,
///             3=connection error, 4=usage error
pub const EXIT_OK: i32 = 0;
pub const EXIT_CLIENT_ERROR: i32 = 1;
pub const EXIT_SERVER_ERROR: i32 = 2;
pub const EXIT_CONNECTION_ERROR: i32 = 3;
pub const EXIT_USAGE_ERROR: i32 = 4;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

fn print_error(error: &str, message: &str, docs_hint: Option<&str>) {
    let mut err = json!({
        "error": error,
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string())
    );
}

/// Print a structured usage error and return its exit code.
pub fn usage_error(message: &str, docs_hint: Option<&str>) -> i32 {
    print_error("cli_error", message, docs_hint);
    EXIT_USAGE_ERROR
}

/// Print a structured input error (rejected proposal) and return its exit code.
pub fn client_error(message: &str, field: Option<&str>) -> i32 {
    let mut err = json!({
        "error": dosegate_core::error::codes::VALIDATION_FAILED,
        "message": message
    });
    if let Some(field) = field {
        err["field"] = json!(field);
    }
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string())
    );
    EXIT_CLIENT_ERROR
}

pub fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(formatted) => {
            println!("{formatted}");
            EXIT_OK
        }
        Err(e) => usage_error(&format!("Failed to serialize output: {e}"), None),
    }
}

pub fn config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dosegate");
    config_dir.join("config.json")
}

/// Effective configuration (priority order):
/// 1. DOSEGATE_* env vars
/// 2. explicit --config file, else ~/.config/dosegate/config.json when present
/// 3. built-in defaults
pub fn load_config(file: Option<&Path>) -> Result<LayerConfig, String> {
    let default_path = config_path();
    let path = match file {
        Some(path) => Some(path.to_path_buf()),
        None => default_path.exists().then_some(default_path),
    };

    let mut config = match &path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config '{}': {e}", path.display()))?;
            serde_json::from_str::<LayerConfig>(&raw)
                .map_err(|e| format!("Invalid config '{}': {e}", path.display()))?
        }
        None => LayerConfig::default(),
    };

    config
        .apply_overrides(|key| std::env::var(key).ok())
        .map_err(|e| e.to_string())?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, String> {
    let raw = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("Failed to read stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}

/// GET an API path, print the response body, exit with structured code.
pub async fn api_get(api_url: &str, path: &str) -> i32 {
    let url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(u) => u,
        Err(e) => return usage_error(&format!("Invalid URL: {api_url}{path}: {e}"), None),
    };

    let resp = match client().get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            print_error(
                "connection_error",
                &format!("{e}"),
                Some("Is the API server running? Check DOSEGATE_API_URL."),
            );
            return EXIT_CONNECTION_ERROR;
        }
    };

    let exit_code = match resp.status().as_u16() {
        200..=299 => EXIT_OK,
        400..=499 => EXIT_CLIENT_ERROR,
        _ => EXIT_SERVER_ERROR,
    };

    let body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    let formatted = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());

    if exit_code == EXIT_OK {
        println!("{formatted}");
    } else {
        eprintln!("{formatted}");
    }
    exit_code
}
