//! Fns to read variables from the environment more conveniently, and the
//! shared config the collection binaries run with.

use std::env;
use std::path::PathBuf;

use lazy_static::lazy_static;
use tracing::debug;

const SECRET_LOG_BLACKLIST: [&str; 2] = ["ETHERSCAN_API_KEY", "DEEPDAO_API_KEY"];

lazy_static! {
    pub static ref ENV_CONFIG: EnvConfig = get_env_config();
}

fn obfuscate_if_secret(blacklist: &[&str], key: &str, value: &str) -> String {
    if blacklist.contains(&key) {
        let mut last_four = value.to_string();
        last_four.drain(0..value.len().saturating_sub(4));
        format!("****{last_four}")
    } else {
        value.to_string()
    }
}

/// Get an environment variable, encoding found or missing as Option, and panic otherwise.
pub fn get_env_var(key: &str) -> Option<String> {
    let var = match env::var(key) {
        Err(env::VarError::NotPresent) => None,
        Err(e) => panic!("{e}"),
        Ok(var) => Some(var),
    };

    if let Some(ref existing_var) = var {
        let output = obfuscate_if_secret(&SECRET_LOG_BLACKLIST, key, existing_var);
        debug!("env var {key}: {output}");
    } else {
        debug!("env var {key} requested but not found")
    };

    var
}

pub fn get_env_bool(key: &str) -> Option<bool> {
    get_env_var(key).map(|var| match var.to_lowercase().as_str() {
        "true" => true,
        "false" => false,
        "t" => true,
        "f" => false,
        "1" => true,
        "0" => false,
        str => panic!("invalid bool value {str} for {key}"),
    })
}

pub struct EnvConfig {
    /// Where datasets and checkpoints land.
    pub data_dir: PathBuf,
    // API keys are optional, only the binaries that talk to the keyed APIs
    // insist on them.
    pub deepdao_api_key: Option<String>,
    pub etherscan_api_key: Option<String>,
    pub log_json: bool,
    pub log_perf: bool,
}

pub fn get_env_config() -> EnvConfig {
    EnvConfig {
        data_dir: get_env_var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(crate::paginate::DEFAULT_DATA_DIR)),
        deepdao_api_key: get_env_var("DEEPDAO_API_KEY"),
        etherscan_api_key: get_env_var("ETHERSCAN_API_KEY"),
        log_json: get_env_bool("LOG_JSON").unwrap_or(false),
        log_perf: get_env_bool("LOG_PERF").unwrap_or(false),
    }
}
