//! Config utils.

use std::collections::HashMap;
use std::str::FromStr;

use crate::core::error::ConfigError;

/// Parses config value string, which consists of two parts - name and options.
/// Example: Constant[cpu=0.8] parts are name Constant and options string "cpu=0.8".
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
///
/// # Examples
///
/// ```rust
/// use dslab_provisioning::core::config::options::parse_options;
///
/// let options = parse_options("cpu=0.8,path=trace.csv");
/// assert_eq!(options.get("cpu").unwrap(), "0.8");
/// assert_eq!(options.get("path").unwrap(), "trace.csv");
/// assert_eq!(options.get("ram"), None);
/// ```
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

/// Returns the parsed value of option or `default` if the option is absent.
pub fn parse_option_or<T: FromStr>(options: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError> {
    match options.get(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::BadOption {
            option: name.to_string(),
            raw: raw.clone(),
        }),
        None => Ok(default),
    }
}
