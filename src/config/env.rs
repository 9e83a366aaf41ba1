//! `${VAR}` environment variable resolution for secret config values.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid pattern"));

/// Substitute every `${VAR}` occurrence in `input` with the value of the
/// corresponding environment variable.
///
/// # Errors
/// Returns [`ConfigError::UndefinedEnvVar`] naming the first variable that
/// is not set.
pub fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value = std::env::var(name).map_err(|_| ConfigError::UndefinedEnvVar(name.to_string()))?;
        result.push_str(&input[last_end..whole.start()]);
        result.push_str(&value);
        last_end = whole.end();
    }
    result.push_str(&input[last_end..]);

    Ok(result)
}
