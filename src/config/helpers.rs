//! Environment lookup helpers shared by the config sections.

use std::time::Duration;

use crate::error::ConfigError;

/// Read an env var, treating empty as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

/// Parse an env var, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

pub(crate) fn parse_string_env(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or_else(|| default.to_string()))
}

/// Accepts true/false, 1/0, yes/no, on/off.
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        None => Ok(default),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{v}'"),
            }),
        },
    }
}

pub(crate) fn parse_secs_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(parse_optional_env(
        key,
        default.as_secs(),
    )?))
}

pub(crate) fn parse_millis_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_millis(parse_optional_env(
        key,
        default.as_millis() as u64,
    )?))
}

/// Reject a value with a message, keyed by its env var.
pub(crate) fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ENV_LOCK;
    use super::*;

    #[test]
    fn optional_env_returns_none_for_missing_and_empty() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_TEST_CAL_MISSING") };
        assert!(optional_env("_TEST_CAL_MISSING").unwrap().is_none());

        unsafe { std::env::set_var("_TEST_CAL_EMPTY", "") };
        assert!(optional_env("_TEST_CAL_EMPTY").unwrap().is_none());
        unsafe { std::env::remove_var("_TEST_CAL_EMPTY") };
    }

    #[test]
    fn parse_optional_env_parses_or_defaults() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_TEST_CAL_PARSE") };
        let v: u64 = parse_optional_env("_TEST_CAL_PARSE", 999).unwrap();
        assert_eq!(v, 999);

        unsafe { std::env::set_var("_TEST_CAL_PARSE", "42") };
        let v: u64 = parse_optional_env("_TEST_CAL_PARSE", 0).unwrap();
        assert_eq!(v, 42);

        unsafe { std::env::set_var("_TEST_CAL_PARSE", "forty-two") };
        let err = parse_optional_env::<u64>("_TEST_CAL_PARSE", 0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        unsafe { std::env::remove_var("_TEST_CAL_PARSE") };
    }

    #[test]
    fn parse_bool_env_accepts_common_spellings() {
        let _lock = ENV_LOCK.lock();
        for (raw, expected) in [("on", true), ("0", false), ("YES", true), ("false", false)] {
            unsafe { std::env::set_var("_TEST_CAL_BOOL", raw) };
            assert_eq!(parse_bool_env("_TEST_CAL_BOOL", !expected).unwrap(), expected);
        }
        unsafe { std::env::set_var("_TEST_CAL_BOOL", "maybe") };
        assert!(parse_bool_env("_TEST_CAL_BOOL", true).is_err());
        unsafe { std::env::remove_var("_TEST_CAL_BOOL") };
    }
}
