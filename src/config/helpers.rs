//! Env-var parsing helpers shared by the config resolvers.

use crate::error::ConfigError;

/// Read an env var, treating unset and blank values as `None`.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Read and parse an env var, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(value) => value.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}

/// Read a boolean env var accepting `1/0`, `true/false`, `yes/no`.
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{other}'"),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_env_blank_is_none() {
        std::env::set_var("APIARY_TEST_BLANK", "   ");
        assert_eq!(optional_env("APIARY_TEST_BLANK").unwrap(), None);
        std::env::remove_var("APIARY_TEST_BLANK");
    }

    #[test]
    fn parse_optional_env_default_and_value() {
        assert_eq!(parse_optional_env("APIARY_TEST_UNSET", 42u32).unwrap(), 42);
        std::env::set_var("APIARY_TEST_NUM", "7");
        assert_eq!(parse_optional_env("APIARY_TEST_NUM", 42u32).unwrap(), 7);
        std::env::remove_var("APIARY_TEST_NUM");
    }

    #[test]
    fn parse_bool_env_accepts_common_spellings() {
        std::env::set_var("APIARY_TEST_BOOL", "yes");
        assert!(parse_bool_env("APIARY_TEST_BOOL", false).unwrap());
        std::env::set_var("APIARY_TEST_BOOL", "off");
        assert!(!parse_bool_env("APIARY_TEST_BOOL", true).unwrap());
        std::env::set_var("APIARY_TEST_BOOL", "maybe");
        assert!(parse_bool_env("APIARY_TEST_BOOL", true).is_err());
        std::env::remove_var("APIARY_TEST_BOOL");
    }
}
