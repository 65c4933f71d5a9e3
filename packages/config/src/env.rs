// ABOUTME: Environment variable parsing utilities
// ABOUTME: Provides helper functions for parsing and validating environment variables

use std::str::FromStr;

/// Parse an environment variable with a fallback default value
/// Returns the parsed value or the default if the variable is not set or cannot be parsed
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(var_name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse an environment variable with validation
/// Returns the parsed value if it passes validation, otherwise returns the default
/// Logs warnings when environment variables are set but fail validation or parsing
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.trim().parse::<T>() {
            Ok(parsed_value) => {
                if validator(parsed_value) {
                    parsed_value
                } else {
                    tracing::warn!(
                        "Environment variable {} has invalid value '{}', using default: {}",
                        var_name,
                        raw_value,
                        default
                    );
                    default
                }
            }
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        // Not set is the normal case
        Err(_) => default,
    }
}

/// Parse an environment variable with fallback to another variable
/// Tries the primary variable first, then falls back to the secondary, then to the default
pub fn parse_env_with_fallback<T>(primary_var: &str, fallback_var: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(primary_var)
        .or_else(|_| std::env::var(fallback_var))
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse a boolean flag. Accepts `true`/`false`, `1`/`0`, `yes`/`no` (case-insensitive).
pub fn parse_env_flag(var_name: &str, default: bool) -> bool {
    match std::env::var(var_name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                tracing::warn!(
                    "Environment variable {} has unparseable flag '{}', using default: {}",
                    var_name,
                    raw,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a string variable, treating an empty value as unset
pub fn parse_env_string(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a whitespace-separated variable into its words (e.g. a command line)
pub fn parse_env_words(var_name: &str) -> Option<Vec<String>> {
    parse_env_string(var_name).map(|v| v.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_env_or_default_not_set() {
        std::env::remove_var("HOSTBOX_TEST_VAR_NOT_SET");
        let result: i32 = parse_env_or_default("HOSTBOX_TEST_VAR_NOT_SET", 42);
        assert_eq!(result, 42);
    }

    #[test]
    #[serial]
    fn test_parse_env_or_default_set() {
        std::env::set_var("HOSTBOX_TEST_VAR_SET", " 100 ");
        let result: i32 = parse_env_or_default("HOSTBOX_TEST_VAR_SET", 42);
        assert_eq!(result, 100);
        std::env::remove_var("HOSTBOX_TEST_VAR_SET");
    }

    #[test]
    #[serial]
    fn test_parse_env_or_default_invalid() {
        std::env::set_var("HOSTBOX_TEST_VAR_INVALID", "not_a_number");
        let result: i32 = parse_env_or_default("HOSTBOX_TEST_VAR_INVALID", 42);
        assert_eq!(result, 42);
        std::env::remove_var("HOSTBOX_TEST_VAR_INVALID");
    }

    #[test]
    #[serial]
    fn test_parse_env_with_validation_fails() {
        std::env::set_var("HOSTBOX_TEST_VALIDATION_FAIL", "300");
        let result =
            parse_env_or_default_with_validation("HOSTBOX_TEST_VALIDATION_FAIL", 100, |v| {
                v > 0 && v <= 200
            });
        assert_eq!(result, 100);
        std::env::remove_var("HOSTBOX_TEST_VALIDATION_FAIL");
    }

    #[test]
    #[serial]
    fn test_parse_env_with_fallback_secondary() {
        std::env::remove_var("HOSTBOX_PRIMARY_VAR");
        std::env::set_var("HOSTBOX_FALLBACK_VAR", "200");
        let result: i32 = parse_env_with_fallback("HOSTBOX_PRIMARY_VAR", "HOSTBOX_FALLBACK_VAR", 42);
        assert_eq!(result, 200);
        std::env::remove_var("HOSTBOX_FALLBACK_VAR");
    }

    #[test]
    #[serial]
    fn test_parse_env_flag() {
        std::env::set_var("HOSTBOX_TEST_FLAG", "YES");
        assert!(parse_env_flag("HOSTBOX_TEST_FLAG", false));
        std::env::set_var("HOSTBOX_TEST_FLAG", "0");
        assert!(!parse_env_flag("HOSTBOX_TEST_FLAG", true));
        std::env::set_var("HOSTBOX_TEST_FLAG", "maybe");
        assert!(parse_env_flag("HOSTBOX_TEST_FLAG", true));
        std::env::remove_var("HOSTBOX_TEST_FLAG");
    }

    #[test]
    #[serial]
    fn test_parse_env_words() {
        std::env::set_var("HOSTBOX_TEST_WORDS", "  docker exec  nginx nginx -s reload ");
        assert_eq!(
            parse_env_words("HOSTBOX_TEST_WORDS"),
            Some(vec![
                "docker".to_string(),
                "exec".to_string(),
                "nginx".to_string(),
                "nginx".to_string(),
                "-s".to_string(),
                "reload".to_string(),
            ])
        );
        std::env::set_var("HOSTBOX_TEST_WORDS", "   ");
        assert_eq!(parse_env_words("HOSTBOX_TEST_WORDS"), None);
        std::env::remove_var("HOSTBOX_TEST_WORDS");
    }
}
