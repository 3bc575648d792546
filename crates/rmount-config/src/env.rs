use regex::{Captures, Regex};
use std::env;

use crate::ConfigError;

const ENV_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable; every
/// missing variable is reported in a single error.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(ENV_PATTERN)
        .map_err(|e| ConfigError::InvalidConfig(format!("env pattern: {}", e)))?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |cap: &Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m| m == var_name) {
                    missing.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        env::set_var("RMOUNT_TEST_VAR", "hello");
        env::set_var("RMOUNT_ANOTHER_VAR", "world");

        let input = "prefix ${RMOUNT_TEST_VAR} middle ${RMOUNT_ANOTHER_VAR} suffix";
        let result = interpolate_env(input).unwrap();
        assert_eq!(result, "prefix hello middle world suffix");
    }

    #[test]
    fn test_interpolate_env_missing() {
        let input = "prefix ${MISSING_VAR_12345} suffix";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["MISSING_VAR_12345"]);
            }
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_multiple_missing_reported_once() {
        let input = "${MISSING_ONE_12345} and ${MISSING_TWO_12345} and ${MISSING_ONE_12345}";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["MISSING_ONE_12345", "MISSING_TWO_12345"]);
            }
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_no_vars() {
        assert_eq!(interpolate_env("no variables here").unwrap(), "no variables here");
        assert_eq!(interpolate_env("").unwrap(), "");
    }

    #[test]
    fn test_interpolate_env_adjacent_and_repeated() {
        env::set_var("RMOUNT_VAR_A", "hello");
        env::set_var("RMOUNT_VAR_B", "world");
        let input = "${RMOUNT_VAR_A}${RMOUNT_VAR_B} ${RMOUNT_VAR_A}";
        assert_eq!(interpolate_env(input).unwrap(), "helloworld hello");
    }

    #[test]
    fn test_interpolate_env_partial_syntax_not_matched() {
        assert_eq!(
            interpolate_env("not a $VAR variable").unwrap(),
            "not a $VAR variable"
        );
        assert_eq!(
            interpolate_env("not a ${VAR variable").unwrap(),
            "not a ${VAR variable"
        );
    }

    #[test]
    fn test_interpolate_env_value_not_reexpanded() {
        env::set_var("RMOUNT_SPECIAL_VAR", "value with ${OTHER}");
        let result = interpolate_env("${RMOUNT_SPECIAL_VAR}").unwrap();
        assert_eq!(result, "value with ${OTHER}");
    }

    #[test]
    fn test_interpolate_env_in_yaml_context() {
        env::set_var("RMOUNT_YAML_ROOT", "/data/files");
        let result = interpolate_env("root: ${RMOUNT_YAML_ROOT}/subdir").unwrap();
        assert_eq!(result, "root: /data/files/subdir");
    }
}
