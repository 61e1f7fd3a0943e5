//! Engine configuration module.
//!
//! This module provides configuration loading for the query composition
//! engine from environment variables.
//!
//! # Environment Variables
//!
//! - `COMPOSER_EXECUTOR_TIMEOUT_MS`: Executor timeout in milliseconds (default: none)
//! - `COMPOSER_MAX_VISIT_DEPTH`: Maximum traversal nesting (default: `256`)
//! - `COMPOSER_SHAPE_OPERATORS`: Comma-separated operators stripped before a
//!   key lookup is re-run (default: `Expand,Select,SelectMany,Take,Skip,OrderBy,OrderByDescending,ThenBy,ThenByDescending`)
//! - `COMPOSER_RESTRICTING_OPERATORS`: Comma-separated operators that may
//!   carry a key lookup (default: `Where`)
//!
//! # Invariants
//!
//! - `executor_timeout`, when set, is never zero
//! - `max_visit_depth` is always at least 1

use std::time::Duration;

use crate::expr::Method;

/// How empty collection results are told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisambiguationConfig {
    /// Operators that shape or page results without affecting existence.
    pub shape_operators: Vec<Method>,
    /// Operators whose predicate may be a key lookup.
    pub restricting_operators: Vec<Method>,
}

impl Default for DisambiguationConfig {
    fn default() -> Self {
        Self {
            shape_operators: vec![
                Method::Expand,
                Method::Select,
                Method::SelectMany,
                Method::Take,
                Method::Skip,
                Method::OrderBy,
                Method::OrderByDescending,
                Method::ThenBy,
                Method::ThenByDescending,
            ],
            restricting_operators: vec![Method::Where],
        }
    }
}

/// Engine configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`:
/// - `executor_timeout` is `None` or a positive duration
/// - `max_visit_depth` is positive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Abandon an executor call that takes longer than this.
    pub executor_timeout: Option<Duration>,
    /// Fail a traversal whose ancestor stack grows past this depth.
    pub max_visit_depth: usize,
    pub disambiguation: DisambiguationConfig,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor_timeout: None,
            max_visit_depth: Self::DEFAULT_MAX_VISIT_DEPTH,
            disambiguation: DisambiguationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default maximum traversal depth.
    pub const DEFAULT_MAX_VISIT_DEPTH: usize = 256;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `COMPOSER_EXECUTOR_TIMEOUT_MS` is not a positive integer
    /// - `COMPOSER_MAX_VISIT_DEPTH` is not a positive integer
    /// - an operator list names an unknown operator
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let executor_timeout = lookup("COMPOSER_EXECUTOR_TIMEOUT_MS")
            .map(|value| parse_positive("COMPOSER_EXECUTOR_TIMEOUT_MS", &value))
            .transpose()?
            .map(Duration::from_millis);

        let max_visit_depth = match lookup("COMPOSER_MAX_VISIT_DEPTH") {
            Some(value) => {
                let depth = parse_positive("COMPOSER_MAX_VISIT_DEPTH", &value)?;
                usize::try_from(depth).map_err(|_| ConfigError::InvalidValue {
                    name: "COMPOSER_MAX_VISIT_DEPTH".to_owned(),
                    message: format!("'{value}' is too large"),
                })?
            }
            None => defaults.max_visit_depth,
        };

        let shape_operators = match lookup("COMPOSER_SHAPE_OPERATORS") {
            Some(value) => parse_operators("COMPOSER_SHAPE_OPERATORS", &value)?,
            None => defaults.disambiguation.shape_operators,
        };
        let restricting_operators = match lookup("COMPOSER_RESTRICTING_OPERATORS") {
            Some(value) => parse_operators("COMPOSER_RESTRICTING_OPERATORS", &value)?,
            None => defaults.disambiguation.restricting_operators,
        };

        Ok(Self {
            executor_timeout,
            max_visit_depth,
            disambiguation: DisambiguationConfig {
                shape_operators,
                restricting_operators,
            },
        })
    }
}

fn parse_positive(name: &str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_owned(),
            message: format!("'{value}' is not a positive integer"),
        }),
    }
}

/// Parse a comma-separated operator list. Blank entries are ignored, so an
/// empty value yields an empty list.
fn parse_operators(name: &str, value: &str) -> Result<Vec<Method>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            Method::from_name(entry).ok_or_else(|| ConfigError::InvalidValue {
                name: name.to_owned(),
                message: format!("unknown operator '{entry}'"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = EngineConfig::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_visit_depth, 256);
        assert_eq!(config.executor_timeout, None);
        assert_eq!(config.disambiguation.restricting_operators, vec![Method::Where]);
        assert_eq!(config.disambiguation.shape_operators.len(), 9);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("COMPOSER_EXECUTOR_TIMEOUT_MS", "250"),
            ("COMPOSER_MAX_VISIT_DEPTH", "32"),
            ("COMPOSER_SHAPE_OPERATORS", "Take, Skip,"),
            ("COMPOSER_RESTRICTING_OPERATORS", ""),
        ]))
        .expect("valid config");

        assert_eq!(config.executor_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_visit_depth, 32);
        assert_eq!(
            config.disambiguation.shape_operators,
            vec![Method::Take, Method::Skip]
        );
        assert!(config.disambiguation.restricting_operators.is_empty());
    }

    #[test]
    fn test_invalid_timeout() {
        for bad in ["0", "-5", "soon"] {
            let error = EngineConfig::from_lookup(lookup(&[("COMPOSER_EXECUTOR_TIMEOUT_MS", bad)]))
                .unwrap_err();
            assert_eq!(
                error,
                ConfigError::InvalidValue {
                    name: "COMPOSER_EXECUTOR_TIMEOUT_MS".to_owned(),
                    message: format!("'{bad}' is not a positive integer"),
                }
            );
        }
    }

    #[test]
    fn test_unknown_operator() {
        let error = EngineConfig::from_lookup(lookup(&[("COMPOSER_SHAPE_OPERATORS", "Take,Paginate")]))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid value for COMPOSER_SHAPE_OPERATORS: unknown operator 'Paginate'"
        );
    }
}
