//! Errors raised while composing or executing a query.
//!
//! Every variant is fatal for the request it occurs in: the traversal is
//! abandoned and nothing is executed or returned partially.

use std::fmt;
use std::time::Duration;

use crate::model::TypeRef;

/// The extension point that broke its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Expander,
    Filter,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expander => f.write_str("expander"),
            Self::Filter => f.write_str("filter"),
        }
    }
}

/// Why the first concrete node of a traversal could not serve as its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootExpressionError {
    /// The node is not a constant.
    NotConstant,
    /// The node is a constant, but not a composable query.
    NotQueryable,
}

/// Error returned by a query provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider cannot evaluate this expression shape.
    Unsupported(String),
    /// Evaluation failed, e.g. an unknown table or a type mismatch.
    Evaluation(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported expression: {what}"),
            Self::Evaluation(message) => write!(f, "evaluation failed: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors that can occur during query composition and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The authorizer rejected a node.
    AuthorizationFailed,
    /// An expander or filter returned a node of an incompatible type.
    ContractViolation {
        hook: HookKind,
        expected: TypeRef,
        actual: TypeRef,
    },
    /// A node still denotes model data and no sourcer is registered.
    MissingSourcer,
    /// The sourcer returned nothing for a node that needs sourcing.
    SourcerMissingResult,
    /// The first concrete node was not a composable query constant.
    InvalidRootExpression(RootExpressionError),
    /// A traversal finished without capturing a base query.
    MissingBaseQuery,
    /// A key lookup addressed an entity that does not exist.
    ResourceNotFound,
    /// An expression shape nothing downstream can handle.
    UnsupportedExpression(String),
    /// Hook replacements kept nesting past the configured depth.
    NestingTooDeep { limit: usize },
    /// The backing provider failed.
    Provider(ProviderError),
    /// The executor did not finish in time.
    Timeout(Duration),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizationFailed => f.write_str("query authorization failed"),
            Self::ContractViolation {
                hook,
                expected,
                actual,
            } => write!(
                f,
                "{hook} changed expression type from {expected} to incompatible {actual}"
            ),
            Self::MissingSourcer => f.write_str("no query sourcer is available"),
            Self::SourcerMissingResult => f.write_str("query sourcer returned no expression"),
            Self::InvalidRootExpression(RootExpressionError::NotConstant) => {
                f.write_str("original expression should be a constant")
            }
            Self::InvalidRootExpression(RootExpressionError::NotQueryable) => {
                f.write_str("original expression should be a queryable constant")
            }
            Self::MissingBaseQuery => f.write_str("composed query has no base query"),
            Self::ResourceNotFound => f.write_str("resource not found"),
            Self::UnsupportedExpression(what) => write!(f, "unsupported expression: {what}"),
            Self::NestingTooDeep { limit } => {
                write!(f, "expression nesting exceeded {limit} levels")
            }
            Self::Provider(e) => write!(f, "provider error: {e}"),
            Self::Timeout(after) => write!(f, "query execution timed out after {after:?}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProviderError> for QueryError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unsupported(what) => Self::UnsupportedExpression(what),
            other @ ProviderError::Evaluation(_) => Self::Provider(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let error = QueryError::ContractViolation {
            hook: HookKind::Filter,
            expected: TypeRef::queryable(TypeRef::structured("Book")),
            actual: TypeRef::string(),
        };
        assert_eq!(
            error.to_string(),
            "filter changed expression type from Queryable<Book> to incompatible String"
        );
        assert_eq!(
            QueryError::InvalidRootExpression(RootExpressionError::NotQueryable).to_string(),
            "original expression should be a queryable constant"
        );
        assert_eq!(
            QueryError::MissingBaseQuery.to_string(),
            "composed query has no base query"
        );
    }

    #[test]
    fn test_provider_error_conversion() {
        let unsupported: QueryError = ProviderError::Unsupported("stub".to_owned()).into();
        assert_eq!(unsupported, QueryError::UnsupportedExpression("stub".to_owned()));

        let failed: QueryError = ProviderError::Evaluation("boom".to_owned()).into();
        assert!(matches!(failed, QueryError::Provider(_)));
        assert!(std::error::Error::source(&failed).is_some());
    }
}
