//! Provider-native composable queries.

use std::fmt;
use std::sync::Arc;

use super::error::ProviderError;
use super::types::Value;
use crate::expr::Expr;
use crate::model::TypeRef;

/// A backing data source that can evaluate rewritten expressions.
pub trait QueryProvider: Send + Sync + fmt::Debug {
    /// Evaluate `expression`. Sequences come back as `Value::Collection`.
    fn execute(&self, expression: &Expr) -> Result<Value, ProviderError>;
}

/// A concrete query: an expression bound to the provider that runs it.
#[derive(Clone)]
pub struct ComposableQuery {
    provider: Arc<dyn QueryProvider>,
    expression: Expr,
    element_type: TypeRef,
}

impl ComposableQuery {
    #[must_use]
    pub fn new(provider: Arc<dyn QueryProvider>, expression: Expr, element_type: TypeRef) -> Self {
        Self {
            provider,
            expression,
            element_type,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn QueryProvider> {
        &self.provider
    }

    /// The provider-native expression this query denotes.
    #[must_use]
    pub const fn expression(&self) -> &Expr {
        &self.expression
    }

    #[must_use]
    pub const fn element_type(&self) -> &TypeRef {
        &self.element_type
    }

    /// A new query on the same provider.
    #[must_use]
    pub fn with_expression(&self, expression: Expr, element_type: TypeRef) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            expression,
            element_type,
        }
    }

    pub fn execute(&self) -> Result<Value, ProviderError> {
        self.provider.execute(&self.expression)
    }
}

impl fmt::Debug for ComposableQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposableQuery")
            .field("expression", &self.expression.to_string())
            .field("element_type", &self.element_type)
            .finish_non_exhaustive()
    }
}
