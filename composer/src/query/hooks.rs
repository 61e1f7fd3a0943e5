//! Extension points consulted while a query is composed and executed.
//!
//! Hooks are looked up through a `ServiceProvider` the first time a
//! traversal needs them. Any hook may be absent: a missing authorizer
//! allows everything, a missing expander or filter changes nothing, a
//! missing executor falls back to `DefaultQueryExecutor`. Only a missing
//! sourcer is an error, and only once a node actually needs sourcing.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::context::{QueryContext, QueryExpressionContext};
use super::error::QueryError;
use super::provider::{ComposableQuery, QueryProvider};
use super::types::{QueryResult, Value};
use crate::expr::Expr;
use crate::model::TypeRef;

/// Decides whether the node on top of the traversal may be queried.
pub trait QueryAuthorizer: Send + Sync {
    fn authorize(&self, context: &QueryExpressionContext<'_>) -> bool;
}

/// Rewrites a node that still names model data into a more primitive
/// expression. The replacement is visited again in full.
pub trait QueryExpander: Send + Sync {
    /// Return `None` (or the visited node itself) to leave it unchanged.
    fn expand(&self, context: &mut QueryExpressionContext<'_>) -> Option<Expr>;
}

/// Rewrites any node, e.g. to append a row-level security predicate. The
/// replacement is visited again in full.
pub trait QueryFilter: Send + Sync {
    fn filter(&self, context: &mut QueryExpressionContext<'_>) -> Option<Expr>;
}

/// Replaces a node that names model data with a provider-native expression.
pub trait QuerySourcer: Send + Sync {
    /// `embedded` is true when the base query has already been captured,
    /// i.e. the node is nested inside a query rather than its root.
    fn source(&self, context: &QueryExpressionContext<'_>, embedded: bool) -> Option<Expr>;
}

/// Materializes composed queries.
pub trait QueryExecutor: Send + Sync {
    /// Run a collection query, optionally counting rows before paging.
    fn execute_query<'a>(
        &'a self,
        context: &'a QueryContext,
        query: ComposableQuery,
        include_total_count: bool,
    ) -> BoxFuture<'a, Result<QueryResult, QueryError>>;

    /// Evaluate an expression that yields a single value of type `ty`.
    fn execute_scalar<'a>(
        &'a self,
        context: &'a QueryContext,
        provider: Arc<dyn QueryProvider>,
        expression: Expr,
        ty: TypeRef,
    ) -> BoxFuture<'a, Result<Value, QueryError>>;
}

/// Service lookup for hooks. Every getter defaults to "not registered".
pub trait ServiceProvider: Send + Sync {
    fn authorizer(&self) -> Option<Arc<dyn QueryAuthorizer>> {
        None
    }

    fn expander(&self) -> Option<Arc<dyn QueryExpander>> {
        None
    }

    fn filter(&self) -> Option<Arc<dyn QueryFilter>> {
        None
    }

    fn sourcer(&self) -> Option<Arc<dyn QuerySourcer>> {
        None
    }

    fn executor(&self) -> Option<Arc<dyn QueryExecutor>> {
        None
    }
}

/// A plain container of hook instances.
#[derive(Clone, Default)]
pub struct QueryServices {
    authorizer: Option<Arc<dyn QueryAuthorizer>>,
    expander: Option<Arc<dyn QueryExpander>>,
    filter: Option<Arc<dyn QueryFilter>>,
    sourcer: Option<Arc<dyn QuerySourcer>>,
    executor: Option<Arc<dyn QueryExecutor>>,
}

impl QueryServices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: impl QueryAuthorizer + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    #[must_use]
    pub fn with_expander(mut self, expander: impl QueryExpander + 'static) -> Self {
        self.expander = Some(Arc::new(expander));
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl QueryFilter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn with_sourcer(mut self, sourcer: impl QuerySourcer + 'static) -> Self {
        self.sourcer = Some(Arc::new(sourcer));
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: impl QueryExecutor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }
}

impl ServiceProvider for QueryServices {
    fn authorizer(&self) -> Option<Arc<dyn QueryAuthorizer>> {
        self.authorizer.as_ref().map(Arc::clone)
    }

    fn expander(&self) -> Option<Arc<dyn QueryExpander>> {
        self.expander.as_ref().map(Arc::clone)
    }

    fn filter(&self) -> Option<Arc<dyn QueryFilter>> {
        self.filter.as_ref().map(Arc::clone)
    }

    fn sourcer(&self) -> Option<Arc<dyn QuerySourcer>> {
        self.sourcer.as_ref().map(Arc::clone)
    }

    fn executor(&self) -> Option<Arc<dyn QueryExecutor>> {
        self.executor.as_ref().map(Arc::clone)
    }
}

impl fmt::Debug for QueryServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryServices")
            .field("authorizer", &self.authorizer.is_some())
            .field("expander", &self.expander.is_some())
            .field("filter", &self.filter.is_some())
            .field("sourcer", &self.sourcer.is_some())
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

impl<F> QueryAuthorizer for F
where
    F: Fn(&QueryExpressionContext<'_>) -> bool + Send + Sync,
{
    fn authorize(&self, context: &QueryExpressionContext<'_>) -> bool {
        self(context)
    }
}

impl<F> QueryExpander for F
where
    F: Fn(&mut QueryExpressionContext<'_>) -> Option<Expr> + Send + Sync,
{
    fn expand(&self, context: &mut QueryExpressionContext<'_>) -> Option<Expr> {
        self(context)
    }
}

impl<F> QueryFilter for F
where
    F: Fn(&mut QueryExpressionContext<'_>) -> Option<Expr> + Send + Sync,
{
    fn filter(&self, context: &mut QueryExpressionContext<'_>) -> Option<Expr> {
        self(context)
    }
}

impl<F> QuerySourcer for F
where
    F: Fn(&QueryExpressionContext<'_>, bool) -> Option<Expr> + Send + Sync,
{
    fn source(&self, context: &QueryExpressionContext<'_>, embedded: bool) -> Option<Expr> {
        self(context, embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bookstore_model;

    #[test]
    fn test_empty_services_resolve_nothing() {
        let services = QueryServices::new();
        assert!(services.authorizer().is_none());
        assert!(services.expander().is_none());
        assert!(services.filter().is_none());
        assert!(services.sourcer().is_none());
        assert!(services.executor().is_none());
    }

    #[test]
    fn test_closures_as_hooks() {
        let services = QueryServices::new()
            .with_authorizer(|_: &QueryExpressionContext<'_>| false)
            .with_filter(|_: &mut QueryExpressionContext<'_>| None::<Expr>);
        let context = QueryContext::new(Arc::new(bookstore_model()), Arc::new(services.clone()));
        let traversal = QueryExpressionContext::new(&context);

        let authorizer = services.authorizer().expect("authorizer registered");
        assert!(!authorizer.authorize(&traversal));
        assert!(services.filter().is_some());
        assert_eq!(
            format!("{services:?}"),
            "QueryServices { authorizer: true, expander: false, filter: true, sourcer: false, executor: false }"
        );
    }
}
