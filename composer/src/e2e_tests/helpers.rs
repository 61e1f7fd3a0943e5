//! Common helpers for end-to-end tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;

use crate::expr::{Expr, ops};
use crate::model::TypeRef;
use crate::query::{
    ComposableQuery, DefaultQueryExecutor, QueryContext, QueryError, QueryExecutor,
    QueryProvider, QueryRequest, QueryResult, QueryServices, Value, execute_query,
};
use crate::testing::{Bookstore, book, bookstore};

/// The bookstore plus a runtime to drive dispatch to completion.
pub struct TestStore {
    pub store: Bookstore,
    pub runtime: tokio::runtime::Runtime,
}

impl TestStore {
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
        Self {
            store: bookstore(),
            runtime,
        }
    }

    /// Execute with the default sourcer and expander.
    pub fn execute(&self, request: QueryRequest) -> Result<QueryResult, QueryError> {
        self.execute_with(self.store.services(), request)
    }

    /// Execute with the given services.
    pub fn execute_with(
        &self,
        services: QueryServices,
        request: QueryRequest,
    ) -> Result<QueryResult, QueryError> {
        let context = self.store.context(services);
        self.runtime.block_on(execute_query(&context, request))
    }
}

/// `b => b.Title == title`
#[must_use]
pub fn title_is(title: &str) -> Expr {
    ops::lambda("b", book(), |b| {
        ops::eq(
            Expr::member(Expr::clone(b), "Title", TypeRef::string()),
            Expr::string(title),
        )
    })
}

/// The `Id` of every entity row, in order.
#[must_use]
pub fn ids(result: &QueryResult) -> Vec<String> {
    result
        .results
        .iter()
        .filter_map(|row| match row.as_record()?.get("Id")? {
            Value::String(id) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

/// Counts every executor call before delegating to the default executor.
#[derive(Default)]
pub struct CountingExecutor {
    inner: DefaultQueryExecutor,
    calls: Arc<AtomicUsize>,
}

impl CountingExecutor {
    /// The executor and a handle on its call counter.
    #[must_use]
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let executor = Self::default();
        let calls = Arc::clone(&executor.calls);
        (executor, calls)
    }
}

impl QueryExecutor for CountingExecutor {
    fn execute_query<'a>(
        &'a self,
        context: &'a QueryContext,
        query: ComposableQuery,
        include_total_count: bool,
    ) -> BoxFuture<'a, Result<QueryResult, QueryError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_query(context, query, include_total_count)
    }

    fn execute_scalar<'a>(
        &'a self,
        context: &'a QueryContext,
        provider: Arc<dyn QueryProvider>,
        expression: Expr,
        ty: TypeRef,
    ) -> BoxFuture<'a, Result<Value, QueryError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute_scalar(context, provider, expression, ty)
    }
}
