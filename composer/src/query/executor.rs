//! Result dispatch.
//!
//! `execute_query` composes a request, picks the collection or the scalar
//! path from the static type of the composed expression, and runs it on
//! the registered `QueryExecutor` (or `DefaultQueryExecutor`).
//!
//! An empty collection result is checked once more: if the query was a key
//! lookup, the lookup is re-run without paging and shaping, and an empty
//! answer becomes `QueryError::ResourceNotFound`. Any other empty result is
//! returned as is.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::context::QueryContext;
use super::engine::QueryExpressionVisitor;
use super::error::{ProviderError, QueryError};
use super::hooks::QueryExecutor;
use super::provider::{ComposableQuery, QueryProvider};
use super::types::{QueryRequest, QueryResult, Value};
use crate::config::DisambiguationConfig;
use crate::expr::{BinaryOp, Constant, Expr, ExprKind, Method, ops};
use crate::model::{DataModel, TypeRef};

/// Compose `request` and materialize its result.
///
/// Post-conditions: with `should_return_count` the result holds exactly one
/// integer and no total count; otherwise a composable result holds its
/// rows and a non-composable one holds its single value.
pub async fn execute_query(
    context: &QueryContext,
    request: QueryRequest,
) -> Result<QueryResult, QueryError> {
    let (expression, base_query, result_collection) = {
        let mut visitor = QueryExpressionVisitor::new(context);
        let (expression, base_query) = visitor.compose(request.expression())?;
        let result_collection = visitor.result_collection().map(Arc::clone);
        (expression, base_query, result_collection)
    };

    let executor = context
        .services()
        .executor()
        .unwrap_or_else(|| Arc::new(DefaultQueryExecutor));
    let timeout = context.config().executor_timeout;

    let element = expression.ty().queryable_element().cloned();
    let mut result = match element {
        Some(element) if !request.should_return_count => {
            let query = base_query.with_expression(expression, element);
            let result = with_timeout(
                timeout,
                executor.execute_query(context, query.clone(), request.include_total_count),
            )
            .await?;
            if result.is_empty() {
                disambiguate(context, executor.as_ref(), &query, result).await?
            } else {
                result
            }
        }
        _ => {
            let (expression, ty) = if request.should_return_count {
                (ops::long_count(expression), TypeRef::int64())
            } else {
                let ty = expression.ty().clone();
                (expression, ty)
            };
            let provider = Arc::clone(base_query.provider());
            let value = with_timeout(
                timeout,
                executor.execute_scalar(context, provider, expression, ty),
            )
            .await?;
            QueryResult::scalar(value)
        }
    };

    result.result_collection = result_collection;
    info!(
        rows = result.len(),
        total_count = ?result.total_count,
        result_collection = ?result.result_collection,
        "query dispatched"
    );
    Ok(result)
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    future: BoxFuture<'_, Result<T, QueryError>>,
) -> Result<T, QueryError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.unwrap_or_else(|_| {
            warn!(?limit, "query executor timed out");
            Err(QueryError::Timeout(limit))
        }),
        None => future.await,
    }
}

/// Tell a missing entity apart from a filter that matched nothing.
async fn disambiguate(
    context: &QueryContext,
    executor: &dyn QueryExecutor,
    query: &ComposableQuery,
    empty: QueryResult,
) -> Result<QueryResult, QueryError> {
    let config = &context.config().disambiguation;
    let (lookup, stripped) = strip_shape_operators(query.expression(), config);

    let Some(method) = lookup.method() else {
        return Ok(empty);
    };
    if !config.restricting_operators.contains(method) {
        return Ok(empty);
    }
    let Some(key_values) = key_lookup_literals(context.model(), lookup) else {
        return Ok(empty);
    };

    let exists = if stripped {
        let element = lookup
            .ty()
            .queryable_element()
            .cloned()
            .unwrap_or_else(|| query.element_type().clone());
        let sub_query = query.with_expression(Expr::clone(lookup), element);
        debug!(lookup = %lookup, "re-running key lookup without shaping");
        let found = with_timeout(
            context.config().executor_timeout,
            executor.execute_query(context, sub_query, false),
        )
        .await?;
        !found.is_empty()
    } else {
        false
    };

    let null_key = key_values
        .iter()
        .any(|value| matches!(value, Constant::Null));
    if exists || null_key {
        return Ok(empty);
    }

    warn!(lookup = %lookup, "key lookup found no entity");
    Err(QueryError::ResourceNotFound)
}

/// Peel shape operators off the top of the operator chain.
///
/// Returns the first non-shape node and whether anything was removed.
fn strip_shape_operators<'e>(
    expression: &'e Expr,
    config: &DisambiguationConfig,
) -> (&'e Expr, bool) {
    let mut current = expression;
    let mut stripped = false;
    while let Some(method) = current.method() {
        if !config.shape_operators.contains(method) {
            break;
        }
        let Some(source) = current.args().first() else {
            break;
        };
        current = source;
        stripped = true;
    }
    (current, stripped)
}

/// If `call` restricts its source to one entity by key, the literal compared
/// against each key property.
///
/// The predicate must be a conjunction of `param.Key == literal` tests that
/// covers every key property exactly once and nothing else.
fn key_lookup_literals(model: &DataModel, call: &Expr) -> Option<Vec<Constant>> {
    let ExprKind::Lambda { params, body } = call.args().get(1)?.kind() else {
        return None;
    };
    let [param] = params.as_slice() else {
        return None;
    };
    let type_name = param.ty().structured_name()?;
    let key = model.key_properties(type_name);
    if key.is_empty() {
        return None;
    }

    let mut terms = Vec::new();
    conjuncts(body, &mut terms);
    if terms.len() != key.len() {
        return None;
    }

    let mut literals: Vec<Option<Constant>> = vec![None; key.len()];
    for term in terms {
        let (name, literal) = key_equality(param, term)?;
        let slot = key.iter().position(|k| k.as_str() == name)?;
        if literals[slot].is_some() {
            return None;
        }
        literals[slot] = Some(literal);
    }
    literals.into_iter().collect()
}

fn conjuncts<'e>(expression: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expression.kind() {
        ExprKind::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            conjuncts(left, out);
            conjuncts(right, out);
        }
        _ => out.push(expression),
    }
}

/// `param.Name == literal` in either order.
fn key_equality<'e>(param: &Expr, term: &'e Expr) -> Option<(&'e str, Constant)> {
    let ExprKind::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = term.kind()
    else {
        return None;
    };
    let side = |member: &'e Expr, literal: &'e Expr| -> Option<(&'e str, Constant)> {
        let ExprKind::Member {
            target,
            name,
            cast: None,
        } = member.kind()
        else {
            return None;
        };
        if !target.ptr_eq(param) {
            return None;
        }
        let constant = literal.as_constant().filter(|c| c.is_literal())?;
        Some((name.as_ref(), constant.clone()))
    };
    side(left, right).or_else(|| side(right, left))
}

/// Remove paging, ordering and shaping from the top of a collection query so
/// it can be counted.
#[must_use]
pub fn strip_paging(expression: &Expr) -> Expr {
    let mut current = expression;
    while let Some(method) = current.method() {
        let pageless = matches!(
            method,
            Method::Skip
                | Method::Take
                | Method::OrderBy
                | Method::OrderByDescending
                | Method::ThenBy
                | Method::ThenByDescending
                | Method::Expand
                | Method::Select
        );
        let Some(source) = current.args().first().filter(|_| pageless) else {
            break;
        };
        current = source;
    }
    Expr::clone(current)
}

/// Runs queries directly on their provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueryExecutor;

impl QueryExecutor for DefaultQueryExecutor {
    fn execute_query<'a>(
        &'a self,
        _context: &'a QueryContext,
        query: ComposableQuery,
        include_total_count: bool,
    ) -> BoxFuture<'a, Result<QueryResult, QueryError>> {
        run_collection(query, include_total_count).boxed()
    }

    fn execute_scalar<'a>(
        &'a self,
        _context: &'a QueryContext,
        provider: Arc<dyn QueryProvider>,
        expression: Expr,
        ty: TypeRef,
    ) -> BoxFuture<'a, Result<Value, QueryError>> {
        run_scalar(provider, expression, ty).boxed()
    }
}

async fn run_collection(
    query: ComposableQuery,
    include_total_count: bool,
) -> Result<QueryResult, QueryError> {
    let rows = query.execute()?.into_rows();

    let total_count = if include_total_count {
        let counted = ops::long_count(strip_paging(query.expression()));
        let count = query.provider().execute(&counted)?;
        let Some(count) = count.as_int() else {
            return Err(QueryError::Provider(ProviderError::Evaluation(format!(
                "count produced {count}"
            ))));
        };
        Some(count)
    } else {
        None
    };

    debug!(rows = rows.len(), ?total_count, "executed collection query");
    Ok(QueryResult::new(rows, total_count))
}

async fn run_scalar(
    provider: Arc<dyn QueryProvider>,
    expression: Expr,
    ty: TypeRef,
) -> Result<Value, QueryError> {
    let value = provider.execute(&expression)?;
    debug!(ty = %ty, value = %value, "executed scalar query");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::EngineConfig;
    use crate::query::hooks::{QueryServices, ServiceProvider};
    use crate::testing::{book, books, bookstore, key_lookup};

    /// Counts collection executions before delegating to the default.
    #[derive(Default)]
    struct CountingExecutor {
        queries: AtomicUsize,
    }

    impl QueryExecutor for CountingExecutor {
        fn execute_query<'a>(
            &'a self,
            _context: &'a QueryContext,
            query: ComposableQuery,
            include_total_count: bool,
        ) -> BoxFuture<'a, Result<QueryResult, QueryError>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            run_collection(query, include_total_count).boxed()
        }

        fn execute_scalar<'a>(
            &'a self,
            _context: &'a QueryContext,
            provider: Arc<dyn QueryProvider>,
            expression: Expr,
            ty: TypeRef,
        ) -> BoxFuture<'a, Result<Value, QueryError>> {
            run_scalar(provider, expression, ty).boxed()
        }
    }

    struct SlowExecutor;

    impl QueryExecutor for SlowExecutor {
        fn execute_query<'a>(
            &'a self,
            _context: &'a QueryContext,
            _query: ComposableQuery,
            _include_total_count: bool,
        ) -> BoxFuture<'a, Result<QueryResult, QueryError>> {
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(QueryResult::default())
            }
            .boxed()
        }

        fn execute_scalar<'a>(
            &'a self,
            _context: &'a QueryContext,
            _provider: Arc<dyn QueryProvider>,
            _expression: Expr,
            _ty: TypeRef,
        ) -> BoxFuture<'a, Result<Value, QueryError>> {
            async { Ok(Value::Null) }.boxed()
        }
    }

    fn title_is(title: &str) -> Expr {
        ops::lambda("b", book(), |b| {
            ops::eq(
                Expr::member(Expr::clone(b), "Title", TypeRef::string()),
                Expr::string(title),
            )
        })
    }

    #[tokio::test]
    async fn test_collection_path() {
        let store = bookstore();
        let context = store.context(store.services());

        let result = execute_query(&context, QueryRequest::new(books()))
            .await
            .expect("execute");

        assert_eq!(result.len(), 3);
        assert_eq!(result.total_count, None);
        assert_eq!(result.result_collection, None);
    }

    #[tokio::test]
    async fn test_total_count_ignores_paging() {
        let store = bookstore();
        let context = store.context(store.services());

        let request = QueryRequest::new(ops::take(books(), 2)).with_total_count();
        let result = execute_query(&context, request).await.expect("execute");

        assert_eq!(result.len(), 2);
        assert_eq!(result.total_count, Some(3));
        assert_eq!(result.result_collection.as_deref(), Some("Books"));
    }

    #[tokio::test]
    async fn test_count_returns_single_scalar() {
        let store = bookstore();
        let context = store.context(store.services());

        let request = QueryRequest::new(ops::take(books(), 2))
            .count()
            .with_total_count();
        let result = execute_query(&context, request).await.expect("execute");

        assert_eq!(result.results, vec![Value::Int(2)]);
        assert_eq!(result.total_count, None);
    }

    #[tokio::test]
    async fn test_singleton_takes_scalar_path() {
        let store = bookstore();
        let context = store.context(store.services());

        let featured = ops::source(None, "Featured", book());
        let result = execute_query(&context, QueryRequest::new(featured))
            .await
            .expect("execute");

        assert_eq!(result.len(), 1);
        let record = result.results[0].as_record().expect("entity");
        assert_eq!(record.get("Title"), Some(&Value::from("Dune")));
    }

    #[tokio::test]
    async fn test_key_lookup_miss_is_not_found() {
        let store = bookstore();
        let executor = Arc::new(CountingExecutor::default());
        let services = store.services().with_executor(ArcExecutor(Arc::clone(&executor)));
        let context = store.context(services);

        let error = execute_query(&context, QueryRequest::new(key_lookup("missing")))
            .await
            .unwrap_err();

        assert_eq!(error, QueryError::ResourceNotFound);
        // Nothing was stripped, so the empty result is reused.
        assert_eq!(executor.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_paged_past_existing_entity_is_empty() {
        let store = bookstore();
        let executor = Arc::new(CountingExecutor::default());
        let services = store.services().with_executor(ArcExecutor(Arc::clone(&executor)));
        let context = store.context(services);

        let request = QueryRequest::new(ops::skip(key_lookup("1"), 1));
        let result = execute_query(&context, request).await.expect("execute");

        assert!(result.is_empty());
        assert_eq!(executor.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shaped_key_lookup_miss_is_not_found() {
        let store = bookstore();
        let context = store.context(store.services());

        let shaped = ops::expand(ops::take(key_lookup("missing"), 1), &["Chapters"]);
        let error = execute_query(&context, QueryRequest::new(shaped))
            .await
            .unwrap_err();
        assert_eq!(error, QueryError::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_user_filter_miss_is_empty() {
        let store = bookstore();
        let context = store.context(store.services());

        let filtered = ops::where_(books(), title_is("No Such Title"));
        let result = execute_query(&context, QueryRequest::new(filtered))
            .await
            .expect("execute");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_null_key_literal_is_empty() {
        let store = bookstore();
        let context = store.context(store.services());

        let lookup = ops::where_(
            books(),
            ops::lambda("b", book(), |b| {
                ops::eq(
                    Expr::member(Expr::clone(b), "Id", TypeRef::string()),
                    Expr::null(TypeRef::string()),
                )
            }),
        );
        let result = execute_query(&context, QueryRequest::new(lookup))
            .await
            .expect("execute");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_restricting_operators_are_configurable() {
        let store = bookstore();
        let mut config = EngineConfig::default();
        config.disambiguation.restricting_operators.clear();
        let context = QueryContext::with_config(
            Arc::clone(store.model()),
            Arc::new(store.services()),
            Arc::new(config),
        );

        let result = execute_query(&context, QueryRequest::new(key_lookup("missing")))
            .await
            .expect("execute");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_executor_timeout() {
        let store = bookstore();
        let config = EngineConfig {
            executor_timeout: Some(Duration::from_millis(10)),
            ..EngineConfig::default()
        };
        let context = QueryContext::with_config(
            Arc::clone(store.model()),
            Arc::new(store.services().with_executor(SlowExecutor)),
            Arc::new(config),
        );

        let error = execute_query(&context, QueryRequest::new(books()))
            .await
            .unwrap_err();
        assert_eq!(error, QueryError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_composition_errors_skip_execution() {
        let store = bookstore();
        let executor = Arc::new(CountingExecutor::default());
        let services = QueryServices::new().with_executor(ArcExecutor(Arc::clone(&executor)));
        assert!(services.sourcer().is_none());
        let context = store.context(services);

        let error = execute_query(&context, QueryRequest::new(books()))
            .await
            .unwrap_err();
        assert_eq!(error, QueryError::MissingSourcer);
        assert_eq!(executor.queries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_key_lookup_literals() {
        let store = bookstore();
        let model = store.model();

        let lookup = key_lookup("7");
        let literals = key_lookup_literals(model, &lookup).expect("key lookup");
        assert!(matches!(literals.as_slice(), [Constant::String(id)] if &**id == "7"));

        let by_title = ops::where_(books(), title_is("Dune"));
        assert!(key_lookup_literals(model, &by_title).is_none());

        let with_extra = ops::where_(
            books(),
            ops::lambda("b", book(), |b| {
                ops::and(
                    ops::eq(
                        Expr::member(Expr::clone(b), "Id", TypeRef::string()),
                        Expr::string("1"),
                    ),
                    ops::eq(
                        Expr::member(Expr::clone(b), "Title", TypeRef::string()),
                        Expr::string("Dune"),
                    ),
                )
            }),
        );
        assert!(key_lookup_literals(model, &with_extra).is_none());
    }

    #[test]
    fn test_strip_paging() {
        let paged = ops::skip(ops::take(key_lookup("1"), 5), 2);
        assert_eq!(
            strip_paging(&paged).to_string(),
            "Where($Books, b => (b.Id == '1'))"
        );
    }

    /// Lets a test keep a handle on a registered executor.
    struct ArcExecutor(Arc<CountingExecutor>);

    impl QueryExecutor for ArcExecutor {
        fn execute_query<'a>(
            &'a self,
            context: &'a QueryContext,
            query: ComposableQuery,
            include_total_count: bool,
        ) -> BoxFuture<'a, Result<QueryResult, QueryError>> {
            self.0.execute_query(context, query, include_total_count)
        }

        fn execute_scalar<'a>(
            &'a self,
            context: &'a QueryContext,
            provider: Arc<dyn QueryProvider>,
            expression: Expr,
            ty: TypeRef,
        ) -> BoxFuture<'a, Result<Value, QueryError>> {
            self.0.execute_scalar(context, provider, expression, ty)
        }
    }
}
