//! Test that a filter returning a fresh node on every call cannot make the
//! engine process the node it replaced a second time, and that such a
//! filter still terminates.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::EngineConfig;
use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, Method, ops};
use crate::query::{
    QueryContext, QueryError, QueryExpressionContext, QueryExpressionVisitor, QueryRequest,
    QueryServices,
};
use crate::testing::{book, books};

/// Wraps every node it is shown in `Where(node, r => true)`, if `only_stubs`
/// is set only stubs.
fn wrapping_filter(
    services: QueryServices,
    calls: Arc<AtomicUsize>,
    only_stubs: bool,
) -> QueryServices {
    services.with_filter(move |context: &mut QueryExpressionContext<'_>| {
        let node = context.visited_node()?;
        node.ty().queryable_element()?;
        if only_stubs && !context.model_reference().is_some_and(|r| r.is_stub()) {
            return None;
        }
        calls.fetch_add(1, Ordering::SeqCst);
        let node = Expr::clone(node);
        Some(ops::where_(node, ops::lambda("r", book(), |_| Expr::bool(true))))
    })
}

#[test]
fn test_replaced_stub_is_filtered_once() {
    let test = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let services = wrapping_filter(test.store.services(), Arc::clone(&calls), true);
    let context = test.store.context(services);

    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&books()).expect("transform");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(rewritten.to_string(), "Where(table(Books), r => true)");
}

#[test]
fn test_filtered_request_still_executes() {
    let test = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let services = wrapping_filter(test.store.services(), Arc::clone(&calls), true);

    let result = test
        .execute_with(services, QueryRequest::new(ops::take(books(), 2)))
        .expect("execute");

    assert_eq!(ids(&result), ["1", "2"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wrapping_every_query_terminates() {
    let test = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let services = wrapping_filter(test.store.services(), Arc::clone(&calls), false);
    let context = test.store.context(services);

    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&ops::take(books(), 2)).expect("transform");

    // One wrapper per queryable node of the request.
    assert_eq!(
        rewritten.to_string(),
        "Where(Take(Where(table(Books), r => true), 2), r => true)"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_wrapping_every_query_still_executes() {
    let test = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let services = wrapping_filter(test.store.services(), Arc::clone(&calls), false);

    let result = test
        .execute_with(services, QueryRequest::new(ops::take(books(), 2)))
        .expect("execute");

    assert_eq!(ids(&result), ["1", "2"]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_rebuilt_node_is_filtered_once() {
    let test = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let services = test
        .store
        .services()
        .with_filter(move |context: &mut QueryExpressionContext<'_>| {
            let node = context.visited_node()?;
            if node.method() != Some(&Method::Take) {
                return None;
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let node = Expr::clone(node);
            Some(ops::where_(node, ops::lambda("r", book(), |_| Expr::bool(true))))
        });
    let context = test.store.context(services);

    // `Take` is rebuilt once its stub child is sourced; the filter sees the
    // rebuilt node and must not see it again inside its own replacement.
    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&ops::take(books(), 2)).expect("transform");

    assert_eq!(
        rewritten.to_string(),
        "Where(Take(table(Books), 2), r => true)"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_nesting_limit_still_applies() {
    let test = TestStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let services = wrapping_filter(test.store.services(), Arc::clone(&calls), false);
    let config = EngineConfig {
        max_visit_depth: 4,
        ..EngineConfig::default()
    };
    let context = QueryContext::with_config(
        Arc::clone(test.store.model()),
        Arc::new(services),
        Arc::new(config),
    );

    let mut visitor = QueryExpressionVisitor::new(&context);
    let error = visitor.transform(&ops::take(books(), 2)).unwrap_err();

    assert_eq!(error, QueryError::NestingTooDeep { limit: 4 });
}
