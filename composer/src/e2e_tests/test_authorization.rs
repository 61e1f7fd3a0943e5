//! Test that a rejected node aborts the request before any hook touches it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::e2e_tests::helpers::*;
use crate::expr::Expr;
use crate::query::{
    QueryError, QueryExpressionContext, QueryRequest, QuerySourcer,
};
use crate::testing::key_lookup;

#[test]
fn test_rejected_collection_is_never_sourced_or_executed() {
    let test = TestStore::new();
    let (executor, executed) = CountingExecutor::new();

    let sourced = Arc::new(AtomicUsize::new(0));
    let sourcer_calls = Arc::clone(&sourced);
    let inner = test.store.sourcer();

    let filtered = Arc::new(AtomicUsize::new(0));
    let filter_calls = Arc::clone(&filtered);

    let services = test
        .store
        .services()
        .with_authorizer(|context: &QueryExpressionContext<'_>| {
            context
                .model_reference()
                .and_then(|reference| reference.containing_collection())
                .is_none()
        })
        .with_sourcer(move |context: &QueryExpressionContext<'_>, embedded: bool| {
            sourcer_calls.fetch_add(1, Ordering::SeqCst);
            inner.source(context, embedded)
        })
        .with_filter(move |_: &mut QueryExpressionContext<'_>| {
            filter_calls.fetch_add(1, Ordering::SeqCst);
            None::<Expr>
        })
        .with_executor(executor);

    let error = test
        .execute_with(services, QueryRequest::new(key_lookup("1")))
        .unwrap_err();

    assert_eq!(error, QueryError::AuthorizationFailed);
    assert_eq!(sourced.load(Ordering::SeqCst), 0);
    assert_eq!(filtered.load(Ordering::SeqCst), 0);
    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_permissive_authorizer_changes_nothing() {
    let test = TestStore::new();
    let services = test
        .store
        .services()
        .with_authorizer(|_: &QueryExpressionContext<'_>| true);

    let result = test
        .execute_with(services, QueryRequest::new(key_lookup("2")))
        .expect("execute");

    assert_eq!(ids(&result), ["2"]);
}
