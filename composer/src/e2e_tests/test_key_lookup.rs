//! Test key lookups: a hit returns the entity, a miss is "not found" even
//! when paging and shaping operators surround the lookup.

use std::sync::atomic::Ordering;

use crate::e2e_tests::helpers::*;
use crate::expr::ops;
use crate::query::{QueryError, QueryRequest};
use crate::testing::key_lookup;

#[test]
fn test_key_lookup_hit() {
    let test = TestStore::new();

    let result = test.execute(QueryRequest::new(key_lookup("1"))).expect("execute");

    assert_eq!(ids(&result), ["1"]);
    assert_eq!(result.result_collection.as_deref(), Some("Books"));
}

#[test]
fn test_key_lookup_miss_is_not_found() {
    let test = TestStore::new();

    let error = test
        .execute(QueryRequest::new(key_lookup("nonexistent-key")))
        .unwrap_err();

    assert_eq!(error, QueryError::ResourceNotFound);
}

#[test]
fn test_shaped_key_lookup_miss_is_not_found() {
    let test = TestStore::new();

    let title = title_is("Dune");
    let shaped = ops::take(
        ops::order_by(ops::expand(key_lookup("nonexistent-key"), &["Chapters"]), title, false),
        1,
    );
    let error = test.execute(QueryRequest::new(shaped)).unwrap_err();

    assert_eq!(error, QueryError::ResourceNotFound);
}

#[test]
fn test_paged_past_existing_entity_is_empty() {
    let test = TestStore::new();
    let (executor, calls) = CountingExecutor::new();
    let services = test.store.services().with_executor(executor);

    let request = QueryRequest::new(ops::skip(key_lookup("1"), 1));
    let result = test.execute_with(services, request).expect("execute");

    assert!(result.is_empty());
    // The page, then the lookup without paging.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
