//! Test that a count request always yields exactly one scalar.

use crate::e2e_tests::helpers::*;
use crate::expr::ops;
use crate::query::{QueryRequest, Value};
use crate::testing::{books, key_lookup};

#[test]
fn test_count_is_single_scalar() {
    let test = TestStore::new();

    let result = test
        .execute(QueryRequest::new(books()).count())
        .expect("execute");

    assert_eq!(result.results, vec![Value::Int(3)]);
    assert_eq!(result.total_count, None);
}

#[test]
fn test_count_ignores_total_count_request() {
    let test = TestStore::new();

    let request = QueryRequest::new(ops::skip(books(), 1))
        .count()
        .with_total_count();
    let result = test.execute(request).expect("execute");

    assert_eq!(result.results, vec![Value::Int(2)]);
    assert_eq!(result.total_count, None);
}

#[test]
fn test_count_of_missing_key_is_zero() {
    let test = TestStore::new();

    // Counting never disambiguates.
    let result = test
        .execute(QueryRequest::new(key_lookup("nonexistent-key")).count())
        .expect("execute");

    assert_eq!(result.results, vec![Value::Int(0)]);
}

#[test]
fn test_total_count_alongside_rows() {
    let test = TestStore::new();

    let request = QueryRequest::new(ops::take(ops::where_(books(), title_is("Dune")), 5))
        .with_total_count();
    let result = test.execute(request).expect("execute");

    assert_eq!(ids(&result), ["1"]);
    assert_eq!(result.total_count, Some(1));
}
