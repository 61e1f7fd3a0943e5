//! Test that exactly one base query is captured, and that it is the first
//! concrete query reached.

use std::sync::{Arc, Mutex};

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ops};
use crate::query::{QueryExpressionContext, QueryExpressionVisitor, QueryRequest, QuerySourcer};
use crate::testing::{book, books, publishers_type};

#[test]
fn test_first_entity_set_becomes_base_query() {
    let test = TestStore::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&calls);
    let inner = test.store.sourcer();
    let services = test.store.services().with_sourcer(
        move |context: &QueryExpressionContext<'_>, embedded: bool| {
            let sourced = inner.source(context, embedded)?;
            if let Ok(mut calls) = recorder.lock() {
                calls.push((sourced.to_string(), embedded));
            }
            Some(sourced)
        },
    );
    let context = test.store.context(services);

    let query = ops::where_(
        books(),
        ops::lambda("b", book(), |_| {
            ops::any(ops::source(None, "Publishers", publishers_type()), None)
        }),
    );
    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&query).expect("transform");

    let base = visitor.base_query().expect("base query");
    assert_eq!(base.expression().to_string(), "table(Books)");
    assert_eq!(
        rewritten.to_string(),
        "Where(table(Books), b => Any(table(Publishers)))"
    );
    assert_eq!(
        *calls.lock().expect("lock"),
        vec![
            ("query(table(Books))".to_owned(), false),
            ("table(Publishers)".to_owned(), true),
        ]
    );
}

#[test]
fn test_concrete_root_is_captured_without_sourcer() {
    let test = TestStore::new();
    let services = crate::query::QueryServices::new();
    let context = test.store.context(services);

    let root = Expr::query(test.store.books_query());
    let query = ops::skip(Expr::clone(&root), 1);
    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&query).expect("transform");

    assert_eq!(rewritten.to_string(), "Skip(table(Books), 1)");
    assert!(visitor.base_query().is_some());
}

#[test]
fn test_base_query_runs_whole_request() {
    let test = TestStore::new();

    let query = ops::where_(
        books(),
        ops::lambda("b", book(), |_| {
            ops::any(ops::source(None, "Publishers", publishers_type()), None)
        }),
    );
    let result = test.execute(QueryRequest::new(query)).expect("execute");

    assert_eq!(ids(&result), ["1", "2", "3"]);
}
