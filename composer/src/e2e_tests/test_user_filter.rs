//! Test that a user filter matching nothing is a legitimate empty result.

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ops};
use crate::model::TypeRef;
use crate::query::QueryRequest;
use crate::testing::{book, books};

#[test]
fn test_filter_without_match_is_empty() {
    let test = TestStore::new();

    let filtered = ops::where_(books(), title_is("NoSuchTitle"));
    let result = test.execute(QueryRequest::new(filtered)).expect("execute");

    assert!(result.is_empty());
    assert_eq!(result.result_collection.as_deref(), Some("Books"));
}

#[test]
fn test_filter_with_match() {
    let test = TestStore::new();

    let filtered = ops::where_(books(), title_is("Emma"));
    let result = test.execute(QueryRequest::new(filtered)).expect("execute");

    assert_eq!(ids(&result), ["2"]);
}

#[test]
fn test_key_and_title_filter_is_not_a_key_lookup() {
    let test = TestStore::new();

    let filtered = ops::where_(
        books(),
        ops::lambda("b", book(), |b| {
            ops::and(
                ops::eq(
                    Expr::member(Expr::clone(b), "Id", TypeRef::string()),
                    Expr::string("1"),
                ),
                ops::eq(
                    Expr::member(Expr::clone(b), "Title", TypeRef::string()),
                    Expr::string("Emma"),
                ),
            )
        }),
    );
    let result = test.execute(QueryRequest::new(filtered)).expect("execute");

    assert!(result.is_empty());
}
