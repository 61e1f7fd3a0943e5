//! Test that without expanders and filters the output differs from the
//! input only where stubs were sourced.

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ExprKind, ops};
use crate::model::TypeRef;
use crate::query::{QueryExpressionVisitor, QueryServices};
use crate::testing::{book, books};

#[test]
fn test_only_stub_leaves_change() {
    let test = TestStore::new();
    let services = QueryServices::new().with_sourcer(test.store.sourcer());
    let context = test.store.context(services);

    let predicate = title_is("Dune");
    let pages = ops::lambda("b", book(), |b| {
        Expr::member(Expr::clone(b), "Pages", TypeRef::int64())
    });
    let query = ops::take(
        ops::order_by(
            ops::where_(books(), Expr::clone(&predicate)),
            Expr::clone(&pages),
            true,
        ),
        2,
    );

    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&query).expect("transform");

    assert_eq!(
        rewritten.to_string(),
        query.to_string().replace("$Books", "table(Books)")
    );

    // Stub-free subtrees come back as the very same nodes.
    let ExprKind::Call { args: ordered, .. } = rewritten.kind() else {
        panic!("expected Take");
    };
    let ExprKind::Call { args: filtered, .. } = ordered[0].kind() else {
        panic!("expected OrderBy");
    };
    assert!(filtered[1].ptr_eq(&pages));
    assert!(filtered[0].args()[1].ptr_eq(&predicate));
}

#[test]
fn test_tree_without_stubs_is_returned_as_is() {
    let test = TestStore::new();
    let context = test.store.context(QueryServices::new());

    let root = Expr::query(test.store.books_query());
    let mut visitor = QueryExpressionVisitor::new(&context);
    let rewritten = visitor.transform(&root).expect("transform");

    // The root constant is replaced by the expression of the query it holds.
    assert!(rewritten.ptr_eq(base_expression(&visitor)));
}

fn base_expression<'v>(visitor: &'v QueryExpressionVisitor<'_>) -> &'v Expr {
    visitor.base_query().expect("base query").expression()
}
