//! Test that a subtree shared by several parents keeps one model reference
//! and is rewritten consistently.

use std::sync::{Arc, Mutex};

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ExprId, ExprKind, ops};
use crate::query::{ModelReference, QueryExpressionContext, QueryRequest};
use crate::testing::books;

#[test]
fn test_shared_predicate_keeps_reference() {
    let test = TestStore::new();

    let predicate = title_is("Dune");
    let ExprKind::Lambda { body, .. } = predicate.kind() else {
        panic!("expected lambda");
    };
    let ExprKind::Binary { left: title, .. } = body.kind() else {
        panic!("expected comparison");
    };
    let title_id = title.id();

    let seen: Arc<Mutex<Vec<(ExprId, Arc<ModelReference>)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let services = test
        .store
        .services()
        .with_authorizer(move |context: &QueryExpressionContext<'_>| {
            if let (Some(node), Some(reference)) =
                (context.visited_node(), context.model_reference())
            {
                if let Ok(mut seen) = recorder.lock() {
                    seen.push((node.id(), reference));
                }
            }
            true
        });

    // The same predicate instance filters twice.
    let query = ops::where_(
        ops::where_(books(), Expr::clone(&predicate)),
        Expr::clone(&predicate),
    );
    let result = test
        .execute_with(services, QueryRequest::new(query))
        .expect("execute");
    assert_eq!(ids(&result), ["1"]);

    let seen = seen.lock().expect("lock");
    let references: Vec<_> = seen
        .iter()
        .filter(|(id, _)| *id == title_id)
        .map(|(_, reference)| Arc::clone(reference))
        .collect();
    assert_eq!(references.len(), 2);
    assert_eq!(references[0], references[1]);
    assert!(Arc::ptr_eq(&references[0], &references[1]));
}
