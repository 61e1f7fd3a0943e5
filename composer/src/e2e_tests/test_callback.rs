//! Test that the callback a hook leaves behind runs once, after its
//! replacement has been visited.

use std::sync::{Arc, Mutex};

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ops};
use crate::query::{
    ModelReference, QueryExpressionContext, QueryRequest, QuerySourcer,
};
use crate::testing::{book, books};

#[test]
fn test_callback_runs_after_nested_visit() {
    let test = TestStore::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let source_log = Arc::clone(&log);
    let inner = test.store.sourcer();
    let expand_log = Arc::clone(&log);

    let services = test
        .store
        .services()
        .with_sourcer(move |context: &QueryExpressionContext<'_>, embedded: bool| {
            if let Ok(mut log) = source_log.lock() {
                log.push("source");
            }
            inner.source(context, embedded)
        })
        .with_expander(move |context: &mut QueryExpressionContext<'_>| {
            let reference = context.model_reference()?;
            let ModelReference::Root(root) = reference.target() else {
                return None;
            };
            if root.name() != "Featured" {
                return None;
            }
            let log = Arc::clone(&expand_log);
            context.set_after_nested_visit_callback(Box::new(move || {
                if let Ok(mut log) = log.lock() {
                    log.push("callback");
                }
            }));
            Some(ops::first_or_default(ops::where_(books(), title_is("Dune"))))
        });

    let featured = ops::source(None, "Featured", book());
    let result = test
        .execute_with(services, QueryRequest::new(featured))
        .expect("execute");

    assert_eq!(result.len(), 1);
    assert_eq!(*log.lock().expect("lock"), vec!["source", "callback"]);
}

#[test]
fn test_filter_callback_fires_once() {
    let test = TestStore::new();
    let fired = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&fired);

    let services = test
        .store
        .services()
        .with_filter(move |context: &mut QueryExpressionContext<'_>| {
            let reference = context.model_reference()?;
            if !reference.is_stub() {
                return None;
            }
            let counter = Arc::clone(&counter);
            context.set_after_nested_visit_callback(Box::new(move || {
                if let Ok(mut fired) = counter.lock() {
                    *fired += 1;
                }
            }));
            let node = Expr::clone(context.visited_node()?);
            Some(ops::where_(node, title_is("Emma")))
        });

    let result = test
        .execute_with(services, QueryRequest::new(books()))
        .expect("execute");

    assert_eq!(ids(&result), ["2"]);
    assert_eq!(*fired.lock().expect("lock"), 1);
}
