//! Test that an expander returning an incompatible node fails the request.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ops};
use crate::query::{
    HookKind, ModelReference, QueryError, QueryExpressionContext, QueryRequest, Value,
};
use crate::testing::{book, publisher};

#[test]
fn test_singleton_for_property_is_rejected() {
    let test = TestStore::new();
    let filtered = Arc::new(AtomicUsize::new(0));
    let filter_calls = Arc::clone(&filtered);

    let services = test
        .store
        .services()
        .with_expander(|context: &mut QueryExpressionContext<'_>| {
            let reference = context.model_reference()?;
            if !matches!(reference.target(), ModelReference::Property(_)) {
                return None;
            }
            Some(ops::source(None, "Featured", book()))
        })
        .with_filter(move |_: &mut QueryExpressionContext<'_>| {
            filter_calls.fetch_add(1, Ordering::SeqCst);
            None::<Expr>
        });

    let featured = ops::source(None, "Featured", book());
    let request = QueryRequest::new(ops::source_property(featured, "Publisher", publisher()));
    let error = test.execute_with(services, request).unwrap_err();

    assert_eq!(
        error,
        QueryError::ContractViolation {
            hook: HookKind::Expander,
            expected: publisher(),
            actual: book(),
        }
    );
    assert_eq!(filtered.load(Ordering::SeqCst), 0);
}

#[test]
fn test_property_navigation_through_singleton() {
    let test = TestStore::new();

    let featured = ops::source(None, "Featured", book());
    let request = QueryRequest::new(ops::source_property(featured, "Publisher", publisher()));
    let result = test.execute(request).expect("execute");

    assert_eq!(result.len(), 1);
    let record = result.results[0].as_record().expect("publisher");
    assert_eq!(record.type_name, "Publisher");
    assert_eq!(record.get("Name"), Some(&Value::from("Chilton")));
}
