//! Test that hooks are looked up on first use only, once per traversal.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::e2e_tests::helpers::*;
use crate::expr::{Expr, ops};
use crate::query::{
    QueryAuthorizer, QueryContext, QueryExecutor, QueryExpander, QueryFilter, QueryRequest,
    QueryServices, QuerySourcer, ServiceProvider,
};
use crate::testing::key_lookup;

#[derive(Default)]
struct Lookups {
    authorizer: AtomicUsize,
    expander: AtomicUsize,
    filter: AtomicUsize,
    sourcer: AtomicUsize,
    executor: AtomicUsize,
}

struct CountingServices {
    inner: QueryServices,
    lookups: Arc<Lookups>,
}

impl ServiceProvider for CountingServices {
    fn authorizer(&self) -> Option<Arc<dyn QueryAuthorizer>> {
        self.lookups.authorizer.fetch_add(1, Ordering::SeqCst);
        self.inner.authorizer()
    }

    fn expander(&self) -> Option<Arc<dyn QueryExpander>> {
        self.lookups.expander.fetch_add(1, Ordering::SeqCst);
        self.inner.expander()
    }

    fn filter(&self) -> Option<Arc<dyn QueryFilter>> {
        self.lookups.filter.fetch_add(1, Ordering::SeqCst);
        self.inner.filter()
    }

    fn sourcer(&self) -> Option<Arc<dyn QuerySourcer>> {
        self.lookups.sourcer.fetch_add(1, Ordering::SeqCst);
        self.inner.sourcer()
    }

    fn executor(&self) -> Option<Arc<dyn QueryExecutor>> {
        self.lookups.executor.fetch_add(1, Ordering::SeqCst);
        self.inner.executor()
    }
}

fn execute(test: &TestStore, request: QueryRequest) -> Arc<Lookups> {
    let lookups = Arc::new(Lookups::default());
    let services = CountingServices {
        inner: test.store.services(),
        lookups: Arc::clone(&lookups),
    };
    let context = QueryContext::new(Arc::clone(test.store.model()), Arc::new(services));
    test.runtime
        .block_on(crate::query::execute_query(&context, request))
        .expect("execute");
    lookups
}

#[test]
fn test_every_hook_resolved_once() {
    let test = TestStore::new();

    let lookups = execute(&test, QueryRequest::new(key_lookup("1")));

    assert_eq!(lookups.authorizer.load(Ordering::SeqCst), 1);
    assert_eq!(lookups.expander.load(Ordering::SeqCst), 1);
    assert_eq!(lookups.filter.load(Ordering::SeqCst), 1);
    assert_eq!(lookups.sourcer.load(Ordering::SeqCst), 1);
    assert_eq!(lookups.executor.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unneeded_hooks_are_never_resolved() {
    let test = TestStore::new();

    // Nothing names model data, so nothing is expanded or sourced.
    let root = Expr::query(test.store.books_query());
    let lookups = execute(&test, QueryRequest::new(ops::take(root, 1)));

    assert_eq!(lookups.expander.load(Ordering::SeqCst), 0);
    assert_eq!(lookups.sourcer.load(Ordering::SeqCst), 0);
    assert_eq!(lookups.authorizer.load(Ordering::SeqCst), 1);
}
