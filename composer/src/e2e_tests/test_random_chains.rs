//! Randomized operator chains over `Books`.
//!
//! For every seed a random chain is composed and dispatched. The composed
//! expression must equal the input with the one stub sourced, the sourcer
//! must run exactly once, and execution must succeed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::e2e_tests::helpers::*;
use crate::expr::{BinaryOp, Expr, ops};
use crate::model::TypeRef;
use crate::query::{QueryExpressionContext, QueryExpressionVisitor, QueryRequest, QuerySourcer};
use crate::testing::{book, books};

const TITLES: [&str; 4] = ["Dune", "Emma", "Neuromancer", "Nothing"];

/// Generator for random operator chains.
struct ChainGen {
    rng: StdRng,
}

impl ChainGen {
    fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn title_predicate(&mut self) -> Expr {
        let title = TITLES[self.rng.random_range(0..TITLES.len())];
        title_is(title)
    }

    fn pages_predicate(&mut self) -> Expr {
        let limit = self.rng.random_range(200..500);
        ops::lambda("b", book(), |b| {
            Expr::binary(
                BinaryOp::Gt,
                Expr::member(Expr::clone(b), "Pages", TypeRef::int64()),
                Expr::int(limit),
            )
        })
    }

    fn key(&mut self) -> Expr {
        let property = if self.rng.random_bool(0.5) {
            ("Title", TypeRef::string())
        } else {
            ("Pages", TypeRef::int64())
        };
        ops::lambda("b", book(), |b| {
            Expr::member(Expr::clone(b), property.0, property.1)
        })
    }

    fn chain(&mut self) -> Expr {
        let mut expression = books();
        let mut ordered = false;
        let length = self.rng.random_range(0..6);
        for _ in 0..length {
            let (next, is_ordering) = match self.rng.random_range(0..8) {
                0 => (ops::where_(expression, self.title_predicate()), false),
                1 => (ops::where_(expression, self.pages_predicate()), false),
                2 => {
                    let descending = self.rng.random_bool(0.5);
                    let key = self.key();
                    (ops::order_by(expression, key, descending), true)
                }
                3 if ordered => {
                    let descending = self.rng.random_bool(0.5);
                    let key = self.key();
                    (ops::then_by(expression, key, descending), true)
                }
                4 => (ops::skip(expression, self.rng.random_range(0..3)), false),
                5 => (ops::take(expression, self.rng.random_range(1..4)), false),
                6 => (ops::expand(expression, &["Chapters"]), false),
                _ => (ops::as_queryable(expression), false),
            };
            expression = next;
            ordered = is_ordering;
        }
        expression
    }
}

#[test]
fn test_random_chains_round_trip() {
    let test = TestStore::new();

    for seed in 0..64 {
        let query = ChainGen::new(seed).chain();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = test.store.sourcer();
        let services = test.store.services().with_sourcer(
            move |context: &QueryExpressionContext<'_>, embedded: bool| {
                counter.fetch_add(1, Ordering::SeqCst);
                inner.source(context, embedded)
            },
        );
        let context = test.store.context(services.clone());

        let mut visitor = QueryExpressionVisitor::new(&context);
        let rewritten = visitor.transform(&query).expect("transform");

        assert_eq!(
            rewritten.to_string(),
            query.to_string().replace("$Books", "table(Books)"),
            "seed {seed}"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1, "seed {seed}");
        let base = visitor.base_query().expect("base query");
        assert_eq!(base.expression().to_string(), "table(Books)", "seed {seed}");

        let result = test
            .execute_with(services, QueryRequest::new(query).with_total_count())
            .unwrap_or_else(|e| panic!("seed {seed}: {e}"));
        assert!(result.len() <= 3, "seed {seed}");
        let total = result.total_count.expect("total count");
        assert!(usize::try_from(total).is_ok_and(|total| total >= result.len()), "seed {seed}");
    }
}
