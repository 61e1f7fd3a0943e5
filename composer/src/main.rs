use std::sync::Arc;

use composer::config::EngineConfig;
use composer::expr::{Expr, ops};
use composer::model::TypeRef;
use composer::testing::{book, books, bookstore, key_lookup};
use composer::{QueryContext, QueryRequest, execute_query};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "composer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: executor_timeout={:?}, max_visit_depth={}",
        config.executor_timeout,
        config.max_visit_depth
    );

    let store = bookstore();
    let context = QueryContext::with_config(
        Arc::clone(store.model()),
        Arc::new(store.services()),
        Arc::new(config),
    );

    let no_such_title = ops::where_(
        books(),
        ops::lambda("b", book(), |b| {
            ops::eq(
                Expr::member(Expr::clone(b), "Title", TypeRef::string()),
                Expr::string("No Such Title"),
            )
        }),
    );

    let requests = [
        ("all books", QueryRequest::new(ops::take(books(), 2)).with_total_count()),
        ("book 1", QueryRequest::new(key_lookup("1"))),
        ("book 42", QueryRequest::new(key_lookup("42"))),
        ("no such title", QueryRequest::new(no_such_title)),
        ("count", QueryRequest::new(books()).count()),
    ];

    for (name, request) in requests {
        match execute_query(&context, request).await {
            Ok(result) => {
                let rows: Vec<String> = result.results.iter().map(ToString::to_string).collect();
                tracing::info!(
                    "{name}: {} row(s), total_count={:?}, collection={:?}: [{}]",
                    result.len(),
                    result.total_count,
                    result.result_collection,
                    rows.join(", ")
                );
            }
            Err(e) => tracing::warn!("{name}: {e}"),
        }
    }
}
