//! Query composition and dispatch.
//!
//! Turns a declarative query over model elements into a provider-native
//! query and runs it:
//!
//! - `reference` - What each expression node denotes in the data model
//! - `context` - Per-request and per-traversal state
//! - `hooks` - Authorizer, expander, filter, sourcer and executor contracts
//! - `engine` - The rewriting visitor
//! - `executor` - Result dispatch and empty-result disambiguation

pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod provider;
pub mod reference;
pub mod types;

pub use context::{AfterNestedVisitCallback, QueryContext, QueryExpressionContext};
pub use engine::QueryExpressionVisitor;
pub use error::{HookKind, ProviderError, QueryError, RootExpressionError};
pub use executor::{DefaultQueryExecutor, execute_query, strip_paging};
pub use hooks::{
    QueryAuthorizer, QueryExecutor, QueryExpander, QueryFilter, QueryServices, QuerySourcer,
    ServiceProvider,
};
pub use provider::{ComposableQuery, QueryProvider};
pub use reference::{ElementKind, ModelReference};
pub use types::{QueryRequest, QueryResult, Record, Value};
