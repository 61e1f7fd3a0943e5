// Life of a request:
// 1. A declarative expression over model elements comes in
// 2. The composition engine rewrites it bottom-up:
//     - authorize every node
//     - expand and filter through the registered hooks
//     - source model stubs into provider-native expressions
//     - capture the first concrete query as the base query
// 3. Dispatch picks the collection or the scalar path and runs the executor
// 4. An empty key lookup is re-run without shaping to tell "not found" apart
//    from "filtered out"
//
// System components:
//  - Data model lookups
//  - Expression trees
//  - Query composition engine and dispatch
//  - In-memory provider

pub mod config;
pub mod expr;
pub mod memory;
pub mod model;
pub mod query;
pub mod testing;

mod e2e_tests;

pub use query::{QueryContext, QueryError, QueryRequest, QueryResult, execute_query};
