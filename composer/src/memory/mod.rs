//! In-memory backing store.
//!
//! A `MemoryProvider` evaluates provider-native expressions (trees whose
//! roots are `Constant::Table` or `Constant::Query`) over named tables of
//! records. `MemorySourcer` and `PropertyStubExpander` are the hooks that
//! turn model stubs into such trees.
//!
//! Singletons are stored as one-row tables under the singleton's name, and
//! functions as tables named `namespace.name`. Function arguments are not
//! evaluated.

mod eval;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::expr::{Expr, Method, SourceStub, ops};
use crate::model::{DataModel, TypeRef};
use crate::query::{
    ComposableQuery, ElementKind, ModelReference, ProviderError, QueryExpander,
    QueryExpressionContext, QueryProvider, QuerySourcer, Value,
};

use self::eval::Evaluator;

/// Named tables of rows.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: HashMap<Arc<str>, Vec<Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table, builder style.
    #[must_use]
    pub fn with_table<I>(mut self, name: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.tables
            .insert(Arc::from(name), rows.into_iter().collect());
        self
    }

    /// Append a row, creating the table if needed.
    pub fn insert(&mut self, table: &str, row: impl Into<Value>) {
        self.tables
            .entry(Arc::from(table))
            .or_default()
            .push(row.into());
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&[Value]> {
        self.tables.get(name).map(Vec::as_slice)
    }
}

/// Evaluates expressions against a `MemoryStore`.
#[derive(Debug)]
pub struct MemoryProvider {
    store: MemoryStore,
    model: Arc<DataModel>,
}

impl MemoryProvider {
    #[must_use]
    pub const fn new(store: MemoryStore, model: Arc<DataModel>) -> Self {
        Self { store, model }
    }

    #[must_use]
    pub const fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl QueryProvider for MemoryProvider {
    fn execute(&self, expression: &Expr) -> Result<Value, ProviderError> {
        let value = Evaluator::new(&self.store, &self.model).eval(expression)?;
        debug!(expression = %expression, "evaluated in memory");
        Ok(value)
    }
}

/// Sources top-level model elements from a `MemoryProvider`.
///
/// At the root of a query an entity set becomes a `Constant::Query`; once
/// a base query exists it becomes a bare table. Property stubs are left to
/// `PropertyStubExpander`.
#[derive(Debug, Clone)]
pub struct MemorySourcer {
    provider: Arc<MemoryProvider>,
}

impl MemorySourcer {
    #[must_use]
    pub const fn new(provider: Arc<MemoryProvider>) -> Self {
        Self { provider }
    }

    fn rooted(&self, expression: Expr, element: TypeRef, embedded: bool) -> Expr {
        if embedded {
            return expression;
        }
        let provider = Arc::clone(&self.provider) as Arc<dyn QueryProvider>;
        Expr::query(ComposableQuery::new(provider, expression, element))
    }
}

impl QuerySourcer for MemorySourcer {
    fn source(&self, context: &QueryExpressionContext<'_>, embedded: bool) -> Option<Expr> {
        let reference = context.model_reference()?;
        let ModelReference::Stub(stub) = reference.as_ref() else {
            return None;
        };
        let ModelReference::Root(root) = stub.inner().as_ref() else {
            return None;
        };
        let model = context.model();

        match root.kind()? {
            ElementKind::EntitySet => {
                let set = model.entity_set(root.name())?;
                let element = TypeRef::Structured(Arc::clone(&set.entity_type));
                let table = Expr::table(&set.name, element.clone());
                Some(self.rooted(table, element, embedded))
            }
            ElementKind::Singleton => {
                let singleton = model.singleton(root.name())?;
                let element = TypeRef::Structured(Arc::clone(&singleton.entity_type));
                let first = ops::first_or_default(Expr::table(&singleton.name, element.clone()));
                Some(self.rooted(first, element, embedded))
            }
            ElementKind::Function => {
                let function = model.function(root.namespace(), root.name())?;
                let table_name = match &function.namespace {
                    Some(ns) => format!("{ns}.{}", function.name),
                    None => function.name.clone(),
                };
                let (expression, element) = match function.return_type.element_type() {
                    Some(element) => (Expr::table(&table_name, element.clone()), element.clone()),
                    None => {
                        let element = function.return_type.clone();
                        let table = Expr::table(&table_name, element.clone());
                        (ops::first_or_default(table), element)
                    }
                };
                Some(self.rooted(expression, element, embedded))
            }
        }
    }
}

/// Rewrites `parent/$Name` property stubs into plain member access, so the
/// parent is visited (and sourced) like any other node.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyStubExpander;

impl QueryExpander for PropertyStubExpander {
    fn expand(&self, context: &mut QueryExpressionContext<'_>) -> Option<Expr> {
        let node = context.visited_node()?;
        let Some(Method::Source(SourceStub::Property { name })) = node.method() else {
            return None;
        };
        let parent = node.args().first()?;
        Some(Expr::member(Expr::clone(parent), name, node.ty().clone()))
    }
}
