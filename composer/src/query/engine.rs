//! Query composition engine.
//!
//! The `QueryExpressionVisitor` rewrites a declarative query bottom-up into
//! a provider-native expression. For every node it:
//! - descends into the children, unless the node still names model data
//! - asks the authorizer whether the node may be queried
//! - lets the expander rewrite nodes that still name model data
//! - lets the filter rewrite any node
//! - sources nodes that were left untouched but still name model data
//! - captures the first concrete query it reaches as the base query
//!
//! Replacements returned by the expander or the filter are visited again in
//! full, so hooks compose regardless of what the others did.
//!
//! # Invariants
//!
//! - The returned expression contains no unsourced model stubs.
//! - Exactly one base query is captured per successful traversal, and it is
//!   never replaced.
//! - While a filtered replacement is being visited, the node it replaced
//!   is never processed again, neither as first pushed nor with its
//!   rewritten children.
//! - The root of a filtered replacement is not filtered again while it is
//!   being visited.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::context::{QueryContext, QueryExpressionContext};
use super::error::{HookKind, QueryError, RootExpressionError};
use super::hooks::{QueryAuthorizer, QueryExpander, QueryFilter, QuerySourcer};
use super::provider::ComposableQuery;
use crate::expr::{Constant, Expr, ExprId};
use crate::model::{DataModel, TypeRef};

/// Rewrites one query expression. Use a fresh visitor per request.
pub struct QueryExpressionVisitor<'a> {
    context: QueryExpressionContext<'a>,
    /// Original node -> (original node, pre-filter node) while the filtered
    /// replacement of the original is being visited. The pre-filter node is
    /// also keyed by itself.
    processed: HashMap<ExprId, (Expr, Expr)>,
    /// Filtered replacements whose nested visit is in flight.
    filtered: HashMap<ExprId, Expr>,
    base_query: Option<ComposableQuery>,
    result_collection: Option<Arc<str>>,
    authorizer: OnceCell<Option<Arc<dyn QueryAuthorizer>>>,
    expander: OnceCell<Option<Arc<dyn QueryExpander>>>,
    filter: OnceCell<Option<Arc<dyn QueryFilter>>>,
    sourcer: OnceCell<Option<Arc<dyn QuerySourcer>>>,
}

impl<'a> QueryExpressionVisitor<'a> {
    #[must_use]
    pub fn new(query_context: &'a QueryContext) -> Self {
        Self {
            context: QueryExpressionContext::new(query_context),
            processed: HashMap::new(),
            filtered: HashMap::new(),
            base_query: None,
            result_collection: None,
            authorizer: OnceCell::new(),
            expander: OnceCell::new(),
            filter: OnceCell::new(),
            sourcer: OnceCell::new(),
        }
    }

    /// Rewrite `expression` into a provider-native expression.
    ///
    /// Post-conditions on success: `base_query()` is set and the result is
    /// expressed in terms of its root.
    ///
    /// A failed transform leaves the visitor in an unspecified state; the
    /// whole request is abandoned.
    pub fn transform(&mut self, expression: &Expr) -> Result<Expr, QueryError> {
        self.compose(expression).map(|(rewritten, _)| rewritten)
    }

    /// Like `transform`, also handing back the captured base query.
    pub fn compose(&mut self, expression: &Expr) -> Result<(Expr, ComposableQuery), QueryError> {
        debug!(expression = %expression, "composing query");
        let rewritten = self.visit(expression)?;
        let Some(base_query) = self.base_query.clone() else {
            warn!(rewritten = %rewritten, "traversal captured no base query");
            return Err(QueryError::MissingBaseQuery);
        };
        debug!(
            rewritten = %rewritten,
            result_collection = ?self.result_collection,
            "composed query"
        );
        Ok((rewritten, base_query))
    }

    /// The first concrete query reached by the traversal.
    #[must_use]
    pub const fn base_query(&self) -> Option<&ComposableQuery> {
        self.base_query.as_ref()
    }

    /// The entity set the query's results belong to, if known.
    #[must_use]
    pub const fn result_collection(&self) -> Option<&Arc<str>> {
        self.result_collection.as_ref()
    }

    #[must_use]
    pub const fn context(&self) -> &QueryExpressionContext<'a> {
        &self.context
    }

    fn visit(&mut self, node: &Expr) -> Result<Expr, QueryError> {
        let limit = self.context.query_context().config().max_visit_depth;
        if self.context.depth() >= limit {
            warn!(limit, node = %node, "expression nesting too deep");
            return Err(QueryError::NestingTooDeep { limit });
        }

        self.context.push_visited_node(Some(Expr::clone(node)));

        let mut working = if let Some((_, pre_filter)) = self.processed.get(&node.id()) {
            debug!(node = %node, "node is being processed, reusing it");
            Expr::clone(pre_filter)
        } else {
            self.rewrite(node)?
        };

        if working.ptr_eq(node) {
            if self.current_is_stub() {
                working = self.source(node)?;
            }
            if self.base_query.is_none() {
                working = self.capture_base_query(&working)?;
            }
        }

        if !working.ptr_eq(node) {
            self.context.inherit_model_reference(node, &working);
        }

        self.context.pop_visited_node();
        if self.context.visited_node().is_some() {
            self.result_collection = self
                .context
                .model_reference()
                .and_then(|reference| reference.containing_collection());
        }

        Ok(working)
    }

    /// Descend, inspect, expand and filter.
    fn rewrite(&mut self, node: &Expr) -> Result<Expr, QueryError> {
        let is_stub = self.current_is_stub();

        let mut working = Expr::clone(node);
        if !is_stub {
            working = node.try_map_children(|child| self.visit(child))?;
            if !working.ptr_eq(node) {
                self.context
                    .replace_visited_node(Some(Expr::clone(&working)));
            }
        }

        self.inspect(&working)?;

        if is_stub {
            working = self.expand(working)?;
        }

        self.process(node, working)
    }

    fn inspect(&self, working: &Expr) -> Result<(), QueryError> {
        let Some(authorizer) = self.authorizer() else {
            return Ok(());
        };
        if authorizer.authorize(&self.context) {
            Ok(())
        } else {
            warn!(node = %working, "query authorization failed");
            Err(QueryError::AuthorizationFailed)
        }
    }

    fn expand(&mut self, working: Expr) -> Result<Expr, QueryError> {
        let Some(expander) = self.expander() else {
            return Ok(working);
        };
        let Some(expanded) = expander.expand(&mut self.context) else {
            return Ok(working);
        };
        if expanded.ptr_eq(&working) {
            return Ok(working);
        }

        if !self.context.model().is_assignable(working.ty(), expanded.ty()) {
            warn!(
                node = %working,
                replacement = %expanded,
                "expander broke the type contract"
            );
            return Err(QueryError::ContractViolation {
                hook: HookKind::Expander,
                expected: working.ty().clone(),
                actual: expanded.ty().clone(),
            });
        }

        debug!(node = %working, expanded = %expanded, "expanded node");
        let result = self.visit_nested(&expanded)?;
        self.context
            .replace_visited_node(Some(Expr::clone(&result)));
        Ok(result)
    }

    fn process(&mut self, node: &Expr, working: Expr) -> Result<Expr, QueryError> {
        if self.filtered.contains_key(&node.id()) {
            return Ok(working);
        }
        let Some(filter) = self.filter() else {
            return Ok(working);
        };
        let Some(filtered) = filter.filter(&mut self.context) else {
            return Ok(working);
        };
        if filtered.ptr_eq(&working) {
            return Ok(working);
        }

        if !filter_compatible(self.context.model(), working.ty(), filtered.ty()) {
            warn!(
                node = %working,
                replacement = %filtered,
                "filter broke the type contract"
            );
            return Err(QueryError::ContractViolation {
                hook: HookKind::Filter,
                expected: working.ty().clone(),
                actual: filtered.ty().clone(),
            });
        }

        debug!(node = %working, filtered = %filtered, "filtered node");
        self.processed
            .insert(node.id(), (Expr::clone(node), Expr::clone(&working)));
        self.processed
            .insert(working.id(), (Expr::clone(&working), Expr::clone(&working)));
        self.filtered.insert(filtered.id(), Expr::clone(&filtered));
        let result = self.visit_nested(&filtered);
        self.filtered.remove(&filtered.id());
        self.processed.remove(&working.id());
        self.processed.remove(&node.id());
        let result = result?;

        self.context
            .replace_visited_node(Some(Expr::clone(&result)));
        Ok(result)
    }

    /// Visit a hook replacement behind a sentinel frame, then run the
    /// callback the hook left behind.
    fn visit_nested(&mut self, replacement: &Expr) -> Result<Expr, QueryError> {
        let callback = self.context.take_after_nested_visit_callback();
        self.context.push_visited_node(None);
        let result = self.visit(replacement)?;
        self.context.pop_visited_node();
        if let Some(callback) = callback {
            callback();
        }
        Ok(result)
    }

    fn source(&self, node: &Expr) -> Result<Expr, QueryError> {
        let Some(sourcer) = self.sourcer() else {
            warn!(node = %node, "no sourcer for model reference");
            return Err(QueryError::MissingSourcer);
        };
        let embedded = self.base_query.is_some();
        let Some(sourced) = sourcer.source(&self.context, embedded) else {
            warn!(node = %node, embedded, "sourcer returned nothing");
            return Err(QueryError::SourcerMissingResult);
        };
        debug!(node = %node, sourced = %sourced, embedded, "sourced node");
        Ok(sourced)
    }

    fn capture_base_query(&mut self, working: &Expr) -> Result<Expr, QueryError> {
        let Some(constant) = working.as_constant() else {
            warn!(node = %working, "root expression is not a constant");
            return Err(QueryError::InvalidRootExpression(
                RootExpressionError::NotConstant,
            ));
        };
        let Constant::Query(query) = constant else {
            warn!(node = %working, "root expression is not a queryable constant");
            return Err(QueryError::InvalidRootExpression(
                RootExpressionError::NotQueryable,
            ));
        };

        let root = Expr::clone(query.expression());
        debug!(root = %root, "captured base query");
        self.base_query = Some(query.clone());
        Ok(root)
    }

    fn current_is_stub(&self) -> bool {
        self.context
            .model_reference()
            .is_some_and(|reference| reference.is_stub())
    }

    fn authorizer(&self) -> Option<Arc<dyn QueryAuthorizer>> {
        self.authorizer
            .get_or_init(|| {
                let hook = self.context.query_context().services().authorizer();
                debug!(registered = hook.is_some(), "resolved authorizer");
                hook
            })
            .as_ref()
            .map(Arc::clone)
    }

    fn expander(&self) -> Option<Arc<dyn QueryExpander>> {
        self.expander
            .get_or_init(|| {
                let hook = self.context.query_context().services().expander();
                debug!(registered = hook.is_some(), "resolved expander");
                hook
            })
            .as_ref()
            .map(Arc::clone)
    }

    fn filter(&self) -> Option<Arc<dyn QueryFilter>> {
        self.filter
            .get_or_init(|| {
                let hook = self.context.query_context().services().filter();
                debug!(registered = hook.is_some(), "resolved filter");
                hook
            })
            .as_ref()
            .map(Arc::clone)
    }

    fn sourcer(&self) -> Option<Arc<dyn QuerySourcer>> {
        self.sourcer
            .get_or_init(|| {
                let hook = self.context.query_context().services().sourcer();
                debug!(registered = hook.is_some(), "resolved sourcer");
                hook
            })
            .as_ref()
            .map(Arc::clone)
    }
}

/// A filter may narrow a node to anything assignable to it. It may also
/// turn a fixed-size collection into a composable query over the same (or
/// a related) element type.
fn filter_compatible(model: &DataModel, before: &TypeRef, after: &TypeRef) -> bool {
    if model.is_assignable(before, after) {
        return true;
    }
    match (before, after) {
        (TypeRef::Collection(before), TypeRef::Queryable(after)) => {
            before == after
                || model.is_assignable(before, after)
                || model.is_assignable(after, before)
        }
        _ => false,
    }
}
