//! Per-request query state.
//!
//! `QueryContext` carries what every stage of a request needs: the data
//! model, the registered hooks and the engine configuration.
//! `QueryExpressionContext` is the traversal state of one composition run:
//! the ancestor stack, the node-to-reference memo and the one-shot
//! callback a hook can leave for the engine.
//!
//! # Invariants
//!
//! - A model reference, once computed for a node, is never recomputed for
//!   the rest of the traversal.
//! - The memo keeps the node handle alive next to its reference, so a node
//!   id cannot be reused by a new allocation while the traversal runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::hooks::ServiceProvider;
use super::reference::{
    DerivedReference, ElementOfCollectionReference, ModelReference, ParameterReference,
    PropertyReference, RootElementReference, StubReference,
};
use crate::config::EngineConfig;
use crate::expr::{Expr, ExprId, ExprKind, Method, SourceStub};
use crate::model::{DataModel, TypeRef};

/// Callback a hook can leave for the engine to run after the nested visit
/// of the replacement it returned.
pub type AfterNestedVisitCallback = Box<dyn FnOnce() + Send>;

/// Shared, read-only state for one request.
#[derive(Clone)]
pub struct QueryContext {
    model: Arc<DataModel>,
    services: Arc<dyn ServiceProvider>,
    config: Arc<EngineConfig>,
}

impl QueryContext {
    /// Create a context with the default engine configuration.
    #[must_use]
    pub fn new(model: Arc<DataModel>, services: Arc<dyn ServiceProvider>) -> Self {
        Self::with_config(model, services, Arc::new(EngineConfig::default()))
    }

    #[must_use]
    pub const fn with_config(
        model: Arc<DataModel>,
        services: Arc<dyn ServiceProvider>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            model,
            services,
            config,
        }
    }

    #[must_use]
    pub const fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    #[must_use]
    pub fn services(&self) -> &dyn ServiceProvider {
        self.services.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Traversal state for one composition run.
///
/// Owned by exactly one visitor; never shared between requests.
pub struct QueryExpressionContext<'a> {
    query_context: &'a QueryContext,
    /// Ancestor stack. `None` is a sentinel frame pushed around the nested
    /// visit of a hook replacement.
    visited_nodes: Vec<Option<Expr>>,
    model_references: HashMap<ExprId, (Expr, Arc<ModelReference>)>,
    after_nested_visit_callback: Option<AfterNestedVisitCallback>,
}

impl<'a> QueryExpressionContext<'a> {
    #[must_use]
    pub fn new(query_context: &'a QueryContext) -> Self {
        Self {
            query_context,
            visited_nodes: Vec::new(),
            model_references: HashMap::new(),
            after_nested_visit_callback: None,
        }
    }

    #[must_use]
    pub const fn query_context(&self) -> &'a QueryContext {
        self.query_context
    }

    #[must_use]
    pub fn model(&self) -> &Arc<DataModel> {
        self.query_context.model()
    }

    /// Push a node (or a sentinel) and resolve its model reference.
    pub fn push_visited_node(&mut self, node: Option<Expr>) {
        self.visited_nodes.push(node);
        self.update_model_reference();
    }

    /// Swap the top of the stack for a rewritten node.
    pub fn replace_visited_node(&mut self, node: Option<Expr>) {
        self.visited_nodes.pop();
        self.push_visited_node(node);
    }

    /// Pop the top of the stack, resolving the reference of the new top if
    /// it is still unknown.
    pub fn pop_visited_node(&mut self) -> Option<Expr> {
        let popped = self.visited_nodes.pop().flatten();
        self.update_model_reference();
        popped
    }

    /// The node on top of the stack, `None` for an empty stack or a sentinel.
    #[must_use]
    pub fn visited_node(&self) -> Option<&Expr> {
        self.visited_nodes.last().and_then(Option::as_ref)
    }

    /// The stack depth, sentinels included.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.visited_nodes.len()
    }

    /// The model reference of the node on top of the stack.
    #[must_use]
    pub fn model_reference(&self) -> Option<Arc<ModelReference>> {
        self.visited_node()
            .and_then(|node| self.model_reference_for(node))
    }

    /// The model reference already known for `node`.
    #[must_use]
    pub fn model_reference_for(&self, node: &Expr) -> Option<Arc<ModelReference>> {
        self.model_references
            .get(&node.id())
            .map(|(_, reference)| Arc::clone(reference))
    }

    /// Let a rewritten node stand for the data its original denoted.
    ///
    /// The replacement is concrete, so a stub reference is unwrapped. Nodes
    /// that already have a reference of their own keep it.
    pub fn inherit_model_reference(&mut self, original: &Expr, replacement: &Expr) {
        if self.model_references.contains_key(&replacement.id()) {
            return;
        }
        let Some(reference) = self.model_reference_for(original) else {
            return;
        };
        let inherited = match reference.as_ref() {
            ModelReference::Stub(stub) => Arc::clone(stub.inner()),
            _ => reference,
        };
        self.model_references
            .insert(replacement.id(), (Expr::clone(replacement), inherited));
    }

    pub fn set_after_nested_visit_callback(&mut self, callback: AfterNestedVisitCallback) {
        self.after_nested_visit_callback = Some(callback);
    }

    #[must_use]
    pub const fn has_after_nested_visit_callback(&self) -> bool {
        self.after_nested_visit_callback.is_some()
    }

    /// Take the pending callback, leaving the slot empty.
    pub fn take_after_nested_visit_callback(&mut self) -> Option<AfterNestedVisitCallback> {
        self.after_nested_visit_callback.take()
    }

    fn update_model_reference(&mut self) {
        let Some((top, below)) = self.visited_nodes.split_last() else {
            return;
        };
        let Some(node) = top.as_ref() else {
            return;
        };
        if self.model_references.contains_key(&node.id()) {
            return;
        }
        let node = Expr::clone(node);
        let ancestors: Vec<Expr> = below.iter().flatten().cloned().collect();
        self.reference_of(&node, &ancestors);
    }

    /// Memoized reference computation. `ancestors` runs outermost first.
    fn reference_of(&mut self, node: &Expr, ancestors: &[Expr]) -> Option<Arc<ModelReference>> {
        if let Some((_, known)) = self.model_references.get(&node.id()) {
            return Some(Arc::clone(known));
        }
        let computed = Arc::new(self.compute_reference(node, ancestors)?);
        self.model_references
            .insert(node.id(), (Expr::clone(node), Arc::clone(&computed)));
        Some(computed)
    }

    fn compute_reference(&mut self, node: &Expr, ancestors: &[Expr]) -> Option<ModelReference> {
        let model = Arc::clone(self.model());
        let mut chain = ancestors.to_vec();
        chain.push(Expr::clone(node));

        match node.kind() {
            ExprKind::Call {
                method: Method::Source(SourceStub::Root { namespace, name }),
                ..
            } => Some(ModelReference::Stub(StubReference::new(Arc::new(
                ModelReference::Root(RootElementReference::new(
                    model,
                    namespace.clone(),
                    Arc::clone(name),
                )),
            )))),
            ExprKind::Call {
                method: Method::Source(SourceStub::Property { name }),
                args,
            } => {
                let parent = self.reference_of(args.first()?, &chain)?;
                Some(ModelReference::Stub(StubReference::new(Arc::new(
                    ModelReference::Property(PropertyReference::new(
                        model,
                        parent,
                        Arc::clone(name),
                    )),
                ))))
            }
            ExprKind::Call { method, args } => {
                let source = self.reference_of(args.first()?, &chain)?;
                match method {
                    m if m.preserves_element() => {
                        Some(ModelReference::Derived(DerivedReference::new(source)))
                    }
                    Method::OfType => {
                        let target = node.ty().element_type()?;
                        known_structured(&model, target)?;
                        Some(ModelReference::Derived(DerivedReference::with_cast(
                            source,
                            target.clone(),
                        )))
                    }
                    Method::FirstOrDefault => Some(ModelReference::ElementOfCollection(
                        ElementOfCollectionReference::new(source),
                    )),
                    _ => None,
                }
            }
            ExprKind::Member { target, name, cast } => {
                let mut source = self.reference_of(target, &chain)?;
                if let Some(cast) = cast {
                    known_structured(&model, cast)?;
                    source = Arc::new(ModelReference::Derived(DerivedReference::with_cast(
                        source,
                        cast.clone(),
                    )));
                }
                Some(ModelReference::Property(PropertyReference::new(
                    model,
                    source,
                    Arc::clone(name),
                )))
            }
            ExprKind::Parameter { .. } => self.parameter_reference(node, ancestors),
            ExprKind::Constant(_)
            | ExprKind::Lambda { .. }
            | ExprKind::Binary { .. }
            | ExprKind::Unary { .. } => None,
        }
    }

    /// A parameter denotes one element of the source of the operator whose
    /// lambda declares it.
    fn parameter_reference(&mut self, node: &Expr, ancestors: &[Expr]) -> Option<ModelReference> {
        let lambda_at = ancestors.iter().rposition(|ancestor| match ancestor.kind() {
            ExprKind::Lambda { params, .. } => params.iter().any(|p| p.ptr_eq(node)),
            _ => false,
        })?;
        let call_at = lambda_at.checked_sub(1)?;
        let call = &ancestors[call_at];
        let lambda = &ancestors[lambda_at];
        let args = call.args();
        if !args.iter().skip(1).any(|arg| arg.ptr_eq(lambda)) {
            return None;
        }

        let source = self.reference_of(args.first()?, &ancestors[..call_at])?;
        let source_type = source.data_type()?;
        if !source_type.is_collection_like() {
            return None;
        }
        let element = source_type.element_type()?.clone();
        Some(ModelReference::Parameter(ParameterReference::new(
            source, element,
        )))
    }
}

impl fmt::Debug for QueryExpressionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExpressionContext")
            .field("visited_nodes", &self.visited_nodes)
            .field("model_references", &self.model_references.len())
            .finish_non_exhaustive()
    }
}

/// A cast target must name a type the model knows.
fn known_structured(model: &DataModel, ty: &TypeRef) -> Option<()> {
    let name = ty.structured_name()?;
    model.structured_type(name).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ops;
    use crate::query::hooks::QueryServices;
    use crate::testing::bookstore_model;

    fn query_context() -> QueryContext {
        QueryContext::new(Arc::new(bookstore_model()), Arc::new(QueryServices::new()))
    }

    fn book() -> TypeRef {
        TypeRef::structured("Book")
    }

    fn books() -> Expr {
        ops::source(None, "Books", TypeRef::queryable(book()))
    }

    #[test]
    fn test_stub_reference_for_source() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);
        context.push_visited_node(Some(books()));

        let reference = context.model_reference().expect("reference");
        assert!(reference.is_stub());
        assert_eq!(reference.containing_collection().as_deref(), Some("Books"));
    }

    #[test]
    fn test_parameter_resolves_through_ancestors() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);

        let predicate = ops::lambda("b", book(), |b| {
            ops::eq(
                Expr::member(Expr::clone(b), "Title", TypeRef::string()),
                Expr::string("Dune"),
            )
        });
        let filtered = ops::where_(books(), Expr::clone(&predicate));
        let ExprKind::Lambda { params, body } = predicate.kind() else {
            panic!("expected lambda");
        };
        let ExprKind::Binary { left: title, .. } = body.kind() else {
            panic!("expected binary");
        };

        context.push_visited_node(Some(Expr::clone(&filtered)));
        context.push_visited_node(Some(Expr::clone(&predicate)));
        context.push_visited_node(Some(Expr::clone(body)));
        context.push_visited_node(Some(Expr::clone(title)));

        let reference = context.model_reference().expect("member reference");
        let ModelReference::Property(property) = reference.as_ref() else {
            panic!("expected property reference, got {reference:?}");
        };
        assert_eq!(property.name(), "Title");
        assert!(matches!(
            property.source().as_ref(),
            ModelReference::Parameter(_)
        ));
        assert_eq!(reference.data_type(), Some(TypeRef::string()));
        assert_eq!(reference.containing_collection().as_deref(), Some("Books"));

        let param = context
            .model_reference_for(&params[0])
            .expect("parameter reference");
        assert_eq!(param.data_type(), Some(book()));
    }

    #[test]
    fn test_unbound_parameter_has_no_reference() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);
        context.push_visited_node(Some(Expr::parameter("x", book())));
        assert!(context.model_reference().is_none());
    }

    #[test]
    fn test_references_are_memoized_by_identity() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);
        let shared = books();
        let top = ops::take(Expr::clone(&shared), 3);

        context.push_visited_node(Some(Expr::clone(&top)));
        let first = context.model_reference_for(&shared).expect("child reference");
        context.push_visited_node(Some(Expr::clone(&shared)));
        let second = context.model_reference().expect("reference");
        assert!(Arc::ptr_eq(&first, &second));

        // A structurally equal node is a different node.
        let twin = books();
        assert!(context.model_reference_for(&twin).is_none());
    }

    #[test]
    fn test_sentinel_and_pop() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);
        context.push_visited_node(Some(books()));
        context.push_visited_node(None);
        assert!(context.visited_node().is_none());
        assert!(context.model_reference().is_none());
        assert_eq!(context.depth(), 2);

        assert!(context.pop_visited_node().is_none());
        assert!(context.model_reference().is_some());
        assert!(context.pop_visited_node().is_some());
        assert!(context.visited_node().is_none());
    }

    #[test]
    fn test_of_type_and_first_or_default() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);

        let signed = ops::of_type(books(), TypeRef::structured("SignedBook"));
        context.push_visited_node(Some(Expr::clone(&signed)));
        let reference = context.model_reference().expect("derived");
        assert_eq!(
            reference.data_type(),
            Some(TypeRef::collection(TypeRef::structured("SignedBook")))
        );

        let unknown = ops::of_type(books(), TypeRef::structured("Pamphlet"));
        context.replace_visited_node(Some(unknown));
        assert!(context.model_reference().is_none());

        let first = ops::first_or_default(books());
        context.replace_visited_node(Some(first));
        let reference = context.model_reference().expect("element");
        assert_eq!(reference.data_type(), Some(book()));
        assert_eq!(reference.containing_collection().as_deref(), Some("Books"));
    }

    #[test]
    fn test_inherit_unwraps_stub() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);
        let stub = books();
        context.push_visited_node(Some(Expr::clone(&stub)));

        let concrete = Expr::table("Books", book());
        context.inherit_model_reference(&stub, &concrete);
        let inherited = context.model_reference_for(&concrete).expect("inherited");
        assert!(!inherited.is_stub());
        assert_eq!(inherited.containing_collection().as_deref(), Some("Books"));
    }

    #[test]
    fn test_callback_is_taken_once() {
        let qc = query_context();
        let mut context = QueryExpressionContext::new(&qc);
        context.set_after_nested_visit_callback(Box::new(|| {}));
        assert!(context.take_after_nested_visit_callback().is_some());
        assert!(context.take_after_nested_visit_callback().is_none());
    }
}
