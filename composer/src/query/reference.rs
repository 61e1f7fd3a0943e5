//! Model references.
//!
//! A model reference explains what data-model element an expression node
//! denotes: a top-level element, something derived from another reference,
//! a property, or one element of an enclosing collection. References are
//! computed during a traversal, memoized per node and discarded with it.
//!
//! # Invariants
//!
//! - A derived reference's containing collection is its source's, all the
//!   way down. Only root references and type casts resolved against the
//!   model introduce a collection or a type.
//! - Lazy lookups resolve at most once.

use std::sync::{Arc, OnceLock};

use crate::model::{ContainerElement, DataModel, PropertyDef, TypeRef};

/// What kind of top-level element a root reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    EntitySet,
    Singleton,
    Function,
}

/// What an expression node denotes in the data model.
#[derive(Debug)]
pub enum ModelReference {
    Root(RootElementReference),
    Derived(DerivedReference),
    ElementOfCollection(ElementOfCollectionReference),
    Property(PropertyReference),
    Parameter(ParameterReference),
    Stub(StubReference),
}

impl ModelReference {
    /// The entity set the denoted data belongs to, if any.
    #[must_use]
    pub fn containing_collection(&self) -> Option<Arc<str>> {
        match self {
            Self::Root(r) => r.containing_collection(),
            Self::Derived(r) => r.source.containing_collection(),
            Self::ElementOfCollection(r) => r.source.containing_collection(),
            Self::Property(r) => r.source.containing_collection(),
            Self::Parameter(r) => r.source.containing_collection(),
            Self::Stub(r) => r.inner.containing_collection(),
        }
    }

    /// The model type of the denoted data, if it can be determined.
    #[must_use]
    pub fn data_type(&self) -> Option<TypeRef> {
        match self {
            Self::Root(r) => r.data_type(),
            Self::Derived(r) => r.data_type(),
            Self::ElementOfCollection(r) => r.data_type(),
            Self::Property(r) => r.data_type(),
            Self::Parameter(r) => Some(r.element_type.clone()),
            Self::Stub(r) => r.inner.data_type(),
        }
    }

    /// Whether the node still names abstract model data.
    #[must_use]
    pub const fn is_stub(&self) -> bool {
        matches!(self, Self::Stub(_))
    }

    /// The reference a stub stands for, or `self`.
    #[must_use]
    pub fn target(&self) -> &Self {
        match self {
            Self::Stub(stub) => stub.inner.target(),
            other => other,
        }
    }

    /// The root element this reference is ultimately derived from.
    #[must_use]
    pub fn root(&self) -> Option<&RootElementReference> {
        match self {
            Self::Root(r) => Some(r),
            Self::Derived(r) => r.source.root(),
            Self::ElementOfCollection(r) => r.source.root(),
            Self::Property(r) => r.source.root(),
            Self::Parameter(r) => r.source.root(),
            Self::Stub(r) => r.inner.root(),
        }
    }
}

impl PartialEq for ModelReference {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Root(a), Self::Root(b)) => a.namespace == b.namespace && a.name == b.name,
            (Self::Derived(a), Self::Derived(b)) => a.cast == b.cast && a.source == b.source,
            (Self::ElementOfCollection(a), Self::ElementOfCollection(b)) => a.source == b.source,
            (Self::Property(a), Self::Property(b)) => a.name == b.name && a.source == b.source,
            (Self::Parameter(a), Self::Parameter(b)) => {
                a.element_type == b.element_type && a.source == b.source
            }
            (Self::Stub(a), Self::Stub(b)) => a.inner == b.inner,
            _ => false,
        }
    }
}

#[derive(Debug)]
struct ResolvedElement {
    kind: ElementKind,
    collection: Option<Arc<str>>,
    data_type: TypeRef,
}

/// A top-level entity set, singleton or function, named by
/// `(namespace?, name)` and looked up in the model on first read.
pub struct RootElementReference {
    model: Arc<DataModel>,
    namespace: Option<Arc<str>>,
    name: Arc<str>,
    resolved: OnceLock<Option<ResolvedElement>>,
}

impl RootElementReference {
    #[must_use]
    pub fn new(model: Arc<DataModel>, namespace: Option<Arc<str>>, name: Arc<str>) -> Self {
        Self {
            model,
            namespace,
            name,
            resolved: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the name resolves to, or `None` if the model has no such element.
    #[must_use]
    pub fn kind(&self) -> Option<ElementKind> {
        self.resolve().map(|r| r.kind)
    }

    #[must_use]
    pub fn containing_collection(&self) -> Option<Arc<str>> {
        self.resolve().and_then(|r| r.collection.as_ref().map(Arc::clone))
    }

    #[must_use]
    pub fn data_type(&self) -> Option<TypeRef> {
        self.resolve().map(|r| r.data_type.clone())
    }

    fn resolve(&self) -> Option<&ResolvedElement> {
        self.resolved
            .get_or_init(|| {
                let element = self.model.find_element(self.namespace(), &self.name)?;
                Some(match element {
                    ContainerElement::EntitySet(set) => ResolvedElement {
                        kind: ElementKind::EntitySet,
                        collection: Some(Arc::clone(&set.name)),
                        data_type: TypeRef::collection(TypeRef::Structured(Arc::clone(
                            &set.entity_type,
                        ))),
                    },
                    ContainerElement::Singleton(singleton) => ResolvedElement {
                        kind: ElementKind::Singleton,
                        collection: None,
                        data_type: TypeRef::Structured(Arc::clone(&singleton.entity_type)),
                    },
                    ContainerElement::Function(function) => ResolvedElement {
                        kind: ElementKind::Function,
                        collection: function.entity_set.as_ref().map(Arc::clone),
                        data_type: function.return_type.clone(),
                    },
                })
            })
            .as_ref()
    }
}

impl std::fmt::Debug for RootElementReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootElementReference")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Data derived from `source` that stays in the same collection, such as
/// the result of a filter or ordering. A cast resolved against the model
/// replaces the element type.
#[derive(Debug)]
pub struct DerivedReference {
    source: Arc<ModelReference>,
    cast: Option<TypeRef>,
}

impl DerivedReference {
    #[must_use]
    pub const fn new(source: Arc<ModelReference>) -> Self {
        Self { source, cast: None }
    }

    /// Derive with the element (or value) type narrowed to `cast`.
    #[must_use]
    pub const fn with_cast(source: Arc<ModelReference>, cast: TypeRef) -> Self {
        Self {
            source,
            cast: Some(cast),
        }
    }

    #[must_use]
    pub const fn source(&self) -> &Arc<ModelReference> {
        &self.source
    }

    #[must_use]
    pub const fn cast(&self) -> Option<&TypeRef> {
        self.cast.as_ref()
    }

    fn data_type(&self) -> Option<TypeRef> {
        let source_type = self.source.data_type();
        match &self.cast {
            None => source_type,
            Some(cast) => match source_type {
                Some(ty) if ty.is_collection_like() => Some(TypeRef::collection(cast.clone())),
                _ => Some(cast.clone()),
            },
        }
    }
}

/// One element of the collection `source` denotes.
#[derive(Debug)]
pub struct ElementOfCollectionReference {
    source: Arc<ModelReference>,
}

impl ElementOfCollectionReference {
    #[must_use]
    pub const fn new(source: Arc<ModelReference>) -> Self {
        Self { source }
    }

    #[must_use]
    pub const fn source(&self) -> &Arc<ModelReference> {
        &self.source
    }

    fn data_type(&self) -> Option<TypeRef> {
        self.source.data_type()?.element_type().cloned()
    }
}

/// A named property of the structured value `source` denotes.
pub struct PropertyReference {
    model: Arc<DataModel>,
    source: Arc<ModelReference>,
    name: Arc<str>,
    property: OnceLock<Option<PropertyDef>>,
}

impl PropertyReference {
    #[must_use]
    pub fn new(model: Arc<DataModel>, source: Arc<ModelReference>, name: Arc<str>) -> Self {
        Self {
            model,
            source,
            name,
            property: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn source(&self) -> &Arc<ModelReference> {
        &self.source
    }

    /// The property definition, looked up on the source's structured type
    /// (and its base types) the first time it is needed.
    #[must_use]
    pub fn property(&self) -> Option<&PropertyDef> {
        self.property
            .get_or_init(|| {
                let source_type = self.source.data_type()?;
                let type_name = source_type.structured_name()?;
                self.model.find_property(type_name, &self.name).cloned()
            })
            .as_ref()
    }

    fn data_type(&self) -> Option<TypeRef> {
        self.property().map(|p| p.ty.clone())
    }
}

impl std::fmt::Debug for PropertyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyReference")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A lambda parameter ranging over the elements of `source`.
#[derive(Debug)]
pub struct ParameterReference {
    source: Arc<ModelReference>,
    element_type: TypeRef,
}

impl ParameterReference {
    #[must_use]
    pub const fn new(source: Arc<ModelReference>, element_type: TypeRef) -> Self {
        Self {
            source,
            element_type,
        }
    }

    #[must_use]
    pub const fn source(&self) -> &Arc<ModelReference> {
        &self.source
    }
}

/// Marks a node that still names model data rather than a concrete query.
#[derive(Debug)]
pub struct StubReference {
    inner: Arc<ModelReference>,
}

impl StubReference {
    #[must_use]
    pub const fn new(inner: Arc<ModelReference>) -> Self {
        Self { inner }
    }

    /// What the stub stands for.
    #[must_use]
    pub const fn inner(&self) -> &Arc<ModelReference> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    fn model() -> Arc<DataModel> {
        Arc::new(
            DataModel::builder()
                .entity_type(
                    EntityType::new("Book")
                        .key(["Id"])
                        .property("Id", TypeRef::string())
                        .navigation(
                            "Chapters",
                            TypeRef::collection(TypeRef::structured("Chapter")),
                        ),
                )
                .entity_type(EntityType::new("SignedBook").derives("Book"))
                .entity_type(
                    EntityType::new("Chapter")
                        .key(["Number"])
                        .property("Number", TypeRef::int64()),
                )
                .entity_set("Books", "Book")
                .singleton("Featured", "Book")
                .function(None, "Recent", TypeRef::collection(TypeRef::structured("Book")), Some("Books"))
                .build()
                .expect("valid model"),
        )
    }

    fn root(model: &Arc<DataModel>, name: &str) -> Arc<ModelReference> {
        Arc::new(ModelReference::Root(RootElementReference::new(
            Arc::clone(model),
            None,
            Arc::from(name),
        )))
    }

    #[test]
    fn test_root_resolves_entity_set() {
        let model = model();
        let books = root(&model, "Books");
        assert_eq!(books.containing_collection().as_deref(), Some("Books"));
        assert_eq!(
            books.data_type(),
            Some(TypeRef::collection(TypeRef::structured("Book")))
        );
        let ModelReference::Root(r) = books.as_ref() else {
            panic!("expected root");
        };
        assert_eq!(r.kind(), Some(ElementKind::EntitySet));
    }

    #[test]
    fn test_root_resolves_singleton_and_function() {
        let model = model();
        let featured = root(&model, "Featured");
        assert_eq!(featured.containing_collection(), None);
        assert_eq!(featured.data_type(), Some(TypeRef::structured("Book")));

        let recent = root(&model, "Recent");
        assert_eq!(recent.containing_collection().as_deref(), Some("Books"));

        let unknown = root(&model, "Nothing");
        assert_eq!(unknown.data_type(), None);
        assert_eq!(unknown.containing_collection(), None);
    }

    #[test]
    fn test_derived_references_inherit_collection() {
        let model = model();
        let books = root(&model, "Books");
        let filtered = Arc::new(ModelReference::Derived(DerivedReference::new(Arc::clone(
            &books,
        ))));
        let element = Arc::new(ModelReference::ElementOfCollection(
            ElementOfCollectionReference::new(Arc::clone(&filtered)),
        ));
        let chapters = ModelReference::Property(PropertyReference::new(
            Arc::clone(&model),
            Arc::clone(&element),
            Arc::from("Chapters"),
        ));

        assert_eq!(element.data_type(), Some(TypeRef::structured("Book")));
        assert_eq!(
            chapters.data_type(),
            Some(TypeRef::collection(TypeRef::structured("Chapter")))
        );
        assert_eq!(chapters.containing_collection().as_deref(), Some("Books"));
        assert!(chapters.root().is_some_and(|r| r.name() == "Books"));
    }

    #[test]
    fn test_cast_replaces_element_type() {
        let model = model();
        let signed = ModelReference::Derived(DerivedReference::with_cast(
            root(&model, "Books"),
            TypeRef::structured("SignedBook"),
        ));
        assert_eq!(
            signed.data_type(),
            Some(TypeRef::collection(TypeRef::structured("SignedBook")))
        );
        assert_eq!(signed.containing_collection().as_deref(), Some("Books"));
    }

    #[test]
    fn test_stub_delegates_and_compares_by_value() {
        let model = model();
        let a = ModelReference::Stub(StubReference::new(root(&model, "Books")));
        let b = ModelReference::Stub(StubReference::new(root(&model, "Books")));
        assert!(a.is_stub());
        assert_eq!(a, b);
        assert_eq!(a.containing_collection().as_deref(), Some("Books"));
        assert!(matches!(a.target(), ModelReference::Root(_)));
        assert_ne!(a, *root(&model, "Books"));
    }

    #[test]
    fn test_missing_property_has_no_type() {
        let model = model();
        let property = PropertyReference::new(
            Arc::clone(&model),
            root(&model, "Featured"),
            Arc::from("Nope"),
        );
        assert!(property.property().is_none());
        assert_eq!(property.data_type(), None);
    }
}
