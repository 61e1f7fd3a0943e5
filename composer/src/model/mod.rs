//! Data model lookups.
//!
//! The data model describes the named elements a query can address: entity
//! sets, singletons and functions, plus the structured types they expose.
//! Building a model from application metadata happens elsewhere; this module
//! only holds the result and answers the lookups model references need.
//!
//! # Invariants
//!
//! - Type names, entity set names and singleton names are unique.
//! - A base type chain never contains a cycle (enforced by `build`).

mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use types::{PrimitiveType, TypeRef};

/// A property declared on a structured type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub ty: TypeRef,
    /// Whether the property navigates to another entity or entity collection.
    pub navigation: bool,
}

/// A structured (entity) type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: Arc<str>,
    pub base_type: Option<Arc<str>>,
    /// Names of the key properties, in declaration order.
    pub key: Vec<String>,
    pub properties: Vec<PropertyDef>,
}

impl EntityType {
    /// Start describing a new structured type.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            base_type: None,
            key: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Derive this type from `base`.
    #[must_use]
    pub fn derives(mut self, base: &str) -> Self {
        self.base_type = Some(Arc::from(base));
        self
    }

    /// Declare the key properties.
    #[must_use]
    pub fn key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare a structural property.
    #[must_use]
    pub fn property(mut self, name: &str, ty: TypeRef) -> Self {
        self.properties.push(PropertyDef {
            name: name.to_owned(),
            ty,
            navigation: false,
        });
        self
    }

    /// Declare a navigation property.
    #[must_use]
    pub fn navigation(mut self, name: &str, ty: TypeRef) -> Self {
        self.properties.push(PropertyDef {
            name: name.to_owned(),
            ty,
            navigation: true,
        });
        self
    }

    /// Look up a property declared directly on this type.
    #[must_use]
    pub fn declared_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A top-level entity collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySet {
    pub name: Arc<str>,
    pub entity_type: Arc<str>,
}

/// A top-level single entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Singleton {
    pub name: Arc<str>,
    pub entity_type: Arc<str>,
}

/// A named function exposed by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub namespace: Option<String>,
    pub name: String,
    pub return_type: TypeRef,
    /// The entity set the returned entities belong to, if any.
    pub entity_set: Option<Arc<str>>,
}

/// A top-level element resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerElement<'a> {
    EntitySet(&'a EntitySet),
    Singleton(&'a Singleton),
    Function(&'a Function),
}

/// Error returned when a model fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A name was declared twice.
    Duplicate(String),
    /// A referenced type does not exist.
    UnknownType(String),
    /// A base type chain loops back on itself.
    CyclicBaseType(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate(name) => write!(f, "duplicate model element: {name}"),
            Self::UnknownType(name) => write!(f, "unknown type: {name}"),
            Self::CyclicBaseType(name) => write!(f, "cyclic base type chain at: {name}"),
        }
    }
}

impl std::error::Error for ModelError {}

/// The data model.
#[derive(Debug, Default)]
pub struct DataModel {
    types: HashMap<Arc<str>, EntityType>,
    entity_sets: HashMap<Arc<str>, EntitySet>,
    singletons: HashMap<Arc<str>, Singleton>,
    functions: HashMap<(Option<String>, String), Function>,
}

impl DataModel {
    #[must_use]
    pub fn builder() -> DataModelBuilder {
        DataModelBuilder::default()
    }

    #[must_use]
    pub fn structured_type(&self, name: &str) -> Option<&EntityType> {
        self.types.get(name)
    }

    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.entity_sets.get(name)
    }

    #[must_use]
    pub fn singleton(&self, name: &str) -> Option<&Singleton> {
        self.singletons.get(name)
    }

    #[must_use]
    pub fn function(&self, namespace: Option<&str>, name: &str) -> Option<&Function> {
        self.functions
            .get(&(namespace.map(str::to_owned), name.to_owned()))
    }

    /// Resolve a top-level element by name.
    ///
    /// Entity sets and singletons live in the unnamed container; a namespace
    /// only ever selects a function.
    #[must_use]
    pub fn find_element(&self, namespace: Option<&str>, name: &str) -> Option<ContainerElement<'_>> {
        if namespace.is_none() {
            if let Some(set) = self.entity_set(name) {
                return Some(ContainerElement::EntitySet(set));
            }
            if let Some(singleton) = self.singleton(name) {
                return Some(ContainerElement::Singleton(singleton));
            }
        }
        self.function(namespace, name).map(ContainerElement::Function)
    }

    /// Find a property on `type_name` or any of its base types.
    #[must_use]
    pub fn find_property(&self, type_name: &str, property: &str) -> Option<&PropertyDef> {
        let mut current = self.structured_type(type_name);
        while let Some(ty) = current {
            if let Some(found) = ty.declared_property(property) {
                return Some(found);
            }
            current = ty
                .base_type
                .as_deref()
                .and_then(|base| self.structured_type(base));
        }
        None
    }

    /// Key property names of `type_name`, inherited from the root-most type
    /// that declares them.
    #[must_use]
    pub fn key_properties(&self, type_name: &str) -> &[String] {
        let mut current = self.structured_type(type_name);
        while let Some(ty) = current {
            if !ty.key.is_empty() {
                return &ty.key;
            }
            current = ty
                .base_type
                .as_deref()
                .and_then(|base| self.structured_type(base));
        }
        &[]
    }

    /// Whether `derived` is `base` or transitively derives from it.
    #[must_use]
    pub fn is_derived_from(&self, derived: &str, base: &str) -> bool {
        let mut current = Some(derived);
        while let Some(name) = current {
            if name == base {
                return true;
            }
            current = self
                .structured_type(name)
                .and_then(|ty| ty.base_type.as_deref());
        }
        false
    }

    /// Whether a value of type `source` can stand where `target` is expected.
    #[must_use]
    pub fn is_assignable(&self, target: &TypeRef, source: &TypeRef) -> bool {
        if target == source {
            return true;
        }
        match (target, source) {
            (TypeRef::Structured(t), TypeRef::Structured(s)) => self.is_derived_from(s, t),
            (
                TypeRef::Sequence(t),
                TypeRef::Collection(s) | TypeRef::Sequence(s) | TypeRef::Queryable(s),
            )
            | (TypeRef::Queryable(t), TypeRef::Queryable(s))
            | (TypeRef::Function(t), TypeRef::Function(s)) => self.is_assignable(t, s),
            _ => false,
        }
    }
}

/// Builder for a `DataModel`.
#[derive(Debug, Default)]
pub struct DataModelBuilder {
    types: Vec<EntityType>,
    entity_sets: Vec<EntitySet>,
    singletons: Vec<Singleton>,
    functions: Vec<Function>,
}

impl DataModelBuilder {
    #[must_use]
    pub fn entity_type(mut self, ty: EntityType) -> Self {
        self.types.push(ty);
        self
    }

    #[must_use]
    pub fn entity_set(mut self, name: &str, entity_type: &str) -> Self {
        self.entity_sets.push(EntitySet {
            name: Arc::from(name),
            entity_type: Arc::from(entity_type),
        });
        self
    }

    #[must_use]
    pub fn singleton(mut self, name: &str, entity_type: &str) -> Self {
        self.singletons.push(Singleton {
            name: Arc::from(name),
            entity_type: Arc::from(entity_type),
        });
        self
    }

    #[must_use]
    pub fn function(
        mut self,
        namespace: Option<&str>,
        name: &str,
        return_type: TypeRef,
        entity_set: Option<&str>,
    ) -> Self {
        self.functions.push(Function {
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
            return_type,
            entity_set: entity_set.map(Arc::from),
        });
        self
    }

    /// Validate and freeze the model.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is declared twice, an entity set or
    /// singleton refers to an unknown type, or a base type chain is cyclic
    /// or dangling.
    pub fn build(self) -> Result<DataModel, ModelError> {
        let mut model = DataModel::default();

        for ty in self.types {
            if model.types.contains_key(&ty.name) {
                return Err(ModelError::Duplicate(ty.name.to_string()));
            }
            model.types.insert(Arc::clone(&ty.name), ty);
        }

        for ty in model.types.values() {
            let mut seen = HashSet::new();
            let mut current = Some(ty);
            while let Some(t) = current {
                if !seen.insert(Arc::clone(&t.name)) {
                    return Err(ModelError::CyclicBaseType(ty.name.to_string()));
                }
                current = match t.base_type.as_deref() {
                    Some(base) => Some(
                        model
                            .types
                            .get(base)
                            .ok_or_else(|| ModelError::UnknownType(base.to_owned()))?,
                    ),
                    None => None,
                };
            }
        }

        for set in self.entity_sets {
            if !model.types.contains_key(&set.entity_type) {
                return Err(ModelError::UnknownType(set.entity_type.to_string()));
            }
            if model.entity_sets.contains_key(&set.name) {
                return Err(ModelError::Duplicate(set.name.to_string()));
            }
            model.entity_sets.insert(Arc::clone(&set.name), set);
        }

        for singleton in self.singletons {
            if !model.types.contains_key(&singleton.entity_type) {
                return Err(ModelError::UnknownType(singleton.entity_type.to_string()));
            }
            if model.singletons.contains_key(&singleton.name)
                || model.entity_sets.contains_key(&singleton.name)
            {
                return Err(ModelError::Duplicate(singleton.name.to_string()));
            }
            model.singletons.insert(Arc::clone(&singleton.name), singleton);
        }

        for function in self.functions {
            let key = (function.namespace.clone(), function.name.clone());
            if model.functions.contains_key(&key) {
                return Err(ModelError::Duplicate(function.name));
            }
            model.functions.insert(key, function);
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> DataModel {
        DataModel::builder()
            .entity_type(
                EntityType::new("Book")
                    .key(["Id"])
                    .property("Id", TypeRef::string())
                    .property("Title", TypeRef::string()),
            )
            .entity_type(
                EntityType::new("SignedBook")
                    .derives("Book")
                    .property("Signature", TypeRef::string()),
            )
            .entity_set("Books", "Book")
            .singleton("Featured", "Book")
            .function(
                Some("Library"),
                "Bestsellers",
                TypeRef::collection(TypeRef::structured("Book")),
                Some("Books"),
            )
            .build()
            .expect("valid model")
    }

    #[test]
    fn test_find_element() {
        let model = library();
        assert!(matches!(
            model.find_element(None, "Books"),
            Some(ContainerElement::EntitySet(_))
        ));
        assert!(matches!(
            model.find_element(None, "Featured"),
            Some(ContainerElement::Singleton(_))
        ));
        assert!(matches!(
            model.find_element(Some("Library"), "Bestsellers"),
            Some(ContainerElement::Function(_))
        ));
        assert!(model.find_element(Some("Library"), "Books").is_none());
        assert!(model.find_element(None, "Nothing").is_none());
    }

    #[test]
    fn test_inherited_property_and_key() {
        let model = library();
        let title = model
            .find_property("SignedBook", "Title")
            .expect("inherited property");
        assert_eq!(title.ty, TypeRef::string());
        assert_eq!(model.key_properties("SignedBook"), ["Id".to_owned()]);
        assert!(model.find_property("Book", "Signature").is_none());
    }

    #[test]
    fn test_assignability() {
        let model = library();
        let book = TypeRef::structured("Book");
        let signed = TypeRef::structured("SignedBook");

        assert!(model.is_assignable(&book, &signed));
        assert!(!model.is_assignable(&signed, &book));
        assert!(model.is_assignable(
            &TypeRef::queryable(book.clone()),
            &TypeRef::queryable(signed.clone())
        ));
        assert!(model.is_assignable(
            &TypeRef::sequence(book.clone()),
            &TypeRef::collection(signed.clone())
        ));
        // Fixed-size collections are invariant.
        assert!(!model.is_assignable(
            &TypeRef::collection(book.clone()),
            &TypeRef::collection(signed)
        ));
        assert!(!model.is_assignable(
            &TypeRef::collection(book.clone()),
            &TypeRef::queryable(book)
        ));
    }

    #[test]
    fn test_build_rejects_invalid_models() {
        let duplicate = DataModel::builder()
            .entity_type(EntityType::new("A"))
            .entity_type(EntityType::new("A"))
            .build();
        assert_eq!(duplicate.unwrap_err(), ModelError::Duplicate("A".to_owned()));

        let dangling = DataModel::builder().entity_set("Things", "Thing").build();
        assert_eq!(
            dangling.unwrap_err(),
            ModelError::UnknownType("Thing".to_owned())
        );

        let cyclic = DataModel::builder()
            .entity_type(EntityType::new("A").derives("B"))
            .entity_type(EntityType::new("B").derives("A"))
            .build();
        assert!(matches!(cyclic, Err(ModelError::CyclicBaseType(_))));
    }
}
