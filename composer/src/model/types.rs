//! Static type references.
//!
//! Every expression node carries a `TypeRef`, the analogue of a declared
//! parameter or return shape. Collection-like types come in three flavours
//! that differ only in assignability:
//!
//! - `Collection<T>` is a fixed-size collection member (invariant in `T`)
//! - `Sequence<T>` is any enumerable sequence (covariant in `T`)
//! - `Queryable<T>` is a composable query (covariant in `T`)

use std::fmt;
use std::sync::Arc;

/// Primitive value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Int64,
    Double,
    String,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "Boolean",
            Self::Int64 => "Int64",
            Self::Double => "Double",
            Self::String => "String",
        };
        f.write_str(name)
    }
}

/// A static type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A primitive value.
    Primitive(PrimitiveType),
    /// A named structured (entity) type declared in the data model.
    Structured(Arc<str>),
    /// A fixed-size collection member.
    Collection(Box<TypeRef>),
    /// An enumerable sequence.
    Sequence(Box<TypeRef>),
    /// A composable, provider-native query.
    Queryable(Box<TypeRef>),
    /// A lambda returning the boxed type.
    Function(Box<TypeRef>),
}

impl TypeRef {
    #[must_use]
    pub const fn boolean() -> Self {
        Self::Primitive(PrimitiveType::Boolean)
    }

    #[must_use]
    pub const fn int64() -> Self {
        Self::Primitive(PrimitiveType::Int64)
    }

    #[must_use]
    pub const fn double() -> Self {
        Self::Primitive(PrimitiveType::Double)
    }

    #[must_use]
    pub const fn string() -> Self {
        Self::Primitive(PrimitiveType::String)
    }

    #[must_use]
    pub fn structured(name: &str) -> Self {
        Self::Structured(Arc::from(name))
    }

    #[must_use]
    pub fn collection(element: Self) -> Self {
        Self::Collection(Box::new(element))
    }

    #[must_use]
    pub fn sequence(element: Self) -> Self {
        Self::Sequence(Box::new(element))
    }

    #[must_use]
    pub fn queryable(element: Self) -> Self {
        Self::Queryable(Box::new(element))
    }

    #[must_use]
    pub fn function(result: Self) -> Self {
        Self::Function(Box::new(result))
    }

    /// The element type of a collection-like type.
    #[must_use]
    pub fn element_type(&self) -> Option<&Self> {
        match self {
            Self::Collection(element) | Self::Sequence(element) | Self::Queryable(element) => {
                Some(element)
            }
            Self::Primitive(_) | Self::Structured(_) | Self::Function(_) => None,
        }
    }

    /// The element type if this is a composable query.
    #[must_use]
    pub fn queryable_element(&self) -> Option<&Self> {
        match self {
            Self::Queryable(element) => Some(element),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_collection_like(&self) -> bool {
        matches!(
            self,
            Self::Collection(_) | Self::Sequence(_) | Self::Queryable(_)
        )
    }

    /// The structured type name, if any.
    #[must_use]
    pub fn structured_name(&self) -> Option<&str> {
        match self {
            Self::Structured(name) => Some(name),
            _ => None,
        }
    }

    /// The result type of a lambda type.
    #[must_use]
    pub fn function_result(&self) -> Option<&Self> {
        match self {
            Self::Function(result) => Some(result),
            _ => None,
        }
    }

    /// Rewrap `element` in the same collection flavour as `self`.
    ///
    /// Query operators over a `Queryable` stay composable; everything else
    /// degrades to a plain `Sequence`.
    #[must_use]
    pub fn with_element(&self, element: Self) -> Self {
        match self {
            Self::Queryable(_) => Self::queryable(element),
            _ => Self::sequence(element),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Structured(name) => f.write_str(name),
            Self::Collection(element) => write!(f, "Collection<{element}>"),
            Self::Sequence(element) => write!(f, "Sequence<{element}>"),
            Self::Queryable(element) => write!(f, "Queryable<{element}>"),
            Self::Function(result) => write!(f, "Function<{result}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type() {
        let books = TypeRef::queryable(TypeRef::structured("Book"));
        assert_eq!(books.element_type(), Some(&TypeRef::structured("Book")));
        assert_eq!(books.queryable_element(), Some(&TypeRef::structured("Book")));
        assert_eq!(TypeRef::string().element_type(), None);

        let chapters = TypeRef::collection(TypeRef::structured("Chapter"));
        assert!(chapters.is_collection_like());
        assert_eq!(chapters.queryable_element(), None);
    }

    #[test]
    fn test_with_element_keeps_composability() {
        let books = TypeRef::queryable(TypeRef::structured("Book"));
        assert_eq!(
            books.with_element(TypeRef::string()),
            TypeRef::queryable(TypeRef::string())
        );

        let chapters = TypeRef::collection(TypeRef::structured("Chapter"));
        assert_eq!(
            chapters.with_element(TypeRef::string()),
            TypeRef::sequence(TypeRef::string())
        );
    }

    #[test]
    fn test_display() {
        let ty = TypeRef::queryable(TypeRef::collection(TypeRef::int64()));
        assert_eq!(ty.to_string(), "Queryable<Collection<Int64>>");
    }
}
