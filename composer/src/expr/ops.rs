//! Typed builders for query operators.
//!
//! Result types follow the standard query operators: an operator over a
//! `Queryable<T>` stays composable, over anything else it yields a
//! `Sequence`.

use std::sync::Arc;

use super::{BinaryOp, Expr, Method, SourceStub};
use crate::model::TypeRef;

fn element_of(source: &Expr) -> TypeRef {
    source
        .ty()
        .element_type()
        .cloned()
        .unwrap_or_else(|| source.ty().clone())
}

fn lambda_result(lambda: &Expr) -> TypeRef {
    lambda
        .ty()
        .function_result()
        .cloned()
        .unwrap_or_else(|| lambda.ty().clone())
}

/// Stub for a top-level entity set, singleton or function.
#[must_use]
pub fn source(namespace: Option<&str>, name: &str, ty: TypeRef) -> Expr {
    source_with_args(namespace, name, Vec::new(), ty)
}

/// Stub for a function called with arguments.
#[must_use]
pub fn source_with_args(namespace: Option<&str>, name: &str, args: Vec<Expr>, ty: TypeRef) -> Expr {
    Expr::call(
        Method::Source(SourceStub::Root {
            namespace: namespace.map(Arc::from),
            name: Arc::from(name),
        }),
        args,
        ty,
    )
}

/// Stub for a property of `parent`.
#[must_use]
pub fn source_property(parent: Expr, name: &str, ty: TypeRef) -> Expr {
    Expr::call(
        Method::Source(SourceStub::Property {
            name: Arc::from(name),
        }),
        vec![parent],
        ty,
    )
}

/// Build a single-parameter lambda.
pub fn lambda<F>(name: &str, param_ty: TypeRef, body: F) -> Expr
where
    F: FnOnce(&Expr) -> Expr,
{
    let param = Expr::parameter(name, param_ty);
    let body = body(&param);
    Expr::lambda(vec![param], body)
}

#[must_use]
pub fn where_(source: Expr, predicate: Expr) -> Expr {
    let ty = source.ty().with_element(element_of(&source));
    Expr::call(Method::Where, vec![source, predicate], ty)
}

#[must_use]
pub fn select(source: Expr, selector: Expr) -> Expr {
    let ty = source.ty().with_element(lambda_result(&selector));
    Expr::call(Method::Select, vec![source, selector], ty)
}

#[must_use]
pub fn select_many(source: Expr, selector: Expr) -> Expr {
    let inner = lambda_result(&selector);
    let element = inner.element_type().cloned().unwrap_or(inner);
    let ty = source.ty().with_element(element);
    Expr::call(Method::SelectMany, vec![source, selector], ty)
}

/// Restrict a sequence to elements of `target` (or types derived from it).
#[must_use]
pub fn of_type(source: Expr, target: TypeRef) -> Expr {
    let ty = source.ty().with_element(target);
    Expr::call(Method::OfType, vec![source], ty)
}

#[must_use]
pub fn order_by(source: Expr, key: Expr, descending: bool) -> Expr {
    let method = if descending {
        Method::OrderByDescending
    } else {
        Method::OrderBy
    };
    let ty = source.ty().with_element(element_of(&source));
    Expr::call(method, vec![source, key], ty)
}

#[must_use]
pub fn then_by(source: Expr, key: Expr, descending: bool) -> Expr {
    let method = if descending {
        Method::ThenByDescending
    } else {
        Method::ThenBy
    };
    let ty = source.ty().with_element(element_of(&source));
    Expr::call(method, vec![source, key], ty)
}

#[must_use]
pub fn skip(source: Expr, count: i64) -> Expr {
    let ty = source.ty().with_element(element_of(&source));
    Expr::call(Method::Skip, vec![source, Expr::int(count)], ty)
}

#[must_use]
pub fn take(source: Expr, count: i64) -> Expr {
    let ty = source.ty().with_element(element_of(&source));
    Expr::call(Method::Take, vec![source, Expr::int(count)], ty)
}

#[must_use]
pub fn count(source: Expr) -> Expr {
    Expr::call(Method::Count, vec![source], TypeRef::int64())
}

#[must_use]
pub fn long_count(source: Expr) -> Expr {
    Expr::call(Method::LongCount, vec![source], TypeRef::int64())
}

#[must_use]
pub fn any(source: Expr, predicate: Option<Expr>) -> Expr {
    let mut args = vec![source];
    args.extend(predicate);
    Expr::call(Method::Any, args, TypeRef::boolean())
}

#[must_use]
pub fn first_or_default(source: Expr) -> Expr {
    let ty = element_of(&source);
    Expr::call(Method::FirstOrDefault, vec![source], ty)
}

#[must_use]
pub fn as_queryable(source: Expr) -> Expr {
    let ty = TypeRef::queryable(element_of(&source));
    Expr::call(Method::AsQueryable, vec![source], ty)
}

/// Mark navigation paths to include with each element.
#[must_use]
pub fn expand(source: Expr, paths: &[&str]) -> Expr {
    let ty = source.ty().with_element(element_of(&source));
    let mut args = vec![source];
    args.extend(paths.iter().map(|path| Expr::string(path)));
    Expr::call(Method::Expand, args, ty)
}

#[must_use]
pub fn eq(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Eq, left, right)
}

#[must_use]
pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::And, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> TypeRef {
        TypeRef::structured("Book")
    }

    fn books() -> Expr {
        source(None, "Books", TypeRef::queryable(book()))
    }

    #[test]
    fn test_operator_types_over_queryable() {
        let title = lambda("b", book(), |b| Expr::member(Expr::clone(b), "Title", TypeRef::string()));
        let projected = select(books(), title);
        assert_eq!(projected.ty(), &TypeRef::queryable(TypeRef::string()));

        let first = first_or_default(take(books(), 1));
        assert_eq!(first.ty(), &book());

        assert_eq!(long_count(books()).ty(), &TypeRef::int64());
        assert_eq!(any(books(), None).ty(), &TypeRef::boolean());
    }

    #[test]
    fn test_operator_types_over_collection_member() {
        let chapters = Expr::member(
            Expr::parameter("b", book()),
            "Chapters",
            TypeRef::collection(TypeRef::structured("Chapter")),
        );
        let filtered = where_(
            chapters,
            lambda("c", TypeRef::structured("Chapter"), |_| Expr::bool(true)),
        );
        assert_eq!(
            filtered.ty(),
            &TypeRef::sequence(TypeRef::structured("Chapter"))
        );
    }

    #[test]
    fn test_select_many_flattens() {
        let chapters = lambda("b", book(), |b| {
            Expr::member(
                Expr::clone(b),
                "Chapters",
                TypeRef::collection(TypeRef::structured("Chapter")),
            )
        });
        let flat = select_many(books(), chapters);
        assert_eq!(
            flat.ty(),
            &TypeRef::queryable(TypeRef::structured("Chapter"))
        );
    }

    #[test]
    fn test_expand_display() {
        let expanded = expand(books(), &["Publisher"]);
        assert_eq!(expanded.to_string(), "Expand($Books, 'Publisher')");
        assert_eq!(expanded.ty(), books().ty());
    }
}
