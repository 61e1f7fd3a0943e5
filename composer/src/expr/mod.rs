//! Expression trees.
//!
//! An `Expr` is a cheap, shareable handle to an immutable node. Trees may be
//! DAGs: the same handle can appear under several parents. Node identity is
//! the allocation address (`Expr::id`), and rebuilding a node whose children
//! are all unchanged returns the original handle, so "was this rewritten?"
//! is an identity comparison.

pub mod ops;

use std::fmt;
use std::sync::Arc;

use crate::model::TypeRef;
use crate::query::ComposableQuery;

/// Identity of an expression node for the lifetime of its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(usize);

/// A handle to an immutable expression node.
#[derive(Clone)]
pub struct Expr(Arc<ExprNode>);

#[derive(Debug)]
struct ExprNode {
    kind: ExprKind,
    ty: TypeRef,
}

/// The node kinds.
#[derive(Debug)]
pub enum ExprKind {
    /// A named query operator applied to arguments; `args[0]` is the source.
    Call { method: Method, args: Vec<Expr> },
    /// A property read, optionally through a type cast of the target.
    Member {
        target: Expr,
        name: Arc<str>,
        cast: Option<TypeRef>,
    },
    /// A placeholder bound by an enclosing lambda.
    Parameter { name: Arc<str> },
    /// A literal or a concrete query root.
    Constant(Constant),
    /// The lambda operand of a filter, projection or ordering operator.
    Lambda { params: Vec<Expr>, body: Expr },
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
    },
    Unary { op: UnaryOp, operand: Expr },
}

/// Literal values and concrete query roots.
#[derive(Debug, Clone)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(Arc<str>),
    /// A provider-native root collection, addressed by name.
    Table(Arc<str>),
    /// A concrete composable query.
    Query(ComposableQuery),
}

impl Constant {
    /// Whether this is a plain literal (not a query root).
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        !matches!(self, Self::Table(_) | Self::Query(_))
    }
}

/// Composable query operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Where,
    Select,
    SelectMany,
    OfType,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Skip,
    Take,
    Count,
    LongCount,
    Any,
    FirstOrDefault,
    AsQueryable,
    Expand,
    /// An unresolved reference to a named model element.
    Source(SourceStub),
}

impl Method {
    const NAMED: [Self; 16] = [
        Self::Where,
        Self::Select,
        Self::SelectMany,
        Self::OfType,
        Self::OrderBy,
        Self::OrderByDescending,
        Self::ThenBy,
        Self::ThenByDescending,
        Self::Skip,
        Self::Take,
        Self::Count,
        Self::LongCount,
        Self::Any,
        Self::FirstOrDefault,
        Self::AsQueryable,
        Self::Expand,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Where => "Where",
            Self::Select => "Select",
            Self::SelectMany => "SelectMany",
            Self::OfType => "OfType",
            Self::OrderBy => "OrderBy",
            Self::OrderByDescending => "OrderByDescending",
            Self::ThenBy => "ThenBy",
            Self::ThenByDescending => "ThenByDescending",
            Self::Skip => "Skip",
            Self::Take => "Take",
            Self::Count => "Count",
            Self::LongCount => "LongCount",
            Self::Any => "Any",
            Self::FirstOrDefault => "FirstOrDefault",
            Self::AsQueryable => "AsQueryable",
            Self::Expand => "Expand",
            Self::Source(_) => "Source",
        }
    }

    /// Parse an operator name. Stubs cannot be named.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED.into_iter().find(|m| m.name() == name)
    }

    /// Whether the operator keeps the source's element type.
    #[must_use]
    pub const fn preserves_element(&self) -> bool {
        matches!(
            self,
            Self::Where
                | Self::OrderBy
                | Self::OrderByDescending
                | Self::ThenBy
                | Self::ThenByDescending
                | Self::Skip
                | Self::Take
                | Self::AsQueryable
                | Self::Expand
        )
    }
}

/// An unresolved model element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceStub {
    /// An entity set, singleton or function, by name. Function arguments
    /// follow as call arguments.
    Root {
        namespace: Option<Arc<str>>,
        name: Arc<str>,
    },
    /// A property of the element in `args[0]`.
    Property { name: Arc<str> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
}

impl Expr {
    fn new(kind: ExprKind, ty: TypeRef) -> Self {
        Self(Arc::new(ExprNode { kind, ty }))
    }

    #[must_use]
    pub fn id(&self) -> ExprId {
        ExprId(Arc::as_ptr(&self.0).addr())
    }

    /// Whether both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// The static type of the node.
    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        &self.0.ty
    }

    #[must_use]
    pub fn constant(value: Constant, ty: TypeRef) -> Self {
        Self::new(ExprKind::Constant(value), ty)
    }

    #[must_use]
    pub fn null(ty: TypeRef) -> Self {
        Self::constant(Constant::Null, ty)
    }

    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::constant(Constant::Bool(value), TypeRef::boolean())
    }

    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::constant(Constant::Int(value), TypeRef::int64())
    }

    #[must_use]
    pub fn double(value: f64) -> Self {
        Self::constant(Constant::Double(value), TypeRef::double())
    }

    #[must_use]
    pub fn string(value: &str) -> Self {
        Self::constant(Constant::String(Arc::from(value)), TypeRef::string())
    }

    /// A provider-native root collection of `element` values.
    #[must_use]
    pub fn table(name: &str, element: TypeRef) -> Self {
        Self::constant(Constant::Table(Arc::from(name)), TypeRef::queryable(element))
    }

    /// A constant wrapping a concrete composable query.
    #[must_use]
    pub fn query(query: ComposableQuery) -> Self {
        let ty = TypeRef::queryable(query.element_type().clone());
        Self::constant(Constant::Query(query), ty)
    }

    #[must_use]
    pub fn parameter(name: &str, ty: TypeRef) -> Self {
        Self::new(
            ExprKind::Parameter {
                name: Arc::from(name),
            },
            ty,
        )
    }

    #[must_use]
    pub fn lambda(params: Vec<Self>, body: Self) -> Self {
        let ty = TypeRef::function(body.ty().clone());
        Self::new(ExprKind::Lambda { params, body }, ty)
    }

    #[must_use]
    pub fn member(target: Self, name: &str, ty: TypeRef) -> Self {
        Self::new(
            ExprKind::Member {
                target,
                name: Arc::from(name),
                cast: None,
            },
            ty,
        )
    }

    /// A property read through a cast of the target to `cast`.
    #[must_use]
    pub fn member_as(target: Self, cast: TypeRef, name: &str, ty: TypeRef) -> Self {
        Self::new(
            ExprKind::Member {
                target,
                name: Arc::from(name),
                cast: Some(cast),
            },
            ty,
        )
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::new(ExprKind::Binary { op, left, right }, TypeRef::boolean())
    }

    #[must_use]
    pub fn not(operand: Self) -> Self {
        Self::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            },
            TypeRef::boolean(),
        )
    }

    #[must_use]
    pub fn call(method: Method, args: Vec<Self>, ty: TypeRef) -> Self {
        Self::new(ExprKind::Call { method, args }, ty)
    }

    /// The method if this is a call.
    #[must_use]
    pub fn method(&self) -> Option<&Method> {
        match self.kind() {
            ExprKind::Call { method, .. } => Some(method),
            _ => None,
        }
    }

    /// The call arguments, or an empty slice for other kinds.
    #[must_use]
    pub fn args(&self) -> &[Self] {
        match self.kind() {
            ExprKind::Call { args, .. } => args,
            _ => &[],
        }
    }

    /// The constant if this is one.
    #[must_use]
    pub fn as_constant(&self) -> Option<&Constant> {
        match self.kind() {
            ExprKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// The visitable children, in evaluation order. Lambda parameters are
    /// declarations and are not included.
    #[must_use]
    pub fn children(&self) -> Vec<&Self> {
        match self.kind() {
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Member { target, .. } => vec![target],
            ExprKind::Lambda { body, .. } => vec![body],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Parameter { .. } | ExprKind::Constant(_) => Vec::new(),
        }
    }

    /// Rebuild the node with every child passed through `f`.
    ///
    /// Returns this very handle when `f` hands back every child unchanged.
    pub fn try_map_children<E, F>(&self, mut f: F) -> Result<Self, E>
    where
        F: FnMut(&Self) -> Result<Self, E>,
    {
        let children = self.children();
        if children.is_empty() {
            return Ok(Self::clone(self));
        }

        let mut mapped = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in children {
            let new_child = f(child)?;
            changed |= !new_child.ptr_eq(child);
            mapped.push(new_child);
        }
        if !changed {
            return Ok(Self::clone(self));
        }

        let ty = self.ty().clone();
        let mut mapped = mapped.into_iter();
        let mut next = || mapped.next().unwrap_or_else(|| Self::null(TypeRef::boolean()));
        let kind = match self.kind() {
            ExprKind::Call { method, args } => ExprKind::Call {
                method: method.clone(),
                args: args.iter().map(|_| next()).collect(),
            },
            ExprKind::Member { name, cast, .. } => ExprKind::Member {
                target: next(),
                name: Arc::clone(name),
                cast: cast.clone(),
            },
            ExprKind::Lambda { params, .. } => ExprKind::Lambda {
                params: params.iter().map(Self::clone).collect(),
                body: next(),
            },
            ExprKind::Binary { op, .. } => ExprKind::Binary {
                op: *op,
                left: next(),
                right: next(),
            },
            ExprKind::Unary { op, .. } => ExprKind::Unary {
                op: *op,
                operand: next(),
            },
            ExprKind::Parameter { .. } | ExprKind::Constant(_) => return Ok(Self::clone(self)),
        };
        Ok(Self::new(kind, ty))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self}: {})", self.ty())
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Double(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Table(name) => write!(f, "table({name})"),
            Self::Query(query) => write!(f, "query({})", query.expression()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Call {
                method: Method::Source(SourceStub::Root { namespace, name }),
                args,
            } => {
                match namespace {
                    Some(ns) => write!(f, "${ns}.{name}")?,
                    None => write!(f, "${name}")?,
                }
                if !args.is_empty() {
                    write_args(f, args)?;
                }
                Ok(())
            }
            ExprKind::Call {
                method: Method::Source(SourceStub::Property { name }),
                args,
            } => match args.first() {
                Some(parent) => write!(f, "{parent}/${name}"),
                None => write!(f, "${name}"),
            },
            ExprKind::Call { method, args } => {
                f.write_str(method.name())?;
                write_args(f, args)
            }
            ExprKind::Member { target, name, cast } => match cast {
                Some(cast) => write!(f, "({target} as {cast}).{name}"),
                None => write!(f, "{target}.{name}"),
            },
            ExprKind::Parameter { name } => f.write_str(name),
            ExprKind::Constant(c) => write!(f, "{c}"),
            ExprKind::Lambda { params, body } => {
                let names: Vec<String> = params.iter().map(ToString::to_string).collect();
                write!(f, "{} => {body}", names.join(", "))
            }
            ExprKind::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => write!(f, "!{operand}"),
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicate() -> Expr {
        let b = Expr::parameter("b", TypeRef::structured("Book"));
        let id = Expr::member(Expr::clone(&b), "Id", TypeRef::string());
        Expr::lambda(vec![b], Expr::binary(BinaryOp::Eq, id, Expr::string("1")))
    }

    #[test]
    fn test_identity() {
        let a = Expr::int(1);
        let b = Expr::clone(&a);
        let c = Expr::int(1);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.id());
        assert!(!a.ptr_eq(&c));
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_map_children_unchanged_returns_same_handle() {
        let lambda = predicate();
        let mapped = lambda
            .try_map_children(|child| Ok::<_, ()>(Expr::clone(child)))
            .expect("map");
        assert!(mapped.ptr_eq(&lambda));
    }

    #[test]
    fn test_map_children_rebuilds_changed_nodes() {
        let sum = Expr::binary(BinaryOp::And, Expr::bool(true), Expr::bool(false));
        let mapped = sum
            .try_map_children(|child| match child.as_constant() {
                Some(Constant::Bool(false)) => Ok::<_, ()>(Expr::bool(true)),
                _ => Ok(Expr::clone(child)),
            })
            .expect("map");
        assert!(!mapped.ptr_eq(&sum));
        assert_eq!(mapped.to_string(), "(true && true)");
        assert_eq!(mapped.ty(), &TypeRef::boolean());
    }

    #[test]
    fn test_map_children_keeps_lambda_parameters() {
        let lambda = predicate();
        let mapped = lambda
            .try_map_children(|_| Ok::<_, ()>(Expr::bool(true)))
            .expect("map");
        let (ExprKind::Lambda { params: before, .. }, ExprKind::Lambda { params: after, .. }) =
            (lambda.kind(), mapped.kind())
        else {
            panic!("expected lambdas");
        };
        assert!(before[0].ptr_eq(&after[0]));
        assert_eq!(mapped.to_string(), "b => true");
    }

    #[test]
    fn test_display() {
        assert_eq!(predicate().to_string(), "b => (b.Id == '1')");
        let stub = Expr::call(
            Method::Source(SourceStub::Root {
                namespace: None,
                name: Arc::from("Books"),
            }),
            Vec::new(),
            TypeRef::queryable(TypeRef::structured("Book")),
        );
        let take = Expr::call(Method::Take, vec![stub, Expr::int(2)], TypeRef::int64());
        assert_eq!(take.to_string(), "Take($Books, 2)");
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in Method::NAMED {
            assert_eq!(Method::from_name(method.name()), Some(method));
        }
        assert_eq!(Method::from_name("Source"), None);
        assert_eq!(Method::from_name("where"), None);
    }
}
