//! Tree-walking evaluator for provider-native expressions.
//!
//! Lambda parameters are bound by name in a scope stack, innermost first,
//! like variable bindings in a pattern match.

use std::cmp::Ordering;

use crate::expr::{BinaryOp, Constant, Expr, ExprKind, Method, UnaryOp};
use crate::model::DataModel;
use crate::query::{ProviderError, Value};

use super::MemoryStore;

pub(super) struct Evaluator<'a> {
    store: &'a MemoryStore,
    model: &'a DataModel,
    scopes: Vec<(&'a str, Value)>,
}

impl<'a> Evaluator<'a> {
    pub(super) const fn new(store: &'a MemoryStore, model: &'a DataModel) -> Self {
        Self {
            store,
            model,
            scopes: Vec::new(),
        }
    }

    pub(super) fn eval(&mut self, expression: &'a Expr) -> Result<Value, ProviderError> {
        match expression.kind() {
            ExprKind::Constant(constant) => self.constant(constant),
            ExprKind::Parameter { name } => self
                .scopes
                .iter()
                .rev()
                .find(|(bound, _)| *bound == &**name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| ProviderError::Evaluation(format!("unbound parameter: {name}"))),
            ExprKind::Member { target, name, cast } => {
                let target = self.eval(target)?;
                match target {
                    Value::Null => Ok(Value::Null),
                    Value::Entity(record) => {
                        if let Some(cast) = cast {
                            let Some(cast) = cast.structured_name() else {
                                return Err(ProviderError::Unsupported(format!(
                                    "cast to {cast}"
                                )));
                            };
                            if !self.model.is_derived_from(&record.type_name, cast) {
                                return Ok(Value::Null);
                            }
                        }
                        Ok(record.get(name).cloned().unwrap_or(Value::Null))
                    }
                    other => Err(ProviderError::Evaluation(format!(
                        "cannot read {name} from {other}"
                    ))),
                }
            }
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right),
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                let value = self.eval(operand)?;
                Ok(Value::Bool(!truthy(&value)))
            }
            ExprKind::Lambda { .. } => Err(ProviderError::Unsupported(format!(
                "lambda outside an operator: {expression}"
            ))),
            ExprKind::Call { method, args } => self.call(expression, method, args),
        }
    }

    fn constant(&mut self, constant: &'a Constant) -> Result<Value, ProviderError> {
        Ok(match constant {
            Constant::Null => Value::Null,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Double(n) => Value::Double(*n),
            Constant::String(s) => Value::String(s.to_string()),
            Constant::Table(name) => {
                let rows = self
                    .store
                    .table(name)
                    .ok_or_else(|| ProviderError::Evaluation(format!("unknown table: {name}")))?;
                Value::Collection(rows.to_vec())
            }
            Constant::Query(query) => return self.eval(query.expression()),
        })
    }

    fn binary(&mut self, op: BinaryOp, left: &'a Expr, right: &'a Expr) -> Result<Value, ProviderError> {
        match op {
            BinaryOp::And => {
                let result = truthy(&self.eval(left)?) && truthy(&self.eval(right)?);
                return Ok(Value::Bool(result));
            }
            BinaryOp::Or => {
                let result = truthy(&self.eval(left)?) || truthy(&self.eval(right)?);
                return Ok(Value::Bool(result));
            }
            _ => {}
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;
        let ordering = left.compare(&right);
        let result = match op {
            BinaryOp::Eq => left.loose_eq(&right),
            BinaryOp::Ne => !left.loose_eq(&right),
            BinaryOp::Lt => ordering == Some(Ordering::Less),
            BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            BinaryOp::Gt => ordering == Some(Ordering::Greater),
            BinaryOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            BinaryOp::And | BinaryOp::Or => false,
        };
        Ok(Value::Bool(result))
    }

    fn call(
        &mut self,
        expression: &'a Expr,
        method: &'a Method,
        args: &'a [Expr],
    ) -> Result<Value, ProviderError> {
        if let Method::Source(_) = method {
            return Err(ProviderError::Unsupported(format!(
                "unsourced model reference {expression}"
            )));
        }
        let source = args
            .first()
            .ok_or_else(|| ProviderError::Evaluation(format!("{} has no source", method.name())))?;

        match method {
            Method::Where => {
                let predicate = lambda_arg(args, 1)?;
                let mut kept = Vec::new();
                for row in self.rows(source)? {
                    if truthy(&self.apply(predicate, row.clone())?) {
                        kept.push(row);
                    }
                }
                Ok(Value::Collection(kept))
            }
            Method::Select => {
                let selector = lambda_arg(args, 1)?;
                let rows = self.rows(source)?;
                let projected = rows
                    .into_iter()
                    .map(|row| self.apply(selector, row))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Collection(projected))
            }
            Method::SelectMany => {
                let selector = lambda_arg(args, 1)?;
                let mut flattened = Vec::new();
                for row in self.rows(source)? {
                    flattened.extend(self.apply(selector, row)?.into_rows());
                }
                Ok(Value::Collection(flattened))
            }
            Method::OfType => {
                let target = expression
                    .ty()
                    .element_type()
                    .and_then(|element| element.structured_name())
                    .ok_or_else(|| {
                        ProviderError::Unsupported(format!("OfType over {}", expression.ty()))
                    })?;
                let rows = self.rows(source)?;
                let kept = rows
                    .into_iter()
                    .filter(|row| {
                        row.as_record()
                            .is_some_and(|record| self.model.is_derived_from(&record.type_name, target))
                    })
                    .collect();
                Ok(Value::Collection(kept))
            }
            Method::OrderBy
            | Method::OrderByDescending
            | Method::ThenBy
            | Method::ThenByDescending => self.ordered(expression),
            Method::Skip => {
                let n = self.count_arg(args)?;
                let rows = self.rows(source)?;
                Ok(Value::Collection(rows.into_iter().skip(n).collect()))
            }
            Method::Take => {
                let n = self.count_arg(args)?;
                let rows = self.rows(source)?;
                Ok(Value::Collection(rows.into_iter().take(n).collect()))
            }
            Method::Count | Method::LongCount => {
                let rows = self.rows(source)?;
                let count = i64::try_from(rows.len())
                    .map_err(|_| ProviderError::Evaluation("count overflow".to_owned()))?;
                Ok(Value::Int(count))
            }
            Method::Any => {
                let rows = self.rows(source)?;
                let Some(predicate) = args.get(1) else {
                    return Ok(Value::Bool(!rows.is_empty()));
                };
                for row in rows {
                    if truthy(&self.apply(predicate, row)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Method::FirstOrDefault => {
                let rows = self.rows(source)?;
                Ok(rows.into_iter().next().unwrap_or(Value::Null))
            }
            // Navigation values are stored inline, so there is nothing to load.
            Method::AsQueryable | Method::Expand => self.eval(source),
            Method::Source(_) => Err(ProviderError::Unsupported(format!(
                "unsourced model reference {expression}"
            ))),
        }
    }

    /// Evaluate an `OrderBy ... ThenBy ...` chain with one stable sort.
    fn ordered(&mut self, expression: &'a Expr) -> Result<Value, ProviderError> {
        let mut keys = Vec::new();
        let mut current = expression;
        let base = loop {
            let (descending, primary) = match current.method() {
                Some(Method::OrderBy) => (false, true),
                Some(Method::OrderByDescending) => (true, true),
                Some(Method::ThenBy) => (false, false),
                Some(Method::ThenByDescending) => (true, false),
                _ => {
                    return Err(ProviderError::Unsupported(format!(
                        "ThenBy without OrderBy: {expression}"
                    )));
                }
            };
            let args = current.args();
            keys.push((lambda_arg(args, 1)?, descending));
            let source = args.first().ok_or_else(|| {
                ProviderError::Evaluation("ordering has no source".to_owned())
            })?;
            if primary {
                break source;
            }
            current = source;
        };
        keys.reverse();

        let mut keyed = Vec::new();
        for row in self.rows(base)? {
            let values = keys
                .iter()
                .map(|&(key, _)| self.apply(key, row.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((values, row));
        }

        keyed.sort_by(|(a, _), (b, _)| {
            keys.iter()
                .zip(a.iter().zip(b))
                .map(|((_, descending), (a, b))| {
                    let ordering = a.compare(b).unwrap_or(Ordering::Equal);
                    if *descending { ordering.reverse() } else { ordering }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        Ok(Value::Collection(keyed.into_iter().map(|(_, row)| row).collect()))
    }

    fn rows(&mut self, source: &'a Expr) -> Result<Vec<Value>, ProviderError> {
        match self.eval(source)? {
            Value::Collection(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(ProviderError::Evaluation(format!(
                "expected a sequence, got {other}"
            ))),
        }
    }

    fn count_arg(&mut self, args: &'a [Expr]) -> Result<usize, ProviderError> {
        let count = args
            .get(1)
            .ok_or_else(|| ProviderError::Evaluation("missing count".to_owned()))?;
        match self.eval(count)? {
            Value::Int(n) => Ok(usize::try_from(n).unwrap_or(0)),
            other => Err(ProviderError::Evaluation(format!(
                "count must be an integer, got {other}"
            ))),
        }
    }

    fn apply(&mut self, lambda: &'a Expr, argument: Value) -> Result<Value, ProviderError> {
        let ExprKind::Lambda { params, body } = lambda.kind() else {
            return Err(ProviderError::Unsupported(format!("not a lambda: {lambda}")));
        };
        let [param] = params.as_slice() else {
            return Err(ProviderError::Unsupported(format!(
                "lambda with {} parameters",
                params.len()
            )));
        };
        let ExprKind::Parameter { name } = param.kind() else {
            return Err(ProviderError::Unsupported(format!("lambda parameter {param}")));
        };

        self.scopes.push((&**name, argument));
        let result = self.eval(body);
        self.scopes.pop();
        result
    }
}

fn lambda_arg(args: &[Expr], index: usize) -> Result<&Expr, ProviderError> {
    args.get(index)
        .ok_or_else(|| ProviderError::Evaluation(format!("missing operand {index}")))
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::expr::ops;
    use crate::model::TypeRef;
    use crate::query::Record;
    use crate::testing::{book, bookstore_model};

    fn store() -> MemoryStore {
        MemoryStore::new().with_table(
            "Books",
            [
                Record::new("Book").with("Id", "1").with("Title", "Dune").with("Pages", 412_i64),
                Record::new("Book").with("Id", "2").with("Title", "Emma").with("Pages", 474_i64),
                Record::new("SignedBook")
                    .with("Id", "3")
                    .with("Title", "Dune")
                    .with("Pages", 271_i64)
                    .with("Signature", "FH"),
            ]
            .map(Value::from),
        )
    }

    fn table() -> Expr {
        Expr::table("Books", book())
    }

    fn member(param: &Expr, name: &str, ty: TypeRef) -> Expr {
        Expr::member(Expr::clone(param), name, ty)
    }

    fn ids(value: &Value) -> Vec<String> {
        match value {
            Value::Collection(rows) => rows
                .iter()
                .filter_map(|row| match row.as_record()?.get("Id")? {
                    Value::String(id) => Some(id.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn eval(expression: &Expr) -> Result<Value, ProviderError> {
        let store = store();
        let model = bookstore_model();
        Evaluator::new(&store, &model).eval(expression)
    }

    #[test]
    fn test_where_and_paging() {
        let dune = ops::where_(
            table(),
            ops::lambda("b", book(), |b| {
                ops::eq(member(b, "Title", TypeRef::string()), Expr::string("Dune"))
            }),
        );
        assert_eq!(ids(&eval(&dune).expect("eval")), ["1", "3"]);
        assert_eq!(ids(&eval(&ops::skip(Expr::clone(&dune), 1)).expect("eval")), ["3"]);
        assert_eq!(ids(&eval(&ops::take(dune, 1)).expect("eval")), ["1"]);
    }

    #[test]
    fn test_ordering_chain() {
        let title = ops::lambda("b", book(), |b| member(b, "Title", TypeRef::string()));
        let pages = ops::lambda("b", book(), |b| member(b, "Pages", TypeRef::int64()));
        let ordered = ops::then_by(ops::order_by(table(), title, false), pages, true);
        assert_eq!(ids(&eval(&ordered).expect("eval")), ["1", "3", "2"]);

        let orphan = ops::then_by(table(), ops::lambda("b", book(), |b| Expr::clone(b)), false);
        assert!(matches!(eval(&orphan), Err(ProviderError::Unsupported(_))));
    }

    #[test]
    fn test_of_type_and_cast_member() {
        let signed = TypeRef::structured("SignedBook");
        let only_signed = ops::of_type(table(), signed.clone());
        assert_eq!(ids(&eval(&only_signed).expect("eval")), ["3"]);

        let signatures = ops::select(
            table(),
            ops::lambda("b", book(), |b| {
                Expr::member_as(Expr::clone(b), signed.clone(), "Signature", TypeRef::string())
            }),
        );
        assert_eq!(
            eval(&signatures).expect("eval"),
            Value::Collection(vec![Value::Null, Value::Null, Value::from("FH")])
        );
    }

    #[test]
    fn test_scalars() {
        assert_eq!(eval(&ops::long_count(table())).expect("eval"), Value::Int(3));
        assert_eq!(eval(&ops::any(table(), None)).expect("eval"), Value::Bool(true));

        let long = ops::lambda("b", book(), |b| {
            Expr::binary(BinaryOp::Gt, member(b, "Pages", TypeRef::int64()), Expr::int(450))
        });
        assert_eq!(eval(&ops::any(table(), Some(long))).expect("eval"), Value::Bool(true));

        let first = eval(&ops::first_or_default(table())).expect("eval");
        assert_eq!(first.as_record().and_then(|r| r.get("Id")), Some(&Value::from("1")));

        let empty = ops::where_(table(), ops::lambda("b", book(), |_| Expr::bool(false)));
        assert_eq!(eval(&ops::first_or_default(empty)).expect("eval"), Value::Null);
    }

    #[test]
    fn test_query_constant_evaluates_its_expression() {
        let store = store();
        let model = Arc::new(bookstore_model());
        let provider = Arc::new(crate::memory::MemoryProvider::new(store.clone(), Arc::clone(&model)));
        let query = crate::query::ComposableQuery::new(provider, table(), book());
        let counted = ops::long_count(Expr::query(query));

        assert_eq!(
            Evaluator::new(&store, &model).eval(&counted).expect("eval"),
            Value::Int(3)
        );
    }

    #[test]
    fn test_unbound_parameter() {
        let error = eval(&Expr::parameter("x", book())).unwrap_err();
        assert_eq!(error, ProviderError::Evaluation("unbound parameter: x".to_owned()));
    }
}
