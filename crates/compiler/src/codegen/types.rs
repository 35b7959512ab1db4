//! Static expression classification
//!
//! The language has no type inference, but the lowerer must know a type at
//! a handful of points: string/enum dispatch for comparison operators,
//! vec-vs-map dispatch for indexing and `for`, struct resolution for nested
//! field access, and argument stringification for `format`. Classification
//! is a small pure rule set over literals, recorded local types, state and
//! payload field declarations, and rule return types. Where no rule
//! applies the result is `None` and each consumer decides whether that is
//! fatal.

use super::CodeGen;
use crate::ast::{BinOp, Expr, Prim, TypeRef};

/// Builtins whose result is a string, for comparison dispatch.
pub(super) const STRING_RETURNING_BUILTINS: &[&str] =
    &["format", "to_string", "concat", "read_file"];

impl CodeGen<'_> {
    /// Best-effort static type of an expression.
    pub(super) fn static_type(&self, expr: &Expr) -> Option<TypeRef> {
        match expr {
            Expr::Int(_, Some(suffix)) if suffix.is_float() => Some(TypeRef::Prim(Prim::F64)),
            Expr::Int(_, _) => Some(TypeRef::Prim(Prim::I64)),
            Expr::Float(_) => Some(TypeRef::Prim(Prim::F64)),
            Expr::Str(_) => Some(TypeRef::Prim(Prim::Str)),
            Expr::Char(_) => Some(TypeRef::Prim(Prim::U8)),
            Expr::Bool(_) => Some(TypeRef::Prim(Prim::Bool)),
            Expr::Null => None,

            Expr::Var(name) => self.locals.get(name).and_then(|slot| slot.ty.clone()),

            Expr::State(field) => self
                .syms
                .agent(&self.current_agent)
                .and_then(|a| a.state_field(field))
                .map(|f| f.ty.clone()),

            Expr::Field(object, field) => {
                // Payload field of the signal binding
                if let Expr::Var(name) = object.as_ref()
                    && let Some((binding, frequency)) = &self.current_param
                    && name == binding
                {
                    return self
                        .syms
                        .frequency(frequency)
                        .and_then(|f| f.field(field))
                        .map(|f| f.ty.clone());
                }
                // Otherwise resolve the object to a struct and look up
                match self.static_type(object)? {
                    TypeRef::Named(struct_name) => self
                        .syms
                        .struct_layout(&struct_name)
                        .and_then(|s| s.field(field))
                        .map(|f| f.ty.clone()),
                    _ => None,
                }
            }

            Expr::Index(object, index) => {
                if matches!(index.as_ref(), Expr::Range(_, _)) {
                    // A slice has the type of the sliced vector
                    return self.static_type(object);
                }
                match self.static_type(object)? {
                    TypeRef::Vec(elem) | TypeRef::Queue(elem) => Some(*elem),
                    TypeRef::Map(_, value) => Some(*value),
                    _ => None,
                }
            }

            Expr::Range(_, _) => None,

            Expr::Binary(op, lhs, rhs) => {
                if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
                    return Some(TypeRef::Prim(Prim::Bool));
                }
                let l = self.static_type(lhs);
                let r = self.static_type(rhs);
                if matches!(l, Some(TypeRef::Prim(p)) if p.is_float())
                    || matches!(r, Some(TypeRef::Prim(p)) if p.is_float())
                {
                    Some(TypeRef::Prim(Prim::F64))
                } else {
                    Some(TypeRef::Prim(Prim::I64))
                }
            }

            Expr::Unary(_, operand) => self.static_type(operand),

            Expr::Call { name, args: _ } => {
                if STRING_RETURNING_BUILTINS.contains(&name.as_str()) {
                    return Some(TypeRef::Prim(Prim::Str));
                }
                if matches!(name.as_str(), "len" | "sum") {
                    return Some(TypeRef::Prim(Prim::I64));
                }
                // Rule call with a declared return type
                self.net
                    .find_hyphal(&self.current_hyphal)
                    .and_then(|h| h.find_rule(name))
                    .and_then(|r| r.ret.clone())
            }

            Expr::MethodCall {
                object, method, ..
            } => match method.as_str() {
                "len" => Some(TypeRef::Prim(Prim::I64)),
                "has" => Some(TypeRef::Prim(Prim::Bool)),
                "concat" => Some(TypeRef::Prim(Prim::Str)),
                "slice" => self.static_type(object),
                "get" | "pop" => match self.static_type(object)? {
                    TypeRef::Vec(elem) | TypeRef::Queue(elem) => Some(*elem),
                    TypeRef::Map(_, value) => Some(*value),
                    _ => None,
                },
                _ => None,
            },

            Expr::Cast(_, ty) => Some(ty.clone()),

            Expr::StructLit { name, .. } => Some(TypeRef::Named(name.clone())),

            Expr::ArrayLit(elems) => {
                let elem = elems
                    .first()
                    .and_then(|e| self.static_type(e))
                    .unwrap_or(TypeRef::Prim(Prim::I64));
                Some(TypeRef::Vec(Box::new(elem)))
            }

            Expr::MapLit(_) => None,

            // Tuples share the vector representation
            Expr::Tuple(_) => Some(TypeRef::Vec(Box::new(TypeRef::Prim(Prim::I64)))),

            Expr::If { then_branch, .. } => self.static_type(then_branch),

            Expr::Match { arms, .. } => arms
                .first()
                .and_then(|(_, value)| self.static_type(value)),

            Expr::EnumPath { enum_name, .. } | Expr::EnumCtor { enum_name, .. } => {
                Some(TypeRef::Named(enum_name.clone()))
            }

            Expr::FnLit { .. } => None,
        }
    }

    /// True when comparison operands should dispatch to the string builtins.
    pub(super) fn is_string_typed(&self, expr: &Expr) -> bool {
        matches!(self.static_type(expr), Some(TypeRef::Prim(Prim::Str)))
    }

    /// True when comparison operands are tagged-union pointers.
    pub(super) fn is_enum_typed(&self, expr: &Expr) -> bool {
        match self.static_type(expr) {
            Some(TypeRef::Named(name)) => self.syms.enum_layout(&name).is_some(),
            _ => false,
        }
    }

    /// True when an indexed/iterated object is a map.
    pub(super) fn is_map_typed(&self, expr: &Expr) -> bool {
        matches!(self.static_type(expr), Some(TypeRef::Map(_, _)))
    }

    /// Struct layout name of an object expression, for nested field access.
    pub(super) fn struct_name_of(&self, expr: &Expr) -> Option<String> {
        match self.static_type(expr)? {
            TypeRef::Named(name) if self.syms.struct_layout(&name).is_some() => Some(name),
            _ => None,
        }
    }
}
