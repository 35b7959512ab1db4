//! Runtime values for the reference evaluator
//!
//! The evaluator mirrors the generated code's observable semantics without
//! its memory layout: aggregates are reference-counted cells, enum values
//! are always tagged cells (equality compares tags only), tuples share the
//! vector representation, and maps are insertion-ordered entry lists to
//! match the runtime's linear-scan map.

use crate::ast::{Prim, Stmt, TypeRef};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Null,
    List(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered entries; lookups scan linearly
    Map(Rc<RefCell<Vec<(Value, Value)>>>),
    Struct(Rc<StructValue>),
    Enum(Rc<EnumValue>),
    Closure(Rc<ClosureValue>),
}

#[derive(Debug)]
pub struct StructValue {
    pub name: String,
    pub fields: RefCell<HashMap<String, Value>>,
}

#[derive(Debug)]
pub struct EnumValue {
    pub enum_name: String,
    pub variant: String,
    pub tag: u64,
    pub payload: Option<Value>,
}

#[derive(Debug)]
pub struct ClosureValue {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub env: HashMap<String, Value>,
}

impl Value {
    pub fn list(values: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(values)))
    }

    pub fn map() -> Value {
        Value::Map(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// The zero value for a declared type: what freshly allocated (and
    /// never reused) arena memory reads as in the generated artifact.
    pub fn zero_of(ty: &TypeRef) -> Value {
        match ty {
            TypeRef::Prim(Prim::Bool) => Value::Bool(false),
            TypeRef::Prim(p) if p.is_float() => Value::Float(0.0),
            TypeRef::Prim(Prim::Str) => Value::Null,
            TypeRef::Prim(_) => Value::Int(0),
            _ => Value::Null,
        }
    }

    /// Truthiness matches the generated `test rax, rax`: zero is false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Bool(b) => *b,
            Value::Null => false,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Result<i64, String> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float(v) => Ok(*v as i64),
            Value::Null => Ok(0),
            other => Err(format!("expected an integer, got {}", other.kind_name())),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Null => "null",
            Value::List(_) => "vec",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Enum(_) => "enum",
            Value::Closure(_) => "fn",
        }
    }

    /// Equality with the generated code's dispatch: strings by content,
    /// enums by tag, aggregates by identity, numbers numerically. Null
    /// equals the integer zero, matching its all-zero representation.
    pub fn eq_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => {
                *a as i64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Null, Value::Int(v)) | (Value::Int(v), Value::Null) => *v == 0,
            (Value::Enum(a), Value::Enum(b)) => a.tag == b.tag,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", *b as u8),
            Value::Str(s) => write!(f, "{}", s),
            Value::Null => Ok(()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => write!(f, "{} {{ .. }}", s.name),
            Value::Enum(e) => match &e.payload {
                Some(p) => write!(f, "{}::{}({})", e.enum_name, e.variant, p),
                None => write!(f, "{}::{}", e.enum_name, e.variant),
            },
            Value::Closure(_) => write!(f, "<fn>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::str("x").truthy());
    }

    #[test]
    fn test_enum_equality_is_tag_only() {
        let a = Value::Enum(Rc::new(EnumValue {
            enum_name: "Shape".into(),
            variant: "Circle".into(),
            tag: 0,
            payload: Some(Value::Int(4)),
        }));
        let b = Value::Enum(Rc::new(EnumValue {
            enum_name: "Shape".into(),
            variant: "Circle".into(),
            tag: 0,
            payload: Some(Value::Int(9)),
        }));
        assert!(a.eq_value(&b));
    }

    #[test]
    fn test_null_equals_zero() {
        assert!(Value::Null.eq_value(&Value::Int(0)));
        assert!(!Value::Null.eq_value(&Value::Int(1)));
    }

    #[test]
    fn test_list_identity_equality() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert!(!a.eq_value(&b));
        assert!(a.eq_value(&a.clone()));
    }
}
