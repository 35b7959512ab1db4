//! Program tree for Mycelial networks
//!
//! The parser produces a single [`Network`]: frequencies, user types,
//! hyphal definitions and the topology (fruiting bodies, spawns, sockets).
//! Declaration order is significant throughout - layout offsets, enum
//! ordinals, routing and queue servicing all follow it.

use crate::lexer::NumericSuffix;

/// A parsed network: the root of the program tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub name: String,
    /// Scheduler constant overrides from the optional `config` block
    pub config: Vec<(String, i64)>,
    pub frequencies: Vec<FrequencyDef>,
    pub types: Vec<TypeDef>,
    pub hyphae: Vec<HyphalDef>,
    pub topology: Topology,
}

impl Network {
    pub fn find_frequency(&self, name: &str) -> Option<&FrequencyDef> {
        self.frequencies.iter().find(|f| f.name == name)
    }

    pub fn find_hyphal(&self, name: &str) -> Option<&HyphalDef> {
        self.hyphae.iter().find(|h| h.name == name)
    }
}

/// A named, typed signal schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Struct(StructDef),
    Enum(EnumDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Struct(s) => &s.name,
            TypeDef::Enum(e) => &e.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<VariantDef>,
}

/// An enum variant; `inner` is the optional payload type.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    pub inner: Option<TypeRef>,
}

/// A hyphal type: state fields plus the handlers and rules bound to it.
#[derive(Debug, Clone, PartialEq)]
pub struct HyphalDef {
    pub name: String,
    pub state: Vec<StateFieldDef>,
    pub handlers: Vec<Handler>,
    pub rules: Vec<RuleDef>,
}

impl HyphalDef {
    pub fn find_rule(&self, name: &str) -> Option<&RuleDef> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn signal_handler(&self, frequency: &str) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|h| matches!(h, Handler::Signal { frequency: f, .. } if f == frequency))
    }

    pub fn rest_handler(&self) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|h| matches!(h, Handler::Rest { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateFieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Handler {
    /// `on rest { ... }` - runs once during initialization
    Rest { body: Vec<Stmt> },
    /// `on signal(F, p) [when g] { ... }`
    Signal {
        frequency: String,
        binding: String,
        guard: Option<Expr>,
        body: Vec<Stmt>,
    },
    /// `on cycle N { ... }` - runs when the tidal counter reaches N
    Cycle { number: u64, body: Vec<Stmt> },
}

/// A local procedure callable from handlers and other rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDef {
    pub name: String,
    pub params: Vec<(String, TypeRef)>,
    pub ret: Option<TypeRef>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub fruiting_bodies: Vec<String>,
    pub spawns: Vec<Spawn>,
    pub sockets: Vec<Socket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spawn {
    pub hyphal: String,
    pub id: String,
}

/// A routing edge `source -[frequency]-> destination`.
#[derive(Debug, Clone, PartialEq)]
pub struct Socket {
    pub source: String,
    pub frequency: String,
    pub dest: SocketDest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketDest {
    Named(String),
    /// `*` - broadcast to every spawned agent, in spawn order
    Broadcast,
}

// ============================================================================
//                                  TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Str,
}

impl Prim {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "u8" => Some(Prim::U8),
            "u16" => Some(Prim::U16),
            "u32" => Some(Prim::U32),
            "u64" => Some(Prim::U64),
            "i8" => Some(Prim::I8),
            "i16" => Some(Prim::I16),
            "i32" => Some(Prim::I32),
            "i64" => Some(Prim::I64),
            "f32" => Some(Prim::F32),
            "f64" => Some(Prim::F64),
            "bool" | "boolean" => Some(Prim::Bool),
            "string" => Some(Prim::Str),
            _ => None,
        }
    }

    /// Storage size in bytes. `string` is pointer-shaped.
    pub fn size(self) -> u64 {
        match self {
            Prim::U8 | Prim::I8 | Prim::Bool => 1,
            Prim::U16 | Prim::I16 => 2,
            Prim::U32 | Prim::I32 | Prim::F32 => 4,
            Prim::U64 | Prim::I64 | Prim::F64 | Prim::Str => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Prim::I8 | Prim::I16 | Prim::I32 | Prim::I64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Prim::F32 | Prim::F64)
    }
}

/// A type reference as written in source. Named types resolve to structs or
/// enums at layout time.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Prim(Prim),
    Named(String),
    Vec(Box<TypeRef>),
    Map(Box<TypeRef>, Box<TypeRef>),
    Queue(Box<TypeRef>),
}

impl TypeRef {
    /// Pointer-shaped types occupy 8 bytes and hold a heap address.
    pub fn is_pointer_shaped(&self) -> bool {
        match self {
            TypeRef::Prim(p) => *p == Prim::Str,
            _ => true,
        }
    }
}

// ============================================================================
//                               EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64, Option<NumericSuffix>),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Null,
    /// A bare identifier: let-local, rule parameter or the signal binding
    Var(String),
    /// `state.field` - a field of the active agent's state region
    State(String),
    /// `a.b` on an arbitrary object expression
    Field(Box<Expr>, String),
    /// `a[i]`; an index of `a..b` selects a slice
    Index(Box<Expr>, Box<Expr>),
    /// `a..b`
    Range(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    /// `name(args)` - rule call, builtin call, or closure-local invocation
    Call { name: String, args: Vec<Expr> },
    /// `obj.method(args)` - sugar for the vec/map/string builtin surface
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// `expr as T`
    Cast(Box<Expr>, TypeRef),
    StructLit {
        name: String,
        fields: Vec<(String, Expr)>,
    },
    ArrayLit(Vec<Expr>),
    /// Map literal form; the parser does not currently accept entries
    MapLit(Vec<(Expr, Expr)>),
    Tuple(Vec<Expr>),
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<(Vec<Pattern>, Expr)>,
    },
    /// `T::V` - enum variant without payload
    EnumPath { enum_name: String, variant: String },
    /// `T::V(args)` - enum variant constructor
    EnumCtor {
        enum_name: String,
        variant: String,
        args: Vec<Expr>,
    },
    /// `fn(a, b) { ... }` - closure literal (evaluator only)
    FnLit { params: Vec<String>, body: Vec<Stmt> },
}

// ============================================================================
//                                STATEMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Var(String),
    /// `state.field = ...`
    State(String),
    /// `obj.field = ...` (signal payload or struct pointer)
    Field { object: Expr, field: String },
    /// `obj[i] = ...`
    Index { object: Expr, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForBinding {
    /// `for item [: T] in e`
    Item { name: String, ty: Option<TypeRef> },
    /// `for k, v in e` - key/value iteration over a map
    KeyValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    /// Alternation `p | q` flattened left-to-right
    pub patterns: Vec<Pattern>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Literal: string, number, char, bool or null
    Literal(Expr),
    /// Bare identifier: matches anything, binds the scrutinee
    Binding(String),
    /// `T::V` or `T::V(b1, b2)`
    Variant {
        enum_name: String,
        variant: String,
        bindings: Vec<String>,
    },
    Tuple(Vec<Pattern>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportValue {
    /// `report name: expr`
    Expr(Expr),
    /// `report Tag { fields }` - implicit struct literal
    Fields(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeRef>,
        value: Expr,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    /// `emit F { field: e, ... }`
    Emit {
        frequency: String,
        fields: Vec<(String, Expr)>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        binding: ForBinding,
        iter: Expr,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Match {
        scrutinee: Expr,
        arms: Vec<MatchArm>,
    },
    Report {
        label: String,
        value: ReportValue,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Expr(Expr),
}
