//! Recursive-descent parser for Mycelial
//!
//! Token stream -> [`Network`] program tree. Operator precedence uses
//! explicit climbing, one function per level, lowest binding first:
//!
//! ```text
//! || ; && ; == != ; .. ; | ; ^ ; & ; << >> ; < > <= >= ; + - ; * / % ; unary ; postfix
//! ```
//!
//! The postfix chain accepts `.field`, `.method(args)`, `(args)`, `[index]`,
//! `as T`, `::Variant` and `::Variant(args)` in any order.
//!
//! A `{` after an identifier in primary position opens a struct literal iff
//! (i) no newline separates the identifier from the `{`, (ii) no operator
//! immediately precedes the identifier in the surrounding expression, and
//! (iii) the identifier starts uppercase, or the brace is empty, or its
//! first content is `ident :`. Otherwise the `{` closes the surrounding
//! context (an `if`/`while`/`for` body, a match arm, ...).

use crate::ast::{
    AssignTarget, BinOp, EnumDef, Expr, FieldDef, ForBinding, FrequencyDef, Handler, HyphalDef,
    MatchArm, Network, Pattern, Prim, ReportValue, RuleDef, Socket, SocketDest, Spawn,
    StateFieldDef, Stmt, StructDef, Topology, TypeDef, TypeRef, UnOp, VariantDef,
};
use crate::lexer::{Token, TokenKind, tokenize};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Convenience entry: tokenize and parse in one step.
pub fn parse_network(source: &str) -> Result<Network, String> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check_keyword(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(kw))
    }

    fn check_punct(&self, p: char) -> bool {
        self.peek().is_some_and(|t| t.is_punct(p))
    }

    fn check_op(&self, op: &str) -> bool {
        self.peek().is_some_and(|t| t.is_op(op))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.check_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, p: char) -> bool {
        if self.check_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &str) -> String {
        match self.peek() {
            Some(t) => format!(
                "parse error at {}:{}: expected {}, got '{}'",
                t.line, t.column, expected, t.lexeme
            ),
            None => format!("parse error: expected {}, got end of input", expected),
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), String> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", kw)))
        }
    }

    fn expect_punct(&mut self, p: char) -> Result<(), String> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", p)))
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", op)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, String> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Ident => {
                let name = t.lexeme.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(what)),
        }
    }

    // ------------------------------------------------------------------
    // Network structure
    // ------------------------------------------------------------------

    pub fn parse(&mut self) -> Result<Network, String> {
        self.expect_keyword("network")?;
        let name = self.expect_ident("network name")?;
        self.expect_punct('{')?;

        let mut network = Network {
            name,
            config: Vec::new(),
            frequencies: Vec::new(),
            types: Vec::new(),
            hyphae: Vec::new(),
            topology: Topology {
                fruiting_bodies: Vec::new(),
                spawns: Vec::new(),
                sockets: Vec::new(),
            },
        };

        while !self.check_punct('}') {
            if self.eat_keyword("config") {
                self.parse_config_block(&mut network)?;
            } else if self.eat_keyword("frequencies") {
                self.parse_frequencies_block(&mut network)?;
            } else if self.eat_keyword("types") {
                self.parse_types_block(&mut network)?;
            } else if self.eat_keyword("hyphae") {
                self.parse_hyphae_block(&mut network)?;
            } else if self.eat_keyword("topology") {
                self.parse_topology_block(&mut network)?;
            } else {
                return Err(self.error(
                    "'config', 'frequencies', 'types', 'hyphae' or 'topology'",
                ));
            }
        }
        self.expect_punct('}')?;

        if !self.at_end() {
            return Err(self.error("end of input"));
        }
        Ok(network)
    }

    fn parse_config_block(&mut self, network: &mut Network) -> Result<(), String> {
        self.expect_punct('{')?;
        while !self.check_punct('}') {
            let key = self.expect_ident("config key")?;
            self.expect_punct(':')?;
            let value = match self.peek() {
                Some(t) => match t.kind {
                    TokenKind::Int { value, .. } => {
                        self.pos += 1;
                        value
                    }
                    _ => return Err(self.error("integer config value")),
                },
                None => return Err(self.error("integer config value")),
            };
            network.config.push((key, value));
            self.eat_punct(',');
        }
        self.expect_punct('}')
    }

    fn parse_frequencies_block(&mut self, network: &mut Network) -> Result<(), String> {
        self.expect_punct('{')?;
        while !self.check_punct('}') {
            self.expect_keyword("frequency")?;
            let name = self.expect_ident("frequency name")?;
            let fields = self.parse_field_list()?;
            network.frequencies.push(FrequencyDef { name, fields });
        }
        self.expect_punct('}')
    }

    /// `{ name: type [,] ... }`
    fn parse_field_list(&mut self) -> Result<Vec<FieldDef>, String> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.check_punct('}') {
            let name = self.expect_ident("field name")?;
            self.expect_punct(':')?;
            let ty = self.parse_type()?;
            fields.push(FieldDef { name, ty });
            self.eat_punct(',');
        }
        self.expect_punct('}')?;
        Ok(fields)
    }

    fn parse_types_block(&mut self, network: &mut Network) -> Result<(), String> {
        self.expect_punct('{')?;
        while !self.check_punct('}') {
            if self.eat_keyword("struct") {
                let name = self.expect_ident("struct name")?;
                let fields = self.parse_field_list()?;
                network.types.push(TypeDef::Struct(StructDef { name, fields }));
            } else if self.eat_keyword("enum") {
                let name = self.expect_ident("enum name")?;
                self.expect_punct('{')?;
                let mut variants = Vec::new();
                while !self.check_punct('}') {
                    let vname = self.expect_ident("variant name")?;
                    let inner = if self.eat_punct('(') {
                        let ty = self.parse_type()?;
                        self.expect_punct(')')?;
                        Some(ty)
                    } else {
                        None
                    };
                    variants.push(VariantDef { name: vname, inner });
                    self.eat_punct(',');
                }
                self.expect_punct('}')?;
                network.types.push(TypeDef::Enum(EnumDef { name, variants }));
            } else {
                return Err(self.error("'struct' or 'enum'"));
            }
        }
        self.expect_punct('}')
    }

    fn parse_hyphae_block(&mut self, network: &mut Network) -> Result<(), String> {
        self.expect_punct('{')?;
        while !self.check_punct('}') {
            self.expect_keyword("hyphal")?;
            let hyphal = self.parse_hyphal_def()?;
            network.hyphae.push(hyphal);
        }
        self.expect_punct('}')
    }

    fn parse_hyphal_def(&mut self) -> Result<HyphalDef, String> {
        let name = self.expect_ident("hyphal name")?;
        self.expect_punct('{')?;

        let mut hyphal = HyphalDef {
            name,
            state: Vec::new(),
            handlers: Vec::new(),
            rules: Vec::new(),
        };

        while !self.check_punct('}') {
            if self.eat_keyword("state") {
                self.parse_state_block(&mut hyphal)?;
            } else if self.eat_keyword("on") {
                hyphal.handlers.push(self.parse_handler()?);
            } else if self.eat_keyword("rule") {
                hyphal.rules.push(self.parse_rule()?);
            } else {
                return Err(self.error("'state', 'on' or 'rule'"));
            }
        }
        self.expect_punct('}')?;
        Ok(hyphal)
    }

    fn parse_state_block(&mut self, hyphal: &mut HyphalDef) -> Result<(), String> {
        self.expect_punct('{')?;
        while !self.check_punct('}') {
            let name = self.expect_ident("state field name")?;
            self.expect_punct(':')?;
            let ty = self.parse_type()?;
            let default = if self.eat_punct('=') {
                Some(self.parse_expr(true)?)
            } else {
                None
            };
            hyphal.state.push(StateFieldDef { name, ty, default });
            self.eat_punct(',');
        }
        self.expect_punct('}')
    }

    fn parse_handler(&mut self) -> Result<Handler, String> {
        if self.eat_keyword("rest") {
            let body = self.parse_block()?;
            Ok(Handler::Rest { body })
        } else if self.eat_keyword("signal") {
            self.expect_punct('(')?;
            let frequency = self.expect_ident("frequency name")?;
            self.expect_punct(',')?;
            let binding = self.expect_ident("signal binding")?;
            self.expect_punct(')')?;
            let guard = if self.eat_keyword("when") {
                Some(self.parse_expr(true)?)
            } else {
                None
            };
            let body = self.parse_block()?;
            Ok(Handler::Signal {
                frequency,
                binding,
                guard,
                body,
            })
        } else if self.eat_keyword("cycle") {
            let number = match self.peek() {
                Some(t) => match t.kind {
                    TokenKind::Int { value, .. } if value >= 0 => {
                        self.pos += 1;
                        value as u64
                    }
                    _ => return Err(self.error("cycle number")),
                },
                None => return Err(self.error("cycle number")),
            };
            let body = self.parse_block()?;
            Ok(Handler::Cycle { number, body })
        } else {
            Err(self.error("'rest', 'signal' or 'cycle'"))
        }
    }

    fn parse_rule(&mut self) -> Result<RuleDef, String> {
        let name = self.expect_ident("rule name")?;
        self.expect_punct('(')?;
        let mut params = Vec::new();
        while !self.check_punct(')') {
            let pname = self.expect_ident("parameter name")?;
            self.expect_punct(':')?;
            let ty = self.parse_type()?;
            params.push((pname, ty));
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        let ret = if self.eat_op("->") {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(RuleDef {
            name,
            params,
            ret,
            body,
        })
    }

    fn parse_topology_block(&mut self, network: &mut Network) -> Result<(), String> {
        self.expect_punct('{')?;
        while !self.check_punct('}') {
            if self.eat_keyword("fruiting_body") {
                let name = self.expect_ident("fruiting body name")?;
                network.topology.fruiting_bodies.push(name);
            } else if self.eat_keyword("spawn") {
                let hyphal = self.expect_ident("hyphal type")?;
                let id = self.expect_ident("instance id")?;
                network.topology.spawns.push(Spawn { hyphal, id });
            } else if self.eat_keyword("socket") {
                let source = self.expect_ident("socket source")?;
                self.expect_punct('-')?;
                self.expect_punct('[')?;
                let frequency = self.expect_ident("frequency name")?;
                self.expect_punct(']')?;
                self.expect_op("->")?;
                let dest = if self.eat_punct('*') {
                    SocketDest::Broadcast
                } else {
                    SocketDest::Named(self.expect_ident("socket destination")?)
                };
                network.topology.sockets.push(Socket {
                    source,
                    frequency,
                    dest,
                });
            } else {
                return Err(self.error("'fruiting_body', 'spawn' or 'socket'"));
            }
        }
        self.expect_punct('}')
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<TypeRef, String> {
        let name = self.expect_ident("type name")?;
        if let Some(prim) = Prim::from_name(&name) {
            return Ok(TypeRef::Prim(prim));
        }
        match name.as_str() {
            "vec" => {
                self.expect_punct('<')?;
                let elem = self.parse_type()?;
                self.expect_generic_close()?;
                Ok(TypeRef::Vec(Box::new(elem)))
            }
            "queue" => {
                self.expect_punct('<')?;
                let elem = self.parse_type()?;
                self.expect_generic_close()?;
                Ok(TypeRef::Queue(Box::new(elem)))
            }
            "map" => {
                self.expect_punct('<')?;
                let key = self.parse_type()?;
                self.expect_punct(',')?;
                let value = self.parse_type()?;
                self.expect_generic_close()?;
                Ok(TypeRef::Map(Box::new(key), Box::new(value)))
            }
            _ => Ok(TypeRef::Named(name)),
        }
    }

    /// Close a generic argument list, splitting `>>` in place so that
    /// `vec<vec<i64>>` parses.
    fn expect_generic_close(&mut self) -> Result<(), String> {
        if self.eat_punct('>') {
            return Ok(());
        }
        if self.check_op(">>") {
            let (line, column) = {
                let t = self.peek().unwrap();
                (t.line, t.column)
            };
            self.tokens[self.pos] = Token {
                kind: TokenKind::Punct,
                lexeme: ">".to_string(),
                line,
                column: column + 1,
            };
            return Ok(());
        }
        Err(self.error("'>'"))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Vec<Stmt>, String> {
        self.expect_punct('{')?;
        let mut body = Vec::new();
        while !self.check_punct('}') {
            body.push(self.parse_stmt()?);
        }
        self.expect_punct('}')?;
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, String> {
        if self.eat_keyword("let") {
            let name = self.expect_ident("variable name")?;
            let ty = if self.eat_punct(':') {
                Some(self.parse_type()?)
            } else {
                None
            };
            self.expect_punct('=')?;
            let value = self.parse_expr(true)?;
            return Ok(Stmt::Let { name, ty, value });
        }
        if self.eat_keyword("emit") {
            let frequency = self.expect_ident("frequency name")?;
            let fields = self.parse_named_fields()?;
            return Ok(Stmt::Emit { frequency, fields });
        }
        if self.eat_keyword("if") {
            return self.parse_if_stmt();
        }
        if self.eat_keyword("while") {
            let cond = self.parse_expr(true)?;
            let body = self.parse_block()?;
            return Ok(Stmt::While { cond, body });
        }
        if self.eat_keyword("for") {
            return self.parse_for_stmt();
        }
        if self.eat_keyword("match") {
            let scrutinee = self.parse_expr(true)?;
            let arms = self.parse_match_arms()?;
            return Ok(Stmt::Match { scrutinee, arms });
        }
        if self.eat_keyword("report") {
            let label = self.expect_ident("report label")?;
            if self.eat_punct(':') {
                let value = self.parse_expr(true)?;
                return Ok(Stmt::Report {
                    label,
                    value: ReportValue::Expr(value),
                });
            }
            if self.check_punct('{') {
                let fields = self.parse_named_fields()?;
                return Ok(Stmt::Report {
                    label,
                    value: ReportValue::Fields(fields),
                });
            }
            return Err(self.error("':' or '{' after report label"));
        }
        if self.eat_keyword("return") {
            if self.check_punct('}') {
                return Ok(Stmt::Return(None));
            }
            let value = self.parse_expr(true)?;
            return Ok(Stmt::Return(Some(value)));
        }
        if self.eat_keyword("break") {
            return Ok(Stmt::Break);
        }
        if self.eat_keyword("continue") {
            return Ok(Stmt::Continue);
        }

        // Expression statement or assignment
        let expr = self.parse_expr(true)?;
        if self.check_punct('=') {
            self.pos += 1;
            let target = Self::assign_target(expr)
                .ok_or_else(|| self.error("assignable target on left of '='"))?;
            let value = self.parse_expr(true)?;
            return Ok(Stmt::Assign { target, value });
        }
        Ok(Stmt::Expr(expr))
    }

    fn assign_target(expr: Expr) -> Option<AssignTarget> {
        match expr {
            Expr::Var(name) => Some(AssignTarget::Var(name)),
            Expr::State(name) => Some(AssignTarget::State(name)),
            Expr::Field(object, field) => Some(AssignTarget::Field {
                object: *object,
                field,
            }),
            Expr::Index(object, index) => Some(AssignTarget::Index {
                object: *object,
                index: *index,
            }),
            _ => None,
        }
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt, String> {
        let cond = self.parse_expr(true)?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat_keyword("else") {
            if self.eat_keyword("if") {
                Some(vec![self.parse_if_stmt()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<Stmt, String> {
        let first = self.expect_ident("loop binding")?;
        let binding = if self.eat_punct(',') {
            let value = self.expect_ident("value binding")?;
            ForBinding::KeyValue { key: first, value }
        } else {
            let ty = if self.eat_punct(':') {
                Some(self.parse_type()?)
            } else {
                None
            };
            ForBinding::Item { name: first, ty }
        };
        self.expect_keyword("in")?;
        let iter = self.parse_expr(true)?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            binding,
            iter,
            body,
        })
    }

    /// `{ name: expr [,] ... }` - emit payloads, struct literals, reports
    fn parse_named_fields(&mut self) -> Result<Vec<(String, Expr)>, String> {
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.check_punct('}') {
            let name = self.expect_ident("field name")?;
            self.expect_punct(':')?;
            let value = self.parse_expr(true)?;
            fields.push((name, value));
            self.eat_punct(',');
        }
        self.expect_punct('}')?;
        Ok(fields)
    }

    // ------------------------------------------------------------------
    // Match patterns
    // ------------------------------------------------------------------

    fn parse_match_arms(&mut self) -> Result<Vec<MatchArm>, String> {
        self.expect_punct('{')?;
        let mut arms = Vec::new();
        while !self.check_punct('}') {
            let patterns = self.parse_pattern_alternation()?;
            self.expect_op("->")?;
            let body = self.parse_block()?;
            arms.push(MatchArm { patterns, body });
            self.eat_punct(',');
        }
        self.expect_punct('}')?;
        Ok(arms)
    }

    fn parse_pattern_alternation(&mut self) -> Result<Vec<Pattern>, String> {
        let mut patterns = vec![self.parse_pattern()?];
        while self.eat_punct('|') {
            patterns.push(self.parse_pattern()?);
        }
        Ok(patterns)
    }

    fn parse_pattern(&mut self) -> Result<Pattern, String> {
        // Tuple pattern
        if self.eat_punct('(') {
            let mut elems = vec![self.parse_pattern()?];
            while self.eat_punct(',') {
                elems.push(self.parse_pattern()?);
            }
            self.expect_punct(')')?;
            return Ok(Pattern::Tuple(elems));
        }

        // Negative number literal
        if self.check_punct('-') {
            self.pos += 1;
            match self.peek().cloned() {
                Some(t) => match t.kind {
                    TokenKind::Int { value, suffix } => {
                        self.pos += 1;
                        return Ok(Pattern::Literal(Expr::Int(-value, suffix)));
                    }
                    TokenKind::Float { value, .. } => {
                        self.pos += 1;
                        return Ok(Pattern::Literal(Expr::Float(-value)));
                    }
                    _ => return Err(self.error("number after '-' in pattern")),
                },
                None => return Err(self.error("number after '-' in pattern")),
            }
        }

        let token = self.peek().cloned().ok_or_else(|| self.error("pattern"))?;
        match &token.kind {
            TokenKind::Int { value, suffix } => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Int(*value, *suffix)))
            }
            TokenKind::Float { value, .. } => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Float(*value)))
            }
            TokenKind::Str(value) => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Str(value.clone())))
            }
            TokenKind::Char(value) => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Char(*value)))
            }
            TokenKind::Keyword if token.lexeme == "true" => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Bool(true)))
            }
            TokenKind::Keyword if token.lexeme == "false" => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Bool(false)))
            }
            TokenKind::Keyword if token.lexeme == "null" => {
                self.pos += 1;
                Ok(Pattern::Literal(Expr::Null))
            }
            TokenKind::Ident => {
                let name = token.lexeme.clone();
                self.pos += 1;
                if self.eat_op("::") {
                    let variant = self.expect_ident("variant name")?;
                    let mut bindings = Vec::new();
                    if self.eat_punct('(') {
                        while !self.check_punct(')') {
                            bindings.push(self.expect_ident("binding name")?);
                            if !self.eat_punct(',') {
                                break;
                            }
                        }
                        self.expect_punct(')')?;
                    }
                    Ok(Pattern::Variant {
                        enum_name: name,
                        variant,
                        bindings,
                    })
                } else {
                    Ok(Pattern::Binding(name))
                }
            }
            _ => Err(self.error("pattern")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// `allow_struct` is condition (ii) of the struct-literal heuristic: it
    /// is false when an operator immediately precedes the identifier.
    fn parse_expr(&mut self, allow_struct: bool) -> Result<Expr, String> {
        self.parse_or(allow_struct)
    }

    fn parse_or(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_and(allow_struct)?;
        while self.eat_op("||") {
            let rhs = self.parse_and(false)?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_equality(allow_struct)?;
        while self.eat_op("&&") {
            let rhs = self.parse_equality(false)?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_range(allow_struct)?;
        loop {
            let op = if self.eat_op("==") {
                BinOp::Eq
            } else if self.eat_op("!=") {
                BinOp::Ne
            } else {
                break;
            };
            let rhs = self.parse_range(false)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_range(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let lhs = self.parse_bitor(allow_struct)?;
        if self.eat_op("..") {
            let rhs = self.parse_bitor(false)?;
            return Ok(Expr::Range(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_bitxor(allow_struct)?;
        while self.check_punct('|') && !self.peek_at(1).is_some_and(|t| t.is_punct('|')) {
            self.pos += 1;
            let rhs = self.parse_bitxor(false)?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_bitand(allow_struct)?;
        while self.eat_punct('^') {
            let rhs = self.parse_bitand(false)?;
            lhs = Expr::Binary(BinOp::BitXor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_shift(allow_struct)?;
        while self.eat_punct('&') {
            let rhs = self.parse_shift(false)?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_comparison(allow_struct)?;
        loop {
            let op = if self.eat_op("<<") {
                BinOp::Shl
            } else if self.eat_op(">>") {
                BinOp::Shr
            } else {
                break;
            };
            let rhs = self.parse_comparison(false)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_term(allow_struct)?;
        loop {
            let op = if self.eat_op("<=") {
                BinOp::Le
            } else if self.eat_op(">=") {
                BinOp::Ge
            } else if self.eat_punct('<') {
                BinOp::Lt
            } else if self.eat_punct('>') {
                BinOp::Gt
            } else {
                break;
            };
            let rhs = self.parse_term(false)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_factor(allow_struct)?;
        loop {
            let op = if self.eat_punct('+') {
                BinOp::Add
            } else if self.eat_punct('-') {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_factor(false)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let mut lhs = self.parse_unary(allow_struct)?;
        loop {
            let op = if self.eat_punct('*') {
                BinOp::Mul
            } else if self.eat_punct('/') {
                BinOp::Div
            } else if self.eat_punct('%') {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary(false)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, allow_struct: bool) -> Result<Expr, String> {
        if self.eat_punct('-') {
            let operand = self.parse_unary(false)?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(operand)));
        }
        if self.eat_punct('!') {
            let operand = self.parse_unary(false)?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(operand)));
        }
        let primary = self.parse_primary(allow_struct)?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, String> {
        loop {
            if self.eat_punct('.') {
                let name = self.expect_ident("field or method name")?;
                if self.eat_punct('(') {
                    let args = self.parse_call_args()?;
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        method: name,
                        args,
                    };
                } else {
                    expr = Expr::Field(Box::new(expr), name);
                }
            } else if self.check_punct('(') {
                let Expr::Var(name) = expr else {
                    return Err(self.error("call target to be a name"));
                };
                self.pos += 1;
                let args = self.parse_call_args()?;
                expr = Expr::Call { name, args };
            } else if self.eat_punct('[') {
                let index = self.parse_expr(true)?;
                self.expect_punct(']')?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_keyword("as") {
                let ty = self.parse_type()?;
                expr = Expr::Cast(Box::new(expr), ty);
            } else if self.check_op("::") {
                let Expr::Var(enum_name) = expr else {
                    return Err(self.error("enum name before '::'"));
                };
                self.pos += 1;
                let (line, column) = match self.peek() {
                    Some(t) => (t.line, t.column),
                    None => (0, 0),
                };
                let variant = self.expect_ident("variant name")?;
                if self.eat_punct('(') {
                    let args = self.parse_call_args()?;
                    // A variant holds one payload slot; multi-value
                    // payloads are written as a tuple argument
                    if args.len() > 1 {
                        return Err(format!(
                            "parse error at {}:{}: constructor '{}::{}' takes a single argument; wrap multiple values in a tuple",
                            line, column, enum_name, variant
                        ));
                    }
                    expr = Expr::EnumCtor {
                        enum_name,
                        variant,
                        args,
                    };
                } else {
                    expr = Expr::EnumPath { enum_name, variant };
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        while !self.check_punct(')') {
            args.push(self.parse_expr(true)?);
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        Ok(args)
    }

    fn parse_primary(&mut self, allow_struct: bool) -> Result<Expr, String> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("expression"))?;

        match &token.kind {
            TokenKind::Int { value, suffix } => {
                self.pos += 1;
                Ok(Expr::Int(*value, *suffix))
            }
            TokenKind::Float { value, .. } => {
                self.pos += 1;
                Ok(Expr::Float(*value))
            }
            TokenKind::Str(value) => {
                self.pos += 1;
                Ok(Expr::Str(value.clone()))
            }
            TokenKind::Char(value) => {
                self.pos += 1;
                Ok(Expr::Char(*value))
            }
            TokenKind::Keyword => match token.lexeme.as_str() {
                "true" => {
                    self.pos += 1;
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.pos += 1;
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.pos += 1;
                    Ok(Expr::Null)
                }
                "state" => {
                    self.pos += 1;
                    self.expect_punct('.')?;
                    let field = self.expect_ident("state field name")?;
                    Ok(Expr::State(field))
                }
                "if" => {
                    self.pos += 1;
                    self.parse_if_expr()
                }
                "match" => {
                    self.pos += 1;
                    self.parse_match_expr()
                }
                "fn" => {
                    self.pos += 1;
                    self.parse_fn_literal()
                }
                _ => Err(self.error("expression")),
            },
            TokenKind::Ident => {
                let name = token.lexeme.clone();
                self.pos += 1;
                if self.struct_literal_follows(&token, allow_struct) {
                    let fields = self.parse_named_fields()?;
                    Ok(Expr::StructLit { name, fields })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            TokenKind::Punct if token.lexeme == "(" => {
                self.pos += 1;
                let first = self.parse_expr(true)?;
                if self.eat_punct(',') {
                    let mut elems = vec![first];
                    while !self.check_punct(')') {
                        elems.push(self.parse_expr(true)?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct(')')?;
                    Ok(Expr::Tuple(elems))
                } else {
                    self.expect_punct(')')?;
                    Ok(first)
                }
            }
            TokenKind::Punct if token.lexeme == "[" => {
                self.pos += 1;
                let mut elems = Vec::new();
                while !self.check_punct(']') {
                    elems.push(self.parse_expr(true)?);
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.expect_punct(']')?;
                Ok(Expr::ArrayLit(elems))
            }
            _ => Err(self.error("expression")),
        }
    }

    /// The struct-literal heuristic. Called with the identifier token
    /// already consumed and `{` as the next candidate token.
    fn struct_literal_follows(&self, ident: &Token, allow_struct: bool) -> bool {
        let Some(brace) = self.peek() else {
            return false;
        };
        if !brace.is_punct('{') {
            return false;
        }
        // (i) a newline between the identifier and the brace defeats it
        if brace.line != ident.line {
            return false;
        }
        // (ii) an operator immediately before the identifier defeats it
        if !allow_struct {
            return false;
        }
        // (iii) uppercase name, empty braces, or `ident :` content
        if ident.lexeme.chars().next().is_some_and(char::is_uppercase) {
            return true;
        }
        if self.peek_at(1).is_some_and(|t| t.is_punct('}')) {
            return true;
        }
        self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Ident)
            && self.peek_at(2).is_some_and(|t| t.is_punct(':'))
    }

    fn parse_if_expr(&mut self) -> Result<Expr, String> {
        let cond = self.parse_expr(true)?;
        self.expect_punct('{')?;
        let then_branch = self.parse_expr(true)?;
        self.expect_punct('}')?;
        self.expect_keyword("else")?;
        let else_branch = if self.check_keyword("if") {
            self.pos += 1;
            self.parse_if_expr()?
        } else {
            self.expect_punct('{')?;
            let e = self.parse_expr(true)?;
            self.expect_punct('}')?;
            e
        };
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parse_match_expr(&mut self) -> Result<Expr, String> {
        let scrutinee = self.parse_expr(true)?;
        self.expect_punct('{')?;
        let mut arms = Vec::new();
        while !self.check_punct('}') {
            let patterns = self.parse_pattern_alternation()?;
            self.expect_op("->")?;
            self.expect_punct('{')?;
            let value = self.parse_expr(true)?;
            self.expect_punct('}')?;
            arms.push((patterns, value));
            self.eat_punct(',');
        }
        self.expect_punct('}')?;
        Ok(Expr::Match {
            scrutinee: Box::new(scrutinee),
            arms,
        })
    }

    fn parse_fn_literal(&mut self) -> Result<Expr, String> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        while !self.check_punct(')') {
            params.push(self.expect_ident("parameter name")?);
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;
        let body = self.parse_block()?;
        Ok(Expr::FnLit { params, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Network {
        parse_network(source).expect("parse failed")
    }

    fn parse_body(stmts: &str) -> Vec<Stmt> {
        let source = format!(
            "network T {{\n  frequencies {{ frequency f {{ x: i64 }} }}\n  hyphae {{ hyphal A {{ on signal(f, p) {{\n{}\n}} }} }}\n  topology {{ spawn A a }}\n}}",
            stmts
        );
        let network = parse_ok(&source);
        match &network.hyphae[0].handlers[0] {
            Handler::Signal { body, .. } => body.clone(),
            other => panic!("expected signal handler, got {:?}", other),
        }
    }

    fn parse_one_expr(text: &str) -> Expr {
        let body = parse_body(&format!("let x = {}", text));
        match &body[0] {
            Stmt::Let { value, .. } => value.clone(),
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_minimal_network() {
        let network = parse_ok(
            "network Hello {\n  frequencies { frequency greeting { name: string } }\n  hyphae { hyphal G { on signal(greeting, g) { } } }\n  topology {\n    fruiting_body input\n    spawn G g1\n    socket input -[greeting]-> g1\n  }\n}",
        );
        assert_eq!(network.name, "Hello");
        assert_eq!(network.frequencies.len(), 1);
        assert_eq!(network.frequencies[0].fields[0].ty, TypeRef::Prim(Prim::Str));
        assert_eq!(network.topology.spawns.len(), 1);
        assert_eq!(network.topology.sockets[0].frequency, "greeting");
    }

    #[test]
    fn test_broadcast_socket() {
        let network = parse_ok(
            "network B {\n  frequencies { frequency step { n: i64 } }\n  hyphae { hyphal L { } }\n  topology { spawn L l1 socket l1 -[step]-> * }\n}",
        );
        assert_eq!(network.topology.sockets[0].dest, SocketDest::Broadcast);
    }

    #[test]
    fn test_precedence() {
        // * binds tighter than +, which binds tighter than ==
        let expr = parse_one_expr("1 + 2 * 3 == 7");
        match expr {
            Expr::Binary(BinOp::Eq, lhs, _) => match *lhs {
                Expr::Binary(BinOp::Add, _, rhs) => {
                    assert!(matches!(*rhs, Expr::Binary(BinOp::Mul, _, _)));
                }
                other => panic!("expected add, got {:?}", other),
            },
            other => panic!("expected eq, got {:?}", other),
        }
    }

    #[test]
    fn test_comparison_tighter_than_shift() {
        // Per the precedence table, `a << b < c` is `a << (b < c)`
        let expr = parse_one_expr("a << b < c");
        assert!(matches!(expr, Expr::Binary(BinOp::Shl, _, _)));
    }

    #[test]
    fn test_range_expr() {
        let expr = parse_one_expr("v[2..5]");
        match expr {
            Expr::Index(_, index) => assert!(matches!(*index, Expr::Range(_, _))),
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_path_and_ctor() {
        assert!(matches!(
            parse_one_expr("Shape::Empty"),
            Expr::EnumPath { .. }
        ));
        match parse_one_expr("Shape::Circle(4)") {
            Expr::EnumCtor {
                enum_name,
                variant,
                args,
            } => {
                assert_eq!(enum_name, "Shape");
                assert_eq!(variant, "Circle");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected ctor, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_ctor_takes_single_argument() {
        let source = "network E {\n  frequencies { frequency f { x: i64 } }\n  hyphae { hyphal A { on signal(f, p) { let s = Shape::Pair(1, 2) } } }\n  topology { spawn A a }\n}";
        let err = parse_network(source).unwrap_err();
        assert!(err.contains("takes a single argument"), "err: {}", err);
        // The tuple form is the supported spelling
        assert!(matches!(
            parse_one_expr("Shape::Pair((1, 2))"),
            Expr::EnumCtor { ref args, .. } if args.len() == 1
        ));
    }

    #[test]
    fn test_struct_literal_uppercase() {
        let expr = parse_one_expr("Point { x: 1, y: 2 }");
        assert!(matches!(expr, Expr::StructLit { .. }));
    }

    #[test]
    fn test_struct_literal_not_after_operator() {
        // `p < q` comparison, then a block would be a parse error in let
        // position; instead verify an if-statement keeps its body.
        let body = parse_body("if x { state.count = 1 }");
        match &body[0] {
            Stmt::If { cond, .. } => assert!(matches!(cond, Expr::Var(_))),
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_literal_ident_colon_content() {
        // lowercase name, but `ident :` content opens a literal
        let expr = parse_one_expr("point { x: 1 }");
        assert!(matches!(expr, Expr::StructLit { .. }));
    }

    #[test]
    fn test_if_body_not_struct_literal() {
        // `if running { emit ... }` - brace content is a statement, so the
        // brace is the if body
        let body = parse_body("if running { emit f { x: 1 } }");
        match &body[0] {
            Stmt::If { then_body, .. } => {
                assert!(matches!(then_body[0], Stmt::Emit { .. }));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_newline_defeats_struct_literal() {
        // The `{` on the next line belongs to the while body even though
        // `Counter` is uppercase.
        let body = parse_body("while Counter\n{ break }");
        match &body[0] {
            Stmt::While { cond, body } => {
                assert!(matches!(cond, Expr::Var(_)));
                assert!(matches!(body[0], Stmt::Break));
            }
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_type_close_splits_shr() {
        let network = parse_ok(
            "network G {\n  frequencies { frequency f { grid: vec<vec<i64>> } }\n  hyphae { hyphal A { } }\n  topology { spawn A a }\n}",
        );
        let ty = &network.frequencies[0].fields[0].ty;
        match ty {
            TypeRef::Vec(inner) => assert!(matches!(**inner, TypeRef::Vec(_))),
            other => panic!("expected vec<vec<i64>>, got {:?}", other),
        }
    }

    #[test]
    fn test_match_statement_patterns() {
        let body = parse_body(
            "match s {\n  Shape::Circle(r) -> { state.count = r }\n  Shape::Square(w) | Shape::Empty -> { }\n  other -> { }\n}",
        );
        match &body[0] {
            Stmt::Match { arms, .. } => {
                assert_eq!(arms.len(), 3);
                assert!(matches!(
                    arms[0].patterns[0],
                    Pattern::Variant { ref bindings, .. } if bindings.len() == 1
                ));
                assert_eq!(arms[1].patterns.len(), 2);
                assert!(matches!(arms[2].patterns[0], Pattern::Binding(_)));
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_tuple_pattern() {
        let body = parse_body("match p { (a, 0) -> { } }");
        match &body[0] {
            Stmt::Match { arms, .. } => match &arms[0].patterns[0] {
                Pattern::Tuple(elems) => {
                    assert_eq!(elems.len(), 2);
                    assert!(matches!(elems[0], Pattern::Binding(_)));
                    assert!(matches!(elems[1], Pattern::Literal(_)));
                }
                other => panic!("expected tuple pattern, got {:?}", other),
            },
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_emit_statement() {
        let body = parse_body("emit f { x: n * 2 }");
        match &body[0] {
            Stmt::Emit { frequency, fields } => {
                assert_eq!(frequency, "f");
                assert_eq!(fields[0].0, "x");
            }
            other => panic!("expected emit, got {:?}", other),
        }
    }

    #[test]
    fn test_report_forms() {
        let body = parse_body("report total: state.count\nreport Summary { hits: 3 }");
        assert!(matches!(
            body[0],
            Stmt::Report {
                value: ReportValue::Expr(_),
                ..
            }
        ));
        assert!(matches!(
            body[1],
            Stmt::Report {
                value: ReportValue::Fields(_),
                ..
            }
        ));
    }

    #[test]
    fn test_for_variants() {
        let body = parse_body("for item in v { }\nfor x: i64 in v { }\nfor k, val in m { }");
        assert!(matches!(
            &body[0],
            Stmt::For {
                binding: ForBinding::Item { ty: None, .. },
                ..
            }
        ));
        assert!(matches!(
            &body[1],
            Stmt::For {
                binding: ForBinding::Item { ty: Some(_), .. },
                ..
            }
        ));
        assert!(matches!(
            &body[2],
            Stmt::For {
                binding: ForBinding::KeyValue { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_assignments() {
        let body = parse_body("x = 1\nstate.count = 2\np.field = 3\nv[0] = 4");
        assert!(matches!(
            &body[0],
            Stmt::Assign {
                target: AssignTarget::Var(_),
                ..
            }
        ));
        assert!(matches!(
            &body[1],
            Stmt::Assign {
                target: AssignTarget::State(_),
                ..
            }
        ));
        assert!(matches!(
            &body[2],
            Stmt::Assign {
                target: AssignTarget::Field { .. },
                ..
            }
        ));
        assert!(matches!(
            &body[3],
            Stmt::Assign {
                target: AssignTarget::Index { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_if_expression() {
        let expr = parse_one_expr("if n > 0 { 1 } else { 2 }");
        assert!(matches!(expr, Expr::If { .. }));
    }

    #[test]
    fn test_match_expression() {
        let expr = parse_one_expr("match s { Shape::Circle(r) -> { r * r }, w -> { 0 } }");
        match expr {
            Expr::Match { arms, .. } => assert_eq!(arms.len(), 2),
            other => panic!("expected match expr, got {:?}", other),
        }
    }

    #[test]
    fn test_cast_and_method_chain() {
        let expr = parse_one_expr("v.len() as u64");
        match expr {
            Expr::Cast(inner, TypeRef::Prim(Prim::U64)) => {
                assert!(matches!(*inner, Expr::MethodCall { .. }));
            }
            other => panic!("expected cast, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_literal() {
        let expr = parse_one_expr("fn(a, b) { return a + b }");
        match expr {
            Expr::FnLit { params, body } => {
                assert_eq!(params, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected fn literal, got {:?}", other),
        }
    }

    #[test]
    fn test_hyphal_with_state_and_rule() {
        let network = parse_ok(
            "network C {\n  frequencies { frequency tick { v: u32 } }\n  hyphae {\n    hyphal Counter {\n      state { count: u32 = 0 }\n      on rest { state.count = 0 }\n      on signal(tick, t) when t.v > 0 { state.count = state.count + t.v }\n      on cycle 5 { report checkpoint: state.count }\n      rule double(x: u32) -> u32 { return x * 2 }\n    }\n  }\n  topology { spawn Counter c1 }\n}",
        );
        let hyphal = &network.hyphae[0];
        assert_eq!(hyphal.state.len(), 1);
        assert!(hyphal.state[0].default.is_some());
        assert_eq!(hyphal.handlers.len(), 3);
        assert!(matches!(
            hyphal.handlers[1],
            Handler::Signal { guard: Some(_), .. }
        ));
        assert!(matches!(hyphal.handlers[2], Handler::Cycle { number: 5, .. }));
        assert_eq!(hyphal.rules[0].params.len(), 1);
    }

    #[test]
    fn test_config_block() {
        let network = parse_ok(
            "network C {\n  config { max_cycles: 50, arena_size: 65536 }\n  hyphae { hyphal A { } }\n  topology { spawn A a }\n}",
        );
        assert_eq!(network.config[0], ("max_cycles".to_string(), 50));
        assert_eq!(network.config[1], ("arena_size".to_string(), 65536));
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse_network("network {").unwrap_err();
        assert!(err.contains("parse error at 1:9"), "err: {}", err);
        assert!(err.contains("network name"));
    }

    #[test]
    fn test_error_on_bad_socket() {
        let err = parse_network(
            "network X { topology { socket a -> b } }",
        )
        .unwrap_err();
        // `->` lexes as one operator token, so the `-` expectation fails
        assert!(err.contains("got '->'"), "err: {}", err);
    }
}
