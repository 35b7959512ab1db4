//! Statement and expression execution
//!
//! One [`Activation`] per handler or rule invocation: the agent it runs
//! for, its locals, and (for signal handlers) the payload binding. Control
//! flow threads a [`Flow`] result so `break`/`continue`/`return` unwind
//! through nested blocks exactly like the generated jumps.

use super::value::{ClosureValue, EnumValue, StructValue, Value};
use super::{Evaluator, Payload};
use crate::ast::{
    AssignTarget, BinOp, Expr, ForBinding, MatchArm, Pattern, ReportValue, Stmt, TypeRef, UnOp,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub(super) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub(super) struct Activation {
    pub agent: String,
    pub hyphal: String,
    pub locals: HashMap<String, Value>,
    pub param: Option<(String, Rc<Payload>)>,
}

impl Activation {
    pub fn new(agent: String, hyphal: String, param: Option<(String, Rc<Payload>)>) -> Self {
        Activation {
            agent,
            hyphal,
            locals: HashMap::new(),
            param,
        }
    }
}

impl Evaluator {
    pub(super) fn exec_stmts(
        &mut self,
        act: &mut Activation,
        stmts: &[Stmt],
    ) -> Result<Flow, String> {
        for stmt in stmts {
            match self.exec_stmt(act, stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, act: &mut Activation, stmt: &Stmt) -> Result<Flow, String> {
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = self.eval_expr(act, value)?;
                act.locals.insert(name.clone(), value);
                Ok(Flow::Normal)
            }

            Stmt::Assign { target, value } => {
                let value = self.eval_expr(act, value)?;
                self.assign(act, target, value)?;
                Ok(Flow::Normal)
            }

            Stmt::Emit { frequency, fields } => {
                let payload = self.build_payload(act, frequency, fields)?;
                let agent = act.agent.clone();
                self.enqueue_emission(&agent, frequency, payload)?;
                Ok(Flow::Normal)
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval_expr(act, cond)?.truthy() {
                    self.exec_stmts(act, then_body)
                } else if let Some(else_body) = else_body {
                    self.exec_stmts(act, else_body)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While { cond, body } => {
                while self.eval_expr(act, cond)?.truthy() {
                    match self.exec_stmts(act, body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::For {
                binding,
                iter,
                body,
            } => self.exec_for(act, binding, iter, body),

            Stmt::Match { scrutinee, arms } => self.exec_match(act, scrutinee, arms),

            Stmt::Report { label, value } => {
                let entries: Vec<(String, Value)> = match value {
                    ReportValue::Expr(expr) => {
                        vec![(label.clone(), self.eval_expr(act, expr)?)]
                    }
                    ReportValue::Fields(fields) => {
                        let mut entries = Vec::with_capacity(fields.len());
                        for (name, expr) in fields {
                            entries.push((
                                format!("{}.{}", label, name),
                                self.eval_expr(act, expr)?,
                            ));
                        }
                        entries
                    }
                };
                self.reports
                    .entry(act.agent.clone())
                    .or_default()
                    .extend(entries);
                Ok(Flow::Normal)
            }

            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(act, expr)?,
                    None => Value::Int(0),
                };
                Ok(Flow::Return(value))
            }

            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),

            Stmt::Expr(expr) => {
                self.eval_expr(act, expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn assign(
        &mut self,
        act: &mut Activation,
        target: &AssignTarget,
        value: Value,
    ) -> Result<(), String> {
        match target {
            AssignTarget::Var(name) => {
                if !act.locals.contains_key(name) {
                    return Err(format!(
                        "variable '{}' referenced before introduction",
                        name
                    ));
                }
                act.locals.insert(name.clone(), value);
                Ok(())
            }
            AssignTarget::State(field) => {
                let agent = act.agent.clone();
                let state = self
                    .states
                    .get_mut(&agent)
                    .ok_or_else(|| format!("unknown agent '{}'", agent))?;
                if !state.contains_key(field) {
                    return Err(format!(
                        "unknown state field '{}' on agent '{}'",
                        field, agent
                    ));
                }
                state.insert(field.clone(), value);
                Ok(())
            }
            AssignTarget::Field { object, field } => {
                if let Some((binding, payload)) = &act.param
                    && matches!(object, Expr::Var(name) if name == binding)
                {
                    let payload = Rc::clone(payload);
                    if !payload.fields.borrow().contains_key(field) {
                        return Err(format!(
                            "unknown payload field '{}' on frequency '{}'",
                            field, payload.frequency
                        ));
                    }
                    payload.fields.borrow_mut().insert(field.clone(), value);
                    return Ok(());
                }
                match self.eval_expr(act, object)? {
                    Value::Struct(s) => {
                        if !s.fields.borrow().contains_key(field) {
                            return Err(format!(
                                "struct '{}' has no field '{}'",
                                s.name, field
                            ));
                        }
                        s.fields.borrow_mut().insert(field.clone(), value);
                        Ok(())
                    }
                    other => Err(format!(
                        "cannot assign field '{}' on {}",
                        field,
                        other.kind_name()
                    )),
                }
            }
            AssignTarget::Index { object, index } => {
                let object = self.eval_expr(act, object)?;
                let index = self.eval_expr(act, index)?;
                match object {
                    Value::List(items) => {
                        let i = index.as_int()?;
                        let mut items = items.borrow_mut();
                        if i >= 0 && (i as usize) < items.len() {
                            items[i as usize] = value;
                        }
                        Ok(())
                    }
                    Value::Map(entries) => {
                        let mut entries = entries.borrow_mut();
                        match entries.iter_mut().find(|(k, _)| k.eq_value(&index)) {
                            Some(entry) => entry.1 = value,
                            None => entries.push((index, value)),
                        }
                        Ok(())
                    }
                    other => Err(format!("cannot index-assign {}", other.kind_name())),
                }
            }
        }
    }

    fn exec_for(
        &mut self,
        act: &mut Activation,
        binding: &ForBinding,
        iter: &Expr,
        body: &[Stmt],
    ) -> Result<Flow, String> {
        let collection = self.eval_expr(act, iter)?;
        match (binding, collection) {
            (ForBinding::Item { name, .. }, Value::List(items)) => {
                // Length is taken once; growth during iteration is not seen
                let len = items.borrow().len();
                for i in 0..len {
                    let item = items
                        .borrow()
                        .get(i)
                        .cloned()
                        .unwrap_or(Value::Int(0));
                    act.locals.insert(name.clone(), item);
                    match self.exec_stmts(act, body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            (ForBinding::KeyValue { key, value }, Value::Map(entries)) => {
                let len = entries.borrow().len();
                for i in 0..len {
                    let Some((k, v)) = entries.borrow().get(i).cloned() else {
                        break;
                    };
                    act.locals.insert(key.clone(), k);
                    act.locals.insert(value.clone(), v);
                    match self.exec_stmts(act, body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            (ForBinding::Item { .. }, Value::Map(_)) => {
                Err("use 'for k, v in ...' to iterate a map".to_string())
            }
            (ForBinding::KeyValue { .. }, _) => {
                Err("'for k, v in ...' requires a map collection".to_string())
            }
            (_, other) => Err(format!("cannot iterate {}", other.kind_name())),
        }
    }

    fn exec_match(
        &mut self,
        act: &mut Activation,
        scrutinee: &Expr,
        arms: &[MatchArm],
    ) -> Result<Flow, String> {
        let value = self.eval_expr(act, scrutinee)?;
        for arm in arms {
            for pattern in &arm.patterns {
                let mut bindings = HashMap::new();
                if self.pattern_matches(pattern, &value, &mut bindings)? {
                    act.locals.extend(bindings);
                    return self.exec_stmts(act, &arm.body);
                }
            }
        }
        // No arm matched: a statement-position match is a no-op
        Ok(Flow::Normal)
    }

    /// Pattern test; on success `bindings` holds the bound locals.
    pub(super) fn pattern_matches(
        &self,
        pattern: &Pattern,
        value: &Value,
        bindings: &mut HashMap<String, Value>,
    ) -> Result<bool, String> {
        match pattern {
            Pattern::Literal(literal) => {
                let expected = match literal {
                    Expr::Int(v, _) => Value::Int(*v),
                    Expr::Float(v) => Value::Float(*v),
                    Expr::Str(s) => Value::str(s.as_str()),
                    Expr::Char(c) => Value::Int(*c as i64),
                    Expr::Bool(b) => Value::Bool(*b),
                    Expr::Null => Value::Null,
                    other => return Err(format!("unsupported literal pattern {:?}", other)),
                };
                Ok(expected.eq_value(value))
            }
            Pattern::Binding(name) => {
                bindings.insert(name.clone(), value.clone());
                Ok(true)
            }
            Pattern::Variant {
                enum_name,
                variant,
                bindings: names,
            } => {
                let layout = self
                    .syms
                    .enum_layout(enum_name)
                    .ok_or_else(|| format!("unknown enum '{}' in pattern", enum_name))?;
                let ordinal = layout.ordinal(variant).ok_or_else(|| {
                    format!("enum '{}' has no variant '{}'", enum_name, variant)
                })?;
                let Value::Enum(cell) = value else {
                    return Ok(false);
                };
                if cell.tag != ordinal {
                    return Ok(false);
                }
                match names.len() {
                    0 => {}
                    1 => {
                        let payload = cell.payload.clone().unwrap_or(Value::Int(0));
                        bindings.insert(names[0].clone(), payload);
                    }
                    _ => {
                        // Multi-binding payloads use the vector representation
                        let payload = cell.payload.clone().unwrap_or(Value::Int(0));
                        let Value::List(items) = payload else {
                            return Ok(false);
                        };
                        let items = items.borrow();
                        for (i, name) in names.iter().enumerate() {
                            bindings.insert(
                                name.clone(),
                                items.get(i).cloned().unwrap_or(Value::Int(0)),
                            );
                        }
                    }
                }
                Ok(true)
            }
            Pattern::Tuple(elems) => {
                let Value::List(items) = value else {
                    return Ok(false);
                };
                let items = items.borrow();
                for (i, sub) in elems.iter().enumerate() {
                    let item = items.get(i).cloned().unwrap_or(Value::Int(0));
                    if !self.pattern_matches(sub, &item, bindings)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(super) fn eval_expr(
        &mut self,
        act: &mut Activation,
        expr: &Expr,
    ) -> Result<Value, String> {
        match expr {
            Expr::Int(v, _) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Char(c) => Ok(Value::Int(*c as i64)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),

            Expr::Var(name) => {
                if let Some((binding, _)) = &act.param
                    && binding == name
                {
                    // The bare binding denotes the payload itself; field
                    // reads go through Expr::Field
                    return Ok(Value::Null);
                }
                act.locals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("variable '{}' referenced before introduction", name))
            }

            Expr::State(field) => self
                .states
                .get(&act.agent)
                .and_then(|s| s.get(field))
                .cloned()
                .ok_or_else(|| {
                    format!("unknown state field '{}' on agent '{}'", field, act.agent)
                }),

            Expr::Field(object, field) => self.eval_field(act, object, field),

            Expr::Index(object, index) => self.eval_index(act, object, index),

            Expr::Range(_, _) => {
                Err("range expression is only valid in index position".to_string())
            }

            Expr::Binary(op, lhs, rhs) => self.eval_binary(act, *op, lhs, rhs),
            Expr::Unary(op, operand) => {
                let value = self.eval_expr(act, operand)?;
                match op {
                    UnOp::Neg => match value {
                        Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
                        Value::Float(v) => Ok(Value::Float(-v)),
                        other => Err(format!("cannot negate {}", other.kind_name())),
                    },
                    UnOp::Not => Ok(Value::Bool(!value.truthy())),
                }
            }

            Expr::Call { name, args } => self.eval_call(act, name, args),
            Expr::MethodCall {
                object,
                method,
                args,
            } => self.eval_method_call(act, object, method, args),

            Expr::Cast(inner, target) => {
                let value = self.eval_expr(act, inner)?;
                match target {
                    TypeRef::Prim(p) if *p == crate::ast::Prim::Bool => {
                        Ok(Value::Bool(value.truthy()))
                    }
                    // Widenings and representation-level no-ops
                    _ => Ok(value),
                }
            }

            Expr::StructLit { name, fields } => self.eval_struct_literal(act, name, fields),

            Expr::ArrayLit(elems) | Expr::Tuple(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval_expr(act, elem)?);
                }
                Ok(Value::list(values))
            }

            Expr::MapLit(entries) => {
                if entries.is_empty() {
                    Ok(Value::map())
                } else {
                    Err("map literal entries are not supported".to_string())
                }
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_expr(act, cond)?.truthy() {
                    self.eval_expr(act, then_branch)
                } else {
                    self.eval_expr(act, else_branch)
                }
            }

            Expr::Match { scrutinee, arms } => {
                let value = self.eval_expr(act, scrutinee)?;
                for (patterns, result) in arms {
                    for pattern in patterns {
                        let mut bindings = HashMap::new();
                        if self.pattern_matches(pattern, &value, &mut bindings)? {
                            act.locals.extend(bindings);
                            return self.eval_expr(act, result);
                        }
                    }
                }
                // No arm matched: the zero value
                Ok(Value::Int(0))
            }

            Expr::EnumPath { enum_name, variant } => {
                self.make_enum(enum_name, variant, None)
            }
            Expr::EnumCtor {
                enum_name,
                variant,
                args,
            } => {
                // One payload slot; a multi-value payload is a tuple argument
                let payload = match args.len() {
                    0 => None,
                    1 => Some(self.eval_expr(act, &args[0])?),
                    _ => {
                        return Err(format!(
                            "constructor '{}::{}' takes a single argument",
                            enum_name, variant
                        ));
                    }
                };
                self.make_enum(enum_name, variant, payload)
            }

            Expr::FnLit { params, body } => Ok(Value::Closure(Rc::new(ClosureValue {
                params: params.clone(),
                body: body.clone(),
                env: act.locals.clone(),
            }))),
        }
    }

    fn eval_field(
        &mut self,
        act: &mut Activation,
        object: &Expr,
        field: &str,
    ) -> Result<Value, String> {
        if let Some((binding, payload)) = &act.param
            && matches!(object, Expr::Var(name) if name == binding)
        {
            return payload.fields.borrow().get(field).cloned().ok_or_else(|| {
                format!(
                    "unknown payload field '{}' on frequency '{}'",
                    field, payload.frequency
                )
            });
        }
        match self.eval_expr(act, object)? {
            Value::Struct(s) => s.fields.borrow().get(field).cloned().ok_or_else(|| {
                format!("struct '{}' has no field '{}'", s.name, field)
            }),
            other => Err(format!(
                "cannot read field '{}' of {}",
                field,
                other.kind_name()
            )),
        }
    }

    fn eval_index(
        &mut self,
        act: &mut Activation,
        object: &Expr,
        index: &Expr,
    ) -> Result<Value, String> {
        let object = self.eval_expr(act, object)?;
        if let Expr::Range(start, end) = index {
            let start = self.eval_expr(act, start)?.as_int()?;
            let end = self.eval_expr(act, end)?.as_int()?;
            let Value::List(items) = &object else {
                return Err(format!("cannot slice {}", object.kind_name()));
            };
            let items = items.borrow();
            let len = items.len() as i64;
            let start = start.clamp(0, len) as usize;
            let end = end.clamp(0, len) as usize;
            let slice = if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            };
            return Ok(Value::list(slice));
        }
        let index = self.eval_expr(act, index)?;
        match object {
            Value::List(items) => {
                let i = index.as_int()?;
                let items = items.borrow();
                // Out-of-bounds reads return zero, never trap
                if i >= 0 && (i as usize) < items.len() {
                    Ok(items[i as usize].clone())
                } else {
                    Ok(Value::Int(0))
                }
            }
            Value::Map(entries) => Ok(entries
                .borrow()
                .iter()
                .find(|(k, _)| k.eq_value(&index))
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Int(0))),
            other => Err(format!("cannot index {}", other.kind_name())),
        }
    }

    fn eval_binary(
        &mut self,
        act: &mut Activation,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, String> {
        // Short-circuit forms first
        match op {
            BinOp::And => {
                let lhs = self.eval_expr(act, lhs)?;
                if !lhs.truthy() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval_expr(act, rhs)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            BinOp::Or => {
                let lhs = self.eval_expr(act, lhs)?;
                if lhs.truthy() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval_expr(act, rhs)?;
                return Ok(Value::Bool(rhs.truthy()));
            }
            _ => {}
        }

        let lhs = self.eval_expr(act, lhs)?;
        let rhs = self.eval_expr(act, rhs)?;

        if op.is_comparison() {
            return self.eval_comparison(op, &lhs, &rhs);
        }

        // Floats promote; everything else is 64-bit integer arithmetic
        if matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_)) {
            let a = match &lhs {
                Value::Float(v) => *v,
                other => other.as_int()? as f64,
            };
            let b = match &rhs {
                Value::Float(v) => *v,
                other => other.as_int()? as f64,
            };
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a % b,
                _ => return Err("bitwise operation on float".to_string()),
            };
            return Ok(Value::Float(result));
        }

        let a = lhs.as_int()?;
        let b = rhs.as_int()?;
        let result = match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                a.wrapping_div(b)
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                a.wrapping_rem(b)
            }
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::Shl => a.wrapping_shl(b as u32),
            BinOp::Shr => ((a as u64).wrapping_shr(b as u32)) as i64,
            _ => unreachable!("comparison handled above"),
        };
        Ok(Value::Int(result))
    }

    fn eval_comparison(&self, op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
        // String dispatch mirrors the generated string_eq/string_cmp calls
        if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
            let result = match op {
                BinOp::Eq => a == b,
                BinOp::Ne => a != b,
                BinOp::Lt => a < b,
                BinOp::Gt => a > b,
                BinOp::Le => a <= b,
                BinOp::Ge => a >= b,
                _ => unreachable!(),
            };
            return Ok(Value::Bool(result));
        }
        // Enum dispatch compares tags
        if let (Value::Enum(a), Value::Enum(b)) = (lhs, rhs) {
            let result = match op {
                BinOp::Eq => a.tag == b.tag,
                BinOp::Ne => a.tag != b.tag,
                BinOp::Lt => a.tag < b.tag,
                BinOp::Gt => a.tag > b.tag,
                BinOp::Le => a.tag <= b.tag,
                BinOp::Ge => a.tag >= b.tag,
                _ => unreachable!(),
            };
            return Ok(Value::Bool(result));
        }
        match op {
            BinOp::Eq => Ok(Value::Bool(lhs.eq_value(rhs))),
            BinOp::Ne => Ok(Value::Bool(!lhs.eq_value(rhs))),
            _ => {
                let (a, b) = match (lhs, rhs) {
                    (Value::Float(a), b) => (*a, b.as_int()? as f64),
                    (a, Value::Float(b)) => (a.as_int()? as f64, *b),
                    (a, b) => {
                        let (a, b) = (a.as_int()?, b.as_int()?);
                        let result = match op {
                            BinOp::Lt => a < b,
                            BinOp::Gt => a > b,
                            BinOp::Le => a <= b,
                            BinOp::Ge => a >= b,
                            _ => unreachable!(),
                        };
                        return Ok(Value::Bool(result));
                    }
                };
                let result = match op {
                    BinOp::Lt => a < b,
                    BinOp::Gt => a > b,
                    BinOp::Le => a <= b,
                    BinOp::Ge => a >= b,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn eval_call(
        &mut self,
        act: &mut Activation,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, String> {
        // Rules of the current hyphal shadow builtins
        if let Some(rule) = self.rules.get(&(act.hyphal.clone(), name.to_string())) {
            let rule = Rc::clone(rule);
            if args.len() != rule.params.len() {
                return Err(format!(
                    "rule '{}' takes {} argument(s), got {}",
                    name,
                    rule.params.len(),
                    args.len()
                ));
            }
            let mut callee =
                Activation::new(act.agent.clone(), act.hyphal.clone(), None);
            for ((param, _), arg) in rule.params.iter().zip(args) {
                let value = self.eval_expr(act, arg)?;
                callee.locals.insert(param.clone(), value);
            }
            return match self.exec_stmts(&mut callee, &rule.body)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Int(0)),
            };
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(act, arg)?);
        }

        match name {
            "format" => {
                let Some(Value::Str(fmt)) = values.first() else {
                    return Err("format needs a format string".to_string());
                };
                if values.len() > 6 {
                    return Err(
                        "format supports at most five interpolated arguments".to_string()
                    );
                }
                let mut out = String::new();
                let mut args = values[1..].iter();
                let mut rest = fmt.as_ref();
                while let Some(pos) = rest.find("{}") {
                    out.push_str(&rest[..pos]);
                    match args.next() {
                        Some(value) => out.push_str(&value.to_string()),
                        None => out.push_str("{}"),
                    }
                    rest = &rest[pos + 2..];
                }
                out.push_str(rest);
                Ok(Value::str(out))
            }
            "print" | "println" => {
                let value = values
                    .first()
                    .ok_or_else(|| format!("{} takes exactly one argument", name))?;
                self.output.push_str(&value.to_string());
                if name == "println" {
                    self.output.push('\n');
                }
                Ok(Value::Int(0))
            }
            "len" => match values.first() {
                Some(Value::Str(s)) => Ok(Value::Int(s.len() as i64)),
                Some(Value::List(items)) => Ok(Value::Int(items.borrow().len() as i64)),
                Some(Value::Map(entries)) => Ok(Value::Int(entries.borrow().len() as i64)),
                _ => Err("len takes a string, vec or map".to_string()),
            },
            "sum" => match values.first() {
                Some(Value::List(items)) => {
                    let mut total = 0i64;
                    for item in items.borrow().iter() {
                        total = total.wrapping_add(item.as_int()?);
                    }
                    Ok(Value::Int(total))
                }
                _ => Err("sum takes a vec".to_string()),
            },
            "to_string" => {
                let value = values
                    .first()
                    .ok_or("to_string takes exactly one argument")?;
                Ok(Value::str(value.to_string()))
            }
            "read_file" => match values.first() {
                Some(Value::Str(path)) => match std::fs::read_to_string(path.as_ref()) {
                    Ok(content) => Ok(Value::str(content)),
                    // The runtime returns null on failure
                    Err(_) => Ok(Value::Null),
                },
                _ => Err("read_file takes a path string".to_string()),
            },
            _ => {
                // A local holding a closure value
                if let Some(Value::Closure(closure)) = act.locals.get(name).cloned() {
                    if values.len() != closure.params.len() {
                        return Err(format!(
                            "closure '{}' takes {} argument(s), got {}",
                            name,
                            closure.params.len(),
                            values.len()
                        ));
                    }
                    let mut callee =
                        Activation::new(act.agent.clone(), act.hyphal.clone(), None);
                    callee.locals = closure.env.clone();
                    for (param, value) in closure.params.iter().zip(values) {
                        callee.locals.insert(param.clone(), value);
                    }
                    return match self.exec_stmts(&mut callee, &closure.body)? {
                        Flow::Return(value) => Ok(value),
                        _ => Ok(Value::Int(0)),
                    };
                }
                Err(format!("unknown rule or builtin '{}'", name))
            }
        }
    }

    fn eval_method_call(
        &mut self,
        act: &mut Activation,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<Value, String> {
        let object = self.eval_expr(act, object)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(act, arg)?);
        }

        match (method, &object) {
            ("len", Value::Str(s)) => Ok(Value::Int(s.len() as i64)),
            ("len", Value::List(items)) => Ok(Value::Int(items.borrow().len() as i64)),
            ("len", Value::Map(entries)) => Ok(Value::Int(entries.borrow().len() as i64)),

            ("push", Value::List(items)) => {
                let value = values.into_iter().next().ok_or("push takes one argument")?;
                items.borrow_mut().push(value);
                Ok(Value::Int(0))
            }
            ("pop", Value::List(items)) => {
                Ok(items.borrow_mut().pop().unwrap_or(Value::Int(0)))
            }
            ("get", Value::List(items)) => {
                let i = values
                    .first()
                    .ok_or("get takes one argument")?
                    .as_int()?;
                let items = items.borrow();
                if i >= 0 && (i as usize) < items.len() {
                    Ok(items[i as usize].clone())
                } else {
                    Ok(Value::Int(0))
                }
            }
            ("set", Value::List(items)) => {
                let mut args = values.into_iter();
                let (Some(index), Some(value)) = (args.next(), args.next()) else {
                    return Err("set takes two arguments".to_string());
                };
                let i = index.as_int()?;
                let mut items = items.borrow_mut();
                if i >= 0 && (i as usize) < items.len() {
                    items[i as usize] = value;
                }
                Ok(Value::Int(0))
            }
            ("slice", Value::List(items)) => {
                let mut args = values.into_iter();
                let (Some(start), Some(end)) = (args.next(), args.next()) else {
                    return Err("slice takes two arguments".to_string());
                };
                let items = items.borrow();
                let len = items.len() as i64;
                let start = start.as_int()?.clamp(0, len) as usize;
                let end = end.as_int()?.clamp(0, len) as usize;
                let slice = if start < end {
                    items[start..end].to_vec()
                } else {
                    Vec::new()
                };
                Ok(Value::list(slice))
            }

            ("get", Value::Map(entries)) => {
                let key = values.into_iter().next().ok_or("get takes one argument")?;
                Ok(entries
                    .borrow()
                    .iter()
                    .find(|(k, _)| k.eq_value(&key))
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Int(0)))
            }
            ("set", Value::Map(entries)) => {
                let mut args = values.into_iter();
                let (Some(key), Some(value)) = (args.next(), args.next()) else {
                    return Err("set takes two arguments".to_string());
                };
                let mut entries = entries.borrow_mut();
                match entries.iter_mut().find(|(k, _)| k.eq_value(&key)) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Ok(Value::Int(0))
            }
            ("has", Value::Map(entries)) => {
                let key = values.into_iter().next().ok_or("has takes one argument")?;
                Ok(Value::Bool(
                    entries.borrow().iter().any(|(k, _)| k.eq_value(&key)),
                ))
            }
            ("delete", Value::Map(entries)) => {
                let key = values
                    .into_iter()
                    .next()
                    .ok_or("delete takes one argument")?;
                entries.borrow_mut().retain(|(k, _)| !k.eq_value(&key));
                Ok(Value::Int(0))
            }

            ("concat", Value::Str(s)) => {
                let Some(Value::Str(other)) = values.first() else {
                    return Err("concat takes a string argument".to_string());
                };
                Ok(Value::str(format!("{}{}", s, other)))
            }

            (other, object) => Err(format!(
                "unknown method '{}' on {}",
                other,
                object.kind_name()
            )),
        }
    }

    // ------------------------------------------------------------------
    // Construction helpers
    // ------------------------------------------------------------------

    fn eval_struct_literal(
        &mut self,
        act: &mut Activation,
        name: &str,
        fields: &[(String, Expr)],
    ) -> Result<Value, String> {
        let layout = self
            .syms
            .struct_layout(name)
            .ok_or_else(|| format!("unknown struct '{}'", name))?
            .clone();
        for (field_name, _) in fields {
            if layout.field(field_name).is_none() {
                return Err(format!("struct '{}' has no field '{}'", name, field_name));
            }
        }
        let mut values = HashMap::new();
        // Declaration order; fields not named get the zero value
        for slot in &layout.fields {
            let value = match fields.iter().find(|(n, _)| *n == slot.name) {
                Some((_, expr)) => self.eval_expr(act, expr)?,
                None => Value::zero_of(&slot.ty),
            };
            values.insert(slot.name.clone(), value);
        }
        Ok(Value::Struct(Rc::new(StructValue {
            name: name.to_string(),
            fields: RefCell::new(values),
        })))
    }

    pub(super) fn make_enum(
        &self,
        enum_name: &str,
        variant: &str,
        payload: Option<Value>,
    ) -> Result<Value, String> {
        let layout = self
            .syms
            .enum_layout(enum_name)
            .ok_or_else(|| format!("unknown enum '{}'", enum_name))?;
        let tag = layout
            .ordinal(variant)
            .ok_or_else(|| format!("enum '{}' has no variant '{}'", enum_name, variant))?;
        Ok(Value::Enum(Rc::new(EnumValue {
            enum_name: enum_name.to_string(),
            variant: variant.to_string(),
            tag,
            payload,
        })))
    }

    /// Build an emission payload: declared fields in layout order, the
    /// listed ones evaluated, the rest zero.
    pub(super) fn build_payload(
        &mut self,
        act: &mut Activation,
        frequency: &str,
        fields: &[(String, Expr)],
    ) -> Result<Rc<Payload>, String> {
        let layout = self
            .syms
            .frequency(frequency)
            .ok_or_else(|| format!("emit references unknown frequency '{}'", frequency))?
            .clone();
        for (name, _) in fields {
            if layout.field(name).is_none() {
                return Err(format!("frequency '{}' has no field '{}'", frequency, name));
            }
        }
        let mut values = HashMap::new();
        for slot in &layout.fields {
            let value = match fields.iter().find(|(n, _)| *n == slot.name) {
                Some((_, expr)) => self.eval_expr(act, expr)?,
                None => Value::zero_of(&slot.ty),
            };
            values.insert(slot.name.clone(), value);
        }
        Ok(Rc::new(Payload {
            frequency: frequency.to_string(),
            fields: RefCell::new(values),
        }))
    }
}
