//! Expression lowering
//!
//! Every expression leaves its value in `rax`. Binary operations evaluate
//! left, push, evaluate right, move the right operand to `rcx`, pop the
//! left back into `rax`, then apply the operation, so arbitrarily nested
//! operands stay balanced. Comparisons dispatch polymorphically: string
//! operands go through `builtin_string_eq`/`builtin_string_cmp`, enum
//! operands compare dereferenced tags, everything else compares as 64-bit
//! integers.

use super::{CodeGen, CodeGenError};
use crate::ast::{BinOp, Expr, Prim, TypeRef, UnOp};
use crate::layout::SymbolTable;

impl CodeGen<'_> {
    pub(super) fn lower_expr(&mut self, expr: &Expr) -> Result<(), CodeGenError> {
        match expr {
            Expr::Int(value, _) => self.emit(&format!("mov rax, {}", value)),
            Expr::Float(value) => {
                let label = self.float_label(*value)?;
                self.emit(&format!("movsd xmm0, qword ptr [rip + {}]", label))?;
                self.emit("movq rax, xmm0")
            }
            Expr::Str(value) => {
                let label = self.string_label(value)?;
                self.emit(&format!("lea rax, [rip + {}]", label))
            }
            Expr::Char(value) => self.emit(&format!("mov rax, {}", *value as u32)),
            Expr::Bool(value) => self.emit(&format!("mov rax, {}", *value as u8)),
            Expr::Null => self.emit("xor eax, eax"),

            Expr::Var(name) => self.lower_var(name),
            Expr::State(field) => self.lower_state_read(field),
            Expr::Field(object, field) => self.lower_field_read(object, field),
            Expr::Index(object, index) => self.lower_index_read(object, index),

            Expr::Range(_, _) => {
                Err("range expression is only valid in index position".into())
            }

            Expr::Binary(op, lhs, rhs) => self.lower_binary(*op, lhs, rhs),
            Expr::Unary(op, operand) => self.lower_unary(*op, operand),

            Expr::Call { name, args } => self.lower_call(name, args),
            Expr::MethodCall {
                object,
                method,
                args,
            } => self.lower_method_call(object, method, args),

            Expr::Cast(inner, target) => self.lower_cast(inner, target),

            Expr::StructLit { name, fields } => self.lower_struct_literal(name, fields),
            Expr::ArrayLit(elems) => self.lower_vector_literal(elems),
            Expr::Tuple(elems) => self.lower_vector_literal(elems),
            Expr::MapLit(entries) => {
                if entries.is_empty() {
                    self.emit_call("builtin_map_new", 0, false)
                } else {
                    Err("map literal entries are not supported".into())
                }
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_label = self.fresh_label("ifexpr_else");
                let end_label = self.fresh_label("ifexpr_end");
                self.lower_expr(cond)?;
                self.emit("test rax, rax")?;
                self.emit(&format!("je {}", else_label))?;
                self.lower_expr(then_branch)?;
                self.emit(&format!("jmp {}", end_label))?;
                self.emit_label(&else_label)?;
                self.lower_expr(else_branch)?;
                self.emit_label(&end_label)
            }

            Expr::Match { scrutinee, arms } => self.lower_match_expr(scrutinee, arms),

            Expr::EnumPath { enum_name, variant } => {
                self.lower_enum_cell(enum_name, variant, None)
            }
            Expr::EnumCtor {
                enum_name,
                variant,
                args,
            } => self.lower_enum_cell(enum_name, variant, Some(args)),

            Expr::FnLit { .. } => {
                Err("function literals are not supported by the native backend".into())
            }
        }
    }

    fn lower_var(&mut self, name: &str) -> Result<(), CodeGenError> {
        if let Some((binding, _)) = &self.current_param
            && binding == name
        {
            return self.emit("mov rax, r13");
        }
        match self.locals.get(name) {
            Some(slot) => {
                let addr = Self::slot_addr(slot.offset);
                self.emit(&format!("mov rax, {}", addr))
            }
            None => Err(format!("variable '{}' referenced before introduction", name).into()),
        }
    }

    fn lower_state_read(&mut self, field: &str) -> Result<(), CodeGenError> {
        let (offset, ty) = self.state_field(field)?;
        self.emit_load_field("r12", offset, &ty)
    }

    pub(super) fn state_field(&self, field: &str) -> Result<(u64, TypeRef), CodeGenError> {
        let agent = self
            .syms
            .agent(&self.current_agent)
            .ok_or_else(|| format!("unknown agent '{}'", self.current_agent))?;
        let slot = agent.state_field(field).ok_or_else(|| {
            format!(
                "unknown state field '{}' on agent '{}'",
                field, self.current_agent
            )
        })?;
        Ok((slot.offset, slot.ty.clone()))
    }

    pub(super) fn payload_field(&self, field: &str) -> Result<(u64, TypeRef), CodeGenError> {
        let (_, frequency) = self
            .current_param
            .as_ref()
            .ok_or("signal payload is not available here")?;
        let layout = self
            .syms
            .frequency(frequency)
            .ok_or_else(|| format!("unknown frequency '{}'", frequency))?;
        let slot = layout.field(field).ok_or_else(|| {
            format!(
                "unknown payload field '{}' on frequency '{}'",
                field, frequency
            )
        })?;
        Ok((slot.offset, slot.ty.clone()))
    }

    /// True if `expr` is the bare signal binding of the current handler.
    pub(super) fn is_payload_binding(&self, expr: &Expr) -> bool {
        matches!(
            (expr, &self.current_param),
            (Expr::Var(name), Some((binding, _))) if name == binding
        )
    }

    fn lower_field_read(&mut self, object: &Expr, field: &str) -> Result<(), CodeGenError> {
        if self.is_payload_binding(object) {
            let (offset, ty) = self.payload_field(field)?;
            return self.emit_load_field("r13", offset, &ty);
        }
        let struct_name = self.struct_name_of(object).ok_or_else(|| {
            format!("cannot infer a struct type for field access '.{}'", field)
        })?;
        let layout = self.syms.struct_layout(&struct_name).unwrap();
        let slot = layout
            .field(field)
            .ok_or_else(|| format!("struct '{}' has no field '{}'", struct_name, field))?
            .clone();
        self.lower_expr(object)?;
        self.emit_load_field("rax", slot.offset, &slot.ty)
    }

    fn lower_index_read(&mut self, object: &Expr, index: &Expr) -> Result<(), CodeGenError> {
        if let Expr::Range(start, end) = index {
            self.lower_expr(object)?;
            self.emit("push rax")?;
            self.lower_expr(start)?;
            self.emit("push rax")?;
            self.lower_expr(end)?;
            self.emit("push rax")?;
            return self.emit_call("builtin_vec_slice", 3, false);
        }
        let target = if self.is_map_typed(object) {
            "builtin_map_get"
        } else {
            "builtin_vec_get"
        };
        self.lower_expr(object)?;
        self.emit("push rax")?;
        self.lower_expr(index)?;
        self.emit("push rax")?;
        self.emit_call(target, 2, false)
    }

    fn lower_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), CodeGenError> {
        match op {
            BinOp::And | BinOp::Or => return self.lower_logical(op, lhs, rhs),
            _ if op.is_comparison() => return self.lower_comparison(op, lhs, rhs),
            _ => {}
        }

        let float_operand = matches!(self.static_type(lhs), Some(TypeRef::Prim(p)) if p.is_float())
            || matches!(self.static_type(rhs), Some(TypeRef::Prim(p)) if p.is_float());
        if float_operand {
            return Err("float arithmetic is not supported by the native backend yet".into());
        }

        self.lower_expr(lhs)?;
        self.emit("push rax")?;
        self.lower_expr(rhs)?;
        self.emit("mov rcx, rax")?;
        self.emit("pop rax")?;
        match op {
            BinOp::Add => self.emit("add rax, rcx"),
            BinOp::Sub => self.emit("sub rax, rcx"),
            BinOp::Mul => self.emit("imul rax, rcx"),
            BinOp::Div => {
                self.emit("cqo")?;
                self.emit("idiv rcx")
            }
            BinOp::Mod => {
                self.emit("cqo")?;
                self.emit("idiv rcx")?;
                self.emit("mov rax, rdx")
            }
            BinOp::BitAnd => self.emit("and rax, rcx"),
            BinOp::BitOr => self.emit("or rax, rcx"),
            BinOp::BitXor => self.emit("xor rax, rcx"),
            BinOp::Shl => self.emit("shl rax, cl"),
            BinOp::Shr => self.emit("shr rax, cl"),
            _ => unreachable!("comparison handled above"),
        }
    }

    fn lower_logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), CodeGenError> {
        let short_label = self.fresh_label("logic_short");
        let end_label = self.fresh_label("logic_end");
        self.lower_expr(lhs)?;
        self.emit("test rax, rax")?;
        match op {
            BinOp::And => self.emit(&format!("je {}", short_label))?,
            BinOp::Or => self.emit(&format!("jne {}", short_label))?,
            _ => unreachable!(),
        }
        self.lower_expr(rhs)?;
        self.emit("test rax, rax")?;
        self.emit("setne al")?;
        self.emit("movzx eax, al")?;
        self.emit(&format!("jmp {}", end_label))?;
        self.emit_label(&short_label)?;
        match op {
            BinOp::And => self.emit("xor eax, eax")?,
            BinOp::Or => self.emit("mov eax, 1")?,
            _ => unreachable!(),
        }
        self.emit_label(&end_label)
    }

    fn lower_comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(), CodeGenError> {
        // String dispatch
        if self.is_string_typed(lhs) || self.is_string_typed(rhs) {
            self.lower_expr(lhs)?;
            self.emit("push rax")?;
            self.lower_expr(rhs)?;
            self.emit("push rax")?;
            return match op {
                BinOp::Eq => self.emit_call("builtin_string_eq", 2, false),
                BinOp::Ne => {
                    self.emit_call("builtin_string_eq", 2, false)?;
                    self.emit("xor rax, 1")
                }
                _ => {
                    self.emit_call("builtin_string_cmp", 2, false)?;
                    self.emit("cmp rax, 0")?;
                    self.emit_setcc(op)
                }
            };
        }

        self.lower_expr(lhs)?;
        self.emit("push rax")?;
        self.lower_expr(rhs)?;
        self.emit("mov rcx, rax")?;
        self.emit("pop rax")?;

        // Enum dispatch: compare tags through the tagged-union pointers
        if self.is_enum_typed(lhs) || self.is_enum_typed(rhs) {
            self.emit("mov rax, qword ptr [rax]")?;
            self.emit("mov rcx, qword ptr [rcx]")?;
        }
        self.emit("cmp rax, rcx")?;
        self.emit_setcc(op)
    }

    fn emit_setcc(&mut self, op: BinOp) -> Result<(), CodeGenError> {
        let cc = match op {
            BinOp::Eq => "sete",
            BinOp::Ne => "setne",
            BinOp::Lt => "setl",
            BinOp::Gt => "setg",
            BinOp::Le => "setle",
            BinOp::Ge => "setge",
            _ => unreachable!("not a comparison"),
        };
        self.emit(&format!("{} al", cc))?;
        self.emit("movzx eax, al")
    }

    fn lower_unary(&mut self, op: UnOp, operand: &Expr) -> Result<(), CodeGenError> {
        self.lower_expr(operand)?;
        match op {
            UnOp::Neg => self.emit("neg rax"),
            UnOp::Not => {
                self.emit("test rax, rax")?;
                self.emit("sete al")?;
                self.emit("movzx eax, al")
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(super) fn push_args(&mut self, args: &[Expr]) -> Result<(), CodeGenError> {
        for arg in args {
            self.lower_expr(arg)?;
            self.emit("push rax")?;
        }
        Ok(())
    }

    fn lower_call(&mut self, name: &str, args: &[Expr]) -> Result<(), CodeGenError> {
        // Rules of the current hyphal shadow builtins
        let is_rule = self
            .net
            .find_hyphal(&self.current_hyphal)
            .is_some_and(|h| h.find_rule(name).is_some());
        if is_rule {
            let label = SymbolTable::rule_label(&self.current_agent, name);
            self.push_args(args)?;
            return self.emit_call(&label, args.len(), false);
        }

        match name {
            "format" => self.lower_format(args),
            "print" | "println" => self.lower_print(name, args),
            "len" => {
                if args.len() != 1 {
                    return Err("len takes exactly one argument".into());
                }
                let target = if self.is_string_typed(&args[0]) {
                    "builtin_string_len"
                } else {
                    "builtin_vec_len"
                };
                self.push_args(args)?;
                self.emit_call(target, 1, false)
            }
            "sum" => {
                if args.len() != 1 {
                    return Err("sum takes exactly one argument".into());
                }
                self.push_args(args)?;
                self.emit_call("builtin_vec_sum", 1, false)
            }
            "to_string" => {
                if args.len() != 1 {
                    return Err("to_string takes exactly one argument".into());
                }
                self.push_args(args)?;
                self.emit_call("builtin_int_to_string", 1, false)
            }
            "read_file" => {
                if args.len() != 1 {
                    return Err("read_file takes exactly one argument".into());
                }
                self.push_args(args)?;
                self.emit_call("builtin_read_file", 1, false)
            }
            _ => {
                if self.locals.contains_key(name) {
                    Err(format!(
                        "calling closure value '{}' is not supported by the native backend",
                        name
                    )
                    .into())
                } else {
                    Err(format!("unknown rule or builtin '{}'", name).into())
                }
            }
        }
    }

    /// `format` at the ABI level takes the format string plus five
    /// pre-stringified slots; unused slots are null. Integer-classified
    /// arguments are converted through `builtin_int_to_string` first.
    fn lower_format(&mut self, args: &[Expr]) -> Result<(), CodeGenError> {
        if args.is_empty() {
            return Err("format needs a format string".into());
        }
        if args.len() > 6 {
            return Err("format supports at most five interpolated arguments".into());
        }
        self.lower_expr(&args[0])?;
        self.emit("push rax")?;
        for slot in 1..6 {
            match args.get(slot) {
                Some(arg) => {
                    if self.is_string_typed(arg) {
                        self.lower_expr(arg)?;
                        self.emit("push rax")?;
                    } else {
                        self.lower_expr(arg)?;
                        self.emit("push rax")?;
                        self.emit_call("builtin_int_to_string", 1, false)?;
                        self.emit("push rax")?;
                    }
                }
                None => {
                    self.emit("xor eax, eax")?;
                    self.emit("push rax")?;
                }
            }
        }
        self.emit_call("builtin_format", 6, true)
    }

    fn lower_print(&mut self, name: &str, args: &[Expr]) -> Result<(), CodeGenError> {
        if args.len() != 1 {
            return Err(format!("{} takes exactly one argument", name).into());
        }
        if self.is_string_typed(&args[0]) {
            let target = if name == "println" {
                "builtin_println"
            } else {
                "builtin_print"
            };
            self.push_args(args)?;
            return self.emit_call(target, 1, false);
        }
        self.push_args(args)?;
        self.emit_call("builtin_print_i64", 1, false)?;
        if name == "println" {
            self.emit(&format!("lea rax, [rip + {}]", super::globals::MSG_NEWLINE))?;
            self.emit("push rax")?;
            self.emit_call("builtin_print", 1, false)?;
        }
        Ok(())
    }

    fn lower_method_call(
        &mut self,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<(), CodeGenError> {
        let map_like = self.is_map_typed(object);
        let (target, want_args) = match method {
            "len" => {
                if self.is_string_typed(object) {
                    ("builtin_string_len", 0)
                } else if map_like {
                    ("builtin_map_len", 0)
                } else {
                    ("builtin_vec_len", 0)
                }
            }
            "push" => ("builtin_vec_push", 1),
            "pop" => ("builtin_vec_pop", 0),
            "get" => {
                if map_like {
                    ("builtin_map_get", 1)
                } else {
                    ("builtin_vec_get", 1)
                }
            }
            "set" => {
                if map_like {
                    ("builtin_map_set", 2)
                } else {
                    ("builtin_vec_set", 2)
                }
            }
            "slice" => ("builtin_vec_slice", 2),
            "has" => ("builtin_map_has", 1),
            "delete" => ("builtin_map_delete", 1),
            "concat" => ("builtin_string_concat", 1),
            other => return Err(format!("unknown method '{}'", other).into()),
        };
        if args.len() != want_args {
            return Err(format!(
                "method '{}' takes {} argument(s), got {}",
                method,
                want_args,
                args.len()
            )
            .into());
        }
        self.lower_expr(object)?;
        self.emit("push rax")?;
        self.push_args(args)?;
        self.emit_call(target, 1 + args.len(), false)
    }

    fn lower_cast(&mut self, inner: &Expr, target: &TypeRef) -> Result<(), CodeGenError> {
        let source = self.static_type(inner);
        self.lower_expr(inner)?;
        match target {
            TypeRef::Prim(Prim::Bool) => {
                self.emit("test rax, rax")?;
                self.emit("setne al")?;
                self.emit("movzx eax, al")
            }
            TypeRef::Prim(p) if p.size() == 8 && !p.is_float() => match source {
                Some(TypeRef::Prim(Prim::I32)) => self.emit("movsxd rax, eax"),
                Some(TypeRef::Prim(Prim::U32)) => self.emit("mov eax, eax"),
                // Loads already extend narrower widths; everything else is
                // representation-identical
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Aggregate construction
    // ------------------------------------------------------------------

    fn lower_struct_literal(
        &mut self,
        name: &str,
        fields: &[(String, Expr)],
    ) -> Result<(), CodeGenError> {
        let layout = self
            .syms
            .struct_layout(name)
            .ok_or_else(|| format!("unknown struct '{}'", name))?
            .clone();
        for (field_name, _) in fields {
            if layout.field(field_name).is_none() {
                return Err(format!(
                    "struct '{}' has no field '{}'",
                    name, field_name
                )
                .into());
            }
        }
        self.emit("push r15")?;
        self.emit(&format!("mov rax, {}", layout.size))?;
        self.emit("push rax")?;
        self.emit_call("builtin_heap_alloc", 1, false)?;
        self.emit("mov r15, rax")?;
        // Initialize in declaration order; fields not named stay zero
        // (the arena is .bss-backed and never reused)
        for slot in &layout.fields {
            if let Some((_, value)) = fields.iter().find(|(n, _)| *n == slot.name) {
                self.lower_expr(value)?;
                self.emit_store_field("r15", slot.offset, &slot.ty)?;
            }
        }
        self.emit("mov rax, r15")?;
        self.emit("pop r15")
    }

    /// Allocate and fill a tagged-union cell: ordinal at offset 0, payload
    /// at offset 8. Data-less variants zero the payload slot.
    fn lower_enum_cell(
        &mut self,
        enum_name: &str,
        variant: &str,
        args: Option<&[Expr]>,
    ) -> Result<(), CodeGenError> {
        let layout = self
            .syms
            .enum_layout(enum_name)
            .ok_or_else(|| format!("unknown enum '{}'", enum_name))?;
        let ordinal = layout
            .ordinal(variant)
            .ok_or_else(|| format!("enum '{}' has no variant '{}'", enum_name, variant))?;
        let cell_size = layout.size;

        // One payload slot; a multi-value payload is a tuple argument
        let payload = match args {
            None | Some([]) => None,
            Some([single]) => Some(single),
            Some(_) => {
                return Err(format!(
                    "constructor '{}::{}' takes a single argument",
                    enum_name, variant
                )
                .into());
            }
        };

        self.emit("push r15")?;
        match payload {
            None => {
                self.alloc_enum_cell(cell_size, ordinal)?;
                self.emit("mov qword ptr [r15 + 8], 0")?;
            }
            Some(single) => {
                self.lower_expr(single)?;
                self.emit("push rax")?;
                self.alloc_enum_cell(cell_size, ordinal)?;
                self.emit("pop rcx")?;
                self.emit("mov qword ptr [r15 + 8], rcx")?;
            }
        }
        self.emit("mov rax, r15")?;
        self.emit("pop r15")
    }

    fn alloc_enum_cell(&mut self, size: u64, ordinal: u64) -> Result<(), CodeGenError> {
        self.emit(&format!("mov rax, {}", size))?;
        self.emit("push rax")?;
        self.emit_call("builtin_heap_alloc", 1, false)?;
        self.emit("mov r15, rax")?;
        self.emit(&format!("mov qword ptr [r15], {}", ordinal))
    }

    pub(super) fn lower_vector_literal(&mut self, elems: &[Expr]) -> Result<(), CodeGenError> {
        self.emit("push r15")?;
        self.emit_call("builtin_vec_new", 0, false)?;
        self.emit("mov r15, rax")?;
        for elem in elems {
            self.emit("push r15")?;
            self.lower_expr(elem)?;
            self.emit("push rax")?;
            self.emit_call("builtin_vec_push", 2, false)?;
        }
        self.emit("mov rax, r15")?;
        self.emit("pop r15")
    }

    fn lower_match_expr(
        &mut self,
        scrutinee: &Expr,
        arms: &[(Vec<crate::ast::Pattern>, Expr)],
    ) -> Result<(), CodeGenError> {
        self.lower_expr(scrutinee)?;
        let slot = self.alloc_temp("match");
        self.emit(&format!("mov {}, rax", Self::slot_addr(slot)))?;

        let end_label = self.fresh_label("match_end");
        for (patterns, value) in arms {
            let body_label = self.fresh_label("match_arm");
            let next_arm = self.fresh_label("match_next");
            for pattern in patterns {
                let fail = self.fresh_label("match_fail");
                self.emit_pattern_test(slot, pattern, &fail)?;
                self.emit(&format!("jmp {}", body_label))?;
                self.emit_label(&fail)?;
            }
            self.emit(&format!("jmp {}", next_arm))?;
            self.emit_label(&body_label)?;
            self.lower_expr(value)?;
            self.emit(&format!("jmp {}", end_label))?;
            self.emit_label(&next_arm)?;
        }
        // No arm matched: the zero value
        self.emit("xor eax, eax")?;
        self.emit_label(&end_label)
    }
}
