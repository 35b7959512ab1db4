//! Statement lowering
//!
//! Local slots grow monotonically per frame; the maximum becomes the frame
//! reservation in the prologue. Loops keep their index and limit in the
//! callee-saved `r15`/`r14` pair, saved around the loop so nesting works;
//! `break` jumps to the end label where the pops live, so the stack stays
//! balanced on every exit path.

use super::globals::MSG_QUEUE_OVERFLOW;
use super::{CodeGen, CodeGenError, LoopFrame};
use crate::ast::{
    AssignTarget, Expr, ForBinding, MatchArm, Pattern, ReportValue, Stmt, TypeRef,
};

impl CodeGen<'_> {
    pub(super) fn lower_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CodeGenError> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::Let { name, ty, value } => {
                let recorded = ty.clone().or_else(|| self.static_type(value));
                self.lower_expr(value)?;
                let offset = self.alloc_local(name, recorded);
                self.emit(&format!("mov {}, rax", Self::slot_addr(offset)))
            }

            Stmt::Assign { target, value } => self.lower_assign(target, value),

            Stmt::Emit { frequency, fields } => self.lower_emit(frequency, fields),

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let else_label = self.fresh_label("else");
                let end_label = self.fresh_label("end");
                self.lower_expr(cond)?;
                self.emit("test rax, rax")?;
                self.emit(&format!("je {}", else_label))?;
                self.lower_stmts(then_body)?;
                self.emit(&format!("jmp {}", end_label))?;
                self.emit_label(&else_label)?;
                if let Some(else_body) = else_body {
                    self.lower_stmts(else_body)?;
                }
                self.emit_label(&end_label)
            }

            Stmt::While { cond, body } => {
                let test_label = self.fresh_label("while_test");
                let end_label = self.fresh_label("while_end");
                self.emit_label(&test_label)?;
                self.lower_expr(cond)?;
                self.emit("test rax, rax")?;
                self.emit(&format!("je {}", end_label))?;
                self.loop_stack.push(LoopFrame {
                    continue_label: test_label.clone(),
                    break_label: end_label.clone(),
                });
                self.lower_stmts(body)?;
                self.loop_stack.pop();
                self.emit(&format!("jmp {}", test_label))?;
                self.emit_label(&end_label)
            }

            Stmt::For {
                binding,
                iter,
                body,
            } => self.lower_for(binding, iter, body),

            Stmt::Match { scrutinee, arms } => self.lower_match_stmt(scrutinee, arms),

            Stmt::Report { label, value } => self.lower_report(label, value),

            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.lower_expr(value)?;
                }
                let epilogue = self.epilogue_label.clone();
                self.emit(&format!("jmp {}", epilogue))
            }

            Stmt::Break => match self.loop_stack.last() {
                Some(frame) => {
                    let label = frame.break_label.clone();
                    self.emit(&format!("jmp {}", label))
                }
                None => Err("'break' outside of a loop".into()),
            },

            Stmt::Continue => match self.loop_stack.last() {
                Some(frame) => {
                    let label = frame.continue_label.clone();
                    self.emit(&format!("jmp {}", label))
                }
                None => Err("'continue' outside of a loop".into()),
            },

            Stmt::Expr(expr) => self.lower_expr(expr),
        }
    }

    fn lower_assign(&mut self, target: &AssignTarget, value: &Expr) -> Result<(), CodeGenError> {
        match target {
            AssignTarget::Var(name) => {
                let offset = match self.locals.get(name) {
                    Some(slot) => slot.offset,
                    None => {
                        return Err(format!(
                            "variable '{}' referenced before introduction",
                            name
                        )
                        .into());
                    }
                };
                self.lower_expr(value)?;
                self.emit(&format!("mov {}, rax", Self::slot_addr(offset)))
            }
            AssignTarget::State(field) => {
                let (offset, ty) = self.state_field(field)?;
                self.lower_expr(value)?;
                self.emit_store_field("r12", offset, &ty)
            }
            AssignTarget::Field { object, field } => {
                if self.is_payload_binding(object) {
                    let (offset, ty) = self.payload_field(field)?;
                    self.lower_expr(value)?;
                    return self.emit_store_field("r13", offset, &ty);
                }
                let struct_name = self.struct_name_of(object).ok_or_else(|| {
                    format!("cannot infer a struct type for field assignment '.{}'", field)
                })?;
                let slot = self
                    .syms
                    .struct_layout(&struct_name)
                    .unwrap()
                    .field(field)
                    .ok_or_else(|| {
                        format!("struct '{}' has no field '{}'", struct_name, field)
                    })?
                    .clone();
                self.lower_expr(object)?;
                self.emit("push rax")?;
                self.lower_expr(value)?;
                self.emit("pop rcx")?;
                self.emit_store_field("rcx", slot.offset, &slot.ty)
            }
            AssignTarget::Index { object, index } => {
                let target = if self.is_map_typed(object) {
                    "builtin_map_set"
                } else {
                    "builtin_vec_set"
                };
                self.lower_expr(object)?;
                self.emit("push rax")?;
                self.lower_expr(index)?;
                self.emit("push rax")?;
                self.lower_expr(value)?;
                self.emit("push rax")?;
                self.emit_call(target, 3, false)
            }
        }
    }

    /// Allocate a payload, fill its fields by the frequency layout, then
    /// enqueue the pointer into the queue routed from the active agent.
    /// An emission with no matching socket still builds the payload (field
    /// expressions may have effects) and silently drops it.
    fn lower_emit(
        &mut self,
        frequency: &str,
        fields: &[(String, Expr)],
    ) -> Result<(), CodeGenError> {
        let layout = self
            .syms
            .frequency(frequency)
            .ok_or_else(|| format!("emit references unknown frequency '{}'", frequency))?
            .clone();
        for (name, _) in fields {
            if layout.field(name).is_none() {
                return Err(format!(
                    "frequency '{}' has no field '{}'",
                    frequency, name
                )
                .into());
            }
        }

        self.emit("push r15")?;
        self.emit(&format!("mov rax, {}", layout.size.max(8)))?;
        self.emit("push rax")?;
        self.emit_call("builtin_heap_alloc", 1, false)?;
        self.emit("mov r15, rax")?;
        for slot in &layout.fields {
            if let Some((_, value)) = fields.iter().find(|(n, _)| *n == slot.name) {
                self.lower_expr(value)?;
                self.emit_store_field("r15", slot.offset, &slot.ty)?;
            }
        }

        let route = self
            .syms
            .route(&self.current_agent, frequency)
            .map(|r| r.queue_index);
        if let Some(queue_index) = route {
            self.emit_enqueue(queue_index, "r15")?;
        }
        self.emit("mov rax, r15")?;
        self.emit("pop r15")
    }

    /// Ring-buffer enqueue of the payload in `payload_reg`. Jumps to the
    /// shared overflow stub when tail+1 would reach head.
    pub(super) fn emit_enqueue(
        &mut self,
        queue_index: usize,
        payload_reg: &str,
    ) -> Result<(), CodeGenError> {
        let queue = crate::layout::SymbolTable::queue_label(queue_index);
        let nowrap = self.fresh_label("enq_nowrap");
        self.emit(&format!("lea rcx, [rip + {}]", queue))?;
        self.emit("mov rdx, qword ptr [rcx + 8]")?;
        self.emit(&format!(
            "mov qword ptr [rcx + 16 + rdx*8], {}",
            payload_reg
        ))?;
        self.emit("inc rdx")?;
        self.emit(&format!("cmp rdx, {}", self.syms.queue_capacity))?;
        self.emit(&format!("jne {}", nowrap))?;
        self.emit("xor edx, edx")?;
        self.emit_label(&nowrap)?;
        self.emit("cmp rdx, qword ptr [rcx]")?;
        self.emit("je queue_overflow")?;
        self.emit("mov qword ptr [rcx + 8], rdx")
    }

    fn lower_for(
        &mut self,
        binding: &ForBinding,
        iter: &Expr,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        let map_like = self.is_map_typed(iter);
        match binding {
            ForBinding::Item { .. } if map_like => {
                Err("use 'for k, v in ...' to iterate a map".into())
            }
            ForBinding::KeyValue { .. } if !map_like => {
                Err("'for k, v in ...' requires a map collection".into())
            }
            ForBinding::Item { name, ty } => {
                let elem_ty = ty.clone().or_else(|| match self.static_type(iter) {
                    Some(TypeRef::Vec(elem)) | Some(TypeRef::Queue(elem)) => Some(*elem),
                    _ => None,
                });
                let item_slot = self.alloc_local(name, elem_ty);
                self.lower_collection_loop(iter, "builtin_vec_len", body, |cg, coll_slot| {
                    cg.emit(&format!("mov rax, {}", Self::slot_addr(coll_slot)))?;
                    cg.emit("push rax")?;
                    cg.emit("push r15")?;
                    cg.emit_call("builtin_vec_get", 2, false)?;
                    cg.emit(&format!("mov {}, rax", Self::slot_addr(item_slot)))
                })
            }
            ForBinding::KeyValue { key, value } => {
                let (key_ty, value_ty) = match self.static_type(iter) {
                    Some(TypeRef::Map(k, v)) => (Some(*k), Some(*v)),
                    _ => (None, None),
                };
                let key_slot = self.alloc_local(key, key_ty);
                let value_slot = self.alloc_local(value, value_ty);
                self.lower_collection_loop(iter, "builtin_map_len", body, |cg, coll_slot| {
                    cg.emit(&format!("mov rax, {}", Self::slot_addr(coll_slot)))?;
                    cg.emit("push rax")?;
                    cg.emit("push r15")?;
                    cg.emit_call("builtin_map_key_at", 2, false)?;
                    cg.emit(&format!("mov {}, rax", Self::slot_addr(key_slot)))?;
                    cg.emit(&format!("mov rax, {}", Self::slot_addr(coll_slot)))?;
                    cg.emit("push rax")?;
                    cg.emit("push r15")?;
                    cg.emit_call("builtin_map_val_at", 2, false)?;
                    cg.emit(&format!("mov {}, rax", Self::slot_addr(value_slot)))
                })
            }
        }
    }

    /// Shared counted-loop skeleton: evaluate the collection once, take its
    /// length once, then run `load_item` + body with the index in `r15` and
    /// the limit in `r14`.
    fn lower_collection_loop(
        &mut self,
        iter: &Expr,
        len_builtin: &str,
        body: &[Stmt],
        load_item: impl Fn(&mut Self, u64) -> Result<(), CodeGenError>,
    ) -> Result<(), CodeGenError> {
        let coll_slot = self.alloc_temp("for_coll");
        self.lower_expr(iter)?;
        self.emit(&format!("mov {}, rax", Self::slot_addr(coll_slot)))?;

        let test_label = self.fresh_label("for_test");
        let step_label = self.fresh_label("for_step");
        let end_label = self.fresh_label("for_end");

        self.emit("push r14")?;
        self.emit("push r15")?;
        self.emit(&format!("mov rax, {}", Self::slot_addr(coll_slot)))?;
        self.emit("push rax")?;
        self.emit_call(len_builtin, 1, false)?;
        self.emit("mov r14, rax")?;
        self.emit("xor r15d, r15d")?;

        self.emit_label(&test_label)?;
        self.emit("cmp r15, r14")?;
        self.emit(&format!("jge {}", end_label))?;
        load_item(self, coll_slot)?;

        self.loop_stack.push(LoopFrame {
            continue_label: step_label.clone(),
            break_label: end_label.clone(),
        });
        self.lower_stmts(body)?;
        self.loop_stack.pop();

        self.emit_label(&step_label)?;
        self.emit("inc r15")?;
        self.emit(&format!("jmp {}", test_label))?;
        self.emit_label(&end_label)?;
        self.emit("pop r15")?;
        self.emit("pop r14")
    }

    // ------------------------------------------------------------------
    // Match
    // ------------------------------------------------------------------

    fn lower_match_stmt(
        &mut self,
        scrutinee: &Expr,
        arms: &[MatchArm],
    ) -> Result<(), CodeGenError> {
        self.lower_expr(scrutinee)?;
        let slot = self.alloc_temp("match");
        self.emit(&format!("mov {}, rax", Self::slot_addr(slot)))?;

        let end_label = self.fresh_label("match_end");
        for arm in arms {
            let body_label = self.fresh_label("match_arm");
            let next_arm = self.fresh_label("match_next");
            for pattern in &arm.patterns {
                let fail = self.fresh_label("match_fail");
                self.emit_pattern_test(slot, pattern, &fail)?;
                self.emit(&format!("jmp {}", body_label))?;
                self.emit_label(&fail)?;
            }
            self.emit(&format!("jmp {}", next_arm))?;
            self.emit_label(&body_label)?;
            self.lower_stmts(&arm.body)?;
            self.emit(&format!("jmp {}", end_label))?;
            self.emit_label(&next_arm)?;
        }
        // No arm matched: a statement-position match is a no-op
        self.emit_label(&end_label)
    }

    /// Slot for a pattern binding. Alternation branches binding the same
    /// name must share one slot, so an existing local is reused.
    fn bind_slot(&mut self, name: &str) -> u64 {
        match self.locals.get(name) {
            Some(slot) => slot.offset,
            None => self.alloc_local(name, None),
        }
    }

    /// Emit a test for one pattern against the scrutinee slot. Falls
    /// through on success with any bindings stored; jumps to `fail` on
    /// mismatch. Bare identifiers always succeed and bind the scrutinee.
    pub(super) fn emit_pattern_test(
        &mut self,
        scrutinee_slot: u64,
        pattern: &Pattern,
        fail: &str,
    ) -> Result<(), CodeGenError> {
        let scrutinee = Self::slot_addr(scrutinee_slot);
        match pattern {
            Pattern::Literal(Expr::Str(value)) => {
                let label = self.string_label(value)?;
                self.emit(&format!("mov rax, {}", scrutinee))?;
                self.emit("push rax")?;
                self.emit(&format!("lea rax, [rip + {}]", label))?;
                self.emit("push rax")?;
                self.emit_call("builtin_string_eq", 2, false)?;
                self.emit("test rax, rax")?;
                self.emit(&format!("je {}", fail))
            }
            Pattern::Literal(Expr::Null) => {
                self.emit(&format!("mov rax, {}", scrutinee))?;
                self.emit("test rax, rax")?;
                self.emit(&format!("jne {}", fail))
            }
            Pattern::Literal(Expr::Float(value)) => {
                self.emit(&format!("mov rax, {}", scrutinee))?;
                self.emit(&format!("mov rcx, {}", value.to_bits() as i64))?;
                self.emit("cmp rax, rcx")?;
                self.emit(&format!("jne {}", fail))
            }
            Pattern::Literal(literal) => {
                let value = match literal {
                    Expr::Int(v, _) => *v,
                    Expr::Char(c) => *c as i64,
                    Expr::Bool(b) => *b as i64,
                    other => {
                        return Err(format!(
                            "unsupported literal pattern {:?}",
                            other
                        )
                        .into());
                    }
                };
                self.emit(&format!("mov rax, {}", scrutinee))?;
                self.emit(&format!("mov rcx, {}", value))?;
                self.emit("cmp rax, rcx")?;
                self.emit(&format!("jne {}", fail))
            }
            Pattern::Binding(name) => {
                let offset = self.bind_slot(name);
                self.emit(&format!("mov rax, {}", scrutinee))?;
                self.emit(&format!("mov {}, rax", Self::slot_addr(offset)))
            }
            Pattern::Variant {
                enum_name,
                variant,
                bindings,
            } => {
                let layout = self
                    .syms
                    .enum_layout(enum_name)
                    .ok_or_else(|| format!("unknown enum '{}' in pattern", enum_name))?;
                let ordinal = layout.ordinal(variant).ok_or_else(|| {
                    format!("enum '{}' has no variant '{}'", enum_name, variant)
                })?;
                // Every enum value is a tagged heap cell; matching always
                // dereferences the tag word
                self.emit(&format!("mov rax, {}", scrutinee))?;
                self.emit("mov rax, qword ptr [rax]")?;
                self.emit(&format!("cmp rax, {}", ordinal))?;
                self.emit(&format!("jne {}", fail))?;
                match bindings.len() {
                    0 => Ok(()),
                    1 => {
                        let offset = self.bind_slot(&bindings[0]);
                        self.emit(&format!("mov rax, {}", scrutinee))?;
                        self.emit("mov rax, qword ptr [rax + 8]")?;
                        self.emit(&format!("mov {}, rax", Self::slot_addr(offset)))
                    }
                    _ => {
                        // Multi-binding payloads use the vector representation
                        for (i, binding) in bindings.iter().enumerate() {
                            let offset = self.bind_slot(binding);
                            self.emit(&format!("mov rax, {}", scrutinee))?;
                            self.emit("mov rax, qword ptr [rax + 8]")?;
                            self.emit("push rax")?;
                            self.emit(&format!("mov rax, {}", i))?;
                            self.emit("push rax")?;
                            self.emit_call("builtin_vec_get", 2, false)?;
                            self.emit(&format!("mov {}, rax", Self::slot_addr(offset)))?;
                        }
                        Ok(())
                    }
                }
            }
            Pattern::Tuple(elems) => {
                // Tuples share the vector representation: match each
                // sub-pattern against its fixed element
                for (i, sub) in elems.iter().enumerate() {
                    let elem_slot = self.alloc_temp("tuple_elem");
                    self.emit(&format!("mov rax, {}", scrutinee))?;
                    self.emit("push rax")?;
                    self.emit(&format!("mov rax, {}", i))?;
                    self.emit("push rax")?;
                    self.emit_call("builtin_vec_get", 2, false)?;
                    self.emit(&format!("mov {}, rax", Self::slot_addr(elem_slot)))?;
                    self.emit_pattern_test(elem_slot, sub, fail)?;
                }
                Ok(())
            }
        }
    }

    fn lower_report(&mut self, label: &str, value: &ReportValue) -> Result<(), CodeGenError> {
        match value {
            ReportValue::Expr(expr) => self.lower_report_entry(label, expr),
            ReportValue::Fields(fields) => {
                for (name, expr) in fields {
                    let entry = format!("{}.{}", label, name);
                    self.lower_report_entry(&entry, expr)?;
                }
                Ok(())
            }
        }
    }

    fn lower_report_entry(&mut self, name: &str, expr: &Expr) -> Result<(), CodeGenError> {
        let target = if self.is_string_typed(expr) {
            "builtin_report_str"
        } else {
            "builtin_report_i64"
        };
        let label = self.string_label(name)?;
        self.emit(&format!("lea rax, [rip + {}]", label))?;
        self.emit("push rax")?;
        self.lower_expr(expr)?;
        self.emit("push rax")?;
        self.emit_call(target, 2, false)
    }

    /// The shared overflow stub every enqueue jumps to: print the fixed
    /// message and exit 4.
    pub(super) fn emit_queue_overflow_stub(&mut self) -> Result<(), CodeGenError> {
        self.emit_label("queue_overflow")?;
        self.emit(&format!("lea rax, [rip + {}]", MSG_QUEUE_OVERFLOW))?;
        self.emit("push rax")?;
        self.emit_call("builtin_print", 1, false)?;
        self.emit("mov rax, 60")?;
        self.emit("mov edi, 4")?;
        self.emit("syscall")
    }
}
