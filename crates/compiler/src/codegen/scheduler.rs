//! Tidal-cycle scheduler and output drain
//!
//! `_start` owns the whole run: parse argv, initialize the bump heap
//! cells, pre-initialize container state fields, evaluate state defaults,
//! run every rest handler once, inject the initial SENSE payloads, then
//! iterate the tidal loop until quiescence or the cycle cap.
//!
//! Scheduler register plan (handlers preserve all of these across calls):
//!
//! | register | role |
//! |---|---|
//! | `r12` | cycle counter (state pointer only during initialization) |
//! | `r13` | dispatches this cycle |
//! | `r14` | tail snapshot of the queue being serviced |
//! | `r15` | payload being dispatched |
//!
//! The tail snapshot is what makes a signal emitted during a handler
//! invisible to the current pass: the service loop stops at the tail
//! observed when the pass began, so fresh entries wait for the next cycle.

use super::globals::{
    MSG_MAX_CYCLES, MSG_NEWLINE, MSG_OUTPUT_PREFIX, MSG_SPACE,
};
use super::handlers::Sink;
use super::{CodeGen, CodeGenError};
use crate::ast::{Prim, TypeRef};
use crate::layout::SymbolTable;

/// Label of the per-frequency drain procedure.
pub(super) fn drain_label(frequency: &str) -> String {
    format!("drain_{}", frequency)
}

/// Address of an agent's state region, or a field within it.
fn state_addr(offset: u64) -> String {
    if offset == 0 {
        "[rip + agent_state]".to_string()
    } else {
        format!("[rip + agent_state + {}]", offset)
    }
}

impl CodeGen<'_> {
    /// Generate one drain procedure per frequency routed into an output
    /// fruiting body: fixed prefix, then the string fields (or, if there
    /// are none, the integer fields) in declaration order, space
    /// separated, then a newline.
    pub(super) fn lower_drains(&mut self) -> Result<(), CodeGenError> {
        let syms = self.syms;
        let mut drained: Vec<String> = Vec::new();
        for route in &syms.routes {
            if !route.dests.iter().any(|d| syms.is_output(d)) {
                continue;
            }
            if drained.contains(&route.frequency) {
                continue;
            }
            drained.push(route.frequency.clone());

            let layout = syms.frequency(&route.frequency).unwrap().clone();
            let label = drain_label(&route.frequency);
            let epilogue = format!(".L{}_return", label);
            self.begin_frame("", "", None, epilogue);

            self.emit(&format!("lea rax, [rip + {}]", MSG_OUTPUT_PREFIX))?;
            self.emit("push rax")?;
            self.emit_call("builtin_print", 1, false)?;

            let string_fields: Vec<_> = layout
                .fields
                .iter()
                .filter(|f| f.ty == TypeRef::Prim(Prim::Str))
                .cloned()
                .collect();
            let printed: Vec<_> = if string_fields.is_empty() {
                layout.fields.clone()
            } else {
                string_fields
            };
            let as_strings = !printed.is_empty() && printed[0].ty == TypeRef::Prim(Prim::Str);

            for (i, field) in printed.iter().enumerate() {
                if i > 0 {
                    self.emit(&format!("lea rax, [rip + {}]", MSG_SPACE))?;
                    self.emit("push rax")?;
                    self.emit_call("builtin_print", 1, false)?;
                }
                self.emit_load_field("r13", field.offset, &field.ty)?;
                self.emit("push rax")?;
                if as_strings {
                    self.emit_call("builtin_print", 1, false)?;
                } else {
                    self.emit_call("builtin_print_i64", 1, false)?;
                }
            }

            self.emit(&format!("lea rax, [rip + {}]", MSG_NEWLINE))?;
            self.emit("push rax")?;
            self.emit_call("builtin_print", 1, false)?;

            self.finish_frame(&label, &["mov r13, rdi"], Sink::Drains)?;
        }
        Ok(())
    }

    /// Generate `_start`: REST, SENSE, then the ACT loop.
    pub(super) fn lower_scheduler(&mut self) -> Result<(), CodeGenError> {
        let net = self.net;
        let syms = self.syms;
        self.begin_frame("", "", None, ".Lnever".to_string());

        // --- argv: [rbp] = argc, [rbp + 8 + 8*i] = argv[i] ---
        let args_done = self.fresh_label("args_done");
        self.emit("mov rax, qword ptr [rbp]")?;
        self.emit("cmp rax, 2")?;
        self.emit(&format!("jl {}", args_done))?;
        self.emit("mov rcx, qword ptr [rbp + 16]")?;
        self.emit("mov qword ptr [rip + cli_source], rcx")?;
        self.emit("cmp rax, 3")?;
        self.emit(&format!("jl {}", args_done))?;
        self.emit("mov rcx, qword ptr [rbp + 24]")?;
        self.emit("mov qword ptr [rip + cli_output], rcx")?;
        self.emit_label(&args_done)?;

        // --- REST step 1: bump heap cells ---
        self.emit("lea rax, [rip + heap_arena]")?;
        self.emit("mov qword ptr [rip + heap_ptr], rax")?;
        self.emit(&format!("add rax, {}", syms.arena_size))?;
        self.emit("mov qword ptr [rip + heap_end], rax")?;

        // --- REST steps 2-3: container pre-init, defaults, rest handlers ---
        for agent in &syms.agents {
            let hyphal = net.find_hyphal(&agent.hyphal).unwrap();
            self.current_agent = agent.id.clone();
            self.current_hyphal = agent.hyphal.clone();
            self.emit(&format!(
                "lea r12, {}",
                state_addr(agent.state_offset)
            ))?;

            for field in &agent.state_fields {
                match &field.ty {
                    TypeRef::Vec(_) | TypeRef::Queue(_) => {
                        self.emit_call("builtin_vec_new", 0, false)?;
                        self.emit_store_field("r12", field.offset, &field.ty)?;
                    }
                    TypeRef::Map(_, _) => {
                        self.emit_call("builtin_map_new", 0, false)?;
                        self.emit_store_field("r12", field.offset, &field.ty)?;
                    }
                    _ => {}
                }
            }
            for field_def in &hyphal.state {
                if let Some(default) = &field_def.default {
                    let slot = agent.state_field(&field_def.name).unwrap().clone();
                    self.lower_expr(default)?;
                    self.emit_store_field("r12", slot.offset, &slot.ty)?;
                }
            }
        }
        for agent in &syms.agents {
            let hyphal = net.find_hyphal(&agent.hyphal).unwrap();
            if hyphal.rest_handler().is_some() {
                self.emit(&format!("lea rax, {}", state_addr(agent.state_offset)))?;
                self.emit("push rax")?;
                self.emit_call(&SymbolTable::rest_label(&agent.id), 1, false)?;
            }
        }

        // --- SENSE: one payload per input-fruiting-body route. The
        // `startup` frequency is built in its staging buffer and filled
        // from the CLI slots; other frequencies get a zeroed heap payload.
        for route in &syms.routes {
            if !syms.is_input(&route.source) {
                continue;
            }
            let layout = syms.frequency(&route.frequency).unwrap().clone();
            if route.frequency == "startup" {
                self.emit("lea r15, [rip + stage_startup]")?;
                for (field, slot_name) in
                    [("source_file", "cli_source"), ("output_file", "cli_output")]
                {
                    if let Some(slot) = layout.field(field) {
                        self.emit(&format!("mov rcx, qword ptr [rip + {}]", slot_name))?;
                        if slot.offset == 0 {
                            self.emit("mov qword ptr [r15], rcx")?;
                        } else {
                            self.emit(&format!(
                                "mov qword ptr [r15 + {}], rcx",
                                slot.offset
                            ))?;
                        }
                    }
                }
            } else {
                self.emit(&format!("mov rax, {}", layout.size.max(8)))?;
                self.emit("push rax")?;
                self.emit_call("builtin_heap_alloc", 1, false)?;
                self.emit("mov r15, rax")?;
            }
            self.emit_enqueue(route.queue_index, "r15")?;
        }

        // --- ACT: the tidal loop ---
        let cycle_top = self.fresh_label("cycle_top");
        let max_hit = self.fresh_label("max_cycles_hit");
        let shutdown = self.fresh_label("shutdown");

        self.emit("xor r12, r12")?;
        self.emit_label(&cycle_top)?;
        self.emit("inc r12")?;
        self.emit(&format!("cmp r12, {}", syms.max_cycles))?;
        self.emit(&format!("jg {}", max_hit))?;

        // Cycle handlers fire at the top of their matching cycle
        for agent in &syms.agents {
            let hyphal = net.find_hyphal(&agent.hyphal).unwrap();
            for handler in &hyphal.handlers {
                if let crate::ast::Handler::Cycle { number, .. } = handler {
                    let skip = self.fresh_label("cycle_skip");
                    self.emit(&format!("cmp r12, {}", number))?;
                    self.emit(&format!("jne {}", skip))?;
                    self.emit(&format!(
                        "lea rax, {}",
                        state_addr(agent.state_offset)
                    ))?;
                    self.emit("push rax")?;
                    self.emit_call(&SymbolTable::cycle_label(&agent.id, *number), 1, false)?;
                    self.emit_label(&skip)?;
                }
            }
        }

        self.emit("xor r13, r13")?;
        for route in &syms.routes {
            let queue = SymbolTable::queue_label(route.queue_index);
            let loop_top = self.fresh_label("queue_loop");
            let nowrap = self.fresh_label("queue_nowrap");
            let done = self.fresh_label("queue_done");

            self.emit(&format!("lea rax, [rip + {}]", queue))?;
            self.emit("mov r14, qword ptr [rax + 8]")?;
            self.emit_label(&loop_top)?;
            self.emit(&format!("lea rax, [rip + {}]", queue))?;
            self.emit("mov rcx, qword ptr [rax]")?;
            self.emit("cmp rcx, r14")?;
            self.emit(&format!("je {}", done))?;
            self.emit("mov r15, qword ptr [rax + 16 + rcx*8]")?;
            self.emit("inc rcx")?;
            self.emit(&format!("cmp rcx, {}", syms.queue_capacity))?;
            self.emit(&format!("jne {}", nowrap))?;
            self.emit("xor ecx, ecx")?;
            self.emit_label(&nowrap)?;
            self.emit("mov qword ptr [rax], rcx")?;

            for dest in &route.dests {
                if syms.is_output(dest) {
                    self.emit("push r15")?;
                    self.emit_call(&drain_label(&route.frequency), 1, false)?;
                } else if let Some(dest_agent) = syms.agent(dest) {
                    let has_handler = net
                        .find_hyphal(&dest_agent.hyphal)
                        .is_some_and(|h| h.signal_handler(&route.frequency).is_some());
                    if has_handler {
                        self.emit(&format!(
                            "lea rax, {}",
                            state_addr(dest_agent.state_offset)
                        ))?;
                        self.emit("push rax")?;
                        self.emit("push r15")?;
                        self.emit_call(
                            &SymbolTable::handler_label(&dest_agent.id, &route.frequency),
                            2,
                            false,
                        )?;
                    }
                }
            }
            self.emit("inc r13")?;
            self.emit(&format!("jmp {}", loop_top))?;
            self.emit_label(&done)?;
        }

        // Quiescence: a full pass with zero dispatches ends the run
        self.emit("test r13, r13")?;
        self.emit(&format!("jne {}", cycle_top))?;
        self.emit(&format!("jmp {}", shutdown))?;

        self.emit_label(&max_hit)?;
        self.emit(&format!("lea rax, [rip + {}]", MSG_MAX_CYCLES))?;
        self.emit("push rax")?;
        self.emit_call("builtin_print", 1, false)?;

        self.emit_label(&shutdown)?;
        self.emit("mov rax, 60")?;
        self.emit("xor edi, edi")?;
        self.emit("syscall")?;

        self.emit_queue_overflow_stub()?;

        // Compose _start by hand: it never returns, so there is no
        // epilogue, and argv addressing needs rbp = entry rsp.
        let mut text = String::new();
        use std::fmt::Write as _;
        writeln!(text, "_start:")?;
        writeln!(text, "    mov rbp, rsp")?;
        let reserve = self.frame_reserve().max(64);
        writeln!(text, "    sub rsp, {}", reserve)?;
        text.push_str(&self.body);
        writeln!(text)?;
        self.sched.push_str(&text);
        Ok(())
    }
}
