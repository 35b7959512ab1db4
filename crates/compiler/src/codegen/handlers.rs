//! Handler and rule framing
//!
//! Every generated procedure shares one frame shape: `push rbp; mov rbp,
//! rsp`, four callee-saved pushes (`r12 r13 r14 r15` at `rbp-8..rbp-32`),
//! argument register moves, then the frame reservation. Signal handlers
//! load state from A0 and the payload from A1; rest and cycle handlers
//! load only state; rules load neither - their caller's `r12`/`r13` stay
//! live because rules run in the same activation.
//!
//! Handlers and rules are generated once per agent *instance*, so emit
//! statements inside them resolve to that instance's queues at compile
//! time.

use super::{ARG_REGS, CodeGen, CodeGenError};
use crate::ast::{Expr, Handler, RuleDef, Stmt, TypeRef};
use crate::layout::SymbolTable;
use std::fmt::Write as _;

/// Which section buffer a composed function lands in.
pub(super) enum Sink {
    Handlers,
    Rules,
    Drains,
}

impl CodeGen<'_> {
    /// Lower all handler and rule bodies for every spawned agent.
    pub(super) fn lower_functions(&mut self) -> Result<(), CodeGenError> {
        let net = self.net;
        let syms = self.syms;
        for agent in &syms.agents {
            let hyphal = net
                .find_hyphal(&agent.hyphal)
                .ok_or_else(|| format!("unknown hyphal type '{}'", agent.hyphal))?;

            for handler in &hyphal.handlers {
                match handler {
                    Handler::Rest { body } => {
                        let label = SymbolTable::rest_label(&agent.id);
                        self.lower_handler_frame(
                            &label, &agent.id, &agent.hyphal, None, None, body,
                            &["mov r12, rdi"],
                        )?;
                    }
                    Handler::Signal {
                        frequency,
                        binding,
                        guard,
                        body,
                    } => {
                        let label = SymbolTable::handler_label(&agent.id, frequency);
                        self.lower_handler_frame(
                            &label,
                            &agent.id,
                            &agent.hyphal,
                            Some((binding.clone(), frequency.clone())),
                            guard.as_ref(),
                            body,
                            &["mov r12, rdi", "mov r13, rsi"],
                        )?;
                    }
                    Handler::Cycle { number, body } => {
                        let label = SymbolTable::cycle_label(&agent.id, *number);
                        self.lower_handler_frame(
                            &label, &agent.id, &agent.hyphal, None, None, body,
                            &["mov r12, rdi"],
                        )?;
                    }
                }
            }

            for rule in &hyphal.rules {
                self.lower_rule_frame(agent.id.clone(), agent.hyphal.clone(), rule)?;
            }
        }
        Ok(())
    }

    fn lower_handler_frame(
        &mut self,
        label: &str,
        agent: &str,
        hyphal: &str,
        param: Option<(String, String)>,
        guard: Option<&Expr>,
        body: &[Stmt],
        arg_moves: &[&str],
    ) -> Result<(), CodeGenError> {
        let epilogue = format!(".L{}_return", label);
        self.begin_frame(agent, hyphal, param, epilogue.clone());
        if let Some(guard) = guard {
            self.lower_expr(guard)?;
            self.emit("test rax, rax")?;
            self.emit(&format!("je {}", epilogue))?;
        }
        self.lower_stmts(body)?;
        self.finish_frame(label, arg_moves, Sink::Handlers)
    }

    fn lower_rule_frame(
        &mut self,
        agent: String,
        hyphal: String,
        rule: &RuleDef,
    ) -> Result<(), CodeGenError> {
        let label = SymbolTable::rule_label(&agent, &rule.name);
        let epilogue = format!(".L{}_return", label);
        self.begin_frame(&agent, &hyphal, None, epilogue);

        // Spill parameters into local slots so the body can address them
        // uniformly; the seventh parameter onward comes from the caller's
        // stack above the return address.
        let params: Vec<(String, TypeRef)> = rule.params.clone();
        for (i, (name, ty)) in params.iter().enumerate() {
            let offset = self.alloc_local(name, Some(ty.clone()));
            if i < 6 {
                self.emit(&format!(
                    "mov {}, {}",
                    Self::slot_addr(offset),
                    ARG_REGS[i]
                ))?;
            } else {
                self.emit(&format!("mov rax, [rbp + {}]", 16 + 8 * (i - 6)))?;
                self.emit(&format!("mov {}, rax", Self::slot_addr(offset)))?;
            }
        }
        self.lower_stmts(&rule.body)?;
        self.finish_frame(&label, &[], Sink::Rules)
    }

    /// Compose the finished function from the body buffer: prologue with
    /// the now-known frame reservation, body, epilogue. The epilogue
    /// restores `rsp` from the frame pointer, so any push depth the body
    /// left behind (an early return out of a loop) is discarded.
    pub(super) fn finish_frame(
        &mut self,
        label: &str,
        arg_moves: &[&str],
        sink: Sink,
    ) -> Result<(), CodeGenError> {
        let mut text = String::new();
        writeln!(text, "{}:", label)?;
        for line in [
            "push rbp",
            "mov rbp, rsp",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
        ] {
            writeln!(text, "    {}", line)?;
        }
        for line in arg_moves {
            writeln!(text, "    {}", line)?;
        }
        let reserve = self.frame_reserve();
        if reserve > 0 {
            writeln!(text, "    sub rsp, {}", reserve)?;
        }
        text.push_str(&self.body);
        writeln!(text, "{}:", self.epilogue_label)?;
        for line in [
            "lea rsp, [rbp - 32]",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop rbp",
            "ret",
        ] {
            writeln!(text, "    {}", line)?;
        }
        writeln!(text)?;

        match sink {
            Sink::Handlers => self.handlers.push_str(&text),
            Sink::Rules => self.rules.push_str(&text),
            Sink::Drains => self.drains.push_str(&text),
        }
        Ok(())
    }
}
