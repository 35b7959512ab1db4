//! Final emission
//!
//! Orders the four sections exactly: code (scheduler, drains, handlers,
//! rules), read-only data (interned literals and fixed messages),
//! initialized data (CLI slots, default paths, ring queues, state base,
//! heap cells), uninitialized data (heap arena, temporary signal buffer,
//! per-frequency staging buffers).

use super::{CodeGen, CodeGenError, RUNTIME_SYMBOLS};
use crate::ast::Network;
use crate::layout::SymbolTable;
use std::fmt::Write as _;

/// Generate the complete assembly artifact for a laid-out network.
pub fn generate(net: &Network, syms: &SymbolTable) -> Result<String, CodeGenError> {
    let mut cg = CodeGen::new(net, syms);
    cg.lower_functions()?;
    cg.lower_drains()?;
    cg.lower_scheduler()?;
    cg.emit_fixed_messages(syms.max_cycles)?;
    cg.assemble()
}

impl CodeGen<'_> {
    fn assemble(&mut self) -> Result<String, CodeGenError> {
        let syms = self.syms;
        let mut out = String::new();

        writeln!(out, "# Generated by mycelc for network '{}'", syms.network_name)?;
        writeln!(out, ".intel_syntax noprefix")?;
        for symbol in RUNTIME_SYMBOLS {
            writeln!(out, ".extern {}", symbol)?;
        }
        writeln!(out)?;

        // --- code ---
        writeln!(out, ".text")?;
        writeln!(out, ".globl _start")?;
        out.push_str(&self.sched);
        out.push_str(&self.drains);
        out.push_str(&self.handlers);
        out.push_str(&self.rules);

        // --- read-only data ---
        writeln!(out, ".section .rodata")?;
        out.push_str(&self.rodata);
        writeln!(out)?;

        // --- initialized data ---
        writeln!(out, ".section .data")?;
        writeln!(out, "cli_source: .quad default_source_path")?;
        writeln!(out, "cli_output: .quad default_output_path")?;
        writeln!(out, "default_source_path: .asciz \"test.mycelial\"")?;
        writeln!(out, "default_output_path: .asciz \"a.out\"")?;
        for route in &syms.routes {
            writeln!(
                out,
                "{}: .quad 0, 0  # ({}, {}) head, tail",
                SymbolTable::queue_label(route.queue_index),
                route.source,
                route.frequency
            )?;
            writeln!(out, "    .zero {}", 8 * syms.queue_capacity)?;
        }
        writeln!(out, "agent_state_base: .quad agent_state")?;
        writeln!(out, "heap_ptr: .quad 0")?;
        writeln!(out, "heap_end: .quad 0")?;
        writeln!(out)?;

        // --- uninitialized data ---
        let max_freq = syms
            .frequencies
            .iter()
            .map(|f| f.size)
            .max()
            .unwrap_or(8)
            .max(8);
        writeln!(out, ".section .bss")?;
        writeln!(out, "agent_state: .zero {}", syms.state_total.max(8))?;
        writeln!(out, "heap_arena: .zero {}", syms.arena_size)?;
        writeln!(out, "signal_tmp: .zero {}", max_freq)?;
        for freq in &syms.frequencies {
            writeln!(out, "stage_{}: .zero {}", freq.name, freq.size.max(8))?;
        }
        Ok(out)
    }
}
