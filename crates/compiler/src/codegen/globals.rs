//! String and float literal interning
//!
//! Literals are deduplicated into `.rodata` with generated labels and
//! loaded RIP-relative. The fixed scheduler messages (output prefix,
//! separators, the max-cycles warning) live here too so every consumer
//! shares one copy.

use super::{CodeGen, CodeGenError};
use std::fmt::Write as _;

/// Labels for the fixed messages the scheduler and drain code rely on.
pub(super) const MSG_OUTPUT_PREFIX: &str = "msg_output_prefix";
pub(super) const MSG_SPACE: &str = "msg_space";
pub(super) const MSG_NEWLINE: &str = "msg_newline";
pub(super) const MSG_MINUS: &str = "msg_minus";
pub(super) const MSG_MAX_CYCLES: &str = "msg_max_cycles";
pub(super) const MSG_QUEUE_OVERFLOW: &str = "msg_queue_overflow";

impl CodeGen<'_> {
    /// Escape a string for a gas `.asciz` directive.
    pub(super) fn escape_asm_string(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for ch in s.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                c if (' '..='~').contains(&c) => out.push(c),
                c => {
                    for byte in c.to_string().as_bytes() {
                        out.push_str(&format!("\\{:03o}", byte));
                    }
                }
            }
        }
        out
    }

    /// Intern a string literal, returning its `.rodata` label.
    pub(super) fn string_label(&mut self, s: &str) -> Result<String, CodeGenError> {
        if let Some(label) = self.string_constants.get(s) {
            return Ok(label.clone());
        }
        let label = format!(".Lstr_{}", self.string_counter);
        self.string_counter += 1;
        writeln!(
            self.rodata,
            "{}: .asciz \"{}\"",
            label,
            Self::escape_asm_string(s)
        )?;
        self.string_constants.insert(s.to_string(), label.clone());
        Ok(label)
    }

    /// Intern a 64-bit float constant by bit pattern.
    pub(super) fn float_label(&mut self, value: f64) -> Result<String, CodeGenError> {
        let bits = value.to_bits();
        if let Some(label) = self.float_constants.get(&bits) {
            return Ok(label.clone());
        }
        let label = format!(".Ldbl_{}", self.float_counter);
        self.float_counter += 1;
        writeln!(self.rodata, "{}: .quad 0x{:016x}  # {}", label, bits, value)?;
        self.float_constants.insert(bits, label.clone());
        Ok(label)
    }

    /// Emit the fixed message strings. Called once before section assembly.
    pub(super) fn emit_fixed_messages(&mut self, max_cycles: u64) -> Result<(), CodeGenError> {
        writeln!(self.rodata, "{}: .asciz \"OUTPUT: \"", MSG_OUTPUT_PREFIX)?;
        writeln!(self.rodata, "{}: .asciz \" \"", MSG_SPACE)?;
        writeln!(self.rodata, "{}: .asciz \"\\n\"", MSG_NEWLINE)?;
        writeln!(self.rodata, "{}: .asciz \"-\"", MSG_MINUS)?;
        writeln!(
            self.rodata,
            "{}: .asciz \"warning: tidal scheduler stopped after {} cycles\\n\"",
            MSG_MAX_CYCLES, max_cycles
        )?;
        writeln!(
            self.rodata,
            "{}: .asciz \"fatal: signal queue overflow\\n\"",
            MSG_QUEUE_OVERFLOW
        )?;
        Ok(())
    }
}
