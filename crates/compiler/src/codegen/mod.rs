//! x86-64 Assembly Code Generation
//!
//! Lowers a laid-out network to Intel-syntax x86-64 assembly text for the
//! System V AMD64 ABI. The generator is split into focused submodules:
//!
//! - `expr.rs`: expression lowering into the accumulator
//! - `statements.rs`: statements, locals, labels, control flow
//! - `handlers.rs`: handler/rule framing (prologue/epilogue)
//! - `scheduler.rs`: `_start`, initialization, the tidal loop, output drains
//! - `globals.rs`: string/float interning into `.rodata`
//! - `program.rs`: section ordering and final emission
//! - `error.rs`: error types
//!
//! # Register conventions
//!
//! | register | role |
//! |---|---|
//! | `rax` | accumulator; every expression leaves its value here |
//! | `xmm0` | float staging; bits move to `rax` at the boundary |
//! | `rcx` | right operand of binary operations, shift count |
//! | `rdx` | clobbered by division; remainder source for `%` |
//! | `r12` | callee-saved pointer to the active agent's state region |
//! | `r13` | callee-saved pointer to the active signal payload |
//! | `r14`, `r15` | callee-saved scratch: loop index/limit, aggregate build |
//! | `rbx` | saved stack pointer inside the call alignment dance |
//!
//! # Call sites
//!
//! Every call follows the same shape: evaluate arguments left to right,
//! pushing each; then `push rbx; mov rbx, rsp; and rsp, -16`, re-push any
//! stack arguments in reverse (one 8-byte pad if their count is odd), load
//! the first six into `rdi rsi rdx rcx r8 r9`, zero `al` for
//! variadic-profile targets, `call`, then restore through `rbx` and drop
//! the argument temporaries. Saving the old `rbx` on the stack is what
//! makes nested calls compose.
//!
//! # Frames
//!
//! `push rbp; mov rbp, rsp` then four callee-saved pushes put `r12 r13 r14
//! r15` at `rbp-8..rbp-32`; local slots start at `rbp-40` and grow
//! monotonically. The epilogue restores with `lea rsp, [rbp - 32]` so an
//! early `return` from inside a loop cannot unbalance the stack.

mod error;
mod expr;
mod globals;
mod handlers;
mod program;
mod scheduler;
mod statements;
mod types;

pub use error::CodeGenError;
pub use program::generate;

use crate::ast::{Network, TypeRef};
use crate::layout::SymbolTable;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Argument registers in System V AMD64 order (conceptual A0..A5).
pub(super) const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// Runtime symbols the generated artifact links against, in the order they
/// are declared in the emission preamble.
pub const RUNTIME_SYMBOLS: &[&str] = &[
    "builtin_heap_alloc",
    "builtin_string_len",
    "builtin_string_eq",
    "builtin_string_cmp",
    "builtin_string_concat",
    "builtin_print",
    "builtin_println",
    "builtin_print_i64",
    "builtin_int_to_string",
    "builtin_vec_new",
    "builtin_vec_push",
    "builtin_vec_pop",
    "builtin_vec_len",
    "builtin_vec_get",
    "builtin_vec_set",
    "builtin_vec_slice",
    "builtin_vec_sum",
    "builtin_map_new",
    "builtin_map_set",
    "builtin_map_get",
    "builtin_map_has",
    "builtin_map_delete",
    "builtin_map_len",
    "builtin_map_key_at",
    "builtin_map_val_at",
    "builtin_format",
    "builtin_read_file",
    "builtin_report_i64",
    "builtin_report_str",
    "builtin_exit",
];

/// A stack slot for a local: byte offset below the saved registers plus the
/// recorded type, when one is known. The type feeds the static classifier.
#[derive(Debug, Clone)]
pub(super) struct LocalSlot {
    pub offset: u64,
    pub ty: Option<TypeRef>,
}

pub(super) struct LoopFrame {
    pub continue_label: String,
    pub break_label: String,
}

pub struct CodeGen<'a> {
    pub(super) net: &'a Network,
    pub(super) syms: &'a SymbolTable,

    // Section buffers, concatenated by program.rs in the documented order
    pub(super) sched: String,
    pub(super) drains: String,
    pub(super) handlers: String,
    pub(super) rules: String,
    pub(super) rodata: String,

    // Interning
    pub(super) string_constants: HashMap<String, String>,
    pub(super) string_counter: usize,
    pub(super) float_constants: HashMap<u64, String>,
    pub(super) float_counter: usize,
    pub(super) label_counter: usize,

    // Active frame
    pub(super) body: String,
    pub(super) locals: HashMap<String, LocalSlot>,
    pub(super) current_slot: u64,
    pub(super) max_slot: u64,
    pub(super) loop_stack: Vec<LoopFrame>,
    pub(super) current_agent: String,
    pub(super) current_hyphal: String,
    /// (binding name, frequency name) while lowering a signal handler
    pub(super) current_param: Option<(String, String)>,
    pub(super) epilogue_label: String,
}

impl<'a> CodeGen<'a> {
    pub fn new(net: &'a Network, syms: &'a SymbolTable) -> Self {
        CodeGen {
            net,
            syms,
            sched: String::new(),
            drains: String::new(),
            handlers: String::new(),
            rules: String::new(),
            rodata: String::new(),
            string_constants: HashMap::new(),
            string_counter: 0,
            float_constants: HashMap::new(),
            float_counter: 0,
            label_counter: 0,
            body: String::new(),
            locals: HashMap::new(),
            current_slot: 0,
            max_slot: 0,
            loop_stack: Vec::new(),
            current_agent: String::new(),
            current_hyphal: String::new(),
            current_param: None,
            epilogue_label: String::new(),
        }
    }

    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    pub(super) fn emit(&mut self, line: &str) -> Result<(), CodeGenError> {
        writeln!(self.body, "    {}", line)?;
        Ok(())
    }

    pub(super) fn emit_label(&mut self, label: &str) -> Result<(), CodeGenError> {
        writeln!(self.body, "{}:", label)?;
        Ok(())
    }

    pub(super) fn fresh_label(&mut self, stem: &str) -> String {
        let label = format!(".L{}_{}", stem, self.label_counter);
        self.label_counter += 1;
        label
    }

    // ------------------------------------------------------------------
    // Frame bookkeeping
    // ------------------------------------------------------------------

    pub(super) fn begin_frame(
        &mut self,
        agent: &str,
        hyphal: &str,
        param: Option<(String, String)>,
        epilogue_label: String,
    ) {
        self.body.clear();
        self.locals.clear();
        self.current_slot = 0;
        self.max_slot = 0;
        self.loop_stack.clear();
        self.current_agent = agent.to_string();
        self.current_hyphal = hyphal.to_string();
        self.current_param = param;
        self.epilogue_label = epilogue_label;
    }

    /// Allocate a new local slot. Slots grow monotonically; nested blocks
    /// do not reuse offsets.
    pub(super) fn alloc_local(&mut self, name: &str, ty: Option<TypeRef>) -> u64 {
        self.current_slot += 8;
        let offset = self.current_slot;
        if offset > self.max_slot {
            self.max_slot = offset;
        }
        self.locals
            .insert(name.to_string(), LocalSlot { offset, ty });
        offset
    }

    /// Allocate an anonymous slot for generated temporaries (match
    /// scrutinees, loop collections).
    pub(super) fn alloc_temp(&mut self, stem: &str) -> u64 {
        let name = format!("${}_{}", stem, self.label_counter);
        self.label_counter += 1;
        self.alloc_local(&name, None)
    }

    /// Address of a local slot. The four saved registers sit between the
    /// frame pointer and the slot area.
    pub(super) fn slot_addr(offset: u64) -> String {
        format!("[rbp - {}]", 32 + offset)
    }

    /// Frame bytes to reserve in the prologue, 16-byte rounded.
    pub(super) fn frame_reserve(&self) -> u64 {
        self.max_slot.div_ceil(16) * 16
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Emit the aligned call sequence. The `nargs` argument values must
    /// already be on the stack, pushed left to right.
    pub(super) fn emit_call(
        &mut self,
        target: &str,
        nargs: usize,
        variadic: bool,
    ) -> Result<(), CodeGenError> {
        self.emit("push rbx")?;
        self.emit("mov rbx, rsp")?;
        self.emit("and rsp, -16")?;
        if nargs > 6 {
            let stack_args = nargs - 6;
            if stack_args % 2 == 1 {
                self.emit("sub rsp, 8")?;
            }
            for i in (6..nargs).rev() {
                self.emit(&format!("mov rax, [rbx + {}]", 8 * (nargs - i)))?;
                self.emit("push rax")?;
            }
        }
        for (i, reg) in ARG_REGS.iter().enumerate().take(nargs.min(6)) {
            self.emit(&format!("mov {}, [rbx + {}]", reg, 8 * (nargs - i)))?;
        }
        if variadic {
            self.emit("xor eax, eax")?;
        }
        self.emit(&format!("call {}", target))?;
        self.emit("mov rsp, rbx")?;
        self.emit("pop rbx")?;
        if nargs > 0 {
            self.emit(&format!("add rsp, {}", 8 * nargs))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Width-aware loads and stores
    // ------------------------------------------------------------------

    /// Load a field of declared type `ty` from `[base + offset]` into the
    /// accumulator, extending to 64 bits by signedness.
    pub(super) fn emit_load_field(
        &mut self,
        base: &str,
        offset: u64,
        ty: &TypeRef,
    ) -> Result<(), CodeGenError> {
        use crate::ast::Prim;
        let addr = if offset == 0 {
            format!("[{}]", base)
        } else {
            format!("[{} + {}]", base, offset)
        };
        let line = match ty {
            TypeRef::Prim(Prim::U8) | TypeRef::Prim(Prim::Bool) => {
                format!("movzx eax, byte ptr {}", addr)
            }
            TypeRef::Prim(Prim::I8) => format!("movsx rax, byte ptr {}", addr),
            TypeRef::Prim(Prim::U16) => format!("movzx eax, word ptr {}", addr),
            TypeRef::Prim(Prim::I16) => format!("movsx rax, word ptr {}", addr),
            TypeRef::Prim(Prim::U32) | TypeRef::Prim(Prim::F32) => {
                format!("mov eax, dword ptr {}", addr)
            }
            TypeRef::Prim(Prim::I32) => format!("movsxd rax, dword ptr {}", addr),
            _ => format!("mov rax, qword ptr {}", addr),
        };
        self.emit(&line)
    }

    /// Store the accumulator into `[base + offset]` with the width of `ty`.
    pub(super) fn emit_store_field(
        &mut self,
        base: &str,
        offset: u64,
        ty: &TypeRef,
    ) -> Result<(), CodeGenError> {
        use crate::ast::Prim;
        let addr = if offset == 0 {
            format!("[{}]", base)
        } else {
            format!("[{} + {}]", base, offset)
        };
        let line = match ty {
            TypeRef::Prim(Prim::U8) | TypeRef::Prim(Prim::I8) | TypeRef::Prim(Prim::Bool) => {
                format!("mov byte ptr {}, al", addr)
            }
            TypeRef::Prim(Prim::U16) | TypeRef::Prim(Prim::I16) => {
                format!("mov word ptr {}, ax", addr)
            }
            TypeRef::Prim(Prim::U32) | TypeRef::Prim(Prim::I32) | TypeRef::Prim(Prim::F32) => {
                format!("mov dword ptr {}, eax", addr)
            }
            _ => format!("mov qword ptr {}, rax", addr),
        };
        self.emit(&line)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CompilerConfig;
    use crate::layout;
    use crate::parser::parse_network;

    pub(super) fn generate_asm(source: &str) -> String {
        let net = parse_network(source).expect("parse failed");
        let syms = layout::build(&net, &CompilerConfig::default()).expect("layout failed");
        super::generate(&net, &syms).expect("codegen failed")
    }

    const COUNTER: &str = "network C {\n  frequencies { frequency tick { v: u32 } }\n  hyphae {\n    hyphal Counter {\n      state { count: u32 = 0 }\n      on signal(tick, t) { state.count = state.count + t.v }\n    }\n  }\n  topology {\n    fruiting_body src\n    spawn Counter c1\n    socket src -[tick]-> c1\n  }\n}";

    #[test]
    fn test_sections_in_order() {
        let asm = generate_asm(COUNTER);
        let text = asm.find(".text").unwrap();
        let rodata = asm.find(".section .rodata").unwrap();
        let data = asm.find(".section .data").unwrap();
        let bss = asm.find(".section .bss").unwrap();
        assert!(text < rodata && rodata < data && data < bss);
        assert!(asm.contains(".globl _start"));
        assert!(asm.contains(".intel_syntax noprefix"));
    }

    #[test]
    fn test_handler_frame_shape() {
        let asm = generate_asm(COUNTER);
        assert!(asm.contains("handler_c1_tick:"));
        // Prologue saves frame pointer and the four callee-saved registers,
        // then loads state and payload from the first two arguments
        assert!(asm.contains("mov r12, rdi"));
        assert!(asm.contains("mov r13, rsi"));
        // Epilogue restores through the frame pointer
        assert!(asm.contains("lea rsp, [rbp - 32]"));
        assert!(asm.contains(".Lhandler_c1_tick_return:"));
    }

    #[test]
    fn test_state_field_width() {
        let asm = generate_asm(COUNTER);
        // count: u32 at offset 0 of the state region
        assert!(asm.contains("mov eax, dword ptr [r12]"));
        assert!(asm.contains("mov dword ptr [r12], eax"));
    }

    #[test]
    fn test_call_alignment_dance() {
        let asm = generate_asm(
            "network F {\n  frequencies { frequency go { s: string } }\n  hyphae { hyphal P { on signal(go, g) { println(g.s) } } }\n  topology { fruiting_body src spawn P p1 socket src -[go]-> p1 }\n}",
        );
        assert!(asm.contains("mov rbx, rsp"));
        assert!(asm.contains("and rsp, -16"));
        assert!(asm.contains("call builtin_println"));
        assert!(asm.contains("mov rsp, rbx"));
    }

    #[test]
    fn test_queues_and_arena_emitted() {
        let asm = generate_asm(COUNTER);
        assert!(asm.contains("queue_0:"));
        assert!(asm.contains("heap_arena:"));
        assert!(asm.contains("heap_ptr:"));
        assert!(asm.contains("agent_state:"));
    }

    #[test]
    fn test_fixed_messages_interned() {
        let asm = generate_asm(COUNTER);
        assert!(asm.contains("OUTPUT: "));
        assert!(asm.contains("msg_newline:"));
        assert!(asm.contains("msg_minus:"));
        assert!(asm.contains("msg_max_cycles:"));
    }

    #[test]
    fn test_enum_is_tagged_union() {
        let asm = generate_asm(
            "network E {\n  frequencies { frequency go { n: i64 } }\n  types { enum Shape { Circle(u32), Square(u32) } }\n  hyphae {\n    hyphal W {\n      on signal(go, g) {\n        let s = Shape::Square(5)\n        match s {\n          Shape::Circle(r) -> { }\n          Shape::Square(w) -> { }\n        }\n      }\n    }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        );
        // 16-byte cell, ordinal tag at offset 0, payload at offset 8
        assert!(asm.contains("mov rax, 16"));
        assert!(asm.contains("mov qword ptr [r15], 1"));
        assert!(asm.contains("mov qword ptr [r15 + 8], rcx"));
        // Matching dereferences the tag word
        assert!(asm.contains("mov rax, qword ptr [rax]"));
        assert!(asm.contains("cmp rax, 0"));
    }

    #[test]
    fn test_emit_enqueues_into_ring() {
        let asm = generate_asm(
            "network Q {\n  frequencies { frequency a { n: i64 } frequency b { n: i64 } }\n  hyphae {\n    hyphal P { on signal(a, x) { emit b { n: x.n } } }\n    hyphal C { on signal(b, y) { } }\n  }\n  topology {\n    fruiting_body src\n    spawn P p1\n    spawn C c1\n    socket src -[a]-> p1\n    socket p1 -[b]-> c1\n  }\n}",
        );
        // The handler enqueues into the (p1, b) ring and checks for overflow
        assert!(asm.contains("lea rcx, [rip + queue_1]"));
        assert!(asm.contains("je queue_overflow"));
        assert!(asm.contains("queue_overflow:"));
        // The scheduler dispatches the second queue to c1's handler
        assert!(asm.contains("call handler_c1_b"));
    }

    #[test]
    fn test_string_literals_deduplicated() {
        let asm = generate_asm(
            "network S {\n  frequencies { frequency go { s: string } }\n  hyphae {\n    hyphal W {\n      on signal(go, g) {\n        println(\"twice\")\n        println(\"twice\")\n      }\n    }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        );
        let occurrences = asm.matches(".asciz \"twice\"").count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn test_rule_framing_and_return() {
        let asm = generate_asm(
            "network R {\n  frequencies { frequency go { n: i64 } }\n  hyphae {\n    hyphal W {\n      on signal(go, g) { let d = double(g.n) }\n      rule double(x: i64) -> i64 { return x * 2 }\n    }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        );
        assert!(asm.contains("rule_w1_double:"));
        // First parameter spilled from A0 into its slot
        assert!(asm.contains("mov [rbp - 40], rdi"));
        // Return jumps to the epilogue label
        assert!(asm.contains("jmp .Lrule_w1_double_return"));
        assert!(asm.contains("call rule_w1_double"));
    }

    #[test]
    fn test_broadcast_dispatch_per_spawn() {
        let asm = generate_asm(
            "network B {\n  frequencies { frequency ping { n: i64 } }\n  hyphae { hyphal W { on signal(ping, p) { } } }\n  topology {\n    fruiting_body src\n    spawn W w1\n    spawn W w2\n    socket src -[ping]-> *\n  }\n}",
        );
        // One generated handler per instance, both dispatched from the queue
        assert!(asm.contains("handler_w1_ping:"));
        assert!(asm.contains("handler_w2_ping:"));
        assert!(asm.contains("call handler_w1_ping"));
        assert!(asm.contains("call handler_w2_ping"));
    }

    #[test]
    fn test_string_comparison_dispatch() {
        let asm = generate_asm(
            "network C {\n  frequencies { frequency go { tag: string } }\n  hyphae {\n    hyphal W {\n      state { hits: i64 = 0 }\n      on signal(go, g) {\n        if g.tag == \"yes\" { state.hits = state.hits + 1 }\n      }\n    }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        );
        assert!(asm.contains("call builtin_string_eq"));
    }

    #[test]
    fn test_guard_jumps_to_epilogue() {
        let asm = generate_asm(
            "network G {\n  frequencies { frequency go { n: i64 } }\n  hyphae {\n    hyphal W {\n      state { hits: i64 = 0 }\n      on signal(go, g) when g.n > 0 { state.hits = state.hits + 1 }\n    }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        );
        assert!(asm.contains("je .Lhandler_w1_go_return"));
    }

    #[test]
    fn test_float_arithmetic_rejected() {
        let net = parse_network(
            "network F {\n  frequencies { frequency go { x: f64 } }\n  hyphae {\n    hyphal W { on signal(go, g) { let y = g.x + 1.5 } }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        )
        .unwrap();
        let syms = layout::build(&net, &CompilerConfig::default()).unwrap();
        let err = super::generate(&net, &syms).unwrap_err();
        assert!(err.to_string().contains("float arithmetic"));
    }

    #[test]
    fn test_unknown_payload_field_rejected() {
        let net = parse_network(
            "network U {\n  frequencies { frequency go { n: i64 } }\n  hyphae {\n    hyphal W { on signal(go, g) { let x = g.bogus } }\n  }\n  topology { fruiting_body src spawn W w1 socket src -[go]-> w1 }\n}",
        )
        .unwrap();
        let syms = layout::build(&net, &CompilerConfig::default()).unwrap();
        let err = super::generate(&net, &syms).unwrap_err();
        assert!(err.to_string().contains("unknown payload field 'bogus'"));
    }
}
