//! Mycelial Compiler Library
//!
//! Compiles Mycelial network source to x86-64 assembly text, or executes
//! it directly under the tree-walking reference evaluator. The pipeline:
//!
//! ```text
//! source -> lexer -> parser -> layout -> codegen -> assembly text
//!                                  \-> evaluator (reference semantics)
//! ```
//!
//! The generated assembly links against the `mycelial-runtime` staticlib,
//! which provides the `builtin_*` symbol surface (heap, strings, vectors,
//! maps, I/O). Assembling and linking are external steps.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod eval;
pub mod layout;
pub mod lexer;
pub mod parser;

pub use ast::Network;
pub use codegen::CodeGenError;
pub use config::CompilerConfig;
pub use eval::{Evaluator, Value};
pub use layout::SymbolTable;
pub use parser::{Parser, parse_network};

use std::fs;
use std::path::Path;

/// Error from any stage of the compilation pipeline.
///
/// Lex, parse and layout errors carry their positioned message; code
/// generation keeps its own error type so `?` composes over both.
#[derive(Debug)]
pub enum CompileError {
    /// Lex, parse or layout failure
    Front(String),
    /// Code generation failure
    CodeGen(CodeGenError),
    /// Reading the source or writing the artifact failed
    Io(String),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Front(s) => write!(f, "{}", s),
            CompileError::CodeGen(e) => write!(f, "{}", e),
            CompileError::Io(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<String> for CompileError {
    fn from(s: String) -> Self {
        CompileError::Front(s)
    }
}

impl From<CodeGenError> for CompileError {
    fn from(e: CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

/// Compile source text to the assembly artifact.
pub fn compile_to_asm(source: &str, config: &CompilerConfig) -> Result<String, CompileError> {
    let net = parser::parse_network(source)?;
    tracing::debug!(network = %net.name, "parsed network");
    let syms = layout::build(&net, config)?;
    tracing::debug!(
        agents = syms.agents.len(),
        routes = syms.routes.len(),
        "layout complete"
    );
    let asm = codegen::generate(&net, &syms)?;
    tracing::debug!(bytes = asm.len(), "assembly generated");
    Ok(asm)
}

/// Compile a source file and write the assembly text to `output`. Nothing
/// is written unless the whole pipeline succeeds.
pub fn compile_file(
    input: &Path,
    output: &Path,
    config: &CompilerConfig,
) -> Result<(), CompileError> {
    let source = fs::read_to_string(input)
        .map_err(|e| CompileError::Io(format!("failed to read {}: {}", input.display(), e)))?;
    let asm = compile_to_asm(&source, config)?;
    fs::write(output, asm)
        .map_err(|e| CompileError::Io(format!("failed to write {}: {}", output.display(), e)))?;
    Ok(())
}

/// Build an evaluator for source text without running it, so callers can
/// inject signals first.
pub fn evaluate_network(source: &str, config: &CompilerConfig) -> Result<Evaluator, String> {
    let net = parser::parse_network(source)?;
    let syms = layout::build(&net, config)?;
    Ok(Evaluator::new(&net, &syms))
}

/// Run a source file under the reference evaluator and return everything
/// it wrote to the host output stream.
pub fn run_file(input: &Path, config: &CompilerConfig) -> Result<String, String> {
    let source = fs::read_to_string(input)
        .map_err(|e| format!("failed to read {}: {}", input.display(), e))?;
    let mut evaluator = evaluate_network(&source, config)?;
    evaluator.set_cli(&input.display().to_string(), "a.out");
    evaluator.run()?;
    Ok(evaluator.output().to_string())
}

/// Parse and lay out a source file without generating code.
pub fn check_file(input: &Path, config: &CompilerConfig) -> Result<(), CompileError> {
    let source = fs::read_to_string(input)
        .map_err(|e| CompileError::Io(format!("failed to read {}: {}", input.display(), e)))?;
    let net = parser::parse_network(&source)?;
    layout::build(&net, config)?;
    Ok(())
}
