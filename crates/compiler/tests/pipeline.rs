//! File-level pipeline tests: compile to an assembly artifact on disk,
//! fail fast without partial output, drive the evaluator through the same
//! entry points the CLI uses.

use mycelc::CompilerConfig;
use std::fs;

const GREETER: &str = "network Greeter {\n  frequencies {\n    frequency startup { source_file: string, output_file: string }\n    frequency hello { msg: string }\n  }\n  hyphae {\n    hyphal G {\n      on signal(startup, s) {\n        emit hello { msg: format(\"building {}\", s.source_file) }\n      }\n    }\n  }\n  topology {\n    fruiting_body boot\n    fruiting_body out\n    spawn G g1\n    socket boot -[startup]-> g1\n    socket g1 -[hello]-> out\n  }\n}";

#[test]
fn test_compile_file_writes_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("greeter.mycelial");
    let output = dir.path().join("greeter.s");
    fs::write(&input, GREETER).unwrap();

    mycelc::compile_file(&input, &output, &CompilerConfig::default()).unwrap();

    let asm = fs::read_to_string(&output).unwrap();
    assert!(asm.contains(".globl _start"));
    assert!(asm.contains("handler_g1_startup:"));
    assert!(asm.contains("drain_hello:"));
    assert!(asm.contains("call builtin_format"));
    // Section order: code before rodata before data before bss
    let text = asm.find(".text").unwrap();
    let bss = asm.find(".section .bss").unwrap();
    assert!(text < bss);
}

#[test]
fn test_compile_failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.mycelial");
    let output = dir.path().join("broken.s");
    fs::write(&input, "network Broken { frequencies { frequency f }").unwrap();

    let err = mycelc::compile_file(&input, &output, &CompilerConfig::default()).unwrap_err();
    assert!(err.to_string().contains("parse error"), "err: {}", err);
    assert!(!output.exists());
}

#[test]
fn test_run_file_drains_startup() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("greeter.mycelial");
    fs::write(&input, GREETER).unwrap();

    let output = mycelc::run_file(&input, &CompilerConfig::default()).unwrap();
    assert!(
        output.contains(&format!("OUTPUT: building {}", input.display())),
        "output: {}",
        output
    );
}

#[test]
fn test_check_file_reports_layout_errors() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.mycelial");
    fs::write(
        &input,
        "network Bad {\n  hyphae { hyphal A { } }\n  topology { spawn Ghost g }\n}",
    )
    .unwrap();

    let err = mycelc::check_file(&input, &CompilerConfig::default()).unwrap_err();
    assert!(err.to_string().contains("unknown hyphal type"));
}

#[test]
fn test_config_file_controls_limits() {
    let config = CompilerConfig::from_toml("max_cycles = 9\nqueue_capacity = 16\n").unwrap();
    let asm = mycelc::compile_to_asm(GREETER, &config).unwrap();
    assert!(asm.contains("stopped after 9 cycles"));
    // 16 slots of 8 bytes per ring
    assert!(asm.contains(".zero 128"));
}
