//! Mycelial Compiler CLI
//!
//! `mycelc <source> [<output>]` compiles a network to assembly text; the
//! subcommand forms add the evaluator, a check-only mode and shell
//! completions.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use mycelc::CompilerConfig;

#[derive(ClapParser)]
#[command(name = "mycelc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Mycelial compiler - compile networks to assembly or run them", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Source file (bare form: mycelc <source> [<output>])
    source: Option<PathBuf>,

    /// Output path for the assembly text
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a network to assembly text
    Build {
        /// Input source file
        input: Option<PathBuf>,

        /// Output path (defaults to a.out)
        output: Option<PathBuf>,

        /// Scheduler constants (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Execute a network under the reference evaluator
    Run {
        /// Input source file
        input: PathBuf,

        /// Scheduler constants (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse and lay out a network without generating code
    Check {
        /// Input source file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MYCELC_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Build {
            input,
            output,
            config,
        }) => {
            run_build(input, output, config.as_deref());
        }
        Some(Commands::Run { input, config }) => {
            run_eval(&input, config.as_deref());
        }
        Some(Commands::Check { input }) => {
            let config = CompilerConfig::default();
            match mycelc::check_file(&input, &config) {
                Ok(()) => println!("{}: ok", input.display()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "mycelc", &mut io::stdout());
        }
        None => run_build(cli.source, cli.output, None),
    }
}

fn load_config(path: Option<&Path>) -> CompilerConfig {
    match path {
        Some(path) => {
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    eprintln!("Error reading config {}: {}", path.display(), e);
                    process::exit(1);
                }
            };
            match CompilerConfig::from_toml(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        None => CompilerConfig::default(),
    }
}

fn run_build(input: Option<PathBuf>, output: Option<PathBuf>, config: Option<&Path>) {
    let input = input.unwrap_or_else(|| PathBuf::from("test.mycelial"));
    let output = output.unwrap_or_else(|| PathBuf::from("a.out"));
    let config = load_config(config);
    match mycelc::compile_file(&input, &output, &config) {
        Ok(()) => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_eval(input: &Path, config: Option<&Path>) {
    let config = load_config(config);
    match mycelc::run_file(input, &config) {
        Ok(output) => {
            print!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
