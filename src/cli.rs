//! Thin CLI over the pipeline: `parse`, `check`, `lower`, `run`,
//! `explain`. Exit code 0 on success, 1 on any diagnostic. Diagnostics
//! print as `<file>:<line>:<col>: <message>`.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::interpreter;
use crate::provider::DryRunProvider;
use crate::CompileError;

#[derive(Parser)]
#[command(name = "eac")]
#[command(about = "The EAC compiler and interpreter", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a source file and report syntax errors
    Parse { file: PathBuf },
    /// Parse and type-check a source file
    Check { file: PathBuf },
    /// Compile a source file and print its IR JSON
    Lower { file: PathBuf },
    /// Compile and execute against the dry-run provider, printing the trace
    Run { file: PathBuf },
    /// Compile a source file and print a plain-English summary
    Explain { file: PathBuf },
}

pub fn run_cli() -> i32 {
    let cli = Cli::parse();
    match cli.command {
        Commands::Parse { file } => cmd_parse(&file),
        Commands::Check { file } => cmd_check(&file),
        Commands::Lower { file } => cmd_lower(&file),
        Commands::Run { file } => cmd_run(&file),
        Commands::Explain { file } => cmd_explain(&file),
    }
}

fn read_source(file: &Path) -> Result<String, i32> {
    fs::read_to_string(file).map_err(|err| {
        eprintln!("error: cannot read {}: {err}", file.display());
        1
    })
}

fn report(file: &Path, error: &CompileError) -> i32 {
    for message in error.messages() {
        eprintln!("{}:{message}", file.display());
    }
    1
}

fn cmd_parse(file: &Path) -> i32 {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    match crate::parse_source(&source) {
        Ok(count) => {
            println!("ok: {count} statements");
            0
        }
        Err(err) => report(file, &err),
    }
}

fn cmd_check(file: &Path) -> i32 {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    match crate::compile(&source) {
        Ok(_) => {
            println!("ok");
            0
        }
        Err(err) => report(file, &err),
    }
}

fn cmd_lower(file: &Path) -> i32 {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    match crate::compile(&source) {
        Ok(ir) => {
            println!("{}", crate::to_json(&ir));
            0
        }
        Err(err) => report(file, &err),
    }
}

fn cmd_run(file: &Path) -> i32 {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let ir = match crate::compile(&source) {
        Ok(ir) => ir,
        Err(err) => return report(file, &err),
    };
    let outcome = interpreter::run(&ir, &mut DryRunProvider::new());
    for entry in &outcome.trace {
        match &entry.error {
            Some(error) => println!("{} !! {error}", entry.op),
            None => println!("{} -> {}", entry.op, entry.result),
        }
    }
    match outcome.error {
        Some(err) => {
            eprintln!("error: {err}");
            1
        }
        None => 0,
    }
}

fn cmd_explain(file: &Path) -> i32 {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(code) => return code,
    };
    match crate::compile(&source) {
        Ok(ir) => {
            print!("{}", crate::explain(&ir));
            0
        }
        Err(err) => report(file, &err),
    }
}
