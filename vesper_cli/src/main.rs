// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::process::ExitCode;

use clap::{Parser as ClapParser, Subcommand};
use tracing_subscriber::EnvFilter;
use vesper_vm::image::read_image;
use vesper_vm::vm::{Vm, VmOptions};

/// A JavaScript bytecode engine
#[derive(Debug, ClapParser)]
#[command(name = "vesper")]
#[command(about = "A JavaScript bytecode engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Executes a compiled program image
    Run {
        /// The path of the image to execute
        path: String,

        /// JS heap size in megabytes
        #[arg(long, default_value_t = 64)]
        heap_mb: usize,

        /// Disables garbage collection
        #[arg(long)]
        nogc: bool,

        /// Echoes console output while running
        #[arg(short, long)]
        verbose: bool,
    },

    /// Disassembles a compiled program image
    Dis {
        /// The path of the image to disassemble
        path: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { path, heap_mb, nogc, verbose } => {
            let program = match load(&path) {
                Ok(program) => program,
                Err(message) => {
                    eprintln!("vesper: {message}");
                    return ExitCode::FAILURE;
                }
            };
            let options = VmOptions {
                heap_size_mb: heap_mb,
                disable_gc: nogc,
                print_internals: verbose,
                ..VmOptions::default()
            };
            let mut vm = Vm::new(program, options);
            match vm.run() {
                Ok(()) => {
                    if !verbose {
                        for line in vm.log_lines() {
                            println!("{line}");
                        }
                    }
                    ExitCode::SUCCESS
                }
                Err(_) => ExitCode::FAILURE,
            }
        }
        Command::Dis { path } => match load(&path) {
            Ok(program) => {
                for (meta_idx, meta) in program.metas.iter().enumerate() {
                    println!(
                        "; function #{meta_idx} {} params={} locals={} stack={}",
                        program.atoms.atom_utf8(meta.name_atom),
                        meta.param_count,
                        meta.local_var_count,
                        meta.stack_size,
                    );
                }
                for (pc, inst) in program.bytecode.iter().enumerate() {
                    println!("{pc:6}  {inst:?}");
                }
                ExitCode::SUCCESS
            }
            Err(message) => {
                eprintln!("vesper: {message}");
                ExitCode::FAILURE
            }
        },
    }
}

fn load(path: &str) -> Result<vesper_vm::Program, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("cannot read {path}: {e}"))?;
    read_image(&bytes).map_err(|e| format!("cannot load {path}: {e}"))
}
