use clap::{Parser as ClapParser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use bytecode::{Program, assemble, disassemble, has_magic};
use heap::{GcConfig, GcMode};
use vm::{RunExit, StackInfo, Vm, VmCreateInfo};

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Assemble, disassemble and run pila programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a text program into the binary format
    Asm {
        input: PathBuf,
        #[arg(short, long, help = "Output file for the binary program")]
        output: PathBuf,
    },

    /// Print a binary program as assembler text
    Dis { input: PathBuf },

    /// Run a binary program or assembler source
    Run {
        input: PathBuf,

        #[arg(long, default_value_t = 0, help = "Stop after this many instructions (0 = no limit)")]
        max_steps: u64,

        #[arg(long, default_value_t = StackInfo::default().capacity, help = "Operand stack capacity")]
        stack: usize,

        #[arg(long, help = "Let the operand stack grow past its capacity")]
        growable_stack: bool,

        #[arg(long, help = "Let the collector free unreachable strings")]
        gc_own: bool,

        #[arg(long, help = "Collect after this many new strings")]
        gc_threshold: Option<usize>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Asm { input, output } => assemble_file(&input, &output),
        Command::Dis { input } => disassemble_file(&input),
        Command::Run {
            input,
            max_steps,
            stack,
            growable_stack,
            gc_own,
            gc_threshold,
        } => {
            let info = VmCreateInfo {
                stack: StackInfo {
                    capacity: stack,
                    growable: growable_stack,
                },
                gc: GcConfig {
                    mode: if gc_own { GcMode::Own } else { GcMode::Observe },
                    threshold: gc_threshold,
                },
                ..VmCreateInfo::default()
            };
            run_file(&input, info, max_steps)
        }
    };

    if let Err(message) = result {
        eprintln!("{message}");
        process::exit(1);
    }
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|err| format!("error reading '{}': {err}", path.display()))
}

/// Binary programs are recognised by their magic; anything else is
/// assembled as text.
fn load_any(path: &Path) -> Result<Program, String> {
    let bytes = read(path)?;
    if has_magic(&bytes) {
        return Program::load(&bytes).map_err(|err| format!("bad bytecode: {err}"));
    }
    let source = String::from_utf8(bytes).map_err(|_| format!("'{}' is neither a program nor UTF-8 text", path.display()))?;
    assemble(&source).map_err(|err| format!("{}: {err}", path.display()))
}

fn assemble_file(input: &Path, output: &Path) -> Result<(), String> {
    let program = load_any(input)?;
    fs::write(output, program.to_bytes()).map_err(|err| format!("error writing '{}': {err}", output.display()))
}

fn disassemble_file(input: &Path) -> Result<(), String> {
    let program = load_any(input)?;
    print!("{}", disassemble(&program));
    Ok(())
}

fn run_file(input: &Path, info: VmCreateInfo, max_steps: u64) -> Result<(), String> {
    let program = load_any(input)?;
    let mut vm = Vm::new(info).map_err(|err| format!("{}: {err}", err.status()))?;
    vm.load_program(&program)
        .map_err(|err| format!("{}: {err}", err.status()))?;

    match vm.run(max_steps) {
        Ok(RunExit::Halted) => Ok(()),
        Ok(RunExit::StepLimit) => {
            eprintln!("stopped after {max_steps} steps at offset {}", vm.ip());
            Ok(())
        }
        Err(_) => {
            let message = vm
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "runtime error".to_owned());
            Err(format!("{message} (at offset {})", vm.ip()))
        }
    }
}
