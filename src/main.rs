//! Command line front-end for disassembling executables.

use asmdiff::instruction::to_asm_format;
use asmdiff::runner::{
    get_asm_output_file_name, get_config_file_name, get_input_type, ExeOptions, InputType,
    PdbOptions, Runner,
};
use clap::error::ErrorKind;
use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "asmdiff", version, about = "x86 disassembly tool")]
struct Args {
    /// Input file.
    input: String,

    /// Input file type.
    #[arg(long = "input-type", value_name = "auto|exe|pdb", default_value = "auto")]
    input_type: String,

    /// Filename for single file output, or 'auto' for a name derived from the input file.
    #[arg(short, long, default_value = "auto")]
    output: String,

    /// Assembly output format.
    #[arg(short, long, value_name = "default|igas|agas|masm", default_value = "default")]
    format: String,

    /// Configuration file describing how to disassemble the input file and containing extra
    /// symbol info, or 'auto' for a name derived from the input file.
    #[arg(short, long, default_value = "auto")]
    config: String,

    /// Starting address of a single function to disassemble, in hexadecimal notation.
    #[arg(short, long)]
    start: Option<String>,

    /// Ending address of a single function to disassemble, in hexadecimal notation.
    #[arg(short, long)]
    end: Option<String>,

    /// Prints a list of sections in the executable, then exits.
    #[arg(long = "list-sections")]
    list_sections: bool,

    /// Dumps symbols stored in the executable or pdb to the config file.
    #[arg(short = 'd', long = "dumpsyms")]
    dump_syms: bool,

    /// Verbose output on the current state of the program.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex(value: &str) -> Option<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

fn main() -> ExitCode {
    println!("asmdiff {}", env!("CARGO_PKG_VERSION"));

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let _ = error.print();
            return match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let start_addr = match args.start.as_deref().map(parse_hex) {
        Some(None) => {
            eprintln!("invalid start address, expected hexadecimal notation");
            return ExitCode::FAILURE;
        }
        Some(Some(value)) => value,
        None => 0,
    };
    let end_addr = match args.end.as_deref().map(parse_hex) {
        Some(None) => {
            eprintln!("invalid end address, expected hexadecimal notation");
            return ExitCode::FAILURE;
        }
        Some(Some(value)) => value,
        None => 0,
    };

    match get_input_type(&args.input, &args.input_type) {
        InputType::Exe => {
            let mut runner = Runner::new();
            let options = ExeOptions {
                config_file: get_config_file_name(&args.input, &args.config),
                output_file: get_asm_output_file_name(&args.input, &args.output),
                input_file: args.input,
                format: to_asm_format(&args.format),
                start_addr,
                end_addr,
                print_secs: args.list_sections,
                dump_syms: args.dump_syms,
            };
            run(runner.process_exe(&options))
        }
        InputType::Pdb => {
            let mut runner = Runner::new();
            let pdb_options = PdbOptions {
                input_file: args.input.clone(),
            };
            if let Err(error) = runner.process_pdb(&pdb_options) {
                log::error!("{error}");
                return ExitCode::FAILURE;
            }
            let input_file = runner.get_pdb_exe_file_name().to_string();
            let options = ExeOptions {
                config_file: get_config_file_name(&input_file, &args.config),
                output_file: get_asm_output_file_name(&input_file, &args.output),
                input_file,
                format: to_asm_format(&args.format),
                start_addr,
                end_addr,
                print_secs: args.list_sections,
                dump_syms: args.dump_syms,
            };
            run(runner.process_exe(&options))
        }
        InputType::None => {
            eprintln!("unrecognized input type '{}', exiting...", args.input_type);
            ExitCode::FAILURE
        }
    }
}

fn run(result: Result<(), asmdiff::runner::RunnerError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error}");
            ExitCode::FAILURE
        }
    }
}
