//! Processing flows behind the command line interface.

use crate::config::ConfigError;
use crate::debug_info::{DebugInfo, DebugInfoError, PdbReader};
use crate::executable::{Executable, LoadError};
use crate::function::{Function, FunctionSetup};
use crate::instruction::AsmFormat;
use crate::output;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel file name selecting a name derived from the input file.
pub const AUTO_STR: &str = "auto";

pub fn is_auto_str(str: &str) -> bool {
    str.eq_ignore_ascii_case(AUTO_STR)
}

/// `auto` resolves to `<input stem>.config.json`.
pub fn get_config_file_name(input_file: &str, config_file: &str) -> String {
    if is_auto_str(config_file) {
        if input_file.is_empty() {
            return String::new();
        }
        let mut path = PathBuf::from(input_file);
        path.set_extension("config.json");
        return path.to_string_lossy().into_owned();
    }
    config_file.to_string()
}

/// `auto` resolves to `<input stem>.S`.
pub fn get_asm_output_file_name(input_file: &str, output_file: &str) -> String {
    if is_auto_str(output_file) {
        if input_file.is_empty() {
            return String::new();
        }
        let mut path = PathBuf::from(input_file);
        path.set_extension("S");
        return path.to_string_lossy().into_owned();
    }
    output_file.to_string()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputType {
    None,
    Exe,
    Pdb,
}

/// Picks the input interpretation from the explicit option, or from the file extension when the
/// option is `auto`.
pub fn get_input_type(input_file: &str, input_type: &str) -> InputType {
    if input_file.is_empty() {
        return InputType::None;
    }
    if is_auto_str(input_type) {
        let is_pdb = Path::new(input_file)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("pdb"))
            .unwrap_or(false);
        return if is_pdb { InputType::Pdb } else { InputType::Exe };
    }
    if input_type.eq_ignore_ascii_case("exe") {
        InputType::Exe
    } else if input_type.eq_ignore_ascii_case("pdb") {
        InputType::Pdb
    } else {
        InputType::None
    }
}

/// Options for processing an executable input file.
#[derive(Debug, Clone, Default)]
pub struct ExeOptions {
    pub input_file: String,
    pub config_file: String,
    pub output_file: String,
    pub format: AsmFormat,
    pub start_addr: u64,
    pub end_addr: u64,
    pub print_secs: bool,
    pub dump_syms: bool,
}

/// Options for processing a program database input file.
#[derive(Debug, Clone, Default)]
pub struct PdbOptions {
    pub input_file: String,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    DebugInfo(#[from] DebugInfoError),
    #[error("failed to write output file: {0}")]
    Output(#[from] std::io::Error),
    #[error("no functions found to disassemble")]
    NothingToDisassemble,
}

/// Carries state across the pdb-then-exe processing chain.
#[derive(Default)]
pub struct Runner {
    debug_info: Option<DebugInfo>,
    pdb_exe_file_name: String,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executable file name the processed pdb belongs to.
    ///
    /// The program database container does not portably store the executable path, so it is
    /// derived from the pdb file name.
    pub fn get_pdb_exe_file_name(&self) -> &str {
        &self.pdb_exe_file_name
    }

    /// Reads debug information from a pdb file and remembers it for a following
    /// [Runner::process_exe] call.
    pub fn process_pdb(&mut self, options: &PdbOptions) -> Result<(), RunnerError> {
        let debug_info = PdbReader::read(Path::new(&options.input_file))?;

        let mut exe_path = PathBuf::from(&options.input_file);
        exe_path.set_extension("exe");
        self.pdb_exe_file_name = exe_path.to_string_lossy().into_owned();
        self.debug_info = Some(debug_info);
        Ok(())
    }

    /// Loads an executable, applies its config, and writes the requested assembler output.
    pub fn process_exe(&mut self, options: &ExeOptions) -> Result<(), RunnerError> {
        let mut executable = Executable::load(Path::new(&options.input_file))?;

        if !options.config_file.is_empty() && Path::new(&options.config_file).exists() {
            executable.load_config(Path::new(&options.config_file), false)?;
        }
        if let Some(debug_info) = &self.debug_info {
            executable.add_symbols(debug_info.to_exe_symbols(), false);
        }

        if options.print_secs {
            print_sections(&executable);
            return Ok(());
        }

        if options.dump_syms && !options.config_file.is_empty() {
            executable.save_config(Path::new(&options.config_file))?;
        }

        let ranges = self.select_ranges(&executable, options);
        if ranges.is_empty() {
            return Err(RunnerError::NothingToDisassemble);
        }
        log::info!(
            "disassembling {} function(s) from '{}'...",
            ranges.len(),
            options.input_file
        );

        let setup = FunctionSetup::new(&executable, options.format);
        let mut functions = Vec::with_capacity(ranges.len());
        for (begin_address, end_address) in ranges {
            let mut function = Function::new();
            function.disassemble(&setup, begin_address, end_address);
            if let Some(debug_info) = &self.debug_info {
                if let Some(dbg_function) = debug_info.find_function(begin_address) {
                    // The line table covers the debug info's own range; only attach it when the
                    // disassembled range is the same.
                    let same_range = dbg_function.address == begin_address
                        && dbg_function.end_address() == end_address;
                    if same_range
                        && !dbg_function.source_lines.is_empty()
                        && !function.get_instructions().is_empty()
                    {
                        if let Some(name) =
                            debug_info.source_file_name(dbg_function.source_file_index)
                        {
                            let name = name.to_string();
                            function.set_source_file(&name, &dbg_function.source_lines);
                        }
                    }
                }
            }
            functions.push(function);
        }

        if !options.output_file.is_empty() {
            output::write_asm_file(Path::new(&options.output_file), functions.iter())?;
            log::info!("wrote assembler output to '{}'", options.output_file);
        }
        Ok(())
    }

    /// A given address range wins; otherwise every sized code-section symbol is emitted in
    /// address order.
    fn select_ranges(&self, executable: &Executable, options: &ExeOptions) -> Vec<(u64, u64)> {
        if options.start_addr < options.end_addr {
            return vec![(options.start_addr, options.end_addr)];
        }

        let Some(code_section) = executable.code_section() else {
            return Vec::new();
        };
        let code_range = code_section.address..code_section.address + code_section.size;

        let mut ranges = executable
            .symbols()
            .iter()
            .filter(|symbol| symbol.size > 0 && code_range.contains(&symbol.address))
            .map(|symbol| (symbol.address, symbol.address + symbol.size))
            .collect::<Vec<_>>();
        ranges.sort_unstable();
        ranges.dedup();
        ranges
    }
}

fn print_sections(executable: &Executable) {
    println!("sections of '{}':", executable.filename());
    for section in executable.sections() {
        println!(
            "  {:<12} type:{:<8} address:0x{:08x} size:0x{:08x}",
            section.name,
            section.section_type.as_str(),
            section.address,
            section.size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_file_names() {
        assert_eq!(get_config_file_name("program.exe", "auto"), "program.config.json");
        assert_eq!(get_config_file_name("program.exe", "given.json"), "given.json");
        assert_eq!(get_config_file_name("", "auto"), "");

        assert_eq!(get_asm_output_file_name("program.exe", "AUTO"), "program.S");
        assert_eq!(get_asm_output_file_name("program.exe", "out.S"), "out.S");
    }

    #[test]
    fn test_input_type_detection() {
        assert_eq!(get_input_type("program.exe", "auto"), InputType::Exe);
        assert_eq!(get_input_type("program.pdb", "auto"), InputType::Pdb);
        assert_eq!(get_input_type("program.bin", "auto"), InputType::Exe);
        assert_eq!(get_input_type("program.bin", "pdb"), InputType::Pdb);
        assert_eq!(get_input_type("program.bin", "bogus"), InputType::None);
        assert_eq!(get_input_type("", "exe"), InputType::None);
    }
}
