//! Helper for easily disassembling and comparing functions of two executables.

use crate::comparison::{AsmComparisonResult, NamedFunction, Side};
use crate::executable::{Executable, LoadError};
use crate::function::{Function, FunctionSetup};
use crate::instruction::AsmFormat;
use crate::matcher::{AsmMatcher, DEFAULT_LOOKAHEAD_LIMIT};
use std::path::Path;

/// Drives disassembly and comparison over a pair of executables.
pub struct CompareHarness {
    /// The two executables being compared, left and right.
    pub executables: [Executable; 2],
    pub format: AsmFormat,
    pub lookahead_limit: u32,
}

impl CompareHarness {
    pub fn load(filename0: &Path, filename1: &Path) -> Result<Self, LoadError> {
        Ok(Self::from_executables([
            Executable::load(filename0)?,
            Executable::load(filename1)?,
        ]))
    }

    pub fn from_executables(executables: [Executable; 2]) -> Self {
        Self {
            executables,
            format: AsmFormat::Default,
            lookahead_limit: DEFAULT_LOOKAHEAD_LIMIT,
        }
    }

    pub fn executable(&self, side: Side) -> &Executable {
        &self.executables[side.index()]
    }

    /// Disassembles an address range on one side.
    pub fn disassemble_range(&self, side: Side, begin_address: u64, end_address: u64) -> Function {
        let setup = FunctionSetup::new(self.executable(side), self.format);
        let mut function = Function::new();
        function.disassemble(&setup, begin_address, end_address);
        function
    }

    /// Disassembles the same-named function on both sides. The name must resolve to exactly one
    /// sized symbol in each executable.
    pub fn disassemble_function(&self, name: &str) -> Option<[Function; 2]> {
        let mut functions = [Function::new(), Function::new()];
        for side in [Side::Left, Side::Right] {
            let executable = self.executable(side);
            let symbol = executable.get_symbol_by_name(name)?;
            if symbol.size == 0 {
                return None;
            }
            functions[side.index()] =
                self.disassemble_range(side, symbol.address, symbol.address + symbol.size);
        }
        Some(functions)
    }

    /// Runs the instruction matcher over a disassembled function pair.
    pub fn compare<'a>(&self, functions: &'a [Function; 2]) -> AsmComparisonResult<'a> {
        AsmMatcher::run_comparison([&functions[0], &functions[1]], self.lookahead_limit)
    }

    /// Disassembles every sized code-section symbol on one side, in address order.
    pub fn named_functions(&self, side: Side) -> Vec<NamedFunction> {
        let executable = self.executable(side);
        let Some(code_section) = executable.code_section() else {
            return Vec::new();
        };
        let code_range = code_section.address..code_section.address + code_section.size;

        let mut symbols = executable
            .symbols()
            .iter()
            .filter(|symbol| symbol.size > 0 && code_range.contains(&symbol.address))
            .cloned()
            .collect::<Vec<_>>();
        symbols.sort_by_key(|symbol| symbol.address);

        symbols
            .into_iter()
            .map(|symbol| {
                let function =
                    self.disassemble_range(side, symbol.address, symbol.address + symbol.size);
                NamedFunction::new(symbol.name, function)
            })
            .collect()
    }
}
