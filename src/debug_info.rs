//! Debug information contract and PDB reading.
//!
//! The comparison core only consumes the plain data types here: per-function address ranges,
//! name variants, compiland and source file linkage, and monotonic line tables. [PdbReader]
//! fills them from a program database file.

use crate::function::SourceLineRange;
use crate::symbols::ExeSymbol;
use crate::IndexT;
use pdb::FallibleIterator;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DebugInfoError {
    #[error("failed to open debug info file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read debug info: {0}")]
    Pdb(#[from] pdb::Error),
}

/// A compilation unit contributing functions to the executable.
#[derive(Debug, Clone, Default)]
pub struct DbgCompiland {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct DbgSourceFile {
    pub name: String,
}

/// Per-function metadata from the debug information.
#[derive(Debug, Clone, Default)]
pub struct DbgFunction {
    /// Mangled linker name, when known.
    pub decorated_name: String,
    /// Plain name as written in the source.
    pub undecorated_name: String,
    /// Fully qualified name used for matching across executables.
    pub global_name: String,
    /// Function begin address, section-relative.
    pub address: u64,
    pub size: u64,
    pub compiland_index: IndexT,
    pub source_file_index: Option<IndexT>,
    /// Line ranges covering `[0, size)` monotonically.
    pub source_lines: Vec<SourceLineRange>,
}

impl DbgFunction {
    pub fn end_address(&self) -> u64 {
        self.address + self.size
    }
}

/// All debug information relevant to disassembly and bundling.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub functions: Vec<DbgFunction>,
    pub compilands: Vec<DbgCompiland>,
    pub source_files: Vec<DbgSourceFile>,
}

impl DebugInfo {
    pub fn find_function(&self, address: u64) -> Option<&DbgFunction> {
        self.functions
            .iter()
            .find(|function| address >= function.address && address < function.end_address())
    }

    pub fn source_file_name(&self, index: Option<IndexT>) -> Option<&str> {
        index.map(|index| self.source_files[index as usize].name.as_str())
    }

    /// Converts the function list to symbols for the executable's symbol table.
    pub fn to_exe_symbols(&self) -> Vec<ExeSymbol> {
        self.functions
            .iter()
            .map(|function| ExeSymbol::new(function.global_name.clone(), function.address, function.size))
            .collect()
    }
}

/// Reads functions, compilands, source files and line tables from a PDB file.
pub struct PdbReader;

impl PdbReader {
    pub fn read(filename: &Path) -> Result<DebugInfo, DebugInfoError> {
        log::debug!("reading debug info from '{}'...", filename.display());

        let file = File::open(filename)?;
        let mut pdb = pdb::PDB::open(file)?;

        let address_map = pdb.address_map()?;
        let string_table = pdb.string_table().ok();

        let mut info = DebugInfo::default();
        let mut source_file_indices: HashMap<String, IndexT> = HashMap::new();
        // Decorated names come from the public symbol stream, keyed by address.
        let mut decorated_names: HashMap<u64, String> = HashMap::new();

        let symbol_table = pdb.global_symbols()?;
        let mut symbols = symbol_table.iter();
        while let Some(symbol) = symbols.next()? {
            if let Ok(pdb::SymbolData::Public(public)) = symbol.parse() {
                if !public.function {
                    continue;
                }
                if let Some(rva) = public.offset.to_rva(&address_map) {
                    decorated_names.insert(rva.0 as u64, public.name.to_string().into_owned());
                }
            }
        }

        let debug_information = pdb.debug_information()?;
        let mut modules = debug_information.modules()?;
        while let Some(module) = modules.next()? {
            let Some(module_info) = pdb.module_info(&module)? else {
                continue;
            };

            let compiland_index = info.compilands.len() as IndexT;
            info.compilands.push(DbgCompiland {
                name: module.module_name().into_owned(),
            });

            let line_program = module_info.line_program()?;
            let mut symbols = module_info.symbols()?;
            while let Some(symbol) = symbols.next()? {
                let Ok(pdb::SymbolData::Procedure(procedure)) = symbol.parse() else {
                    continue;
                };
                let Some(rva) = procedure.offset.to_rva(&address_map) else {
                    continue;
                };
                let address = rva.0 as u64;
                let size = procedure.len as u64;
                if size == 0 {
                    continue;
                }

                let undecorated_name = procedure.name.to_string().into_owned();
                let mut function = DbgFunction {
                    decorated_name: decorated_names.get(&address).cloned().unwrap_or_default(),
                    global_name: undecorated_name.clone(),
                    undecorated_name,
                    address,
                    size,
                    compiland_index,
                    source_file_index: None,
                    source_lines: Vec::new(),
                };

                Self::read_source_lines(
                    &mut function,
                    &line_program,
                    &address_map,
                    string_table.as_ref(),
                    procedure.offset,
                    &mut source_file_indices,
                    &mut info.source_files,
                )?;

                info.functions.push(function);
            }
        }

        info.functions.sort_by_key(|function| function.address);

        log::debug!(
            "read {} functions from {} compilands",
            info.functions.len(),
            info.compilands.len()
        );
        Ok(info)
    }

    fn read_source_lines(
        function: &mut DbgFunction,
        line_program: &pdb::LineProgram,
        address_map: &pdb::AddressMap,
        string_table: Option<&pdb::StringTable>,
        offset: pdb::PdbInternalSectionOffset,
        source_file_indices: &mut HashMap<String, IndexT>,
        source_files: &mut Vec<DbgSourceFile>,
    ) -> Result<(), DebugInfoError> {
        let mut lines = line_program.lines_for_symbol(offset);
        let mut ranges: Vec<(u64, u64, u16)> = Vec::new();

        while let Some(line) = lines.next()? {
            let Some(rva) = line.offset.to_rva(address_map) else {
                continue;
            };
            let address = rva.0 as u64;
            if address < function.address || address >= function.end_address() {
                continue;
            }

            if function.source_file_index.is_none() {
                if let (Ok(file_info), Some(string_table)) =
                    (line_program.get_file_info(line.file_index), string_table)
                {
                    if let Ok(name) = file_info.name.to_string_lossy(string_table) {
                        let name = name.into_owned();
                        let index = *source_file_indices.entry(name.clone()).or_insert_with(|| {
                            let index = source_files.len() as IndexT;
                            source_files.push(DbgSourceFile { name });
                            index
                        });
                        function.source_file_index = Some(index);
                    }
                }
            }

            let length = line.length.unwrap_or(0) as u64;
            ranges.push((address - function.address, length, line.line_start as u16));
        }

        ranges.sort_by_key(|&(offset, _, _)| offset);

        // Make the ranges cover the function monotonically: each range runs until the next one
        // starts, the last one until the function end.
        for index in 0..ranges.len() {
            let end = if index + 1 < ranges.len() {
                ranges[index + 1].0
            } else {
                function.size
            };
            let (offset, length, line_number) = ranges[index];
            let length = if length == 0 { end - offset } else { length.min(end - offset) };
            function.source_lines.push(SourceLineRange {
                offset,
                length,
                line_number,
            });
        }

        // Stretch the last range to the function end so the table covers [0, size).
        if let Some(last) = function.source_lines.last_mut() {
            if last.offset + last.length < function.size {
                last.length = function.size - last.offset;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_info() -> DebugInfo {
        DebugInfo {
            functions: vec![
                DbgFunction {
                    global_name: "alpha".into(),
                    undecorated_name: "alpha".into(),
                    address: 0x1000,
                    size: 0x20,
                    compiland_index: 0,
                    source_file_index: Some(0),
                    ..Default::default()
                },
                DbgFunction {
                    global_name: "beta".into(),
                    undecorated_name: "beta".into(),
                    address: 0x1020,
                    size: 0x10,
                    compiland_index: 1,
                    source_file_index: None,
                    ..Default::default()
                },
            ],
            compilands: vec![
                DbgCompiland { name: "alpha.obj".into() },
                DbgCompiland { name: "beta.obj".into() },
            ],
            source_files: vec![DbgSourceFile { name: "alpha.cpp".into() }],
        }
    }

    #[test]
    fn test_find_function() {
        let info = make_info();
        assert_eq!(info.find_function(0x1000).unwrap().global_name, "alpha");
        assert_eq!(info.find_function(0x101f).unwrap().global_name, "alpha");
        assert_eq!(info.find_function(0x1020).unwrap().global_name, "beta");
        assert!(info.find_function(0x1030).is_none());
    }

    #[test]
    fn test_to_exe_symbols() {
        let info = make_info();
        let symbols = info.to_exe_symbols();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "alpha");
        assert_eq!(symbols[0].address, 0x1000);
        assert_eq!(symbols[0].size, 0x20);
    }

    #[test]
    fn test_source_file_name() {
        let info = make_info();
        assert_eq!(info.source_file_name(Some(0)), Some("alpha.cpp"));
        assert_eq!(info.source_file_name(None), None);
    }
}
