//! Function disassembly with symbol substitution.
//!
//! Disassembling runs in two passes over the function's byte range. The pre-pass decodes every
//! instruction to create pseudo-symbols (`sub_`/`loc_`) for call and jump targets that land
//! inside the function. The main pass decodes again, this time formatting text through a
//! formatter whose symbol resolver substitutes quoted symbol names for operand values, consulting
//! the function's own pseudo-symbols first and the executable's symbol table second.

use crate::executable::Executable;
use crate::instruction::{
    AsmFormat, AsmInstruction, AsmLabel, PREFIX_LOC, PREFIX_OFF, PREFIX_SUB, PREFIX_UNK,
};
use crate::symbols::{ExeSymbol, SymbolMap};
use crate::IndexT;
use iced_x86::{
    Decoder, DecoderOptions, FlowControl, Formatter, FormatterOptions, GasFormatter, Instruction,
    IntelFormatter, MasmFormatter, MemorySizeOptions, OpKind, Register, SymbolResolver,
    SymbolResult,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Function disassemble setup. Can be shared by multiple [Function] instances, including across
/// threads, as long as the executable stays untouched for the duration.
pub struct FunctionSetup<'e> {
    executable: &'e Executable,
    format: AsmFormat,
}

impl<'e> FunctionSetup<'e> {
    pub fn new(executable: &'e Executable, format: AsmFormat) -> Self {
        Self { executable, format }
    }

    pub fn executable(&self) -> &Executable {
        self.executable
    }

    pub fn format(&self) -> AsmFormat {
        self.format
    }
}

/// Jump origins collected for one jump destination inside a function.
#[derive(Debug, Clone, Default)]
pub struct AsmJumpDestinationInfo {
    pub jump_destination: u64,
    pub jump_origins: Vec<u64>,
}

/// Synthetic symbols created for one function, keyed by address.
#[derive(Debug, Clone, Default)]
pub struct PseudoSymbols {
    symbols: Vec<ExeSymbol>,
    address_to_index: HashMap<u64, IndexT>,
}

impl PseudoSymbols {
    pub fn get(&self, address: u64) -> Option<&ExeSymbol> {
        self.address_to_index
            .get(&address)
            .map(|&index| &self.symbols[index as usize])
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[ExeSymbol] {
        &self.symbols
    }

    fn insert(&mut self, symbol: ExeSymbol) -> bool {
        match self.address_to_index.entry(symbol.address) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(self.symbols.len() as IndexT);
                self.symbols.push(symbol);
                true
            }
        }
    }
}

/// A single function disassembly.
#[derive(Debug, Clone, Default)]
pub struct Function {
    begin_address: u64,
    end_address: u64,
    source_file_name: String,
    instructions: Vec<AsmInstruction>,
    pseudo_symbols: Arc<PseudoSymbols>,
    labels: Vec<AsmLabel>,
    label_address_to_index: HashMap<u64, IndexT>,
    jump_destinations: Vec<AsmJumpDestinationInfo>,
    jump_destination_address_to_index: HashMap<u64, IndexT>,
    symbol_count: u32,
}

/// Source file linkage for one function, fed from a debug info reader.
#[derive(Debug, Clone, Default)]
pub struct SourceLineRange {
    /// Byte offset from the function begin address.
    pub offset: u64,
    /// Byte length covered by this line.
    pub length: u64,
    pub line_number: u16,
}

impl Function {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address range. Must not be called after disassembling.
    pub fn set_address_range(&mut self, begin_address: u64, end_address: u64) {
        debug_assert!(self.instructions.is_empty());
        self.begin_address = begin_address;
        self.end_address = end_address;
    }

    pub fn get_begin_address(&self) -> u64 {
        self.begin_address
    }

    pub fn get_end_address(&self) -> u64 {
        self.end_address
    }

    pub fn get_source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn get_instructions(&self) -> &[AsmInstruction] {
        &self.instructions
    }

    /// The number of instruction addresses that refer to a symbol or pseudo symbol.
    pub fn get_symbol_count(&self) -> u32 {
        self.symbol_count
    }

    pub fn get_pseudo_symbol(&self, address: u64) -> Option<&ExeSymbol> {
        self.pseudo_symbols.get(address)
    }

    pub fn get_pseudo_symbols(&self) -> &[ExeSymbol] {
        self.pseudo_symbols.symbols()
    }

    /// Label at an exact instruction address, if one exists.
    pub fn get_label(&self, address: u64) -> Option<&AsmLabel> {
        self.label_address_to_index
            .get(&address)
            .map(|&index| &self.labels[index as usize])
    }

    pub fn get_jump_destination_info(&self, address: u64) -> Option<&AsmJumpDestinationInfo> {
        self.jump_destination_address_to_index
            .get(&address)
            .map(|&index| &self.jump_destinations[index as usize])
    }

    /// Disassembles the address range with the given setup. The range is free to choose, but it
    /// is best used for a single function only. When complete, instruction data is available.
    pub fn disassemble(&mut self, setup: &FunctionSetup, begin_address: u64, end_address: u64) {
        self.set_address_range(begin_address, end_address);
        self.disassemble_with_range(setup);
    }

    fn disassemble_with_range(&mut self, setup: &FunctionSetup) {
        self.source_file_name = String::new();
        self.instructions = Vec::new();
        self.pseudo_symbols = Arc::new(PseudoSymbols::default());
        self.labels = Vec::new();
        self.label_address_to_index = HashMap::new();
        self.jump_destinations = Vec::new();
        self.jump_destination_address_to_index = HashMap::new();
        self.symbol_count = 0;

        // An empty range is valid and produces an empty function.
        if self.begin_address >= self.end_address {
            return;
        }

        let executable = setup.executable();
        let Some(section) = executable.find_section(self.begin_address) else {
            return;
        };

        let section_offset = self.begin_address - section.address;
        let section_offset_end = self.end_address - section.address;
        if section_offset_end - section_offset > section.size {
            return;
        }
        let Some(data) = section.data.get(section_offset as usize..) else {
            return;
        };
        let function_length = (self.end_address - self.begin_address) as usize;

        // Loop through the function once to identify all jump and call targets and create local
        // labels for them.
        let mut pseudo_symbols = PseudoSymbols::default();
        let mut instruction = Instruction::default();
        let mut decoder = Decoder::with_ip(32, data, self.begin_address, DecoderOptions::NONE);
        let mut instruction_count = 0usize;

        while decoder.position() < function_length && decoder.can_decode() {
            let instruction_address = decoder.ip();
            decoder.decode_out(&mut instruction);
            instruction_count += 1;

            if instruction.is_invalid() {
                continue;
            }

            if is_relative_branch(&instruction) {
                let target = instruction.near_branch_target();
                if target >= self.begin_address && target < self.end_address {
                    if instruction.flow_control() == FlowControl::Call {
                        add_pseudo_symbol(&mut pseudo_symbols, executable, target, PREFIX_SUB);
                    } else {
                        add_pseudo_symbol(&mut pseudo_symbols, executable, target, PREFIX_LOC);
                        self.add_jump_destination(target, instruction_address);
                    }
                }
            }
        }

        self.pseudo_symbols = Arc::new(pseudo_symbols);

        let resolver = FunctionSymbolResolver::new(executable, Arc::clone(&self.pseudo_symbols));
        let mut formatter = DialectFormatter::new(setup.format(), Box::new(resolver));

        self.instructions.reserve(instruction_count);
        let mut decoder = Decoder::with_ip(32, data, self.begin_address, DecoderOptions::NONE);
        let mut instruction_index = 0usize;

        while decoder.position() < function_length && decoder.can_decode() {
            let start_offset = decoder.position();
            decoder.decode_out(&mut instruction);
            let length = decoder.position() - start_offset;
            instruction_index += 1;

            let mut asm_instruction = AsmInstruction {
                address: instruction.ip(),
                ..Default::default()
            };
            asm_instruction.set_bytes(&data[start_offset..start_offset + length]);

            let symbol_name = self
                .get_symbol(executable, asm_instruction.address)
                .map(|symbol| symbol.name.clone());
            if let Some(name) = symbol_name {
                asm_instruction.is_symbol = true;
                self.symbol_count += 1;
                let index = self.labels.len() as IndexT;
                self.labels.push(AsmLabel {
                    label: name,
                    address: asm_instruction.address,
                });
                self.label_address_to_index
                    .insert(asm_instruction.address, index);
            }

            if instruction.is_invalid() {
                asm_instruction.is_invalid = true;
            } else {
                formatter.format(&instruction, &mut asm_instruction.text);

                if instruction.flow_control() != FlowControl::Call && is_relative_branch(&instruction)
                {
                    let target = instruction.near_branch_target();
                    if target >= self.begin_address && target < self.end_address {
                        let offset = target as i64 - asm_instruction.address as i64;
                        // A delta beyond i32 leaves the jump unflagged rather than truncated.
                        if let Ok(jump_len) = i32::try_from(offset) {
                            asm_instruction.is_jump = true;
                            asm_instruction.jump_len = jump_len;
                        }
                    }
                }
            }

            self.instructions.push(asm_instruction);
        }

        debug_assert_eq!(instruction_index, instruction_count);
    }

    /// Sets source file info. Must not be called before disassembling.
    ///
    /// The line ranges are expected to cover the function range monotonically.
    pub fn set_source_file(&mut self, source_file_name: &str, source_lines: &[SourceLineRange]) {
        debug_assert!(!self.instructions.is_empty());
        debug_assert!(source_lines
            .last()
            .map(|line| self.begin_address + line.offset + line.length == self.end_address)
            .unwrap_or(true));

        self.source_file_name = source_file_name.to_string();
        let mut source_line_index = 0;
        let mut last_line_number = 0;

        for instruction in &mut self.instructions {
            while source_line_index < source_lines.len() {
                let line = &source_lines[source_line_index];
                let line_begin = self.begin_address + line.offset;
                if instruction.address >= line_begin && instruction.address < line_begin + line.length
                {
                    instruction.line_number = line.line_number;
                    if last_line_number != line.line_number {
                        instruction.is_first_line = true;
                        last_line_number = line.line_number;
                    }
                    break;
                }
                source_line_index += 1;
            }
        }
    }

    fn add_jump_destination(&mut self, jump_destination: u64, jump_origin: u64) {
        let index = match self
            .jump_destination_address_to_index
            .get(&jump_destination)
            .copied()
        {
            Some(index) => index as usize,
            None => {
                let index = self.jump_destinations.len();
                self.jump_destinations.push(AsmJumpDestinationInfo {
                    jump_destination,
                    jump_origins: Vec::new(),
                });
                self.jump_destination_address_to_index
                    .insert(jump_destination, index as IndexT);
                index
            }
        };
        self.jump_destinations[index].jump_origins.push(jump_origin);
    }

    /// Layered symbol lookup, pseudo symbols first, executable symbols second.
    fn get_symbol<'a>(&'a self, executable: &'a Executable, address: u64) -> Option<&'a ExeSymbol> {
        self.pseudo_symbols
            .get(address)
            .or_else(|| executable.get_symbol(address))
    }
}

/// Layered symbol lookup over a function and its executable, pseudo symbols first.
pub fn get_symbol_or_pseudo_symbol<'a>(
    address: u64,
    executable: &'a Executable,
    function: &'a Function,
) -> Option<&'a ExeSymbol> {
    function
        .get_pseudo_symbol(address)
        .or_else(|| executable.get_symbol(address))
}

fn add_pseudo_symbol(
    pseudo_symbols: &mut PseudoSymbols,
    executable: &Executable,
    address: u64,
    prefix: &str,
) -> bool {
    if executable.get_symbol(address).is_some() {
        return false;
    }
    pseudo_symbols.insert(ExeSymbol {
        name: format!("{prefix}{address:x}"),
        address,
        size: 0,
    })
}

fn is_relative_branch(instruction: &Instruction) -> bool {
    instruction.op_count() > 0
        && matches!(
            instruction.op0_kind(),
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
        )
}

/// Short branches encode their target as a relative immediate of size 8.
fn is_short_branch(instruction: &Instruction) -> bool {
    matches!(
        instruction.code().op_code().op_kind(0),
        iced_x86::OpCodeOperandKind::br16_1
            | iced_x86::OpCodeOperandKind::br32_1
            | iced_x86::OpCodeOperandKind::br64_1
    )
}

/// An effective segment whose base usually does not map to a program-level address. Unknown
/// segments are deliberately treated as relevant.
fn has_irrelevant_segment(instruction: &Instruction) -> bool {
    matches!(
        instruction.memory_segment(),
        Register::ES | Register::SS | Register::FS | Register::GS
    )
}

fn has_base_or_index_register(instruction: &Instruction) -> bool {
    instruction.memory_base() != Register::None || instruction.memory_index() != Register::None
}

/// Formatter for one of the supported assembly dialects, with symbol substitution attached.
enum DialectFormatter {
    Intel(IntelFormatter),
    Gas(GasFormatter),
    Masm(MasmFormatter),
}

impl DialectFormatter {
    fn new(format: AsmFormat, resolver: Box<dyn SymbolResolver>) -> Self {
        let mut formatter = match format {
            AsmFormat::Masm => Self::Masm(MasmFormatter::with_options(Some(resolver), None)),
            AsmFormat::Agas => Self::Gas(GasFormatter::with_options(Some(resolver), None)),
            AsmFormat::Igas | AsmFormat::Default => {
                Self::Intel(IntelFormatter::with_options(Some(resolver), None))
            }
        };

        let options = formatter.options_mut();
        // Operand sizes are always spelled out so both executables format identically.
        options.set_memory_size_options(MemorySizeOptions::Always);
        options.set_show_branch_size(false);
        options.set_space_after_operand_separator(true);
        options.set_uppercase_hex(false);
        options.set_hex_prefix("0x");
        options.set_hex_suffix("");
        formatter
    }

    fn options_mut(&mut self) -> &mut FormatterOptions {
        match self {
            Self::Intel(formatter) => formatter.options_mut(),
            Self::Gas(formatter) => formatter.options_mut(),
            Self::Masm(formatter) => formatter.options_mut(),
        }
    }

    fn format(&mut self, instruction: &Instruction, output: &mut String) {
        match self {
            Self::Intel(formatter) => formatter.format(instruction, output),
            Self::Gas(formatter) => formatter.format(instruction, output),
            Self::Masm(formatter) => formatter.format(instruction, output),
        }
    }
}

/// The operand categories the resolver distinguishes, mirroring the decoder library's formatter
/// hook set.
enum OperandForm {
    /// Branch target, encoded relative to the instruction.
    Address { short: bool },
    /// Far pointer offset.
    Pointer,
    /// Memory operand displacement.
    Memory,
    /// Immediate value.
    Immediate,
}

/// Symbol substitution callback invoked by the formatter for every operand value.
///
/// Holds shared handles rather than borrows so a setup can be used concurrently for distinct
/// functions; the resolver is the "user data back-pointer" of the formatter hook.
struct FunctionSymbolResolver {
    image_base: u64,
    code_begin_from_image_base: u64,
    code_end_from_image_base: u64,
    sections_begin_from_image_base: u64,
    sections_end_from_image_base: u64,
    symbols: Arc<SymbolMap>,
    pseudo_symbols: Arc<PseudoSymbols>,
}

impl FunctionSymbolResolver {
    fn new(executable: &Executable, pseudo_symbols: Arc<PseudoSymbols>) -> Self {
        Self {
            image_base: executable.image_base(),
            code_begin_from_image_base: executable.code_section_begin_from_image_base(),
            code_end_from_image_base: executable.code_section_end_from_image_base(),
            sections_begin_from_image_base: executable.all_sections_begin_from_image_base(),
            sections_end_from_image_base: executable.all_sections_end_from_image_base(),
            symbols: Arc::clone(executable.symbol_map()),
            pseudo_symbols,
        }
    }

    /// Layered lookup with the image base applied, pseudo symbols first.
    fn get_symbol_from_image_base(&self, address: u64) -> Option<&ExeSymbol> {
        let relative = address.wrapping_sub(self.image_base);
        self.pseudo_symbols
            .get(relative)
            .or_else(|| self.symbols.get(relative))
    }

    fn in_code_section(&self, address: u64) -> bool {
        address >= self.code_begin_from_image_base && address < self.code_end_from_image_base
    }

    fn in_any_section(&self, address: u64) -> bool {
        address >= self.sections_begin_from_image_base && address < self.sections_end_from_image_base
    }

    /// Builds the replacement text for an operand value, or None to fall through to the default
    /// number formatting.
    fn resolve(&self, value: u64, form: OperandForm) -> Option<String> {
        if let Some(symbol) = self.get_symbol_from_image_base(value) {
            return Some(match form {
                OperandForm::Address { short: true } => format!("short \"{}\"", symbol.name),
                _ => format!("\"{}\"", symbol.name),
            });
        }
        if self.in_code_section(value) {
            return Some(format!("\"{PREFIX_SUB}{value:x}\""));
        }
        if self.in_any_section(value) {
            return Some(match form {
                OperandForm::Memory | OperandForm::Pointer => format!("\"{PREFIX_UNK}{value:x}\""),
                _ => format!("\"{PREFIX_OFF}{value:x}\""),
            });
        }
        None
    }
}

impl SymbolResolver for FunctionSymbolResolver {
    fn symbol(
        &mut self,
        instruction: &Instruction,
        _operand: u32,
        instruction_operand: Option<u32>,
        address: u64,
        _address_size: u32,
    ) -> Option<SymbolResult<'_>> {
        let operand = instruction_operand?;

        let text = match instruction.op_kind(operand) {
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                // Relative targets are decoded in section-relative space; apply the image base.
                let value = address.wrapping_add(self.image_base);
                self.resolve(
                    value,
                    OperandForm::Address {
                        short: is_short_branch(instruction),
                    },
                )?
            }
            OpKind::FarBranch16 | OpKind::FarBranch32 => self.resolve(address, OperandForm::Pointer)?,
            OpKind::Memory => {
                // No lookup when the address is in an irrelevant segment, such as fs:[0].
                if has_irrelevant_segment(instruction) {
                    return None;
                }
                // No symbol promotion for a register plus offset, such as [eax+0x400e00]. The
                // displacement still resolves to the section-derived forms.
                if has_base_or_index_register(instruction) {
                    let value = address;
                    if self.in_code_section(value) {
                        format!("\"{PREFIX_SUB}{value:x}\"")
                    } else if self.in_any_section(value) {
                        format!("\"{PREFIX_OFF}{value:x}\"")
                    } else {
                        return None;
                    }
                } else {
                    self.resolve(address, OperandForm::Memory)?
                }
            }
            OpKind::Immediate8
            | OpKind::Immediate8_2nd
            | OpKind::Immediate16
            | OpKind::Immediate32
            | OpKind::Immediate64
            | OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64 => self.resolve(address, OperandForm::Immediate)?,
            _ => return None,
        };

        Some(SymbolResult::with_string(address, text))
    }
}
