//! Instruction value types shared between the disassembler and the comparison engine.

/// Pseudo-symbol prefix for call targets and unnamed code addresses.
pub const PREFIX_SUB: &str = "sub_";
/// Pseudo-symbol prefix for data addresses referenced by address or immediate operands.
pub const PREFIX_OFF: &str = "off_";
/// Pseudo-symbol prefix for data addresses referenced by memory or pointer operands.
pub const PREFIX_UNK: &str = "unk_";
/// Pseudo-symbol prefix for local jump labels.
pub const PREFIX_LOC: &str = "loc_";

/// All pseudo-symbol prefixes the token comparator may skip over.
pub const UNKNOWN_SYMBOL_PREFIXES: [&str; 4] = [PREFIX_SUB, PREFIX_OFF, PREFIX_UNK, PREFIX_LOC];

/// Textual style used when formatting disassembled instructions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AsmFormat {
    /// Intel syntax, GNU assembler compatible.
    Igas,
    /// AT&T syntax.
    Agas,
    /// Intel MASM syntax.
    Masm,
    #[default]
    Default,
}

/// Parses a format name, defaulting to [AsmFormat::Default] for unrecognized input.
pub fn to_asm_format(str: &str) -> AsmFormat {
    if str.eq_ignore_ascii_case("igas") {
        AsmFormat::Igas
    } else if str.eq_ignore_ascii_case("agas") {
        AsmFormat::Agas
    } else if str.eq_ignore_ascii_case("masm") {
        AsmFormat::Masm
    } else if str.eq_ignore_ascii_case("default") {
        AsmFormat::Default
    } else {
        log::warn!("unrecognized asm format '{str}', defaulting to 'default'");
        AsmFormat::Default
    }
}

/// Legal maximum length of an x86 instruction in bytes.
pub const MAX_INSTRUCTION_BYTES: usize = 15;

/// Raw instruction bytes kept inline, without a heap allocation per instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstructionBytes {
    elements: [u8; MAX_INSTRUCTION_BYTES],
    size: u8,
}

impl InstructionBytes {
    pub fn set(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= MAX_INSTRUCTION_BYTES);
        let size = bytes.len().min(MAX_INSTRUCTION_BYTES);
        self.elements[..size].copy_from_slice(&bytes[..size]);
        self.size = size as u8;
    }

    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.elements[..self.size as usize]
    }
}

/// A single disassembled instruction with address symbol substitution applied to its text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsmInstruction {
    /// Position of the instruction within the executable.
    pub address: u64,
    pub bytes: InstructionBytes,
    /// Instruction mnemonic and operands. Is not expected empty when valid.
    pub text: String,
    /// Instruction is a jump within the function it belongs to.
    pub is_jump: bool,
    /// Instruction has a symbol at its address. Is jumped to or called.
    pub is_symbol: bool,
    /// Instruction was not decoded or formatted correctly.
    pub is_invalid: bool,
    /// This instruction is the first one that corresponds to its line number.
    pub is_first_line: bool,
    /// Jump length in bytes. Valid when `is_jump` is set.
    pub jump_len: i32,
    /// Line number in the source file, if known. Zero means no line information.
    pub line_number: u16,
}

impl AsmInstruction {
    pub fn set_bytes(&mut self, bytes: &[u8]) {
        self.bytes.set(bytes);
    }
}

/// A named address inside a function, shown as `label:` in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmLabel {
    pub label: String,
    pub address: u64,
}

/// Returns the number of instructions between two instruction addresses, or None when either
/// address does not start an instruction.
pub fn get_instruction_distance(
    instructions: &[AsmInstruction],
    address1: u64,
    address2: u64,
) -> Option<isize> {
    let index1 = instructions
        .binary_search_by_key(&address1, |instruction| instruction.address)
        .ok()?;
    let index2 = instructions
        .binary_search_by_key(&address2, |instruction| instruction.address)
        .ok()?;
    Some(index2 as isize - index1 as isize)
}

/// Maximum number of words an instruction text splits into: the mnemonic plus up to three
/// operands. The 16-bit mismatch bitmaps leave room for more.
pub const MAX_INSTRUCTION_WORDS: usize = 4;

/// Views into an instruction text, split into mnemonic and operand words.
///
/// `mov dword ptr [eax], 0x10` becomes `{"mov", "dword ptr [eax]", "0x10"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionTextArray<'a> {
    words: [&'a str; MAX_INSTRUCTION_WORDS],
    size: usize,
}

impl<'a> InstructionTextArray<'a> {
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn words(&self) -> &[&'a str] {
        &self.words[..self.size]
    }

    fn push(&mut self, word: &'a str) {
        debug_assert!(self.size < MAX_INSTRUCTION_WORDS);
        debug_assert!(!word.is_empty());
        self.words[self.size] = word;
        self.size += 1;
    }
}

impl<'a> std::ops::Index<usize> for InstructionTextArray<'a> {
    type Output = &'a str;

    fn index(&self, index: usize) -> &Self::Output {
        debug_assert!(index < self.size);
        &self.words[index]
    }
}

/// Splits instruction text into an array of word views.
///
/// The mnemonic is separated by the first space, operands by commas at the top level. Separators
/// inside double-quoted symbol names are ignored and spaces following a comma are skipped. Once
/// the word limit is reached, the remaining text stays attached to the last word.
pub fn split_instruction_text(text: &str) -> InstructionTextArray<'_> {
    let mut arr = InstructionTextArray::default();
    if text.is_empty() {
        return arr;
    }

    let bytes = text.as_bytes();
    let mut word_separator = b' ';
    let mut in_quote = false;
    let mut word_begin = 0;
    let mut c = 0;

    while c < bytes.len() {
        if bytes[c] == b'"' {
            // Does not look for separators inside quoted text.
            in_quote = !in_quote;
        } else if !in_quote && bytes[c] == word_separator && arr.len() < MAX_INSTRUCTION_WORDS - 1
        {
            arr.push(&text[word_begin..c]);
            // Change word separator for operands.
            word_separator = b',';
            // Skip separator and spaces between operands.
            c += 1;
            while c < bytes.len() && bytes[c] == b' ' {
                c += 1;
            }
            word_begin = c;
            continue;
        }
        c += 1;
    }

    arr.push(&text[word_begin..]);
    arr
}
