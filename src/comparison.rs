//! Types carrying the outcome of an instruction-level function comparison.

use crate::function::Function;
use crate::instruction::{AsmInstruction, AsmLabel};
use crate::IndexT;

/// One of the two executables of a comparison.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Classification policy deciding how symbol-form ambiguity counts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum AsmMatchStrictness {
    /// Unknown to known/unknown symbol pairs are treated as match.
    Lenient,
    /// Unknown to known/unknown symbol pairs are treated as undecided, maybe match or mismatch.
    #[default]
    Undecided,
    /// Unknown to known/unknown symbol pairs are treated as mismatch.
    Strict,
}

/// Parses a strictness name, defaulting to [AsmMatchStrictness::Undecided].
pub fn to_asm_match_strictness(str: &str) -> AsmMatchStrictness {
    if str.eq_ignore_ascii_case("lenient") {
        AsmMatchStrictness::Lenient
    } else if str.eq_ignore_ascii_case("undecided") {
        AsmMatchStrictness::Undecided
    } else if str.eq_ignore_ascii_case("strict") {
        AsmMatchStrictness::Strict
    } else {
        log::warn!("unrecognized match strictness '{str}', defaulting to 'undecided'");
        AsmMatchStrictness::Undecided
    }
}

/// Per-record verdict after applying a strictness policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsmMatchValue {
    Match,
    /// Could be a match or mismatch; only symbol-form ambiguity differs.
    MaybeMatch,
    Mismatch,
}

/// Extended verdict distinguishing which side is missing an instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsmMatchValueEx {
    Match,
    MaybeMatch,
    Mismatch,
    MissingLeft,
    MissingRight,
}

/// Reason bits recorded alongside the token bitmaps.
pub mod mismatch_reason {
    /// Jump length is different.
    pub const JUMP_LEN: u16 = 1 << 0;
    /// Instruction is missing on the left side.
    pub const MISSING_LEFT: u16 = 1 << 1;
    /// Instruction is missing on the right side.
    pub const MISSING_RIGHT: u16 = 1 << 2;
    pub const MISSING: u16 = MISSING_LEFT | MISSING_RIGHT;
    /// Instruction is invalid on the left side.
    pub const INVALID_LEFT: u16 = 1 << 3;
    /// Instruction is invalid on the right side.
    pub const INVALID_RIGHT: u16 = 1 << 4;
    pub const INVALID: u16 = INVALID_LEFT | INVALID_RIGHT;
}

/// Packed verdict for one aligned instruction pair.
///
/// Bit `i` of the bitmaps refers to word `i` of the pre-split instruction text. The two bitmaps
/// are mutually exclusive.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AsmMismatchInfo {
    /// Bit positions where instruction words are mismatching.
    pub mismatch_bits: u16,
    /// Bit positions where instruction words are maybe mismatching.
    pub maybe_mismatch_bits: u16,
    pub mismatch_reasons: u16,
}

impl AsmMismatchInfo {
    pub fn is_match(&self) -> bool {
        self.mismatch_bits == 0 && self.maybe_mismatch_bits == 0 && self.mismatch_reasons == 0
    }

    pub fn is_mismatch(&self) -> bool {
        self.mismatch_bits != 0 || self.mismatch_reasons != 0
    }

    pub fn is_maybe_match(&self) -> bool {
        self.mismatch_bits == 0 && self.maybe_mismatch_bits != 0 && self.mismatch_reasons == 0
    }

    /// Opposite wording, but same meaning.
    pub fn is_maybe_mismatch(&self) -> bool {
        self.is_maybe_match()
    }

    pub fn get_match_value(&self, strictness: AsmMatchStrictness) -> AsmMatchValue {
        match strictness {
            AsmMatchStrictness::Lenient => {
                if self.mismatch_bits == 0 && self.mismatch_reasons == 0 {
                    AsmMatchValue::Match
                } else {
                    AsmMatchValue::Mismatch
                }
            }
            AsmMatchStrictness::Undecided => {
                if self.is_match() {
                    AsmMatchValue::Match
                } else if self.maybe_mismatch_bits != 0 {
                    AsmMatchValue::MaybeMatch
                } else {
                    AsmMatchValue::Mismatch
                }
            }
            AsmMatchStrictness::Strict => {
                if self.is_match() {
                    AsmMatchValue::Match
                } else {
                    AsmMatchValue::Mismatch
                }
            }
        }
    }

    pub fn get_match_value_ex(&self, strictness: AsmMatchStrictness) -> AsmMatchValueEx {
        match self.get_match_value(strictness) {
            AsmMatchValue::Match => AsmMatchValueEx::Match,
            AsmMatchValue::MaybeMatch => AsmMatchValueEx::MaybeMatch,
            AsmMatchValue::Mismatch => {
                if self.mismatch_reasons & mismatch_reason::MISSING_LEFT != 0 {
                    AsmMatchValueEx::MissingLeft
                } else if self.mismatch_reasons & mismatch_reason::MISSING_RIGHT != 0 {
                    AsmMatchValueEx::MissingRight
                } else {
                    AsmMatchValueEx::Mismatch
                }
            }
        }
    }
}

/// A pair of corresponding labels. One side can be absent.
#[derive(Debug, Clone, Copy)]
pub struct AsmLabelPair<'a> {
    pub pair: [Option<&'a AsmLabel>; 2],
}

/// A pair of corresponding instructions with their verdict. One side can be absent.
#[derive(Debug, Clone, Copy)]
pub struct AsmInstructionPair<'a> {
    pub pair: [Option<&'a AsmInstruction>; 2],
    pub mismatch_info: AsmMismatchInfo,
}

/// One aligned row of a comparison. Rows borrow from the two compared [Function]s, which must
/// outlive the comparison result.
#[derive(Debug, Clone, Copy)]
pub enum AsmComparisonRecord<'a> {
    Label(AsmLabelPair<'a>),
    Instruction(AsmInstructionPair<'a>),
}

impl<'a> AsmComparisonRecord<'a> {
    pub fn as_instruction_pair(&self) -> Option<&AsmInstructionPair<'a>> {
        match self {
            AsmComparisonRecord::Instruction(pair) => Some(pair),
            AsmComparisonRecord::Label(_) => None,
        }
    }

    /// Bit mask of the sides whose instruction starts at a symbol.
    pub fn symbol_sides(&self) -> u8 {
        let mut bits = 0;
        if let AsmComparisonRecord::Instruction(record) = self {
            for (side, instruction) in record.pair.iter().enumerate() {
                if instruction.map(|instruction| instruction.is_symbol).unwrap_or(false) {
                    bits |= 1 << side;
                }
            }
        }
        bits
    }
}

/// The aligned record sequence and tallies for one compared function pair.
#[derive(Debug, Clone, Default)]
pub struct AsmComparisonResult<'a> {
    pub records: Vec<AsmComparisonRecord<'a>>,
    /// Number of instruction records that contain at least one symbol.
    pub symbol_count: u32,
    pub match_count: u32,
    /// Alias maybe mismatch, could be a match or mismatch.
    pub maybe_match_count: u32,
    pub mismatch_count: u32,
}

impl<'a> AsmComparisonResult<'a> {
    pub fn get_instruction_count(&self) -> u32 {
        self.match_count + self.maybe_match_count + self.mismatch_count
    }

    pub fn get_match_count(&self, strictness: AsmMatchStrictness) -> u32 {
        match strictness {
            AsmMatchStrictness::Lenient => self.match_count + self.maybe_match_count,
            AsmMatchStrictness::Undecided | AsmMatchStrictness::Strict => self.match_count,
        }
    }

    pub fn get_max_match_count(&self, strictness: AsmMatchStrictness) -> u32 {
        match strictness {
            AsmMatchStrictness::Lenient | AsmMatchStrictness::Undecided => {
                self.match_count + self.maybe_match_count
            }
            AsmMatchStrictness::Strict => self.match_count,
        }
    }

    pub fn get_mismatch_count(&self, strictness: AsmMatchStrictness) -> u32 {
        match strictness {
            AsmMatchStrictness::Lenient | AsmMatchStrictness::Undecided => self.mismatch_count,
            AsmMatchStrictness::Strict => self.mismatch_count + self.maybe_match_count,
        }
    }

    pub fn get_max_mismatch_count(&self, strictness: AsmMatchStrictness) -> u32 {
        match strictness {
            AsmMatchStrictness::Lenient => self.mismatch_count,
            AsmMatchStrictness::Undecided | AsmMatchStrictness::Strict => {
                self.mismatch_count + self.maybe_match_count
            }
        }
    }

    /// Returns 0..1.
    pub fn get_similarity(&self, strictness: AsmMatchStrictness) -> f32 {
        self.get_match_count(strictness) as f32 / self.get_instruction_count() as f32
    }

    /// Returns 0..1.
    pub fn get_max_similarity(&self, strictness: AsmMatchStrictness) -> f32 {
        self.get_max_match_count(strictness) as f32 / self.get_instruction_count() as f32
    }

    /// Returns 0..100.
    pub fn get_similarity_as_int(&self, strictness: AsmMatchStrictness) -> u8 {
        (self.get_match_count(strictness) * 100 / self.get_instruction_count()) as u8
    }

    /// Returns 0..100.
    pub fn get_max_similarity_as_int(&self, strictness: AsmMatchStrictness) -> u8 {
        (self.get_max_match_count(strictness) * 100 / self.get_instruction_count()) as u8
    }
}

/// Number of records between two instruction addresses on one side, or None when either address
/// is not present. Linear search, because records can have absent sides.
pub fn get_record_distance(
    records: &[AsmComparisonRecord<'_>],
    side: Side,
    address1: u64,
    address2: u64,
) -> Option<isize> {
    let position = |address: u64| {
        records.iter().position(|record| {
            record
                .as_instruction_pair()
                .and_then(|pair| pair.pair[side.index()])
                .map(|instruction| instruction.address == address)
                .unwrap_or(false)
        })
    };
    let index1 = position(address1)?;
    let index2 = position(address2)?;
    Some(index2 as isize - index1 as isize)
}

/// A function known by name in one executable.
#[derive(Debug, Default)]
pub struct NamedFunction {
    pub name: String,
    pub function: Function,
}

impl NamedFunction {
    pub fn new(name: impl Into<String>, function: Function) -> Self {
        Self {
            name: name.into(),
            function,
        }
    }

    pub fn is_disassembled(&self) -> bool {
        !self.function.get_instructions().is_empty()
    }
}

pub const INVALID_INDEX: IndexT = IndexT::MAX;

/// Links a named function to the matched function it participates in, if any.
#[derive(Debug, Copy, Clone)]
pub struct NamedFunctionMatchInfo {
    pub matched_index: IndexT,
}

impl Default for NamedFunctionMatchInfo {
    fn default() -> Self {
        Self {
            matched_index: INVALID_INDEX,
        }
    }
}

impl NamedFunctionMatchInfo {
    pub fn is_matched(&self) -> bool {
        self.matched_index != INVALID_INDEX
    }
}

/// Pairs a function from two executables that can be compared.
#[derive(Debug, Copy, Clone)]
pub struct MatchedFunction {
    /// Links to the named functions of both sides.
    pub named_idx_pair: [IndexT; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_value_per_strictness() {
        let maybe = AsmMismatchInfo {
            maybe_mismatch_bits: 1 << 1,
            ..Default::default()
        };
        assert_eq!(maybe.get_match_value(AsmMatchStrictness::Lenient), AsmMatchValue::Match);
        assert_eq!(
            maybe.get_match_value(AsmMatchStrictness::Undecided),
            AsmMatchValue::MaybeMatch
        );
        assert_eq!(maybe.get_match_value(AsmMatchStrictness::Strict), AsmMatchValue::Mismatch);

        let hard = AsmMismatchInfo {
            mismatch_bits: 1,
            ..Default::default()
        };
        for strictness in [
            AsmMatchStrictness::Lenient,
            AsmMatchStrictness::Undecided,
            AsmMatchStrictness::Strict,
        ] {
            assert_eq!(hard.get_match_value(strictness), AsmMatchValue::Mismatch);
        }
    }

    #[test]
    fn test_match_value_ex_missing_sides() {
        let missing_left = AsmMismatchInfo {
            mismatch_reasons: mismatch_reason::MISSING_LEFT,
            ..Default::default()
        };
        assert_eq!(
            missing_left.get_match_value_ex(AsmMatchStrictness::Undecided),
            AsmMatchValueEx::MissingLeft
        );

        let missing_right = AsmMismatchInfo {
            mismatch_reasons: mismatch_reason::MISSING_RIGHT,
            ..Default::default()
        };
        assert_eq!(
            missing_right.get_match_value_ex(AsmMatchStrictness::Undecided),
            AsmMatchValueEx::MissingRight
        );
    }

    #[test]
    fn test_jump_len_reason_is_mismatch_under_lenient() {
        let info = AsmMismatchInfo {
            mismatch_reasons: mismatch_reason::JUMP_LEN,
            ..Default::default()
        };
        assert!(info.is_mismatch());
        assert_eq!(info.get_match_value(AsmMatchStrictness::Lenient), AsmMatchValue::Mismatch);
    }

    #[test]
    fn test_counts_and_similarity() {
        let result = AsmComparisonResult {
            records: Vec::new(),
            symbol_count: 0,
            match_count: 6,
            maybe_match_count: 2,
            mismatch_count: 2,
        };
        assert_eq!(result.get_instruction_count(), 10);
        assert_eq!(result.get_match_count(AsmMatchStrictness::Lenient), 8);
        assert_eq!(result.get_match_count(AsmMatchStrictness::Undecided), 6);
        assert_eq!(result.get_mismatch_count(AsmMatchStrictness::Strict), 4);
        assert_eq!(result.get_similarity_as_int(AsmMatchStrictness::Lenient), 80);
        assert_eq!(result.get_similarity_as_int(AsmMatchStrictness::Undecided), 60);
        assert_eq!(result.get_max_similarity_as_int(AsmMatchStrictness::Undecided), 80);
        assert!((result.get_similarity(AsmMatchStrictness::Lenient) - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Left.opposite(), Side::Right);
        assert_eq!(Side::Right.opposite(), Side::Left);
    }
}
