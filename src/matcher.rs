//! Aligns and classifies the disassembly of two matched functions.

use crate::comparison::{
    mismatch_reason, AsmComparisonRecord, AsmComparisonResult, AsmInstructionPair, AsmLabelPair,
    AsmMismatchInfo,
};
use crate::function::Function;
use crate::instruction::{
    split_instruction_text, AsmInstruction, AsmLabel, InstructionTextArray, PREFIX_LOC,
    UNKNOWN_SYMBOL_PREFIXES,
};

/// Lookahead bound that aligns typical compiler reorderings without quadratic blowup.
pub const DEFAULT_LOOKAHEAD_LIMIT: u32 = 20;

/// Compares two disassembled functions.
pub struct AsmMatcher;

impl AsmMatcher {
    /// Runs a comparison on the given function pair.
    ///
    /// Both functions must already be disassembled. The walk advances both sides in lockstep and,
    /// when the heads disagree, looks ahead up to `lookahead_limit` instructions alternating
    /// between the sides to find the next alignable instruction. The returned result borrows
    /// instructions and labels from both functions.
    pub fn run_comparison<'a>(
        function_pair: [&'a Function; 2],
        lookahead_limit: u32,
    ) -> AsmComparisonResult<'a> {
        let instructions0 = function_pair[0].get_instructions();
        let instructions1 = function_pair[1].get_instructions();
        debug_assert!(!instructions0.is_empty());
        debug_assert!(!instructions1.is_empty());

        // Create all instruction splits in advance to avoid redundant splits when visiting
        // instructions multiple times during lookahead.
        let arrays0 = split_instruction_texts(instructions0);
        let arrays1 = split_instruction_texts(instructions1);
        let empty_array = InstructionTextArray::default();

        let count0 = instructions0.len();
        let count1 = instructions1.len();
        let lookahead_limit = lookahead_limit as usize;
        let mut i0 = 0usize;
        let mut i1 = 0usize;

        let mut comparison = AsmComparisonResult::default();
        // Reserve for the very worst case.
        comparison.records.reserve(count0 + count1);

        while i0 < count0 || i1 < count1 {
            let array0 = if i0 < count0 { &arrays0[i0] } else { &empty_array };
            let array1 = if i1 < count1 { &arrays1[i1] } else { &empty_array };
            let instruction0 = instructions0.get(i0);
            let instruction1 = instructions1.get(i1);

            let mut mismatch_info =
                create_mismatch_info(instruction0, instruction1, Some(array0), Some(array1));

            // Lookahead on mismatch or maybe mismatch, perhaps there is a better match ahead.
            // No lookahead when the instruction is missing on one side.
            let do_lookahead = !mismatch_info.is_match()
                && (mismatch_info.mismatch_reasons & mismatch_reason::MISSING) == 0;

            if do_lookahead {
                debug_assert!(instruction0.is_some() && instruction1.is_some());

                // Lookahead takes turns on both sides. The first lookahead match determines the
                // side that skips ahead. A probe slot beyond a list end counts as a failed probe.
                let mut k0 = 1usize;
                let mut k1 = 0usize;

                while k0 < lookahead_limit && k1 < lookahead_limit {
                    if i0 + k0 >= count0 && i1 + k1 >= count1 {
                        break;
                    }
                    if k0 > k1 {
                        if i0 + k0 < count0 {
                            let lookahead_info = create_mismatch_info(
                                instructions0.get(i0 + k0),
                                instruction1,
                                Some(&arrays0[i0 + k0]),
                                Some(array1),
                            );
                            if lookahead_info.is_match() {
                                // The intervening instructions did not match anything on the
                                // opposite side.
                                for skipped in &instructions0[i0..i0 + k0] {
                                    let skipped_info =
                                        create_mismatch_info(Some(skipped), None, None, None);
                                    debug_assert!(skipped_info.is_mismatch());
                                    emit_record(
                                        &mut comparison,
                                        function_pair,
                                        [Some(skipped), None],
                                        skipped_info,
                                    );
                                }
                                mismatch_info = lookahead_info;
                                i0 += k0;
                                break;
                            }
                        }
                        k1 += 1;
                    } else {
                        if i1 + k1 < count1 {
                            let lookahead_info = create_mismatch_info(
                                instruction0,
                                instructions1.get(i1 + k1),
                                Some(array0),
                                Some(&arrays1[i1 + k1]),
                            );
                            if lookahead_info.is_match() {
                                for skipped in &instructions1[i1..i1 + k1] {
                                    let skipped_info =
                                        create_mismatch_info(None, Some(skipped), None, None);
                                    debug_assert!(skipped_info.is_mismatch());
                                    emit_record(
                                        &mut comparison,
                                        function_pair,
                                        [None, Some(skipped)],
                                        skipped_info,
                                    );
                                }
                                mismatch_info = lookahead_info;
                                i1 += k1;
                                break;
                            }
                        }
                        k0 += 1;
                    }
                }
            }

            let instruction0 = instructions0.get(i0);
            let instruction1 = instructions1.get(i1);
            debug_assert!(
                mismatch_info.is_mismatch() || (instruction0.is_some() && instruction1.is_some())
            );

            emit_record(
                &mut comparison,
                function_pair,
                [instruction0, instruction1],
                mismatch_info,
            );

            if instruction0.is_some() {
                i0 += 1;
            }
            if instruction1.is_some() {
                i1 += 1;
            }
        }

        let instruction_count = comparison.get_instruction_count() as usize;
        debug_assert!(instruction_count >= count0.max(count1));
        debug_assert!(instruction_count <= count0 + count1);
        debug_assert!(
            comparison.symbol_count
                >= function_pair[0]
                    .get_symbol_count()
                    .max(function_pair[1].get_symbol_count())
        );

        comparison
    }
}

/// Pushes an instruction pair record, preceded by a label pair record when either side starts at
/// a labelled address, and updates the counters.
fn emit_record<'a>(
    comparison: &mut AsmComparisonResult<'a>,
    function_pair: [&'a Function; 2],
    pair: [Option<&'a AsmInstruction>; 2],
    mismatch_info: AsmMismatchInfo,
) {
    let labels = [
        label_for(function_pair[0], pair[0]),
        label_for(function_pair[1], pair[1]),
    ];
    if labels.iter().any(Option::is_some) {
        comparison
            .records
            .push(AsmComparisonRecord::Label(AsmLabelPair { pair: labels }));
    }

    if pair
        .iter()
        .any(|instruction| instruction.map(|instruction| instruction.is_symbol).unwrap_or(false))
    {
        comparison.symbol_count += 1;
    }

    if mismatch_info.is_match() {
        comparison.match_count += 1;
    } else if mismatch_info.is_maybe_match() {
        comparison.maybe_match_count += 1;
    } else {
        comparison.mismatch_count += 1;
    }

    comparison
        .records
        .push(AsmComparisonRecord::Instruction(AsmInstructionPair {
            pair,
            mismatch_info,
        }));
}

fn label_for<'a>(
    function: &'a Function,
    instruction: Option<&'a AsmInstruction>,
) -> Option<&'a AsmLabel> {
    let instruction = instruction?;
    if !instruction.is_symbol {
        return None;
    }
    function.get_label(instruction.address)
}

/// Computes the verdict for a pair of instructions. Passing pre-split arrays is optional, but
/// recommended for performance.
fn create_mismatch_info(
    instruction0: Option<&AsmInstruction>,
    instruction1: Option<&AsmInstruction>,
    array0: Option<&InstructionTextArray>,
    array1: Option<&InstructionTextArray>,
) -> AsmMismatchInfo {
    debug_assert!(instruction0.is_some() || instruction1.is_some());

    let mut mismatch_info = AsmMismatchInfo::default();

    match (instruction0, instruction1) {
        (None, _) => {
            mismatch_info.mismatch_reasons |= mismatch_reason::MISSING_LEFT;
        }
        (_, None) => {
            mismatch_info.mismatch_reasons |= mismatch_reason::MISSING_RIGHT;
        }
        (Some(instruction0), Some(instruction1))
            if instruction0.is_invalid != instruction1.is_invalid =>
        {
            if instruction0.is_invalid {
                mismatch_info.mismatch_reasons |= mismatch_reason::INVALID_LEFT;
            } else {
                mismatch_info.mismatch_reasons |= mismatch_reason::INVALID_RIGHT;
            }
        }
        (Some(instruction0), Some(instruction1)) => {
            mismatch_info = match (array0, array1) {
                (Some(array0), Some(array1)) => compare_asm_text(array0, array1),
                _ => compare_asm_text(
                    &split_instruction_text(&instruction0.text),
                    &split_instruction_text(&instruction1.text),
                ),
            };
            if has_jump_len_mismatch(instruction0, instruction1) {
                mismatch_info.mismatch_reasons |= mismatch_reason::JUMP_LEN;
            }
        }
    }

    mismatch_info
}

fn has_jump_len_mismatch(instruction0: &AsmInstruction, instruction1: &AsmInstruction) -> bool {
    instruction0.is_jump && instruction1.is_jump && instruction0.jump_len != instruction1.jump_len
}

/// Word-by-word, byte-by-byte comparison with symbol awareness.
///
/// All symbols, including pseudo symbols, are expected to be enclosed by double quotes.
fn compare_asm_text(array0: &InstructionTextArray, array1: &InstructionTextArray) -> AsmMismatchInfo {
    let mut result = AsmMismatchInfo::default();
    let mut i = 0;

    while i < array0.len() && i < array1.len() {
        let word0 = array0[i].as_bytes();
        let word1 = array1[i].as_bytes();
        let mut c0 = 0usize;
        let mut c1 = 0usize;
        let mut in_quote: i32 = -1;

        while c0 < word0.len() && c1 < word1.len() {
            if word0[c0] == b'"' && word1[c1] == b'"' {
                // Both sides are entering or leaving a quoted symbol name.
                in_quote = if in_quote < 0 { 0 } else { -1 };
                c0 += 1;
                c1 += 1;
                continue;
            } else if in_quote >= 0 {
                in_quote += 1;
            }

            if in_quote == 1 {
                // First character inside the quotes. Skip ahead unknown symbols, such as
                // "unk_12a0".
                let skip0 = skip_unknown_symbol(&word0[c0..]);
                let skip1 = skip_unknown_symbol(&word1[c1..]);
                let mut end0 = skip0.end;
                let mut end1 = skip1.end;
                let mut skipped0 = skip0.prefix.is_some();
                let mut skipped1 = skip1.prefix.is_some();

                if skipped0 && skipped1 && skip0.prefix != skip1.prefix {
                    // Abort skipping when the prefix labels differ somehow.
                    skipped0 = false;
                    skipped1 = false;
                }

                // When one side skipped an unknown symbol, skip the other symbol as well.
                if skipped0 && !skipped1 {
                    end1 = skip_known_symbol(&word1[c1..]);
                    skipped1 = true;
                } else if !skipped0 && skipped1 {
                    end0 = skip_known_symbol(&word0[c0..]);
                    skipped0 = true;
                }

                // A loc_ prefix on just one side certainly is no match. Jump labels pair with
                // jump labels only.
                if (skip0.prefix == Some(PREFIX_LOC) || skip1.prefix == Some(PREFIX_LOC))
                    && skip0.prefix != skip1.prefix
                {
                    skipped0 = false;
                    skipped1 = false;
                }

                if skipped0 && skipped1 {
                    // At least one symbol was skipped; this quote is done.
                    c0 += end0;
                    c1 += end1;
                    if skip0.prefix != Some(PREFIX_LOC) {
                        // Never flag the loc_ prefix, which is intended for jump labels.
                        result.maybe_mismatch_bits |= 1 << i;
                    }
                    in_quote = -1;
                    c0 += 1;
                    c1 += 1;
                    continue;
                }
            }

            if word0[c0] != word1[c1] {
                // This word is mismatching.
                result.mismatch_bits |= 1 << i;
                break;
            }
            c0 += 1;
            c1 += 1;
        }
        i += 1;
    }

    // All left over words on either side are mismatches.
    while i < array0.len() || i < array1.len() {
        result.mismatch_bits |= 1 << i;
        i += 1;
    }

    debug_assert_eq!(result.mismatch_bits & result.maybe_mismatch_bits, 0);
    result
}

struct SkipSymbol {
    /// Offset of the closing quote relative to the scanned slice, when a prefix matched.
    end: usize,
    prefix: Option<&'static str>,
}

/// Detects an unknown-form symbol (`sub_`/`off_`/`unk_`/`loc_` prefix, case-insensitive) and
/// returns the span up to the closing quote.
fn skip_unknown_symbol(str: &[u8]) -> SkipSymbol {
    for prefix in UNKNOWN_SYMBOL_PREFIXES {
        if str.len() >= prefix.len() && str[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
        {
            let mut end = prefix.len();
            while end < str.len() && str[end] != b'"' {
                end += 1;
            }
            return SkipSymbol {
                end,
                prefix: Some(prefix),
            };
        }
    }
    SkipSymbol { end: 0, prefix: None }
}

/// Returns the offset of the closing quote, or the slice end.
fn skip_known_symbol(str: &[u8]) -> usize {
    let mut end = 0;
    while end < str.len() && str[end] != b'"' {
        end += 1;
    }
    end
}

fn split_instruction_texts(instructions: &[AsmInstruction]) -> Vec<InstructionTextArray<'_>> {
    instructions
        .iter()
        .map(|instruction| split_instruction_text(&instruction.text))
        .collect()
}
