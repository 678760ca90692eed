use asmdiff::bundle::{build_bundles, match_functions_by_name, MatchBundleType, BUILD_BUNDLE_FLAGS_ALL};
use asmdiff::comparison::{
    mismatch_reason, AsmComparisonRecord, AsmComparisonResult, AsmMatchStrictness, Side,
};
use asmdiff::executable::{ExeSectionInfo, ExeSectionType, Executable};
use asmdiff::function::{Function, FunctionSetup};
use asmdiff::harness::CompareHarness;
use asmdiff::instruction::AsmFormat;
use asmdiff::matcher::AsmMatcher;
use asmdiff::symbols::ExeSymbol;

const IMAGE_BASE: u64 = 0x400000;
const TEXT_BASE: u64 = 0x1000;

fn executable_with_code(code: &[u8]) -> Executable {
    let mut data = code.to_vec();
    data.resize(0x100, 0x90);

    let mut exe = Executable::new();
    exe.set_image_base(IMAGE_BASE);
    exe.add_section(ExeSectionInfo {
        name: ".text".into(),
        section_type: ExeSectionType::Code,
        address: TEXT_BASE,
        size: 0x100,
        data,
    });
    exe
}

fn disassemble(exe: &Executable, begin: u64, end: u64) -> Function {
    let setup = FunctionSetup::new(exe, AsmFormat::Default);
    let mut function = Function::new();
    function.disassemble(&setup, begin, end);
    function
}

fn disassemble_code(code: &str) -> Function {
    let code = hex::decode(code).unwrap();
    let exe = executable_with_code(&code);
    disassemble(&exe, TEXT_BASE, TEXT_BASE + code.len() as u64)
}

fn instruction_pairs<'a, 'r>(
    result: &'r AsmComparisonResult<'a>,
) -> Vec<&'r asmdiff::comparison::AsmInstructionPair<'a>> {
    result
        .records
        .iter()
        .filter_map(|record| record.as_instruction_pair())
        .collect()
}

fn check_result_invariants(result: &AsmComparisonResult, len0: usize, len1: usize) {
    let instruction_records = instruction_pairs(result).len() as u32;
    assert_eq!(
        result.match_count + result.maybe_match_count + result.mismatch_count,
        instruction_records
    );
    assert!(instruction_records as usize >= len0.max(len1));
    assert!(instruction_records as usize <= len0 + len1);
    assert!(result.symbol_count <= result.records.len() as u32);

    for pair in instruction_pairs(result) {
        assert!(pair.pair[0].is_some() || pair.pair[1].is_some());
        assert_eq!(
            pair.mismatch_info.mismatch_bits & pair.mismatch_info.maybe_mismatch_bits,
            0
        );
    }
}

#[test]
fn test_identical_functions_match_fully() {
    // nop; nop; ret on both sides.
    let left = disassemble_code("9090c3");
    let right = disassemble_code("9090c3");

    let result = AsmMatcher::run_comparison([&left, &right], 4);
    assert_eq!(result.match_count, 3);
    assert_eq!(result.maybe_match_count, 0);
    assert_eq!(result.mismatch_count, 0);
    assert_eq!(result.get_similarity_as_int(AsmMatchStrictness::Lenient), 100);
    assert_eq!(result.records.len(), 3);

    for record in &result.records {
        let pair = record.as_instruction_pair().unwrap();
        assert!(pair.pair[0].is_some() && pair.pair[1].is_some());
        assert_eq!(pair.mismatch_info, Default::default());
    }
    check_result_invariants(&result, 3, 3);
}

#[test]
fn test_self_comparison_is_all_match() {
    // A function with an internal jump compares with itself as a full match; the loc_ labels
    // are identical and the jump lengths agree.
    let function = disassemble_code("55740231c05dc3");

    let result = AsmMatcher::run_comparison([&function, &function], 4);
    assert_eq!(result.mismatch_count, 0);
    assert_eq!(result.maybe_match_count, 0);
    assert_eq!(result.match_count, function.get_instructions().len() as u32);
    assert!((result.get_similarity(AsmMatchStrictness::Lenient) - 1.0).abs() < f32::EPSILON);
    check_result_invariants(
        &result,
        function.get_instructions().len(),
        function.get_instructions().len(),
    );
}

#[test]
fn test_comparison_is_deterministic() {
    let left = disassemble_code("55740231c05dc3");
    let right = disassemble_code("5589e531c05dc3");

    let first = AsmMatcher::run_comparison([&left, &right], 4);
    let second = AsmMatcher::run_comparison([&left, &right], 4);
    assert_eq!(first.match_count, second.match_count);
    assert_eq!(first.maybe_match_count, second.maybe_match_count);
    assert_eq!(first.mismatch_count, second.mismatch_count);
    assert_eq!(first.records.len(), second.records.len());
}

#[test]
fn test_renamed_global_mismatches() {
    // call <out-of-function target>; ret, with differently named symbols at the target.
    let code = hex::decode("e8dbffffffc3").unwrap();
    let mut data = vec![0x90u8; 0x100];
    data[0x20..0x20 + code.len()].copy_from_slice(&code);

    let build = |name: &str| {
        let mut exe = Executable::new();
        exe.set_image_base(IMAGE_BASE);
        exe.add_section(ExeSectionInfo {
            name: ".text".into(),
            section_type: ExeSectionType::Code,
            address: TEXT_BASE,
            size: 0x100,
            data: data.clone(),
        });
        exe.add_symbol(ExeSymbol::new(name, TEXT_BASE, 0x10), false);
        disassemble(&exe, 0x1020, 0x1026)
    };

    let left = build("ExportedFoo");
    let right = build("ExportedBar");
    assert!(left.get_instructions()[0].text.contains("\"ExportedFoo\""));

    let result = AsmMatcher::run_comparison([&left, &right], 4);
    assert_eq!(result.mismatch_count, 1);
    assert_eq!(result.match_count, 1);
    assert_eq!(result.maybe_match_count, 0);

    let pairs = instruction_pairs(&result);
    assert_eq!(pairs[0].mismatch_info.mismatch_bits, 1 << 1);
    check_result_invariants(&result, 2, 2);
}

#[test]
fn test_known_vs_pseudo_is_maybe_match() {
    // The left side has no symbol at the call target and formats sub_401000; the right side
    // resolves a real name. One quoted symbol skips, the other is force-skipped.
    let code = hex::decode("e8dbffffffc3").unwrap();
    let mut data = vec![0x90u8; 0x100];
    data[0x20..0x20 + code.len()].copy_from_slice(&code);

    let build = |symbol: Option<&str>| {
        let mut exe = Executable::new();
        exe.set_image_base(IMAGE_BASE);
        exe.add_section(ExeSectionInfo {
            name: ".text".into(),
            section_type: ExeSectionType::Code,
            address: TEXT_BASE,
            size: 0x100,
            data: data.clone(),
        });
        if let Some(name) = symbol {
            exe.add_symbol(ExeSymbol::new(name, TEXT_BASE, 0x10), false);
        }
        disassemble(&exe, 0x1020, 0x1026)
    };

    let left = build(None);
    let right = build(Some("RealName"));
    assert!(left.get_instructions()[0].text.contains("\"sub_401000\""));
    assert!(right.get_instructions()[0].text.contains("\"RealName\""));

    let result = AsmMatcher::run_comparison([&left, &right], 4);
    assert_eq!(result.maybe_match_count, 1);
    assert_eq!(result.match_count, 1);
    assert_eq!(result.mismatch_count, 0);

    let pairs = instruction_pairs(&result);
    assert_eq!(pairs[0].mismatch_info.maybe_mismatch_bits, 1 << 1);
    assert_eq!(pairs[0].mismatch_info.mismatch_bits, 0);

    // Lenient reads the pair as a match, strict as a mismatch.
    assert_eq!(result.get_match_count(AsmMatchStrictness::Lenient), 2);
    assert_eq!(result.get_match_count(AsmMatchStrictness::Strict), 1);
    assert_eq!(result.get_mismatch_count(AsmMatchStrictness::Strict), 1);
    assert_eq!(result.get_similarity_as_int(AsmMatchStrictness::Lenient), 100);
    check_result_invariants(&result, 2, 2);
}

#[test]
fn test_extra_instruction_is_bridged_by_lookahead() {
    // Left: mov eax, 0x1; ret. Right: mov eax, 0x1; nop; ret. The aligner inserts one record
    // with a missing left side between the two matching pairs.
    let left = disassemble_code("b801000000c3");
    let right = disassemble_code("b80100000090c3");

    let result = AsmMatcher::run_comparison([&left, &right], 4);
    assert_eq!(result.match_count, 2);
    assert_eq!(result.mismatch_count, 1);
    assert_eq!(result.maybe_match_count, 0);

    let pairs = instruction_pairs(&result);
    assert_eq!(pairs.len(), 3);
    assert!(pairs[0].mismatch_info.is_match());
    assert!(pairs[1].pair[0].is_none());
    assert_eq!(
        pairs[1].mismatch_info.mismatch_reasons & mismatch_reason::MISSING_LEFT,
        mismatch_reason::MISSING_LEFT
    );
    assert_eq!(pairs[1].pair[1].unwrap().text, "nop");
    assert!(pairs[2].mismatch_info.is_match());
    assert_eq!(pairs[2].pair[0].unwrap().text, "ret");
    check_result_invariants(&result, 2, 3);
}

#[test]
fn test_extra_instruction_on_left_side() {
    let left = disassemble_code("b80100000090c3");
    let right = disassemble_code("b801000000c3");

    let result = AsmMatcher::run_comparison([&left, &right], 4);
    assert_eq!(result.match_count, 2);
    assert_eq!(result.mismatch_count, 1);

    let pairs = instruction_pairs(&result);
    assert!(pairs[1].pair[1].is_none());
    assert_eq!(
        pairs[1].mismatch_info.mismatch_reasons & mismatch_reason::MISSING_RIGHT,
        mismatch_reason::MISSING_RIGHT
    );
    check_result_invariants(&result, 3, 2);
}

#[test]
fn test_changed_jump_length_mismatches() {
    // Both sides share the jump label form, but the jump spans differ: 4 bytes on the left,
    // 6 on the right.
    let left = disassemble_code("74029090c3");
    let right = disassemble_code("740490909090c3");

    assert_eq!(left.get_instructions()[0].jump_len, 4);
    assert_eq!(right.get_instructions()[0].jump_len, 6);

    let result = AsmMatcher::run_comparison([&left, &right], 8);
    let pairs = instruction_pairs(&result);

    let jump_pair = pairs[0];
    assert!(jump_pair.pair[0].is_some() && jump_pair.pair[1].is_some());
    assert_eq!(
        jump_pair.mismatch_info.mismatch_reasons & mismatch_reason::JUMP_LEN,
        mismatch_reason::JUMP_LEN
    );
    assert_eq!(jump_pair.mismatch_info.mismatch_bits, 0);
    assert_eq!(jump_pair.mismatch_info.maybe_mismatch_bits, 0);
    check_result_invariants(
        &result,
        left.get_instructions().len(),
        right.get_instructions().len(),
    );
}

#[test]
fn test_invalid_side_mismatches() {
    // The left head fails to decode while the right head is a nop.
    let left = disassemble_code("0f04c3");
    let right = disassemble_code("90c3");
    assert!(left.get_instructions()[0].is_invalid);

    let result = AsmMatcher::run_comparison([&left, &right], 4);
    let pairs = instruction_pairs(&result);
    assert_eq!(
        pairs[0].mismatch_info.mismatch_reasons & mismatch_reason::INVALID_LEFT,
        mismatch_reason::INVALID_LEFT
    );
    assert!(result.mismatch_count >= 1);
    check_result_invariants(
        &result,
        left.get_instructions().len(),
        right.get_instructions().len(),
    );
}

#[test]
fn test_label_rows_precede_labelled_instructions() {
    // Both sides carry a loc_ label for the jump target; the matcher emits a label pair row
    // before the labelled instruction pair.
    let left = disassemble_code("55740231c05dc3");
    let right = disassemble_code("55740231c05dc3");

    let result = AsmMatcher::run_comparison([&left, &right], 4);

    let label_rows = result
        .records
        .iter()
        .filter_map(|record| match record {
            AsmComparisonRecord::Label(pair) => Some(pair),
            AsmComparisonRecord::Instruction(_) => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(label_rows.len(), 1);
    assert_eq!(label_rows[0].pair[0].unwrap().label, "loc_1005");
    assert_eq!(label_rows[0].pair[1].unwrap().label, "loc_1005");
    assert_eq!(result.symbol_count, 1);

    // The label row sits directly before its instruction row.
    let label_position = result
        .records
        .iter()
        .position(|record| matches!(record, AsmComparisonRecord::Label(_)))
        .unwrap();
    let next = &result.records[label_position + 1];
    let pair = next.as_instruction_pair().unwrap();
    assert!(pair.pair[0].unwrap().is_symbol);
}

#[test]
fn test_harness_compares_functions_by_name() {
    // Two executables carrying the same two functions; one side has an extra nop in "second".
    let build = |second_body: &str| {
        let mut code = hex::decode("9090c3").unwrap();
        let second = hex::decode(second_body).unwrap();
        let second_size = second.len() as u64;
        code.extend_from_slice(&second);
        let mut exe = executable_with_code(&code);
        exe.add_symbol(ExeSymbol::new("first", TEXT_BASE, 3), false);
        exe.add_symbol(ExeSymbol::new("second", TEXT_BASE + 3, second_size), false);
        exe
    };

    let harness = CompareHarness::from_executables([
        build("b801000000c3"),
        build("b80100000090c3"),
    ]);

    let functions = harness.disassemble_function("first").unwrap();
    let result = harness.compare(&functions);
    assert_eq!(result.match_count, 3);
    assert_eq!(result.mismatch_count, 0);

    let functions = harness.disassemble_function("second").unwrap();
    let result = harness.compare(&functions);
    assert_eq!(result.match_count, 2);
    assert_eq!(result.mismatch_count, 1);

    assert!(harness.disassemble_function("missing").is_none());

    // All sized code symbols are picked up per side, in address order, and match by name.
    let left_named = harness.named_functions(Side::Left);
    let right_named = harness.named_functions(Side::Right);
    assert_eq!(left_named.len(), 2);
    assert_eq!(left_named[0].name, "first");
    assert_eq!(left_named[1].name, "second");
    assert!(left_named.iter().all(|named| named.is_disassembled()));

    let data = match_functions_by_name([&left_named, &right_named]);
    assert_eq!(data.matched_functions.len(), 2);

    let bundles = build_bundles(
        MatchBundleType::None,
        BUILD_BUNDLE_FLAGS_ALL,
        &left_named,
        &data.named_function_match_infos[0],
        None,
    );
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].matched_named_function_indices, vec![0, 1]);
}

#[test]
fn test_lookahead_limit_bounds_the_search() {
    // The shared tail lies beyond the lookahead limit, so nothing aligns.
    let left = disassemble_code("b801000000c3");
    let right = disassemble_code("b8010000009090909090c3");

    let result = AsmMatcher::run_comparison([&left, &right], 2);
    assert_eq!(result.match_count, 1);
    assert!(result.mismatch_count >= 1);
    check_result_invariants(
        &result,
        left.get_instructions().len(),
        right.get_instructions().len(),
    );
}
