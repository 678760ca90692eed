//! Groups matched functions into bundles by compiland, source file, or not at all.

use crate::comparison::{MatchedFunction, NamedFunction, NamedFunctionMatchInfo};
use crate::debug_info::DebugInfo;
use crate::IndexT;
use std::collections::HashMap;

/// Grouping key for function bundles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MatchBundleType {
    /// Functions are bundled by the compilands they belong to.
    Compiland,
    /// Functions are bundled by the source files they belong to.
    SourceFile,
    /// Functions are bundled into one.
    #[default]
    None,
}

/// Parses a bundle type name, defaulting to [MatchBundleType::None].
pub fn to_match_bundle_type(str: &str) -> MatchBundleType {
    if str.eq_ignore_ascii_case("compiland") {
        MatchBundleType::Compiland
    } else if str.eq_ignore_ascii_case("sourcefile") {
        MatchBundleType::SourceFile
    } else if str.eq_ignore_ascii_case("none") {
        MatchBundleType::None
    } else {
        log::warn!("unrecognized match bundle type '{str}', defaulting to 'none'");
        MatchBundleType::None
    }
}

pub type BuildBundleFlags = u8;

pub const BUILD_MATCHED_FUNCTION_INDICES: BuildBundleFlags = 1 << 0;
pub const BUILD_MATCHED_NAMED_FUNCTION_INDICES: BuildBundleFlags = 1 << 1;
pub const BUILD_UNMATCHED_NAMED_FUNCTION_INDICES: BuildBundleFlags = 1 << 2;
pub const BUILD_ALL_NAMED_FUNCTION_INDICES: BuildBundleFlags = 1 << 3;
pub const BUILD_BUNDLE_FLAGS_ALL: BuildBundleFlags = u8::MAX;

/// Function indices grouped under one compiland or source file name.
///
/// Which index lists are populated is controlled by the flags passed to [build_bundles].
#[derive(Debug, Clone, Default)]
pub struct NamedFunctionBundle {
    /// Compiland or source file name.
    pub name: String,
    /// Links to matched functions.
    pub matched_function_indices: Vec<IndexT>,
    /// Links to named functions. In sync with `matched_function_indices`.
    pub matched_named_function_indices: Vec<IndexT>,
    /// Links to named functions.
    pub unmatched_named_function_indices: Vec<IndexT>,
    /// Links to named functions. Contains matched and unmatched ones.
    pub all_named_function_indices: Vec<IndexT>,
    pub flags: BuildBundleFlags,
}

/// Matched functions plus the per-side back links from named functions.
#[derive(Debug, Default)]
pub struct MatchedFunctionsData {
    pub matched_functions: Vec<MatchedFunction>,
    pub named_function_match_infos: [Vec<NamedFunctionMatchInfo>; 2],
}

/// Pairs up functions bearing the same name in both executables.
///
/// Which functions pair up is decided here by name only; anything smarter is the caller's
/// business.
pub fn match_functions_by_name(
    named_functions_pair: [&[NamedFunction]; 2],
) -> MatchedFunctionsData {
    let mut data = MatchedFunctionsData {
        matched_functions: Vec::new(),
        named_function_match_infos: [
            vec![NamedFunctionMatchInfo::default(); named_functions_pair[0].len()],
            vec![NamedFunctionMatchInfo::default(); named_functions_pair[1].len()],
        ],
    };

    let right_by_name: HashMap<&str, IndexT> = named_functions_pair[1]
        .iter()
        .enumerate()
        .map(|(index, named)| (named.name.as_str(), index as IndexT))
        .collect();

    for (left_index, named) in named_functions_pair[0].iter().enumerate() {
        let Some(&right_index) = right_by_name.get(named.name.as_str()) else {
            continue;
        };
        let matched_index = data.matched_functions.len() as IndexT;
        data.matched_functions.push(MatchedFunction {
            named_idx_pair: [left_index as IndexT, right_index],
        });
        data.named_function_match_infos[0][left_index].matched_index = matched_index;
        data.named_function_match_infos[1][right_index as usize].matched_index = matched_index;
    }

    data
}

/// Builds bundles over one side's named functions.
///
/// With [MatchBundleType::None] a single bundle named "all" is produced. The other types group
/// by the debug info's compiland or source file of each function's begin address; functions
/// without debug info linkage fall into an "<unknown>" bundle.
pub fn build_bundles(
    bundle_type: MatchBundleType,
    flags: BuildBundleFlags,
    named_functions: &[NamedFunction],
    match_infos: &[NamedFunctionMatchInfo],
    debug_info: Option<&DebugInfo>,
) -> Vec<NamedFunctionBundle> {
    debug_assert_eq!(named_functions.len(), match_infos.len());

    let mut bundles: Vec<NamedFunctionBundle> = Vec::new();
    let mut bundle_indices: HashMap<String, usize> = HashMap::new();

    for (index, named) in named_functions.iter().enumerate() {
        let name = bundle_name(bundle_type, named, debug_info);
        let bundle_index = *bundle_indices.entry(name.clone()).or_insert_with(|| {
            bundles.push(NamedFunctionBundle {
                name,
                flags,
                ..Default::default()
            });
            bundles.len() - 1
        });
        let bundle = &mut bundles[bundle_index];

        let index = index as IndexT;
        let match_info = &match_infos[index as usize];

        if match_info.is_matched() {
            if flags & BUILD_MATCHED_FUNCTION_INDICES != 0 {
                bundle.matched_function_indices.push(match_info.matched_index);
            }
            if flags & BUILD_MATCHED_NAMED_FUNCTION_INDICES != 0 {
                bundle.matched_named_function_indices.push(index);
            }
        } else if flags & BUILD_UNMATCHED_NAMED_FUNCTION_INDICES != 0 {
            bundle.unmatched_named_function_indices.push(index);
        }
        if flags & BUILD_ALL_NAMED_FUNCTION_INDICES != 0 {
            bundle.all_named_function_indices.push(index);
        }
    }

    bundles
}

fn bundle_name(
    bundle_type: MatchBundleType,
    named: &NamedFunction,
    debug_info: Option<&DebugInfo>,
) -> String {
    let function = debug_info
        .and_then(|debug_info| debug_info.find_function(named.function.get_begin_address()));

    match bundle_type {
        MatchBundleType::None => "all".to_string(),
        MatchBundleType::Compiland => function
            .zip(debug_info)
            .map(|(function, debug_info)| {
                debug_info.compilands[function.compiland_index as usize].name.clone()
            })
            .unwrap_or_else(|| "<unknown>".to_string()),
        MatchBundleType::SourceFile => function
            .zip(debug_info)
            .and_then(|(function, debug_info)| {
                debug_info
                    .source_file_name(function.source_file_index)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "<unknown>".to_string()),
    }
}
