//! Symbol storage with address and name lookups.

use crate::IndexT;
use std::collections::HashMap;

/// A named address range inside an executable. Addresses are section-relative; the image base is
/// applied by the callers that work with absolute operand values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExeSymbol {
    /// Symbol name. An empty name means "no symbol".
    pub name: String,
    pub address: u64,
    pub size: u64,
}

impl ExeSymbol {
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            address,
            size,
        }
    }

    /// Returns `true` if given address is in the symbol range.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.address + self.size
    }
}

/// Symbol table with a unique address index and a non-unique name index.
///
/// There is exactly one symbol per address. Names are not unique; the name index is a multimap
/// and name lookups only succeed when a single symbol bears the requested name.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    symbols: Vec<ExeSymbol>,
    address_to_index: HashMap<u64, IndexT>,
    name_to_indices: HashMap<String, Vec<IndexT>>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
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

    /// Adds a symbol if not already present at its address.
    ///
    /// Symbols with an empty name or a zero address are ignored. On an address collision the
    /// first inserted symbol wins unless `overwrite` is set.
    pub fn insert(&mut self, symbol: ExeSymbol, overwrite: bool) {
        if symbol.address == 0 || symbol.name.is_empty() {
            return;
        }

        match self.address_to_index.get(&symbol.address).copied() {
            None => {
                let index = self.symbols.len() as IndexT;
                self.address_to_index.insert(symbol.address, index);
                self.name_to_indices
                    .entry(symbol.name.clone())
                    .or_default()
                    .push(index);
                self.symbols.push(symbol);
            }
            Some(index) => {
                if overwrite {
                    let old = std::mem::replace(&mut self.symbols[index as usize], symbol);
                    let new_name = self.symbols[index as usize].name.clone();
                    if old.name != new_name {
                        if let Some(indices) = self.name_to_indices.get_mut(&old.name) {
                            indices.retain(|&i| i != index);
                        }
                        self.name_to_indices.entry(new_name).or_default().push(index);
                    }
                }
            }
        }
    }

    pub fn extend(&mut self, symbols: impl IntoIterator<Item = ExeSymbol>, overwrite: bool) {
        for symbol in symbols {
            self.insert(symbol, overwrite);
        }
    }

    /// Exact address lookup.
    pub fn get(&self, address: u64) -> Option<&ExeSymbol> {
        self.address_to_index
            .get(&address)
            .map(|&index| &self.symbols[index as usize])
    }

    /// Name lookup. Returns Some only when exactly one symbol bears that name.
    pub fn get_by_name(&self, name: &str) -> Option<&ExeSymbol> {
        match self.name_to_indices.get(name)?.as_slice() {
            [index] => Some(&self.symbols[*index as usize]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = SymbolMap::new();
        map.insert(ExeSymbol::new("main", 0x1000, 0x20), false);
        map.insert(ExeSymbol::new("helper", 0x1020, 0x10), false);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(0x1000).unwrap().name, "main");
        assert_eq!(map.get(0x1020).unwrap().size, 0x10);
        assert!(map.get(0x1001).is_none());
    }

    #[test]
    fn test_skips_unusable_symbols() {
        let mut map = SymbolMap::new();
        map.insert(ExeSymbol::new("", 0x1000, 0), false);
        map.insert(ExeSymbol::new("at_zero", 0, 0), false);
        assert!(map.is_empty());
    }

    #[test]
    fn test_collision_keeps_first_unless_overwritten() {
        let mut map = SymbolMap::new();
        map.insert(ExeSymbol::new("first", 0x1000, 4), false);
        map.insert(ExeSymbol::new("second", 0x1000, 8), false);
        assert_eq!(map.get(0x1000).unwrap().name, "first");

        map.insert(ExeSymbol::new("second", 0x1000, 8), true);
        assert_eq!(map.get(0x1000).unwrap().name, "second");
        assert_eq!(map.get(0x1000).unwrap().size, 8);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_name_lookup_requires_unique_name() {
        let mut map = SymbolMap::new();
        map.insert(ExeSymbol::new("dup", 0x1000, 4), false);
        map.insert(ExeSymbol::new("dup", 0x2000, 4), false);
        map.insert(ExeSymbol::new("unique", 0x3000, 4), false);

        assert!(map.get_by_name("dup").is_none());
        assert_eq!(map.get_by_name("unique").unwrap().address, 0x3000);
        assert!(map.get_by_name("missing").is_none());
    }

    #[test]
    fn test_overwrite_renames_name_index() {
        let mut map = SymbolMap::new();
        map.insert(ExeSymbol::new("old_name", 0x1000, 4), false);
        map.insert(ExeSymbol::new("new_name", 0x1000, 4), true);

        assert!(map.get_by_name("old_name").is_none());
        assert_eq!(map.get_by_name("new_name").unwrap().address, 0x1000);
    }

    #[test]
    fn test_contains() {
        let symbol = ExeSymbol::new("sym", 0x100, 0x10);
        assert!(symbol.contains(0x100));
        assert!(symbol.contains(0x10f));
        assert!(!symbol.contains(0x110));
        assert!(!symbol.contains(0xff));
    }
}
