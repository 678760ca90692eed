//! The executable being disassembled: sections, image base, symbol view and config persistence.

use crate::config::{
    self, ConfigError, ConfigFile, ImageConfig, ObjectConfig, ObjectSectionConfig, SectionConfig,
    SymbolConfig,
};
use crate::symbols::{ExeSymbol, SymbolMap};
use object::{Object, ObjectSection, ObjectSymbol};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read executable: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse executable: {0}")]
    Parse(#[from] object::Error),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ExeSectionType {
    Code,
    Data,
    #[default]
    Unknown,
}

/// Parses a section type name. Anything unrecognized maps to [ExeSectionType::Unknown].
pub fn to_section_type(str: &str) -> ExeSectionType {
    if str.eq_ignore_ascii_case("code") {
        ExeSectionType::Code
    } else if str.eq_ignore_ascii_case("data") {
        ExeSectionType::Data
    } else {
        ExeSectionType::Unknown
    }
}

impl ExeSectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExeSectionType::Code => "code",
            ExeSectionType::Data => "data",
            ExeSectionType::Unknown => "unknown",
        }
    }
}

/// A named region of the executable. The address is section-relative (the image base is not
/// included); the code section additionally carries its raw bytes.
#[derive(Debug, Clone, Default)]
pub struct ExeSectionInfo {
    pub name: String,
    pub section_type: ExeSectionType,
    pub address: u64,
    pub size: u64,
    pub data: Vec<u8>,
}

impl ExeSectionInfo {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.address + self.size
    }
}

/// A linked object file and the section ranges it contributed.
#[derive(Debug, Clone, Default)]
pub struct ExeObject {
    pub name: String,
    pub sections: Vec<ExeObjectSection>,
}

#[derive(Debug, Clone, Default)]
pub struct ExeObjectSection {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

/// A loaded executable image.
///
/// The section table and symbol map are immutable while functions are being disassembled; the
/// symbol map is shared behind an [Arc] so formatter hooks can resolve symbols without borrowing
/// the executable itself.
#[derive(Debug, Clone, Default)]
pub struct Executable {
    filename: String,
    sections: Vec<ExeSectionInfo>,
    code_section_index: Option<usize>,
    symbols: Arc<SymbolMap>,
    objects: Vec<ExeObject>,
    image_base: u64,
    sections_begin: u64,
    sections_end: u64,
    image_config: ImageConfig,
}

impl Executable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads sections and symbols from an executable file on disk.
    ///
    /// Symbols are inserted in two passes, named symbols and exports first, import-side symbols
    /// second. Entries with an empty name or a zero address are skipped in both passes.
    pub fn load(filename: &Path) -> Result<Self, LoadError> {
        log::debug!("loading section info from '{}'...", filename.display());

        let data = fs::read(filename)?;
        let file = object::File::parse(&*data)?;

        let mut exe = Self {
            filename: filename.to_string_lossy().into_owned(),
            image_base: file.relative_address_base(),
            ..Default::default()
        };

        let entry = file.entry().wrapping_sub(exe.image_base);
        for section in file.sections() {
            let name = match section.name() {
                Ok(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };
            if section.size() == 0 {
                continue;
            }
            let address = section.address().wrapping_sub(exe.image_base);
            // Naive split on whether a section holds code or data: the section containing the
            // entry point is code. A config file can re-type sections afterwards.
            let section_type = if entry >= address && entry < address + section.size() {
                ExeSectionType::Code
            } else {
                ExeSectionType::Data
            };
            exe.add_section(ExeSectionInfo {
                name,
                section_type,
                address,
                size: section.size(),
                data: section.data().map(<[u8]>::to_vec).unwrap_or_default(),
            });
        }

        log::debug!("indexing embedded symbols...");

        let named = file
            .symbols()
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                let address = symbol.address().checked_sub(exe.image_base)?;
                Some(ExeSymbol::new(name, address, symbol.size()))
            })
            .chain(file.exports().unwrap_or_default().into_iter().filter_map(|export| {
                let name = String::from_utf8_lossy(export.name()).into_owned();
                let address = export.address().checked_sub(exe.image_base)?;
                Some(ExeSymbol::new(name, address, 0))
            }))
            .collect::<Vec<_>>();
        exe.add_symbols(named, false);

        let imported = file
            .dynamic_symbols()
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                let address = symbol.address().checked_sub(exe.image_base)?;
                Some(ExeSymbol::new(name, address, symbol.size()))
            })
            .collect::<Vec<_>>();
        exe.add_symbols(imported, false);

        let object_name = filename
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| exe.filename.clone());
        let mut object = ExeObject {
            name: object_name,
            sections: Vec::new(),
        };
        for section in file.sections() {
            let name = match section.name() {
                Ok(name) if !name.is_empty() => name.to_string(),
                _ => continue,
            };
            if section.size() == 0 {
                continue;
            }
            let (offset, size) = section.file_range().unwrap_or((0, section.size()));
            object.sections.push(ExeObjectSection { name, offset, size });
        }
        exe.objects.push(object);

        Ok(exe)
    }

    pub fn is_loaded(&self) -> bool {
        !self.sections.is_empty()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn sections(&self) -> &[ExeSectionInfo] {
        &self.sections
    }

    pub fn objects(&self) -> &[ExeObject] {
        &self.objects
    }

    /// Adds a section to the image, keeping the section bounds and code section index current.
    pub fn add_section(&mut self, section: ExeSectionInfo) {
        if self.code_section_index.is_none() && section.section_type == ExeSectionType::Code {
            self.code_section_index = Some(self.sections.len());
        }
        self.sections.push(section);
        self.update_bounds();
    }

    pub fn set_image_base(&mut self, image_base: u64) {
        self.image_base = image_base;
    }

    pub fn find_section(&self, address: u64) -> Option<&ExeSectionInfo> {
        self.sections.iter().find(|section| section.contains(address))
    }

    pub fn find_section_by_name(&self, name: &str) -> Option<&ExeSectionInfo> {
        self.sections.iter().find(|section| section.name == name)
    }

    pub fn code_section(&self) -> Option<&ExeSectionInfo> {
        self.code_section_index.map(|index| &self.sections[index])
    }

    /// Default image base address when ASLR is not in effect.
    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    /// Begin address of the code section plus image base.
    pub fn code_section_begin_from_image_base(&self) -> u64 {
        self.code_section()
            .map(|section| section.address.saturating_add(self.image_base))
            .unwrap_or(0)
    }

    /// End address of the code section plus image base.
    pub fn code_section_end_from_image_base(&self) -> u64 {
        self.code_section()
            .map(|section| (section.address + section.size).saturating_add(self.image_base))
            .unwrap_or(0)
    }

    /// Begin address of the first section plus image base.
    pub fn all_sections_begin_from_image_base(&self) -> u64 {
        self.sections_begin.saturating_add(self.image_base)
    }

    /// End address of the last section plus image base.
    pub fn all_sections_end_from_image_base(&self) -> u64 {
        self.sections_end.saturating_add(self.image_base)
    }

    pub fn symbols(&self) -> &[ExeSymbol] {
        self.symbols.symbols()
    }

    pub(crate) fn symbol_map(&self) -> &Arc<SymbolMap> {
        &self.symbols
    }

    /// Exact address lookup.
    pub fn get_symbol(&self, address: u64) -> Option<&ExeSymbol> {
        self.symbols.get(address)
    }

    /// Name lookup. Returns Some only when exactly one symbol bears that name.
    pub fn get_symbol_by_name(&self, name: &str) -> Option<&ExeSymbol> {
        self.symbols.get_by_name(name)
    }

    /// Subtracts the image base before the symbol lookup.
    pub fn get_symbol_from_image_base(&self, address: u64) -> Option<&ExeSymbol> {
        self.symbols.get(address.wrapping_sub(self.image_base))
    }

    /// Adds a new symbol if not already present, or overwrites the existing one on request.
    pub fn add_symbol(&mut self, symbol: ExeSymbol, overwrite: bool) {
        Arc::make_mut(&mut self.symbols).insert(symbol, overwrite);
    }

    pub fn add_symbols(&mut self, symbols: impl IntoIterator<Item = ExeSymbol>, overwrite: bool) {
        Arc::make_mut(&mut self.symbols).extend(symbols, overwrite);
    }

    /// Applies a config file to the image: layout values, extra symbols, section overrides and
    /// object descriptions.
    pub fn load_config(&mut self, filename: &Path, overwrite_symbols: bool) -> Result<(), ConfigError> {
        log::debug!("loading config file '{}'...", filename.display());

        let config = config::read_config(filename)?;

        if let Some(image_config) = config.config {
            self.image_config = image_config;
        }
        if let Some(symbols) = config.symbols {
            log::debug!("loading {} config symbols...", symbols.len());
            self.add_symbols(
                symbols
                    .into_iter()
                    .map(|symbol| ExeSymbol::new(symbol.name, symbol.address, symbol.size)),
                overwrite_symbols,
            );
        }
        if let Some(sections) = config.sections {
            self.update_sections(&sections);
        }
        if let Some(objects) = config.objects {
            self.update_objects(objects);
        }
        Ok(())
    }

    /// Saves the image description to a config file, keeping keys that already exist there.
    pub fn save_config(&self, filename: &Path) -> Result<(), ConfigError> {
        log::debug!("saving config file '{}'...", filename.display());

        let config = ConfigFile {
            config: Some(self.image_config.clone()),
            symbols: Some(
                self.symbols
                    .symbols()
                    .iter()
                    .map(|symbol| SymbolConfig {
                        name: symbol.name.clone(),
                        address: symbol.address,
                        size: symbol.size,
                    })
                    .collect(),
            ),
            sections: Some(
                self.sections
                    .iter()
                    .map(|section| SectionConfig {
                        name: section.name.clone(),
                        section_type: section.section_type.as_str().to_string(),
                        address: section.address,
                        size: section.size,
                    })
                    .collect(),
            ),
            objects: Some(
                self.objects
                    .iter()
                    .map(|object| ObjectConfig {
                        name: object.name.clone(),
                        sections: object
                            .sections
                            .iter()
                            .map(|section| ObjectSectionConfig {
                                name: section.name.clone(),
                                offset: section.offset,
                                size: section.size,
                            })
                            .collect(),
                    })
                    .collect(),
            ),
        };
        config::write_config(filename, &config)
    }

    fn update_sections(&mut self, sections: &[SectionConfig]) {
        for config in sections {
            if config.name.is_empty() {
                continue;
            }
            let Some(section) = self
                .sections
                .iter_mut()
                .find(|section| section.name == config.name)
            else {
                log::debug!("section '{}' not found in binary", config.name);
                continue;
            };
            section.section_type = to_section_type(&config.section_type);
            section.address = config.address;
            section.size = config.size;
        }

        self.code_section_index = self
            .sections
            .iter()
            .position(|section| section.section_type == ExeSectionType::Code);
        self.update_bounds();
    }

    fn update_objects(&mut self, objects: Vec<ObjectConfig>) {
        for config in objects {
            if self.objects.iter().any(|object| object.name == config.name) {
                continue;
            }
            self.objects.push(ExeObject {
                name: config.name,
                sections: config
                    .sections
                    .into_iter()
                    .map(|section| ExeObjectSection {
                        name: section.name,
                        offset: section.offset,
                        size: section.size,
                    })
                    .collect(),
            });
        }
    }

    fn update_bounds(&mut self) {
        self.sections_begin = self
            .sections
            .iter()
            .map(|section| section.address)
            .min()
            .unwrap_or(0);
        self.sections_end = self
            .sections
            .iter()
            .map(|section| section.address + section.size)
            .max()
            .unwrap_or(0);
    }
}
