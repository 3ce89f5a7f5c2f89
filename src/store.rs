//! Flat XML list of custom character definitions.
//!
//! ```xml
//! <PuaDefinitions>
//!   <CharDef code="F170" data="MY LETTER;Lo;0;L;;N;;;;;" />
//! </PuaDefinitions>
//! ```
//!
//! The store is keyed by code point. When several definitions (or several
//! legacy files) name the same code point, the first one read is kept.

use core::hash::BuildHasherDefault;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use seahash::SeaHasher;
use tracing::debug;
use xml::reader::{EventReader, XmlEvent};
use xml::writer::{EmitterConfig, XmlEvent as WriterEvent};

use crate::character::{CharacterRecord, format_code_point};
use crate::error::{InstallError, Result};
use crate::fs::FileSystem;
use crate::log::LogContext;

pub type CodeHasher = BuildHasherDefault<SeaHasher>;

pub const ROOT_ELEMENT: &str = "PuaDefinitions";
pub const DEFINITION_ELEMENT: &str = "CharDef";
pub const CODE_ATTRIBUTE: &str = "code";
pub const DATA_ATTRIBUTE: &str = "data";

#[derive(Debug, Default, Clone)]
pub struct CustomCharacterStore {
    records: HashMap<u32, CharacterRecord, CodeHasher>,
}

impl CustomCharacterStore {
    pub fn new() -> Self {
        Self { records: HashMap::default() }
    }

    /// Adds `record` unless its code point is already present. Returns true when added.
    pub fn insert(&mut self, record: CharacterRecord) -> bool {
        match self.records.entry(record.code()) {
            Entry::Vacant(e) => {
                e.insert(record);
                true
            }
            Entry::Occupied(_) => false,
        }
    }
    /// Adds every record of `other` whose code point is not yet present; returns how many were added.
    pub fn absorb(&mut self, other: CustomCharacterStore) -> usize {
        let mut added = 0;
        // ascending so the outcome does not depend on hash order
        for record in other.sorted_ascending() {
            if self.insert(record) {
                added += 1;
            }
        }
        added
    }
    pub fn get(&self, code: u32) -> Option<&CharacterRecord> {
        self.records.get(&code)
    }
    pub fn contains(&self, code: u32) -> bool {
        self.records.contains_key(&code)
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// Records ordered by code point, the order the merger requires.
    pub fn sorted_ascending(&self) -> Vec<CharacterRecord> {
        let mut sorted: Vec<CharacterRecord> = self.records.values().cloned().collect();
        sorted.sort_unstable_by_key(|r| r.code());
        sorted
    }

    pub fn parse(path: &Path, log: &LogContext) -> Result<Self> {
        let file = File::open(path).map_err(InstallError::io(path))?;
        Self::from_reader(BufReader::new(file), log)
    }

    /// Reads every `CharDef` element. Elements lacking an attribute, or whose
    /// data does not decode, are skipped and logged; only a document that is
    /// not well-formed is an error.
    pub fn from_reader<R: Read>(reader: R, log: &LogContext) -> Result<Self> {
        let mut store = Self::new();
        for event in EventReader::new(reader) {
            let XmlEvent::StartElement { name, attributes, .. } = event? else {
                continue;
            };
            if name.local_name != DEFINITION_ELEMENT {
                continue;
            }
            let attribute = |wanted: &str| {
                attributes
                    .iter()
                    .find(|a| a.name.local_name == wanted)
                    .map(|a| a.value.as_str())
            };
            let (Some(code), Some(data)) = (attribute(CODE_ATTRIBUTE), attribute(DATA_ATTRIBUTE)) else {
                log.info(format!("Skipping {DEFINITION_ELEMENT} without both '{CODE_ATTRIBUTE}' and '{DATA_ATTRIBUTE}'"));
                continue;
            };
            match CharacterRecord::from_definition(code, data) {
                Ok(record) => {
                    let code = record.code();
                    if !store.insert(record) {
                        debug!(code = %format_code_point(code), "duplicate definition ignored");
                    }
                }
                Err(e) => log.info(format!("Skipping definition '{code}': {e}")),
            }
        }
        Ok(store)
    }

    /// Merges several definition files, earlier files taking precedence on shared code points.
    pub fn aggregate<F: FileSystem>(fs: &F, paths: &[PathBuf], log: &LogContext) -> Result<Self> {
        let mut store = Self::new();
        for path in paths {
            let bytes = fs.read(path).map_err(InstallError::io(path))?;
            let found = Self::from_reader(bytes.as_slice(), log)?;
            let total = found.len();
            let added = store.absorb(found);
            log.info(format!(
                "Read {total} definitions from {}, {added} new",
                path.display()
            ));
        }
        Ok(store)
    }

    /// [`CustomCharacterStore::aggregate`] over every `*.xml` file in `dir`, in name order.
    pub fn aggregate_dir<F: FileSystem>(fs: &F, dir: &Path, log: &LogContext) -> Result<Self> {
        let paths: Vec<PathBuf> = fs
            .list(dir)
            .map_err(InstallError::io(dir))?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("xml")))
            .collect();
        Self::aggregate(fs, &paths, log)
    }

    /// Writes one `CharDef` per record, ascending by code point.
    pub fn write_to<W: Write>(&self, sink: W) -> io::Result<()> {
        let mut writer = EmitterConfig::new().perform_indent(true).create_writer(sink);
        writer.write(WriterEvent::start_element(ROOT_ELEMENT)).map_err(io::Error::other)?;
        for record in self.sorted_ascending() {
            let code = format_code_point(record.code());
            let data = record.definition_data();
            writer
                .write(
                    WriterEvent::start_element(DEFINITION_ELEMENT)
                        .attr(CODE_ATTRIBUTE, &code)
                        .attr(DATA_ATTRIBUTE, &data),
                )
                .map_err(io::Error::other)?;
            writer.write(WriterEvent::end_element()).map_err(io::Error::other)?;
        }
        writer.write(WriterEvent::end_element()).map_err(io::Error::other)?;
        writeln!(writer.inner_mut())
    }

    pub fn to_xml_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)
            .map_err(|source| InstallError::Io { path: PathBuf::from("<memory>"), source })?;
        Ok(bytes)
    }

    pub fn serialize(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(InstallError::io(path))?;
        self.write_to(io::BufWriter::new(file)).map_err(InstallError::io(path))
    }
}

impl FromIterator<CharacterRecord> for CustomCharacterStore {
    fn from_iter<I: IntoIterator<Item = CharacterRecord>>(iter: I) -> Self {
        let mut store = Self::new();
        for record in iter {
            store.insert(record);
        }
        store
    }
}
