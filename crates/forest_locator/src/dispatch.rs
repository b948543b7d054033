//! Type dispatch: maps a source's `file_type` tag to the reader for its files.
//!
//! Readers are external. This module only routes an entry to the reader
//! registered for its tag and hands back whatever opaque handle it returns.

use crate::error::DispatchError;
use crate::types::{FileType, FileTypes, ResolvedFile};
use std::any::Any;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Opaque dataset handle produced by a reader.
pub type DatasetHandle = Box<dyn Any + Send + Sync>;

pub type ReaderError = Box<dyn Error + Send + Sync>;

/// A format reader.
pub trait DatasetReader: Send + Sync {
    fn open(&self, entry: &ResolvedFile) -> Result<DatasetHandle, ReaderError>;
}

impl<F> DatasetReader for F
where
    F: Fn(&ResolvedFile) -> Result<DatasetHandle, ReaderError> + Send + Sync,
{
    fn open(&self, entry: &ResolvedFile) -> Result<DatasetHandle, ReaderError> {
        self(entry)
    }
}

/// Readers keyed by tag, plus the full set of tags configurations may use.
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    readers: HashMap<FileType, Arc<dyn DatasetReader>>,
    file_types: FileTypes,
}

impl ReaderRegistry {
    /// No tags, no readers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in tags, with no readers bound yet.
    pub fn builtin() -> Self {
        Self {
            readers: HashMap::new(),
            file_types: FileTypes::builtin(),
        }
    }

    /// Bind a reader to a tag, registering the tag if it is new.
    /// Replaces any reader already bound to it.
    pub fn register(&mut self, file_type: impl Into<FileType>, reader: impl DatasetReader + 'static) {
        let file_type = file_type.into();
        self.file_types.register(file_type.clone());
        self.readers.insert(file_type, Arc::new(reader));
    }

    /// Tags a configuration may name.
    pub fn file_types(&self) -> &FileTypes {
        &self.file_types
    }

    pub fn reader_for(&self, file_type: &FileType) -> Option<Arc<dyn DatasetReader>> {
        self.readers.get(file_type).cloned()
    }

    /// Recognized tags with no reader bound.
    pub fn unbound(&self) -> Vec<FileType> {
        self.file_types
            .iter()
            .filter(|tag| !self.readers.contains_key(*tag))
            .cloned()
            .collect()
    }

    /// Hand an entry to the reader for its tag.
    pub fn open(&self, entry: &ResolvedFile) -> Result<DatasetHandle, DispatchError> {
        let reader = self
            .reader_for(&entry.file_type)
            .ok_or_else(|| DispatchError::NoReader(entry.file_type.to_string()))?;
        reader.open(entry).map_err(|source| DispatchError::Reader {
            file_type: entry.file_type.to_string(),
            source,
        })
    }
}

impl fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bound: Vec<&str> = self.readers.keys().map(FileType::as_str).collect();
        bound.sort_unstable();
        f.debug_struct("ReaderRegistry")
            .field("bound", &bound)
            .field("file_types", &self.file_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileLocation;
    use chrono::Utc;
    use std::path::PathBuf;

    fn entry(file_type: &str) -> ResolvedFile {
        ResolvedFile {
            source_label: "RDT".to_string(),
            location: FileLocation::Path {
                path: PathBuf::from("/data/rdt/RDT_01.json"),
            },
            file_type: FileType::new(file_type),
            discovered_at: Utc::now(),
            modified_at: None,
        }
    }

    fn path_reader(entry: &ResolvedFile) -> Result<DatasetHandle, ReaderError> {
        Ok(Box::new(entry.path().to_path_buf()))
    }

    #[test]
    fn routes_by_tag() {
        let mut readers = ReaderRegistry::builtin();
        readers.register(FileType::RDT, path_reader);

        let handle = readers.open(&entry("rdt")).unwrap();
        assert_eq!(
            handle.downcast_ref::<PathBuf>(),
            Some(&PathBuf::from("/data/rdt/RDT_01.json"))
        );
    }

    #[test]
    fn unbound_tag_has_no_reader() {
        let readers = ReaderRegistry::builtin();
        let err = readers.open(&entry("eida50")).unwrap_err();
        assert!(matches!(err, DispatchError::NoReader(tag) if tag == "eida50"));
        assert_eq!(readers.unbound().len(), 3);
    }

    #[test]
    fn reader_failures_carry_the_tag() {
        let mut readers = ReaderRegistry::builtin();
        readers.register(FileType::UNIFIED_MODEL, |_: &ResolvedFile| -> Result<DatasetHandle, ReaderError> {
            Err("truncated header".into())
        });
        let err = readers.open(&entry("unified_model")).unwrap_err();
        assert_eq!(err.to_string(), "unified_model reader failed: truncated header");
    }

    #[test]
    fn registering_a_reader_registers_its_tag() {
        let mut readers = ReaderRegistry::builtin();
        readers.register("gpm_imerg", path_reader);
        assert!(readers.file_types().contains("gpm_imerg"));
        assert!(readers.reader_for(&FileType::new("gpm_imerg")).is_some());
        assert!(!readers.unbound().contains(&FileType::new("gpm_imerg")));
    }
}
