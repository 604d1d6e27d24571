use std::path::{Path, PathBuf};

use crate::{data_dir::DataDir, error::Result};

/// Suffix appended to an entity type name to form its index directory.
pub const DEFAULT_INDEX_SUFFIX: &str = ".index";

/// Memory budget handed to each tantivy index writer, in bytes.
pub const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Number of entities projected and committed together while reindexing.
pub const REINDEX_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub search_dir: PathBuf,
    pub index_suffix: String,
    pub writer_memory_budget: usize,
    pub reindex_batch_size: usize,
}

impl SearchConfig {
    pub fn new(search_dir: impl Into<PathBuf>) -> Self {
        Self {
            search_dir: search_dir.into(),
            index_suffix: DEFAULT_INDEX_SUFFIX.to_string(),
            writer_memory_budget: WRITER_MEMORY_BUDGET,
            reindex_batch_size: REINDEX_BATCH_SIZE,
        }
    }

    /// Configuration rooted in a data directory, honoring
    /// `ENTSEARCH_INDEX_SUFFIX`.
    pub fn from_env(data_dir: &DataDir) -> Result<Self> {
        let config = Self::new(data_dir.search_dir()?);
        Ok(match std::env::var("ENTSEARCH_INDEX_SUFFIX") {
            Ok(suffix) if !suffix.is_empty() => {
                config.with_index_suffix(suffix)
            }
            _ => config,
        })
    }

    pub fn with_index_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.index_suffix = suffix.into();
        self
    }

    pub fn with_writer_memory_budget(mut self, bytes: usize) -> Self {
        self.writer_memory_budget = bytes;
        self
    }

    pub fn with_reindex_batch_size(mut self, size: usize) -> Self {
        self.reindex_batch_size = size.max(1);
        self
    }

    pub fn search_dir(&self) -> &Path {
        &self.search_dir
    }

    /// Directory holding the index of `entity`.
    pub fn index_path(&self, entity: &str) -> PathBuf {
        self.search_dir.join(format!("{entity}{}", self.index_suffix))
    }

    /// Entity type name encoded in an index directory name, if any.
    pub fn entity_from_dir_name<'a>(
        &self,
        dir_name: &'a str,
    ) -> Option<&'a str> {
        dir_name
            .strip_suffix(self.index_suffix.as_str())
            .filter(|name| !name.is_empty())
    }
}
