//! Caches source file contents for frequent access during comparison annotation.

use lru::LruCache;
use std::fs;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

/// One cached text file, split into lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFileContent {
    pub filename: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadResult {
    Failed,
    Loaded,
    AlreadyLoaded,
}

const DEFAULT_CAPACITY: usize = 64;

/// Bounded file content cache supporting concurrent readers and a single loading writer.
///
/// Loads take an exclusive loader lock and re-check the cache before reading from disk, so two
/// threads requesting the same file load it once.
pub struct FileContentStorage {
    files: RwLock<LruCache<String, Arc<TextFileContent>>>,
    load_lock: Mutex<()>,
}

impl Default for FileContentStorage {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl FileContentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            files: RwLock::new(LruCache::new(capacity)),
            load_lock: Mutex::new(()),
        }
    }

    /// Returns the cached content of a file, or None when it has not been loaded.
    pub fn find_content(&self, name: &str) -> Option<Arc<TextFileContent>> {
        if name.is_empty() {
            return None;
        }
        let files = self.files.read().unwrap_or_else(|error| error.into_inner());
        files.peek(name).cloned()
    }

    /// Loads a file into the cache unless already present.
    pub fn load_content(&self, name: &str) -> LoadResult {
        if name.is_empty() {
            return LoadResult::Failed;
        }

        // Exclusive loader lock so multiple threads cannot load the same file concurrently.
        let _guard = self.load_lock.lock().unwrap_or_else(|error| error.into_inner());

        if self.find_content(name).is_some() {
            return LoadResult::AlreadyLoaded;
        }

        let Ok(text) = fs::read_to_string(name) else {
            return LoadResult::Failed;
        };
        let content = Arc::new(TextFileContent {
            filename: name.to_string(),
            lines: text.lines().map(str::to_string).collect(),
        });

        let mut files = self.files.write().unwrap_or_else(|error| error.into_inner());
        files.push(name.to_string(), content);
        LoadResult::Loaded
    }

    pub fn len(&self) -> usize {
        let files = self.files.read().unwrap_or_else(|error| error.into_inner());
        files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut files = self.files.write().unwrap_or_else(|error| error.into_inner());
        files.clear();
    }
}
