//! Analysis cache: SHA-256-keyed, optionally zstd-compressed, on-disk store
//! of [`WorldParameters`] for a source audio file, with LRU eviction by
//! total cache size.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use libetude_core::error::{LibetudeError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::params::WorldParameters;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    source_path: String,
    source_mtime_secs: u64,
    source_size: u64,
    compressed: bool,
    byte_size: u64,
    last_access_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    entries: Vec<IndexEntry>,
}

/// On-disk analysis cache: one directory holding a JSON index and one blob
/// file per cached entry, named by its content hash.
pub struct AnalysisCache {
    dir: PathBuf,
    max_bytes: u64,
    compress: bool,
    index: Mutex<Index>,
}

impl AnalysisCache {
    /// Opens (creating if absent) a cache rooted at `dir`, reading any
    /// existing index.
    pub fn open(dir: impl AsRef<Path>, max_bytes: u64, compress: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(LibetudeError::from)?;
        let index_path = dir.join("index.json");
        let index = if index_path.exists() {
            let raw = fs::read_to_string(&index_path).map_err(LibetudeError::from)?;
            serde_json::from_str(&raw).map_err(|e| LibetudeError::invalid_format(e.to_string()))?
        } else {
            Index::default()
        };
        Ok(Self { dir, max_bytes, compress, index: Mutex::new(index) })
    }

    fn hash_file(path: &Path) -> Result<String> {
        let bytes = fs::read(path).map_err(LibetudeError::from)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.blob"))
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn now_secs() -> u64 {
        SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }

    /// Looks up cached analysis parameters for `path`, validating that the
    /// source file's size and modification time still match what was cached.
    /// Returns `Ok(None)` on a clean miss.
    pub fn get(&self, path: impl AsRef<Path>) -> Result<Option<WorldParameters>> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(LibetudeError::from)?;
        let key = Self::hash_file(path)?;

        let mut index = self.index.lock().expect("analysis cache mutex poisoned");
        let Some(pos) = index.entries.iter().position(|e| e.key == key) else {
            return Ok(None);
        };

        let mtime_secs = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let size = metadata.len();
        if index.entries[pos].source_mtime_secs != mtime_secs || index.entries[pos].source_size != size {
            index.entries.remove(pos);
            return Ok(None);
        }

        let blob_path = self.blob_path(&key);
        let raw = match fs::read(&blob_path) {
            Ok(raw) => raw,
            Err(_) => {
                index.entries.remove(pos);
                return Ok(None);
            }
        };
        index.entries[pos].last_access_secs = Self::now_secs();
        let compressed = index.entries[pos].compressed;
        self.write_index_locked(&index)?;
        drop(index);

        let json = if compressed {
            zstd::decode_all(raw.as_slice()).map_err(LibetudeError::from)?
        } else {
            raw
        };
        let params: WorldParameters =
            serde_json::from_slice(&json).map_err(|e| LibetudeError::invalid_format(e.to_string()))?;
        Ok(Some(params))
    }

    /// Stores `params` for `path`, evicting least-recently-used entries
    /// until the cache's total size is within `max_bytes`.
    pub fn set(&self, path: impl AsRef<Path>, params: &WorldParameters) -> Result<()> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(LibetudeError::from)?;
        let key = Self::hash_file(path)?;

        let json = serde_json::to_vec(params).map_err(|e| LibetudeError::invalid_format(e.to_string()))?;
        let payload = if self.compress {
            zstd::encode_all(json.as_slice(), 0).map_err(LibetudeError::from)?
        } else {
            json
        };

        let blob_path = self.blob_path(&key);
        let tmp_path = self.dir.join(format!("{key}.blob.tmp"));
        {
            let mut file = fs::File::create(&tmp_path).map_err(LibetudeError::from)?;
            file.write_all(&payload).map_err(LibetudeError::from)?;
        }
        fs::rename(&tmp_path, &blob_path).map_err(LibetudeError::from)?;

        let mtime_secs = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut index = self.index.lock().expect("analysis cache mutex poisoned");
        index.entries.retain(|e| e.key != key);
        index.entries.push(IndexEntry {
            key,
            source_path: path.to_string_lossy().into_owned(),
            source_mtime_secs: mtime_secs,
            source_size: metadata.len(),
            compressed: self.compress,
            byte_size: payload.len() as u64,
            last_access_secs: Self::now_secs(),
        });
        self.evict_locked(&mut index)?;
        self.write_index_locked(&index)?;
        Ok(())
    }

    fn evict_locked(&self, index: &mut Index) -> Result<()> {
        let mut total: u64 = index.entries.iter().map(|e| e.byte_size).sum();
        index.entries.sort_by_key(|e| e.last_access_secs);
        while total > self.max_bytes && !index.entries.is_empty() {
            let victim = index.entries.remove(0);
            let _ = fs::remove_file(self.blob_path(&victim.key));
            total = total.saturating_sub(victim.byte_size);
        }
        Ok(())
    }

    fn write_index_locked(&self, index: &Index) -> Result<()> {
        let raw = serde_json::to_string(index).map_err(|e| LibetudeError::invalid_format(e.to_string()))?;
        let tmp_path = self.dir.join("index.json.tmp");
        fs::write(&tmp_path, raw).map_err(LibetudeError::from)?;
        fs::rename(&tmp_path, self.index_path()).map_err(LibetudeError::from)?;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.index.lock().expect("analysis cache mutex poisoned").entries.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.index.lock().expect("analysis cache mutex poisoned").entries.iter().map(|e| e.byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::WorldConfig;
    use std::io::Write as _;

    fn sample_params() -> WorldParameters {
        let config = WorldConfig::new(16000);
        WorldParameters::zeroed(config, 1000).unwrap()
    }

    fn write_source(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn miss_on_empty_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = write_source(source_dir.path(), "a.wav", b"hello");
        let cache = AnalysisCache::open(tmp.path(), 1 << 20, false).unwrap();
        assert!(cache.get(&source).unwrap().is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = write_source(source_dir.path(), "a.wav", b"hello world");
        let cache = AnalysisCache::open(tmp.path(), 1 << 20, false).unwrap();
        let params = sample_params();
        cache.set(&source, &params).unwrap();
        let fetched = cache.get(&source).unwrap().unwrap();
        assert_eq!(fetched.audio_length, params.audio_length);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn compressed_round_trips_too() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = write_source(source_dir.path(), "a.wav", b"compressed payload source");
        let cache = AnalysisCache::open(tmp.path(), 1 << 20, true).unwrap();
        let params = sample_params();
        cache.set(&source, &params).unwrap();
        let fetched = cache.get(&source).unwrap().unwrap();
        assert_eq!(fetched.audio_length, params.audio_length);
    }

    #[test]
    fn modified_source_invalidates_cache_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = write_source(source_dir.path(), "a.wav", b"version one");
        let cache = AnalysisCache::open(tmp.path(), 1 << 20, false).unwrap();
        cache.set(&source, &sample_params()).unwrap();
        write_source(source_dir.path(), "a.wav", b"a different version with more bytes");
        assert!(cache.get(&source).unwrap().is_none());
    }

    #[test]
    fn eviction_keeps_total_size_within_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let cache = AnalysisCache::open(tmp.path(), 1, false).unwrap();
        for i in 0..3 {
            let source = write_source(source_dir.path(), &format!("{i}.wav"), format!("content {i}").as_bytes());
            cache.set(&source, &sample_params()).unwrap();
        }
        assert!(cache.entry_count() <= 1);
    }
}
