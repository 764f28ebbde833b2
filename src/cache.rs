// cache.rs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

use crate::error::Result;
use crate::features::FeatureCollection;
use crate::loader;

struct CachedCollection {
    loaded_at: Instant,
    modified: Option<SystemTime>,
    collection: Arc<FeatureCollection>,
}

/// Time-boxed memo of parsed feature files. An entry is reused until its TTL
/// expires or the file's modification time changes.
pub struct LoadCache {
    ttl: Duration,
    entries: HashMap<PathBuf, CachedCollection>,
    hits: u64,
    misses: u64,
}

impl LoadCache {
    pub fn new(ttl: Duration) -> Self {
        LoadCache {
            ttl,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn load(&mut self, path: &Path) -> Result<Arc<FeatureCollection>> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();

        if let Some(entry) = self.entries.get(&key) {
            if entry.loaded_at.elapsed() < self.ttl && entry.modified == modified {
                self.hits += 1;
                debug!(path = %path.display(), "feature cache hit");
                return Ok(Arc::clone(&entry.collection));
            }
        }

        self.misses += 1;
        let collection = Arc::new(loader::load_features(path)?);
        self.entries.insert(
            key,
            CachedCollection {
                loaded_at: Instant::now(),
                modified,
                collection: Arc::clone(&collection),
            },
        );
        Ok(collection)
    }

    pub fn invalidate(&mut self, path: &Path) {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.entries.remove(&key);
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KML: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document>
      <Placemark><name>A</name><Point><coordinates>106.8,-6.2</coordinates></Point></Placemark>
    </Document></kml>"#;

    #[test]
    fn second_load_within_ttl_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.kml");
        fs::write(&path, KML).unwrap();

        let mut cache = LoadCache::new(Duration::from_secs(3600));
        let first = cache.load(&path).unwrap();
        let second = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn zero_ttl_always_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.kml");
        fs::write(&path, KML).unwrap();

        let mut cache = LoadCache::new(Duration::ZERO);
        let first = cache.load(&path).unwrap();
        let second = cache.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats(), (0, 2));
    }

    #[test]
    fn invalidate_forces_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.kml");
        fs::write(&path, KML).unwrap();

        let mut cache = LoadCache::new(Duration::from_secs(3600));
        cache.load(&path).unwrap();
        cache.invalidate(&path);
        cache.load(&path).unwrap();
        assert_eq!(cache.stats(), (0, 2));
    }

    #[test]
    fn missing_file_is_not_cached() {
        let mut cache = LoadCache::new(Duration::from_secs(3600));
        assert!(cache.load(Path::new("missing/master.kml")).is_err());
        assert!(cache.load(Path::new("missing/master.kml")).is_err());
        assert_eq!(cache.stats(), (0, 2));
    }
}
