use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{self, Loaded};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("failed to persist summaries: {0}")]
    Io(#[from] std::io::Error),
}

/**
 * \brief 论文摘要缓存：键为 (内容, Profile 名称) 的 MD5 指纹。
 * \details 条目永不过期；每次写入后整体重写文件。
 */
#[derive(Debug)]
pub struct SummaryCache {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

/**
 * \brief 计算缓存键：内容后直接拼接 Profile 名称（无 Profile 时不拼接）再取 MD5。
 */
pub fn fingerprint(content: &str, profile_name: Option<&str>) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    if let Some(name) = profile_name {
        hasher.update(name.as_bytes());
    }
    hex::encode(hasher.finalize())
}

impl SummaryCache {
    /**
     * \brief 加载缓存文件；缺失或损坏时视为空缓存。
     */
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match storage::read_json::<BTreeMap<String, String>>(&path) {
            Ok(Loaded::Parsed(entries)) => entries,
            Ok(Loaded::Missing) => BTreeMap::new(),
            Ok(Loaded::Corrupt(err)) => {
                warn!("summary cache {:?} unreadable ({}), starting empty", path, err);
                BTreeMap::new()
            }
            Err(err) => {
                warn!("summary cache {:?} could not be read ({}), starting empty", path, err);
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, content: &str, profile_name: Option<&str>) -> Option<&str> {
        let key = fingerprint(content, profile_name);
        let hit = self.entries.get(&key).map(String::as_str);
        debug!(
            "summary cache {} for key {}",
            if hit.is_some() { "hit" } else { "miss" },
            key
        );
        hit
    }

    /**
     * \brief 写入（覆盖）摘要并立即落盘；写入失败时内存中的缓存保持原样。
     */
    pub fn put(
        &mut self,
        content: &str,
        summary: &str,
        profile_name: Option<&str>,
    ) -> Result<(), SummaryError> {
        let key = fingerprint(content, profile_name);
        let previous = self.entries.insert(key.clone(), summary.to_string());
        if let Err(err) = storage::write_json(&self.path, &self.entries) {
            match previous {
                Some(old) => self.entries.insert(key, old),
                None => self.entries.remove(&key),
            };
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_deterministic_md5() {
        assert_eq!(fingerprint("abc", None), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(fingerprint("abc", Some("P1")), fingerprint("abc", Some("P1")));
    }

    #[test]
    fn test_fingerprint_depends_on_profile() {
        assert_ne!(fingerprint("abc", Some("P1")), fingerprint("abc", Some("P2")));
        assert_ne!(fingerprint("abc", None), fingerprint("abc", Some("P1")));
        assert_ne!(fingerprint("abc", Some("P1")), fingerprint("abd", Some("P1")));
    }

    #[test]
    fn test_put_then_get_by_profile() {
        let dir = tempdir().expect("tempdir");
        let mut cache = SummaryCache::open(dir.path().join("paper_summaries.json"));
        cache.put("X", "Y", Some("P")).expect("put");
        assert_eq!(cache.get("X", Some("P")), Some("Y"));
        assert_eq!(cache.get("X", Some("Q")), None);
        assert_eq!(cache.get("X", None), None);
    }

    #[test]
    fn test_put_overwrites_and_persists() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("paper_summaries.json");
        let mut cache = SummaryCache::open(&path);
        cache.put("paper", "first", None).expect("put 1");
        cache.put("paper", "second", None).expect("put 2");
        assert_eq!(cache.len(), 1);

        let reopened = SummaryCache::open(&path);
        assert_eq!(reopened.path(), path);
        assert_eq!(reopened.get("paper", None), Some("second"));

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("flat map");
        assert_eq!(raw.get(&fingerprint("paper", None)).map(String::as_str), Some("second"));
    }

    #[test]
    fn test_failed_write_is_not_served() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").expect("write blocker");
        let mut cache = SummaryCache::open(blocker.join("paper_summaries.json"));

        assert!(cache.put("paper", "summary", Some("P")).is_err());
        assert_eq!(cache.get("paper", Some("P")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_overwrite_keeps_previous_summary() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("paper_summaries.json");
        let mut cache = SummaryCache::open(&path);
        cache.put("paper", "first", None).expect("put");
        fs::remove_file(&path).expect("remove cache file");
        fs::create_dir(&path).expect("block cache path");

        assert!(cache.put("paper", "second", None).is_err());
        assert_eq!(cache.get("paper", None), Some("first"));
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("paper_summaries.json");
        fs::write(&path, "[1, 2, 3]").expect("write");
        let cache = SummaryCache::open(&path);
        assert!(cache.is_empty());
    }
}
