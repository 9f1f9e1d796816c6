//! 内容寻址缓存目录
//!
//! 以 key（通常是 URL）的 SHA-1 十六进制摘要定位目录：
//! `root/ab/cd/ef0123...`。目录下的文件齐全即视为已缓存。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tempfile::NamedTempFile;

/// 内容寻址存储
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// key 的 SHA-1 十六进制摘要
    pub fn hash(key: &str) -> String {
        hex::encode(Sha1::digest(key.as_bytes()))
    }

    /// key 对应的目录
    pub fn dir_for(&self, key: &str) -> PathBuf {
        let hash = Self::hash(key);
        self.root
            .join(&hash[..2])
            .join(&hash[2..4])
            .join(&hash[4..])
    }

    /// 所有文件都存在且非空
    pub fn has_all(&self, key: &str, files: &[&str]) -> bool {
        let dir = self.dir_for(key);
        files.iter().all(|name| {
            fs::metadata(dir.join(name))
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false)
        })
    }

    /// 写入文件
    ///
    /// 先写同目录下的唯一临时文件再重命名，读者不会看到写了一半的文件；
    /// 多个 worker 同时写同一个 key 时后写者覆盖，互不干扰。
    pub fn write(&self, key: &str, file: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let dir = self.dir_for(key);
        fs::create_dir_all(&dir)?;

        let target = dir.join(file);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }

    /// 读取文本文件，不存在时返回 `None`
    pub fn read_to_string(&self, key: &str, file: &str) -> std::io::Result<Option<String>> {
        match fs::read_to_string(self.dir_for(key).join(file)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 文件大小，不存在时为 0
    pub fn file_size(&self, key: &str, file: &str) -> u64 {
        fs::metadata(self.dir_for(key).join(file))
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_two_level_prefix() {
        let store = ContentStore::new("/cache");
        // sha1("https://example.com")
        let hash = ContentStore::hash("https://example.com");
        assert_eq!(hash, "327c3fda87ce286848a574982ddd0b7c7487f816");

        let dir = store.dir_for("https://example.com");
        assert_eq!(
            dir,
            PathBuf::from("/cache/32/7c/3fda87ce286848a574982ddd0b7c7487f816")
        );
    }

    #[test]
    fn test_write_then_has_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let key = "https://a.example/page";

        assert!(!store.has_all(key, &["dom.html", "page.mhtml"]));
        store.write(key, "dom.html", b"<html></html>").unwrap();
        assert!(!store.has_all(key, &["dom.html", "page.mhtml"]));
        store.write(key, "page.mhtml", b"MIME").unwrap();
        assert!(store.has_all(key, &["dom.html", "page.mhtml"]));
        assert_eq!(store.file_size(key, "dom.html"), 13);
        assert_eq!(store.file_size(key, "missing"), 0);
    }

    #[test]
    fn test_concurrent_writes_to_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let key = "https://shared.example/top";

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|i| {
                            let body = format!("<html>{}-{}</html>", worker, i);
                            store.write(key, "dom.html", body.as_bytes()).is_err()
                        })
                        .count()
                })
            })
            .collect();

        let errors: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(errors, 0);

        let text = store.read_to_string(key, "dom.html").unwrap().unwrap();
        assert!(text.starts_with("<html>"));

        // 不留临时文件
        let leftovers = fs::read_dir(store.dir_for(key)).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        assert!(store.read_to_string("k", "dom.html").unwrap().is_none());
    }
}
