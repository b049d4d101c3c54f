//! 中间文件的存储后端。
//!
//! 流水线的全部状态都是工作目录中按约定命名的文件。这里把对这些文件的操作
//! 抽象出来：[`FsStore`]直接操作文件系统，[`MemStore`]在内存中模拟，用于测试和试运行。

use crate::error::{AtlasError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use walkdir::WalkDir;

pub trait ArtifactStore: Send + Sync {
    /// 路径是否存在；符号链接会被跟随，悬空链接视为不存在。
    fn exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// 文件不存在时创建空文件，已存在时保持内容不变。
    fn touch(&self, path: &Path) -> Result<()>;

    /// 删除文件、链接（不跟随）或整个目录；返回是否确有东西被删除。
    fn remove(&self, path: &Path) -> Result<bool>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    /// 创建指向`target`的符号链接`link`。
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// 目录下的直接子项，按文件名排序；目录不存在时为空。
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

/// 文件系统后端。
#[derive(Clone, Copy, Debug, Default)]
pub struct FsStore;

impl ArtifactStore for FsStore {
    #[inline]
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| AtlasError::io(path, e))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents).map_err(|e| AtlasError::io(path, e))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| AtlasError::io(path, e))
    }

    fn touch(&self, path: &Path) -> Result<()> {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(drop)
            .map_err(|e| AtlasError::io(path, e))
    }

    fn remove(&self, path: &Path) -> Result<bool> {
        let meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(AtlasError::io(path, e)),
        };
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
        .map(|_| true)
        .map_err(|e| AtlasError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| AtlasError::io(from, e))
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        fs::copy(from, to)
            .map(drop)
            .map_err(|e| AtlasError::io(from, e))
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        // 相对目标会相对于链接所在目录解析，这里统一转为绝对路径
        let target = if target.is_relative() {
            std::env::current_dir()
                .map_err(|e| AtlasError::io(target, e))?
                .join(target)
        } else {
            target.to_path_buf()
        };
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                std::os::unix::fs::symlink(&target, link).map_err(|e| AtlasError::io(link, e))
            } else if #[cfg(windows)] {
                std::os::windows::fs::symlink_file(&target, link).map_err(|e| AtlasError::io(link, e))
            } else {
                fs::copy(&target, link).map(drop).map_err(|e| AtlasError::io(link, e))
            }
        }
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                AtlasError::io(path, e.into())
            })?;
            entries.push(entry.into_path());
        }
        Ok(entries)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Node {
    File(String),
    Link(PathBuf),
}

#[derive(Default)]
struct MemInner {
    nodes: BTreeMap<PathBuf, Node>,
    dirs: BTreeSet<PathBuf>,
}

const MAX_LINK_DEPTH: usize = 16;

impl MemInner {
    /// 跟随链接，返回最终文件的内容。
    fn resolve(&self, path: &Path) -> Option<&String> {
        let mut cur = path;
        for _ in 0..MAX_LINK_DEPTH {
            match self.nodes.get(cur)? {
                Node::File(s) => return Some(s),
                Node::Link(target) => cur = target.as_path(),
            }
        }
        None
    }
}

/// 内存后端。路径不做规范化，按字面比较。
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, MemInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 路径本身是否为符号链接（不跟随）。
    pub fn is_link(&self, path: &Path) -> bool {
        matches!(self.lock().nodes.get(path), Some(Node::Link(_)))
    }

    /// 链接指向的目标。
    pub fn link_target(&self, path: &Path) -> Option<PathBuf> {
        match self.lock().nodes.get(path) {
            Some(Node::Link(t)) => Some(t.clone()),
            _ => None,
        }
    }

    /// 全部文件与链接的路径。
    pub fn files(&self) -> Vec<PathBuf> {
        self.lock().nodes.keys().cloned().collect()
    }
}

fn not_found(path: &Path) -> AtlasError {
    AtlasError::io(path, io::Error::from(io::ErrorKind::NotFound))
}

impl ArtifactStore for MemStore {
    fn exists(&self, path: &Path) -> bool {
        let inner = self.lock();
        inner.dirs.contains(path) || inner.resolve(path).is_some()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut inner = self.lock();
        for dir in path.ancestors().filter(|p| !p.as_os_str().is_empty()) {
            inner.dirs.insert(dir.to_path_buf());
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        self.lock()
            .nodes
            .insert(path.to_path_buf(), Node::File(contents.to_string()));
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.lock()
            .resolve(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn touch(&self, path: &Path) -> Result<()> {
        self.lock()
            .nodes
            .entry(path.to_path_buf())
            .or_insert_with(|| Node::File(String::new()));
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<bool> {
        let mut inner = self.lock();
        let mut removed = inner.nodes.remove(path).is_some();
        if inner.dirs.remove(path) {
            removed = true;
            inner.nodes.retain(|p, _| !p.starts_with(path));
            inner.dirs.retain(|p| !p.starts_with(path));
        }
        Ok(removed)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut inner = self.lock();
        let node = inner.nodes.remove(from).ok_or_else(|| not_found(from))?;
        inner.nodes.insert(to.to_path_buf(), node);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let mut inner = self.lock();
        let contents = inner.resolve(from).cloned().ok_or_else(|| not_found(from))?;
        inner.nodes.insert(to.to_path_buf(), Node::File(contents));
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(link) {
            return Err(AtlasError::io(
                link,
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }
        inner
            .nodes
            .insert(link.to_path_buf(), Node::Link(target.to_path_buf()));
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let inner = self.lock();
        let children: BTreeSet<PathBuf> = inner
            .nodes
            .keys()
            .chain(inner.dirs.iter())
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect();
        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ArtifactStore, root: &Path) {
        let dir = root.join("tempDir");
        store.create_dir_all(&dir).unwrap();
        assert!(store.exists(&dir));

        let a = dir.join("a.txt");
        store.write(&a, "hello").unwrap();
        store.touch(&a).unwrap();
        assert_eq!(store.read_to_string(&a).unwrap(), "hello");

        let b = dir.join("b.txt");
        store.copy(&a, &b).unwrap();
        let c = dir.join("c.txt");
        store.rename(&b, &c).unwrap();
        assert!(!store.exists(&b));
        assert_eq!(store.read_to_string(&c).unwrap(), "hello");

        let link = dir.join("link.txt");
        store.symlink(&c, &link).unwrap();
        assert!(store.exists(&link));
        assert_eq!(store.read_to_string(&link).unwrap(), "hello");

        assert_eq!(
            store.list_dir(&dir).unwrap(),
            vec![a.clone(), c.clone(), link.clone()]
        );

        // 删除目标后链接悬空
        assert!(store.remove(&c).unwrap());
        assert!(!store.exists(&link));
        assert!(store.remove(&link).unwrap());
        assert!(!store.remove(&link).unwrap());

        assert!(matches!(
            store.rename(&c, &b),
            Err(AtlasError::Io { .. })
        ));
        assert!(store.list_dir(&root.join("missing")).unwrap().is_empty());

        assert!(store.remove(&dir).unwrap());
        assert!(!store.exists(&a));
    }

    #[test]
    fn mem_store_behaves_like_a_filesystem() {
        exercise(&MemStore::new(), Path::new("/virtual"));
    }

    #[test]
    fn fs_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        exercise(&FsStore, tmp.path());
    }

    #[test]
    fn mem_store_reports_links() {
        let store = MemStore::new();
        store.touch(Path::new("/w/f")).unwrap();
        store.symlink(Path::new("/w/f"), Path::new("/w/l")).unwrap();
        assert!(store.is_link(Path::new("/w/l")));
        assert_eq!(store.link_target(Path::new("/w/l")), Some(PathBuf::from("/w/f")));
        assert!(store.symlink(Path::new("/w/f"), Path::new("/w/l")).is_err());
    }
}
