use crate::error::Result;
use crate::layout::{Artifact, Layout};
use crate::store::ArtifactStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 布局与存储后端的组合：以[`Artifact`]为键读写工作目录。
#[derive(Clone)]
pub struct Workspace {
    layout: Layout,
    store: Arc<dyn ArtifactStore>,
}

impl Workspace {
    #[inline]
    pub fn new(layout: Layout, store: Arc<dyn ArtifactStore>) -> Self {
        Self { layout, store }
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    #[inline]
    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.layout.path(artifact)
    }

    #[inline]
    pub fn exists(&self, artifact: Artifact) -> bool {
        self.store.exists(&self.path(artifact))
    }

    #[inline]
    pub fn touch(&self, artifact: Artifact) -> Result<()> {
        self.store.touch(&self.path(artifact))
    }

    #[inline]
    pub fn write(&self, artifact: Artifact, contents: &str) -> Result<()> {
        self.store.write(&self.path(artifact), contents)
    }

    #[inline]
    pub fn read(&self, artifact: Artifact) -> Result<String> {
        self.store.read_to_string(&self.path(artifact))
    }

    #[inline]
    pub fn remove(&self, artifact: Artifact) -> Result<bool> {
        self.store.remove(&self.path(artifact))
    }

    #[inline]
    pub fn rename(&self, from: Artifact, to: Artifact) -> Result<()> {
        self.store.rename(&self.path(from), &self.path(to))
    }

    #[inline]
    pub fn copy(&self, from: Artifact, to: Artifact) -> Result<()> {
        self.store.copy(&self.path(from), &self.path(to))
    }

    /// 创建指向`target`的链接`link`。
    #[inline]
    pub fn link(&self, target: Artifact, link: Artifact) -> Result<()> {
        self.store.symlink(&self.path(target), &self.path(link))
    }

    /// 写入列表文件，每行一个路径。
    pub fn write_list(&self, artifact: Artifact, entries: &[PathBuf]) -> Result<()> {
        let mut contents = String::new();
        for p in entries {
            contents.push_str(&p.to_string_lossy());
            contents.push('\n');
        }
        self.write(artifact, &contents)
    }

    /// 创建临时目录与残差目录。
    pub fn prepare(&self) -> Result<()> {
        self.store.create_dir_all(&self.layout.temp_dir())?;
        self.store.create_dir_all(&self.layout.residual_dir())
    }

    /// 删除残差目录中属于当前前缀的全部链接与标志，返回删除的条目数。
    pub fn clear_residuals(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.store.list_dir(&self.layout.residual_dir())? {
            let matches = entry
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|name| self.layout.is_residual_entry(name));
            if matches && self.store.remove(&entry)? {
                debug!(path = %entry.display(), "removed stale residual entry");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// 残差目录中当前前缀的条目（链接与标志）。
    pub fn residual_entries(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .store
            .list_dir(&self.layout.residual_dir())?
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .and_then(|s| s.to_str())
                    .is_some_and(|name| self.layout.is_residual_entry(name))
            })
            .collect())
    }

    #[inline]
    pub fn exists_path(&self, path: &Path) -> bool {
        self.store.exists(path)
    }
}
