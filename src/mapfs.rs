//! `MapFS` — the prefix-routing composite. A map from destination path (no
//! leading slash) to a member file service, advertising Resolver, Creator,
//! and open/stat.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::context::Ctx;
use crate::error::{OpError, Result};
use crate::fs::{File, FileInfo, FileService};
use crate::path;

pub struct MapFS {
    children: BTreeMap<String, Arc<dyn FileService>>,
    self_ref: Weak<dyn FileService>,
}

impl MapFS {
    /// Built self-referentially via `Arc::new_cyclic` so `resolve`'s
    /// fixpoint case (`(self, name)`) can return the same `Arc` identity
    /// callers hold, not a copy.
    pub fn new(children: BTreeMap<String, Arc<dyn FileService>>) -> Arc<dyn FileService> {
        Arc::new_cyclic(|weak: &Weak<dyn FileService>| MapFS {
            children,
            self_ref: weak.clone(),
        })
    }

    fn self_arc(&self) -> Arc<dyn FileService> {
        self.self_ref
            .upgrade()
            .expect("MapFS outlives its own self-reference")
    }

    fn keys(&self) -> Vec<&str> {
        self.children.keys().map(|s| s.as_str()).collect()
    }

    /// Immediate children for a synthetic directory listing: single-segment
    /// keys become direct entries, multi-segment keys contribute their
    /// first segment as a synthesized subdirectory. Entries are
    /// deduplicated and sorted lexicographically.
    async fn immediate_children(&self, ctx: &Ctx) -> Result<Vec<FileInfo>> {
        let mut names: std::collections::BTreeSet<String> = Default::default();
        for key in self.children.keys() {
            let first = key.split('/').next().unwrap_or(key);
            names.insert(first.to_string());
        }

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let info = if let Some(value) = self.children.get(&name) {
                self.stat_of_value(value, &name, ctx).await
            } else {
                FileInfo::dir(&name)
            };
            entries.push(info);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Stat a direct child's root, preferring its own Stat capability and
    /// falling back to `open(".").stat()`; synthesizes a bare directory
    /// entry if neither answers.
    async fn stat_of_value(&self, value: &Arc<dyn FileService>, name: &str, ctx: &Ctx) -> FileInfo {
        if value.is_stat() {
            if let Ok(mut info) = value.stat_direct(".", ctx).await {
                info.name = name.to_string();
                return info;
            }
        }
        if let Ok(handle) = value.open(".", ctx).await {
            if let Ok(mut info) = handle.stat().await {
                info.name = name.to_string();
                return info;
            }
        }
        FileInfo::dir(name)
    }
}

#[async_trait]
impl FileService for MapFS {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        path::check("open", name)?;

        if name == "." {
            let entries = self.immediate_children(ctx).await?;
            return Ok(Arc::new(MapDir { entries }) as Arc<dyn File>);
        }

        if let Some(value) = self.children.get(name) {
            return value.open(".", ctx).await;
        }

        let matches = path::match_paths(self.keys(), name);
        if let Some(k) = matches.first() {
            let rel = path::trim_prefix(name, k);
            let value = self.children.get(*k).expect("match_paths key exists");
            return value.open(&rel, ctx).await;
        }

        // No exact or prefix match: synthesize a directory if `name` is a
        // strict prefix of some key, otherwise NOT_EXIST.
        if self.children.keys().any(|k| k.starts_with(&format!("{name}/"))) {
            let prefix = format!("{name}/");
            let mut names: std::collections::BTreeSet<String> = Default::default();
            for key in self.children.keys() {
                if let Some(rest) = key.strip_prefix(&prefix) {
                    let first = rest.split('/').next().unwrap_or(rest);
                    names.insert(first.to_string());
                }
            }
            let entries = names.into_iter().map(FileInfo::dir).collect();
            return Ok(Arc::new(MapDir { entries }) as Arc<dyn File>);
        }

        Err(OpError::not_exist("open", name))
    }

    fn is_resolver(&self) -> bool {
        true
    }

    fn is_creator(&self) -> bool {
        true
    }

    fn is_stat(&self) -> bool {
        true
    }

    async fn resolve(&self, name: &str, _ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)> {
        path::check("resolve", name)?;

        if let Some(value) = self.children.get(name) {
            return Ok((value.clone(), ".".to_string()));
        }

        let matches = path::match_paths(self.keys(), name);
        if let Some(k) = matches.first() {
            let rel = path::trim_prefix(name, k);
            let value = self.children.get(*k).expect("match_paths key exists");
            return Ok((value.clone(), rel));
        }

        Ok((self.self_arc(), name.to_string()))
    }

    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        path::check("create", name)?;

        let (value, rel) = if let Some(value) = self.children.get(name) {
            (value.clone(), ".".to_string())
        } else {
            let matches = path::match_paths(self.keys(), name);
            match matches.first() {
                Some(k) => {
                    let rel = path::trim_prefix(name, k);
                    (self.children.get(*k).expect("match_paths key exists").clone(), rel)
                }
                None => return Err(OpError::not_exist("create", name)),
            }
        };

        if value.is_creator() {
            return value.create(&rel, ctx).await;
        }
        if let Ok(handle) = value.open(&rel, ctx).await {
            return Ok(handle);
        }
        Err(OpError::not_exist("create", name))
    }

    async fn stat_direct(&self, name: &str, ctx: &Ctx) -> Result<FileInfo> {
        path::check("stat", name)?;

        if name == "." {
            return Ok(FileInfo::dir("."));
        }
        if let Some(value) = self.children.get(name) {
            return Ok(self.stat_of_value(value, name, ctx).await);
        }
        let matches = path::match_paths(self.keys(), name);
        if let Some(k) = matches.first() {
            let rel = path::trim_prefix(name, k);
            let value = self.children.get(*k).expect("match_paths key exists");
            if value.is_stat() {
                return value.stat_direct(&rel, ctx).await;
            }
            let handle = value.open(&rel, ctx).await?;
            return handle.stat().await;
        }
        Err(OpError::not_exist("stat", name))
    }
}

/// A synthesized directory handle over a fixed entry list, used for every
/// MapFS directory listing (both `.` and fabricated intermediate prefixes).
struct MapDir {
    entries: Vec<FileInfo>,
}

#[async_trait]
impl File for MapDir {
    async fn stat(&self) -> Result<FileInfo> {
        Ok(FileInfo::dir("."))
    }

    async fn readdir(&self) -> Result<Vec<FileInfo>> {
        Ok(self.entries.clone())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFs;

    #[tokio::test]
    async fn exact_match_resolves_to_dot() {
        let leaf = MemFs::new();
        let mut children = BTreeMap::new();
        children.insert("dom".to_string(), leaf.clone());
        let map = MapFS::new(children);
        let ctx = Ctx::detached();

        let (fs, rel) = map.resolve("dom", &ctx).await.unwrap();
        assert!(Arc::ptr_eq(&fs, &leaf));
        assert_eq!(rel, ".");
    }

    #[tokio::test]
    async fn two_level_descent_preserves_full_relative_path() {
        let leaf = MemFs::new();
        leaf.create("data", &Ctx::detached()).await.unwrap();

        let mut inner_children = BTreeMap::new();
        inner_children.insert("dom".to_string(), leaf.clone());
        let inner = MapFS::new(inner_children);

        let mut outer_children = BTreeMap::new();
        outer_children.insert("web".to_string(), inner);
        let outer = MapFS::new(outer_children);

        let ctx = Ctx::detached();
        let (resolved_fs, resolved_name) =
            crate::resolver::resolve(outer, "web/dom/1/data", &ctx).await.unwrap();
        assert!(Arc::ptr_eq(&resolved_fs, &leaf));
        assert_eq!(resolved_name, "1/data");
    }

    #[tokio::test]
    async fn unmatched_name_is_its_own_fixpoint() {
        let map = MapFS::new(BTreeMap::new());
        let ctx = Ctx::detached();
        let (fs, name) = map.resolve("nope", &ctx).await.unwrap();
        assert!(Arc::ptr_eq(&fs, &map));
        assert_eq!(name, "nope");
    }
}
