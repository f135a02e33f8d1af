//! A minimal in-memory leaf file service. No Resolver capability — it is a
//! leaf, not a composite — but Creator, Stat, and directory listing, which
//! is enough for tests and the host demo to bind as a concrete backing
//! store. Grounded on the teacher's own in-memory VFS example, which keeps
//! a single `RwLock`-guarded tree of nodes rather than touching a real
//! filesystem.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::context::Ctx;
use crate::error::{OpError, Result};
use crate::fs::{CellFile, File, FileInfo, FileService, Mode};
use crate::path;

/// Unix timestamp of the call, for real nodes this leaf backs. Synthetic
/// entries elsewhere in the crate keep the `0` that `FileInfo::file`/`dir`
/// default to; this is the one leaf with live content worth dating.
fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct Node {
    kind: NodeKind,
    mtime: u64,
}

enum NodeKind {
    Dir(BTreeMap<String, Node>),
    File(Arc<Mutex<Vec<u8>>>),
}

impl Node {
    fn dir() -> Self {
        Node { kind: NodeKind::Dir(BTreeMap::new()), mtime: now() }
    }

    fn file(cell: Arc<Mutex<Vec<u8>>>) -> Self {
        Node { kind: NodeKind::File(cell), mtime: now() }
    }
}

pub struct MemFs {
    root: RwLock<Node>,
    self_ref: Weak<dyn FileService>,
}

impl MemFs {
    pub fn new() -> Arc<dyn FileService> {
        Arc::new_cyclic(|weak: &Weak<dyn FileService>| MemFs {
            root: RwLock::new(Node::dir()),
            self_ref: weak.clone(),
        })
    }

    fn split(name: &str) -> Vec<&str> {
        if name == "." {
            Vec::new()
        } else {
            name.split('/').collect()
        }
    }

    /// Walks to the parent directory of `segs`, creating intermediate
    /// directories as needed, and returns the final segment name.
    fn dir_and_last<'a>(root: &'a mut Node, segs: &[&'a str]) -> Result<(&'a mut BTreeMap<String, Node>, &'a str)> {
        let Some((last, parents)) = segs.split_last() else {
            return Err(OpError::invalid("create", "."));
        };
        let mut cur = match &mut root.kind {
            NodeKind::Dir(map) => map,
            NodeKind::File(_) => return Err(OpError::invalid("create", ".")),
        };
        for seg in parents {
            let entry = cur.entry(seg.to_string()).or_insert_with(Node::dir);
            cur = match &mut entry.kind {
                NodeKind::Dir(map) => map,
                NodeKind::File(_) => return Err(OpError::invalid("create", *seg)),
            };
        }
        Ok((cur, last))
    }

    fn lookup<'a>(root: &'a Node, segs: &[&str]) -> Option<&'a Node> {
        let mut cur = root;
        for seg in segs {
            match &cur.kind {
                NodeKind::Dir(map) => cur = map.get(*seg)?,
                NodeKind::File(_) => return None,
            }
        }
        Some(cur)
    }
}

#[async_trait]
impl FileService for MemFs {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        path::check("open", name)?;
        ctx.check_cancelled("open", name)?;
        let segs = Self::split(name);
        let root = self.root.read().await;
        match Self::lookup(&root, &segs) {
            Some(node) => match &node.kind {
                NodeKind::File(cell) => {
                    let size = cell.lock().await.len() as u64;
                    let info = FileInfo::new(*segs.last().unwrap_or(&"."), size, Mode::file_rw(), node.mtime);
                    Ok(Arc::new(CellFile::new(cell.clone(), info, true)))
                }
                NodeKind::Dir(map) => {
                    let entries = map
                        .iter()
                        .map(|(k, v)| match &v.kind {
                            NodeKind::Dir(_) => FileInfo::new(k, 0, Mode::dir(), v.mtime),
                            NodeKind::File(_) => FileInfo::new(k, 0, Mode::file_rw(), v.mtime),
                        })
                        .collect();
                    Ok(Arc::new(MemDir { entries }))
                }
            },
            None => Err(OpError::not_exist("open", name)),
        }
    }

    fn is_creator(&self) -> bool {
        true
    }

    fn is_stat(&self) -> bool {
        true
    }

    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        path::check("create", name)?;
        ctx.check_cancelled("create", name)?;
        let segs = Self::split(name);
        let mut root = self.root.write().await;
        let (dir, last) = Self::dir_and_last(&mut root, &segs)?;
        let stamp = now();
        let cell = match dir.get_mut(last) {
            Some(node) => match &mut node.kind {
                NodeKind::File(cell) => {
                    cell.lock().await.clear();
                    node.mtime = stamp;
                    cell.clone()
                }
                NodeKind::Dir(_) => return Err(OpError::invalid("create", name)),
            },
            None => {
                let cell = Arc::new(Mutex::new(Vec::new()));
                dir.insert(last.to_string(), Node::file(cell.clone()));
                cell
            }
        };
        Ok(Arc::new(CellFile::new(cell, FileInfo::new(last, 0, Mode::file_rw(), stamp), true)))
    }

    async fn stat_direct(&self, name: &str, _ctx: &Ctx) -> Result<FileInfo> {
        path::check("stat", name)?;
        let segs = Self::split(name);
        let root = self.root.read().await;
        let node_name = segs.last().copied().unwrap_or(".");
        match Self::lookup(&root, &segs) {
            Some(node) => match &node.kind {
                NodeKind::File(cell) => {
                    let size = cell.lock().await.len() as u64;
                    Ok(FileInfo::new(node_name, size, Mode::file_rw(), node.mtime))
                }
                NodeKind::Dir(_) => Ok(FileInfo::new(node_name, 0, Mode::dir(), node.mtime)),
            },
            None => Err(OpError::not_exist("stat", name)),
        }
    }
}

struct MemDir {
    entries: Vec<FileInfo>,
}

#[async_trait]
impl File for MemDir {
    async fn stat(&self) -> Result<FileInfo> {
        Ok(FileInfo::dir("."))
    }

    async fn readdir(&self) -> Result<Vec<FileInfo>> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_write_then_read_round_trips() {
        let fs = MemFs::new();
        let ctx = Ctx::detached();
        let handle = fs.create("a/b.txt", &ctx).await.unwrap();
        handle.write(b"hello").await.unwrap();

        let read_handle = fs.open("a/b.txt", &ctx).await.unwrap();
        let mut buf = [0u8; 5];
        let n = read_handle.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn readdir_lists_children_sorted() {
        let fs = MemFs::new();
        let ctx = Ctx::detached();
        fs.create("b", &ctx).await.unwrap();
        fs.create("a", &ctx).await.unwrap();

        let dir = fs.open(".", &ctx).await.unwrap();
        let entries = dir.readdir().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn stat_direct_reports_size() {
        let fs = MemFs::new();
        let ctx = Ctx::detached();
        let h = fs.create("f", &ctx).await.unwrap();
        h.write(b"abc").await.unwrap();
        let info = fs.stat_direct("f", &ctx).await.unwrap();
        assert_eq!(info.size, 3);
        assert!(!info.is_dir());
    }
}
