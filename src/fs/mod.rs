//! The File Service contract and the capability hierarchy every composite
//! and leaf in this crate is built against.
//!
//! A file service is a value implementing [`FileService::open`] and
//! advertising zero or more optional capability sets (Resolver, Creator,
//! Stat) via boolean flag methods. Capability detection never downcasts a
//! trait object to a concrete type: composites ask `is_resolver()` /
//! `is_creator()` / `is_stat()` and, if true, call the corresponding method,
//! which otherwise returns `NOT_SUPPORTED`.

pub mod file_info;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Ctx;
use crate::error::{OpError, Result};

pub use file_info::{FileInfo, Mode};

/// Origin for a seek, mirroring the standard three seek anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// An open handle. Every handle must support `close`; directory handles must
/// additionally support `readdir`.
#[async_trait]
pub trait File: Send + Sync {
    async fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(OpError::not_supported("read", "."))
    }

    async fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(OpError::not_supported("write", "."))
    }

    async fn seek(&self, _pos: i64, _whence: Whence) -> Result<u64> {
        Err(OpError::not_supported("seek", "."))
    }

    async fn stat(&self) -> Result<FileInfo> {
        Err(OpError::not_supported("stat", "."))
    }

    /// Directory handles return their immediate children, sorted
    /// lexicographically; non-directory handles return `NOT_SUPPORTED`.
    async fn readdir(&self) -> Result<Vec<FileInfo>> {
        Err(OpError::not_supported("readdir", "."))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One hop of path resolution. A resolver asked about a name it does not
/// locally compose must return `(self, name)` unchanged: it must never
/// fabricate `NOT_EXIST` merely because it does not own the name locally —
/// that determination belongs to the recursive resolver's fixpoint test.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, name: &str, ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)>;
}

/// Atomic create-or-truncate, returning a writable handle.
#[async_trait]
pub trait Creator: Send + Sync {
    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>>;
}

/// Direct stat without opening, used to avoid directory-descent storms on
/// composites whose `open(".")` would otherwise require statting every
/// mount's root just to answer one name.
#[async_trait]
pub trait Stat: Send + Sync {
    async fn stat(&self, name: &str, ctx: &Ctx) -> Result<FileInfo>;
}

/// The base contract every file service implements, plus advertisement of
/// which optional capabilities it supports. `Arc::ptr_eq` on `Arc<dyn
/// FileService>` is the identity-equality mechanism used for fixpoint
/// detection and union member de-duplication: two references are equal iff
/// they refer to the same live service instance.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>>;

    fn is_resolver(&self) -> bool {
        false
    }

    fn is_creator(&self) -> bool {
        false
    }

    fn is_stat(&self) -> bool {
        false
    }

    async fn resolve(&self, _name: &str, _ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)> {
        Err(OpError::not_supported("resolve", "."))
    }

    async fn create(&self, _name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
        Err(OpError::not_supported("create", "."))
    }

    async fn stat_direct(&self, _name: &str, _ctx: &Ctx) -> Result<FileInfo> {
        Err(OpError::not_supported("stat", "."))
    }
}

/// Identity-equality for two file service references.
pub fn same_identity(a: &Arc<dyn FileService>, b: &Arc<dyn FileService>) -> bool {
    Arc::ptr_eq(a, b)
}

/// A handle over a shared, mutable byte buffer. Every read/write operates on
/// the same cell, so a `write` through one handle is visible to a later
/// `open` of the same name — what an in-memory leaf filesystem needs for its
/// file content to survive across repeated opens.
pub struct CellFile {
    data: Arc<tokio::sync::Mutex<Vec<u8>>>,
    pos: tokio::sync::Mutex<u64>,
    info: FileInfo,
    writable: bool,
}

impl CellFile {
    pub fn new(data: Arc<tokio::sync::Mutex<Vec<u8>>>, info: FileInfo, writable: bool) -> Self {
        CellFile {
            data,
            pos: tokio::sync::Mutex::new(0),
            info,
            writable,
        }
    }

    /// A handle over a private, freshly allocated cell — for synthetic
    /// read-only content that has no backing node to share.
    pub fn read_only(bytes: Vec<u8>, info: FileInfo) -> Self {
        CellFile::new(Arc::new(tokio::sync::Mutex::new(bytes)), info, false)
    }
}

#[async_trait]
impl File for CellFile {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.lock().await;
        let mut pos = self.pos.lock().await;
        let start = (*pos as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        *pos += n as u64;
        Ok(n)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(OpError::permission("write", &self.info.name));
        }
        let mut data = self.data.lock().await;
        let mut pos = self.pos.lock().await;
        let start = *pos as usize;
        if start + buf.len() > data.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        *pos += buf.len() as u64;
        Ok(buf.len())
    }

    async fn seek(&self, offset: i64, whence: Whence) -> Result<u64> {
        let data = self.data.lock().await;
        let mut pos = self.pos.lock().await;
        let base: i64 = match whence {
            Whence::Start => 0,
            Whence::Current => *pos as i64,
            Whence::End => data.len() as i64,
        };
        let next = base + offset;
        if next < 0 {
            return Err(OpError::invalid("seek", &self.info.name));
        }
        *pos = next as u64;
        Ok(*pos)
    }

    async fn stat(&self) -> Result<FileInfo> {
        let data = self.data.lock().await;
        let mut info = self.info.clone();
        info.size = data.len() as u64;
        Ok(info)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cell_file_persists_writes_across_handles() {
        let info = FileInfo::file("x", 0);
        let cell = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let h1 = CellFile::new(cell.clone(), info.clone(), true);
        h1.write(b"hello").await.unwrap();

        let h2 = CellFile::new(cell, info, true);
        let mut buf = [0u8; 5];
        let n = h2.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn read_only_cell_rejects_writes() {
        let info = FileInfo::file("ro", 0);
        let f = CellFile::read_only(b"abc".to_vec(), info);
        assert!(f.write(b"x").await.is_err());
        let mut buf = [0u8; 3];
        let n = f.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");
    }
}
