//! The three bidirectional pipes every task exposes at `fd/0`, `fd/1`,
//! `fd/2`. Each is a `tokio::io::duplex` pair: the task keeps the internal
//! end (handed to its starter), the external end is placed behind a file
//! service at `fd/<n>` so filesystem readers/writers see the peer's bytes.
//! Closing a pipe signals EOF to the peer, which is exactly what dropping a
//! `DuplexStream` half already does.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;

use crate::context::Ctx;
use crate::error::{OpError, Result};
use crate::fs::{File, FileInfo, FileService};

const FD_BUFFER: usize = 8192;

pub struct Fd {
    external: Mutex<DuplexStream>,
}

impl Fd {
    /// Returns the task-facing (external, filesystem-exposed) half and the
    /// internal half a starter uses to actually drive the task.
    pub fn pair() -> (Arc<Fd>, DuplexStream) {
        let (external, internal) = tokio::io::duplex(FD_BUFFER);
        (
            Arc::new(Fd {
                external: Mutex::new(external),
            }),
            internal,
        )
    }
}

/// A file service exposing one `Fd`'s external end as `open(".")`.
pub struct FdService(pub Arc<Fd>);

#[async_trait]
impl FileService for FdService {
    async fn open(&self, name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
        if name != "." {
            return Err(OpError::not_exist("open", name));
        }
        Ok(Arc::new(FdFile(self.0.clone())))
    }

    fn is_stat(&self) -> bool {
        true
    }

    async fn stat_direct(&self, name: &str, _ctx: &Ctx) -> Result<FileInfo> {
        if name != "." {
            return Err(OpError::not_exist("stat", name));
        }
        Ok(FileInfo::file_ro(".", 0))
    }
}

struct FdFile(Arc<Fd>);

#[async_trait]
impl File for FdFile {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut stream = self.0.external.lock().await;
        stream.read(buf).await.map_err(|e| OpError::io("read", ".", e))
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut stream = self.0.external.lock().await;
        stream.write(buf).await.map_err(|e| OpError::io("write", ".", e))
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(FileInfo::file_ro(".", 0))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
