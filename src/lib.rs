//! A capability-oriented virtual filesystem namespace core, in the
//! Plan 9 tradition: file services expose a uniform `open`/`resolve`
//! contract, composites (`MapFS`, `UnionFS`, `Namespace`) combine them by
//! prefix routing, ordered union, and per-task bind tables, and a task
//! service exposes the composition itself as a filesystem.
//!
//! The library never installs a `tracing` subscriber or reads
//! configuration; both are host concerns (see [`config`] and the
//! `basic_host` example).

pub mod config;
pub mod context;
pub mod error;
pub mod fs;
pub mod mapfs;
pub mod memfs;
pub mod namespace;
pub mod path;
pub mod resolver;
pub mod task;
pub mod unionfs;

pub use config::CoreConfig;
pub use context::{Cancel, Ctx, TaskId};
pub use error::{CoreError, OpError, Result};
pub use fs::{File, FileInfo, FileService, Mode, Whence};
pub use mapfs::MapFS;
pub use memfs::MemFs;
pub use namespace::{BindMode, Namespace};
pub use resolver::{resolve, resolve_to, resolve_with_limit};
pub use task::{Task, TaskService, TaskStarter};
pub use unionfs::UnionFS;
