//! The task service: allocator, registry, and per-task filesystem layout.
//! Each task is itself a file service whose root lists `cmd`, `ctl`, `dir`,
//! `exit`, and `fd/`; the service composes `new/<kind>` (reading allocates),
//! `<id>/…` (delegating into a task), and `self` (the caller's own task id)
//! into a union that is consulted ahead of the live-task registry.

pub mod ctl;
mod fd;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::info;

use crate::context::{Ctx, TaskId};
use crate::error::{OpError, Result};
use crate::fs::{CellFile, File, FileInfo, FileService};
use crate::mapfs::MapFS;
use crate::namespace::Namespace;
use crate::path;
use crate::unionfs::UnionFS;

use fd::{Fd, FdService};

/// A type-specific starter, registered by kind. Starters may block or spawn
/// a concurrent worker; they must return promptly from `start` (long-running
/// work belongs in a spawned task, or the `ctl` write that invoked `start`
/// blocks for as long as the starter runs).
#[async_trait]
pub trait TaskStarter: Send + Sync {
    async fn start(&self, task: Arc<Task>) -> Result<()>;

    /// Delivered on `kill SIG`; semantics are the starter's concern.
    async fn kill(&self, task: Arc<Task>, signal: &str) -> Result<()> {
        let _ = (task, signal);
        Err(OpError::not_supported("kill", "ctl"))
    }
}

struct ExitSlot {
    code: RwLock<Option<i32>>,
    notify: Notify,
}

impl ExitSlot {
    fn new() -> Self {
        ExitSlot {
            code: RwLock::new(None),
            notify: Notify::new(),
        }
    }

    async fn set(&self, code: i32) {
        *self.code.write().await = Some(code);
        self.notify.notify_waiters();
    }

    /// Blocks until the task exits, then yields its code. A task that has
    /// already exited by the time this is called returns immediately.
    async fn wait(&self) -> i32 {
        loop {
            let notified = self.notify.notified();
            if let Some(code) = *self.code.read().await {
                return code;
            }
            notified.await;
        }
    }

    async fn peek(&self) -> Option<i32> {
        *self.code.read().await
    }
}

/// A writable text cell exposed as a single named file (`cmd`, `dir`), or a
/// read-only one if constructed with `writable: false`.
struct NamedCell {
    cell: Arc<Mutex<Vec<u8>>>,
    label: &'static str,
    writable: bool,
}

#[async_trait]
impl FileService for NamedCell {
    async fn open(&self, name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
        if name != "." {
            return Err(OpError::not_exist("open", name));
        }
        let size = self.cell.lock().await.len() as u64;
        let info = FileInfo::new(self.label, size, crate::fs::Mode::file_rw(), 0);
        Ok(Arc::new(CellFile::new(self.cell.clone(), info, self.writable)))
    }

    fn is_creator(&self) -> bool {
        self.writable
    }

    fn is_stat(&self) -> bool {
        true
    }

    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        if name != "." {
            return Err(OpError::not_exist("create", name));
        }
        self.cell.lock().await.clear();
        self.open(".", ctx).await
    }

    async fn stat_direct(&self, name: &str, _ctx: &Ctx) -> Result<FileInfo> {
        if name != "." {
            return Err(OpError::not_exist("stat", name));
        }
        Ok(FileInfo::file(self.label, self.cell.lock().await.len() as u64))
    }
}

/// `exit`: read blocks until the task exits, then yields the code as an
/// ASCII decimal string terminated by newline. Empty string means "still
/// running" — expressed here as the handle reporting zero bytes rather
/// than blocking, for a process that wants to poll instead of wait.
struct ExitFile {
    exit: Arc<ExitSlot>,
}

#[async_trait]
impl File for ExitFile {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let code = self.exit.wait().await;
        let text = format!("{code}\n");
        let n = text.len().min(buf.len());
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        Ok(n)
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(FileInfo::file_ro("exit", 0))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct ExitService {
    exit: Arc<ExitSlot>,
}

#[async_trait]
impl FileService for ExitService {
    async fn open(&self, name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
        if name != "." {
            return Err(OpError::not_exist("open", name));
        }
        Ok(Arc::new(ExitFile {
            exit: self.exit.clone(),
        }))
    }
}

/// A file yielding `"<id>\n"` for `self`, read-only.
struct SelfView {
    id: TaskId,
}

#[async_trait]
impl FileService for SelfView {
    async fn open(&self, name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
        if name != "." {
            return Err(OpError::not_exist("open", name));
        }
        Ok(Arc::new(CellFile::read_only(
            format!("{}\n", self.id).into_bytes(),
            FileInfo::file_ro("self", 0),
        )))
    }
}

/// `new`: opening `<kind>` allocates a task of that kind and yields its
/// numeric id. Not itself a Resolver — the owning `UnionFS`/`MapFS` drives
/// the recursion; this is a leaf whose `open` has a side effect.
struct AllocatorFs {
    service: Weak<TaskService>,
}

#[async_trait]
impl FileService for AllocatorFs {
    async fn open(&self, kind: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        path::check("open", kind)?;
        let service = self
            .service
            .upgrade()
            .ok_or_else(|| OpError::not_exist("open", kind))?;
        let parent_ns = match ctx.task() {
            Some(parent_id) => service.namespace_of(parent_id).await,
            None => None,
        };
        let task = service.alloc(kind, parent_ns).await?;
        let line = format!("{}\n", task.id());
        Ok(Arc::new(CellFile::read_only(
            line.into_bytes(),
            FileInfo::file_ro(kind, 0),
        )))
    }
}

/// One allocated task: an id, a kind, an owned namespace, and the control
/// surface (`cmd`/`ctl`/`dir`/`exit`/`fd`) described in the task filesystem
/// layout.
pub struct Task {
    id: TaskId,
    kind: String,
    namespace: Arc<Namespace>,
    cmd: Arc<Mutex<Vec<u8>>>,
    exit: Arc<ExitSlot>,
    fds_internal: Mutex<[Option<tokio::io::DuplexStream>; 3]>,
    root: Arc<dyn FileService>,
    self_ref: Weak<Task>,
}

impl Task {
    fn new(
        id: TaskId,
        kind: String,
        namespace: Arc<Namespace>,
        service: Weak<TaskService>,
    ) -> Arc<Task> {
        Arc::new_cyclic(|weak: &Weak<Task>| {
            let cmd = Arc::new(Mutex::new(Vec::new()));
            let dir = Arc::new(Mutex::new(Vec::new()));
            let exit = Arc::new(ExitSlot::new());

            let (fd0, internal0) = Fd::pair();
            let (fd1, internal1) = Fd::pair();
            let (fd2, internal2) = Fd::pair();

            let mut fd_children: BTreeMap<String, Arc<dyn FileService>> = BTreeMap::new();
            fd_children.insert("0".to_string(), Arc::new(FdService(fd0)));
            fd_children.insert("1".to_string(), Arc::new(FdService(fd1)));
            fd_children.insert("2".to_string(), Arc::new(FdService(fd2)));

            let mut children: BTreeMap<String, Arc<dyn FileService>> = BTreeMap::new();
            children.insert(
                "cmd".to_string(),
                Arc::new(NamedCell {
                    cell: cmd.clone(),
                    label: "cmd",
                    writable: true,
                }),
            );
            children.insert(
                "dir".to_string(),
                Arc::new(NamedCell {
                    cell: dir,
                    label: "dir",
                    writable: true,
                }),
            );
            children.insert(
                "ctl".to_string(),
                Arc::new(CtlService {
                    task: weak.clone(),
                    service: service.clone(),
                }),
            );
            children.insert(
                "exit".to_string(),
                Arc::new(ExitService { exit: exit.clone() }),
            );
            children.insert("fd".to_string(), MapFS::new(fd_children));

            Task {
                id,
                kind,
                namespace,
                cmd,
                exit,
                fds_internal: Mutex::new([Some(internal0), Some(internal1), Some(internal2)]),
                root: MapFS::new(children),
                self_ref: weak.clone(),
            }
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    pub async fn cmd(&self) -> Vec<u8> {
        self.cmd.lock().await.clone()
    }

    pub async fn set_exit(&self, code: i32) {
        self.exit.set(code).await;
    }

    pub async fn exit_code(&self) -> Option<i32> {
        self.exit.peek().await
    }

    /// Takes ownership of one internal fd half, for a starter to drive the
    /// task's stdio. Returns `None` if already taken.
    pub async fn take_fd(&self, n: usize) -> Option<tokio::io::DuplexStream> {
        self.fds_internal.lock().await.get_mut(n).and_then(Option::take)
    }

    fn self_arc(&self) -> Arc<Task> {
        self.self_ref.upgrade().expect("Task outlives its own self-reference")
    }

    /// Switches `ctx`'s origin to this task's own namespace before recursing
    /// into its file tree: the task service is dispatching across a
    /// namespace-isolation boundary, per the propagation rule `Ctx` itself
    /// documents.
    fn namespace_ctx(&self, ctx: &Ctx) -> Ctx {
        let origin: Arc<dyn FileService> = self.namespace.clone();
        ctx.clone().with_origin(&origin)
    }
}

#[async_trait]
impl FileService for Task {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        self.root.open(name, &self.namespace_ctx(ctx)).await
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

    async fn resolve(&self, name: &str, ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)> {
        self.root.resolve(name, &self.namespace_ctx(ctx)).await
    }

    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        self.root.create(name, &self.namespace_ctx(ctx)).await
    }

    async fn stat_direct(&self, name: &str, ctx: &Ctx) -> Result<FileInfo> {
        self.root.stat_direct(name, &self.namespace_ctx(ctx)).await
    }
}

/// The task's `ctl` file: write-only, parses and executes one verb per
/// newline-delimited line.
struct CtlService {
    task: Weak<Task>,
    service: Weak<TaskService>,
}

#[async_trait]
impl FileService for CtlService {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        if name != "." {
            return Err(OpError::not_exist("open", name));
        }
        Ok(Arc::new(CtlFile {
            task: self.task.clone(),
            service: self.service.clone(),
            ctx: ctx.clone(),
        }))
    }
}

struct CtlFile {
    task: Weak<Task>,
    service: Weak<TaskService>,
    ctx: Ctx,
}

impl CtlFile {
    async fn execute(&self, cmd: ctl::CtlCommand) -> Result<()> {
        let task = self
            .task
            .upgrade()
            .ok_or_else(|| OpError::not_exist("ctl", "."))?;
        let service = self
            .service
            .upgrade()
            .ok_or_else(|| OpError::not_exist("ctl", "."))?;

        match cmd {
            ctl::CtlCommand::Bind { src, dst, mode } => {
                // SRC resolves against the ctx's origin, which `Task::open`
                // pins to this task's own namespace before it ever reaches
                // `ctl` — falling back to `task.namespace` covers a `CtlFile`
                // built without that propagation (e.g. directly in tests).
                let ns = self.ctx.origin().unwrap_or_else(|| task.namespace.clone());
                task.namespace.bind(ns, &src, &dst, mode).await
            }
            ctl::CtlCommand::Unbind { src, dst } => {
                let ns = self.ctx.origin().unwrap_or_else(|| task.namespace.clone());
                task.namespace.unbind(ns, &src, &dst).await
            }
            ctl::CtlCommand::Start => {
                let starter = service.starter_for(task.kind()).await.ok_or_else(|| {
                    OpError::not_supported("ctl", format!("start {}", task.kind()))
                })?;
                starter.start(task.self_arc()).await
            }
            ctl::CtlCommand::Kill { signal } => {
                let starter = service.starter_for(task.kind()).await.ok_or_else(|| {
                    OpError::not_supported("ctl", format!("kill {}", task.kind()))
                })?;
                starter.kill(task.self_arc(), &signal).await
            }
        }
    }
}

#[async_trait]
impl File for CtlFile {
    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(buf).map_err(|_| OpError::invalid("ctl", "."))?;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let cmd = ctl::parse_line(line.trim())?;
            if let Err(err) = self.execute(cmd).await {
                // The typed `OpError` is still what callers match on; the
                // wire line is what a shell watching this file's errors over
                // a real transport would actually see crossing the boundary.
                tracing::warn!(line = %err.wire_line(), "ctl command failed");
                return Err(err);
            }
        }
        Ok(buf.len())
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(FileInfo::file_ro("ctl", 0))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// The allocator and live-task registry, itself a file service exposing
/// `new/<kind>`, `<id>/…`, and `self`.
pub struct TaskService {
    registry: RwLock<BTreeMap<TaskId, Arc<Task>>>,
    next_id: AtomicU64,
    starters: RwLock<BTreeMap<String, Arc<dyn TaskStarter>>>,
    alloc_fs: Arc<dyn FileService>,
    self_ref: Weak<TaskService>,
}

impl TaskService {
    pub fn new() -> Arc<TaskService> {
        Arc::new_cyclic(|weak: &Weak<TaskService>| TaskService {
            registry: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            starters: RwLock::new(BTreeMap::new()),
            alloc_fs: Arc::new(AllocatorFs {
                service: weak.clone(),
            }),
            self_ref: weak.clone(),
        })
    }

    fn self_arc(&self) -> Arc<dyn FileService> {
        self.self_ref
            .upgrade()
            .expect("TaskService outlives its own self-reference")
    }

    pub async fn register(&self, kind: impl Into<String>, starter: Arc<dyn TaskStarter>) {
        self.starters.write().await.insert(kind.into(), starter);
    }

    async fn starter_for(&self, kind: &str) -> Option<Arc<dyn TaskStarter>> {
        self.starters.read().await.get(kind).cloned()
    }

    async fn namespace_of(&self, id: TaskId) -> Option<Arc<Namespace>> {
        self.registry
            .read()
            .await
            .get(&id)
            .map(|t| t.namespace.clone())
    }

    /// Assigns a monotonic id, builds the task's three fd pipes and a fresh
    /// namespace (cloned from `parent` if given, else empty), and registers
    /// it. The returned task exposes its starter but does not invoke it.
    pub async fn alloc(&self, kind: &str, parent: Option<Arc<Namespace>>) -> Result<Arc<Task>> {
        path::check("alloc", kind)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let namespace = match parent {
            Some(p) => p.clone_for(Some(id)).await,
            None => Namespace::new(Some(id)),
        };
        let task = Task::new(id, kind.to_string(), namespace, self.self_ref.clone());
        self.registry.write().await.insert(id, task.clone());
        info!(id, kind, "task allocated");
        Ok(task)
    }

    /// Teardown counterpart to `alloc`: removes the task from the
    /// registry. Does not affect handles already held by callers.
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        match self.registry.write().await.remove(&id) {
            Some(_) => {
                info!(id, "task removed");
                Ok(())
            }
            None => Err(OpError::not_exist("remove", id.to_string())),
        }
    }

    /// Builds the ephemeral `{new, [self]}` map, unioned before a snapshot
    /// of the live-task registry, per the task service's own composition
    /// rule. Rebuilt on every call: `self` depends on `ctx`, and the
    /// registry snapshot must reflect the current set of tasks.
    async fn compose(&self, ctx: &Ctx) -> Arc<dyn FileService> {
        let mut ephemeral: BTreeMap<String, Arc<dyn FileService>> = BTreeMap::new();
        ephemeral.insert("new".to_string(), self.alloc_fs.clone());
        if let Some(id) = ctx.task() {
            ephemeral.insert("self".to_string(), Arc::new(SelfView { id }));
        }
        let ephemeral_map = MapFS::new(ephemeral);

        let mut tasks: BTreeMap<String, Arc<dyn FileService>> = BTreeMap::new();
        for (id, task) in self.registry.read().await.iter() {
            tasks.insert(id.to_string(), task.clone());
        }
        let tasks_map = MapFS::new(tasks);

        UnionFS::new(vec![ephemeral_map, tasks_map])
    }
}

#[async_trait]
impl FileService for TaskService {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        let union = self.compose(ctx).await;
        union.open(name, ctx).await
    }

    fn is_resolver(&self) -> bool {
        true
    }

    fn is_creator(&self) -> bool {
        true
    }

    async fn resolve(&self, name: &str, ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)> {
        path::check("resolve", name)?;
        let union = self.compose(ctx).await;
        let (fs, rel) = union.resolve(name, ctx).await?;
        if Arc::ptr_eq(&fs, &union) && rel == name {
            // The ephemeral composition is rebuilt every call and so never
            // has a stable identity of its own; translate its self-fixpoint
            // back to the task service's own stable identity so the
            // recursive resolver's fixpoint test still terminates.
            return Ok((self.self_arc(), name.to_string()));
        }
        Ok((fs, rel))
    }

    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        let union = self.compose(ctx).await;
        union.create(name, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reading_new_kind_allocates_a_task() {
        let service = TaskService::new();
        let ctx = Ctx::detached();
        let fs: Arc<dyn FileService> = service.clone();

        let opened = fs.open("new/ns", &ctx).await.unwrap();
        let mut buf = [0u8; 16];
        let n = opened.read(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.trim().parse::<u64>().is_ok());
    }

    #[tokio::test]
    async fn allocated_task_is_listed_in_readdir() {
        let service = TaskService::new();
        let ctx = Ctx::detached();
        let fs: Arc<dyn FileService> = service.clone();

        let opened = fs.open("new/ns", &ctx).await.unwrap();
        let mut buf = [0u8; 16];
        let n = opened.read(&mut buf).await.unwrap();
        let id_str = std::str::from_utf8(&buf[..n]).unwrap().trim().to_string();

        let root = fs.open(".", &ctx).await.unwrap();
        let listing = root.readdir().await.unwrap();
        assert!(listing.iter().any(|e| e.name == id_str));
    }

    #[tokio::test]
    async fn create_through_task_reaches_cmd_file() {
        let service = TaskService::new();
        let ctx = Ctx::detached();
        let fs: Arc<dyn FileService> = service.clone();

        let opened = fs.open("new/ns", &ctx).await.unwrap();
        let mut buf = [0u8; 16];
        let n = opened.read(&mut buf).await.unwrap();
        let id_str = std::str::from_utf8(&buf[..n]).unwrap().trim().to_string();

        let handle = fs.create(&format!("{id_str}/cmd"), &ctx).await.unwrap();
        handle.write(b"hello").await.unwrap();

        let reread = fs.open(&format!("{id_str}/cmd"), &ctx).await.unwrap();
        let mut out = [0u8; 5];
        let n = reread.read(&mut out).await.unwrap();
        assert_eq!(&out[..n], b"hello");
    }

    #[tokio::test]
    async fn alloc_then_remove_leaves_registry_unchanged() {
        let service = TaskService::new();
        let before_ids: Vec<TaskId> = service.registry.read().await.keys().cloned().collect();

        let task = service.alloc("ns", None).await.unwrap();
        service.remove(task.id()).await.unwrap();

        let after_ids: Vec<TaskId> = service.registry.read().await.keys().cloned().collect();
        assert_eq!(before_ids, after_ids);
    }
}
