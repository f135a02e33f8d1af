//! A minimal host wiring the namespace core together: reads an optional
//! TOML config, builds a namespace with a bound in-memory filesystem,
//! allocates an `echo` task through the task service, and drives it to
//! exit. Stands in for the out-of-scope browser/WASI/x86 hosting layers —
//! it is not a reimplementation of any of them.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use nsvfs_core::{BindMode, CoreConfig, Ctx, FileService, MemFs, Namespace, Task, TaskService, TaskStarter};

#[derive(Parser, Debug)]
#[command(name = "basic-host", about = "Demo host for the namespace core")]
struct Args {
    /// Optional TOML config file; missing fields fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the resolver depth limit from the config file, if any.
    #[arg(long)]
    resolver_depth_limit: Option<usize>,
}

/// Echoes the task's `cmd` file to `fd/1`, then exits 0. A stand-in for a
/// real process-execution starter, which is out of scope for this crate.
struct EchoStarter;

#[async_trait]
impl TaskStarter for EchoStarter {
    async fn start(&self, task: Arc<Task>) -> Result<(), nsvfs_core::OpError> {
        use tokio::io::AsyncWriteExt;

        let cmd = task.cmd().await;
        if let Some(mut stdout) = task.take_fd(1).await {
            let _ = stdout.write_all(&cmd).await;
        }
        task.set_exit(0).await;
        info!(id = task.id(), "echo task exited");
        Ok(())
    }
}

fn load_config(args: &Args) -> CoreConfig {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).unwrap_or_default();
            CoreConfig::from_toml(&text).unwrap_or_default()
        }
        None => CoreConfig::default(),
    };
    if let Some(limit) = args.resolver_depth_limit {
        config.resolver_depth_limit = limit;
    }
    config
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args);
    info!(?config, "starting basic_host");

    let ns = Namespace::new(None);
    let data: Arc<dyn FileService> = MemFs::new();
    ns.bind(data, ".", "mnt", BindMode::After)
        .await
        .expect("bind mnt");

    let tasks = TaskService::new();
    tasks.register("echo", Arc::new(EchoStarter)).await;

    let root: Arc<dyn FileService> = ns.clone();
    let ctx = Ctx::new(&root);
    let service_fs: Arc<dyn FileService> = tasks.clone();

    let handle = service_fs
        .open("new/echo", &ctx)
        .await
        .expect("allocate echo task");
    let mut buf = [0u8; 16];
    let n = handle.read(&mut buf).await.expect("read allocated id");
    let id_str = std::str::from_utf8(&buf[..n]).unwrap().trim().to_string();

    let cmd_handle = service_fs
        .create(&format!("{id_str}/cmd"), &ctx)
        .await
        .expect("create cmd file");
    cmd_handle
        .write(b"hello from basic_host")
        .await
        .expect("write cmd");

    let ctl_handle = service_fs
        .open(&format!("{id_str}/ctl"), &ctx)
        .await
        .expect("open ctl");
    ctl_handle.write(b"start\n").await.expect("write start");

    let exit_handle = service_fs
        .open(&format!("{id_str}/exit"), &ctx)
        .await
        .expect("open exit");
    let mut exit_buf = [0u8; 8];
    let n = exit_handle.read(&mut exit_buf).await.expect("read exit");
    let code = std::str::from_utf8(&exit_buf[..n]).unwrap().trim();

    println!("task {id_str} exited with code {code}, resolver_depth_limit={}", config.resolver_depth_limit);
}
