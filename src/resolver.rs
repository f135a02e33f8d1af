//! The recursive resolver: the single source of truth for path resolution
//! recursion. Individual file services perform exactly one hop; this loop
//! drives repeated hops to a fixpoint.
//!
//! A prior design pushed recursion into each composite's own resolver,
//! where composites had to decide whether to keep unwrapping their
//! children. That repeatedly mis-stripped path prefixes across two-level
//! nestings (stabilizing on an outer MapFS with an inner path that had
//! lost a segment). Centralizing recursion here makes each resolver
//! responsible for one hop and makes correctness a local property.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::context::Ctx;
use crate::error::{OpError, Result};
use crate::fs::{File, FileInfo, FileService};

/// Bound on fixpoint iterations. A composition that never stabilizes within
/// this many hops indicates a bug, not a legitimate deep nesting.
pub const DEFAULT_DEPTH_LIMIT: usize = 100;

/// Drives `(fs, name)` to a fixpoint using the default depth limit.
pub async fn resolve(
    fs: Arc<dyn FileService>,
    name: &str,
    ctx: &Ctx,
) -> Result<(Arc<dyn FileService>, String)> {
    resolve_with_limit(fs, name, ctx, DEFAULT_DEPTH_LIMIT).await
}

/// Drives `(fs, name)` to a fixpoint, or fails with `DEPTH_EXCEEDED` after
/// `limit` hops. A resolver at its fixpoint is a non-resolver, or a resolver
/// that returns itself identically with the same name.
pub async fn resolve_with_limit(
    fs: Arc<dyn FileService>,
    name: &str,
    ctx: &Ctx,
    limit: usize,
) -> Result<(Arc<dyn FileService>, String)> {
    crate::path::check("resolve", name)?;

    let mut cur_fs = fs;
    let mut cur_name = name.to_string();

    for _ in 0..limit {
        ctx.check_cancelled("resolve", &cur_name)?;

        if !cur_fs.is_resolver() {
            return Ok((cur_fs, cur_name));
        }

        trace!(name = %cur_name, "resolve hop");
        let (next_fs, next_name) = cur_fs.resolve(&cur_name, ctx).await?;

        if Arc::ptr_eq(&next_fs, &cur_fs) && next_name == cur_name {
            return Ok((cur_fs, cur_name));
        }

        cur_fs = next_fs;
        cur_name = next_name;
    }

    warn!(name = %name, "resolution depth exceeded");
    Err(OpError::depth_exceeded("resolve", name))
}

/// The optional capability a leaf may be asked to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Resolver,
    Creator,
    Stat,
}

/// Outcome of `resolve_to`.
pub enum Typed {
    Creator(Arc<dyn FileService>, String),
    Stat(Arc<dyn FileService>, String),
}

impl Typed {
    pub async fn create(&self, ctx: &Ctx) -> Result<Arc<dyn File>> {
        match self {
            Typed::Creator(fs, name) => fs.create(name, ctx).await,
            Typed::Stat(_, name) => Err(OpError::not_supported("create", name.clone())),
        }
    }

    pub async fn stat(&self, ctx: &Ctx) -> Result<FileInfo> {
        match self {
            Typed::Stat(fs, name) => fs.stat_direct(name, ctx).await,
            Typed::Creator(_, name) => Err(OpError::not_supported("stat", name.clone())),
        }
    }
}

/// First runs the resolver to a fixpoint, then checks whether the leaf
/// exposes the requested capability. This is how higher layers ask "is
/// there a stat-capable (or creator-capable) leaf for this name?" without
/// re-descending the whole composition themselves.
pub async fn resolve_to(
    fs: Arc<dyn FileService>,
    name: &str,
    ctx: &Ctx,
    want: Capability,
) -> Result<Typed> {
    let (leaf, rel) = resolve(fs, name, ctx).await?;
    match want {
        Capability::Creator if leaf.is_creator() => Ok(Typed::Creator(leaf, rel)),
        Capability::Stat if leaf.is_stat() => Ok(Typed::Stat(leaf, rel)),
        _ => Err(OpError::not_supported("resolve_to", rel)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// A resolver that always returns a fresh, non-identity-equal wrapper
    /// around itself — never reaches a fixpoint. Grounds the depth-limit
    /// scenario.
    struct NeverSettles;

    #[async_trait]
    impl FileService for NeverSettles {
        async fn open(&self, _name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
            Err(OpError::not_supported("open", "."))
        }

        fn is_resolver(&self) -> bool {
            true
        }

        async fn resolve(&self, name: &str, _ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)> {
            Ok((Arc::new(NeverSettles), name.to_string()))
        }
    }

    #[tokio::test]
    async fn depth_exceeded_after_default_limit() {
        let fs: Arc<dyn FileService> = Arc::new(NeverSettles);
        let ctx = Ctx::detached();
        let err = resolve(fs, "x", &ctx).await.unwrap_err();
        assert_eq!(*err.kind(), crate::error::CoreError::DepthExceeded);
    }

    #[tokio::test]
    async fn non_resolver_is_its_own_fixpoint() {
        struct Plain;
        #[async_trait]
        impl FileService for Plain {
            async fn open(&self, _name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
                Err(OpError::not_supported("open", "."))
            }
        }
        let fs: Arc<dyn FileService> = Arc::new(Plain);
        let ctx = Ctx::detached();
        let (leaf, name) = resolve(fs.clone(), "a/b", &ctx).await.unwrap();
        assert!(Arc::ptr_eq(&leaf, &fs));
        assert_eq!(name, "a/b");
    }
}
