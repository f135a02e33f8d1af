//! `UnionFS` — an ordered, read-through merged view over member file
//! services, with write-preferring member selection: under a writable
//! context, the first member to advertise Creator for a name wins.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::context::Ctx;
use crate::error::{CoreError, OpError, Result};
use crate::fs::{File, FileInfo, FileService};

pub struct UnionFS {
    members: Vec<Arc<dyn FileService>>,
    self_ref: Weak<dyn FileService>,
}

impl UnionFS {
    pub fn new(members: Vec<Arc<dyn FileService>>) -> Arc<dyn FileService> {
        Arc::new_cyclic(|weak: &Weak<dyn FileService>| UnionFS {
            members,
            self_ref: weak.clone(),
        })
    }

    fn self_arc(&self) -> Arc<dyn FileService> {
        self.self_ref
            .upgrade()
            .expect("UnionFS outlives its own self-reference")
    }

    /// One member's resolve attempt, gated on whether resolution actually
    /// *moved* (member or name changed). A bare self-fixpoint — the member
    /// declaring "I don't locally own this name" per the resolver contract
    /// — is not an ownership claim and must not be mistaken for one, even
    /// though a MapFS member unconditionally advertises `is_creator()`.
    /// Without this gate, a MapFS member's own fixpoint on an unbound name
    /// would be wrongly selected by write-preference ahead of a later
    /// member that actually claims the name.
    async fn try_member(
        member: &Arc<dyn FileService>,
        name: &str,
        ctx: &Ctx,
    ) -> Result<Option<(Arc<dyn FileService>, String)>> {
        if !member.is_resolver() {
            return Ok(None);
        }
        match member.resolve(name, ctx).await {
            Ok((next_fs, next_name)) => {
                let moved = !Arc::ptr_eq(&next_fs, member) || next_name != name;
                if moved {
                    Ok(Some((next_fs, next_name)))
                } else {
                    Ok(None)
                }
            }
            Err(e) if *e.kind() == CoreError::NotExist => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FileService for UnionFS {
    async fn open(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        crate::path::check("open", name)?;

        let (rfs, rn) = self.resolve(name, ctx).await?;
        let is_self_fixpoint = Arc::ptr_eq(&rfs, &self.self_arc()) && rn == name;

        if !is_self_fixpoint {
            return rfs.open(&rn, ctx).await;
        }

        if name != "." {
            return Err(OpError::not_exist("open", name));
        }

        let mut entries: Vec<FileInfo> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for member in &self.members {
            if let Ok(handle) = member.open(".", ctx).await {
                if let Ok(listing) = handle.readdir().await {
                    for info in listing {
                        if seen.insert(info.name.clone()) {
                            entries.push(info);
                        }
                    }
                }
            }
        }
        Ok(Arc::new(UnionDir { entries }))
    }

    fn is_resolver(&self) -> bool {
        true
    }

    fn is_creator(&self) -> bool {
        true
    }

    async fn resolve(&self, name: &str, ctx: &Ctx) -> Result<(Arc<dyn FileService>, String)> {
        crate::path::check("resolve", name)?;

        if self.members.is_empty() {
            return Err(OpError::not_exist("resolve", name));
        }
        if self.members.len() == 1 {
            return Ok((self.members[0].clone(), name.to_string()));
        }
        if name == "." && ctx.read_only() {
            return Ok((self.self_arc(), ".".to_string()));
        }

        let mut first_moved: Option<(Arc<dyn FileService>, String)> = None;
        let mut deferred = Vec::new();

        for member in &self.members {
            match Self::try_member(member, name, ctx).await? {
                Some((next_fs, next_name)) => {
                    if next_fs.is_creator() && !ctx.read_only() {
                        return Ok((next_fs, next_name));
                    }
                    if first_moved.is_none() {
                        first_moved = Some((next_fs, next_name));
                    }
                }
                None => {
                    if !member.is_resolver() {
                        deferred.push(member.clone());
                    }
                }
            }
        }

        if let Some(hit) = first_moved {
            return Ok(hit);
        }

        // Second pass over non-resolver members: stat (or open+close) each,
        // preferring a Creator-advertising one under a writable ctx.
        let mut fallback: Option<Arc<dyn FileService>> = None;
        for member in &deferred {
            let exists = if member.is_stat() {
                member.stat_direct(name, ctx).await.is_ok()
            } else {
                member.open(name, ctx).await.is_ok()
            };
            if !exists {
                continue;
            }
            if ctx.read_only() {
                return Ok((member.clone(), name.to_string()));
            }
            if member.is_creator() {
                return Ok((member.clone(), name.to_string()));
            }
            if fallback.is_none() {
                fallback = Some(member.clone());
            }
        }
        if let Some(member) = fallback {
            return Ok((member, name.to_string()));
        }

        Ok((self.self_arc(), name.to_string()))
    }

    async fn create(&self, name: &str, ctx: &Ctx) -> Result<Arc<dyn File>> {
        crate::path::check("create", name)?;

        for member in &self.members {
            if !member.is_creator() {
                continue;
            }
            match member.create(name, ctx).await {
                Ok(handle) => return Ok(handle),
                Err(e) if *e.kind() == CoreError::NotExist => continue,
                Err(e) => return Err(e),
            }
        }
        for member in &self.members {
            if let Ok(handle) = member.open(name, ctx).await {
                return Ok(handle);
            }
        }
        Err(OpError::not_exist("create", name))
    }
}

struct UnionDir {
    entries: Vec<FileInfo>,
}

#[async_trait]
impl File for UnionDir {
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
    use std::collections::BTreeMap;

    /// A Creator-less leaf with one fixed file, for pinning the write-
    /// preference scenario: M1 has `x` but cannot create; M2 can create.
    struct CreatorLessLeaf {
        files: BTreeMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl FileService for CreatorLessLeaf {
        async fn open(&self, name: &str, _ctx: &Ctx) -> Result<Arc<dyn File>> {
            match self.files.get(name) {
                Some(bytes) => Ok(Arc::new(crate::fs::CellFile::read_only(
                    bytes.clone(),
                    FileInfo::file_ro(name, bytes.len() as u64),
                ))),
                None => Err(OpError::not_exist("open", name)),
            }
        }
    }

    #[tokio::test]
    async fn write_preference_prefers_creator_member_under_writable_ctx() {
        let mut files = BTreeMap::new();
        files.insert("x".to_string(), b"from-m1".to_vec());
        let m1: Arc<dyn FileService> = Arc::new(CreatorLessLeaf { files });
        let m2 = MemFs::new();
        let union = UnionFS::new(vec![m1, m2.clone()]);

        let ctx = Ctx::detached();
        let handle = union.create("y", &ctx).await.unwrap();
        handle.write(b"hi").await.unwrap();

        let confirm = m2.open("y", &ctx).await.unwrap();
        let mut buf = [0u8; 2];
        let n = confirm.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[tokio::test]
    async fn read_only_open_returns_first_members_file() {
        let mut files = BTreeMap::new();
        files.insert("x".to_string(), b"from-m1".to_vec());
        let m1: Arc<dyn FileService> = Arc::new(CreatorLessLeaf { files });
        let m2 = MemFs::new();
        m2.create("x", &Ctx::detached())
            .await
            .unwrap()
            .write(b"from-m2")
            .await
            .unwrap();

        let union = UnionFS::new(vec![m1, m2]);
        let ro_ctx = Ctx::detached().with_read_only(true);
        let handle = union.open("x", &ro_ctx).await.unwrap();
        let mut buf = [0u8; 7];
        let n = handle.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"from-m1");
    }
}
