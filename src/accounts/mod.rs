//! User and group records for the image.

pub mod passwd;

use crate::build::BuildContext;
use crate::config::ImageAccounts;
use crate::constants::{DEFAULT_SHELL, GROUP_FILE, PASSWD_FILE};
use crate::reproducible::{set_mtime, set_mtime_with_ancestors};
use anyhow::{Context, Result};
use async_trait::async_trait;
use passwd::{parse_all, render_all, GroupEntry, UserEntry};
use std::path::{Component, Path, PathBuf};

#[async_trait]
pub trait AccountMutator: Send + Sync {
    async fn mutate_accounts(&self, ctx: &BuildContext) -> Result<()>;
}

/// Merges configured accounts into the package-provided passwd/group files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswdAccounts;

#[async_trait]
impl AccountMutator for PasswdAccounts {
    async fn mutate_accounts(&self, ctx: &BuildContext) -> Result<()> {
        let accounts = &ctx.config.accounts;
        let mut homes = Vec::new();
        for user in &accounts.users {
            if let Some(rel) = home_in_workspace(&user.home_dir())? {
                homes.push(rel);
            }
        }

        let passwd_path = ctx.path(PASSWD_FILE);
        let group_path = ctx.path(GROUP_FILE);

        let mut groups = match read_optional(&group_path).await? {
            Some(content) => parse_all(&content, GroupEntry::parse)?,
            None => vec![GroupEntry::root()],
        };
        let mut users = match read_optional(&passwd_path).await? {
            Some(content) => parse_all(&content, UserEntry::parse)?,
            None => vec![UserEntry::root()],
        };

        merge_accounts(accounts, &mut users, &mut groups);

        if let Some(parent) = passwd_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        write_with_mtime(&passwd_path, &render_all(&users), ctx.mtime()).await?;
        write_with_mtime(&group_path, &render_all(&groups), ctx.mtime()).await?;

        for rel in &homes {
            let dir = ctx.workdir.join(rel);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create home directory {}", dir.display()))?;
        }
        for rel in &homes {
            set_mtime_with_ancestors(&ctx.workdir, rel, ctx.mtime())?;
        }

        tracing::debug!(users = users.len(), groups = groups.len(), "wrote account files");
        Ok(())
    }
}

/// Apply configured groups and users: same-named entries are replaced,
/// new ones appended in declaration order.
pub fn merge_accounts(accounts: &ImageAccounts, users: &mut Vec<UserEntry>, groups: &mut Vec<GroupEntry>) {
    for group in &accounts.groups {
        let entry = GroupEntry {
            name: group.groupname.clone(),
            password: "x".to_string(),
            gid: group.gid,
            members: group.members.clone(),
        };
        upsert(groups, entry, |g| &g.name);
    }

    for user in &accounts.users {
        let entry = UserEntry {
            name: user.username.clone(),
            password: "x".to_string(),
            uid: user.uid,
            gid: user.primary_gid(),
            gecos: String::new(),
            home: user.home_dir(),
            shell: user.shell.clone().unwrap_or_else(|| DEFAULT_SHELL.to_string()),
        };
        upsert(users, entry, |u| &u.name);
    }
}

/// Workspace-relative directory for a home under `/home/`, or `None` for
/// homes the image does not create (such as `/root` or `/`).
fn home_in_workspace(home: &str) -> Result<Option<PathBuf>> {
    let path = Path::new(home);
    if !path.has_root() || path.components().any(|c| !matches!(c, Component::RootDir | Component::Normal(_))) {
        anyhow::bail!("home directory {:?} is not a normalized absolute path", home);
    }
    match path.strip_prefix("/home") {
        Ok(rel) if rel.components().next().is_some() => Ok(Some(Path::new("home").join(rel))),
        _ => Ok(None),
    }
}

fn upsert<T>(entries: &mut Vec<T>, entry: T, name: fn(&T) -> &String) {
    match entries.iter_mut().find(|e| name(e) == name(&entry)) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow::Error::new(err).context(format!("failed to read {}", path.display()))),
    }
}

async fn write_with_mtime(path: &Path, content: &str, mtime: u64) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    set_mtime(path, mtime)
}
