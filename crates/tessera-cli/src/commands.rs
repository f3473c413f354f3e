//! Subcommand execution against a resource guard

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tessera_core::path::as_directory;
use tessera_core::{ResourceNode, ResourceType, StorageEntity};
use tessera_resources::{
    Actor, InMemoryDirectorySizeStore, InMemoryReferenceIndex, ResourceConsistencyGuard,
};
use tessera_storage::StorageBackend;
use tracing::debug;

use crate::config::Command;

/// One tenant and resource type, acted on by an administrator
pub struct Session {
    guard: ResourceConsistencyGuard,
    actor: Actor,
    tenant: String,
    resource_type: ResourceType,
}

impl Session {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        tenant: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        let tenant = tenant.into();
        let guard = ResourceConsistencyGuard::new(
            backend,
            Arc::new(InMemoryReferenceIndex::new()),
            Arc::new(InMemoryDirectorySizeStore::new()),
        );
        Self {
            guard,
            actor: Actor::admin(0, "operator", tenant.clone()),
            tenant,
            resource_type,
        }
    }

    fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.guard.backend()
    }

    fn root(&self) -> String {
        self.backend()
            .resolver()
            .dir_for(self.resource_type, &self.tenant)
    }

    /// Full key of `path` relative to the tenant root
    fn full_name(&self, path: &str) -> String {
        self.backend()
            .resolver()
            .file_name(self.resource_type, &self.tenant, path)
    }

    /// Full key of an existing resource, preferring a directory when only
    /// that form exists
    async fn existing(&self, path: &str) -> anyhow::Result<String> {
        let full_name = self.full_name(path);
        if path.ends_with('/') || self.backend().exists(&full_name).await? {
            return Ok(full_name);
        }
        let dir = as_directory(&full_name);
        if self.backend().exists(&dir).await? {
            return Ok(dir);
        }
        Ok(full_name)
    }

    fn dir_arg(&self, path: Option<&str>) -> Option<String> {
        path.map(|p| as_directory(&self.full_name(p)))
    }

    pub async fn run(&self, command: Command, out: &mut dyn Write) -> anyhow::Result<()> {
        debug!(?command, tenant = %self.tenant, "running command");
        let actor = &self.actor;
        let rt = self.resource_type;

        match command {
            Command::Init => {
                if !self.backend().create_tenant_dirs(&self.tenant).await? {
                    anyhow::bail!("could not create roots for tenant {}", self.tenant);
                }
                writeln!(out, "{}", self.backend().resolver().tenant_root(&self.tenant))?;
            }

            Command::Ls { path, search } => {
                let dir = self.dir_arg(path.as_deref());
                let page = self
                    .guard
                    .list_page(
                        actor,
                        &self.tenant,
                        rt,
                        dir.as_deref(),
                        search.as_deref(),
                        1,
                        usize::MAX,
                    )
                    .await?;
                for entity in &page.total_list {
                    write_entry(out, entity)?;
                }
            }

            Command::Tree { path } => {
                let dir = self.dir_arg(path.as_deref());
                let tree = self
                    .guard
                    .list_tree(actor, &self.tenant, rt, dir.as_deref())
                    .await?;
                writeln!(out, "{}", tree.full_name)?;
                write_tree(out, &tree, 1)?;
            }

            Command::Stat { path } => {
                let full_name = self.existing(&path).await?;
                let relative = full_name.strip_prefix(&self.root()).unwrap_or(&full_name);
                let entity = self.guard.status(actor, &self.tenant, rt, relative).await?;
                writeln!(out, "{}", serde_json::to_string_pretty(&entity)?)?;
            }

            Command::Mkdir { name, parent } => {
                let current = self.dir_arg(parent.as_deref()).unwrap_or_else(|| self.root());
                let entity = self
                    .guard
                    .create_directory(actor, &name, rt, &current)
                    .await?;
                writeln!(out, "{}", entity.full_name)?;
            }

            Command::Put {
                local,
                name,
                parent,
            } => {
                let name = match name {
                    Some(name) => name,
                    None => local
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(str::to_string)
                        .with_context(|| format!("{} has no file name", local.display()))?,
                };
                let current = self.dir_arg(parent.as_deref()).unwrap_or_else(|| self.root());
                let entity = self
                    .guard
                    .create_resource(actor, &name, rt, &local, &current)
                    .await?;
                writeln!(out, "{} ({} bytes)", entity.full_name, entity.size)?;
            }

            Command::Get { path, dir } => {
                let written = self
                    .guard
                    .download(actor, &self.full_name(&path), rt, &dir)
                    .await?;
                writeln!(out, "{}", written.display())?;
            }

            Command::Cat { path, skip, limit } => {
                let lines = self
                    .guard
                    .read_lines(actor, &self.full_name(&path), rt, skip, limit)
                    .await?;
                for line in lines {
                    writeln!(out, "{line}")?;
                }
            }

            Command::Rm { path } => {
                let full_name = self.existing(&path).await?;
                let report = self.guard.delete(actor, &full_name, rt).await?;
                writeln!(
                    out,
                    "deleted {} key(s), {} bytes",
                    report.deleted_keys.len(),
                    report.released_bytes
                )?;
            }

            Command::Mv { path, new_name } => {
                let full_name = self.existing(&path).await?;
                let entity = self
                    .guard
                    .update_resource(actor, &full_name, &new_name, rt, None)
                    .await?;
                writeln!(out, "{}", entity.full_name)?;
            }

            Command::Loadable { program } => {
                let tree = self
                    .guard
                    .query_by_program_type(actor, &self.tenant, rt, program)
                    .await?;
                writeln!(out, "{}", tree.full_name)?;
                write_tree(out, &tree, 1)?;
            }

            Command::Write { path, content } => {
                let entity = self.guard.create_or_update(actor, &path, &content).await?;
                writeln!(out, "{} ({} bytes)", entity.full_name, entity.size)?;
            }
        }
        Ok(())
    }
}

fn write_entry(out: &mut dyn Write, entity: &StorageEntity) -> std::io::Result<()> {
    let kind = if entity.is_directory { 'd' } else { '-' };
    let modified = entity
        .update_time
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    writeln!(
        out,
        "{kind} {:>10} {modified:>16} {}",
        entity.size, entity.file_name
    )
}

fn write_tree(out: &mut dyn Write, node: &ResourceNode, depth: usize) -> std::io::Result<()> {
    for child in &node.children {
        let marker = if child.is_directory { "/" } else { "" };
        writeln!(out, "{}{}{marker}", "  ".repeat(depth), child.name)?;
        write_tree(out, child, depth + 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tessera_core::{PathResolver, ProgramType};
    use tessera_storage::LocalBackend;

    async fn session(dir: &TempDir) -> Session {
        let backend = LocalBackend::open(dir.path().join("store"), PathResolver::new("base"))
            .await
            .unwrap();
        Session::new(Arc::new(backend), "t1", ResourceType::File)
    }

    async fn run(session: &Session, command: Command) -> String {
        let mut out = Vec::new();
        session.run(command, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_put_ls_cat_rm() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let local = dir.path().join("hello.sh");
        tokio::fs::write(&local, "echo one\necho two\n").await.unwrap();

        run(&session, Command::Init).await;
        run(
            &session,
            Command::Mkdir {
                name: "scripts".to_string(),
                parent: None,
            },
        )
        .await;
        let put = run(
            &session,
            Command::Put {
                local,
                name: None,
                parent: Some("scripts".to_string()),
            },
        )
        .await;
        assert_eq!(put.trim(), "base/t1/resources/scripts/hello.sh (18 bytes)");

        let ls = run(
            &session,
            Command::Ls {
                path: None,
                search: None,
            },
        )
        .await;
        assert!(ls.contains("scripts"), "{ls}");

        let cat = run(
            &session,
            Command::Cat {
                path: "scripts/hello.sh".to_string(),
                skip: 1,
                limit: 5,
            },
        )
        .await;
        assert_eq!(cat, "echo two\n");

        // Directory resolved without the trailing separator
        let rm = run(
            &session,
            Command::Rm {
                path: "scripts".to_string(),
            },
        )
        .await;
        assert_eq!(rm.trim(), "deleted 2 key(s), 18 bytes");
    }

    #[tokio::test]
    async fn test_mkdir_tree_and_mv() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;

        run(
            &session,
            Command::Mkdir {
                name: "a".to_string(),
                parent: None,
            },
        )
        .await;
        run(
            &session,
            Command::Mkdir {
                name: "b".to_string(),
                parent: Some("a".to_string()),
            },
        )
        .await;

        let tree = run(&session, Command::Tree { path: None }).await;
        assert_eq!(tree, "base/t1/resources/\n  a/\n    b/\n");

        let moved = run(
            &session,
            Command::Mv {
                path: "a".to_string(),
                new_name: "z".to_string(),
            },
        )
        .await;
        assert_eq!(moved.trim(), "base/t1/resources/z/");
    }

    #[tokio::test]
    async fn test_write_then_loadable() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;

        let written = run(
            &session,
            Command::Write {
                path: "jobs/etl/main.py".to_string(),
                content: "print(1)".to_string(),
            },
        )
        .await;
        assert_eq!(written.trim(), "base/t1/resources/jobs/etl/main.py (8 bytes)");
        run(
            &session,
            Command::Write {
                path: "jobs/readme.md".to_string(),
                content: "docs".to_string(),
            },
        )
        .await;

        let tree = run(
            &session,
            Command::Loadable {
                program: ProgramType::Python,
            },
        )
        .await;
        assert_eq!(tree, "base/t1/resources/\n  jobs/\n    etl/\n      main.py\n");
    }

    #[tokio::test]
    async fn test_failures_surface_as_errors() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir).await;
        let mut out = Vec::new();

        let missing = session
            .run(
                Command::Stat {
                    path: "nothing".to_string(),
                },
                &mut out,
            )
            .await;
        assert!(missing.is_err());
    }
}
