//! Tenant workspace bootstrap.
//!
//! Every tenant gets a private directory under the configured root. Before
//! a runtime launches, the bootstrapper guarantees the directory exists and
//! seeds the default documents the agent expects on first boot. Existing
//! files are never overwritten: once a tenant (or their agent) edits a
//! document, bootstrap leaves it alone.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

/// Well-known paths inside a tenant workspace.
pub mod paths {
    /// Agent persona (name, voice, disposition).
    pub const IDENTITY: &str = "IDENTITY.md";
    /// Sub-agent roster.
    pub const AGENTS: &str = "AGENTS.md";
    /// Long-term curated memory.
    pub const MEMORY: &str = "MEMORY.md";
    /// Conversation session state written by the runtime.
    pub const SESSIONS_DIR: &str = "sessions";
    /// Scheduled-task state written by the runtime.
    pub const CRON_DIR: &str = "cron";
}

const DEFAULT_IDENTITY: &str = "\
# Identity

You are a helpful assistant hosted on Apiary. Keep replies concise and
warm. Your operator can reshape this persona at any time by editing this
file.
";

const DEFAULT_AGENTS: &str = "\
# Agents

Sub-agents available to this workspace. Add one section per agent with its
role and any standing instructions.

## researcher
Looks things up and summarizes findings.
";

const DEFAULT_MEMORY: &str = "\
# Memory

Durable notes the agent should keep across sessions. The runtime appends
here; prune freely.
";

/// Prepares tenant workspaces on the local filesystem.
#[derive(Debug, Clone)]
pub struct WorkspaceBootstrapper {
    root: PathBuf,
}

impl WorkspaceBootstrapper {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory for one tenant, whether or not it exists yet.
    pub fn tenant_dir(&self, tenant_id: Uuid) -> PathBuf {
        self.root.join(tenant_id.to_string())
    }

    /// Ensure the tenant's workspace exists with the default documents.
    ///
    /// A missing directory is treated as a brand-new workspace: leftover
    /// session and scheduled-task state from a prior failed attempt is
    /// cleared so the runtime boots clean. Default documents are written
    /// only when each file is individually absent. Idempotent on a
    /// populated workspace.
    pub async fn ensure(&self, tenant_id: Uuid) -> Result<PathBuf, std::io::Error> {
        let dir = self.tenant_dir(tenant_id);

        let is_new = !fs::try_exists(&dir).await?;
        if is_new {
            fs::create_dir_all(&dir).await?;
            for stale in [paths::SESSIONS_DIR, paths::CRON_DIR] {
                remove_if_present(&dir.join(stale)).await?;
            }
            tracing::info!(tenant_id = %tenant_id, dir = %dir.display(), "created new tenant workspace");
        }

        for (name, contents) in [
            (paths::IDENTITY, DEFAULT_IDENTITY),
            (paths::AGENTS, DEFAULT_AGENTS),
            (paths::MEMORY, DEFAULT_MEMORY),
        ] {
            let path = dir.join(name);
            if !fs::try_exists(&path).await? {
                fs::write(&path, contents).await?;
                tracing::debug!(tenant_id = %tenant_id, file = name, "seeded default document");
            }
        }

        Ok(dir)
    }
}

async fn remove_if_present(path: &Path) -> Result<(), std::io::Error> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_default_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = WorkspaceBootstrapper::new(tmp.path().to_path_buf());
        let tenant = Uuid::new_v4();

        let dir = bootstrapper.ensure(tenant).await.unwrap();
        for name in [paths::IDENTITY, paths::AGENTS, paths::MEMORY] {
            assert!(dir.join(name).exists(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn never_overwrites_modified_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = WorkspaceBootstrapper::new(tmp.path().to_path_buf());
        let tenant = Uuid::new_v4();

        let dir = bootstrapper.ensure(tenant).await.unwrap();
        fs::write(dir.join(paths::MEMORY), "curated by a human").await.unwrap();

        bootstrapper.ensure(tenant).await.unwrap();
        let contents = fs::read_to_string(dir.join(paths::MEMORY)).await.unwrap();
        assert_eq!(contents, "curated by a human");
    }

    #[tokio::test]
    async fn restores_a_deleted_default() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = WorkspaceBootstrapper::new(tmp.path().to_path_buf());
        let tenant = Uuid::new_v4();

        let dir = bootstrapper.ensure(tenant).await.unwrap();
        fs::remove_file(dir.join(paths::AGENTS)).await.unwrap();

        bootstrapper.ensure(tenant).await.unwrap();
        assert!(dir.join(paths::AGENTS).exists());
    }

    #[tokio::test]
    async fn keeps_runtime_state_on_existing_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let bootstrapper = WorkspaceBootstrapper::new(tmp.path().to_path_buf());
        let tenant = Uuid::new_v4();

        let dir = bootstrapper.ensure(tenant).await.unwrap();
        fs::create_dir_all(dir.join(paths::SESSIONS_DIR)).await.unwrap();
        fs::write(dir.join(paths::SESSIONS_DIR).join("s1.json"), "{}")
            .await
            .unwrap();

        // The workspace already exists, so session state survives.
        bootstrapper.ensure(tenant).await.unwrap();
        assert!(dir.join(paths::SESSIONS_DIR).join("s1.json").exists());
    }
}
