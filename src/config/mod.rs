//! Supervisor configuration.
//!
//! Settings are loaded with priority: env var > default. `.env` files are
//! loaded via dotenvy early in `from_env()` and never overwrite variables
//! that are already set. Per-tenant settings live in the external
//! configuration store, not here; this module only covers deployment-wide
//! knobs of the supervisor itself.

pub(crate) mod helpers;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::supervisor::restart::RestartPolicyConfig;

use self::helpers::{optional_env, parse_bool_env, parse_optional_env};

/// Deployment-wide configuration for the process supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Root directory under which tenant workspaces are created.
    pub workspace_root: PathBuf,
    /// Program spawned as the agent runtime.
    pub agent_program: String,
    /// Program spawned as the companion bridge for channels that need one.
    pub bridge_program: String,
    /// Platform-wide provider credential for platform-credential billing
    /// mode. Starts in that mode fail when this is unset.
    pub platform_api_key: Option<SecretString>,
    /// Canonical provider forced when the platform credential is in use.
    pub platform_provider: String,
    /// Whether `start` kills any OS process still matching the tenant's
    /// identity before launching. Disable in environments without `pkill`.
    pub orphan_cleanup: bool,
    /// Grace period after the defensive pre-start kill, giving the OS time
    /// to release ports held by orphaned processes.
    pub cleanup_grace: Duration,
    /// Grace period between SIGTERM and SIGKILL on stop.
    pub shutdown_grace: Duration,
    /// Crash recovery policy knobs.
    pub restart: RestartPolicyConfig,
}

impl SupervisorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let workspace_root = match optional_env("APIARY_WORKSPACE_ROOT")? {
            Some(path) => PathBuf::from(path),
            None => default_workspace_root(),
        };

        Ok(Self {
            workspace_root,
            agent_program: optional_env("APIARY_AGENT_PROGRAM")?
                .unwrap_or_else(|| "apiary-agent".to_string()),
            bridge_program: optional_env("APIARY_BRIDGE_PROGRAM")?
                .unwrap_or_else(|| "apiary-whatsapp-bridge".to_string()),
            platform_api_key: optional_env("PLATFORM_API_KEY")?.map(SecretString::from),
            platform_provider: optional_env("PLATFORM_PROVIDER")?
                .unwrap_or_else(|| "anthropic".to_string()),
            orphan_cleanup: parse_bool_env("APIARY_ORPHAN_CLEANUP", true)?,
            cleanup_grace: Duration::from_millis(parse_optional_env(
                "APIARY_CLEANUP_GRACE_MS",
                2_000,
            )?),
            shutdown_grace: Duration::from_millis(parse_optional_env(
                "APIARY_SHUTDOWN_GRACE_MS",
                10_000,
            )?),
            restart: RestartPolicyConfig {
                window: Duration::from_secs(parse_optional_env("RESTART_WINDOW_SECS", 600)?),
                max_attempts: parse_optional_env("RESTART_MAX_ATTEMPTS", 5)?,
                restart_delay: Duration::from_millis(parse_optional_env(
                    "RESTART_DELAY_MS",
                    8_000,
                )?),
                port_settle: Duration::from_millis(parse_optional_env(
                    "RESTART_PORT_SETTLE_MS",
                    1_000,
                )?),
            },
        })
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            agent_program: "apiary-agent".to_string(),
            bridge_program: "apiary-whatsapp-bridge".to_string(),
            platform_api_key: None,
            platform_provider: "anthropic".to_string(),
            orphan_cleanup: true,
            cleanup_grace: Duration::from_millis(2_000),
            shutdown_grace: Duration::from_millis(10_000),
            restart: RestartPolicyConfig::default(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".apiary")
        .join("workspaces")
}
