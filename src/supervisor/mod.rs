//! Process supervision for tenant agent runtimes.
//!
//! The supervisor owns the registry of live tenant runtimes and the whole
//! launch path: config resolution, workspace bootstrap, port assignment,
//! process spawning, and the wiring of each child's output into usage
//! metering and crash recovery.
//!
//! ```text
//! start(tenant) ──► kill orphans ─► resolve config ─► workspace ─► ports
//!                        │
//!                        ▼
//!                  spawn bridge (if a channel needs one)
//!                  spawn agent ──► stdout ──► UsageMeter
//!                        │
//!                        ▼ exit
//!                  generation check ─► RestartPolicy ─► start(tenant)
//! ```
//!
//! Every runtime generation gets a monotonically increasing generation
//! token. Exit watchers capture the token they were registered against and
//! compare it to the registry's current entry before acting, so a stale
//! watcher from an earlier generation can never tear down or restart a
//! newer one. There is no cancellation token for an in-flight start; the
//! defensive cleanup at the top of the next `start` is the safety net.

pub mod launch;
pub mod ports;
pub mod restart;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::error::{StoreError, SupervisorError};
use crate::metering::{BillingProfile, UsageMeter};
use crate::process::{ProcessHost, SpawnedChild, StopSignal};
use crate::secrets::SecretCodec;
use crate::store::{ConfigStore, TenantConfigPatch, TenantStatus};
use crate::workspace::WorkspaceBootstrapper;

use self::launch::LaunchSpec;
use self::ports::PortAssignment;
use self::restart::{RestartDecision, RestartPolicy};

/// Whether a tenant runtime is live in this supervisor's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    Stopped,
}

/// One live child, as tracked by the registry.
#[derive(Debug)]
struct ChildHandle {
    pid: u32,
    /// Flipped to `true` by the exit watcher.
    exited: watch::Receiver<bool>,
}

/// Registry entry for one tenant's live runtime generation.
#[derive(Debug)]
struct TenantRuntimeRecord {
    generation: u64,
    agent: ChildHandle,
    bridge: Option<ChildHandle>,
    ports: PortAssignment,
    billing: BillingProfile,
    started_at: DateTime<Utc>,
}

/// Read-only snapshot of a registry entry, for the API layer's fleet view.
#[derive(Debug, Clone)]
pub struct RunningTenant {
    pub tenant_id: Uuid,
    pub generation: u64,
    pub agent_pid: u32,
    pub bridge_pid: Option<u32>,
    pub ports: PortAssignment,
    pub started_at: DateTime<Utc>,
}

/// The supervisor hub. Construct once per deployment and share via `Arc`.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    store: Arc<dyn ConfigStore>,
    codec: Arc<dyn SecretCodec>,
    host: Arc<dyn ProcessHost>,
    meter: Arc<UsageMeter>,
    policy: RestartPolicy,
    workspace: WorkspaceBootstrapper,
    registry: RwLock<HashMap<Uuid, TenantRuntimeRecord>>,
    generations: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        store: Arc<dyn ConfigStore>,
        codec: Arc<dyn SecretCodec>,
        host: Arc<dyn ProcessHost>,
        meter: Arc<UsageMeter>,
    ) -> Arc<Self> {
        let policy = RestartPolicy::new(config.restart.clone());
        let workspace = WorkspaceBootstrapper::new(config.workspace_root.clone());
        Arc::new(Self {
            config,
            store,
            codec,
            host,
            meter,
            policy,
            workspace,
            registry: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        })
    }

    /// Start (or replace) a tenant's runtime.
    ///
    /// On success exactly one runtime record for the tenant is registered
    /// and, unless the runtime already exited again, its status is
    /// persisted as running. On failure the tenant is left stopped.
    ///
    /// Exit watchers re-enter `start` after a crash, so the returned future
    /// is boxed; an opaque return type cannot close that cycle under the
    /// `Send` bound `tokio::spawn` demands.
    pub fn start(
        self: &Arc<Self>,
        tenant_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<(), SupervisorError>> + Send>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            tracing::info!(tenant_id = %tenant_id, "starting tenant runtime");

            // Defensive cleanup: anything from a prior unclean shutdown that
            // still matches this tenant dies first, and the OS gets a moment
            // to release whatever ports it held.
            if this.config.orphan_cleanup {
                this.host.kill_matching(&tenant_id.to_string()).await;
                tokio::time::sleep(this.config.cleanup_grace).await;
            }

            if let Some(record) = this.registry.write().await.remove(&tenant_id) {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    generation = record.generation,
                    "replacing live runtime record"
                );
                this.host.signal(record.agent.pid, StopSignal::Kill);
                if let Some(bridge) = &record.bridge {
                    this.host.signal(bridge.pid, StopSignal::Kill);
                }
            }

            match this.launch(tenant_id).await {
                Ok(generation) => {
                    // The runtime may have crashed and been torn down before
                    // launch returned; its watcher owns the status then.
                    let still_current = this
                        .registry
                        .read()
                        .await
                        .get(&tenant_id)
                        .map(|r| r.generation)
                        == Some(generation);
                    if still_current {
                        this.persist_status(tenant_id, TenantStatus::Running).await;
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "start failed");
                    this.persist_status(tenant_id, TenantStatus::Stopped).await;
                    Err(e)
                }
            }
        })
    }

    /// Stop a tenant's runtime. Idempotent when nothing is registered.
    pub async fn stop(&self, tenant_id: Uuid) -> Result<(), SupervisorError> {
        tracing::info!(tenant_id = %tenant_id, "stopping tenant runtime");

        if self.config.orphan_cleanup {
            self.host.kill_matching(&tenant_id.to_string()).await;
        }

        if let Some(mut record) = self.registry.write().await.remove(&tenant_id) {
            self.host.signal(record.agent.pid, StopSignal::Term);
            if let Some(bridge) = &record.bridge {
                self.host.signal(bridge.pid, StopSignal::Term);
            }

            if !wait_exit(&mut record.agent.exited, self.config.shutdown_grace).await {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    pid = record.agent.pid,
                    "agent ignored SIGTERM; escalating to SIGKILL"
                );
                self.host.signal(record.agent.pid, StopSignal::Kill);
            }
            if let Some(bridge) = &mut record.bridge {
                if !wait_exit(&mut bridge.exited, Duration::ZERO).await {
                    self.host.signal(bridge.pid, StopSignal::Kill);
                }
            }
        }

        self.persist_status(tenant_id, TenantStatus::Stopped).await;
        Ok(())
    }

    /// Pure registry read; never consults the external store.
    pub async fn status(&self, tenant_id: Uuid) -> RuntimeState {
        if self.registry.read().await.contains_key(&tenant_id) {
            RuntimeState::Running
        } else {
            RuntimeState::Stopped
        }
    }

    /// Snapshot of every live runtime.
    pub async fn list(&self) -> Vec<RunningTenant> {
        self.registry
            .read()
            .await
            .iter()
            .map(|(tenant_id, record)| RunningTenant {
                tenant_id: *tenant_id,
                generation: record.generation,
                agent_pid: record.agent.pid,
                bridge_pid: record.bridge.as_ref().map(|b| b.pid),
                ports: record.ports,
                started_at: record.started_at,
            })
            .collect()
    }

    /// Resolve, bootstrap, spawn, and register one runtime generation.
    /// Returns the generation token the record was registered under.
    async fn launch(self: &Arc<Self>, tenant_id: Uuid) -> Result<u64, SupervisorError> {
        let config = self.store.get(tenant_id).await.map_err(|e| match e {
            StoreError::NotFound(_) => SupervisorError::ConfigurationMissing { tenant_id },
            other => SupervisorError::Store(other),
        })?;
        let config = self
            .codec
            .decrypt_fields(config)
            .map_err(|e| SupervisorError::Decrypt {
                tenant_id,
                reason: e.to_string(),
            })?;
        let credential = launch::resolve_credential(&config, &self.config)?;

        let workspace =
            self.workspace
                .ensure(tenant_id)
                .await
                .map_err(|e| SupervisorError::Workspace {
                    tenant_id,
                    reason: e.to_string(),
                })?;

        let ports = ports::resolve_ports(tenant_id, config.agent_port);
        if ports.agent_port != config.agent_port {
            // Persist the derived port so it is stable across restarts.
            let patch = TenantConfigPatch {
                agent_port: Some(ports.agent_port),
            };
            if let Err(e) = self.store.update(tenant_id, patch).await {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "failed to persist derived agent port");
            }
        }

        let spec = LaunchSpec {
            tenant_id,
            provider: credential.provider,
            model: config.model.clone(),
            api_key: credential.api_key,
            channels: launch::plan_channels(&config),
            tools: config.tools.clone(),
            workspace,
            ports,
            billing: BillingProfile {
                platform_credential: config.use_platform_credential,
                tier: config.tier,
            },
        };

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;

        // The bridge launches first so the agent finds it listening.
        let bridge = if spec.needs_bridge() {
            let child = self
                .host
                .spawn(launch::bridge_command(&self.config, &spec))
                .await
                .map_err(|e| SupervisorError::LaunchFailed {
                    tenant_id,
                    process: "bridge",
                    reason: e.to_string(),
                })?;
            Some(child)
        } else {
            None
        };

        let agent = match self
            .host
            .spawn(launch::agent_command(&self.config, &spec))
            .await
        {
            Ok(child) => child,
            Err(e) => {
                if let Some(bridge) = &bridge {
                    self.host.signal(bridge.pid, StopSignal::Kill);
                }
                return Err(SupervisorError::LaunchFailed {
                    tenant_id,
                    process: "agent",
                    reason: e.to_string(),
                });
            }
        };

        let SpawnedChild {
            pid: agent_pid,
            stdout: agent_stdout,
            exit: agent_exit,
        } = agent;
        let (agent_exited_tx, agent_exited_rx) = watch::channel(false);

        let mut bridge_handle = None;
        let mut bridge_tasks = None;
        if let Some(child) = bridge {
            let SpawnedChild {
                pid,
                stdout,
                exit,
            } = child;
            let (exited_tx, exited_rx) = watch::channel(false);
            bridge_handle = Some(ChildHandle {
                pid,
                exited: exited_rx,
            });
            bridge_tasks = Some((pid, stdout, exit, exited_tx));
        }

        // Register the record before wiring the watchers so an immediate
        // crash still finds its own generation in the registry.
        let record = TenantRuntimeRecord {
            generation,
            agent: ChildHandle {
                pid: agent_pid,
                exited: agent_exited_rx,
            },
            bridge: bridge_handle,
            ports: spec.ports,
            billing: spec.billing,
            started_at: Utc::now(),
        };
        self.registry.write().await.insert(tenant_id, record);

        if let Some((bridge_pid, mut stdout, exit, exited_tx)) = bridge_tasks {
            tokio::spawn(async move {
                while let Some(line) = stdout.recv().await {
                    tracing::warn!(target: "apiary::bridge", tenant_id = %tenant_id, pid = bridge_pid, "{line}");
                }
            });
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                let code = exit.await.unwrap_or(-1);
                let _ = exited_tx.send(true);
                supervisor.on_bridge_exit(tenant_id, generation, code).await;
            });
        }

        {
            let meter = Arc::clone(&self.meter);
            let billing = spec.billing;
            let mut stdout = agent_stdout;
            tokio::spawn(async move {
                while let Some(line) = stdout.recv().await {
                    meter.record_line(tenant_id, billing, &line).await;
                }
            });
        }
        {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                let code = agent_exit.await.unwrap_or(-1);
                let _ = agent_exited_tx.send(true);
                supervisor.on_agent_exit(tenant_id, generation, code).await;
            });
        }

        tracing::info!(
            tenant_id = %tenant_id,
            generation,
            agent_pid,
            agent_port = spec.ports.agent_port,
            bridge = spec.needs_bridge(),
            "tenant runtime launched"
        );
        Ok(generation)
    }

    /// Agent exit path: clean removal, or the crash recovery pipeline.
    async fn on_agent_exit(self: &Arc<Self>, tenant_id: Uuid, generation: u64, exit_code: i32) {
        // Only the watcher for the registry's current generation may act;
        // anything else raced a stop() or a replacing start().
        let record = {
            let mut registry = self.registry.write().await;
            match registry.get(&tenant_id) {
                Some(current) if current.generation == generation => {
                    registry.remove(&tenant_id)
                }
                _ => None,
            }
        };
        let Some(record) = record else {
            tracing::debug!(
                tenant_id = %tenant_id,
                generation,
                "ignoring exit of a stale runtime generation"
            );
            return;
        };

        // This generation tears down only its own bridge.
        if let Some(bridge) = &record.bridge {
            self.host.signal(bridge.pid, StopSignal::Term);
        }

        if exit_code == 0 || !record.billing.tier.is_paid() {
            tracing::info!(
                tenant_id = %tenant_id,
                exit_code,
                "agent exited; no automatic restart"
            );
            self.persist_status(tenant_id, TenantStatus::Stopped).await;
            return;
        }

        tracing::warn!(tenant_id = %tenant_id, generation, exit_code, "agent crashed");
        match self.policy.record_crash(tenant_id).await {
            RestartDecision::GiveUp { attempts } => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    attempts,
                    "restart budget exhausted; leaving tenant stopped until a manual start"
                );
                self.persist_status(tenant_id, TenantStatus::Stopped).await;
            }
            RestartDecision::Restart { attempt } => {
                tracing::info!(tenant_id = %tenant_id, attempt, "scheduling restart");
                self.persist_status(tenant_id, TenantStatus::Restarting)
                    .await;

                let policy = self.policy.config();
                tokio::time::sleep(policy.restart_delay).await;
                // The crashed process may still hold its port half-open.
                self.host.kill_port(record.ports.agent_port).await;
                tokio::time::sleep(policy.port_settle).await;

                if let Err(e) = self.start(tenant_id).await {
                    // start() has already persisted the stopped status.
                    tracing::error!(tenant_id = %tenant_id, attempt, error = %e, "restart failed");
                }
            }
        }
    }

    /// Bridge exit path: log and mark, never restart the agent.
    async fn on_bridge_exit(&self, tenant_id: Uuid, generation: u64, exit_code: i32) {
        let registry = self.registry.read().await;
        let stale = !matches!(registry.get(&tenant_id), Some(r) if r.generation == generation);
        drop(registry);

        if stale {
            tracing::debug!(tenant_id = %tenant_id, generation, "stale bridge exit");
            return;
        }
        if exit_code != 0 {
            tracing::error!(
                target: "apiary::bridge",
                tenant_id = %tenant_id,
                generation,
                exit_code,
                "bridge process crashed; agent keeps running"
            );
        } else {
            tracing::info!(target: "apiary::bridge", tenant_id = %tenant_id, generation, "bridge exited");
        }
    }

    async fn persist_status(&self, tenant_id: Uuid, status: TenantStatus) {
        if let Err(e) = self.store.set_status(tenant_id, status).await {
            tracing::warn!(
                tenant_id = %tenant_id,
                status = %status,
                error = %e,
                "failed to persist tenant status"
            );
        }
    }
}

/// Wait up to `grace` for the exit watcher to flip the flag.
async fn wait_exit(exited: &mut watch::Receiver<bool>, grace: Duration) -> bool {
    if *exited.borrow() {
        return true;
    }
    // A closed channel means the watcher is gone and the child with it.
    tokio::time::timeout(grace, exited.changed()).await.is_ok()
}
