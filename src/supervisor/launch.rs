//! Launch-spec assembly.
//!
//! Turns a decrypted tenant configuration into an immutable description of
//! how to start this generation's processes: resolved provider and
//! credential, the channels that actually have usable tokens, ports,
//! workspace, and the command lines handed to the process host.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use uuid::Uuid;

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::metering::BillingProfile;
use crate::process::CommandSpec;
use crate::store::{TenantConfig, ToolToggles};
use crate::supervisor::ports::PortAssignment;

/// Communication channels a tenant runtime can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Telegram,
    Whatsapp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Whatsapp => "whatsapp",
        }
    }

    /// WhatsApp speaks through a companion bridge process; Telegram is
    /// handled in-runtime.
    pub fn requires_bridge(self) -> bool {
        matches!(self, Self::Whatsapp)
    }
}

/// An enabled channel together with its credential.
#[derive(Clone)]
pub struct ChannelPlan {
    pub channel: Channel,
    pub token: SecretString,
}

impl std::fmt::Debug for ChannelPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPlan")
            .field("channel", &self.channel)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Fully-resolved description of how to start one tenant runtime.
/// Built fresh on every start and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub tenant_id: Uuid,
    pub provider: String,
    pub model: String,
    pub api_key: SecretString,
    pub channels: Vec<ChannelPlan>,
    pub tools: ToolToggles,
    pub workspace: PathBuf,
    pub ports: PortAssignment,
    pub billing: BillingProfile,
}

impl LaunchSpec {
    /// Whether any enabled channel needs the companion bridge.
    pub fn needs_bridge(&self) -> bool {
        self.channels.iter().any(|p| p.channel.requires_bridge())
    }

    fn channel_token(&self, channel: Channel) -> Option<&SecretString> {
        self.channels
            .iter()
            .find(|p| p.channel == channel)
            .map(|p| &p.token)
    }

    /// Environment for the agent process. Secrets travel here rather than
    /// in the stdin document so they never hit the workspace or logs.
    pub fn agent_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("APIARY_TENANT_ID".to_string(), self.tenant_id.to_string()),
            (
                "APIARY_AGENT_PORT".to_string(),
                self.ports.agent_port.to_string(),
            ),
            (
                "APIARY_BRIDGE_PORT".to_string(),
                self.ports.bridge_port.to_string(),
            ),
            ("APIARY_PROVIDER".to_string(), self.provider.clone()),
            ("APIARY_MODEL".to_string(), self.model.clone()),
            (
                "PROVIDER_API_KEY".to_string(),
                self.api_key.expose_secret().to_string(),
            ),
            (
                "APIARY_WORKSPACE".to_string(),
                self.workspace.display().to_string(),
            ),
            (
                "APIARY_TOOLS".to_string(),
                self.tools.enabled_names().join(","),
            ),
        ];
        if let Some(token) = self.channel_token(Channel::Telegram) {
            env.push((
                "TELEGRAM_BOT_TOKEN".to_string(),
                token.expose_secret().to_string(),
            ));
        }
        if let Some(token) = self.channel_token(Channel::Whatsapp) {
            env.push((
                "WHATSAPP_TOKEN".to_string(),
                token.expose_secret().to_string(),
            ));
        }
        env
    }

    /// Secret-free JSON document written to the agent's stdin at launch.
    pub fn runtime_input(&self) -> String {
        json!({
            "tenant_id": self.tenant_id,
            "provider": self.provider,
            "model": self.model,
            "agent_port": self.ports.agent_port,
            "bridge_port": self.ports.bridge_port,
            "workspace": self.workspace.display().to_string(),
            "channels": self.channels.iter().map(|p| p.channel.as_str()).collect::<Vec<_>>(),
            "tools": self.tools.enabled_names(),
        })
        .to_string()
    }
}

/// A resolved provider+credential pair. `SecretString` keeps the key out
/// of the derived `Debug` output.
#[derive(Debug)]
pub(crate) struct ResolvedCredential {
    pub provider: String,
    pub api_key: SecretString,
}

/// Resolve the effective provider and key for a tenant.
///
/// Platform-credential mode substitutes the deployment-wide key and forces
/// the provider to the configured canonical value; otherwise the tenant's
/// own key is required.
pub(crate) fn resolve_credential(
    config: &TenantConfig,
    supervisor: &SupervisorConfig,
) -> Result<ResolvedCredential, SupervisorError> {
    if config.use_platform_credential {
        let api_key = supervisor.platform_api_key.clone().ok_or(
            SupervisorError::PlatformCredentialUnconfigured {
                tenant_id: config.tenant_id,
            },
        )?;
        return Ok(ResolvedCredential {
            provider: canonical_provider(&supervisor.platform_provider),
            api_key,
        });
    }

    let api_key = config
        .api_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .ok_or(SupervisorError::ProviderCredentialMissing {
            tenant_id: config.tenant_id,
        })?;
    Ok(ResolvedCredential {
        provider: canonical_provider(&config.provider),
        api_key: SecretString::from(api_key.to_string()),
    })
}

/// Provider-name alias table. Unknown names pass through lowercased so a
/// new provider does not require a supervisor release.
pub(crate) fn canonical_provider(name: &str) -> String {
    let normalized = name.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "claude" | "anthropic" => "anthropic".to_string(),
        "openai" | "open_ai" | "gpt" => "openai".to_string(),
        "google" | "gemini" => "gemini".to_string(),
        "x-ai" | "xai" | "grok" => "xai".to_string(),
        _ => normalized,
    }
}

/// Pick the channels that can actually launch.
///
/// A channel that is enabled but missing its credential is disabled for
/// this launch (logged) instead of failing the whole start.
pub(crate) fn plan_channels(config: &TenantConfig) -> Vec<ChannelPlan> {
    let mut plans = Vec::new();

    let candidates = [
        (
            Channel::Telegram,
            config.channels.telegram_enabled,
            config.channels.telegram_token.as_deref(),
        ),
        (
            Channel::Whatsapp,
            config.channels.whatsapp_enabled,
            config.channels.whatsapp_token.as_deref(),
        ),
    ];
    for (channel, enabled, token) in candidates {
        if !enabled {
            continue;
        }
        match token {
            Some(token) if !token.is_empty() => plans.push(ChannelPlan {
                channel,
                token: SecretString::from(token.to_string()),
            }),
            _ => {
                tracing::warn!(
                    tenant_id = %config.tenant_id,
                    channel = channel.as_str(),
                    "channel enabled but credential missing; disabling for this launch"
                );
            }
        }
    }
    plans
}

/// Command line for the agent process.
pub(crate) fn agent_command(supervisor: &SupervisorConfig, spec: &LaunchSpec) -> CommandSpec {
    CommandSpec {
        name: "agent",
        program: supervisor.agent_program.clone(),
        args: vec![
            "--tenant".to_string(),
            spec.tenant_id.to_string(),
            "--port".to_string(),
            spec.ports.agent_port.to_string(),
        ],
        env: spec.agent_env(),
        cwd: Some(spec.workspace.clone()),
        stdin_payload: Some(spec.runtime_input()),
    }
}

/// Command line for the companion bridge process.
pub(crate) fn bridge_command(supervisor: &SupervisorConfig, spec: &LaunchSpec) -> CommandSpec {
    let mut env = vec![
        ("APIARY_TENANT_ID".to_string(), spec.tenant_id.to_string()),
        (
            "APIARY_AGENT_PORT".to_string(),
            spec.ports.agent_port.to_string(),
        ),
        (
            "APIARY_BRIDGE_PORT".to_string(),
            spec.ports.bridge_port.to_string(),
        ),
    ];
    if let Some(token) = spec.channel_token(Channel::Whatsapp) {
        env.push((
            "WHATSAPP_TOKEN".to_string(),
            token.expose_secret().to_string(),
        ));
    }

    CommandSpec {
        name: "bridge",
        program: supervisor.bridge_program.clone(),
        args: vec![
            "--tenant".to_string(),
            spec.tenant_id.to_string(),
            "--port".to_string(),
            spec.ports.bridge_port.to_string(),
        ],
        env,
        cwd: Some(spec.workspace.clone()),
        stdin_payload: None,
    }
}
