//! Bounded crash recovery policy.
//!
//! Tracks crash frequency per tenant inside a sliding window and decides
//! whether another automatic restart is warranted. The policy is a pure
//! decision component; the supervisor owns the side effects (delays,
//! port cleanup, the nested `start` call).
//!
//! The restart delay is fixed rather than exponential: observed failures
//! are dominated by port-release latency, not by external dependencies
//! needing backoff.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Tunable knobs of the crash recovery policy.
#[derive(Debug, Clone)]
pub struct RestartPolicyConfig {
    /// Sliding window over which crashes are counted.
    pub window: Duration,
    /// Crashes tolerated within one window before giving up.
    pub max_attempts: u32,
    /// Delay before a restart attempt, letting the OS release the agent's
    /// bound port.
    pub restart_delay: Duration,
    /// Additional delay after the best-effort kill-by-port.
    pub port_settle: Duration,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(600),
            max_attempts: 5,
            restart_delay: Duration::from_secs(8),
            port_settle: Duration::from_secs(1),
        }
    }
}

/// What the supervisor should do about a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Schedule one more restart; `attempt` counts from 1 within the window.
    Restart { attempt: u32 },
    /// Budget exhausted; force the tenant to stopped and wait for a manual
    /// start.
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
struct RestartState {
    count: u32,
    window_started_at: Instant,
}

/// Per-tenant crash counters behind the policy decisions.
#[derive(Debug)]
pub struct RestartPolicy {
    config: RestartPolicyConfig,
    states: Mutex<HashMap<Uuid, RestartState>>,
}

impl RestartPolicy {
    pub fn new(config: RestartPolicyConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RestartPolicyConfig {
        &self.config
    }

    /// Record one crash and decide. Callers filter out zero exit codes and
    /// free-tier tenants before reaching the policy.
    pub async fn record_crash(&self, tenant_id: Uuid) -> RestartDecision {
        let now = Instant::now();
        let mut states = self.states.lock().await;

        let state = states.entry(tenant_id).or_insert(RestartState {
            count: 0,
            window_started_at: now,
        });
        if now.duration_since(state.window_started_at) > self.config.window {
            *state = RestartState {
                count: 0,
                window_started_at: now,
            };
        }
        state.count += 1;

        if state.count > self.config.max_attempts {
            let attempts = state.count;
            // Abandon the record; a manual start later begins a fresh window.
            states.remove(&tenant_id);
            RestartDecision::GiveUp { attempts }
        } else {
            RestartDecision::Restart {
                attempt: state.count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy(window: Duration) -> RestartPolicy {
        RestartPolicy::new(RestartPolicyConfig {
            window,
            max_attempts: 5,
            restart_delay: Duration::from_millis(1),
            port_settle: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn five_restarts_then_give_up() {
        let policy = quick_policy(Duration::from_secs(600));
        let tenant = Uuid::new_v4();

        for attempt in 1..=5 {
            assert_eq!(
                policy.record_crash(tenant).await,
                RestartDecision::Restart { attempt }
            );
        }
        assert_eq!(
            policy.record_crash(tenant).await,
            RestartDecision::GiveUp { attempts: 6 }
        );
    }

    #[tokio::test]
    async fn window_expiry_resets_the_count() {
        let policy = quick_policy(Duration::from_millis(20));
        let tenant = Uuid::new_v4();

        for _ in 0..5 {
            policy.record_crash(tenant).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The stale window is discarded, so counting starts over.
        assert_eq!(
            policy.record_crash(tenant).await,
            RestartDecision::Restart { attempt: 1 }
        );
    }

    #[tokio::test]
    async fn give_up_abandons_the_record() {
        let policy = quick_policy(Duration::from_secs(600));
        let tenant = Uuid::new_v4();

        for _ in 0..6 {
            policy.record_crash(tenant).await;
        }
        // A later crash (after a manual start) begins a fresh window.
        assert_eq!(
            policy.record_crash(tenant).await,
            RestartDecision::Restart { attempt: 1 }
        );
    }

    #[tokio::test]
    async fn tenants_are_tracked_independently() {
        let policy = quick_policy(Duration::from_secs(600));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        for _ in 0..5 {
            policy.record_crash(a).await;
        }
        assert_eq!(
            policy.record_crash(b).await,
            RestartDecision::Restart { attempt: 1 }
        );
    }
}
