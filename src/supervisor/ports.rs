//! Deterministic port assignment.
//!
//! Each tenant runtime binds one agent port, with its bridge (when any) on
//! the next port up. Tenants without an explicitly configured port get a
//! stable value derived from their id, so many tenants can share one host
//! without central coordination. Collisions inside the band are accepted
//! probabilistically and not retried; the derived value is persisted back
//! to the configuration store so it never moves once assigned.

use uuid::Uuid;

/// Shared default sentinel meaning "no port assigned yet".
pub const DEFAULT_AGENT_PORT: u16 = 3000;

/// First port of the reserved tenant band.
const PORT_BAND_START: u32 = 19_000;

/// Width of the reserved tenant band (19000-58999).
const PORT_BAND_WIDTH: u32 = 40_000;

/// The two ports a tenant runtime occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAssignment {
    pub agent_port: u16,
    pub bridge_port: u16,
}

/// Resolve a tenant's port pair.
///
/// An explicitly configured port (anything other than zero or the shared
/// default sentinel) is used unchanged; otherwise the agent port is
/// derived from the tenant id. An explicit port at the very top of the
/// range leaves no room for the adjacent bridge port, so it falls back to
/// derivation as well.
pub fn resolve_ports(tenant_id: Uuid, configured_port: u16) -> PortAssignment {
    if configured_port != 0 && configured_port != DEFAULT_AGENT_PORT {
        if let Some(bridge_port) = configured_port.checked_add(1) {
            return PortAssignment {
                agent_port: configured_port,
                bridge_port,
            };
        }
        tracing::warn!(
            tenant_id = %tenant_id,
            configured_port,
            "configured port has no adjacent bridge port; deriving instead"
        );
    }
    let agent_port = derive_port(&tenant_id.to_string());
    PortAssignment {
        agent_port,
        bridge_port: agent_port + 1,
    }
}

/// 32-bit signed multiply-by-31 rolling hash over the id's characters,
/// folded into the reserved band.
fn derive_port(id: &str) -> u16 {
    let mut hash: i32 = 0;
    for ch in id.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(ch as i32);
    }
    (PORT_BAND_START + hash.unsigned_abs() % PORT_BAND_WIDTH) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let id = Uuid::new_v4();
        let first = resolve_ports(id, DEFAULT_AGENT_PORT);
        let second = resolve_ports(id, DEFAULT_AGENT_PORT);
        assert_eq!(first, second);
    }

    #[test]
    fn derived_port_stays_in_band() {
        for _ in 0..200 {
            let assignment = resolve_ports(Uuid::new_v4(), DEFAULT_AGENT_PORT);
            assert!(
                (19_000..59_000).contains(&u32::from(assignment.agent_port)),
                "agent port {} out of band",
                assignment.agent_port
            );
        }
    }

    #[test]
    fn bridge_port_is_adjacent() {
        let assignment = resolve_ports(Uuid::new_v4(), DEFAULT_AGENT_PORT);
        assert_eq!(assignment.bridge_port, assignment.agent_port + 1);

        let explicit = resolve_ports(Uuid::new_v4(), 42_000);
        assert_eq!(explicit.bridge_port, 42_001);
    }

    #[test]
    fn explicit_port_is_used_unchanged() {
        let assignment = resolve_ports(Uuid::new_v4(), 25_500);
        assert_eq!(assignment.agent_port, 25_500);
    }

    #[test]
    fn top_of_range_port_falls_back_to_derivation() {
        let id = Uuid::new_v4();
        // 65535 leaves no room for the adjacent bridge port.
        let assignment = resolve_ports(id, u16::MAX);
        assert_eq!(assignment, resolve_ports(id, DEFAULT_AGENT_PORT));
        assert_eq!(assignment.bridge_port, assignment.agent_port + 1);
    }

    #[test]
    fn sentinel_and_zero_trigger_derivation() {
        let id = Uuid::new_v4();
        let from_sentinel = resolve_ports(id, DEFAULT_AGENT_PORT);
        let from_zero = resolve_ports(id, 0);
        assert_eq!(from_sentinel, from_zero);
        assert_ne!(from_sentinel.agent_port, DEFAULT_AGENT_PORT);
    }
}
