//! Stable machine identity.
//!
//! Sessions are unique per `(external_id, source, machine_id)`; the
//! machine id has to be stable across daemon restarts but must not
//! require configuration. A UUID v5 of the hostname gives both: the same
//! host always derives the same id, and two hosts sharing a store file
//! (unsupported, but harmless) stay distinguishable.

use std::sync::OnceLock;
use uuid::Uuid;

static MACHINE_ID: OnceLock<String> = OnceLock::new();

/// The stable identifier for this machine.
///
/// Derived deterministically from the hostname; falls back to a random
/// UUID when the hostname cannot be read (the fallback is still cached
/// for the lifetime of the process).
#[must_use]
pub fn machine_id() -> &'static str {
    MACHINE_ID.get_or_init(|| {
        match hostname::get() {
            Ok(name) => {
                let node = name.to_string_lossy();
                if node.is_empty() {
                    Uuid::new_v4().to_string()
                } else {
                    Uuid::new_v5(&Uuid::NAMESPACE_DNS, node.as_bytes()).to_string()
                }
            }
            Err(_) => Uuid::new_v4().to_string(),
        }
    })
}

/// Derive a machine id for an arbitrary node name.
///
/// Used by adapters that must generate ids for payloads missing one.
#[must_use]
pub fn machine_id_for_node(node: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, node.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_id_is_stable() {
        assert_eq!(machine_id(), machine_id());
    }

    #[test]
    fn test_machine_id_is_uuid() {
        assert!(Uuid::parse_str(machine_id()).is_ok());
    }

    #[test]
    fn test_node_derivation_is_deterministic() {
        assert_eq!(machine_id_for_node("host-a"), machine_id_for_node("host-a"));
        assert_ne!(machine_id_for_node("host-a"), machine_id_for_node("host-b"));
    }
}
