//! Post-merge validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Sanity-check a merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first failing field.
pub fn check(config: &Config) -> ConfigResult<()> {
    if config.daemon.port == 0 {
        return Err(invalid("daemon.port", "must be non-zero"));
    }
    if config.daemon.websocket_port == 0 {
        return Err(invalid("daemon.websocket_port", "must be non-zero"));
    }
    if config.daemon.port == config.daemon.websocket_port {
        return Err(invalid(
            "daemon.websocket_port",
            "must differ from daemon.port",
        ));
    }
    if config.daemon.health_check_interval_secs == 0 {
        return Err(invalid("daemon.health_check_interval_secs", "must be >= 1"));
    }
    if config.mcp.connection_timeout_secs == 0 {
        return Err(invalid("mcp.connection_timeout_secs", "must be >= 1"));
    }
    if config.mcp.tool_timeout_secs == 0 {
        return Err(invalid("mcp.tool_timeout_secs", "must be >= 1"));
    }
    if config.mcp.circuit_breaker_failure_threshold == 0 {
        return Err(invalid(
            "mcp.circuit_breaker_failure_threshold",
            "must be >= 1",
        ));
    }
    if config.agents.max_agent_depth == 0 {
        return Err(invalid("agents.max_agent_depth", "must be >= 1"));
    }
    if config.agents.default_max_concurrent == 0 {
        return Err(invalid("agents.default_max_concurrent", "must be >= 1"));
    }
    Ok(())
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(check(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::default();
        config.daemon.port = 0;
        let err = check(&config).unwrap_err();
        assert!(err.to_string().contains("daemon.port"));
    }

    #[test]
    fn test_colliding_ports_rejected() {
        let mut config = Config::default();
        config.daemon.websocket_port = config.daemon.port;
        assert!(check(&config).is_err());
    }
}
