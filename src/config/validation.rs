//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Server names are non-empty and unique across all server lists
//! - The network is `tcp` or `unix`, and `unix` names a socket path
//! - TLS, when enabled, names both a certificate and a key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Strategy lists are not checked against server names; unknown names are
//!   reported by the listener at runtime
//! - Mode strings are checked where servers are built

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ServiceConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let servers = &config.server_config;

    let lists = [
        ("servers", &servers.servers),
        ("health_check_servers", &servers.health_check_servers),
        ("metrics_servers", &servers.metrics_servers),
    ];
    let mut names = HashSet::new();
    for (list, entries) in lists {
        for (i, entry) in entries.iter().enumerate() {
            let field = format!("server_config.{list}[{i}].name");
            if entry.name.trim().is_empty() {
                errors.push(ValidationError::new(field, "must not be empty"));
            } else if !names.insert(entry.name.as_str()) {
                errors.push(ValidationError::new(
                    field,
                    format!("duplicate server name '{}'", entry.name),
                ));
            }

            let prefix = format!("server_config.{list}[{i}]");
            match entry.network.trim().to_ascii_lowercase().as_str() {
                "" | "tcp" => {}
                "unix" if entry.socket_path.trim().is_empty() => errors.push(ValidationError::new(
                    format!("{prefix}.socket_path"),
                    "required when network is unix",
                )),
                "unix" => {}
                other => errors.push(ValidationError::new(
                    format!("{prefix}.network"),
                    format!("unknown network '{other}'"),
                )),
            }
        }
    }

    if servers.tls.enabled {
        if servers.tls.cert.is_empty() {
            errors.push(ValidationError::new("server_config.tls.cert", "required when TLS is enabled"));
        }
        if servers.tls.key.is_empty() {
            errors.push(ValidationError::new("server_config.tls.key", "required when TLS is enabled"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServerEntry;

    fn entry(name: &str) -> ServerEntry {
        ServerEntry {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn reports_all_problems() {
        let mut config = ServiceConfig::default();
        config.server_config.servers = vec![entry("rest"), entry("")];
        config.server_config.health_check_servers = vec![entry("rest")];
        config.server_config.tls.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].message.contains("empty"));
        assert!(errors[1].message.contains("duplicate server name 'rest'"));
        assert_eq!(errors[1].field, "server_config.health_check_servers[0].name");
        assert!(errors.iter().any(|e| e.field == "server_config.tls.key"));
    }

    #[test]
    fn unix_network_needs_socket_path() {
        let mut config = ServiceConfig::default();
        let mut unix = entry("uds");
        unix.network = "unix".into();
        let mut udp = entry("udp");
        udp.network = "udp".into();
        let mut ok = entry("ok");
        ok.network = "UNIX".into();
        ok.socket_path = "/run/ok.sock".into();
        config.server_config.servers = vec![unix, udp, ok];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "server_config.servers[0].socket_path");
        assert_eq!(errors[1].field, "server_config.servers[1].network");
        assert!(errors[1].message.contains("udp"));
    }
}
