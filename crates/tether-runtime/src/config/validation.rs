//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ConnectionConfig, LogOutput, LoggingConfig, ServerConfig, TetherConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TetherConfig) -> ConfigResult<()> {
    validate_server_config(&config.server)?;
    validate_connection_config(&config.connection)?;
    if config.api.timeout_secs == 0 {
        return Err(ConfigError::ZeroValue {
            field: "api.timeout_secs",
        });
    }
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_server_config(server: &ServerConfig) -> ConfigResult<()> {
    if server.host.is_empty() {
        return Err(ConfigError::validation("server.host cannot be empty"));
    }
    if !server.ws_path.starts_with('/') {
        return Err(ConfigError::validation(format!(
            "server.ws_path must start with '/': {}",
            server.ws_path
        )));
    }
    Ok(())
}

fn validate_connection_config(connection: &ConnectionConfig) -> ConfigResult<()> {
    let positive = [
        ("connection.queue_capacity", connection.queue_capacity as u64),
        (
            "connection.heartbeat_interval_secs",
            connection.heartbeat_interval_secs,
        ),
        ("connection.read_timeout_secs", connection.read_timeout_secs),
        ("connection.write_timeout_secs", connection.write_timeout_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            return Err(ConfigError::ZeroValue { field });
        }
    }
    if connection.read_timeout_secs <= connection.heartbeat_interval_secs {
        return Err(ConfigError::validation(format!(
            "connection.read_timeout_secs ({}) must exceed connection.heartbeat_interval_secs ({})",
            connection.read_timeout_secs, connection.heartbeat_interval_secs
        )));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: '{target}'"
            )));
        }
    }
    if logging.output == LogOutput::File
        && logging
            .file_path
            .as_ref()
            .is_some_and(|p| p.file_name().is_none())
    {
        return Err(ConfigError::validation(
            "logging.file_path must name a file",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&TetherConfig::default()).is_ok());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let mut config = TetherConfig::default();
        config.connection.queue_capacity = 0;

        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ZeroValue {
                field: "connection.queue_capacity"
            })
        ));
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut config = TetherConfig::default();
        config.connection.heartbeat_interval_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = TetherConfig::default();
        config.api.timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn read_deadline_must_outlast_the_heartbeat() {
        let mut config = TetherConfig::default();
        config.connection.heartbeat_interval_secs = 30;
        config.connection.read_timeout_secs = 30;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        config.connection.read_timeout_secs = 31;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_relative_ws_path() {
        let mut config = TetherConfig::default();
        config.server.ws_path = "ws".into();

        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn port_zero_is_allowed() {
        let mut config = TetherConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_output_needs_a_file_name() {
        let mut config = TetherConfig::default();
        config.logging.output = LogOutput::File;
        config.logging.file_path = Some(PathBuf::from("/"));
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some(PathBuf::from("logs/tether.log"));
        assert!(validate_config(&config).is_ok());
    }
}
