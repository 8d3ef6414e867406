//! Configuration management for the IdeaHub guard.
//!
//! Configuration is layered: an optional TOML file, then `IDEAHUB__*`
//! environment variables, with every missing key falling back to the
//! defaults in [`crate::models`].

use std::env;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use crate::models::Config;

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::with_prefix("IDEAHUB").separator("__"))
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5000)?
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionBackend;

    #[test]
    fn test_defaults_fill_missing_sections() {
        env::set_var("CONFIG_FILE", "does/not/exist.toml");
        let config = load_config().unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.threat.high_risk_score, 75);
        assert_eq!(config.threat.critical_risk_score, 90);
        assert_eq!(config.rate_limit.auth.max_requests, 500);
        assert_eq!(config.audit.max_files, 365);
        assert_eq!(config.session.backend, SessionBackend::Auto);
    }
}
