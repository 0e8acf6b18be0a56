use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Core HTTP settings every service in the workspace shares. Service
/// crates embed this and layer their own sections on top.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load from an optional `configuration` file with `APP__*` env
    /// variables taking precedence.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_defaults_port_and_honors_env_override() {
        std::env::remove_var("APP__PORT");
        assert_eq!(Config::load().unwrap().port, 8080);

        std::env::set_var("APP__PORT", "3010");
        assert_eq!(Config::load().unwrap().port, 3010);
        std::env::remove_var("APP__PORT");
    }
}
