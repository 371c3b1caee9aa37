//! Layered CLI configuration

use anyhow::{bail, Context};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use taskboard_kanban::{HttpApiConfig, MoveConfig};

/// File read from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "taskboard.toml";
const ENV_PREFIX: &str = "TASKBOARD_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub board_id: String,
    pub api: HttpApiConfig,
    pub moves: MoveConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            board_id: "default".to_string(),
            api: HttpApiConfig::default(),
            moves: MoveConfig::default(),
        }
    }
}

impl CliConfig {
    /// Merge defaults, the config file and the environment, in that order.
    ///
    /// A missing default file is fine; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let file = match explicit {
            Some(path) if !path.is_file() => {
                bail!("config file {} does not exist", path.display())
            }
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")?;
        config.moves.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file_or_env() {
        Jail::expect_with(|_jail| {
            let config = CliConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config, CliConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                board_id = "roadmap"

                [api]
                base_url = "https://tasks.example.com/api/"
                token = "from-file"

                [moves]
                confirm_timeout_ms = 2500
                "#,
            )?;
            jail.set_env("TASKBOARD_API__TOKEN", "from-env");
            jail.set_env("TASKBOARD_MOVES__NETWORK_RETRIES", "3");

            let config = CliConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.board_id, "roadmap");
            assert_eq!(config.api.base_url, "https://tasks.example.com/api/");
            assert_eq!(config.api.token.as_deref(), Some("from-env"));
            assert_eq!(config.moves.confirm_timeout_ms, 2500);
            assert_eq!(config.moves.network_retries, 3);
            // Untouched keys keep their defaults
            assert_eq!(config.moves.stride, MoveConfig::default().stride);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        Jail::expect_with(|jail| {
            jail.create_file("other.toml", "board_id = \"other\"")?;
            let config =
                CliConfig::load(Some(Path::new("other.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.board_id, "other");

            assert!(CliConfig::load(Some(Path::new("missing.toml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_move_settings_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("TASKBOARD_MOVES__STRIDE", "0");
            assert!(CliConfig::load(None).is_err());
            Ok(())
        });
    }
}
