use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration rooted at a specific TOML file.
    ///
    /// Environment variables use the `LEDGER_` prefix with `__` as the nesting
    /// separator, e.g. `LEDGER_DATABASE__URL`, and override the file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Self::base(path).extract()?;
        tracing::debug!(path, systems = config.ledger.systems.len(), "Loaded configuration");
        Ok(config)
    }

    fn base(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LEDGER_").split("__"))
            .join(Json::file("config/Config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_load_merges_toml_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [database]
                url = "postgresql://db/ledger"
                max_connections = 4

                [ledger.systems.each-way]
                place_market = true

                [ledger.systems.each-way.pl]
                commission = "0.05"
                "#,
            )?;
            jail.set_env("LEDGER_DATABASE__MAX_CONNECTIONS", "8");

            let config = ConfigLoader::load_from("config/Config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.database.url, "postgresql://db/ledger");
            assert_eq!(config.database.max_connections, 8);

            let profile = config.ledger.profile_for("each-way");
            assert!(profile.place_market);
            assert_eq!(profile.pl.commission, dec!(0.05));
            assert_eq!(profile.pl.stake, dec!(1));
            Ok(())
        });
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = ConfigLoader::load_from("config/Config.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.database.max_connections, 10);
            assert!(config.ledger.systems.is_empty());
            Ok(())
        });
    }
}
