#![allow(dead_code)]
use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            other => Err(anyhow!(
                "unsupported config format {:?}, use YAML or JSON",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchanges: Vec<String>,
    #[serde(default)]
    pub default_exchange: String,
    #[serde(default)]
    pub api_keys: BTreeMap<String, ApiCredentials>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "defaults::dry_run")]
    pub dry_run: bool,
    #[serde(default = "defaults::log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "defaults::iceberg_threshold")]
    pub iceberg_threshold: Decimal,
    #[serde(default = "defaults::min_order_amount")]
    pub min_order_amount: Decimal,
    #[serde(default = "defaults::quote_currencies")]
    pub quote_currencies: Vec<String>,
    /// Candle cache TTL in seconds.
    #[serde(default = "defaults::data_refresh_interval")]
    pub data_refresh_interval: u64,
    /// Market regime cache TTL in seconds.
    #[serde(default = "defaults::market_state_refresh_interval")]
    pub market_state_refresh_interval: u64,
    /// Scan period in minutes.
    #[serde(default = "defaults::scan_interval")]
    pub scan_interval: u64,
    #[serde(default = "defaults::max_new_positions")]
    pub max_new_positions: usize,
    /// Risk caps, all in percent of account balance.
    #[serde(default = "defaults::max_risk_per_trade")]
    pub max_risk_per_trade: Decimal,
    #[serde(default = "defaults::max_total_risk")]
    pub max_total_risk: Decimal,
    /// Fraction of total risk a single sector may hold.
    #[serde(default = "defaults::max_sector_allocation")]
    pub max_sector_allocation: Decimal,
    #[serde(default = "defaults::account_balance")]
    pub account_balance: Decimal,
    #[serde(default)]
    pub social_api_enabled: bool,
    /// Sector name to symbol-prefix list, e.g. `DeFi: ["UNI/", "AAVE/"]`.
    #[serde(default = "defaults::sectors")]
    pub sectors: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub strategies: BTreeMap<String, StrategyConfig>,
    #[serde(skip)]
    source: Option<(PathBuf, ConfigFormat)>,
}

mod defaults {
    use super::*;

    pub fn dry_run() -> bool {
        true
    }
    pub fn log_dir() -> PathBuf {
        PathBuf::from("logs")
    }
    pub fn iceberg_threshold() -> Decimal {
        Decimal::ONE
    }
    pub fn min_order_amount() -> Decimal {
        dec!(10.0)
    }
    pub fn quote_currencies() -> Vec<String> {
        vec!["USDT".to_string(), "USDC".to_string()]
    }
    pub fn data_refresh_interval() -> u64 {
        60
    }
    pub fn market_state_refresh_interval() -> u64 {
        300
    }
    pub fn scan_interval() -> u64 {
        5
    }
    pub fn max_new_positions() -> usize {
        3
    }
    pub fn max_risk_per_trade() -> Decimal {
        dec!(2)
    }
    pub fn max_total_risk() -> Decimal {
        dec!(10)
    }
    pub fn max_sector_allocation() -> Decimal {
        dec!(0.5)
    }
    pub fn account_balance() -> Decimal {
        dec!(10000)
    }

    pub fn sectors() -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        let entries: [(&str, &[&str]); 5] = [
            ("DeFi", &["UNI/", "AAVE/", "COMP/", "SUSHI/", "YFI/", "CAKE/", "CRV/"]),
            ("Layer2", &["MATIC/", "ARB/", "OP/", "IMX/", "ZK/", "METIS/", "SCROLL/"]),
            ("AI", &["FET/", "OCEAN/", "RNDR/", "GRT/", "AGIX/", "NMR/"]),
            ("GameFi", &["AXS/", "SAND/", "MANA/", "ENJ/", "GALA/", "ILV/", "MAGIC/"]),
            ("Meme", &["DOGE/", "SHIB/", "PEPE/", "FLOKI/", "BONK/", "WIF/"]),
        ];
        for (name, prefixes) in entries {
            map.insert(
                name.to_string(),
                prefixes.iter().map(|p| p.to_string()).collect(),
            );
        }
        map
    }
}

impl Default for Config {
    fn default() -> Self {
        // Round-trips through serde so defaults live in one place.
        serde_json::from_str("{}").expect("default config deserializes")
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;

        let mut config: Config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing YAML config {}", path.display()))?,
            ConfigFormat::Json => serde_json::from_str(&raw)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
        };
        config.source = Some((path.to_path_buf(), format));

        if let Err(errors) = config.validate() {
            return Err(anyhow!("invalid config: {}", errors.join(", ")));
        }

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.max_risk_per_trade <= Decimal::ZERO {
            errors.push("max_risk_per_trade must be > 0".to_string());
        }
        if self.max_total_risk < self.max_risk_per_trade {
            errors.push("max_total_risk must be >= max_risk_per_trade".to_string());
        }
        if self.max_sector_allocation <= Decimal::ZERO || self.max_sector_allocation > Decimal::ONE
        {
            errors.push("max_sector_allocation must be in (0, 1]".to_string());
        }
        if self.account_balance <= Decimal::ZERO {
            errors.push("account_balance must be > 0".to_string());
        }
        if self.iceberg_threshold <= Decimal::ZERO {
            errors.push("iceberg_threshold must be > 0".to_string());
        }
        if self.scan_interval == 0 {
            errors.push("scan_interval must be > 0".to_string());
        }
        if self.quote_currencies.is_empty() {
            errors.push("quote_currencies must not be empty".to_string());
        }
        if !self.exchanges.is_empty()
            && !self.default_exchange.is_empty()
            && !self.exchanges.contains(&self.default_exchange)
        {
            errors.push("default_exchange must be listed in exchanges".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn save(&self) -> Result<()> {
        let (path, format) = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow!("config has no backing file"))?;

        let serialized = match format {
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, serialized)
            .with_context(|| format!("writing config {}", path.display()))?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn strategy(&self, name: &str) -> Option<&StrategyConfig> {
        self.strategies.get(name)
    }

    pub fn is_strategy_enabled(&self, name: &str) -> bool {
        self.strategy(name).map(|s| s.enabled).unwrap_or(false)
    }

    pub fn strategy_parameters(&self, name: &str) -> BTreeMap<String, serde_json::Value> {
        self.strategy(name)
            .map(|s| s.parameters.clone())
            .unwrap_or_default()
    }

    pub fn strategy_symbols(&self, name: &str) -> Vec<String> {
        self.strategy(name)
            .map(|s| s.symbols.clone())
            .unwrap_or_default()
    }

    /// Updates one strategy parameter and persists the whole document.
    pub fn update_strategy_parameter(
        &mut self,
        strategy: &str,
        parameter: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let entry = self
            .strategies
            .entry(strategy.to_string())
            .or_insert_with(|| StrategyConfig {
                enabled: true,
                ..StrategyConfig::default()
            });
        entry.parameters.insert(parameter.to_string(), value.clone());

        info!("Updated strategy {} parameter {}={}", strategy, parameter, value);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.dry_run);
        assert_eq!(config.min_order_amount, dec!(10.0));
        assert_eq!(config.sectors.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "exchanges: [binance]\ndefault_exchange: binance\naccount_balance: 5000\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_exchange, "binance");
        assert_eq!(config.account_balance, dec!(5000));
        assert!(config.dry_run);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_risk_per_trade: 5\nmax_total_risk: 2\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_strategy_parameter_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "strategies:\n  ma_cross:\n    enabled: true\n    parameters:\n      short_window: 5\n",
        )
        .unwrap();

        let mut config = Config::load(&path).unwrap();
        config
            .update_strategy_parameter("ma_cross", "short_window", serde_json::json!(8))
            .unwrap();

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(
            reloaded.strategy_parameters("ma_cross").get("short_window"),
            Some(&serde_json::json!(8))
        );
    }
}
