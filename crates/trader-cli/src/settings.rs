//! 바이너리 설정.
//!
//! `config/default.toml` (또는 `--config`로 지정한 파일) 위에
//! `TRADER__SECTION__KEY` 환경 변수를 덮어씁니다.

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{load_default, load_layered, LoggingConfig};
use trader_exchange::SimulatedConfig;
use trader_execution::ExecutionConfig;
use trader_risk::RiskControlConfig;

/// 전체 설정.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub execution: ExecutionConfig,
    pub risk: RiskControlConfig,
    pub simulation: SimulatedConfig,
}

impl Settings {
    /// 설정을 로드하고 검증합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings: Settings = match path {
            Some(path) => load_layered(Some(path))
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => load_default().context("failed to load default settings")?,
        };
        settings.normalize_symbols();
        settings.validate()?;
        Ok(settings)
    }

    /// 심볼 키를 대문자로 맞춥니다. 설정 소스에 따라 키가 소문자로 들어올 수 있습니다.
    fn normalize_symbols(&mut self) {
        self.simulation.symbols = std::mem::take(&mut self.simulation.symbols)
            .into_iter()
            .map(|(symbol, price)| (symbol.to_uppercase(), price))
            .collect();
        self.risk.symbol_configs = std::mem::take(&mut self.risk.symbol_configs)
            .into_iter()
            .map(|(symbol, config)| (symbol.to_uppercase(), config))
            .collect();
    }

    /// 섹션 간 값을 검증합니다.
    pub fn validate(&self) -> Result<()> {
        self.risk.validate().context("invalid risk section")?;

        if self.execution.poll_interval_ms == 0 {
            anyhow::bail!("execution.poll_interval_ms must be positive");
        }
        if self.simulation.initial_balance <= Decimal::ZERO {
            anyhow::bail!("simulation.initial_balance must be positive");
        }
        if let Some((symbol, _)) = self
            .simulation
            .symbols
            .iter()
            .find(|(_, price)| **price <= Decimal::ZERO)
        {
            anyhow::bail!("simulation price for {} must be positive", symbol);
        }
        Ok(())
    }

    /// TOML 문자열로 직렬화합니다.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.execution.poll_interval_ms, 5_000);
        assert_eq!(settings.risk.max_position_size_ratio, dec!(0.3));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("trader-settings-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[execution]
poll_interval_ms = 250
auto_resize = true

[risk]
max_position_size_ratio = "0.25"

[simulation]
initial_balance = "50000"
seed = 7

[simulation.symbols]
AAPL = "150"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.execution.poll_interval_ms, 250);
        assert!(settings.execution.auto_resize);
        assert_eq!(settings.execution.ledger_max_retries, 3);
        assert_eq!(settings.risk.max_position_size_ratio, dec!(0.25));
        assert_eq!(settings.risk.liquidation_ratio, dec!(0.1));
        assert_eq!(settings.simulation.initial_balance, dec!(50000));
        assert_eq!(settings.simulation.seed, Some(7));
        assert_eq!(settings.simulation.symbols.get("AAPL"), Some(&dec!(150)));
    }

    #[test]
    fn test_invalid_risk_ratio_rejected() {
        let mut settings = Settings::default();
        settings.risk.liquidation_ratio = dec!(0.5);
        settings.risk.margin_call_ratio = dec!(0.2);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let path = std::env::temp_dir().join("trader-settings-does-not-exist.toml");
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut settings = Settings::default();
        settings.simulation.symbols.insert("MSFT".to_string(), dec!(320));
        let text = settings.to_toml().unwrap();
        assert!(text.contains("[execution]"));
        assert!(text.contains("MSFT"));
    }
}
