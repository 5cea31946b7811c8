//! 리스크 제어 설정.
//!
//! 사전 주문 검사와 실시간 포트폴리오 감시에 쓰이는 한도를 정의합니다.
//! 비율 값은 모두 계좌 평가액(equity) 대비 소수 비율입니다 (0.3 = 30%).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 전역 리스크 제어 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskControlConfig {
    /// 단일 심볼 최대 포지션 비중 (기본값: 0.3)
    #[serde(default = "default_max_position_size_ratio")]
    pub max_position_size_ratio: Decimal,

    /// 최대 일일 손실 비율 (기본값: 0.05)
    /// 이 한도에 도달하면 신규 거래가 정지됩니다
    #[serde(default = "default_max_daily_loss_ratio")]
    pub max_daily_loss_ratio: Decimal,

    /// 증거금 경고 비율 (기본값: 0.2).
    /// 여유 증거금 비율 `(평가액 - 사용 증거금) / 평가액`이 이 값보다 작으면 마진콜
    #[serde(default = "default_margin_call_ratio")]
    pub margin_call_ratio: Decimal,

    /// 강제 청산 비율 (기본값: 0.1). `margin_call_ratio`보다 작아야 합니다.
    /// 여유 증거금 비율이 이 값보다 작으면 전체 청산
    #[serde(default = "default_liquidation_ratio")]
    pub liquidation_ratio: Decimal,

    /// 주문 1건 최대 금액 비율 (기본값: 0.2)
    #[serde(default = "default_max_order_value_ratio")]
    pub max_order_value_ratio: Decimal,

    /// 일일 누적 거래 금액 비율 (기본값: 5.0, 1을 넘을 수 있음)
    #[serde(default = "default_max_daily_volume_ratio")]
    pub max_daily_volume_ratio: Decimal,

    /// 자금 검사에 쓰는 예상 수수료율 (기본값: 0.001)
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,

    /// 심볼별 리스크 설정 (전역 설정을 재정의함)
    #[serde(default)]
    pub symbol_configs: HashMap<String, SymbolRiskConfig>,
}

/// 심볼별 리스크 설정.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRiskConfig {
    /// 이 심볼의 최대 포지션 비중 (전역 설정 재정의)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_position_size_ratio: Option<Decimal>,

    /// 이 심볼의 거래 활성화 여부 (기본값: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_position_size_ratio() -> Decimal {
    dec!(0.3)
}

fn default_max_daily_loss_ratio() -> Decimal {
    dec!(0.05)
}

fn default_margin_call_ratio() -> Decimal {
    dec!(0.2)
}

fn default_liquidation_ratio() -> Decimal {
    dec!(0.1)
}

fn default_max_order_value_ratio() -> Decimal {
    dec!(0.2)
}

fn default_max_daily_volume_ratio() -> Decimal {
    dec!(5)
}

fn default_commission_rate() -> Decimal {
    dec!(0.001)
}

fn default_true() -> bool {
    true
}

impl Default for RiskControlConfig {
    fn default() -> Self {
        Self {
            max_position_size_ratio: default_max_position_size_ratio(),
            max_daily_loss_ratio: default_max_daily_loss_ratio(),
            margin_call_ratio: default_margin_call_ratio(),
            liquidation_ratio: default_liquidation_ratio(),
            max_order_value_ratio: default_max_order_value_ratio(),
            max_daily_volume_ratio: default_max_daily_volume_ratio(),
            commission_rate: default_commission_rate(),
            symbol_configs: HashMap::new(),
        }
    }
}

impl Default for SymbolRiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_ratio: None,
            enabled: true,
        }
    }
}

impl RiskControlConfig {
    /// 기본값으로 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 보수적인 리스크 설정을 생성합니다 (낮은 한도).
    pub fn conservative() -> Self {
        Self {
            max_position_size_ratio: dec!(0.15),
            max_daily_loss_ratio: dec!(0.02),
            margin_call_ratio: dec!(0.3),
            liquidation_ratio: dec!(0.15),
            max_order_value_ratio: dec!(0.1),
            max_daily_volume_ratio: dec!(2),
            ..Self::default()
        }
    }

    /// 공격적인 리스크 설정을 생성합니다 (높은 한도).
    pub fn aggressive() -> Self {
        Self {
            max_position_size_ratio: dec!(0.5),
            max_daily_loss_ratio: dec!(0.1),
            margin_call_ratio: dec!(0.1),
            liquidation_ratio: dec!(0.05),
            max_order_value_ratio: dec!(0.4),
            max_daily_volume_ratio: dec!(10),
            ..Self::default()
        }
    }

    /// 심볼에 대한 유효 최대 포지션 비중.
    pub fn max_position_ratio_for(&self, symbol: &str) -> Decimal {
        self.symbol_configs
            .get(symbol)
            .and_then(|c| c.max_position_size_ratio)
            .unwrap_or(self.max_position_size_ratio)
    }

    /// 심볼에 대해 거래가 활성화되어 있는지 확인합니다.
    pub fn is_symbol_enabled(&self, symbol: &str) -> bool {
        self.symbol_configs.get(symbol).map(|c| c.enabled).unwrap_or(true)
    }

    /// 심볼별 설정을 추가하거나 업데이트합니다.
    pub fn set_symbol_config(&mut self, symbol: impl Into<String>, config: SymbolRiskConfig) {
        self.symbol_configs.insert(symbol.into(), config);
    }

    /// 설정 값을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let fractions = [
            ("max_position_size_ratio", self.max_position_size_ratio),
            ("max_daily_loss_ratio", self.max_daily_loss_ratio),
            ("margin_call_ratio", self.margin_call_ratio),
            ("liquidation_ratio", self.liquidation_ratio),
            ("max_order_value_ratio", self.max_order_value_ratio),
        ];
        for (name, value) in fractions {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "{} must be between 0 and 1 (exclusive), got {}",
                    name, value
                )));
            }
        }

        if self.liquidation_ratio >= self.margin_call_ratio {
            return Err(ConfigValidationError::InvalidValue(format!(
                "liquidation_ratio ({}) must be less than margin_call_ratio ({})",
                self.liquidation_ratio, self.margin_call_ratio
            )));
        }

        if self.max_daily_volume_ratio <= Decimal::ZERO {
            return Err(ConfigValidationError::InvalidValue(
                "max_daily_volume_ratio must be greater than 0".into(),
            ));
        }

        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(ConfigValidationError::InvalidValue(
                "commission_rate must be in [0, 1)".into(),
            ));
        }

        for (symbol, symbol_config) in &self.symbol_configs {
            if let Some(ratio) = symbol_config.max_position_size_ratio {
                if ratio <= Decimal::ZERO || ratio >= Decimal::ONE {
                    return Err(ConfigValidationError::InvalidValue(format!(
                        "max_position_size_ratio for {} must be between 0 and 1",
                        symbol
                    )));
                }
            }
        }

        Ok(())
    }
}

/// 설정 검증 오류.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RiskControlConfig::default();

        assert_eq!(config.max_position_size_ratio, dec!(0.3));
        assert_eq!(config.max_daily_loss_ratio, dec!(0.05));
        assert!(config.liquidation_ratio < config.margin_call_ratio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(RiskControlConfig::conservative().validate().is_ok());
        assert!(RiskControlConfig::aggressive().validate().is_ok());
        assert!(
            RiskControlConfig::conservative().max_position_size_ratio
                < RiskControlConfig::aggressive().max_position_size_ratio
        );
    }

    #[test]
    fn test_symbol_specific_config() {
        let mut config = RiskControlConfig::default();
        config.set_symbol_config(
            "TSLA",
            SymbolRiskConfig {
                max_position_size_ratio: Some(dec!(0.1)),
                enabled: true,
            },
        );
        config.set_symbol_config(
            "GME",
            SymbolRiskConfig {
                enabled: false,
                ..Default::default()
            },
        );

        assert_eq!(config.max_position_ratio_for("TSLA"), dec!(0.1));
        assert_eq!(config.max_position_ratio_for("AAPL"), dec!(0.3));
        assert!(!config.is_symbol_enabled("GME"));
        assert!(config.is_symbol_enabled("AAPL"));
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = RiskControlConfig::default();
        invalid.max_position_size_ratio = dec!(1.5);
        assert!(invalid.validate().is_err());

        let mut inverted = RiskControlConfig::default();
        inverted.liquidation_ratio = dec!(0.3);
        inverted.margin_call_ratio = dec!(0.2);
        assert!(matches!(
            inverted.validate(),
            Err(ConfigValidationError::InvalidValue(msg)) if msg.contains("liquidation_ratio")
        ));

        let mut volume = RiskControlConfig::default();
        volume.max_daily_volume_ratio = Decimal::ZERO;
        assert!(volume.validate().is_err());
    }

    #[test]
    fn test_config_deserialization_uses_defaults() {
        let config: RiskControlConfig = serde_json::from_str(r#"{"max_position_size_ratio": "0.25"}"#).unwrap();

        assert_eq!(config.max_position_size_ratio, dec!(0.25));
        assert_eq!(config.max_order_value_ratio, dec!(0.2));
        assert!(config.validate().is_ok());
    }
}
