//! 시장 데이터 및 계좌 정보.

use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 심볼의 현재 시세 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// 심볼
    pub symbol: String,
    /// 최종 체결가
    pub price: Price,
    /// 매수 호가
    pub bid: Price,
    /// 매도 호가
    pub ask: Price,
    /// 거래량
    pub volume: Quantity,
    /// 시세 시각
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    /// 호가 스프레드 없이 가격 하나로 시세를 생성합니다.
    pub fn from_price(symbol: impl Into<String>, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            bid: price,
            ask: price,
            volume: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// 거래량을 설정합니다.
    pub fn with_volume(mut self, volume: Quantity) -> Self {
        self.volume = volume;
        self
    }

    /// 중간 가격.
    pub fn mid(&self) -> Price {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// 실행 어댑터가 보고하는 계좌 정보.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// 현금 잔고
    pub balance: Decimal,
    /// 주문 가능 금액
    pub available: Decimal,
    /// 사용 중인 증거금
    pub margin: Decimal,
    /// 평가 손익 (미실현)
    pub profit: Decimal,
}

impl AccountInfo {
    /// 계좌 평가액 (잔고 + 평가 손익).
    pub fn equity(&self) -> Decimal {
        self.balance + self.profit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_equity() {
        let account = AccountInfo {
            balance: dec!(10000),
            available: dec!(4000),
            margin: dec!(6000),
            profit: dec!(-500),
        };
        assert_eq!(account.equity(), dec!(9500));
    }

    #[test]
    fn test_market_data_mid() {
        let mut data = MarketData::from_price("BTC/USDT", dec!(100));
        data.bid = dec!(99);
        data.ask = dec!(101);
        assert_eq!(data.mid(), dec!(100));
    }
}
