//! 일일 거래량 및 손익 추적.
//!
//! 제공 기능:
//! - 사용자별 당일 누적 거래 금액
//! - 당일 실현 손익 기록
//! - UTC 자정에 자동 일일 초기화

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 단일 체결 기록.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// 기록 시각
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    /// 체결 금액 (수량 × 가격)
    pub value: Decimal,
    /// 이 체결로 실현된 손익
    pub realized_pnl: Decimal,
}

impl TradeRecord {
    /// 새 기록 생성.
    pub fn new(symbol: impl Into<String>, value: Decimal, realized_pnl: Decimal) -> Self {
        Self {
            timestamp: Utc::now(),
            symbol: symbol.into(),
            value: value.abs(),
            realized_pnl,
        }
    }

    /// 손실인지 확인.
    pub fn is_loss(&self) -> bool {
        self.realized_pnl < Decimal::ZERO
    }
}

/// 당일 거래 현황.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTradeStatus {
    pub date: NaiveDate,
    /// 누적 거래 금액
    pub traded_value: Decimal,
    /// 누적 실현 손익
    pub realized_pnl: Decimal,
    /// 체결 횟수
    pub trade_count: usize,
}

/// 사용자 1명의 당일 거래 추적기.
#[derive(Debug, Clone)]
pub struct DailyTradeTracker {
    /// 현재 날짜 (초기화 감지용)
    current_date: NaiveDate,
    /// 오늘의 체결 기록
    records: Vec<TradeRecord>,
    /// 심볼별 거래 금액
    symbol_volume: HashMap<String, Decimal>,
    traded_value: Decimal,
    realized_pnl: Decimal,
}

impl Default for DailyTradeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DailyTradeTracker {
    /// 오늘 날짜로 생성.
    pub fn new() -> Self {
        Self::starting_on(Utc::now().date_naive())
    }

    /// 지정한 날짜로 생성.
    pub fn starting_on(date: NaiveDate) -> Self {
        Self {
            current_date: date,
            records: Vec::new(),
            symbol_volume: HashMap::new(),
            traded_value: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// 날짜가 바뀌었으면 초기화합니다. 초기화했으면 `true`.
    pub fn roll_to(&mut self, today: NaiveDate) -> bool {
        if today == self.current_date {
            return false;
        }
        self.current_date = today;
        self.records.clear();
        self.symbol_volume.clear();
        self.traded_value = Decimal::ZERO;
        self.realized_pnl = Decimal::ZERO;
        true
    }

    fn check_and_reset(&mut self) {
        self.roll_to(Utc::now().date_naive());
    }

    /// 체결을 기록합니다.
    pub fn record(&mut self, record: TradeRecord) -> DailyTradeStatus {
        self.check_and_reset();

        self.traded_value += record.value;
        self.realized_pnl += record.realized_pnl;
        *self.symbol_volume.entry(record.symbol.clone()).or_insert(Decimal::ZERO) += record.value;
        self.records.push(record);

        self.status()
    }

    /// 오늘 누적 거래 금액.
    pub fn traded_value(&mut self) -> Decimal {
        self.check_and_reset();
        self.traded_value
    }

    /// 심볼의 오늘 거래 금액.
    pub fn symbol_volume(&mut self, symbol: &str) -> Decimal {
        self.check_and_reset();
        self.symbol_volume.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    /// 현재 상태.
    pub fn status(&mut self) -> DailyTradeStatus {
        self.check_and_reset();
        DailyTradeStatus {
            date: self.current_date,
            traded_value: self.traded_value,
            realized_pnl: self.realized_pnl,
            trade_count: self.records.len(),
        }
    }

    /// 오늘의 체결 기록.
    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_accumulates() {
        let mut tracker = DailyTradeTracker::new();

        tracker.record(TradeRecord::new("AAPL", dec!(15000), Decimal::ZERO));
        let status = tracker.record(TradeRecord::new("AAPL", dec!(-900), dec!(-50)));

        assert_eq!(status.traded_value, dec!(15900));
        assert_eq!(status.realized_pnl, dec!(-50));
        assert_eq!(status.trade_count, 2);
        assert_eq!(tracker.symbol_volume("AAPL"), dec!(15900));
        assert_eq!(tracker.symbol_volume("MSFT"), Decimal::ZERO);
        assert!(tracker.records()[1].is_loss());
    }

    #[test]
    fn test_daily_reset() {
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        let mut tracker = DailyTradeTracker::starting_on(yesterday);
        tracker.records.push(TradeRecord::new("AAPL", dec!(100), Decimal::ZERO));
        tracker.traded_value = dec!(100);

        // 날짜가 바뀌면 조회 시점에 초기화된다
        assert_eq!(tracker.traded_value(), Decimal::ZERO);
        assert!(tracker.records().is_empty());
        assert!(!tracker.roll_to(Utc::now().date_naive()));
    }
}
