//! 정밀한 금융 계산을 위한 Decimal 유틸리티.

use rust_decimal::Decimal;

/// 금융 정밀도를 위한 가격 타입.
pub type Price = Decimal;

/// 주문 수량을 위한 타입.
pub type Quantity = Decimal;

/// 비율 타입 (0.01 = 1%).
pub type Ratio = Decimal;

/// 사용자 식별자.
pub type UserId = i64;

/// Decimal 연산을 위한 확장 트레이트.
pub trait DecimalExt {
    /// 양수인지 확인합니다.
    fn is_positive(&self) -> bool;

    /// 음수인지 확인합니다.
    fn is_negative(&self) -> bool;

    /// 0으로 나누는 경우 `None`을 반환하는 나눗셈.
    fn checked_ratio(&self, denominator: Decimal) -> Option<Decimal>;

    /// 퍼센트 문자열로 변환합니다 (예: "5.25%").
    fn to_percentage_string(&self) -> String;

    /// 지정된 소수점 자릿수로 반올림합니다.
    fn round_money(&self, dp: u32) -> Decimal;

    /// 지정된 소수점 자릿수로 내림합니다 (수량 제안용).
    fn floor_dp(&self, dp: u32) -> Decimal;
}

impl DecimalExt for Decimal {
    fn is_positive(&self) -> bool {
        *self > Decimal::ZERO
    }

    fn is_negative(&self) -> bool {
        *self < Decimal::ZERO
    }

    fn checked_ratio(&self, denominator: Decimal) -> Option<Decimal> {
        if denominator.is_zero() {
            None
        } else {
            self.checked_div(denominator)
        }
    }

    fn to_percentage_string(&self) -> String {
        let pct = *self * Decimal::from(100);
        format!("{:.2}%", pct)
    }

    fn round_money(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
    }

    fn floor_dp(&self, dp: u32) -> Decimal {
        self.round_dp_with_strategy(dp, rust_decimal::RoundingStrategy::ToZero)
    }
}
