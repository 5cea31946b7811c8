//! 시세 생성기 및 체결 수량 결정기.
//!
//! 시뮬레이션 거래소는 틱마다 `MarketSimulator`로 다음 시세를 만들고,
//! 체결 가능한 주문의 이번 회차 체결 수량을 `FillSizer`로 결정합니다.
//! 시드를 고정하면 같은 시나리오가 항상 같은 결과를 냅니다.

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use trader_core::{MarketData, Price, Quantity};

/// 심볼별 다음 시세를 생성합니다.
pub trait MarketSimulator: Send {
    /// 다음 시세. 생성할 수 없는 심볼이면 `None`.
    fn next_quote(&mut self, symbol: &str, last: Option<&MarketData>) -> Option<MarketData>;
}

/// 랜덤 워크 시세 생성기.
pub struct RandomWalkSimulator {
    rng: StdRng,
    /// 틱당 최대 변동률 (예: 0.01 = ±1%)
    volatility: f64,
    /// 심볼별 시작 가격
    initial_prices: HashMap<String, Price>,
    /// 틱당 기본 거래량
    base_volume: Quantity,
}

impl RandomWalkSimulator {
    /// 시드를 지정해 생성합니다. `None`이면 엔트로피에서 시드를 얻습니다.
    pub fn new(seed: Option<u64>, volatility: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            volatility: volatility.abs(),
            initial_prices: HashMap::new(),
            base_volume: Decimal::new(1_000, 0),
        }
    }

    /// 심볼의 시작 가격을 등록합니다.
    pub fn with_symbol(mut self, symbol: impl Into<String>, price: Price) -> Self {
        self.initial_prices.insert(symbol.into(), price);
        self
    }

    /// 틱당 기본 거래량을 설정합니다.
    pub fn with_base_volume(mut self, volume: Quantity) -> Self {
        self.base_volume = volume;
        self
    }
}

impl MarketSimulator for RandomWalkSimulator {
    fn next_quote(&mut self, symbol: &str, last: Option<&MarketData>) -> Option<MarketData> {
        let previous = match last {
            Some(quote) => quote.price,
            None => *self.initial_prices.get(symbol)?,
        };

        let change = if self.volatility > 0.0 {
            self.rng.gen_range(-self.volatility..=self.volatility)
        } else {
            0.0
        };
        let factor = Decimal::from_f64(1.0 + change).unwrap_or(Decimal::ONE);
        let price = (previous * factor).round_dp(4).max(Decimal::new(1, 4));

        let volume_factor = Decimal::from_f64(self.rng.gen_range(0.5..1.5)).unwrap_or(Decimal::ONE);
        let volume = (self.base_volume * volume_factor).round_dp(0);

        Some(MarketData::from_price(symbol, price).with_volume(volume))
    }
}

/// 미리 정한 가격 순서대로 시세를 내보냅니다.
///
/// 스크립트가 소진되면 마지막 가격을 유지합니다.
#[derive(Debug, Default)]
pub struct ScriptedPrices {
    scripts: HashMap<String, VecDeque<Price>>,
    volume: Quantity,
}

impl ScriptedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// 심볼의 가격 순서를 등록합니다.
    pub fn with_script(mut self, symbol: impl Into<String>, prices: impl IntoIterator<Item = Price>) -> Self {
        self.scripts.entry(symbol.into()).or_default().extend(prices);
        self
    }

    /// 틱당 거래량을 설정합니다.
    pub fn with_volume(mut self, volume: Quantity) -> Self {
        self.volume = volume;
        self
    }
}

impl MarketSimulator for ScriptedPrices {
    fn next_quote(&mut self, symbol: &str, last: Option<&MarketData>) -> Option<MarketData> {
        let price = match self.scripts.get_mut(symbol).and_then(|script| script.pop_front()) {
            Some(price) => price,
            None => last?.price,
        };
        Some(MarketData::from_price(symbol, price).with_volume(self.volume))
    }
}

/// 가격이 변하지 않는 시세.
#[derive(Debug, Default)]
pub struct StaticPrices;

impl MarketSimulator for StaticPrices {
    fn next_quote(&mut self, _symbol: &str, last: Option<&MarketData>) -> Option<MarketData> {
        last.map(|quote| {
            let mut next = quote.clone();
            next.timestamp = chrono::Utc::now();
            next
        })
    }
}

/// 이번 회차 체결 수량을 결정합니다.
pub trait FillSizer: Send {
    /// `remaining`은 주문 잔량, `max_slice`는 실행 규칙이 허용한 회차 상한입니다.
    fn fill_quantity(&mut self, remaining: Quantity, max_slice: Quantity) -> Quantity;
}

/// 회차 상한까지 전량 체결.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullFill;

impl FillSizer for FullFill {
    fn fill_quantity(&mut self, remaining: Quantity, max_slice: Quantity) -> Quantity {
        remaining.min(max_slice)
    }
}

/// 원 잔량의 고정 비율만큼 체결.
#[derive(Debug, Clone, Copy)]
pub struct FractionalFill {
    fraction: Decimal,
    min_quantity: Quantity,
}

impl FractionalFill {
    /// `fraction`은 (0, 1] 범위로 보정됩니다.
    pub fn new(fraction: Decimal) -> Self {
        Self {
            fraction: fraction.max(Decimal::new(1, 4)).min(Decimal::ONE),
            min_quantity: Decimal::ONE,
        }
    }

    /// 최소 체결 수량을 설정합니다.
    pub fn with_min_quantity(mut self, min_quantity: Quantity) -> Self {
        self.min_quantity = min_quantity;
        self
    }
}

impl FillSizer for FractionalFill {
    fn fill_quantity(&mut self, remaining: Quantity, max_slice: Quantity) -> Quantity {
        let cap = remaining.min(max_slice);
        (cap * self.fraction).round_dp(8).max(self.min_quantity).min(cap)
    }
}

/// 시드 고정 난수 비율만큼 체결.
pub struct RandomFraction {
    rng: StdRng,
    min_fraction: f64,
}

impl RandomFraction {
    pub fn new(seed: u64, min_fraction: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            min_fraction: min_fraction.clamp(0.01, 1.0),
        }
    }
}

impl FillSizer for RandomFraction {
    fn fill_quantity(&mut self, remaining: Quantity, max_slice: Quantity) -> Quantity {
        let cap = remaining.min(max_slice);
        let fraction = self.rng.gen_range(self.min_fraction..=1.0);
        let fraction = Decimal::from_f64(fraction).unwrap_or(Decimal::ONE);
        let quantity = (cap * fraction).round_dp(0);
        if quantity <= Decimal::ZERO {
            cap
        } else {
            quantity.min(cap)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_random_walk_is_deterministic_with_seed() {
        let mut a = RandomWalkSimulator::new(Some(42), 0.01).with_symbol("AAPL", dec!(150));
        let mut b = RandomWalkSimulator::new(Some(42), 0.01).with_symbol("AAPL", dec!(150));

        let mut last_a = None;
        let mut last_b = None;
        for _ in 0..20 {
            last_a = a.next_quote("AAPL", last_a.as_ref());
            last_b = b.next_quote("AAPL", last_b.as_ref());
        }

        let (qa, qb) = (last_a.unwrap(), last_b.unwrap());
        assert_eq!(qa.price, qb.price);
        assert!(qa.price > Decimal::ZERO);
    }

    #[test]
    fn test_random_walk_unknown_symbol() {
        let mut sim = RandomWalkSimulator::new(Some(1), 0.01);
        assert!(sim.next_quote("NOPE", None).is_none());
    }

    #[test]
    fn test_scripted_prices_hold_last() {
        let mut sim = ScriptedPrices::new().with_script("AAPL", [dec!(151), dec!(149.5)]);

        let q1 = sim.next_quote("AAPL", None).unwrap();
        let q2 = sim.next_quote("AAPL", Some(&q1)).unwrap();
        let q3 = sim.next_quote("AAPL", Some(&q2)).unwrap();

        assert_eq!(q1.price, dec!(151));
        assert_eq!(q2.price, dec!(149.5));
        assert_eq!(q3.price, dec!(149.5));
    }

    #[test]
    fn test_fill_sizers() {
        assert_eq!(FullFill.fill_quantity(dec!(100), dec!(30)), dec!(30));

        let mut half = FractionalFill::new(dec!(0.5));
        assert_eq!(half.fill_quantity(dec!(100), dec!(100)), dec!(50));
        assert_eq!(half.fill_quantity(dec!(1), dec!(1)), dec!(1));

        let mut random = RandomFraction::new(7, 0.2);
        for _ in 0..50 {
            let q = random.fill_quantity(dec!(100), dec!(100));
            assert!(q > Decimal::ZERO && q <= dec!(100));
        }
    }
}
