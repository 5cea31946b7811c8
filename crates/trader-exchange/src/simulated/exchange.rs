//! 시뮬레이션 거래소 구현.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use trader_core::{AccountInfo, MarketData, Order, OrderChanges, Price, Side};

use super::matching_engine::{MatchingEngine, OrderMatch};
use super::simulator::{FillSizer, FractionalFill, FullFill, MarketSimulator, RandomWalkSimulator};
use crate::traits::{ExchangeResult, ExecutionAdapter, ExternalOrderStatus, ExternalPosition, SubmitResult};
use crate::ExchangeError;

/// 시뮬레이션 거래소 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// 초기 현금 잔고
    pub initial_balance: Decimal,
    /// 거래 수수료율 (예: 0.1%의 경우 0.001)
    pub fee_rate: Decimal,
    /// 시장가 주문의 슬리피지율
    pub slippage_rate: Decimal,
    /// 증거금률 (1 = 레버리지 없음)
    pub margin_rate: Decimal,
    /// 난수 시드 (재현 가능한 시나리오용)
    pub seed: Option<u64>,
    /// 틱당 최대 가격 변동률
    pub volatility: f64,
    /// 회차당 체결 비율. 없으면 전량 체결
    pub partial_fill_fraction: Option<Decimal>,
    /// 심볼별 시작 가격
    pub symbols: BTreeMap<String, Decimal>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(100000),
            fee_rate: dec!(0.001),       // 0.1%
            slippage_rate: dec!(0.0005), // 0.05%
            margin_rate: Decimal::ONE,
            seed: None,
            volatility: 0.005,
            partial_fill_fraction: None,
            symbols: BTreeMap::new(),
        }
    }
}

impl SimulatedConfig {
    /// 초기 잔고를 설정합니다.
    pub fn with_initial_balance(mut self, amount: Decimal) -> Self {
        self.initial_balance = amount;
        self
    }

    /// 수수료율을 설정합니다.
    pub fn with_fee_rate(mut self, rate: Decimal) -> Self {
        self.fee_rate = rate;
        self
    }

    /// 슬리피지율을 설정합니다.
    pub fn with_slippage_rate(mut self, rate: Decimal) -> Self {
        self.slippage_rate = rate;
        self
    }

    /// 증거금률을 설정합니다.
    pub fn with_margin_rate(mut self, rate: Decimal) -> Self {
        self.margin_rate = rate;
        self
    }

    /// 난수 시드를 설정합니다.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// 틱당 변동률을 설정합니다.
    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    /// 회차당 체결 비율을 설정합니다.
    pub fn with_partial_fill_fraction(mut self, fraction: Decimal) -> Self {
        self.partial_fill_fraction = Some(fraction);
        self
    }

    /// 심볼과 시작 가격을 추가합니다.
    pub fn with_symbol(mut self, symbol: impl Into<String>, price: Price) -> Self {
        self.symbols.insert(symbol.into(), price);
        self
    }
}

/// 심볼별 거래소 측 포지션.
#[derive(Debug, Clone, Default)]
struct SimPosition {
    /// 부호 있는 수량
    quantity: Decimal,
    average_cost: Decimal,
}

/// 시뮬레이션 계정 상태.
#[derive(Debug)]
struct AccountState {
    /// 현금 잔고 (실현 손익, 수수료 반영)
    balance: Decimal,
    positions: HashMap<String, SimPosition>,
    order_history: Vec<OrderMatch>,
}

impl AccountState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            positions: HashMap::new(),
            order_history: Vec::new(),
        }
    }

    /// 체결을 포지션과 잔고에 반영합니다.
    fn apply_match(&mut self, order_match: &OrderMatch) {
        let signed = order_match.side.sign() * order_match.filled_quantity;
        let price = order_match.fill_price;
        let position = self.positions.entry(order_match.symbol.clone()).or_default();

        let mut realized = Decimal::ZERO;
        if position.quantity.is_zero() || position.quantity.is_sign_positive() == signed.is_sign_positive() {
            let held = position.quantity.abs();
            let added = signed.abs();
            position.average_cost = (held * position.average_cost + added * price) / (held + added);
            position.quantity += signed;
        } else {
            let closing = signed.abs().min(position.quantity.abs());
            let direction = if position.quantity.is_sign_positive() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = closing * (price - position.average_cost) * direction;
            let before = position.quantity;
            position.quantity += signed;
            if position.quantity.is_zero() {
                position.average_cost = Decimal::ZERO;
            } else if before.is_sign_positive() != position.quantity.is_sign_positive() {
                position.average_cost = price;
            }
        }

        self.balance += realized - order_match.commission;
        if position.quantity.is_zero() {
            self.positions.remove(&order_match.symbol);
        }
        self.order_history.push(order_match.clone());
    }
}

/// 시뮬레이션 거래소.
///
/// 모든 상태는 내부 잠금으로 보호되므로 `Arc<SimulatedExchange>`로 여러
/// 태스크에서 공유할 수 있습니다. `tick()`이 호출될 때만 시세가 움직이고
/// 주문이 매칭됩니다.
pub struct SimulatedExchange {
    name: String,
    config: SimulatedConfig,
    /// 연결 상태
    connected: Arc<RwLock<bool>>,
    /// 거래소 도달 가능 여부 (장애 주입용)
    reachable: Arc<RwLock<bool>>,
    account: Arc<RwLock<AccountState>>,
    matching_engine: Arc<RwLock<MatchingEngine>>,
    /// 심볼별 최신 시세
    quotes: Arc<RwLock<HashMap<String, MarketData>>>,
    simulator: Arc<Mutex<Box<dyn MarketSimulator>>>,
    fill_sizer: Arc<Mutex<Box<dyn FillSizer>>>,
}

impl SimulatedExchange {
    /// 새로운 시뮬레이션 거래소를 생성합니다.
    pub fn new(config: SimulatedConfig) -> Self {
        let mut walk = RandomWalkSimulator::new(config.seed, config.volatility);
        let mut quotes = HashMap::new();
        for (symbol, price) in &config.symbols {
            walk = walk.with_symbol(symbol.clone(), *price);
            quotes.insert(symbol.clone(), MarketData::from_price(symbol.clone(), *price));
        }

        let fill_sizer: Box<dyn FillSizer> = match config.partial_fill_fraction {
            Some(fraction) => Box::new(FractionalFill::new(fraction)),
            None => Box::new(FullFill),
        };
        let matching_engine = MatchingEngine::new(config.fee_rate, config.slippage_rate);
        let account = AccountState::new(config.initial_balance);

        Self {
            name: "simulated".to_string(),
            config,
            connected: Arc::new(RwLock::new(false)),
            reachable: Arc::new(RwLock::new(true)),
            account: Arc::new(RwLock::new(account)),
            matching_engine: Arc::new(RwLock::new(matching_engine)),
            quotes: Arc::new(RwLock::new(quotes)),
            simulator: Arc::new(Mutex::new(Box::new(walk))),
            fill_sizer: Arc::new(Mutex::new(fill_sizer)),
        }
    }

    /// 어댑터 이름을 설정합니다.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 시세 생성기를 교체합니다.
    pub fn with_simulator(mut self, simulator: Box<dyn MarketSimulator>) -> Self {
        self.simulator = Arc::new(Mutex::new(simulator));
        self
    }

    /// 체결 수량 결정기를 교체합니다.
    pub fn with_fill_sizer(mut self, sizer: Box<dyn FillSizer>) -> Self {
        self.fill_sizer = Arc::new(Mutex::new(sizer));
        self
    }

    /// 설정.
    pub fn config(&self) -> &SimulatedConfig {
        &self.config
    }

    /// 거래소 도달 가능 여부를 바꿉니다. 도달 불가가 되면 연결도 끊깁니다.
    pub async fn set_reachable(&self, reachable: bool) {
        *self.reachable.write().await = reachable;
        if !reachable {
            *self.connected.write().await = false;
        }
    }

    /// 시세를 반영하고 해당 심볼의 주문을 매칭합니다.
    pub async fn push_quote(&self, quote: MarketData) -> Vec<OrderMatch> {
        self.quotes.write().await.insert(quote.symbol.clone(), quote.clone());

        let matches = {
            let mut sizer = self.fill_sizer.lock().await;
            let mut engine = self.matching_engine.write().await;
            engine.process_quote(&quote, sizer.as_mut())
        };

        if !matches.is_empty() {
            let mut account = self.account.write().await;
            for order_match in &matches {
                debug!(
                    external_id = %order_match.external_id,
                    quantity = %order_match.filled_quantity,
                    price = %order_match.fill_price,
                    "Simulated fill"
                );
                account.apply_match(order_match);
            }
        }
        matches
    }

    /// 심볼 가격을 지정합니다. 직전 거래량은 유지됩니다.
    pub async fn set_price(&self, symbol: &str, price: Price) -> Vec<OrderMatch> {
        let volume = self
            .quotes
            .read()
            .await
            .get(symbol)
            .map(|q| q.volume)
            .unwrap_or(Decimal::ZERO);
        self.push_quote(MarketData::from_price(symbol, price).with_volume(volume))
            .await
    }

    /// 모든 심볼의 시세를 한 틱 진행하고 매칭합니다.
    ///
    /// 거래소에 도달할 수 없으면 아무 일도 일어나지 않습니다.
    pub async fn tick(&self) -> Vec<OrderMatch> {
        if !*self.reachable.read().await {
            return Vec::new();
        }

        let mut symbols: Vec<String> = self.quotes.read().await.keys().cloned().collect();
        symbols.sort();

        let mut all = Vec::new();
        for symbol in symbols {
            let last = self.quotes.read().await.get(&symbol).cloned();
            let next = self.simulator.lock().await.next_quote(&symbol, last.as_ref());
            if let Some(quote) = next {
                all.extend(self.push_quote(quote).await);
            }
        }
        all
    }

    /// 체결 이력.
    pub async fn get_order_history(&self) -> Vec<OrderMatch> {
        self.account.read().await.order_history.clone()
    }

    /// 미체결 주문 수.
    pub async fn open_order_count(&self) -> usize {
        self.matching_engine.read().await.get_open_orders(None).len()
    }

    /// 상태를 초기화합니다.
    pub async fn reset(&self) {
        *self.account.write().await = AccountState::new(self.config.initial_balance);
        self.matching_engine.write().await.clear();
        info!(name = %self.name, "Simulated exchange reset");
    }

    async fn ensure_connected(&self) -> ExchangeResult<()> {
        if !*self.reachable.read().await {
            return Err(ExchangeError::NetworkError(format!("{} is unreachable", self.name)));
        }
        if !*self.connected.read().await {
            return Err(ExchangeError::Disconnected(format!("{} is not connected", self.name)));
        }
        Ok(())
    }

    async fn last_price(&self, symbol: &str) -> Option<Price> {
        self.quotes.read().await.get(symbol).map(|q| q.price)
    }

    async fn account_snapshot(&self) -> AccountInfo {
        let quotes = self.quotes.read().await;
        let account = self.account.read().await;
        let margin_rate = self.config.margin_rate;

        let mut profit = Decimal::ZERO;
        let mut margin = Decimal::ZERO;
        for (symbol, position) in &account.positions {
            let mark = quotes.get(symbol).map(|q| q.price).unwrap_or(position.average_cost);
            profit += (mark - position.average_cost) * position.quantity;
            margin += position.quantity.abs() * mark * margin_rate;
        }

        let reserved = self
            .matching_engine
            .read()
            .await
            .reserved_for_buys(|symbol| quotes.get(symbol).map(|q| q.price))
            * margin_rate;

        AccountInfo {
            balance: account.balance,
            available: account.balance + profit - margin - reserved,
            margin,
            profit,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for SimulatedExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    async fn connect(&self) -> bool {
        if !*self.reachable.read().await {
            warn!(name = %self.name, "Connect failed: venue unreachable");
            return false;
        }
        *self.connected.write().await = true;
        info!(name = %self.name, "Connected to simulated exchange");
        true
    }

    async fn disconnect(&self) {
        *self.connected.write().await = false;
        info!(name = %self.name, "Disconnected from simulated exchange");
    }

    async fn submit_order(&self, order: &Order) -> ExchangeResult<SubmitResult> {
        self.ensure_connected().await?;

        if order.quantity <= Decimal::ZERO {
            return Ok(SubmitResult::rejected("INVALID_QUANTITY", "quantity must be positive"));
        }
        let Some(market_price) = self.last_price(&order.symbol).await else {
            return Ok(SubmitResult::rejected(
                "SYMBOL_NOT_FOUND",
                format!("no market for {}", order.symbol),
            ));
        };

        let held = {
            let account = self.account.read().await;
            account
                .positions
                .get(&order.symbol)
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO)
        };
        let increases_exposure = held.is_zero() || held.is_sign_positive() == (order.side == Side::Buy);
        if increases_exposure && !order.reduce_only {
            let required = order.notional_value(market_price) * self.config.margin_rate;
            let available = self.account_snapshot().await.available;
            if required > available {
                return Ok(SubmitResult::rejected(
                    "INSUFFICIENT_BALANCE",
                    format!("required {} exceeds available {}", required, available),
                ));
            }
        }

        let external_id = self.matching_engine.write().await.submit_order(order)?;
        Ok(SubmitResult::accepted(external_id))
    }

    async fn cancel_order(&self, order: &Order) -> ExchangeResult<bool> {
        self.ensure_connected().await?;
        let external_id = order
            .external_id
            .as_deref()
            .ok_or_else(|| ExchangeError::OrderNotFound(order.id.to_string()))?;
        Ok(self.matching_engine.write().await.cancel_order(external_id))
    }

    async fn modify_order(&self, order: &Order, changes: &OrderChanges) -> ExchangeResult<bool> {
        self.ensure_connected().await?;
        let external_id = order
            .external_id
            .as_deref()
            .ok_or_else(|| ExchangeError::OrderNotFound(order.id.to_string()))?;
        Ok(self.matching_engine.write().await.modify_order(external_id, changes))
    }

    async fn get_order_status(&self, external_id: &str) -> ExchangeResult<Option<ExternalOrderStatus>> {
        self.ensure_connected().await?;
        Ok(self.matching_engine.read().await.order_status(external_id))
    }

    async fn get_account_info(&self) -> ExchangeResult<AccountInfo> {
        self.ensure_connected().await?;
        Ok(self.account_snapshot().await)
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<ExternalPosition>> {
        self.ensure_connected().await?;
        let quotes = self.quotes.read().await;
        let account = self.account.read().await;

        let mut positions: Vec<ExternalPosition> = account
            .positions
            .iter()
            .map(|(symbol, p)| {
                let mark = quotes.get(symbol).map(|q| q.price).unwrap_or(p.average_cost);
                ExternalPosition {
                    symbol: symbol.clone(),
                    quantity: p.quantity,
                    average_cost: p.average_cost,
                    market_value: p.quantity.abs() * mark,
                    unrealized_pnl: (mark - p.average_cost) * p.quantity,
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_market_data(&self, symbol: &str) -> ExchangeResult<MarketData> {
        self.ensure_connected().await?;
        self.quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))
    }
}
