//! 포지션 원장.
//!
//! (사용자, 심볼)마다 열린 포지션 하나를 관리합니다.
//! - 같은 키의 변경은 키별 비동기 뮤텍스로 직렬화됩니다.
//! - 변경은 사본에서 수행되고 불변식 검사 후 기대 버전으로 저장됩니다.
//! - 저장이 성공한 경우에만 메모리 상태에 반영됩니다.
//! - 불변식 위반이나 버전 충돌은 저장소의 최신 상태로 다시 시도하며,
//!   한도를 넘으면 `ConcurrencyConflict`를 반환합니다.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use trader_core::{
    apply_trade, Position, PositionError, PositionHistory, PositionSummary, Price, Quantity, RepositoryError,
    TradeApplication, TraderError, TraderResult, TradingRepository, UserId,
};

type LedgerKey = (UserId, String);

/// 기본 재시도 횟수.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 사본에 적용된 변경.
struct LedgerUpdate<T> {
    /// 저장할 포지션 (저장 순서)
    positions: Vec<Position>,
    /// 추가할 이력
    histories: Vec<PositionHistory>,
    output: T,
}

impl<T> LedgerUpdate<T> {
    fn unchanged(output: T) -> Self {
        Self {
            positions: Vec::new(),
            histories: Vec::new(),
            output,
        }
    }

    fn single(position: Position, history: PositionHistory, output: T) -> Self {
        Self {
            positions: vec![position],
            histories: vec![history],
            output,
        }
    }
}

/// 포지션 원장.
pub struct PositionLedger {
    /// 열린 포지션
    open: RwLock<HashMap<LedgerKey, Position>>,
    /// 종료된 포지션
    closed: RwLock<Vec<Position>>,
    /// 키별 직렬화 잠금
    locks: Mutex<HashMap<LedgerKey, Arc<Mutex<()>>>>,
    repository: Arc<dyn TradingRepository>,
    max_retries: u32,
}

impl PositionLedger {
    /// 새 원장을 생성합니다.
    pub fn new(repository: Arc<dyn TradingRepository>) -> Self {
        Self {
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
            locks: Mutex::new(HashMap::new()),
            repository,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// 충돌 시 재시도 횟수를 지정합니다 (최소 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    // ==================== 체결 반영 ====================

    /// 체결을 반영합니다. 방향 전환은 종료 + 신규 오픈으로 나뉩니다.
    pub async fn apply_trade(
        &self,
        user_id: UserId,
        symbol: &str,
        signed_quantity: Decimal,
        price: Price,
        commission: Decimal,
    ) -> TraderResult<TradeApplication> {
        self.apply_fill(user_id, symbol, signed_quantity, price, commission, Decimal::ZERO)
            .await
    }

    /// 감소 주문의 체결을 반영합니다.
    ///
    /// `release_frozen`만큼 먼저 동결을 해제한 뒤 같은 변경 안에서 체결을 적용합니다.
    pub async fn apply_fill(
        &self,
        user_id: UserId,
        symbol: &str,
        signed_quantity: Decimal,
        price: Price,
        commission: Decimal,
        release_frozen: Quantity,
    ) -> TraderResult<TradeApplication> {
        self.mutate(user_id, symbol, |current| {
            let mut current = current;
            let mut histories = Vec::new();

            if release_frozen > Decimal::ZERO {
                if let Some(position) = current.as_mut().filter(|p| p.is_open()) {
                    let quantity = release_frozen.min(position.frozen_quantity);
                    if quantity > Decimal::ZERO {
                        histories.push(position.unfreeze(quantity)?);
                    }
                }
            }

            let application = apply_trade(current, user_id, symbol, signed_quantity, price, commission)?;
            histories.extend(application.histories.iter().cloned());

            let positions = application
                .closed
                .iter()
                .chain(application.open.iter())
                .cloned()
                .collect();
            Ok(LedgerUpdate {
                positions,
                histories,
                output: application,
            })
        })
        .await
    }

    // ==================== 시세 ====================

    /// 열린 포지션의 시장 가격을 갱신합니다. 포지션이 없으면 `None`.
    pub async fn update_market_price(
        &self,
        user_id: UserId,
        symbol: &str,
        price: Price,
    ) -> TraderResult<Option<Position>> {
        self.mutate(user_id, symbol, |current| match current {
            Some(mut position) if position.is_open() => {
                let history = position.update_market_price(price)?;
                Ok(LedgerUpdate::single(position.clone(), history, Some(position)))
            }
            _ => Ok(LedgerUpdate::unchanged(None)),
        })
        .await
    }

    // ==================== 동결 ====================

    /// 주문 가능 수량 일부를 동결합니다.
    pub async fn freeze(&self, user_id: UserId, symbol: &str, quantity: Quantity) -> TraderResult<Position> {
        self.modify_open(user_id, symbol, |p| p.freeze(quantity)).await
    }

    /// 동결 수량 일부를 해제합니다.
    pub async fn unfreeze(&self, user_id: UserId, symbol: &str, quantity: Quantity) -> TraderResult<Position> {
        self.modify_open(user_id, symbol, |p| p.unfreeze(quantity)).await
    }

    // ==================== 손절/익절 ====================

    pub async fn set_stop_loss(&self, user_id: UserId, symbol: &str, price: Price) -> TraderResult<Position> {
        self.modify_open(user_id, symbol, |p| p.set_stop_loss(price)).await
    }

    pub async fn set_take_profit(&self, user_id: UserId, symbol: &str, price: Price) -> TraderResult<Position> {
        self.modify_open(user_id, symbol, |p| p.set_take_profit(price)).await
    }

    pub async fn cancel_stops(&self, user_id: UserId, symbol: &str) -> TraderResult<Position> {
        self.modify_open(user_id, symbol, |p| p.cancel_stops()).await
    }

    // ==================== 일일 초기화 ====================

    /// 모든 열린 포지션의 당일 손익 기준을 초기화합니다.
    pub async fn reset_daily(&self) -> TraderResult<usize> {
        let keys: Vec<LedgerKey> = self.open.read().await.keys().cloned().collect();
        let mut count = 0;
        for (user_id, symbol) in keys {
            let reset = self
                .mutate(user_id, &symbol, |current| match current {
                    Some(mut position) if position.is_open() => {
                        let history = position.reset_daily();
                        Ok(LedgerUpdate::single(position, history, true))
                    }
                    _ => Ok(LedgerUpdate::unchanged(false)),
                })
                .await?;
            if reset {
                count += 1;
            }
        }
        Ok(count)
    }

    // ==================== 조회 ====================

    /// 열린 포지션 스냅샷.
    pub async fn position(&self, user_id: UserId, symbol: &str) -> Option<Position> {
        self.open.read().await.get(&(user_id, symbol.to_string())).cloned()
    }

    /// 사용자의 열린 포지션 (오픈 순).
    pub async fn positions(&self, user_id: UserId) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .open
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.opened_at);
        positions
    }

    /// 전체 열린 포지션.
    pub async fn all_open_positions(&self) -> Vec<Position> {
        self.open.read().await.values().cloned().collect()
    }

    /// 사용자의 종료된 포지션.
    pub async fn closed_positions(&self, user_id: UserId) -> Vec<Position> {
        self.closed
            .read()
            .await
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }

    /// 사용자 포트폴리오 요약 (실현 손익은 종료 포지션 포함).
    pub async fn summary(&self, user_id: UserId) -> PositionSummary {
        let mut positions = self.positions(user_id).await;
        positions.extend(self.closed_positions(user_id).await);
        PositionSummary::from_positions(&positions)
    }

    /// 오늘 손익: 열린 포지션과 오늘 종료된 포지션의 당일 손익 합.
    pub async fn daily_pnl(&self, user_id: UserId) -> Decimal {
        let today = Utc::now().date_naive();
        let open: Decimal = self.positions(user_id).await.iter().map(|p| p.daily_pnl).sum();
        let closed: Decimal = self
            .closed_positions(user_id)
            .await
            .iter()
            .filter(|p| p.closed_at.is_some_and(|at| at.date_naive() == today))
            .map(|p| p.daily_pnl)
            .sum();
        open + closed
    }

    /// 열린 포지션이 있는 사용자.
    pub async fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.open.read().await.keys().map(|(u, _)| *u).collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    // ==================== 내부 ====================

    async fn modify_open<F>(&self, user_id: UserId, symbol: &str, change: F) -> TraderResult<Position>
    where
        F: Fn(&mut Position) -> Result<PositionHistory, PositionError>,
    {
        self.mutate(user_id, symbol, |current| {
            let mut position = current
                .filter(Position::is_open)
                .ok_or_else(|| TraderError::Validation(format!("no open position for {}/{}", user_id, symbol)))?;
            let history = change(&mut position)?;
            Ok(LedgerUpdate::single(position.clone(), history, position))
        })
        .await
    }

    async fn key_lock(&self, key: &LedgerKey) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn mutate<T, F>(&self, user_id: UserId, symbol: &str, mut apply: F) -> TraderResult<T>
    where
        F: FnMut(Option<Position>) -> TraderResult<LedgerUpdate<T>>,
    {
        let key = (user_id, symbol.to_string());
        let lock = self.key_lock(&key).await;
        let _guard = lock.lock().await;

        let mut current = self.open.read().await.get(&key).cloned();

        for attempt in 1..=self.max_retries {
            let update = apply(current.clone())?;
            if update.positions.is_empty() {
                return Ok(update.output);
            }

            if let Err(e) = update.positions.iter().try_for_each(Position::check_invariants) {
                warn!(user_id, symbol, attempt, error = %e, "Position invariant violated, retrying from stored state");
                current = self.repository.open_position(user_id, symbol).await?;
                continue;
            }

            match self.persist(current.as_ref(), &update).await {
                Ok(()) => {
                    self.commit(&key, &update.positions).await;
                    return Ok(update.output);
                }
                Err(RepositoryError::VersionConflict { id, expected, actual }) => {
                    warn!(
                        user_id,
                        symbol,
                        attempt,
                        position_id = %id,
                        ?expected,
                        ?actual,
                        "Position version conflict, retrying from stored state"
                    );
                    current = self.repository.open_position(user_id, symbol).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TraderError::ConcurrencyConflict(format!(
            "position {}/{} could not be updated after {} attempts",
            user_id, symbol, self.max_retries
        )))
    }

    async fn persist<T>(&self, previous: Option<&Position>, update: &LedgerUpdate<T>) -> Result<(), RepositoryError> {
        for position in &update.positions {
            let expected = previous.filter(|p| p.id == position.id).map(|p| p.version);
            self.repository.save_position(position, expected).await?;
        }
        for history in &update.histories {
            self.repository.append_history(history).await?;
        }
        Ok(())
    }

    async fn commit(&self, key: &LedgerKey, positions: &[Position]) {
        let mut open = self.open.write().await;
        match positions.iter().find(|p| p.is_open()) {
            Some(position) => {
                open.insert(key.clone(), position.clone());
            }
            None => {
                open.remove(key);
            }
        }
        drop(open);

        let closed: Vec<Position> = positions.iter().filter(|p| !p.is_open()).cloned().collect();
        if !closed.is_empty() {
            debug!(user_id = key.0, symbol = %key.1, count = closed.len(), "Positions closed");
            self.closed.write().await.extend(closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{InMemoryRepository, PositionChange, PositionHistoryRepository, PositionRepository, PositionType};

    fn ledger() -> (PositionLedger, Arc<InMemoryRepository>) {
        let repository = Arc::new(InMemoryRepository::new());
        (PositionLedger::new(repository.clone()), repository)
    }

    #[tokio::test]
    async fn test_average_cost_and_realized_pnl() {
        let (ledger, repository) = ledger();

        ledger.apply_trade(1, "AAPL", dec!(100), dec!(10), Decimal::ZERO).await.unwrap();
        ledger.apply_trade(1, "AAPL", dec!(50), dec!(12), Decimal::ZERO).await.unwrap();
        let position = ledger.position(1, "AAPL").await.unwrap();
        assert_eq!(position.average_cost.round_dp(3), dec!(10.667));

        let application = ledger.apply_trade(1, "AAPL", dec!(-60), dec!(15), Decimal::ZERO).await.unwrap();
        assert_eq!(application.realized.round_dp(2), dec!(260.00));

        let position = ledger.position(1, "AAPL").await.unwrap();
        assert_eq!(position.quantity, dec!(90));
        assert_eq!(
            repository.find_position(position.id).await.unwrap().unwrap().version,
            position.version
        );
        assert_eq!(repository.history_for_position(position.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_flip_closes_and_reopens() {
        let (ledger, _) = ledger();

        ledger.apply_trade(1, "AAPL", dec!(10), dec!(100), Decimal::ZERO).await.unwrap();
        let application = ledger.apply_trade(1, "AAPL", dec!(-15), dec!(110), dec!(3)).await.unwrap();

        assert_eq!(application.realized, dec!(98));
        let short = ledger.position(1, "AAPL").await.unwrap();
        assert_eq!(short.position_type, PositionType::Short);
        assert_eq!(short.quantity, dec!(5));
        assert_eq!(short.total_cost, dec!(551));
        assert_eq!(ledger.closed_positions(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_removes_open_position() {
        let (ledger, _) = ledger();

        ledger.apply_trade(1, "AAPL", dec!(10), dec!(100), Decimal::ZERO).await.unwrap();
        ledger.apply_trade(1, "AAPL", dec!(-10), dec!(105), Decimal::ZERO).await.unwrap();

        assert!(ledger.position(1, "AAPL").await.is_none());
        assert!(ledger.users().await.is_empty());
        assert_eq!(ledger.summary(1).await.total_realized_pnl, dec!(50));
    }

    #[tokio::test]
    async fn test_freeze_then_fill_releases() {
        let (ledger, _) = ledger();
        ledger.apply_trade(1, "AAPL", dec!(100), dec!(10), Decimal::ZERO).await.unwrap();

        let frozen = ledger.freeze(1, "AAPL", dec!(40)).await.unwrap();
        assert_eq!(frozen.available_quantity, dec!(60));
        assert!(ledger.freeze(1, "AAPL", dec!(70)).await.is_err());

        ledger
            .apply_fill(1, "AAPL", dec!(-25), dec!(11), Decimal::ZERO, dec!(25))
            .await
            .unwrap();
        let position = ledger.position(1, "AAPL").await.unwrap();
        assert_eq!(position.quantity, dec!(75));
        assert_eq!(position.frozen_quantity, dec!(15));
        assert_eq!(position.available_quantity, dec!(60));
    }

    #[tokio::test]
    async fn test_missing_position_errors() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.freeze(1, "AAPL", dec!(1)).await,
            Err(TraderError::Validation(_))
        ));
        assert!(ledger.update_market_price(1, "AAPL", dec!(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_conflict_retries_from_stored_state() {
        let (ledger, repository) = ledger();
        ledger.apply_trade(1, "AAPL", dec!(10), dec!(100), Decimal::ZERO).await.unwrap();

        // 다른 작성자가 저장소의 포지션을 먼저 갱신
        let mut stored = repository.open_position(1, "AAPL").await.unwrap().unwrap();
        let expected = stored.version;
        stored.update_market_price(dec!(120)).unwrap();
        repository.save_position(&stored, Some(expected)).await.unwrap();

        ledger.apply_trade(1, "AAPL", dec!(5), dec!(110), Decimal::ZERO).await.unwrap();

        let position = ledger.position(1, "AAPL").await.unwrap();
        assert_eq!(position.quantity, dec!(15));
        assert_eq!(position.version, stored.version + 1);
    }

    #[tokio::test]
    async fn test_stops_and_daily_reset() {
        let (ledger, repository) = ledger();
        ledger.apply_trade(1, "AAPL", dec!(10), dec!(100), Decimal::ZERO).await.unwrap();

        ledger.set_stop_loss(1, "AAPL", dec!(90)).await.unwrap();
        let position = ledger.set_take_profit(1, "AAPL", dec!(120)).await.unwrap();
        assert_eq!(position.stop_loss_price, Some(dec!(90)));
        assert_eq!(position.take_profit_price, Some(dec!(120)));

        let position = ledger.cancel_stops(1, "AAPL").await.unwrap();
        assert!(position.stop_loss_price.is_none());

        assert_eq!(ledger.reset_daily().await.unwrap(), 1);
        let history = repository.history_for_position(position.id).await.unwrap();
        assert_eq!(history.last().unwrap().change, PositionChange::DailyReset);
    }
}
