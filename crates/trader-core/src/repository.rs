//! 저장소 경계.
//!
//! 코어는 특정 저장 엔진을 가정하지 않고, 엔티티별 원자적 읽기/쓰기
//! 계약만 사용합니다. 포지션 저장은 기대 버전을 받아 낙관적 동시성을
//! 검사합니다.
//!
//! `InMemoryRepository`는 모든 계약을 구현하는 프로세스 내 저장소입니다.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Order, OrderFill, Position, PositionHistory, RiskEvent};
use crate::types::UserId;

/// 저장소 에러.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Version conflict on {id}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        id: Uuid,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// 저장소 작업 Result 타입.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 주문 저장소.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// 주문을 저장합니다 (생성 또는 갱신).
    async fn save_order(&self, order: &Order) -> RepositoryResult<()>;

    /// ID로 주문을 조회합니다.
    async fn find_order(&self, id: Uuid) -> RepositoryResult<Option<Order>>;

    /// 사용자의 모든 주문을 생성 순으로 조회합니다.
    async fn orders_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Order>>;
}

/// 체결 저장소 (추가 전용).
#[async_trait]
pub trait FillRepository: Send + Sync {
    async fn save_fill(&self, fill: &OrderFill) -> RepositoryResult<()>;

    async fn fills_for_order(&self, order_id: Uuid) -> RepositoryResult<Vec<OrderFill>>;
}

/// 포지션 저장소.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// 포지션을 저장합니다.
    ///
    /// `expected_version`이 `None`이면 신규 생성이며 같은 ID가 이미 있으면
    /// 충돌입니다. `Some(v)`이면 저장된 버전이 `v`와 같아야 합니다.
    async fn save_position(&self, position: &Position, expected_version: Option<u64>) -> RepositoryResult<()>;

    async fn find_position(&self, id: Uuid) -> RepositoryResult<Option<Position>>;

    /// (사용자, 심볼)의 열린 포지션.
    async fn open_position(&self, user_id: UserId, symbol: &str) -> RepositoryResult<Option<Position>>;

    /// 사용자의 모든 포지션 (종료 포함).
    async fn positions_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Position>>;
}

/// 포지션 이력 저장소 (추가 전용).
#[async_trait]
pub trait PositionHistoryRepository: Send + Sync {
    async fn append_history(&self, history: &PositionHistory) -> RepositoryResult<()>;

    async fn history_for_position(&self, position_id: Uuid) -> RepositoryResult<Vec<PositionHistory>>;
}

/// 리스크 이벤트 저장소.
#[async_trait]
pub trait RiskEventRepository: Send + Sync {
    async fn save_risk_event(&self, event: &RiskEvent) -> RepositoryResult<()>;

    /// 이벤트를 해소 처리하고 갱신된 이벤트를 반환합니다.
    async fn resolve_risk_event(&self, id: Uuid) -> RepositoryResult<RiskEvent>;

    async fn risk_events(&self, user_id: UserId, unresolved_only: bool) -> RepositoryResult<Vec<RiskEvent>>;
}

/// 실행 코어가 사용하는 모든 저장소 계약.
pub trait TradingRepository:
    OrderRepository + FillRepository + PositionRepository + PositionHistoryRepository + RiskEventRepository
{
}

impl<T> TradingRepository for T where
    T: OrderRepository + FillRepository + PositionRepository + PositionHistoryRepository + RiskEventRepository
{
}

/// 프로세스 내 저장소.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
    fills: RwLock<Vec<OrderFill>>,
    positions: RwLock<HashMap<Uuid, Position>>,
    history: RwLock<Vec<PositionHistory>>,
    risk_events: RwLock<Vec<RiskEvent>>,
}

impl InMemoryRepository {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 이력 수.
    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryRepository {
    async fn save_order(&self, order: &Order) -> RepositoryResult<()> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> RepositoryResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl FillRepository for InMemoryRepository {
    async fn save_fill(&self, fill: &OrderFill) -> RepositoryResult<()> {
        let mut fills = self.fills.write().await;
        if !fills.iter().any(|f| f.id == fill.id) {
            fills.push(fill.clone());
        }
        Ok(())
    }

    async fn fills_for_order(&self, order_id: Uuid) -> RepositoryResult<Vec<OrderFill>> {
        Ok(self
            .fills
            .read()
            .await
            .iter()
            .filter(|f| f.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PositionRepository for InMemoryRepository {
    async fn save_position(&self, position: &Position, expected_version: Option<u64>) -> RepositoryResult<()> {
        let mut positions = self.positions.write().await;
        let actual = positions.get(&position.id).map(|p| p.version);
        if actual != expected_version {
            return Err(RepositoryError::VersionConflict {
                id: position.id,
                expected: expected_version,
                actual,
            });
        }
        positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn find_position(&self, id: Uuid) -> RepositoryResult<Option<Position>> {
        Ok(self.positions.read().await.get(&id).cloned())
    }

    async fn open_position(&self, user_id: UserId, symbol: &str) -> RepositoryResult<Option<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .find(|p| p.user_id == user_id && p.symbol == symbol && p.is_open())
            .cloned())
    }

    async fn positions_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<Position>> {
        let mut positions: Vec<Position> = self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.opened_at);
        Ok(positions)
    }
}

#[async_trait]
impl PositionHistoryRepository for InMemoryRepository {
    async fn append_history(&self, history: &PositionHistory) -> RepositoryResult<()> {
        self.history.write().await.push(history.clone());
        Ok(())
    }

    async fn history_for_position(&self, position_id: Uuid) -> RepositoryResult<Vec<PositionHistory>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|h| h.position_id == position_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RiskEventRepository for InMemoryRepository {
    async fn save_risk_event(&self, event: &RiskEvent) -> RepositoryResult<()> {
        let mut events = self.risk_events.write().await;
        match events.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event.clone(),
            None => events.push(event.clone()),
        }
        Ok(())
    }

    async fn resolve_risk_event(&self, id: Uuid) -> RepositoryResult<RiskEvent> {
        let mut events = self.risk_events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(RepositoryError::NotFound { entity: "risk event", id })?;
        event.resolve();
        Ok(event.clone())
    }

    async fn risk_events(&self, user_id: UserId, unresolved_only: bool) -> RepositoryResult<Vec<RiskEvent>> {
        Ok(self
            .risk_events
            .read()
            .await
            .iter()
            .filter(|e| e.user_id == user_id && (!unresolved_only || !e.resolved))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RiskEventType, RiskLevel};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_position_version_check() {
        let repo = InMemoryRepository::new();
        let (mut position, _) = Position::open(1, "AAPL", dec!(10), dec!(100), Decimal::ZERO).unwrap();

        repo.save_position(&position, None).await.unwrap();
        assert!(matches!(
            repo.save_position(&position, None).await,
            Err(RepositoryError::VersionConflict { .. })
        ));

        let before = position.version;
        position.freeze(dec!(1)).unwrap();
        repo.save_position(&position, Some(before)).await.unwrap();

        // 오래된 버전으로 저장하면 충돌
        assert!(repo.save_position(&position, Some(before)).await.is_err());

        let open = repo.open_position(1, "AAPL").await.unwrap().unwrap();
        assert_eq!(open.frozen_quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_risk_event_resolution() {
        let repo = InMemoryRepository::new();
        let event = RiskEvent::new(3, RiskEventType::MarginCall, RiskLevel::High, "margin");
        repo.save_risk_event(&event).await.unwrap();

        assert_eq!(repo.risk_events(3, true).await.unwrap().len(), 1);
        let resolved = repo.resolve_risk_event(event.id).await.unwrap();
        assert!(resolved.resolved);
        assert!(repo.risk_events(3, true).await.unwrap().is_empty());
        assert_eq!(repo.risk_events(3, false).await.unwrap().len(), 1);
    }
}
