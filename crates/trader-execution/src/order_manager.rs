//! 주문 레지스트리.
//!
//! 제공 기능:
//! - 모든 주문의 최신 스냅샷 (모니터 태스크가 소유한 주문의 사본)
//! - 사용자/심볼/전략/외부 ID 인덱스
//! - 연결 불가로 보류된 PENDING 주문 대기열
//! - 감소 주문이 동결한 포지션 수량
//! - 주문 이벤트 이력과 통계

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trader_core::{Order, OrderStatusType, Quantity, Side, TraderError, UserId};
use uuid::Uuid;

/// 주문 레지스트리 에러 타입.
#[derive(Debug, Error)]
pub enum OrderManagerError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Order already exists: {0}")]
    OrderAlreadyExists(Uuid),
}

impl From<OrderManagerError> for TraderError {
    fn from(err: OrderManagerError) -> Self {
        match err {
            OrderManagerError::OrderNotFound(id) => TraderError::OrderNotFound(id),
            OrderManagerError::OrderAlreadyExists(id) => {
                TraderError::Internal(format!("order {} registered twice", id))
            }
        }
    }
}

/// 변경 사항 추적을 위한 주문 이벤트 타입.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// 주문 생성됨
    Created {
        order_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// 상태 변경
    StatusChanged {
        order_id: Uuid,
        from: OrderStatusType,
        to: OrderStatusType,
        timestamp: DateTime<Utc>,
    },
    /// 체결 수량 증가
    Filled {
        order_id: Uuid,
        filled_quantity: Decimal,
        average_price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },
    /// 연결 불가로 보류됨
    Held {
        order_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl OrderEvent {
    /// 이벤트에서 주문 ID를 가져온다.
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::Created { order_id, .. }
            | OrderEvent::StatusChanged { order_id, .. }
            | OrderEvent::Filled { order_id, .. }
            | OrderEvent::Held { order_id, .. } => *order_id,
        }
    }

    /// 이벤트의 타임스탬프를 가져온다.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Created { timestamp, .. }
            | OrderEvent::StatusChanged { timestamp, .. }
            | OrderEvent::Filled { timestamp, .. }
            | OrderEvent::Held { timestamp, .. } => *timestamp,
        }
    }
}

/// 주문 레지스트리.
#[derive(Debug)]
pub struct OrderManager {
    /// ID별 모든 주문
    orders: HashMap<Uuid, Order>,
    /// 활성 주문 ID
    active_orders: HashSet<Uuid>,
    /// 사용자별 주문
    orders_by_user: HashMap<UserId, Vec<Uuid>>,
    /// 심볼별 주문
    orders_by_symbol: HashMap<String, Vec<Uuid>>,
    /// 전략별 주문
    orders_by_strategy: HashMap<String, Vec<Uuid>>,
    /// 외부 주문 ID에서 내부 ID로의 매핑
    external_id_map: HashMap<String, Uuid>,
    /// 보류된 주문 (접수 순)
    held: Vec<Uuid>,
    /// 주문별 동결 수량
    frozen: HashMap<Uuid, Quantity>,
    /// 주문 이벤트 이력
    events: Vec<OrderEvent>,
    /// 최대 이력 크기
    max_history_size: usize,
}

impl Default for OrderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderManager {
    /// 새로운 레지스트리를 생성한다.
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            active_orders: HashSet::new(),
            orders_by_user: HashMap::new(),
            orders_by_symbol: HashMap::new(),
            orders_by_strategy: HashMap::new(),
            external_id_map: HashMap::new(),
            held: Vec::new(),
            frozen: HashMap::new(),
            events: Vec::new(),
            max_history_size: 10000,
        }
    }

    /// 사용자 정의 이력 크기로 생성한다.
    pub fn with_history_size(max_history_size: usize) -> Self {
        Self {
            max_history_size,
            ..Self::new()
        }
    }

    // ==================== 등록 ====================

    /// 새 주문을 추적에 추가한다.
    pub fn add_order(&mut self, order: Order) -> Result<(), OrderManagerError> {
        if self.orders.contains_key(&order.id) {
            return Err(OrderManagerError::OrderAlreadyExists(order.id));
        }

        let order_id = order.id;
        if order.status.is_active() {
            self.active_orders.insert(order_id);
        }
        self.orders_by_user.entry(order.user_id).or_default().push(order_id);
        self.orders_by_symbol
            .entry(order.symbol.clone())
            .or_default()
            .push(order_id);
        if let Some(strategy_id) = &order.strategy_id {
            self.orders_by_strategy
                .entry(strategy_id.clone())
                .or_default()
                .push(order_id);
        }
        if let Some(external_id) = &order.external_id {
            self.external_id_map.insert(external_id.clone(), order_id);
        }
        self.orders.insert(order_id, order);

        self.record_event(OrderEvent::Created {
            order_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// 주문 스냅샷을 갱신하고 상태/체결 변화를 이벤트로 남긴다.
    pub fn update(&mut self, order: &Order) -> Result<(), OrderManagerError> {
        let previous = self
            .orders
            .get_mut(&order.id)
            .ok_or(OrderManagerError::OrderNotFound(order.id))?;

        let old_status = previous.status;
        let old_filled = previous.filled_quantity;
        *previous = order.clone();

        let now = Utc::now();
        if order.filled_quantity > old_filled {
            self.record_event(OrderEvent::Filled {
                order_id: order.id,
                filled_quantity: order.filled_quantity,
                average_price: order.average_fill_price,
                timestamp: now,
            });
        }
        if order.status != old_status {
            self.record_event(OrderEvent::StatusChanged {
                order_id: order.id,
                from: old_status,
                to: order.status,
                timestamp: now,
            });
        }

        if let Some(external_id) = &order.external_id {
            self.external_id_map.insert(external_id.clone(), order.id);
        }
        if order.is_final() {
            self.active_orders.remove(&order.id);
            self.held.retain(|id| *id != order.id);
        } else {
            self.active_orders.insert(order.id);
        }
        Ok(())
    }

    // ==================== 보류 ====================

    /// 주문을 보류 대기열에 넣는다. 이미 있으면 위치를 유지한다.
    pub fn hold(&mut self, order_id: Uuid) {
        if !self.held.contains(&order_id) {
            self.held.push(order_id);
            self.record_event(OrderEvent::Held {
                order_id,
                timestamp: Utc::now(),
            });
        }
    }

    /// 보류를 해제한다.
    pub fn release_hold(&mut self, order_id: Uuid) {
        self.held.retain(|id| *id != order_id);
    }

    /// 사용자의 보류 주문 (접수 순).
    pub fn held_for(&self, user_id: UserId) -> Vec<Uuid> {
        self.held
            .iter()
            .filter(|id| self.orders.get(id).is_some_and(|o| o.user_id == user_id))
            .copied()
            .collect()
    }

    /// 보류 여부.
    pub fn is_held(&self, order_id: Uuid) -> bool {
        self.held.contains(&order_id)
    }

    // ==================== 동결 수량 ====================

    /// 주문이 동결한 수량을 기록한다.
    pub fn set_frozen(&mut self, order_id: Uuid, quantity: Quantity) {
        if quantity > Decimal::ZERO {
            self.frozen.insert(order_id, quantity);
        }
    }

    /// 체결 수량만큼 동결분을 차감하고 해제할 수량을 반환한다.
    pub fn take_frozen(&mut self, order_id: Uuid, filled: Quantity) -> Quantity {
        let Some(frozen) = self.frozen.get_mut(&order_id) else {
            return Decimal::ZERO;
        };
        let released = filled.min(*frozen);
        *frozen -= released;
        if frozen.is_zero() {
            self.frozen.remove(&order_id);
        }
        released
    }

    /// 남은 동결분 전체를 반환하고 기록을 지운다.
    pub fn release_frozen(&mut self, order_id: Uuid) -> Quantity {
        self.frozen.remove(&order_id).unwrap_or(Decimal::ZERO)
    }

    /// 주문의 현재 동결 수량.
    pub fn frozen_for(&self, order_id: Uuid) -> Quantity {
        self.frozen.get(&order_id).copied().unwrap_or(Decimal::ZERO)
    }

    // ==================== 조회 ====================

    /// ID로 주문을 가져온다.
    pub fn get_order(&self, order_id: Uuid) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// 외부 주문 ID로 주문을 가져온다.
    pub fn get_order_by_external_id(&self, external_id: &str) -> Option<&Order> {
        self.external_id_map
            .get(external_id)
            .and_then(|id| self.orders.get(id))
    }

    /// 활성 주문 (사용자 지정 시 해당 사용자만), 생성 순.
    pub fn get_active_orders(&self, user_id: Option<UserId>) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self
            .active_orders
            .iter()
            .filter_map(|id| self.orders.get(id))
            .filter(|o| user_id.map_or(true, |u| o.user_id == u))
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// 사용자의 주문 (모든 상태, 생성 순).
    pub fn get_orders_for_user(&self, user_id: UserId) -> Vec<&Order> {
        self.orders_by_user
            .get(&user_id)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    /// 심볼에 대한 주문을 가져온다 (모든 상태).
    pub fn get_orders_for_symbol(&self, symbol: &str) -> Vec<&Order> {
        self.orders_by_symbol
            .get(symbol)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    /// 전략에 대한 주문을 가져온다.
    pub fn get_orders_for_strategy(&self, strategy_id: &str) -> Vec<&Order> {
        self.orders_by_strategy
            .get(strategy_id)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    /// 상태별로 주문을 가져온다.
    pub fn get_orders_by_status(&self, status: OrderStatusType) -> Vec<&Order> {
        self.orders.values().filter(|o| o.status == status).collect()
    }

    /// 주문이 있는 사용자 목록.
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.orders_by_user.keys().copied().collect();
        users.sort_unstable();
        users
    }

    /// 총 주문 수를 가져온다.
    pub fn total_orders(&self) -> usize {
        self.orders.len()
    }

    /// 활성 주문 수를 가져온다.
    pub fn active_order_count(&self) -> usize {
        self.active_orders.len()
    }

    /// 주문 이벤트를 가져온다.
    pub fn get_events(&self) -> &[OrderEvent] {
        &self.events
    }

    /// 특정 주문의 이벤트를 가져온다.
    pub fn get_order_events(&self, order_id: Uuid) -> Vec<&OrderEvent> {
        self.events.iter().filter(|e| e.order_id() == order_id).collect()
    }

    // ==================== 통계 ====================

    /// 사용자 통계를 가져온다.
    pub fn get_user_stats(&self, user_id: UserId) -> OrderStats {
        OrderStats::from_orders(&self.get_orders_for_user(user_id))
    }

    /// 심볼에 대한 통계를 가져온다.
    pub fn get_symbol_stats(&self, symbol: &str) -> OrderStats {
        OrderStats::from_orders(&self.get_orders_for_symbol(symbol))
    }

    /// 전체 통계를 가져온다.
    pub fn get_overall_stats(&self) -> OrderStats {
        let orders: Vec<&Order> = self.orders.values().collect();
        OrderStats::from_orders(&orders)
    }

    // ==================== 내부 ====================

    fn record_event(&mut self, event: OrderEvent) {
        self.events.push(event);
        if self.events.len() > self.max_history_size {
            let drain_count = self.events.len() - self.max_history_size;
            self.events.drain(0..drain_count);
        }
    }

    /// 특정 시점보다 오래된 완료 주문을 정리한다 (메모리 관리용).
    pub fn cleanup_old_orders(&mut self, older_than: DateTime<Utc>) -> usize {
        let orders_to_remove: Vec<Uuid> = self
            .orders
            .iter()
            .filter(|(_, o)| o.is_final() && o.updated_at < older_than)
            .map(|(id, _)| *id)
            .collect();

        for order_id in &orders_to_remove {
            if let Some(order) = self.orders.remove(order_id) {
                if let Some(ids) = self.orders_by_user.get_mut(&order.user_id) {
                    ids.retain(|id| id != order_id);
                }
                if let Some(ids) = self.orders_by_symbol.get_mut(&order.symbol) {
                    ids.retain(|id| id != order_id);
                }
                if let Some(strategy_id) = &order.strategy_id {
                    if let Some(ids) = self.orders_by_strategy.get_mut(strategy_id) {
                        ids.retain(|id| id != order_id);
                    }
                }
                if let Some(external_id) = &order.external_id {
                    self.external_id_map.remove(external_id);
                }
                self.frozen.remove(order_id);
            }
        }
        orders_to_remove.len()
    }
}

/// 주문 통계.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: usize,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub rejected_orders: usize,
    pub active_orders: usize,
    pub buy_orders: usize,
    pub sell_orders: usize,
    /// 체결 수량 합 (부분 체결 포함)
    pub total_volume: Decimal,
    /// 체결 금액 합
    pub total_notional: Decimal,
    /// 전량 체결 비율
    pub fill_rate: Decimal,
}

impl OrderStats {
    fn from_orders(orders: &[&Order]) -> Self {
        let count = |status: OrderStatusType| orders.iter().filter(|o| o.status == status).count();
        let total = orders.len();
        let filled = count(OrderStatusType::Filled);

        Self {
            total_orders: total,
            filled_orders: filled,
            cancelled_orders: count(OrderStatusType::Cancelled),
            rejected_orders: count(OrderStatusType::Rejected),
            active_orders: orders.iter().filter(|o| o.status.is_active()).count(),
            buy_orders: orders.iter().filter(|o| o.side == Side::Buy).count(),
            sell_orders: orders.iter().filter(|o| o.side == Side::Sell).count(),
            total_volume: orders.iter().map(|o| o.filled_quantity).sum(),
            total_notional: orders
                .iter()
                .filter_map(|o| o.average_fill_price.map(|p| p * o.filled_quantity))
                .sum(),
            fill_rate: if total > 0 {
                Decimal::from(filled) / Decimal::from(total)
            } else {
                Decimal::ZERO
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trader_core::{Liquidity, OrderFill, OrderRequest};

    fn create_test_order(user_id: UserId, side: Side) -> Order {
        Order::from_request(OrderRequest::limit(user_id, "AAPL", side, dec!(10), dec!(100)).with_strategy("grid"))
    }

    #[test]
    fn test_add_duplicate_order_fails() {
        let mut manager = OrderManager::new();
        let order = create_test_order(1, Side::Buy);

        manager.add_order(order.clone()).unwrap();
        assert!(matches!(
            manager.add_order(order),
            Err(OrderManagerError::OrderAlreadyExists(_))
        ));
        assert_eq!(manager.total_orders(), 1);
        assert_eq!(manager.active_order_count(), 1);
    }

    #[test]
    fn test_update_records_events_and_indexes() {
        let mut manager = OrderManager::new();
        let mut order = create_test_order(1, Side::Buy);
        manager.add_order(order.clone()).unwrap();

        order.mark_submitted("SIM-0000000001").unwrap();
        manager.update(&order).unwrap();
        let fill = OrderFill::new(order.id, dec!(10), dec!(99), Decimal::ZERO, Liquidity::Maker);
        order.apply_fill(fill).unwrap();
        manager.update(&order).unwrap();

        assert_eq!(
            manager.get_order_by_external_id("SIM-0000000001").unwrap().id,
            order.id
        );
        assert_eq!(manager.active_order_count(), 0);
        assert_eq!(manager.get_orders_for_strategy("grid").len(), 1);

        let events = manager.get_order_events(order.id);
        assert!(events.iter().any(|e| matches!(e, OrderEvent::Filled { filled_quantity, .. } if *filled_quantity == dec!(10))));
        assert!(events.iter().any(|e| matches!(
            e,
            OrderEvent::StatusChanged { to: OrderStatusType::Filled, .. }
        )));
    }

    #[test]
    fn test_update_unknown_order() {
        let mut manager = OrderManager::new();
        let order = create_test_order(1, Side::Buy);
        assert!(matches!(
            manager.update(&order),
            Err(OrderManagerError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_hold_queue_keeps_position() {
        let mut manager = OrderManager::new();
        let first = create_test_order(1, Side::Buy);
        let second = create_test_order(1, Side::Sell);
        let other = create_test_order(2, Side::Buy);
        for order in [&first, &second, &other] {
            manager.add_order(order.clone()).unwrap();
            manager.hold(order.id);
        }

        manager.hold(first.id);
        assert_eq!(manager.held_for(1), vec![first.id, second.id]);
        assert_eq!(manager.held_for(2), vec![other.id]);

        manager.release_hold(first.id);
        assert!(!manager.is_held(first.id));
        assert_eq!(manager.held_for(1), vec![second.id]);
    }

    #[test]
    fn test_frozen_bookkeeping() {
        let mut manager = OrderManager::new();
        let id = Uuid::new_v4();
        manager.set_frozen(id, dec!(10));

        assert_eq!(manager.take_frozen(id, dec!(4)), dec!(4));
        assert_eq!(manager.frozen_for(id), dec!(6));
        assert_eq!(manager.take_frozen(id, dec!(20)), dec!(6));
        assert_eq!(manager.release_frozen(id), Decimal::ZERO);
        assert_eq!(manager.take_frozen(Uuid::new_v4(), dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_stats() {
        let mut manager = OrderManager::new();
        let mut filled = create_test_order(1, Side::Buy);
        let rejected = create_test_order(1, Side::Sell);
        manager.add_order(filled.clone()).unwrap();
        manager.add_order(rejected.clone()).unwrap();

        filled.mark_submitted("X").unwrap();
        filled
            .apply_fill(OrderFill::new(filled.id, dec!(10), dec!(100), Decimal::ZERO, Liquidity::Taker))
            .unwrap();
        manager.update(&filled).unwrap();
        let mut rejected = rejected;
        rejected.transition_to(OrderStatusType::Rejected).unwrap();
        manager.update(&rejected).unwrap();

        let stats = manager.get_user_stats(1);
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.filled_orders, 1);
        assert_eq!(stats.rejected_orders, 1);
        assert_eq!(stats.total_notional, dec!(1000));
        assert_eq!(stats.fill_rate, dec!(0.5));

        assert_eq!(manager.cleanup_old_orders(Utc::now() + chrono::Duration::seconds(1)), 2);
        assert_eq!(manager.total_orders(), 0);
    }
}
