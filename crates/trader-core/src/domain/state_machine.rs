//! 주문 상태 머신.
//!
//! 상태 흐름:
//! `PENDING → SUBMITTED → ACCEPTED → PARTIALLY_FILLED ⇄ (추가 체결) → FILLED`
//!
//! 최종 상태가 아닌 모든 상태는 `CANCELLED`, `REJECTED`, `EXPIRED`로 갈 수 있습니다.
//! `SUSPENDED`는 작동 중인 상태(SUBMITTED, ACCEPTED, PARTIALLY_FILLED)에서
//! 진입하는 곁가지이며 `ACCEPTED`로만 복귀합니다.

use chrono::Utc;
use rust_decimal::Decimal;

use super::order::{Order, OrderChanges, OrderFill, OrderStatusType, StatusTransition};
use crate::error::{TraderError, TraderResult};

/// 주문 상태 전이 검증기.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// 상태 전이가 유효한지 확인합니다.
    pub fn is_valid_transition(from: OrderStatusType, to: OrderStatusType) -> bool {
        use OrderStatusType::*;

        matches!(
            (from, to),
            // PENDING
            (Pending, Submitted)
                | (Pending, Cancelled)
                | (Pending, Rejected)
                | (Pending, Expired)
                // SUBMITTED
                | (Submitted, Accepted)
                | (Submitted, Suspended)
                | (Submitted, Cancelled)
                | (Submitted, Rejected)
                | (Submitted, Expired)
                // ACCEPTED
                | (Accepted, PartiallyFilled)
                | (Accepted, Filled)
                | (Accepted, Suspended)
                | (Accepted, Cancelled)
                | (Accepted, Rejected)
                | (Accepted, Expired)
                // PARTIALLY_FILLED
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Suspended)
                | (PartiallyFilled, Cancelled)
                | (PartiallyFilled, Rejected)
                | (PartiallyFilled, Expired)
                // SUSPENDED
                | (Suspended, Accepted)
                | (Suspended, Cancelled)
                | (Suspended, Rejected)
                | (Suspended, Expired)
        )
    }

    /// 상태 전이를 검증합니다.
    pub fn validate_transition(from: OrderStatusType, to: OrderStatusType) -> TraderResult<()> {
        if Self::is_valid_transition(from, to) {
            Ok(())
        } else {
            Err(TraderError::InvalidTransition { from, to })
        }
    }

    /// 주어진 상태에서 갈 수 있는 모든 상태.
    pub fn valid_next_states(from: OrderStatusType) -> Vec<OrderStatusType> {
        [
            OrderStatusType::Pending,
            OrderStatusType::Submitted,
            OrderStatusType::Accepted,
            OrderStatusType::PartiallyFilled,
            OrderStatusType::Filled,
            OrderStatusType::Cancelled,
            OrderStatusType::Rejected,
            OrderStatusType::Expired,
            OrderStatusType::Suspended,
        ]
        .into_iter()
        .filter(|to| Self::is_valid_transition(from, *to))
        .collect()
    }

    /// 주 흐름상의 진행 순위. `SUSPENDED`는 곁가지이므로 순위가 없습니다.
    pub fn progress_rank(status: OrderStatusType) -> Option<u8> {
        match status {
            OrderStatusType::Pending => Some(0),
            OrderStatusType::Submitted => Some(1),
            OrderStatusType::Accepted => Some(2),
            OrderStatusType::PartiallyFilled => Some(3),
            OrderStatusType::Filled
            | OrderStatusType::Cancelled
            | OrderStatusType::Rejected
            | OrderStatusType::Expired => Some(4),
            OrderStatusType::Suspended => None,
        }
    }
}

impl Order {
    /// 상태를 전이하고 이전 상태를 반환합니다.
    pub fn transition_to(&mut self, to: OrderStatusType) -> TraderResult<OrderStatusType> {
        OrderStateMachine::validate_transition(self.status, to)?;

        let from = self.status;
        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        self.transitions.push(StatusTransition { from, to, at: now });

        if to == OrderStatusType::Submitted {
            self.submitted_at = Some(now);
        }
        if to.is_final() {
            self.completed_at = Some(now);
        }

        Ok(from)
    }

    /// 외부 주문 ID를 기록하고 SUBMITTED로 전이합니다.
    pub fn mark_submitted(&mut self, external_id: impl Into<String>) -> TraderResult<OrderStatusType> {
        let previous = self.transition_to(OrderStatusType::Submitted)?;
        self.external_id = Some(external_id.into());
        Ok(previous)
    }

    /// 체결을 적용하고 적용 전 상태를 반환합니다.
    ///
    /// SUBMITTED 상태의 주문은 먼저 ACCEPTED로 전이됩니다. 체결은 하나씩
    /// 적용되며 검증에 실패하면 주문은 변경되지 않습니다.
    pub fn apply_fill(&mut self, fill: OrderFill) -> TraderResult<OrderStatusType> {
        if fill.order_id != self.id {
            return Err(TraderError::Validation(format!(
                "fill {} belongs to order {}, not {}",
                fill.id, fill.order_id, self.id
            )));
        }
        if fill.quantity <= Decimal::ZERO {
            return Err(TraderError::Validation(format!(
                "fill quantity must be positive, got {}",
                fill.quantity
            )));
        }
        if fill.quantity > self.remaining_quantity {
            return Err(TraderError::Validation(format!(
                "fill quantity {} exceeds remaining {}",
                fill.quantity, self.remaining_quantity
            )));
        }

        let previous = self.status;
        match self.status {
            OrderStatusType::Submitted => {
                self.transition_to(OrderStatusType::Accepted)?;
            }
            OrderStatusType::Accepted | OrderStatusType::PartiallyFilled => {}
            from => {
                return Err(TraderError::InvalidTransition {
                    from,
                    to: OrderStatusType::PartiallyFilled,
                })
            }
        }

        let new_filled = self.filled_quantity + fill.quantity;
        let prior_value = self.average_fill_price.unwrap_or(Decimal::ZERO) * self.filled_quantity;
        self.average_fill_price = Some((prior_value + fill.value) / new_filled);
        self.filled_quantity = new_filled;
        self.remaining_quantity = self.quantity - new_filled;
        self.commission += fill.commission;
        self.fills.push(fill);

        let target = if self.remaining_quantity.is_zero() {
            OrderStatusType::Filled
        } else {
            OrderStatusType::PartiallyFilled
        };
        self.transition_to(target)?;

        Ok(previous)
    }

    /// 정정 사항을 적용합니다. 상태는 변하지 않습니다.
    pub fn apply_changes(&mut self, changes: &OrderChanges) -> TraderResult<()> {
        if self.is_final() {
            return Err(TraderError::Validation(format!(
                "order {} is {} and cannot be modified",
                self.id, self.status
            )));
        }
        if changes.is_empty() {
            return Err(TraderError::Validation("no changes requested".to_string()));
        }
        if let Some(quantity) = changes.quantity {
            if quantity <= self.filled_quantity {
                return Err(TraderError::Validation(format!(
                    "new quantity {} must exceed filled quantity {}",
                    quantity, self.filled_quantity
                )));
            }
        }
        for price in [changes.price, changes.stop_price].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(TraderError::Validation(format!("price must be positive, got {}", price)));
            }
        }

        if let Some(quantity) = changes.quantity {
            self.quantity = quantity;
            self.remaining_quantity = quantity - self.filled_quantity;
        }
        if let Some(price) = changes.price {
            self.price = Some(price);
        }
        if let Some(stop_price) = changes.stop_price {
            self.stop_price = Some(stop_price);
            self.trigger.stop_triggered = false;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
