//! 실행 어댑터 에러 타입.

use thiserror::Error;

/// 거래소/실행 어댑터 관련 에러.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 거래소 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// API 에러 코드
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 유효하지 않은 수량
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// 주문을 찾을 수 없음
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 심볼을 찾을 수 없음
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 지원되지 않는 작업
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::RateLimited
                | ExchangeError::Timeout(_)
        )
    }

    /// 연결 불가 계열 에러인지 확인 (주문은 PENDING으로 보류).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_) | ExchangeError::Disconnected(_) | ExchangeError::Timeout(_)
        )
    }

    /// 권장 재시도 대기 시간(밀리초).
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            ExchangeError::RateLimited => Some(60_000),
            ExchangeError::NetworkError(_) => Some(1_000),
            ExchangeError::Disconnected(_) => Some(5_000),
            ExchangeError::Timeout(_) => Some(500),
            _ => None,
        }
    }

    /// 재시도하면 안 되는 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvalidQuantity(_) | ExchangeError::SymbolNotFound(_) | ExchangeError::NotSupported(_)
        )
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ExchangeError::Disconnected("venue offline".to_string());
        assert!(err.is_retryable());
        assert!(err.is_connectivity());
        assert_eq!(err.retry_delay_ms(), Some(5_000));

        let err = ExchangeError::SymbolNotFound("XYZ".to_string());
        assert!(err.is_fatal());
        assert!(!err.is_connectivity());
    }
}
