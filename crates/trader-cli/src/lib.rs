//! `trader` 바이너리 지원 코드.
//!
//! - 계층 설정 로딩 ([`settings::Settings`])
//! - 시뮬레이션 세션과 설정 점검 명령어

pub mod commands;
pub mod settings;

pub use settings::Settings;
