//! 설정 점검 명령어.
//!
//! 계층 설정을 로드해 검증하고, 적용된 최종 값을 TOML로 출력합니다.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::settings::Settings;

/// 설정을 로드해 검증하고 최종 값을 돌려줍니다.
pub fn check_config(path: Option<&Path>) -> Result<String> {
    let settings = Settings::load(path)?;
    info!(
        symbols = settings.simulation.symbols.len(),
        auto_resize = settings.execution.auto_resize,
        "Configuration is valid"
    );
    settings.to_toml()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_file_reports_error() {
        let path = std::env::temp_dir().join(format!("trader-check-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[risk]\nliquidation_ratio = \"0.5\"\nmargin_call_ratio = \"0.2\"\n").unwrap();

        let err = check_config(Some(&path)).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{:#}", err).contains("liquidation_ratio"));
    }
}
