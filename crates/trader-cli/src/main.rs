//! 주문 실행 코어 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 설정 검증 후 최종 값 출력
//! trader check-config
//!
//! # 시뮬레이션 거래소에서 세션 실행
//! trader simulate --ticks 200 --quantity 20
//!
//! # 다른 설정 파일 사용
//! trader -c config/aggressive.toml simulate
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info};
use trader_core::{init_logging, UserId};

use trader_cli::commands::check_config::check_config;
use trader_cli::commands::simulate::{print_report, run_simulation, SimulateOptions};
use trader_cli::Settings;

#[derive(Parser)]
#[command(name = "trader")]
#[command(about = "Order execution and risk control core", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 (기본: config/default.toml이 있으면 사용)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 시뮬레이션 거래소에서 실행 세션 실행
    Simulate {
        /// 진행할 시세 틱 수
        #[arg(short, long, default_value = "100")]
        ticks: u32,

        /// 틱 간격 (밀리초)
        #[arg(long, default_value = "50")]
        tick_ms: u64,

        /// 사용자 ID
        #[arg(short, long, default_value = "1")]
        user: UserId,

        /// 심볼당 진입 수량
        #[arg(short, long, default_value = "10")]
        quantity: Decimal,

        /// 손절 비율 (예: 0.05 = 5%)
        #[arg(long)]
        stop_loss_pct: Option<Decimal>,

        /// 손절 설정 안 함
        #[arg(long, default_value = "false")]
        no_stop_loss: bool,
    },

    /// 설정 검증 및 최종 값 출력
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env는 없어도 됩니다.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig => {
            let rendered = check_config(cli.config.as_deref())?;
            println!("{}", rendered);
        }

        Commands::Simulate {
            ticks,
            tick_ms,
            user,
            quantity,
            stop_loss_pct,
            no_stop_loss,
        } => {
            let settings = Settings::load(cli.config.as_deref())?;
            init_logging(settings.logging.to_log_config())
                .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

            let defaults = SimulateOptions::default();
            let options = SimulateOptions {
                ticks,
                tick_ms,
                user_id: user,
                quantity,
                stop_loss_pct: if no_stop_loss {
                    None
                } else {
                    stop_loss_pct.or(defaults.stop_loss_pct)
                },
            };

            info!(ticks, %quantity, "Starting simulation");
            match run_simulation(&settings, &options).await {
                Ok(report) => print_report(&report),
                Err(e) => {
                    error!("Simulation failed: {:#}", e);
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
