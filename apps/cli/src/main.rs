//! # Strider CLI
//!
//! 在一阶仿真对象上运行关节控制核心，用于长时间压测与遥测检查。
//!
//! ```bash
//! # 5 秒仿真：依次请求 stand-prep、stand、walk，第 3 秒起中断指令 0.5 秒
//! strider-cli run --duration 5 --dropout-at 3 --telemetry out.jsonl
//!
//! # 校验配置文件
//! strider-cli check-config strider.toml
//!
//! # 输出默认配置
//! strider-cli check-config --print-default
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod ingest;
mod sim;

use commands::{CheckConfigCommand, RunCommand};

/// Strider CLI - 关节控制核心仿真工具
#[derive(Parser, Debug)]
#[command(name = "strider-cli")]
#[command(about = "Simulation harness for the Strider joint-control core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 在仿真对象上运行控制循环
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 校验配置文件
    CheckConfig {
        #[command(flatten)]
        args: CheckConfigCommand,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { args } => args.execute(),
        Commands::CheckConfig { args } => args.execute(),
    }
}
