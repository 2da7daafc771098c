//! check-config 命令

use anyhow::{Context, Result, bail};
use clap::Args;
use std::path::PathBuf;
use strider_driver::ControlConfig;

/// 配置校验参数
#[derive(Args, Debug)]
pub struct CheckConfigCommand {
    /// TOML 配置文件
    pub path: Option<PathBuf>,

    /// 输出默认配置（TOML）
    #[arg(long)]
    pub print_default: bool,
}

impl CheckConfigCommand {
    pub fn execute(&self) -> Result<()> {
        if self.print_default {
            let text = toml::to_string_pretty(&ControlConfig::default())
                .context("Failed to serialize default config")?;
            print!("{text}");
            return Ok(());
        }

        let Some(path) = &self.path else {
            bail!("no config file given (use --print-default to see the defaults)");
        };
        let config = ControlConfig::load(path)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        println!("{}", summarize(&config));
        Ok(())
    }
}

fn summarize(config: &ControlConfig) -> String {
    format!(
        "OK: {} joints, staleness {} ms, statistics every {} ms, tolerance {}",
        config.joints.len(),
        config.staleness_threshold_us() / 1_000,
        config.statistics_interval_ms,
        if config.tolerance.enabled {
            format!("{} rad", config.tolerance.position)
        } else {
            "disabled".to_string()
        }
    )
}
