//! 观测性初始化。

pub mod events;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const ENV_LOG_DIR: &str = "VOICECALL_LOG_DIR";
const LOG_FILE_PREFIX: &str = "voicecall.log";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_dir: Option<PathBuf>,
    pub json: bool,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let log_dir = std::env::var(ENV_LOG_DIR)
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        Self {
            log_dir,
            json: false,
        }
    }
}

/// 安装全局订阅者；配置了日志目录时额外写入按天滚动的文件。
///
/// The returned guard must be kept alive for the file writer to flush.
pub fn init_tracing(config: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let base = Registry::default().with(env_filter).with(file_layer);

    if config.json {
        let subscriber = base.with(fmt::layer().json().with_target(true));
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set global subscriber")?;
    } else {
        let subscriber = base.with(fmt::layer().with_target(false));
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set global subscriber")?;
    }

    Ok(guard)
}
