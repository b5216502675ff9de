//! 进程级日志安装入口（feature `fmt-subscriber`）。
//!
//! 流本身只通过 `tracing` 宏发出事件；是否以及如何输出由宿主决定。没有自带日志方案的宿主可以调用
//! [`init_tracing`] 安装 `fmt + EnvFilter` 组合。

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 读取过滤指令的环境变量；未设置时退回 `RUST_LOG`，再退回调用方给出的默认指令。
pub const LOG_ENV: &str = "ETHLINK_LOG";

/// 日志安装失败。
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// 外部已设置全局 Subscriber。
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
    /// 默认过滤指令无法解析。
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter { directive: String, reason: String },
    /// 设置全局 Subscriber 失败。
    #[error("failed to install the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局 `fmt + EnvFilter` Subscriber。
///
/// - 过滤指令依次取自 [`LOG_ENV`]、`RUST_LOG`、`default_directive`；
/// - 重复调用或外部已安装时返回 [`TelemetryError::SubscriberAlreadySet`]。
pub fn init_tracing(default_directive: &str) -> Result<(), TelemetryError> {
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter(default_directive)?)
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter(default_directive: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directive).map_err(|err| TelemetryError::InvalidFilter {
        directive: default_directive.to_owned(),
        reason: err.to_string(),
    })
}
