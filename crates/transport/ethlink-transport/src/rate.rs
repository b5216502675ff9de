use std::{fmt, time::Duration};

use thiserror::Error;

/// 输入流发送路径上的限流契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 令牌桶与内核流量整形两种策略在发送路径上必须可互换，写路径只调用一个入口；
/// - 允许在测试中注入自定义实现，无需派生新的流类型。
///
/// ## 契约说明（What）
/// - `reserve`：为 `payload_len` 字节申请发送许可。返回 `Duration::ZERO` 表示许可已扣除、可以立即发送；
///   返回非零时长表示尚未扣除，调用方需等待该时长后再次调用；
/// - `kind`：策略类别，用于日志与诊断；
/// - **前置条件**：`payload_len` 不超过策略的突发容量，否则返回 [`RateLimitError::ExceedsBurst`]；
/// - **后置条件**：单次成功扣除不超过突发容量。
///
/// ## 风险提示（Trade-offs）
/// - 等待由调用方执行，便于调用方把等待与中止信号组合，而不是在实现内部阻塞。
pub trait RateLimiter: Send {
    /// 申请发送许可，返回需要等待的时长。
    fn reserve(&mut self, payload_len: usize) -> Result<Duration, RateLimitError>;

    /// 策略类别。
    fn kind(&self) -> RateLimiterKind;
}

impl<L: RateLimiter + ?Sized> RateLimiter for Box<L> {
    fn reserve(&mut self, payload_len: usize) -> Result<Duration, RateLimitError> {
        (**self).reserve(payload_len)
    }

    fn kind(&self) -> RateLimiterKind {
        (**self).kind()
    }
}

impl fmt::Debug for dyn RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("kind", &self.kind()).finish()
    }
}

/// 限流策略类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimiterKind {
    /// 不限流。
    Unlimited,
    /// 软件令牌桶。
    TokenBucket,
    /// 内核流量整形。
    TrafficControl,
}

impl fmt::Display for RateLimiterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateLimiterKind::Unlimited => "unlimited",
            RateLimiterKind::TokenBucket => "token-bucket",
            RateLimiterKind::TrafficControl => "traffic-control",
        };
        f.write_str(name)
    }
}

/// 限流器错误。
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RateLimitError {
    /// 单次申请超过突发容量，永远无法满足。
    #[error("rate limiter demand of {demand} bytes exceeds burst capacity of {capacity} bytes")]
    ExceedsBurst { demand: usize, capacity: usize },
    /// 速率为零却要求限流。
    #[error("rate limiter requires a non-zero rate")]
    ZeroRate,
}
