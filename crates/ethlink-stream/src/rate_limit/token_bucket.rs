use std::time::Duration;

use ethlink_transport::{MAX_UDP_PAYLOAD_SIZE, RateLimitError, RateLimiter, RateLimiterKind};
use tokio::time::Instant;

/// 软件令牌桶。
///
/// # 契约说明（What）
/// - 容量为一个 MTU（[`MAX_UDP_PAYLOAD_SIZE`]），按 `bytes_per_sec` 连续补充；
/// - 初始为空：任何 `S` 字节的突发至少耗时 `S / R`；
/// - 单次扣除不超过容量，超出返回 [`RateLimitError::ExceedsBurst`]。
///
/// # 实现说明（How）
/// - 令牌以 `f64` 计，补充按两次调用之间的流逝时间线性累加并截断到容量；
/// - 时间取自 `tokio::time::Instant`，测试可以在暂停的时钟下精确推进。
#[derive(Debug)]
pub struct TokenBucket {
    bytes_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(bytes_per_sec: u32) -> Result<Self, RateLimitError> {
        Self::with_capacity(bytes_per_sec, MAX_UDP_PAYLOAD_SIZE)
    }

    pub fn with_capacity(bytes_per_sec: u32, capacity: usize) -> Result<Self, RateLimitError> {
        if bytes_per_sec == 0 {
            return Err(RateLimitError::ZeroRate);
        }
        Ok(Self {
            bytes_per_sec: f64::from(bytes_per_sec),
            capacity: capacity as f64,
            tokens: 0.0,
            last_refill: Instant::now(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.bytes_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

impl RateLimiter for TokenBucket {
    fn reserve(&mut self, payload_len: usize) -> Result<Duration, RateLimitError> {
        let demand = payload_len as f64;
        if demand > self.capacity {
            return Err(RateLimitError::ExceedsBurst {
                demand: payload_len,
                capacity: self.capacity(),
            });
        }
        self.refill();
        if self.tokens >= demand {
            self.tokens -= demand;
            return Ok(Duration::ZERO);
        }
        // 非零等待意味着尚未扣除，舍入到 0 会破坏这一约定。
        let wait = Duration::from_secs_f64((demand - self.tokens) / self.bytes_per_sec);
        Ok(wait.max(Duration::from_nanos(1)))
    }

    fn kind(&self) -> RateLimiterKind {
        RateLimiterKind::TokenBucket
    }
}
