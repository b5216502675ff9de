//! 输入流的限流策略与一次性选择逻辑。
//!
//! # 策略（What）
//! - [`UnlimitedRate`]：速率为 `0` 时不限流；
//! - [`TokenBucket`]：软件令牌桶，写路径逐包等待；
//! - [`TrafficControlLimiter`]：内核整形，写路径不等待，规则随限流器析构拆除。
//!
//! 选择只在流创建时发生一次，之后流只通过 [`RateLimiter`] 契约与之交互。

mod token_bucket;
mod traffic_control;

use std::{net::IpAddr, sync::Arc, time::Duration};

use ethlink_transport::{RateLimitError, RateLimiter, RateLimiterKind, TrafficShaper};
use tracing::debug;

use crate::{config::RateLimiterPreference, error::StreamError};

pub use token_bucket::TokenBucket;
pub use traffic_control::TrafficControlLimiter;

/// 不限流。
#[derive(Clone, Copy, Debug, Default)]
pub struct UnlimitedRate;

impl RateLimiter for UnlimitedRate {
    fn reserve(&mut self, _payload_len: usize) -> Result<Duration, RateLimitError> {
        Ok(Duration::ZERO)
    }

    fn kind(&self) -> RateLimiterKind {
        RateLimiterKind::Unlimited
    }
}

/// 按偏好构造输入流的限流器。
///
/// # 选择规则
/// - `bytes_per_sec == 0`：[`UnlimitedRate`]，忽略偏好；
/// - `Auto`：整形可用时安装内核规则，否则退回令牌桶；
/// - `TokenBucket`：总是令牌桶；
/// - `TrafficControl`：整形不可用时返回 [`StreamError::NotSupported`]。
pub fn select_rate_limiter(
    preference: RateLimiterPreference,
    bytes_per_sec: u32,
    local: IpAddr,
    remote_port: u16,
    shaper: Arc<dyn TrafficShaper>,
) -> Result<Box<dyn RateLimiter>, StreamError> {
    let limiter: Box<dyn RateLimiter> = match preference {
        _ if bytes_per_sec == 0 => Box::new(UnlimitedRate),
        RateLimiterPreference::TokenBucket => Box::new(TokenBucket::new(bytes_per_sec)?),
        RateLimiterPreference::TrafficControl => Box::new(TrafficControlLimiter::install(
            shaper,
            local,
            remote_port,
            bytes_per_sec,
        )?),
        RateLimiterPreference::Auto if shaper.is_available() => Box::new(
            TrafficControlLimiter::install(shaper, local, remote_port, bytes_per_sec)?,
        ),
        RateLimiterPreference::Auto => Box::new(TokenBucket::new(bytes_per_sec)?),
    };
    debug!(
        ?preference,
        kind = %limiter.kind(),
        bytes_per_sec,
        remote_port,
        "rate limiter selected"
    );
    Ok(limiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use ethlink_transport::{ShapingError, ShapingHandle};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeShaper {
        available: bool,
        installed: Mutex<Vec<ShapingHandle>>,
        removed: Mutex<Vec<ShapingHandle>>,
    }

    impl TrafficShaper for FakeShaper {
        fn is_available(&self) -> bool {
            self.available
        }

        fn install_rate_limit(
            &self,
            interface: &str,
            port: u16,
            bytes_per_sec: u32,
        ) -> Result<ShapingHandle, ShapingError> {
            let handle = ShapingHandle::new(interface, port, bytes_per_sec);
            self.installed.lock().push(handle.clone());
            Ok(handle)
        }

        fn remove_rate_limit(&self, handle: &ShapingHandle) -> Result<(), ShapingError> {
            self.removed.lock().push(handle.clone());
            Ok(())
        }
    }

    fn shaper(available: bool) -> Arc<FakeShaper> {
        Arc::new(FakeShaper {
            available,
            ..FakeShaper::default()
        })
    }

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn zero_rate_selects_unlimited() {
        let limiter = select_rate_limiter(
            RateLimiterPreference::TrafficControl,
            0,
            LOOPBACK,
            50001,
            shaper(false),
        )
        .expect("unlimited");
        assert_eq!(limiter.kind(), RateLimiterKind::Unlimited);
    }

    #[tokio::test]
    async fn auto_falls_back_to_token_bucket() {
        let limiter = select_rate_limiter(
            RateLimiterPreference::Auto,
            1_000_000,
            LOOPBACK,
            50001,
            shaper(false),
        )
        .expect("token bucket");
        assert_eq!(limiter.kind(), RateLimiterKind::TokenBucket);
    }

    #[test]
    fn explicit_traffic_control_requires_shaping() {
        let err = select_rate_limiter(
            RateLimiterPreference::TrafficControl,
            1_000_000,
            LOOPBACK,
            50001,
            shaper(false),
        )
        .expect_err("unavailable");
        assert_eq!(err.kind(), crate::error::ErrorKind::NotSupported);
    }

    #[test]
    fn traffic_control_rule_lives_as_long_as_the_limiter() {
        let fake = shaper(true);
        let limiter = TrafficControlLimiter::install_on(fake.clone(), "eth0", 50001, 125_000)
            .expect("installed");
        assert_eq!(limiter.handle(), &ShapingHandle::new("eth0", 50001, 125_000));
        assert!(fake.removed.lock().is_empty());

        drop(limiter);
        assert_eq!(fake.installed.lock().len(), 1);
        assert_eq!(
            fake.removed.lock().as_slice(),
            &[ShapingHandle::new("eth0", 50001, 125_000)]
        );
    }
}
