use std::{net::IpAddr, sync::Arc, time::Duration};

use ethlink_transport::{
    RateLimitError, RateLimiter, RateLimiterKind, ShapingError, ShapingHandle, TrafficShaper,
};
use ethlink_transport_udp::interface_for_address;
use tracing::{info, warn};

use crate::error::StreamError;

/// 把限速交给内核整形的限流器。
///
/// # 契约说明（What）
/// - 创建时在本地地址所在网卡上为设备端口安装规则，`reserve` 不做任何等待；
/// - 规则在限流器析构时拆除；拆除失败只记录告警，无法再向调用方报告。
pub struct TrafficControlLimiter {
    shaper: Arc<dyn TrafficShaper>,
    handle: ShapingHandle,
}

impl TrafficControlLimiter {
    /// 解析 `local` 所在网卡并安装规则。
    ///
    /// # 错误
    /// - 整形不可用：[`StreamError::NotSupported`]；
    /// - 找不到网卡或 `tc` 命令失败：[`StreamError::Shaping`]。
    pub fn install(
        shaper: Arc<dyn TrafficShaper>,
        local: IpAddr,
        remote_port: u16,
        bytes_per_sec: u32,
    ) -> Result<Self, StreamError> {
        ensure_available(shaper.as_ref())?;
        let interface = interface_for_address(local)?;
        Self::install_on(shaper, &interface, remote_port, bytes_per_sec)
    }

    /// 在指定网卡上安装规则。
    pub fn install_on(
        shaper: Arc<dyn TrafficShaper>,
        interface: &str,
        remote_port: u16,
        bytes_per_sec: u32,
    ) -> Result<Self, StreamError> {
        ensure_available(shaper.as_ref())?;
        if bytes_per_sec == 0 {
            return Err(RateLimitError::ZeroRate.into());
        }
        let handle = shaper.install_rate_limit(interface, remote_port, bytes_per_sec)?;
        info!(rule = %handle, "traffic shaping rule installed");
        Ok(Self { shaper, handle })
    }

    pub fn handle(&self) -> &ShapingHandle {
        &self.handle
    }
}

fn ensure_available(shaper: &dyn TrafficShaper) -> Result<(), StreamError> {
    if shaper.is_available() {
        return Ok(());
    }
    Err(ShapingError::NotSupported {
        reason: "kernel traffic shaping is unavailable on this host".to_owned(),
    }
    .into())
}

impl RateLimiter for TrafficControlLimiter {
    fn reserve(&mut self, _payload_len: usize) -> Result<Duration, RateLimitError> {
        Ok(Duration::ZERO)
    }

    fn kind(&self) -> RateLimiterKind {
        RateLimiterKind::TrafficControl
    }
}

impl Drop for TrafficControlLimiter {
    fn drop(&mut self) {
        match self.shaper.remove_rate_limit(&self.handle) {
            Ok(()) => info!(rule = %self.handle, "traffic shaping rule removed"),
            Err(err) => warn!(rule = %self.handle, error = %err, "failed to remove traffic shaping rule"),
        }
    }
}

impl std::fmt::Debug for TrafficControlLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficControlLimiter")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
