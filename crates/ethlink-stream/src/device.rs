//! 设备句柄与“计算图已激活”信号。

use std::{net::IpAddr, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::error::StreamError;

/// 流创建时所需的设备信息。
pub trait Device: Send + Sync {
    /// 用于日志的设备标识。
    fn device_id(&self) -> &str;

    /// 设备的 IP 地址；流会连接到该地址上的设备端口。
    fn address(&self) -> IpAddr;
}

/// 通过以太网访问的设备。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthernetDevice {
    id: String,
    address: IpAddr,
}

impl EthernetDevice {
    pub fn new(id: impl Into<String>, address: IpAddr) -> Self {
        Self {
            id: id.into(),
            address,
        }
    }
}

impl Device for EthernetDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> IpAddr {
        self.address
    }
}

/// 可等待的布尔信号：设备上的计算图（core op）是否已激活。
///
/// # Why
/// - 流的 `activate` 必须等到设备侧计算图真正启动之后才能开始收发，否则首批报文会被设备丢弃；
/// - 多条流共享同一个信号，因此它是可克隆的句柄。
///
/// # How
/// - 内部是 `tokio::sync::watch`，`wait` 在值变为 `true` 前挂起，并受超时约束。
#[derive(Clone, Debug)]
pub struct ActivationSignal {
    state: Arc<watch::Sender<bool>>,
}

impl Default for ActivationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivationSignal {
    /// 构造初始为未激活的信号。
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }

    /// 构造已激活的信号。
    pub fn activated() -> Self {
        let signal = Self::new();
        signal.set();
        signal
    }

    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn reset(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// 等待信号被置位，超时返回 [`StreamError::Timeout`]。
    pub async fn wait(&self, timeout: Duration) -> Result<(), StreamError> {
        let mut rx = self.state.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|activated| *activated)).await {
            Ok(Ok(_)) => Ok(()),
            // 发送端由 `self` 持有，不会在等待期间关闭。
            Ok(Err(_)) => Err(StreamError::NotActivated),
            Err(_) => Err(StreamError::Timeout {
                operation: "wait for core op activation",
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_signal_is_set() {
        let signal = ActivationSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set();
        waiter.await.expect("join").expect("activated");
        assert!(signal.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_while_inactive() {
        let signal = ActivationSignal::new();
        let err = signal
            .wait(Duration::from_millis(50))
            .await
            .expect_err("never set");
        assert!(err.is_timeout());
    }
}
