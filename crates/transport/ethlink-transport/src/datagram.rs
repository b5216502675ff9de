use std::{future::Future, io, net::SocketAddr, time::Duration};

use thiserror::Error;

/// 单个 UDP 报文在以太网路径上可承载的最大有效负载（1500 MTU − 20 IPv4 头 − 8 UDP 头）。
///
/// 协商出的 `max_payload_size` 不得超过该值；令牌桶的突发容量也以它为上限。
pub const MAX_UDP_PAYLOAD_SIZE: usize = 1472;

/// 报文传输原语返回的错误。
///
/// # 契约说明（What）
/// - `Timeout`：收发未在给定时长内完成，可恢复；
/// - `Io`：底层套接字失败，`operation` 记录失败的动作（`send`/`receive`/`bind` 等）；
/// - `Closed`：对端通道已关闭（内存通道或被拆除的套接字）。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// 收发超时。
    #[error("datagram {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    /// 底层 IO 失败。
    #[error("datagram {operation} failed: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    /// 通道已关闭。
    #[error("datagram channel closed during {operation}")]
    Closed { operation: &'static str },
}

impl TransportError {
    /// 判断是否为超时错误。
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    /// 以统一格式包装 IO 错误；`TimedOut`/`WouldBlock` 被视为超时。
    pub fn from_io(operation: &'static str, timeout: Duration, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                TransportError::Timeout { operation, timeout }
            }
            _ => TransportError::Io { operation, source },
        }
    }
}

/// 面向已连接报文通道的收发契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 输入/输出流只关心“把一个报文交给网络”与“从网络取回一个报文”，不关心底层是 UDP 套接字还是内存队列；
/// - 超时作为每次调用的参数传入，使流层可以在运行期调整超时而无需重建通道。
///
/// ## 契约说明（What）
/// - `send`：发送 `payload`，返回底层实际接受的字节数；可能小于 `payload.len()`，由调用方补发剩余部分；
/// - `receive`：接收单个报文到 `buf`，返回报文长度；超出 `buf` 的部分被截断；
/// - `remote_port`：已连接对端（设备）的端口，流量整形规则以它为键；
/// - `local_addr`：本地绑定地址，用于解析出口网卡；
/// - `max_payload_size`：该路径可承载的最大报文负载。
///
/// ## 取消语义
/// - 返回的 Future 必须可被安全丢弃：流层在 `abort()` 时通过 `select!` 直接丢弃进行中的收发。
pub trait DatagramTransport: Send + Sync + 'static {
    /// 发送返回的 Future。
    type SendFuture<'a>: Future<Output = Result<usize, TransportError>> + Send + 'a
    where
        Self: 'a;

    /// 接收返回的 Future。
    type RecvFuture<'a>: Future<Output = Result<usize, TransportError>> + Send + 'a
    where
        Self: 'a;

    /// 在 `timeout` 内发送一个报文。
    fn send<'a>(&'a self, payload: &'a [u8], timeout: Duration) -> Self::SendFuture<'a>;

    /// 在 `timeout` 内接收一个报文。
    fn receive<'a>(&'a self, buf: &'a mut [u8], timeout: Duration) -> Self::RecvFuture<'a>;

    /// 对端端口。
    fn remote_port(&self) -> u16;

    /// 本地绑定地址。
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;

    /// 路径可承载的最大报文负载。
    fn max_payload_size(&self) -> usize {
        MAX_UDP_PAYLOAD_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeouts_are_classified_as_timeout() {
        let timeout = Duration::from_millis(5);
        let err = TransportError::from_io(
            "receive",
            timeout,
            io::Error::from(io::ErrorKind::WouldBlock),
        );
        assert!(err.is_timeout());

        let err = TransportError::from_io(
            "send",
            timeout,
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("send"));
    }
}
