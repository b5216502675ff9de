//! 内存报文通道：无网络环境下驱动输入/输出流的测试替身。
//!
//! # 模块定位（Why）
//! - 流层的拆帧、同步标记与重同步逻辑需要在可控信道上验证：无丢包、按需丢包、超时与部分发送；
//! - 真实 UDP 套接字无法稳定复现这些条件，因此提供一对互相连接的内存端点。
//!
//! # 暴露接口（What）
//! - [`memory_pair`]：构造一对端点，一端 `send` 的报文进入另一端的接收队列；
//! - [`MemoryTransport::inject`]：向本端接收队列直接投递报文，模拟设备侧输出；
//! - [`MemoryTransport::sent_datagrams`]：读取本端已发出的全部报文，用于断言报文切分；
//! - [`MemoryTransport::set_send_chunk_limit`]：限制单次 `send` 接受的字节数，模拟部分发送。

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    pin::Pin,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::datagram::{DatagramTransport, TransportError};

/// 内存通道的一端。
pub struct MemoryTransport {
    inbox: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    loopback: mpsc::UnboundedSender<Vec<u8>>,
    peer: mpsc::UnboundedSender<Vec<u8>>,
    local: SocketAddr,
    remote: SocketAddr,
    max_payload_size: usize,
    send_chunk_limit: AtomicUsize,
    sent: Mutex<Vec<Vec<u8>>>,
}

/// 构造一对互联的内存端点，端口分别为 `50000`（host）与 `50001`（device）。
pub fn memory_pair(max_payload_size: usize) -> (MemoryTransport, MemoryTransport) {
    let host_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000);
    let device_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50001);
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let (device_tx, device_rx) = mpsc::unbounded_channel();
    let host = MemoryTransport {
        inbox: AsyncMutex::new(host_rx),
        loopback: host_tx.clone(),
        peer: device_tx.clone(),
        local: host_addr,
        remote: device_addr,
        max_payload_size,
        send_chunk_limit: AtomicUsize::new(0),
        sent: Mutex::new(Vec::new()),
    };
    let device = MemoryTransport {
        inbox: AsyncMutex::new(device_rx),
        loopback: device_tx,
        peer: host_tx,
        local: device_addr,
        remote: host_addr,
        max_payload_size,
        send_chunk_limit: AtomicUsize::new(0),
        sent: Mutex::new(Vec::new()),
    };
    (host, device)
}

impl MemoryTransport {
    /// 向本端接收队列投递一个报文。
    pub fn inject(&self, datagram: impl Into<Vec<u8>>) {
        // 接收端与本结构同生命周期，发送不会失败。
        let _ = self.loopback.send(datagram.into());
    }

    /// 本端已经发出的全部报文（按发送顺序）。
    pub fn sent_datagrams(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// 取走并清空已发送报文的记录。
    pub fn take_sent_datagrams(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// 限制单次 `send` 接受的字节数；`0` 表示不限制。
    pub fn set_send_chunk_limit(&self, limit: usize) {
        self.send_chunk_limit.store(limit, Ordering::Relaxed);
    }

    fn accept_len(&self, len: usize) -> usize {
        match self.send_chunk_limit.load(Ordering::Relaxed) {
            0 => len,
            limit => len.min(limit),
        }
    }
}

impl DatagramTransport for MemoryTransport {
    type SendFuture<'a> =
        Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;
    type RecvFuture<'a> =
        Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;

    fn send<'a>(&'a self, payload: &'a [u8], _timeout: Duration) -> Self::SendFuture<'a> {
        Box::pin(async move {
            let accepted = self.accept_len(payload.len());
            let datagram = payload[..accepted].to_vec();
            self.peer
                .send(datagram.clone())
                .map_err(|_| TransportError::Closed { operation: "send" })?;
            self.sent.lock().push(datagram);
            Ok(accepted)
        })
    }

    fn receive<'a>(&'a self, buf: &'a mut [u8], timeout: Duration) -> Self::RecvFuture<'a> {
        Box::pin(async move {
            let mut inbox = self.inbox.lock().await;
            let datagram = tokio::time::timeout(timeout, inbox.recv())
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "receive",
                    timeout,
                })?
                .ok_or(TransportError::Closed {
                    operation: "receive",
                })?;
            let len = datagram.len().min(buf.len());
            buf[..len].copy_from_slice(&datagram[..len]);
            Ok(len)
        })
    }

    fn remote_port(&self) -> u16 {
        self.remote.port()
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.local)
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}
