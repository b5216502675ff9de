use std::{future::Future, io, net::SocketAddr, pin::Pin, time::Duration};

use ethlink_transport::{DatagramTransport, MAX_UDP_PAYLOAD_SIZE, TransportError};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

/// UDP 套接字的可选参数集合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 设备输出突发时，内核接收缓冲决定了在读取方落后期间能暂存多少报文；将其显式建模，避免宿主层散布套接字调用；
/// - `max_payload_size` 描述路径可承载的报文上限，流层据此校验协商出的负载大小。
///
/// ## 契约（What）
/// - `recv_buffer_size` / `send_buffer_size`：`None` 表示沿用内核默认值；
/// - `max_payload_size`：默认 [`MAX_UDP_PAYLOAD_SIZE`]。
#[derive(Clone, Debug)]
pub struct UdpTransportOptions {
    recv_buffer_size: Option<usize>,
    send_buffer_size: Option<usize>,
    max_payload_size: usize,
}

impl Default for UdpTransportOptions {
    fn default() -> Self {
        Self {
            recv_buffer_size: None,
            send_buffer_size: None,
            max_payload_size: MAX_UDP_PAYLOAD_SIZE,
        }
    }
}

impl UdpTransportOptions {
    /// 设置 `SO_RCVBUF`。
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// 设置 `SO_SNDBUF`。
    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// 覆盖路径可承载的最大报文负载，不得超过 [`MAX_UDP_PAYLOAD_SIZE`]。
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size.min(MAX_UDP_PAYLOAD_SIZE);
        self
    }

    pub fn recv_buffer_size(&self) -> Option<usize> {
        self.recv_buffer_size
    }

    pub fn send_buffer_size(&self) -> Option<usize> {
        self.send_buffer_size
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn apply(&self, socket: &Socket) -> io::Result<()> {
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        Ok(())
    }
}

/// 与单个设备端口相连的 UDP 报文通道。
///
/// # Why
/// - 以太网流的每个方向都独占一个已连接套接字：发送无需每次指定目的地址，接收也只会看到设备端口发来的报文。
///
/// # What
/// - `connect`：绑定本地地址并连接设备地址；
/// - `send`/`receive`：实现 [`DatagramTransport`]，超时由调用方逐次传入。
///
/// # How
/// - `socket2` 创建套接字并应用 [`UdpTransportOptions`]，转为非阻塞后交给 Tokio；
/// - 每次收发以 `tokio::time::timeout` 包裹，超时映射为 [`TransportError::Timeout`]。
#[derive(Debug)]
pub struct UdpTransport {
    sock: UdpSocket,
    remote: SocketAddr,
    options: UdpTransportOptions,
}

impl UdpTransport {
    /// 以默认参数绑定并连接。
    pub async fn connect(local: SocketAddr, remote: SocketAddr) -> Result<Self, TransportError> {
        Self::connect_with_options(local, remote, UdpTransportOptions::default()).await
    }

    /// 带可选参数的连接入口。
    ///
    /// # 前置条件
    /// - 必须在 Tokio 运行时内调用，否则 `UdpSocket::from_std` 会失败。
    ///
    /// # 错误处理
    /// - 创建、配置、绑定、连接任一步失败均返回 [`TransportError::Io`]，`operation` 标明失败步骤。
    pub async fn connect_with_options(
        local: SocketAddr,
        remote: SocketAddr,
        options: UdpTransportOptions,
    ) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(io_error("socket"))?;
        options.apply(&socket).map_err(io_error("configure"))?;
        socket.set_nonblocking(true).map_err(io_error("configure"))?;
        socket.bind(&local.into()).map_err(io_error("bind"))?;

        let sock = UdpSocket::from_std(socket.into()).map_err(io_error("register"))?;
        sock.connect(remote).await.map_err(io_error("connect"))?;
        debug!(%local, %remote, "udp transport connected");
        Ok(Self {
            sock,
            remote,
            options,
        })
    }

    /// 已连接的设备地址。
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// 绑定时使用的套接字选项。
    pub fn options(&self) -> &UdpTransportOptions {
        &self.options
    }
}

impl DatagramTransport for UdpTransport {
    type SendFuture<'a> =
        Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;
    type RecvFuture<'a> =
        Pin<Box<dyn Future<Output = Result<usize, TransportError>> + Send + 'a>>;

    fn send<'a>(&'a self, payload: &'a [u8], timeout: Duration) -> Self::SendFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.sock.send(payload)).await {
                Ok(Ok(sent)) => Ok(sent),
                Ok(Err(source)) => Err(TransportError::from_io("send", timeout, source)),
                Err(_) => Err(TransportError::Timeout {
                    operation: "send",
                    timeout,
                }),
            }
        })
    }

    fn receive<'a>(&'a self, buf: &'a mut [u8], timeout: Duration) -> Self::RecvFuture<'a> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.sock.recv(buf)).await {
                Ok(Ok(received)) => Ok(received),
                Ok(Err(source)) => Err(TransportError::from_io("receive", timeout, source)),
                Err(_) => Err(TransportError::Timeout {
                    operation: "receive",
                    timeout,
                }),
            }
        })
    }

    fn remote_port(&self) -> u16 {
        self.remote.port()
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.sock
            .local_addr()
            .map_err(|source| TransportError::Io {
                operation: "local_addr",
                source,
            })
    }

    fn max_payload_size(&self) -> usize {
        self.options.max_payload_size
    }
}

fn io_error(operation: &'static str) -> impl FnOnce(io::Error) -> TransportError {
    move |source| TransportError::Io { operation, source }
}
