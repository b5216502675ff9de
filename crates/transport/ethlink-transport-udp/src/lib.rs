#![doc = r#"
# ethlink-transport-udp

## 模块使命（Why）
- **统一 UDP 通路**：为以太网输入/输出流提供围绕 Tokio `UdpSocket` 的已连接报文通道，满足 `ethlink-transport` 的 [`DatagramTransport`](ethlink_transport::DatagramTransport) 契约。
- **内核整形**：在 Linux 上通过 `tc` 为设备端口安装限速规则，使输入流无需逐包等待。

## 核心契约（What）
- [`UdpTransport`]：绑定本地地址、连接设备地址，按调用方给出的超时收发单个报文。
- [`interface_for_address`]：查找拥有某个本地 IP 的网卡名称。
- [`TcShaper`]：`TrafficShaper` 的 Linux 实现，按网卡串行化规则的安装与拆除；[`shaping_available`] 是运行期能力查询。

## 实现策略（How）
- 套接字先由 `socket2` 创建并设置缓冲区大小，再移交 Tokio 驱动；超时通过 `tokio::time::timeout` 施加。
- 网卡查询委托 `nix::ifaddrs::getifaddrs`；整形命令通过可替换的 [`TcCommandRunner`] 执行，便于在无特权环境下测试。
"#]

mod interface;
mod socket;
mod traffic_control;

pub use interface::interface_for_address;
pub use socket::{UdpTransport, UdpTransportOptions};
pub use traffic_control::{
    SystemCommandRunner, TcCommandRunner, TcShaper, shaping_available,
};
