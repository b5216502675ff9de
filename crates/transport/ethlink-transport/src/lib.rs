#![deny(unsafe_code)]
#![doc = "ethlink-transport: 以太网帧传输层的契约接口。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：让输入/输出流只依赖抽象的报文收发、限流与整形能力，UDP 实现与内存通道可以互换。"]
#![doc = "- **What**：定义 [`DatagramTransport`]、[`RateLimiter`]、[`TrafficShaper`] 三类契约及其错误类型。"]
#![doc = "- **How**：实现 crate（如 `ethlink-transport-udp`）与测试通道（`test-util` 特性下的 [`memory`]）共同遵循本契约。"]

pub mod datagram;
#[cfg(feature = "test-util")]
pub mod memory;
pub mod rate;
pub mod shaping;

pub use datagram::{DatagramTransport, MAX_UDP_PAYLOAD_SIZE, TransportError};
pub use rate::{RateLimitError, RateLimiter, RateLimiterKind};
pub use shaping::{ShapingError, ShapingHandle, TrafficShaper};
