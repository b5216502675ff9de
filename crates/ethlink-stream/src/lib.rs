#![deny(unsafe_code)]
#![doc = r#"
# ethlink-stream

## 模块使命（Why）
- **逐帧收发**：主机与加速器设备之间按帧交换推理数据，而 UDP 只按报文交付、既不保留帧边界也不保证送达；
- **节流**：设备缓冲有限，输入路径必须按协商速率发送，否则设备侧丢包；
- **可恢复**：丢包后输出路径必须在下一个同步标记处重新对齐，绝不能把错位的数据交给应用。

## 核心契约（What）
- [`EthInputStream`]：把帧拆成报文，按 `frames_per_sync` 插入 [`SyncMarker`]，经 [`RateLimiter`](ethlink_transport::RateLimiter) 节流后发送；
- [`EthOutputStream`]：把报文重组成帧，剥离并校验同步标记，超时后进入寻同步状态；
- [`StreamLifecycle`] / [`StreamHandle`]：`activate`/`deactivate`/`abort`/`clear_abort` 状态机，可跨任务打断阻塞中的收发；
- 限流策略：[`TokenBucket`]、[`TrafficControlLimiter`]、[`UnlimitedRate`]，由 [`select_rate_limiter`] 在创建时一次性选择；
- 配置：[`EthInputStreamParams`] / [`EthOutputStreamParams`] 可从 TOML 加载，校验后冻结为只读配置。

## 实现策略（How）
- 全部收发为 `async`，每个阻塞点都与生命周期的 `watch` 通道一起 `select!`，`abort()` 立即生效；
- 报文缓冲与余量使用 `bytes::BytesMut`；错误以 `thiserror` 枚举表达，并提供稳定错误码；
- 日志通过 `tracing` 结构化字段输出；`fmt-subscriber` 特性提供 `telemetry::init_tracing`。
"#]

pub mod config;
pub mod device;
pub mod error;
pub mod input;
pub mod layer;
pub mod lifecycle;
pub mod output;
pub mod rate_limit;
pub mod sync;
#[cfg(feature = "fmt-subscriber")]
pub mod telemetry;

pub use config::{
    DEFAULT_TIMEOUT, EthInputStreamParams, EthOutputStreamParams, InputStreamConfiguration,
    OutputStreamConfiguration, RateLimiterPreference,
};
pub use device::{ActivationSignal, Device, EthernetDevice};
pub use error::{ErrorKind, StreamError};
pub use input::EthInputStream;
pub use layer::{LayerInfo, StreamDirection};
pub use lifecycle::{ActivationState, StreamHandle, StreamLifecycle};
pub use output::{EthOutputStream, OutputStreamStats};
pub use rate_limit::{TokenBucket, TrafficControlLimiter, UnlimitedRate, select_rate_limiter};
pub use sync::{NO_SYNC_OBSERVED, SYNC_MARKER_BARKER, SYNC_MARKER_MIN_SIZE, SyncMarker};
