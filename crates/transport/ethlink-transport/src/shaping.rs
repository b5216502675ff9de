use std::{fmt, io};

use thiserror::Error;

/// 内核流量整形设施的契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以太网输入流可以把限速交给操作系统的排队规则，发送路径因此不再需要逐包等待；
/// - 整形规则是进程级（甚至主机级）资源，必须显式安装与拆除，契约把这两步建模为一对操作。
///
/// ## 契约说明（What）
/// - `is_available`：当前平台是否支持整形（运行期能力查询，而非编译期裁剪）；
/// - `install_rate_limit`：在 `interface` 上为目的端口 `port` 的流量安装速率为 `bytes_per_sec` 的规则；
/// - `remove_rate_limit`：拆除先前安装的规则；
/// - **前置条件**：同一 `(interface, port)` 同时只应存在一条规则；
/// - **后置条件**：`remove_rate_limit` 成功后该端口流量不再受限。
///
/// ## 风险提示（Trade-offs）
/// - 实现需按网卡串行化安装与拆除，避免并发创建流时出现竞态；
/// - 规则泄漏会限制之后同一网卡上的无关流量，调用方必须保证拆除。
pub trait TrafficShaper: Send + Sync {
    /// 当前平台是否可用。
    fn is_available(&self) -> bool;

    /// 安装限速规则。
    fn install_rate_limit(
        &self,
        interface: &str,
        port: u16,
        bytes_per_sec: u32,
    ) -> Result<ShapingHandle, ShapingError>;

    /// 拆除限速规则。
    fn remove_rate_limit(&self, handle: &ShapingHandle) -> Result<(), ShapingError>;
}

/// 已安装整形规则的描述，拆除时原样交还给整形设施。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapingHandle {
    interface: String,
    port: u16,
    bytes_per_sec: u32,
}

impl ShapingHandle {
    pub fn new(interface: impl Into<String>, port: u16, bytes_per_sec: u32) -> Self {
        Self {
            interface: interface.into(),
            port,
            bytes_per_sec,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bytes_per_sec(&self) -> u32 {
        self.bytes_per_sec
    }
}

impl fmt::Display for ShapingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}B/s",
            self.interface, self.port, self.bytes_per_sec
        )
    }
}

/// 流量整形错误。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ShapingError {
    /// 平台不支持内核整形。
    #[error("traffic shaping is not supported on this host: {reason}")]
    NotSupported { reason: String },
    /// 无法为本地地址找到网卡。
    #[error("no network interface owns address {address}")]
    InterfaceNotFound { address: String },
    /// 同一端口已存在规则。
    #[error("a shaping rule for port {port} already exists on {interface}")]
    AlreadyInstalled { interface: String, port: u16 },
    /// 整形命令执行失败。
    #[error("traffic control command `{command}` failed: {detail}")]
    Command { command: String, detail: String },
    /// 底层 IO 失败（例如无法启动命令）。
    #[error("traffic control io failure: {0}")]
    Io(#[from] io::Error),
}
