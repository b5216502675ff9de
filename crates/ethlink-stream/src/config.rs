//! 流参数（协商层给出）与校验后的只读流配置。
//!
//! # 模块定位（Why）
//! - 参数来自外部协商或配置文件，可能彼此矛盾；流在创建时一次性校验并冻结为配置，此后不再修改；
//! - 参数支持 `serde` 反序列化，可直接从 TOML 加载，缺省字段取默认值，未知字段报错。
//!
//! # 暴露接口（What）
//! - [`EthInputStreamParams`] / [`EthOutputStreamParams`]：创建参数；
//! - [`InputStreamConfiguration`] / [`OutputStreamConfiguration`]：校验后的写一次配置；
//! - [`RateLimiterPreference`]：输入流的限流策略偏好。

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use ethlink_transport::MAX_UDP_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};

use crate::{
    error::StreamError,
    layer::{LayerInfo, StreamDirection},
    sync::SYNC_MARKER_MIN_SIZE,
};

/// 收发默认超时。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// 输入流限流策略偏好。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimiterPreference {
    /// 内核整形可用时使用整形，否则退回令牌桶。
    #[default]
    Auto,
    /// 始终使用软件令牌桶。
    TokenBucket,
    /// 始终使用内核整形，不可用时创建失败。
    TrafficControl,
}

/// 输入流创建参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EthInputStreamParams {
    /// 本地绑定地址；端口 `0` 表示由系统分配。
    pub host_address: SocketAddr,
    /// 设备侧端口。
    pub device_port: u16,
    pub is_sync_enabled: bool,
    /// 每隔多少帧插入一次同步标记。
    pub frames_per_sync: u32,
    /// 标记头长度（字节）。
    pub sync_size: u16,
    pub max_payload_size: u16,
    /// 帧末报文补零到 `max_payload_size`。
    pub use_dataflow_padding: bool,
    /// 设备侧积压水位（以报文计），用于估算套接字缓冲。
    pub buffers_threshold: u32,
    /// 发送速率上限，`0` 表示不限流。
    pub rate_limit_bytes_per_sec: u32,
    pub rate_limiter: RateLimiterPreference,
    pub timeout_ms: u64,
}

impl Default for EthInputStreamParams {
    fn default() -> Self {
        Self {
            host_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            device_port: 0,
            is_sync_enabled: false,
            frames_per_sync: 1,
            sync_size: SYNC_MARKER_MIN_SIZE as u16,
            max_payload_size: MAX_UDP_PAYLOAD_SIZE as u16,
            use_dataflow_padding: false,
            buffers_threshold: 0,
            rate_limit_bytes_per_sec: 0,
            rate_limiter: RateLimiterPreference::Auto,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl EthInputStreamParams {
    /// 从 TOML 文本加载。
    pub fn from_toml_str(text: &str) -> Result<Self, StreamError> {
        toml::from_str(text).map_err(|err| StreamError::InvalidConfiguration(err.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 输出流创建参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EthOutputStreamParams {
    pub host_address: SocketAddr,
    pub device_port: u16,
    pub is_sync_enabled: bool,
    pub sync_size: u16,
    pub max_payload_size: u16,
    pub buffers_threshold: u32,
    pub timeout_ms: u64,
}

impl Default for EthOutputStreamParams {
    fn default() -> Self {
        Self {
            host_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            device_port: 0,
            is_sync_enabled: false,
            sync_size: SYNC_MARKER_MIN_SIZE as u16,
            max_payload_size: MAX_UDP_PAYLOAD_SIZE as u16,
            buffers_threshold: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl EthOutputStreamParams {
    /// 从 TOML 文本加载。
    pub fn from_toml_str(text: &str) -> Result<Self, StreamError> {
        toml::from_str(text).map_err(|err| StreamError::InvalidConfiguration(err.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn invalid(message: impl Into<String>) -> StreamError {
    StreamError::InvalidConfiguration(message.into())
}

fn check_layer(layer: &LayerInfo, direction: StreamDirection) -> Result<(), StreamError> {
    if layer.direction != direction {
        return Err(invalid(format!(
            "layer `{}` is {:?}, expected {:?}",
            layer.name, layer.direction, direction
        )));
    }
    if layer.frame_size == 0 {
        return Err(invalid(format!("layer `{}` has an empty frame", layer.name)));
    }
    Ok(())
}

fn check_payload(max_payload_size: usize) -> Result<(), StreamError> {
    if max_payload_size == 0 || max_payload_size > MAX_UDP_PAYLOAD_SIZE {
        return Err(invalid(format!(
            "max_payload_size {max_payload_size} must be within 1..={MAX_UDP_PAYLOAD_SIZE}"
        )));
    }
    Ok(())
}

fn check_sync_size(sync_size: usize, max_payload_size: usize) -> Result<(), StreamError> {
    if sync_size < SYNC_MARKER_MIN_SIZE || sync_size >= max_payload_size {
        return Err(invalid(format!(
            "sync_size {sync_size} must be at least {SYNC_MARKER_MIN_SIZE} and below max_payload_size {max_payload_size}"
        )));
    }
    Ok(())
}

/// 校验后的输入流配置，创建后不可修改。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputStreamConfiguration {
    max_payload_size: usize,
    use_dataflow_padding: bool,
    is_sync_enabled: bool,
    frames_per_sync: u32,
    sync_size: usize,
    packets_per_frame: usize,
    buffers_threshold: u32,
}

impl InputStreamConfiguration {
    /// 以层描述校验参数。
    ///
    /// # 错误
    /// - 层方向不是主机到设备、帧为空；
    /// - 负载为零或超过报文上限；
    /// - 启用同步时 `frames_per_sync == 0`，或 `sync_size` 不在 `[8, max_payload_size)` 内。
    pub fn new(params: &EthInputStreamParams, layer: &LayerInfo) -> Result<Self, StreamError> {
        check_layer(layer, StreamDirection::HostToDevice)?;
        let max_payload_size = usize::from(params.max_payload_size);
        check_payload(max_payload_size)?;
        let sync_size = usize::from(params.sync_size);
        if params.is_sync_enabled {
            if params.frames_per_sync == 0 {
                return Err(invalid("frames_per_sync must be at least 1 when sync is enabled"));
            }
            check_sync_size(sync_size, max_payload_size)?;
        }
        Ok(Self {
            max_payload_size,
            use_dataflow_padding: params.use_dataflow_padding,
            is_sync_enabled: params.is_sync_enabled,
            frames_per_sync: params.frames_per_sync,
            sync_size,
            packets_per_frame: layer.frame_size.div_ceil(max_payload_size),
            buffers_threshold: params.buffers_threshold,
        })
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn use_dataflow_padding(&self) -> bool {
        self.use_dataflow_padding
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.is_sync_enabled
    }

    pub fn frames_per_sync(&self) -> u32 {
        self.frames_per_sync
    }

    pub fn sync_size(&self) -> usize {
        self.sync_size
    }

    /// 未携带标记时每帧的报文数。
    pub fn packets_per_frame(&self) -> usize {
        self.packets_per_frame
    }

    pub fn buffers_threshold(&self) -> u32 {
        self.buffers_threshold
    }
}

/// 校验后的输出流配置，创建后不可修改。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputStreamConfiguration {
    max_payload_size: usize,
    is_sync_enabled: bool,
    sync_size: usize,
    buffers_threshold: u32,
}

impl OutputStreamConfiguration {
    pub fn new(params: &EthOutputStreamParams, layer: &LayerInfo) -> Result<Self, StreamError> {
        check_layer(layer, StreamDirection::DeviceToHost)?;
        let max_payload_size = usize::from(params.max_payload_size);
        check_payload(max_payload_size)?;
        let sync_size = usize::from(params.sync_size);
        if params.is_sync_enabled {
            check_sync_size(sync_size, max_payload_size)?;
        }
        Ok(Self {
            max_payload_size,
            is_sync_enabled: params.is_sync_enabled,
            sync_size,
            buffers_threshold: params.buffers_threshold,
        })
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.is_sync_enabled
    }

    pub fn sync_size(&self) -> usize {
        self.sync_size
    }

    pub fn buffers_threshold(&self) -> u32 {
        self.buffers_threshold
    }
}

/// 校验协商负载是否能放进传输路径的报文上限。
pub(crate) fn check_datagram_limit(
    max_payload_size: usize,
    datagram_limit: usize,
) -> Result<(), StreamError> {
    if max_payload_size > datagram_limit {
        return Err(invalid(format!(
            "max_payload_size {max_payload_size} exceeds the transport datagram limit {datagram_limit}"
        )));
    }
    Ok(())
}
