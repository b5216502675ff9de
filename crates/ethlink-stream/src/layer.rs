use serde::{Deserialize, Serialize};

/// 数据流向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamDirection {
    /// 主机写入设备（输入流）。
    HostToDevice,
    /// 设备输出到主机（输出流）。
    DeviceToHost,
}

/// 一条逻辑边的不可变描述，由模型配置层给出。
///
/// # 契约（What）
/// - `frame_size`：一次 `write`/`read` 交换的字节数，必须大于零；
/// - `max_batch_size`：激活时允许的最大动态批大小，同时作为批大小 `0` 的默认值。
///
/// 流通过 `Arc<LayerInfo>` 持有它，生命周期与流一致。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub direction: StreamDirection,
    pub frame_size: usize,
    pub max_batch_size: u16,
}

impl LayerInfo {
    pub fn new(
        name: impl Into<String>,
        direction: StreamDirection,
        frame_size: usize,
        max_batch_size: u16,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            frame_size,
            max_batch_size,
        }
    }
}
