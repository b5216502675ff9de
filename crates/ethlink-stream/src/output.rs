//! 以太网输出流：设备到主机。
//!
//! # 模块定位（Why）
//! - 设备以 UDP 报文送出结果，报文可能丢失；应用需要逐帧读取且绝不能拿到拼错位置的数据；
//! - 读路径负责重组帧、剥离同步标记、在丢包后重新对齐。
//!
//! # 读路径（How）
//! 1. 处于寻同步状态（上次读取在半帧时超时）时先执行 [`EthOutputStream::align_to_sync`]：
//!    丢弃余量与所有报文，直到收到以标记开头的报文，其数据成为余量即新帧的开头；
//! 2. 先消费上次读取留下的余量；
//! 3. 持续接收直至帧满。标记只可能出现在帧首：帧内尚无数据时到达的报文若以标记开头，
//!    剥离标记并与期望序号比对，缺口只告警计数、不打断重组；帧中间的报文一律按数据处理，
//!    即使其开头恰好是标记字节；
//! 4. 超出帧尾的字节保存为余量，余量始终小于一个报文。
//!
//! 超时丢弃半帧并返回 [`StreamError::Timeout`]；启用同步且已有半帧时进入寻同步状态。缺失的数据从不以零填充。

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{Buf, BytesMut};
use ethlink_transport::DatagramTransport;
use ethlink_transport_udp::{UdpTransport, UdpTransportOptions};
use tracing::{debug, info, trace, warn};

use crate::{
    config::{
        DEFAULT_TIMEOUT, EthOutputStreamParams, OutputStreamConfiguration, check_datagram_limit,
    },
    device::{ActivationSignal, Device},
    error::StreamError,
    layer::{LayerInfo, StreamDirection},
    lifecycle::{ActivationState, StreamHandle, StreamLifecycle, resolve_batch_size},
    sync::{NO_SYNC_OBSERVED, SyncMarker},
};

/// 读路径的累计统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputStreamStats {
    /// 观测到的同步序号缺口次数。
    pub sync_gaps: u64,
    /// 寻同步后重新对齐的次数。
    pub resyncs: u64,
    /// 寻同步期间丢弃的报文数。
    pub discarded_payloads: u64,
    /// 因接收超时而丢弃的半帧数。
    pub discarded_frames: u64,
    /// 当前余量字节数。
    pub leftover_size: usize,
}

/// 设备到主机的帧流。
pub struct EthOutputStream<T: DatagramTransport = UdpTransport> {
    transport: T,
    layer: Arc<LayerInfo>,
    configuration: OutputStreamConfiguration,
    activation_signal: ActivationSignal,
    lifecycle: Arc<StreamLifecycle>,
    timeout: Duration,
    batch_size: u16,
    scratch: BytesMut,
    leftover: BytesMut,
    last_seen_sync_index: u32,
    encountered_timeout: bool,
    stats: OutputStreamStats,
}

impl EthOutputStream<UdpTransport> {
    /// 绑定 UDP 套接字并连接设备端口。
    pub async fn create(
        device: &dyn Device,
        layer: Arc<LayerInfo>,
        params: &EthOutputStreamParams,
        activation_signal: ActivationSignal,
    ) -> Result<Self, StreamError> {
        let configuration = OutputStreamConfiguration::new(params, &layer)?;
        let remote = SocketAddr::new(device.address(), params.device_port);
        let mut options =
            UdpTransportOptions::default().with_max_payload_size(configuration.max_payload_size());
        if configuration.buffers_threshold() > 0 {
            options = options.with_recv_buffer_size(
                configuration.buffers_threshold() as usize * configuration.max_payload_size(),
            );
        }
        let transport =
            UdpTransport::connect_with_options(params.host_address, remote, options).await?;
        let local = transport.local_addr()?;

        let mut stream = Self::from_parts(transport, layer, configuration, activation_signal)?;
        stream.set_timeout(params.timeout());
        info!(
            stream = %stream.layer.name,
            device = device.device_id(),
            %local,
            %remote,
            "output stream created"
        );
        Ok(stream)
    }
}

impl<T: DatagramTransport> EthOutputStream<T> {
    /// 以注入的传输组装输出流，流处于 `Inactive`。
    pub fn from_parts(
        transport: T,
        layer: Arc<LayerInfo>,
        configuration: OutputStreamConfiguration,
        activation_signal: ActivationSignal,
    ) -> Result<Self, StreamError> {
        if layer.direction != StreamDirection::DeviceToHost {
            return Err(StreamError::InvalidConfiguration(format!(
                "output stream requires a device-to-host layer, `{}` is {:?}",
                layer.name, layer.direction
            )));
        }
        check_datagram_limit(configuration.max_payload_size(), transport.max_payload_size())?;
        debug!(
            stream = %layer.name,
            frame_size = layer.frame_size,
            max_payload_size = configuration.max_payload_size(),
            sync = configuration.is_sync_enabled(),
            sync_size = configuration.sync_size(),
            "output stream configured"
        );
        Ok(Self {
            lifecycle: Arc::new(StreamLifecycle::new(layer.name.clone())),
            scratch: BytesMut::zeroed(configuration.max_payload_size()),
            leftover: BytesMut::with_capacity(configuration.max_payload_size()),
            batch_size: layer.max_batch_size,
            transport,
            layer,
            configuration,
            activation_signal,
            timeout: DEFAULT_TIMEOUT,
            last_seen_sync_index: NO_SYNC_OBSERVED,
            encountered_timeout: false,
            stats: OutputStreamStats::default(),
        })
    }

    /// 读取一整帧到 `frame`。
    ///
    /// # 错误
    /// - 缓冲长度不等于 `frame_size`：[`StreamError::InvalidFrameSize`]；
    /// - 流未激活或被中止：[`StreamError::NotActivated`] / [`StreamError::Aborted`]；
    /// - 接收超时：[`StreamError::Timeout`]，已拼接的半帧被丢弃。
    ///
    /// 出错时 `frame` 的内容未定义。
    pub async fn read(&mut self, frame: &mut [u8]) -> Result<(), StreamError> {
        if frame.len() != self.layer.frame_size {
            return Err(StreamError::InvalidFrameSize {
                expected: self.layer.frame_size,
                actual: frame.len(),
            });
        }
        self.lifecycle.ensure_active()?;

        // 对齐时采用的标记就是本帧帧首，即使其后没有数据。
        let aligned = self.encountered_timeout;
        if aligned {
            self.align_to_sync().await?;
        }
        let mut filled = self.leftover.len().min(frame.len());
        frame[..filled].copy_from_slice(&self.leftover[..filled]);
        self.leftover.advance(filled);
        let mut frame_started = aligned || filled > 0;

        while filled < frame.len() {
            let len = match self.receive().await {
                Ok(len) => len,
                Err(err) => {
                    self.on_receive_error(&err, filled);
                    return Err(err);
                }
            };
            let mut start = 0;
            if self.is_sync_expected(frame_started) {
                let sync_size = self.configuration.sync_size();
                if let Some(marker) = SyncMarker::decode(&self.scratch[..len], sync_size) {
                    self.observe_marker(marker.index());
                    start = sync_size;
                }
            }
            filled += self.place(frame, filled, start, len);
            frame_started = true;
        }
        debug_assert!(self.leftover.len() < self.configuration.max_payload_size());
        Ok(())
    }

    /// 与设备的同步序列对齐：丢弃余量与非标记报文，直到某个报文以标记开头，返回该标记的序号。
    ///
    /// 标记之后的数据成为余量，下一次 [`read`](Self::read) 从它开始组帧；采用的序号不计入缺口。
    /// 读路径在半帧超时后自动调用；调用方也可以在激活后主动调用，跳过设备在对齐前已发出的半截帧。
    ///
    /// # 错误
    /// - 未启用同步：[`StreamError::InvalidConfiguration`]；
    /// - 流未激活或被中止：[`StreamError::NotActivated`] / [`StreamError::Aborted`]；
    /// - 接收超时：[`StreamError::Timeout`]，寻同步状态保持不变。
    pub async fn align_to_sync(&mut self) -> Result<u32, StreamError> {
        if !self.configuration.is_sync_enabled() {
            return Err(StreamError::InvalidConfiguration(format!(
                "stream `{}` has sync disabled, there is no marker to align to",
                self.layer.name
            )));
        }
        self.lifecycle.ensure_active()?;
        if !self.leftover.is_empty() {
            trace!(stream = %self.layer.name, discarded = self.leftover.len(), "dropping leftover while hunting for sync");
            self.leftover.clear();
        }
        let sync_size = self.configuration.sync_size();
        loop {
            let len = self.receive().await?;
            let Some(marker) = SyncMarker::decode(&self.scratch[..len], sync_size) else {
                self.stats.discarded_payloads += 1;
                trace!(stream = %self.layer.name, payload_len = len, "discarding payload while hunting for sync");
                continue;
            };
            self.last_seen_sync_index = marker.index();
            self.encountered_timeout = false;
            self.stats.resyncs += 1;
            self.leftover.extend_from_slice(&self.scratch[sync_size..len]);
            info!(
                stream = %self.layer.name,
                sync_index = marker.index(),
                discarded_payloads = self.stats.discarded_payloads,
                "resynchronized on sync marker"
            );
            return Ok(marker.index());
        }
    }

    /// 标记只在帧首出现：帧已开始时，下一个报文必然是数据。
    fn is_sync_expected(&self, frame_started: bool) -> bool {
        self.configuration.is_sync_enabled() && !frame_started
    }

    /// 把 `scratch[start..len]` 拷入 `frame[filled..]`，放不下的部分成为余量。返回拷入的字节数。
    fn place(&mut self, frame: &mut [u8], filled: usize, start: usize, len: usize) -> usize {
        let data = &self.scratch[start..len];
        let take = data.len().min(frame.len() - filled);
        frame[filled..filled + take].copy_from_slice(&data[..take]);
        if take < data.len() {
            self.leftover.extend_from_slice(&data[take..]);
        }
        trace!(stream = %self.layer.name, payload_len = len, placed = take, "payload received");
        take
    }

    /// 比对标记序号与期望值；缺口只记录，不打断重组。
    fn observe_marker(&mut self, index: u32) {
        let expected = SyncMarker::successor(self.last_seen_sync_index);
        if index != expected {
            self.stats.sync_gaps += 1;
            warn!(
                stream = %self.layer.name,
                expected,
                observed = index,
                "sync index gap, payloads were lost"
            );
        }
        self.last_seen_sync_index = index;
    }

    fn on_receive_error(&mut self, err: &StreamError, filled: usize) {
        if !err.is_timeout() || filled == 0 {
            return;
        }
        self.stats.discarded_frames += 1;
        if self.configuration.is_sync_enabled() {
            self.encountered_timeout = true;
        }
        warn!(
            stream = %self.layer.name,
            discarded = filled,
            hunting = self.encountered_timeout,
            "receive timed out mid-frame, discarding partial frame"
        );
    }

    async fn receive(&mut self) -> Result<usize, StreamError> {
        receive_payload(
            &self.transport,
            &self.lifecycle,
            &mut self.scratch[..],
            self.timeout,
        )
        .await
    }

    /// 等待设备计算图激活后进入 `Active`。
    ///
    /// `resume_pending_transfers` 为假时清空余量、序号哨兵与寻同步状态。
    pub async fn activate(
        &mut self,
        dynamic_batch_size: u16,
        resume_pending_transfers: bool,
    ) -> Result<(), StreamError> {
        if self.lifecycle.state() == ActivationState::Active {
            return Err(StreamError::AlreadyActivated);
        }
        let batch_size = resolve_batch_size(&self.layer, dynamic_batch_size)?;
        self.activation_signal.wait(self.timeout).await?;
        self.lifecycle.mark_activated()?;
        if !resume_pending_transfers {
            self.leftover.clear();
            self.last_seen_sync_index = NO_SYNC_OBSERVED;
            self.encountered_timeout = false;
        }
        self.batch_size = batch_size;
        debug!(
            stream = %self.layer.name,
            batch_size,
            resume_pending_transfers,
            "output stream activation parameters"
        );
        Ok(())
    }

    pub fn deactivate(&self) {
        self.lifecycle.deactivate();
    }

    pub fn abort(&self) {
        self.lifecycle.abort();
    }

    pub fn clear_abort(&self) {
        self.lifecycle.clear_abort();
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(Arc::clone(&self.lifecycle))
    }

    pub fn state(&self) -> ActivationState {
        self.lifecycle.state()
    }

    /// 设置单个报文的接收超时。
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn remote_port(&self) -> u16 {
        self.transport.remote_port()
    }

    pub fn layer_info(&self) -> &Arc<LayerInfo> {
        &self.layer
    }

    pub fn configuration(&self) -> &OutputStreamConfiguration {
        &self.configuration
    }

    pub fn batch_size(&self) -> u16 {
        self.batch_size
    }

    /// 是否处于寻同步状态。
    pub fn is_hunting_for_sync(&self) -> bool {
        self.encountered_timeout
    }

    /// 最近观测到的同步序号；尚未观测到时为 [`NO_SYNC_OBSERVED`]。
    pub fn last_seen_sync_index(&self) -> u32 {
        self.last_seen_sync_index
    }

    pub fn stats(&self) -> OutputStreamStats {
        OutputStreamStats {
            leftover_size: self.leftover.len(),
            ..self.stats
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

async fn receive_payload<T: DatagramTransport>(
    transport: &T,
    lifecycle: &StreamLifecycle,
    scratch: &mut [u8],
    timeout: Duration,
) -> Result<usize, StreamError> {
    lifecycle
        .interruptible(async {
            transport
                .receive(scratch, timeout)
                .await
                .map_err(StreamError::from)
        })
        .await
}

impl<T: DatagramTransport> std::fmt::Debug for EthOutputStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthOutputStream")
            .field("layer", &self.layer.name)
            .field("state", &self.lifecycle.state())
            .field("configuration", &self.configuration)
            .field("last_seen_sync_index", &self.last_seen_sync_index)
            .field("encountered_timeout", &self.encountered_timeout)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
