//! 以太网输入流：主机到设备。
//!
//! # 模块定位（Why）
//! - 应用以整帧为单位写入，设备以不超过 `max_payload_size` 的 UDP 报文接收；
//! - 写路径负责拆帧、按需插入同步标记、逐包限流以及部分发送的续传。
//!
//! # 写路径（How）
//! 1. 帧计数为 `frames_per_sync` 的整数倍时，帧首报文以 [`SyncMarker`] 开头，随后同步序号回绕递增；
//! 2. 每个报文在发送前经过 [`RateLimiter`]，等待可被 `abort()`/`deactivate()` 打断；
//! 3. 传输只接受部分字节时继续发送剩余部分；零字节视为传输失败；
//! 4. 启用数据流补齐时，帧末报文补零到 `max_payload_size`。

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use ethlink_transport::{
    DatagramTransport, RateLimiter, RateLimiterKind, TrafficShaper, TransportError,
};
use ethlink_transport_udp::{TcShaper, UdpTransport, UdpTransportOptions};
use tracing::{debug, info, trace};

use crate::{
    config::{
        DEFAULT_TIMEOUT, EthInputStreamParams, InputStreamConfiguration, check_datagram_limit,
    },
    device::{ActivationSignal, Device},
    error::StreamError,
    layer::{LayerInfo, StreamDirection},
    lifecycle::{ActivationState, StreamHandle, StreamLifecycle, resolve_batch_size},
    rate_limit::select_rate_limiter,
    sync::SyncMarker,
};

/// 主机到设备的帧流。
pub struct EthInputStream<T: DatagramTransport = UdpTransport> {
    transport: T,
    layer: Arc<LayerInfo>,
    configuration: InputStreamConfiguration,
    rate_limiter: Box<dyn RateLimiter>,
    activation_signal: ActivationSignal,
    lifecycle: Arc<StreamLifecycle>,
    timeout: Duration,
    batch_size: u16,
    frame_counter: u64,
    sync_index: u32,
    payload: BytesMut,
}

impl EthInputStream<UdpTransport> {
    /// 绑定 UDP 套接字、连接设备端口并选择限流器。
    ///
    /// 整形设施使用系统 `tc`；需要替换时使用 [`EthInputStream::create_with_shaper`]。
    pub async fn create(
        device: &dyn Device,
        layer: Arc<LayerInfo>,
        params: &EthInputStreamParams,
        activation_signal: ActivationSignal,
    ) -> Result<Self, StreamError> {
        Self::create_with_shaper(
            device,
            layer,
            params,
            activation_signal,
            Arc::new(TcShaper::system()),
        )
        .await
    }

    pub async fn create_with_shaper(
        device: &dyn Device,
        layer: Arc<LayerInfo>,
        params: &EthInputStreamParams,
        activation_signal: ActivationSignal,
        shaper: Arc<dyn TrafficShaper>,
    ) -> Result<Self, StreamError> {
        let configuration = InputStreamConfiguration::new(params, &layer)?;
        let remote = SocketAddr::new(device.address(), params.device_port);
        let mut options =
            UdpTransportOptions::default().with_max_payload_size(configuration.max_payload_size());
        if configuration.buffers_threshold() > 0 {
            options = options.with_send_buffer_size(
                configuration.buffers_threshold() as usize * configuration.max_payload_size(),
            );
        }
        let transport =
            UdpTransport::connect_with_options(params.host_address, remote, options).await?;
        let local = transport.local_addr()?;
        let rate_limiter = select_rate_limiter(
            params.rate_limiter,
            params.rate_limit_bytes_per_sec,
            local.ip(),
            transport.remote_port(),
            shaper,
        )?;

        let mut stream =
            Self::from_parts(transport, layer, configuration, rate_limiter, activation_signal)?;
        stream.set_timeout(params.timeout());
        info!(
            stream = %stream.layer.name,
            device = device.device_id(),
            %local,
            %remote,
            "input stream created"
        );
        Ok(stream)
    }
}

impl<T: DatagramTransport> EthInputStream<T> {
    /// 以注入的协作者组装输入流，流处于 `Inactive`。
    ///
    /// # 错误
    /// - 层方向不是主机到设备，或配置的负载超过传输路径的报文上限：[`StreamError::InvalidConfiguration`]。
    pub fn from_parts(
        transport: T,
        layer: Arc<LayerInfo>,
        configuration: InputStreamConfiguration,
        rate_limiter: Box<dyn RateLimiter>,
        activation_signal: ActivationSignal,
    ) -> Result<Self, StreamError> {
        if layer.direction != StreamDirection::HostToDevice {
            return Err(StreamError::InvalidConfiguration(format!(
                "input stream requires a host-to-device layer, `{}` is {:?}",
                layer.name, layer.direction
            )));
        }
        check_datagram_limit(configuration.max_payload_size(), transport.max_payload_size())?;
        debug!(
            stream = %layer.name,
            frame_size = layer.frame_size,
            max_payload_size = configuration.max_payload_size(),
            packets_per_frame = configuration.packets_per_frame(),
            sync = configuration.is_sync_enabled(),
            frames_per_sync = configuration.frames_per_sync(),
            padding = configuration.use_dataflow_padding(),
            limiter = %rate_limiter.kind(),
            "input stream configured"
        );
        Ok(Self {
            lifecycle: Arc::new(StreamLifecycle::new(layer.name.clone())),
            payload: BytesMut::with_capacity(configuration.max_payload_size()),
            batch_size: layer.max_batch_size,
            transport,
            layer,
            configuration,
            rate_limiter,
            activation_signal,
            timeout: DEFAULT_TIMEOUT,
            frame_counter: 0,
            sync_index: 0,
        })
    }

    /// 写入一整帧；返回时全部报文已交给传输层。
    ///
    /// # 错误
    /// - 帧长度不等于 `frame_size`：[`StreamError::InvalidFrameSize`]；
    /// - 流未激活或被中止：[`StreamError::NotActivated`] / [`StreamError::Aborted`]；
    /// - 发送超时或失败：[`StreamError::Timeout`] / [`StreamError::Transport`]。
    pub async fn write(&mut self, frame: &[u8]) -> Result<(), StreamError> {
        if frame.len() != self.layer.frame_size {
            return Err(StreamError::InvalidFrameSize {
                expected: self.layer.frame_size,
                actual: frame.len(),
            });
        }
        self.lifecycle.ensure_active()?;

        let max_payload_size = self.configuration.max_payload_size();
        let sync_size = self.configuration.sync_size();
        let mut marker = self.next_marker();
        let mut offset = 0;
        while offset < frame.len() {
            self.payload.clear();
            let mut room = max_payload_size;
            if let Some(marker) = marker.take() {
                marker.encode(&mut self.payload, sync_size);
                room -= sync_size;
                trace!(stream = %self.layer.name, sync_index = marker.index(), "sync marker attached");
            }
            let end = (offset + room).min(frame.len());
            self.payload.extend_from_slice(&frame[offset..end]);
            offset = end;
            if offset == frame.len() && self.configuration.use_dataflow_padding() {
                self.payload.resize(max_payload_size, 0);
            }

            self.throttle(self.payload.len()).await?;
            send_payload(
                &self.transport,
                &self.lifecycle,
                &self.payload,
                self.timeout,
                &self.layer.name,
            )
            .await?;
        }
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Ok(())
    }

    /// 输入流不缓存不足一个报文的余量，因此无事可做；可重复调用。
    pub async fn flush(&mut self) -> Result<(), StreamError> {
        trace!(stream = %self.layer.name, "flush");
        Ok(())
    }

    /// 本帧是否携带同步标记；携带时推进同步序号。
    fn next_marker(&mut self) -> Option<SyncMarker> {
        if !self.configuration.is_sync_enabled()
            || self.frame_counter % u64::from(self.configuration.frames_per_sync()) != 0
        {
            return None;
        }
        let marker = SyncMarker::new(self.sync_index);
        self.sync_index = SyncMarker::successor(self.sync_index);
        Some(marker)
    }

    /// 等待限流器放行 `payload_len` 字节。
    async fn throttle(&mut self, payload_len: usize) -> Result<(), StreamError> {
        loop {
            let wait = self.rate_limiter.reserve(payload_len)?;
            if wait.is_zero() {
                return Ok(());
            }
            trace!(stream = %self.layer.name, payload_len, ?wait, "throttled");
            self.lifecycle
                .interruptible(async {
                    tokio::time::sleep(wait).await;
                    Ok(())
                })
                .await?;
        }
    }

    /// 等待设备计算图激活后进入 `Active`。
    ///
    /// - `dynamic_batch_size` 为 `0` 时取层的最大批大小，超过上限返回配置错误；
    /// - `resume_pending_transfers` 为假时，帧计数与同步序号归零。
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
            self.frame_counter = 0;
            self.sync_index = 0;
        }
        self.batch_size = batch_size;
        debug!(
            stream = %self.layer.name,
            batch_size,
            resume_pending_transfers,
            "input stream activation parameters"
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

    /// 供其他任务中止或去激活本流。
    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(Arc::clone(&self.lifecycle))
    }

    pub fn state(&self) -> ActivationState {
        self.lifecycle.state()
    }

    /// 设置单个报文的发送超时。
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

    pub fn configuration(&self) -> &InputStreamConfiguration {
        &self.configuration
    }

    pub fn rate_limiter_kind(&self) -> RateLimiterKind {
        self.rate_limiter.kind()
    }

    /// 最近一次激活使用的批大小。
    pub fn batch_size(&self) -> u16 {
        self.batch_size
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// 发送一个报文，部分发送时续传剩余字节。
///
/// 只借用字段而非整个流：限流器只保证 `Send`，流本身不是 `Sync`。
async fn send_payload<T: DatagramTransport>(
    transport: &T,
    lifecycle: &StreamLifecycle,
    payload: &[u8],
    timeout: Duration,
    stream: &str,
) -> Result<(), StreamError> {
    let mut sent = 0;
    while sent < payload.len() {
        let remaining = &payload[sent..];
        let accepted = lifecycle
            .interruptible(async {
                transport
                    .send(remaining, timeout)
                    .await
                    .map_err(StreamError::from)
            })
            .await?;
        if accepted == 0 {
            return Err(StreamError::Transport(TransportError::Io {
                operation: "send",
                source: io::Error::from(io::ErrorKind::WriteZero),
            }));
        }
        if accepted < remaining.len() {
            trace!(
                stream,
                accepted,
                remaining = remaining.len() - accepted,
                "partial send, retrying remainder"
            );
        }
        sent += accepted.min(remaining.len());
    }
    trace!(stream, payload_len = payload.len(), "payload sent");
    Ok(())
}

impl<T: DatagramTransport> std::fmt::Debug for EthInputStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthInputStream")
            .field("layer", &self.layer.name)
            .field("state", &self.lifecycle.state())
            .field("configuration", &self.configuration)
            .field("rate_limiter", &self.rate_limiter.kind())
            .field("frame_counter", &self.frame_counter)
            .field("sync_index", &self.sync_index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EthInputStreamParams, rate_limit::UnlimitedRate};
    use ethlink_transport::memory::{MemoryTransport, memory_pair};

    fn stream(
        frame_size: usize,
        params: EthInputStreamParams,
    ) -> (EthInputStream<MemoryTransport>, MemoryTransport) {
        let layer = Arc::new(LayerInfo::new(
            "input0",
            StreamDirection::HostToDevice,
            frame_size,
            4,
        ));
        let configuration = InputStreamConfiguration::new(&params, &layer).expect("config");
        let (host, device) = memory_pair(usize::from(params.max_payload_size));
        let stream = EthInputStream::from_parts(
            host,
            layer,
            configuration,
            Box::new(UnlimitedRate),
            ActivationSignal::activated(),
        )
        .expect("stream");
        (stream, device)
    }

    #[tokio::test]
    async fn write_requires_exact_frame_size_and_activation() {
        let (mut stream, _device) = stream(100, EthInputStreamParams::default());
        let err = stream.write(&[0; 99]).await.expect_err("short frame");
        assert!(matches!(
            err,
            StreamError::InvalidFrameSize {
                expected: 100,
                actual: 99
            }
        ));
        let err = stream.write(&[0; 100]).await.expect_err("inactive");
        assert!(matches!(err, StreamError::NotActivated));
    }

    #[tokio::test]
    async fn markers_follow_frames_per_sync() {
        let params = EthInputStreamParams {
            is_sync_enabled: true,
            frames_per_sync: 3,
            sync_size: 16,
            max_payload_size: 64,
            ..EthInputStreamParams::default()
        };
        let (mut stream, _device) = stream(100, params);
        stream.activate(0, false).await.expect("activate");
        for _ in 0..4 {
            stream.write(&[0xAB; 100]).await.expect("write");
        }
        let sent = stream.transport().sent_datagrams();
        let markers: Vec<u32> = sent
            .iter()
            .filter_map(|payload| SyncMarker::decode(payload, 16).map(|marker| marker.index()))
            .collect();
        assert_eq!(markers, vec![0, 1]);
        // 帧 0：16 字节标记 + 48 字节数据，余下 52 字节；帧 1：64 + 36。
        let lengths: Vec<usize> = sent.iter().map(Vec::len).collect();
        assert_eq!(lengths[..4], [64, 52, 64, 36]);
    }

    #[tokio::test]
    async fn reactivation_without_resume_restarts_sync_index() {
        let params = EthInputStreamParams {
            is_sync_enabled: true,
            frames_per_sync: 1,
            max_payload_size: 32,
            ..EthInputStreamParams::default()
        };
        let (mut stream, _device) = stream(16, params);
        stream.activate(0, false).await.expect("activate");
        stream.write(&[1; 16]).await.expect("write");
        stream.write(&[2; 16]).await.expect("write");
        stream.deactivate();
        stream.activate(2, true).await.expect("resume");
        stream.write(&[3; 16]).await.expect("write");
        stream.deactivate();
        stream.activate(0, false).await.expect("restart");
        stream.write(&[4; 16]).await.expect("write");

        let indices: Vec<u32> = stream
            .transport()
            .sent_datagrams()
            .iter()
            .filter_map(|payload| SyncMarker::decode(payload, 8).map(|marker| marker.index()))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);
    }
}
