//! 集成测试共用的流装配函数：输入流与输出流分别挂在同一对内存端点的两端。
#![allow(dead_code)]

use std::sync::Arc;

use ethlink_stream::{
    ActivationSignal, EthInputStream, EthInputStreamParams, EthOutputStream,
    EthOutputStreamParams, InputStreamConfiguration, LayerInfo, OutputStreamConfiguration,
    StreamDirection, UnlimitedRate,
};
use ethlink_transport::{
    RateLimiter,
    memory::{MemoryTransport, memory_pair},
};

pub fn input_layer(frame_size: usize) -> Arc<LayerInfo> {
    Arc::new(LayerInfo::new(
        "input0",
        StreamDirection::HostToDevice,
        frame_size,
        8,
    ))
}

pub fn output_layer(frame_size: usize) -> Arc<LayerInfo> {
    Arc::new(LayerInfo::new(
        "output0",
        StreamDirection::DeviceToHost,
        frame_size,
        8,
    ))
}

pub fn input_on(
    transport: MemoryTransport,
    frame_size: usize,
    params: &EthInputStreamParams,
    rate_limiter: Box<dyn RateLimiter>,
) -> EthInputStream<MemoryTransport> {
    let layer = input_layer(frame_size);
    let configuration = InputStreamConfiguration::new(params, &layer).expect("input config");
    EthInputStream::from_parts(
        transport,
        layer,
        configuration,
        rate_limiter,
        ActivationSignal::activated(),
    )
    .expect("input stream")
}

pub fn output_on(
    transport: MemoryTransport,
    frame_size: usize,
    params: &EthOutputStreamParams,
) -> EthOutputStream<MemoryTransport> {
    let layer = output_layer(frame_size);
    let configuration = OutputStreamConfiguration::new(params, &layer).expect("output config");
    EthOutputStream::from_parts(transport, layer, configuration, ActivationSignal::activated())
        .expect("output stream")
}

/// 未限流的输入流，返回值第二项是设备侧端点。
pub fn input_stream(
    frame_size: usize,
    params: &EthInputStreamParams,
) -> (EthInputStream<MemoryTransport>, MemoryTransport) {
    let (host, device) = memory_pair(usize::from(params.max_payload_size));
    (
        input_on(host, frame_size, params, Box::new(UnlimitedRate)),
        device,
    )
}

/// 输出流；测试通过 `stream.transport().inject(..)` 模拟设备发出的报文。
pub fn output_stream(
    frame_size: usize,
    params: &EthOutputStreamParams,
) -> (EthOutputStream<MemoryTransport>, MemoryTransport) {
    let (host, device) = memory_pair(usize::from(params.max_payload_size));
    (output_on(host, frame_size, params), device)
}

/// 首尾相接的一对流：输入流发出的报文由输出流接收。
pub fn linked_streams(
    frame_size: usize,
    input: &EthInputStreamParams,
    output: &EthOutputStreamParams,
) -> (EthInputStream<MemoryTransport>, EthOutputStream<MemoryTransport>) {
    let (host, device) = memory_pair(usize::from(input.max_payload_size));
    (
        input_on(host, frame_size, input, Box::new(UnlimitedRate)),
        output_on(device, frame_size, output),
    )
}

/// 按种子生成的确定性帧内容。
pub fn frame_pattern(frame_size: usize, seed: u8) -> Vec<u8> {
    (0..frame_size)
        .map(|i| (i % 251) as u8 ^ seed.wrapping_mul(3))
        .collect()
}
