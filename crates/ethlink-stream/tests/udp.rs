//! 通过真实 UDP 套接字创建流：设备端由一个普通的 Tokio `UdpSocket` 扮演。

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use ethlink_stream::{
    ActivationSignal, EthInputStream, EthInputStreamParams, EthOutputStream,
    EthOutputStreamParams, EthernetDevice, LayerInfo, RateLimiterPreference, StreamDirection,
    SyncMarker,
};
use ethlink_transport::{DatagramTransport, RateLimiterKind};
use tokio::{net::UdpSocket, time::timeout};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn host_any_port() -> SocketAddr {
    SocketAddr::new(LOOPBACK, 0)
}

async fn device_socket() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind(SocketAddr::new(LOOPBACK, 0))
        .await
        .expect("bind device socket");
    let port = socket.local_addr().expect("device addr").port();
    (socket, port)
}

#[tokio::test]
async fn input_stream_delivers_marked_payloads_to_the_device() {
    let (device_socket, device_port) = device_socket().await;
    let device = EthernetDevice::new("dev0", LOOPBACK);
    let layer = Arc::new(LayerInfo::new(
        "input0",
        StreamDirection::HostToDevice,
        1000,
        1,
    ));
    let params = EthInputStreamParams {
        host_address: host_any_port(),
        device_port,
        is_sync_enabled: true,
        max_payload_size: 512,
        rate_limit_bytes_per_sec: 10_000_000,
        rate_limiter: RateLimiterPreference::TokenBucket,
        timeout_ms: 2_000,
        ..EthInputStreamParams::default()
    };
    let mut input = EthInputStream::create(&device, layer, &params, ActivationSignal::activated())
        .await
        .expect("create input stream");
    assert_eq!(input.remote_port(), device_port);
    assert_eq!(input.rate_limiter_kind(), RateLimiterKind::TokenBucket);
    assert_eq!(input.timeout(), Duration::from_secs(2));
    input.activate(0, false).await.expect("activate");

    let frame: Vec<u8> = (0..1000).map(|i| (i % 200) as u8).collect();
    input.write(&frame).await.expect("write");

    let mut buf = [0u8; 1500];
    let first = timeout(Duration::from_secs(2), device_socket.recv(&mut buf))
        .await
        .expect("first payload in time")
        .expect("recv");
    assert_eq!(first, 512);
    assert_eq!(SyncMarker::decode(&buf[..first], 8), Some(SyncMarker::new(0)));
    assert_eq!(&buf[8..first], &frame[..504]);

    let second = timeout(Duration::from_secs(2), device_socket.recv(&mut buf))
        .await
        .expect("second payload in time")
        .expect("recv");
    assert_eq!(&buf[..second], &frame[504..]);
}

#[tokio::test]
async fn output_stream_reassembles_device_payloads() {
    let (device_socket, device_port) = device_socket().await;
    let device = EthernetDevice::new("dev0", LOOPBACK);
    let layer = Arc::new(LayerInfo::new(
        "output0",
        StreamDirection::DeviceToHost,
        600,
        1,
    ));
    let params = EthOutputStreamParams {
        host_address: host_any_port(),
        device_port,
        max_payload_size: 400,
        buffers_threshold: 16,
        timeout_ms: 2_000,
        ..EthOutputStreamParams::default()
    };
    let mut output =
        EthOutputStream::create(&device, layer, &params, ActivationSignal::activated())
            .await
            .expect("create output stream");
    output.activate(0, false).await.expect("activate");
    let host = output.transport().local_addr().expect("host addr");

    let frame: Vec<u8> = (0..600).map(|i| (i % 97) as u8).collect();
    device_socket
        .send_to(&frame[..400], host)
        .await
        .expect("send head");
    device_socket
        .send_to(&frame[400..], host)
        .await
        .expect("send tail");

    let mut received = vec![0u8; 600];
    output.read(&mut received).await.expect("read");
    assert_eq!(received, frame);
}

#[tokio::test]
async fn create_rejects_layers_of_the_wrong_direction() {
    let device = EthernetDevice::new("dev0", LOOPBACK);
    let layer = Arc::new(LayerInfo::new(
        "output0",
        StreamDirection::DeviceToHost,
        64,
        1,
    ));
    let params = EthInputStreamParams {
        host_address: host_any_port(),
        device_port: 9,
        ..EthInputStreamParams::default()
    };
    let err = EthInputStream::create(&device, layer, &params, ActivationSignal::activated())
        .await
        .expect_err("wrong direction");
    assert_eq!(err.code(), "ethlink.stream.invalid_configuration");
}
