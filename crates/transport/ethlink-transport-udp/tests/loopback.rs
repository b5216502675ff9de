//! `UdpTransport` 在回环地址上的端到端收发验证。
//!
//! - **Why**：流层的全部行为都建立在“一次 send 等于一个报文、receive 按超时返回”这一契约上；
//! - **How**：以 Tokio `UdpSocket` 扮演设备端，与 `UdpTransport` 在 127.0.0.1 上互发报文。

use std::{net::SocketAddr, time::Duration};

use ethlink_transport::{DatagramTransport, TransportError};
use ethlink_transport_udp::{UdpTransport, UdpTransportOptions};
use tokio::net::UdpSocket;

const TIMEOUT: Duration = Duration::from_millis(500);

async fn connected_pair() -> (UdpTransport, UdpSocket) {
    let device = UdpSocket::bind("127.0.0.1:0").await.expect("bind device");
    let local: SocketAddr = "127.0.0.1:0".parse().expect("parse addr");
    let host = UdpTransport::connect_with_options(
        local,
        device.local_addr().expect("device addr"),
        UdpTransportOptions::default().with_recv_buffer_size(256 * 1024),
    )
    .await
    .expect("connect host");
    device
        .connect(host.local_addr().expect("host addr"))
        .await
        .expect("connect device");
    (host, device)
}

#[tokio::test(flavor = "multi_thread")]
async fn datagrams_keep_boundaries_in_both_directions() {
    let (host, device) = connected_pair().await;

    assert_eq!(host.send(&[7u8; 1472], TIMEOUT).await.expect("send"), 1472);
    assert_eq!(host.send(&[9u8; 10], TIMEOUT).await.expect("send"), 10);
    let mut buf = [0u8; 2048];
    assert_eq!(device.recv(&mut buf).await.expect("device recv"), 1472);
    assert_eq!(device.recv(&mut buf).await.expect("device recv"), 10);
    assert_eq!(&buf[..10], &[9u8; 10]);

    device.send(b"frame-slice").await.expect("device send");
    let n = host.receive(&mut buf, TIMEOUT).await.expect("host receive");
    assert_eq!(&buf[..n], b"frame-slice");
    assert_eq!(host.remote_port(), device.local_addr().expect("addr").port());
}

#[tokio::test(flavor = "multi_thread")]
async fn receive_reports_timeout_when_device_is_silent() {
    let (host, _device) = connected_pair().await;
    let mut buf = [0u8; 64];
    let err = host
        .receive(&mut buf, Duration::from_millis(30))
        .await
        .expect_err("nothing was sent");
    assert!(matches!(err, TransportError::Timeout { operation: "receive", .. }));
}
