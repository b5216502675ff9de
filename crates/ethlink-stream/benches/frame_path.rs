use bytes::BytesMut;
use criterion::{Criterion, black_box};
use ethlink_stream::{
    ActivationSignal, EthInputStream, EthInputStreamParams, EthOutputStream,
    EthOutputStreamParams, InputStreamConfiguration, LayerInfo, OutputStreamConfiguration,
    StreamDirection, SyncMarker, UnlimitedRate,
};
use ethlink_transport::memory::memory_pair;
use std::{env, sync::Arc, time::Duration};

const FRAME_SIZE: usize = 64 * 1024;

/// 同步标记的编码与识别成本：每个帧首报文各发生一次。
fn bench_sync_marker(c: &mut Criterion) {
    let mut buf = BytesMut::with_capacity(64);
    c.bench_function("sync_marker_encode_decode", |b| {
        b.iter(|| {
            buf.clear();
            SyncMarker::new(black_box(42)).encode(&mut buf, 16);
            black_box(SyncMarker::decode(&buf, 16))
        });
    });
}

/// 一帧经内存通道的完整往返：拆帧、插入标记、重组并剥离标记。
///
/// 使用内存通道排除套接字开销，只衡量流层自身的切片与拷贝。
fn bench_frame_round_trip(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");

    let input_params = EthInputStreamParams {
        is_sync_enabled: true,
        frames_per_sync: 1,
        ..EthInputStreamParams::default()
    };
    let output_params = EthOutputStreamParams {
        is_sync_enabled: true,
        ..EthOutputStreamParams::default()
    };
    let input_layer = Arc::new(LayerInfo::new(
        "input0",
        StreamDirection::HostToDevice,
        FRAME_SIZE,
        1,
    ));
    let output_layer = Arc::new(LayerInfo::new(
        "output0",
        StreamDirection::DeviceToHost,
        FRAME_SIZE,
        1,
    ));
    let (host, device) = memory_pair(usize::from(input_params.max_payload_size));
    let mut input = EthInputStream::from_parts(
        host,
        Arc::clone(&input_layer),
        InputStreamConfiguration::new(&input_params, &input_layer).expect("input config"),
        Box::new(UnlimitedRate),
        ActivationSignal::activated(),
    )
    .expect("input stream");
    let mut output = EthOutputStream::from_parts(
        device,
        Arc::clone(&output_layer),
        OutputStreamConfiguration::new(&output_params, &output_layer).expect("output config"),
        ActivationSignal::activated(),
    )
    .expect("output stream");

    let frame: Vec<u8> = (0..FRAME_SIZE).map(|i| (i % 251) as u8).collect();
    let mut received = vec![0u8; FRAME_SIZE];
    runtime.block_on(async {
        input.activate(0, false).await.expect("activate input");
        output.activate(0, false).await.expect("activate output");
    });

    c.bench_function("frame_round_trip_64k", |b| {
        b.iter(|| {
            runtime.block_on(async {
                input.write(black_box(&frame)).await.expect("write");
                output.read(&mut received).await.expect("read");
            });
            input.transport().take_sent_datagrams();
            black_box(&received);
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_sync_marker(&mut criterion);
    bench_frame_round_trip(&mut criterion);
    criterion.final_summary();
}
