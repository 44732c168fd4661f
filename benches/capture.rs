use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgb, RgbImage};
use verify_capture::capture::{encode_jpeg, FrameCapturer};
use verify_capture::platform::mock::{MockSink, MockSource};
use verify_capture::session::{DeviceSession, SessionState};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_jpeg");
    for (width, height) in [(320, 240), (640, 480), (1280, 720)] {
        let surface = gradient(width, height);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{height}")),
            &surface,
            |b, surface| b.iter(|| encode_jpeg(black_box(surface))),
        );
    }
    group.finish();
}

fn bench_capture(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let session = runtime.block_on(async {
        let session = DeviceSession::new(MockSource::new());
        session.mount_sink(MockSink::auto_ready(640, 480)).unwrap();
        session.open().await;
        assert_eq!(session.settled().await, SessionState::Ready);
        session
    });
    let capturer = FrameCapturer::new();

    c.bench_function("capture_640x480", |b| {
        b.iter(|| capturer.capture(black_box(&session)))
    });

    runtime.block_on(async { session.close() });
}

criterion_group!(benches, bench_encode, bench_capture);
criterion_main!(benches);
