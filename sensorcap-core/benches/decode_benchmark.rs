//! Benchmarks for point-cloud decoding and frame reading.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sensorcap_core::dispatch::accumulate_point_clouds;
use sensorcap_core::types::{FieldDescriptor, PointCloudHeader, TimedRecord};
use sensorcap_core::{
    Diagnostics, FrameReader, FrameWriter, PointCloud, PointCloudFieldDecoder, Record,
};
use std::io::Cursor;

const POINTS: u32 = 100_000;

fn synthetic_cloud(width: u32) -> PointCloud {
    let mut data = Vec::with_capacity(width as usize * 16);
    for i in 0..width {
        let v = i as f32;
        for value in [v * 0.01, v * 0.02, v * 0.03, (i % 256) as f32] {
            data.extend_from_slice(&value.to_le_bytes());
        }
    }
    PointCloud {
        header: PointCloudHeader::default(),
        width,
        height: 1,
        point_step: 16,
        row_step: width * 16,
        fields: vec![
            FieldDescriptor::float32("x", 0),
            FieldDescriptor::float32("y", 4),
            FieldDescriptor::float32("z", 8),
            FieldDescriptor::float32("intensity", 12),
        ],
        data,
        is_bigendian: false,
        is_dense: true,
    }
}

fn decode_cloud_benchmark(c: &mut Criterion) {
    let cloud = synthetic_cloud(POINTS);
    let decoder = PointCloudFieldDecoder::new();

    let mut group = c.benchmark_group("decode_point_cloud");
    group.throughput(Throughput::Elements(POINTS as u64));

    group.bench_function("columns_100k", |b| {
        b.iter(|| {
            let decoded = decoder.decode(black_box(&cloud)).unwrap();
            black_box(decoded.len())
        })
    });

    let records: Vec<TimedRecord> = (0..10)
        .map(|i| TimedRecord {
            frame_index: i,
            system_timestamp: i as f64,
            record: Record::PointCloud(synthetic_cloud(POINTS / 10)),
        })
        .collect();
    let diagnostics = Diagnostics::new();

    group.bench_function("accumulate_10x10k", |b| {
        b.iter(|| {
            let (acc, _) = accumulate_point_clouds(black_box(&records), &decoder, &diagnostics);
            black_box(acc.len())
        })
    });

    group.finish();
}

fn read_frames_benchmark(c: &mut Criterion) {
    let mut writer = FrameWriter::new(Vec::new());
    for i in 0..10_000 {
        writer.write_frame(i as f64 * 0.01, &[0xAB; 512]).unwrap();
    }
    let bytes = writer.into_inner().unwrap();

    let mut group = c.benchmark_group("read_frames");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("10k_x_512b", |b| {
        b.iter(|| {
            let reader = FrameReader::new(Cursor::new(black_box(bytes.as_slice())));
            black_box(reader.filter_map(Result::ok).count())
        })
    });

    group.finish();
}

criterion_group!(benches, decode_cloud_benchmark, read_frames_benchmark);
criterion_main!(benches);
