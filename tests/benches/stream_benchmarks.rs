//! # Block Stream Benchmarks
//!
//! | Path | Workload |
//! |------|----------|
//! | Assembler | reversed and interleaved delivery into one session |
//! | Frame decoder | text and binary bodies split into network-sized chunks |
//! | Merge | sharded results folded into one ordered sequence |
//! | Flatten | block batches into transaction batches |

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use prost::Message;

use zb_block_stream::algorithms::{encode_frame, Frame};
use zb_block_stream::ports::mock_block;
use zb_block_stream::{
    build_block_range, flatten_transactions, merge_completed, split_range, BlockAssembler,
    CompactBlock, FrameDecoder, StreamEvent, WireFormat,
};

// ============================================================================
// Assembler
// ============================================================================

fn bench_assembler(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler");

    for size in [1_000u64, 10_000] {
        let reversed: Vec<CompactBlock> = (0..size).rev().map(CompactBlock::empty).collect();
        let interleaved: Vec<CompactBlock> = (0..size)
            .step_by(2)
            .chain((1..size).step_by(2))
            .map(CompactBlock::empty)
            .collect();

        group.throughput(Throughput::Elements(size));
        for (name, blocks) in [("reversed", &reversed), ("interleaved", &interleaved)] {
            group.bench_with_input(BenchmarkId::new(name, size), blocks, |b, blocks| {
                b.iter(|| {
                    let mut assembler = BlockAssembler::new(build_block_range(0, size - 1));
                    for block in blocks.iter().cloned() {
                        assembler.on_event(StreamEvent::Data(block));
                    }
                    black_box(assembler.on_event(StreamEvent::End))
                })
            });
        }
    }

    group.finish();
}

// ============================================================================
// Frame decoding
// ============================================================================

fn body(format: WireFormat, blocks: u64) -> Vec<u8> {
    let mut out = Vec::new();
    for height in 0..blocks {
        let frame = encode_frame(&mock_block(height).encode_to_vec(), false);
        match format {
            WireFormat::Binary => out.extend_from_slice(&frame),
            WireFormat::Text => out.extend_from_slice(STANDARD.encode(&frame).as_bytes()),
        }
    }
    out
}

fn bench_frame_decoder(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame-decoder");
    let blocks = 1_000u64;

    for format in [WireFormat::Binary, WireFormat::Text] {
        let payload = body(format, blocks);
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("{:?}", format), blocks),
            &payload,
            |b, payload| {
                b.iter(|| {
                    let mut decoder = FrameDecoder::new(format, 4 * 1024 * 1024);
                    let mut frames = 0usize;
                    for chunk in payload.chunks(16 * 1024) {
                        if decoder.push(chunk).is_err() {
                            break;
                        }
                        while let Ok(Some(Frame::Data(data))) = decoder.next_frame() {
                            black_box(data);
                            frames += 1;
                        }
                    }
                    black_box(frames)
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Merge / flatten
// ============================================================================

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let range = build_block_range(0, 9_999);

    for shards in [2usize, 8, 32] {
        let parts: Vec<Vec<CompactBlock>> = split_range(&range, shards)
            .unwrap_or_default()
            .iter()
            .rev()
            .map(|part| {
                let (start, end) = part.bounds();
                (start..=end).map(CompactBlock::empty).collect()
            })
            .collect();

        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::new("shards", shards), &parts, |b, parts| {
            b.iter(|| black_box(merge_completed(parts.clone())))
        });
    }

    group.finish();
}

fn bench_flatten(c: &mut Criterion) {
    let blocks: Vec<CompactBlock> = (0..2_000).map(mock_block).collect();

    c.bench_function("flatten_transactions_2000", |b| {
        b.iter(|| black_box(flatten_transactions(&blocks)))
    });
}

criterion_group!(
    benches,
    bench_assembler,
    bench_frame_decoder,
    bench_merge,
    bench_flatten
);
criterion_main!(benches);
