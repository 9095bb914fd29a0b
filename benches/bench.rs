// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use criterion::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;
use ratectl::prelude::*;
use ratectl::quantize::{qp_to_qstep, qstep_to_qp};

const FRAMES: u64 = 300;

fn rate_config() -> RateControlConfig {
  RateControlConfig::new()
    .with_mode(RateControlMode::Vbr)
    .with_bitrate(4_000_000)
    .with_picture(1920, 1080, ChromaSampling::Cs420, 8)
    .with_gop(60, 1, false)
}

fn frame_type(order: u64) -> FrameType {
  if order % 60 == 0 {
    FrameType::I
  } else {
    FrameType::P
  }
}

fn random_sizes(len: u64) -> Vec<u64> {
  let mut ra = ChaChaRng::from_seed([0; 32]);
  (0..len).map(|_| ra.gen_range(20_000..400_000)).collect()
}

fn run_single_pass(sizes: &[u64], rc: &RateControlConfig) {
  let mut c = SinglePassController::new(rc).unwrap();
  for (order, &bits) in sizes.iter().enumerate() {
    let order = order as u64;
    let mut f = FrameParams::new(order, order, frame_type(order), 0);
    let mut qp = c.frame_qp(&f).unwrap();
    loop {
      let status = c.report(&f, qp, bits).unwrap();
      if !status.status.needs_recode() {
        break;
      }
      f = f.recode();
      qp = status.qp;
    }
  }
}

pub fn single_pass(c: &mut Criterion) {
  let sizes = random_sizes(FRAMES);
  let plain = rate_config();
  let hrd = plain
    .with_mode(RateControlMode::Cbr)
    .with_hrd(8_000_000, 4_000_000)
    .with_max_frame_size(1_000_000);

  let mut group = c.benchmark_group("single_pass");
  group.throughput(Throughput::Elements(FRAMES));
  group.bench_function("vbr", |b| {
    b.iter(|| run_single_pass(&sizes, &plain))
  });
  group.bench_function("cbr_hrd", |b| {
    b.iter(|| run_single_pass(&sizes, &hrd))
  });
  group.finish();
}

fn run_lookahead(sizes: &[u64], la: LookaheadConfig) {
  let mut c = LookaheadController::new(&rate_config(), la).unwrap();
  for (order, &bits) in sizes.iter().enumerate() {
    let order = order as u64;
    c.submit(FrameStatData::new(order, order, frame_type(order), 30, bits));
  }
  for order in 0..sizes.len() as u64 {
    c.pre_enc(order).unwrap();
    c.get_qp(order).unwrap();
    c.report(order, sizes[order as usize]).unwrap();
  }
}

pub fn lookahead(c: &mut Criterion) {
  let sizes = random_sizes(FRAMES);
  let mut group = c.benchmark_group("lookahead");
  group.throughput(Throughput::Elements(FRAMES));
  for depth in [10, 40, 100] {
    let la = LookaheadConfig { depth, lookback: depth, adaptation: depth };
    let id = BenchmarkId::from_parameter(depth);
    group.bench_with_input(id, &la, |b, &la| {
      b.iter(|| run_lookahead(&sizes, la))
    });
  }
  group.finish();
}

pub fn qstep(c: &mut Criterion) {
  c.bench_function("qstep_round_trip", |b| {
    b.iter(|| {
      (0..=63)
        .map(|qp| qstep_to_qp(qp_to_qstep(black_box(qp), 12), 12))
        .sum::<i32>()
    })
  });
}

criterion_group!(rate, single_pass, lookahead, qstep);
criterion_main!(rate);
