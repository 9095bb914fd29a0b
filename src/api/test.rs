// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::prelude::*;

use interpolate_name::interpolate_test;
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

fn setup_config(
  bitrate: u64, mode: RateControlMode, gop_size: u32, ref_dist: u32,
  b_pyramid: bool,
) -> RateControlConfig {
  RateControlConfig::new()
    .with_mode(mode)
    .with_bitrate(bitrate)
    .with_max_bitrate(2 * bitrate)
    .with_picture(1920, 1080, ChromaSampling::Cs420, 8)
    .with_gop(gop_size, ref_dist, b_pyramid)
}

fn setup_context(rc: RateControlConfig) -> Context {
  Config::new().with_rate_control(rc).new_context().unwrap()
}

// Coding order of a GOP with `ref_dist - 1` B frames between references.
fn gop_frames(
  frames: u64, gop_size: u64, ref_dist: u64, b_pyramid: bool,
) -> Vec<FrameParams> {
  let mut out = Vec::with_capacity(frames as usize);
  let mut display = 0;
  while display < frames {
    if display % gop_size == 0 {
      out.push(FrameParams::new(out.len() as u64, display, FrameType::I, 0));
      display += 1;
      continue;
    }
    let next_ref = (display + ref_dist - 1)
      .min(frames - 1)
      .min((display / gop_size + 1) * gop_size - 1);
    out.push(FrameParams::new(out.len() as u64, next_ref, FrameType::P, 0));
    for (i, d) in (display..next_ref).enumerate() {
      let layer = if b_pyramid { 1 + i as u32 % 2 } else { 0 };
      out.push(FrameParams::new(out.len() as u64, d, FrameType::B, layer));
    }
    display = next_ref + 1;
  }
  out
}

// Runs the encode/recode loop of every frame and returns the accepted
// sizes and QPs.
fn encode(
  ctx: &mut Context, frames: &[FrameParams],
  mut coded_bits: impl FnMut(&FrameParams, i32) -> u64,
) -> Vec<(u64, i32, BrcStatus)> {
  let mut out = Vec::with_capacity(frames.len());
  for frame in frames {
    let mut frame = *frame;
    let mut qp = ctx.frame_qp(&frame).unwrap();
    loop {
      let bits = coded_bits(&frame, qp);
      let status = ctx.report(&frame, qp, bits).unwrap();
      if !status.status.needs_recode() {
        out.push((bits, qp, status.status));
        break;
      }
      assert!(frame.attempt < crate::rate::MAX_RECODE);
      frame = frame.recode();
      qp = status.qp;
    }
  }
  out
}

#[test]
fn invalid_config_is_rejected() {
  let cfg = Config::new();
  assert_eq!(
    cfg.new_context().err(),
    Some(InvalidConfig::TargetBitrateNeeded)
  );

  let rc = setup_config(1_000_000, RateControlMode::Cbr, 30, 1, false)
    .with_hrd(1_000_000, 500_000);
  let cfg =
    Config::new().with_rate_control(rc).with_lookahead(Default::default());
  assert_eq!(
    cfg.new_context().err(),
    Some(InvalidConfig::RateControlConfigurationMismatch)
  );
}

#[test]
fn closed_context_is_not_initialized() {
  let rc = setup_config(1_000_000, RateControlMode::Cbr, 30, 1, false);
  let mut ctx = setup_context(rc);
  let frame = FrameParams::new(0, 0, FrameType::I, 0);
  assert!(ctx.is_initialized());

  ctx.close();
  assert!(!ctx.is_initialized());
  assert_eq!(ctx.frame_qp(&frame), Err(RateControlError::NotInitialized));
  assert_eq!(
    ctx.report(&frame, 30, 1000),
    Err(RateControlError::NotInitialized)
  );
  assert_eq!(ctx.reset(&rc), Err(RateControlError::NotInitialized));
  assert!(!ctx.needs_stats(0));

  ctx.init(&Config::new().with_rate_control(rc)).unwrap();
  assert!(ctx.frame_qp(&frame).is_ok());
}

#[test]
fn failed_init_keeps_running_controller() {
  let rc = setup_config(1_000_000, RateControlMode::Cbr, 30, 1, false);
  let mut ctx = setup_context(rc);
  let frame = FrameParams::new(0, 0, FrameType::I, 0);
  let qp = ctx.frame_qp(&frame).unwrap();

  let bad = Config::new().with_rate_control(rc.with_bitrate(0));
  assert_eq!(
    ctx.init(&bad),
    Err(RateControlError::InvalidConfig(InvalidConfig::TargetBitrateNeeded))
  );
  assert_eq!(ctx.frame_qp(&frame), Ok(qp));
  assert_eq!(ctx.config().rate_control().target_bitrate, 1_000_000);
}

#[test]
fn reset_updates_config() {
  let rc = setup_config(1_000_000, RateControlMode::Vbr, 30, 1, false);
  let mut ctx = setup_context(rc);
  let frames = gop_frames(10, 30, 1, false);
  encode(&mut ctx, &frames, |_, _| 33_000);

  let change = ctx.reset(&rc.with_bitrate(1_500_000)).unwrap();
  assert_eq!(
    change,
    ConfigChange::Compatible { reseed: true, rebuild_window: false }
  );
  assert_eq!(ctx.config().rate_control().target_bitrate, 1_500_000);

  assert!(ctx.reset(&rc.with_bitrate(0)).is_err());
  assert_eq!(ctx.config().rate_control().target_bitrate, 1_500_000);
}

#[interpolate_test(low_delay, 1, false)]
#[interpolate_test(b_frames, 4, false)]
#[interpolate_test(b_pyramid, 4, true)]
fn random_sizes_stay_in_range(ref_dist: u32, b_pyramid: bool) {
  let rc =
    setup_config(2_000_000, RateControlMode::Vbr, 32, ref_dist, b_pyramid)
      .with_max_frame_size(400_000);
  let mut ctx = setup_context(rc);
  let frames = gop_frames(200, 32, ref_dist as u64, b_pyramid);
  let mut rng = ChaChaRng::from_seed([0; 32]);

  let out = encode(&mut ctx, &frames, |_, _| rng.gen_range(1_000..800_000));
  assert_eq!(out.len(), frames.len());
  for (_, qp, _) in out {
    assert!((1..=51).contains(&qp), "qp {} out of range", qp);
  }
}

#[test]
fn model_following_sizes_converge() {
  // coded size halves every 6 QP
  let rc = setup_config(1_000_000, RateControlMode::Cbr, 60, 1, false);
  let mut ctx = setup_context(rc);
  let frames = gop_frames(300, 60, 1, false);
  let model = |frame: &FrameParams, qp: i32| {
    let base =
      if frame.frame_type == FrameType::I { 400_000. } else { 80_000. };
    (base * 2f64.powf(-(qp - 22) as f64 / 6.)) as u64
  };

  let out = encode(&mut ctx, &frames, model);
  let total: u64 = out[60..300].iter().map(|(bits, ..)| bits).sum();
  let average = total as f64 / 240.;
  let target = 1_000_000. / 30.;
  assert!(
    (average / target - 1.).abs() < 0.3,
    "average {} target {}",
    average,
    target
  );
}

#[test]
fn lookahead_context() {
  let rc = setup_config(1_000_000, RateControlMode::Vbr, 30, 1, false);
  let la = LookaheadConfig { depth: 10, lookback: 10, adaptation: 10 };
  let mut ctx = Config::new()
    .with_rate_control(rc)
    .with_lookahead(la)
    .new_context()
    .unwrap();
  let frames = gop_frames(40, 30, 1, false);
  let stat = |f: &FrameParams| {
    let (eo, d) = (f.encode_order, f.display_order);
    FrameStatData::new(eo, d, f.frame_type, 30, 25_000)
  };

  for f in &frames[..10] {
    ctx.submit_stat(stat(f)).unwrap();
  }
  let frame = frames[0];
  assert!(!ctx.needs_stats(0));
  assert!(ctx.needs_stats(1));
  assert_eq!(
    ctx.pre_enc(&FrameParams::new(99, 99, FrameType::P, 0)),
    Err(RateControlError::MissingStatistics { frame: 99 })
  );

  ctx.pre_enc(&frame).unwrap();
  let qp = ctx.frame_qp(&frame).unwrap();
  let status = ctx.report(&frame, qp, 25_000).unwrap();
  assert_eq!(status, FrameStatus { status: BrcStatus::Ok, qp, min_size: 0 });

  for f in &frames[10..] {
    ctx.submit_stat(stat(f)).unwrap();
  }
  let out = encode(&mut ctx, &frames[1..], |_, _| 30_000);
  assert!(out.iter().all(|&(_, _, status)| status == BrcStatus::Ok));
}

#[cfg(feature = "channel-api")]
#[test]
fn lookahead_context_over_channel() {
  use crate::api::channel::{stat_channel, FillStatus};

  let rc = setup_config(1_000_000, RateControlMode::Vbr, 30, 1, false);
  let la = LookaheadConfig { depth: 5, lookback: 5, adaptation: 5 };
  let mut ctx = Config::new()
    .with_rate_control(rc)
    .with_lookahead(la)
    .new_context()
    .unwrap();
  let frames = gop_frames(12, 30, 1, false);

  let (tx, rx) = stat_channel(la.depth);
  let producer = {
    let frames = frames.clone();
    std::thread::spawn(move || {
      for f in frames {
        let stat = FrameStatData::new(
          f.encode_order,
          f.display_order,
          f.frame_type,
          30,
          25_000,
        );
        tx.send(stat).unwrap();
      }
    })
  };

  for frame in &frames {
    let status = rx.fill(ctx.rate_control().unwrap(), frame.encode_order);
    assert_ne!(status, FillStatus::Finished);
    let qp = ctx.frame_qp(frame).unwrap();
    ctx.report(frame, qp, 25_000).unwrap();
  }
  producer.join().unwrap();
  assert_eq!(rx.fill(ctx.rate_control().unwrap(), 12), FillStatus::Finished);
}
