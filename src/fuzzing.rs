// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use libfuzzer_sys::arbitrary::{Arbitrary, Error, Unstructured};
use log::debug;

use crate::prelude::*;
use crate::rate::MAX_RECODE;

// Adding new fuzz targets
//
// 1. Add a function to this file taking any type that implements
//    Arbitrary, and derive Debug for it.
// 2. cargo fuzz add something
// 3. Copy fuzz/fuzz_targets/construct_context.rs and call the new
//    function from it.

#[inline]
fn arbitrary_rational(u: &mut Unstructured<'_>) -> Result<Rational, Error> {
  Ok(Rational::new(Arbitrary::arbitrary(u)?, Arbitrary::arbitrary(u)?))
}

#[inline]
fn arbitrary_chroma(
  u: &mut Unstructured<'_>,
) -> Result<ChromaSampling, Error> {
  Ok(*u.choose(&[
    ChromaSampling::Cs420,
    ChromaSampling::Cs422,
    ChromaSampling::Cs444,
    ChromaSampling::Cs400,
  ])?)
}

#[inline]
fn arbitrary_qp_limits(
  u: &mut Unstructured<'_>,
) -> Result<Option<QpLimits>, Error> {
  if Arbitrary::arbitrary(u)? {
    return Ok(None);
  }
  let mut range = || -> Result<QpRange, Error> {
    Ok(QpRange::new(Arbitrary::arbitrary(u)?, Arbitrary::arbitrary(u)?))
  };
  Ok(Some(QpLimits { i: range()?, p: range()?, b: range()? }))
}

#[derive(Debug)]
pub struct ArbitraryConfig {
  config: Config,
}

impl Arbitrary<'_> for ArbitraryConfig {
  fn arbitrary(u: &mut Unstructured<'_>) -> Result<Self, Error> {
    let mut rc = RateControlConfig::new()
      .with_mode(*u.choose(&[RateControlMode::Cbr, RateControlMode::Vbr])?)
      .with_bitrate(Arbitrary::arbitrary(u)?)
      .with_max_bitrate(Arbitrary::arbitrary(u)?)
      .with_frame_rate(arbitrary_rational(u)?)
      .with_picture(
        Arbitrary::arbitrary(u)?,
        Arbitrary::arbitrary(u)?,
        arbitrary_chroma(u)?,
        Arbitrary::arbitrary(u)?,
      )
      .with_gop(
        Arbitrary::arbitrary(u)?,
        Arbitrary::arbitrary(u)?,
        Arbitrary::arbitrary(u)?,
      )
      .with_recode(Arbitrary::arbitrary(u)?);
    rc.qp_limits = arbitrary_qp_limits(u)?;
    if Arbitrary::arbitrary(u)? {
      rc =
        rc.with_hrd(Arbitrary::arbitrary(u)?, Arbitrary::arbitrary(u)?);
    }
    if Arbitrary::arbitrary(u)? {
      rc = rc.with_max_frame_size(Arbitrary::arbitrary(u)?);
    }
    if Arbitrary::arbitrary(u)? {
      rc = rc.with_sliding_window(
        Arbitrary::arbitrary(u)?,
        Arbitrary::arbitrary(u)?,
      );
    }
    let mut config = Config::new().with_rate_control(rc);
    if Arbitrary::arbitrary(u)? {
      config = config.with_lookahead(LookaheadConfig {
        depth: u.int_in_range(0..=1001)?,
        lookback: u.int_in_range(0..=1001)?,
        adaptation: u.int_in_range(0..=1001)?,
      });
    }
    Ok(Self { config })
  }
}

pub fn fuzz_construct_context(arbitrary: ArbitraryConfig) {
  let _: Result<Context, _> = arbitrary.config.new_context();
}

#[derive(Debug)]
pub struct ArbitraryStream {
  config: RateControlConfig,
  // coded size of every attempt, in encode order
  sizes: Vec<u32>,
  intra_period: u64,
}

impl Arbitrary<'_> for ArbitraryStream {
  fn arbitrary(u: &mut Unstructured<'_>) -> Result<Self, Error> {
    let bitrate = u.int_in_range(10_000..=50_000_000)?;
    let mut config = RateControlConfig::new()
      .with_mode(*u.choose(&[RateControlMode::Cbr, RateControlMode::Vbr])?)
      .with_bitrate(bitrate)
      .with_max_bitrate(u.int_in_range(bitrate..=2 * bitrate)?)
      .with_frame_rate(Rational::new(u.int_in_range(1..=120)?, 1))
      .with_picture(
        u.int_in_range(16..=4096)?,
        u.int_in_range(16..=2304)?,
        arbitrary_chroma(u)?,
        *u.choose(&[8, 10, 12])?,
      )
      .with_gop(u.int_in_range(1..=300)?, 1, false);
    if Arbitrary::arbitrary(u)? {
      let buffer = u.int_in_range(bitrate / 4..=4 * bitrate)?;
      config = config.with_hrd(buffer, u.int_in_range(1..=buffer)?);
    }
    if Arbitrary::arbitrary(u)? {
      config = config.with_max_frame_size(u.int_in_range(1..=bitrate)?);
    }
    let intra_period = u.int_in_range(1..=300)?;
    let sizes = Arbitrary::arbitrary(u)?;
    Ok(Self { config, sizes, intra_period })
  }
}

pub fn fuzz_rate_control(stream: ArbitraryStream) {
  let cfg = Config::new().with_rate_control(stream.config);
  let mut ctx = match cfg.new_context() {
    Ok(ctx) => ctx,
    Err(e) => {
      debug!("rejected config: {}", e);
      return;
    }
  };

  let mut sizes = stream.sizes.iter().map(|&bits| bits as u64);
  let mut order = 0;
  'stream: loop {
    let frame_type = if order % stream.intra_period == 0 {
      FrameType::I
    } else {
      FrameType::P
    };
    let mut frame = FrameParams::new(order, order, frame_type, 0);
    let mut qp = match ctx.frame_qp(&frame) {
      Ok(qp) => qp,
      Err(e) => panic!("frame {}: {}", order, e),
    };
    loop {
      let Some(bits) = sizes.next() else {
        break 'stream;
      };
      let status = match ctx.report(&frame, qp, bits) {
        Ok(status) => status,
        Err(e) => panic!("frame {}: {}", order, e),
      };
      debug!("frame {}: {} bits at qp {}: {:?}", order, bits, qp, status);
      assert!((0..=87).contains(&status.qp));
      if !status.status.needs_recode() {
        break;
      }
      assert!(frame.attempt < MAX_RECODE, "frame {} never settled", order);
      frame = frame.recode();
      qp = status.qp;
    }
    order += 1;
  }
}
