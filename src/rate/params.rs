// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::color::ChromaSampling;
use crate::api::config::*;
use crate::api::util::FrameType;
use crate::quantize::{qp_offset, MAX_QP, MIN_QP};
use crate::util::clamp;

/// How a running controller has to react to a new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
  /// Accumulated state carries over.
  Compatible {
    /// The QP has to be seeded again from the new bitrate.
    reseed: bool,
    /// The sliding window limiter has to be rebuilt.
    rebuild_window: bool,
  },
  /// The stream has to start over.
  FullResetRequired,
}

/// Decoder buffer in bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrdParams {
  pub buffer_size: f64,
  pub initial_delay: f64,
  pub bits_per_frame: f64,
  pub cbr: bool,
}

/// Every constant the controllers work with, derived once per
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateParameters {
  pub mode: RateControlMode,
  pub target_bps: u64,
  pub max_bps: u64,
  pub fps: f64,
  /// Nominal size of a frame at the target bitrate.
  pub bits_per_frame: f64,
  /// Size of a frame at the maximum bitrate.
  pub max_bits_per_frame: f64,
  pub hrd: Option<HrdParams>,
  pub width: usize,
  pub height: usize,
  pub chroma_sampling: ChromaSampling,
  pub bit_depth: u8,
  pub gop_size: u32,
  pub ref_dist: u32,
  pub b_pyramid: bool,
  pub max_frame_size: Option<u64>,
  pub sliding_window: Option<SlidingWindowConfig>,
  /// Frames may be encoded again.
  pub recode: bool,
  /// Frames may be accepted as-is when no QP meets the limits.
  pub panic: bool,
  pub qp_offset: i32,
  // [min, max] per frame type, offset included
  qp_bounds: [(i32, i32); 3],
}

impl RateParameters {
  /// Derives the parameters of `cfg`.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the configuration does not validate.
  pub fn derive(cfg: &RateControlConfig) -> Result<Self, InvalidConfig> {
    cfg.validate()?;

    let fps = cfg.fps();
    let cbr = cfg.mode == RateControlMode::Cbr;
    let target_bps = cfg.target_bitrate;
    let max_bps =
      if cbr { target_bps } else { cfg.max_bitrate.max(target_bps) };
    let bits_per_frame = target_bps as f64 / fps;
    let max_bits_per_frame = max_bps as f64 / fps;

    let hrd = cfg.hrd.map(|hrd| HrdParams {
      buffer_size: hrd.buffer_size as f64,
      initial_delay: hrd.initial_delay as f64,
      bits_per_frame: max_bits_per_frame,
      cbr,
    });
    let limited = hrd.is_some() || cfg.max_frame_size.is_some();

    let qp_offset = qp_offset(cfg.bit_depth);
    let full = (MIN_QP, MAX_QP + qp_offset);
    let qp_bounds = match cfg.qp_limits {
      Some(limits) if limits.is_consistent() => [limits.i, limits.p, limits.b]
        .map(|r| (r.min as i32 + qp_offset, r.max as i32 + qp_offset)),
      _ => [full; 3],
    };

    Ok(RateParameters {
      mode: cfg.mode,
      target_bps,
      max_bps,
      fps,
      bits_per_frame,
      max_bits_per_frame,
      hrd,
      width: cfg.width,
      height: cfg.height,
      chroma_sampling: cfg.chroma_sampling,
      bit_depth: cfg.bit_depth,
      gop_size: cfg.gop_size,
      ref_dist: cfg.ref_dist,
      b_pyramid: cfg.b_pyramid,
      max_frame_size: cfg.max_frame_size,
      sliding_window: cfg.sliding_window,
      recode: cfg.recode,
      panic: limited,
      qp_offset,
      qp_bounds,
    })
  }

  #[inline]
  pub fn is_cbr(&self) -> bool {
    self.mode == RateControlMode::Cbr
  }

  /// QP range of a frame type, offset included.
  #[inline]
  pub fn qp_bounds(&self, frame_type: FrameType) -> (i32, i32) {
    self.qp_bounds[frame_type.index()]
  }

  #[inline]
  pub fn clip_qp(&self, frame_type: FrameType, qp: i32) -> i32 {
    let (min, max) = self.qp_bounds(frame_type);
    clamp(qp, min, max)
  }

  /// Size of the uncompressed picture in bits.
  pub fn raw_frame_bits(&self) -> f64 {
    let cs = self.chroma_sampling;
    cs.raw_frame_bits(self.width, self.height, self.bit_depth)
  }

  /// Frame type as seen by the QP model.
  ///
  /// B frames without forward references behave like P frames.
  pub fn rate_class(&self, frame_type: FrameType) -> FrameType {
    match frame_type {
      FrameType::B if self.ref_dist == 1 => FrameType::P,
      t => t,
    }
  }

  /// Whether `order` is the last stretch of frames before a scheduled
  /// intra frame.
  pub fn is_frame_before_intra(&self, order: u64, last_intra: u64) -> bool {
    if self.gop_size == 0 {
      return false;
    }
    let gop = i64::from(self.gop_size);
    let dist = i64::from(self.ref_dist);
    let distance = order.saturating_sub(last_intra) as i64;
    distance > (gop * 3 / 4).max(gop - dist * 3)
  }

  /// Decides how a controller running with `self` has to handle `new`.
  pub fn classify_change(&self, new: &RateParameters) -> ConfigChange {
    use ConfigChange::*;

    if self.mode != new.mode
      || self.hrd.is_some() != new.hrd.is_some()
      || self.fps != new.fps
      || self.width != new.width
      || self.height != new.height
      || self.chroma_sampling != new.chroma_sampling
      || self.bit_depth != new.bit_depth
    {
      return FullResetRequired;
    }

    let bitrate_changed =
      self.target_bps != new.target_bps || self.max_bps != new.max_bps;
    if let (Some(old_hrd), Some(new_hrd)) = (self.hrd, new.hrd) {
      if old_hrd.buffer_size != new_hrd.buffer_size
        || old_hrd.initial_delay != new_hrd.initial_delay
        || bitrate_changed
      {
        return FullResetRequired;
      }
    }
    if bitrate_changed && new.is_cbr() {
      return FullResetRequired;
    }

    let window_bitrate = |p: &RateParameters| {
      p.sliding_window.map(|w| w.max_avg_bitrate)
    };
    let rebuild_window = window_bitrate(self) != window_bitrate(new)
      || self.sliding_window.map(|w| w.length)
        != new.sliding_window.map(|w| w.length);

    let reseed = bitrate_changed
      || rebuild_window
      || self.max_frame_size != new.max_frame_size
      || self.gop_size != new.gop_size
      || self.ref_dist != new.ref_dist
      || self.b_pyramid != new.b_pyramid
      || self.qp_bounds != new.qp_bounds
      || self.recode != new.recode;

    Compatible { reseed, rebuild_window }
  }
}
