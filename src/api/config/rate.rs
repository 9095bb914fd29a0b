// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use arg_enum_proc_macro::ArgEnum;
use itertools::*;

use crate::api::color::ChromaSampling;
use crate::api::config::InvalidConfig;
use crate::api::util::Rational;
use crate::quantize::MAX_QP;
use crate::serialize::{Deserialize, Serialize};

use std::fmt;

/// Rate control algorithm.
#[derive(
  ArgEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum RateControlMode {
  /// Constant bitrate, the decoder buffer is drained at the target rate.
  #[default]
  Cbr,
  /// Variable bitrate bounded by the maximum bitrate.
  Vbr,
}

/// Hypothetical reference decoder buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrdConfig {
  /// Buffer size in bits.
  pub buffer_size: u64,
  /// Buffer fullness in bits before the first frame is removed.
  pub initial_delay: u64,
}

/// Peak bitrate bound over a trailing window of frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
  /// Highest average bitrate allowed inside any window, in bits/s.
  pub max_avg_bitrate: u64,
  /// Window length in frames.
  pub length: u32,
}

/// Inclusive QP range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QpRange {
  /// Lowest QP.
  pub min: u8,
  /// Highest QP.
  pub max: u8,
}

impl QpRange {
  /// Creates a range.
  pub const fn new(min: u8, max: u8) -> Self {
    QpRange { min, max }
  }

  const fn is_consistent(self) -> bool {
    self.min >= 1 && self.max > self.min && self.max as i32 <= MAX_QP
  }
}

/// QP bounds per frame type, on the 8-bit scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QpLimits {
  /// Intra frames.
  pub i: QpRange,
  /// Forward predicted frames.
  pub p: QpRange,
  /// Bidirectionally predicted frames.
  pub b: QpRange,
}

impl QpLimits {
  /// The same range for every frame type.
  pub const fn uniform(range: QpRange) -> Self {
    QpLimits { i: range, p: range, b: range }
  }

  /// Limits are only honored when every range is usable.
  pub const fn is_consistent(&self) -> bool {
    self.i.is_consistent()
      && self.p.is_consistent()
      && self.b.is_consistent()
  }
}

/// Session settings of the bitrate controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateControlConfig {
  /// Rate control algorithm.
  pub mode: RateControlMode,
  /// Target bitrate in bits/s.
  pub target_bitrate: u64,
  /// Maximum bitrate in bits/s, ignored for CBR.
  pub max_bitrate: u64,
  /// Frames per second.
  pub frame_rate: Rational,
  /// Luma width in pixels.
  pub width: usize,
  /// Luma height in pixels.
  pub height: usize,
  /// Chroma subsampling.
  pub chroma_sampling: ChromaSampling,
  /// Luma bit depth.
  pub bit_depth: u8,
  /// Distance between intra frames, 0 when there is no fixed interval.
  pub gop_size: u32,
  /// Distance between reference frames, 1 without B frames.
  pub ref_dist: u32,
  /// Whether B frames are coded in a hierarchy.
  pub b_pyramid: bool,
  /// Decoder buffer conformance.
  pub hrd: Option<HrdConfig>,
  /// Hard limit on the size of any frame, in bits.
  pub max_frame_size: Option<u64>,
  /// Peak bitrate bound.
  pub sliding_window: Option<SlidingWindowConfig>,
  /// QP bounds per frame type.
  pub qp_limits: Option<QpLimits>,
  /// Whether frames may be encoded again when they miss their budget.
  pub recode: bool,
}

impl Default for RateControlConfig {
  fn default() -> Self {
    RateControlConfig {
      mode: RateControlMode::Cbr,
      target_bitrate: 0,
      max_bitrate: 0,
      frame_rate: Rational::new(30, 1),
      width: 640,
      height: 480,
      chroma_sampling: ChromaSampling::Cs420,
      bit_depth: 8,
      gop_size: 0,
      ref_dist: 1,
      b_pyramid: false,
      hrd: None,
      max_frame_size: None,
      sliding_window: None,
      qp_limits: None,
      recode: true,
    }
  }
}

impl RateControlConfig {
  /// Create a default rate control configuration
  ///
  /// The target bitrate has to be set before use.
  pub fn new() -> Self {
    Default::default()
  }

  /// Set the rate control algorithm.
  pub const fn with_mode(mut self, mode: RateControlMode) -> Self {
    self.mode = mode;
    self
  }

  /// Set the target bitrate in bits/s.
  pub const fn with_bitrate(mut self, target_bitrate: u64) -> Self {
    self.target_bitrate = target_bitrate;
    self
  }

  /// Set the maximum bitrate in bits/s.
  pub const fn with_max_bitrate(mut self, max_bitrate: u64) -> Self {
    self.max_bitrate = max_bitrate;
    self
  }

  /// Set the frame rate.
  pub const fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
    self.frame_rate = frame_rate;
    self
  }

  /// Set the picture format.
  pub const fn with_picture(
    mut self, width: usize, height: usize, chroma_sampling: ChromaSampling,
    bit_depth: u8,
  ) -> Self {
    self.width = width;
    self.height = height;
    self.chroma_sampling = chroma_sampling;
    self.bit_depth = bit_depth;
    self
  }

  /// Set the GOP structure.
  pub const fn with_gop(
    mut self, gop_size: u32, ref_dist: u32, b_pyramid: bool,
  ) -> Self {
    self.gop_size = gop_size;
    self.ref_dist = ref_dist;
    self.b_pyramid = b_pyramid;
    self
  }

  /// Require decoder buffer conformance.
  pub const fn with_hrd(
    mut self, buffer_size: u64, initial_delay: u64,
  ) -> Self {
    self.hrd = Some(HrdConfig { buffer_size, initial_delay });
    self
  }

  /// Limit the size of every frame.
  pub const fn with_max_frame_size(mut self, bits: u64) -> Self {
    self.max_frame_size = Some(bits);
    self
  }

  /// Limit the average bitrate over any `length` consecutive frames.
  pub const fn with_sliding_window(
    mut self, max_avg_bitrate: u64, length: u32,
  ) -> Self {
    self.sliding_window =
      Some(SlidingWindowConfig { max_avg_bitrate, length });
    self
  }

  /// Bound the QP of each frame type.
  pub const fn with_qp_limits(mut self, limits: QpLimits) -> Self {
    self.qp_limits = Some(limits);
    self
  }

  /// Allow or forbid recoding.
  pub const fn with_recode(mut self, recode: bool) -> Self {
    self.recode = recode;
    self
  }

  /// Frames per second as a float.
  pub fn fps(&self) -> f64 {
    self.frame_rate.as_f64()
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if a setting is out of range or the
  ///   settings contradict each other.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    if self.width == 0 || self.width > u16::MAX as usize {
      return Err(InvalidWidth(self.width));
    }
    if self.height == 0 || self.height > u16::MAX as usize {
      return Err(InvalidHeight(self.height));
    }
    if self.frame_rate.num == 0 || self.frame_rate.num > u32::MAX as u64 {
      return Err(InvalidFrameRateNum {
        actual: self.frame_rate.num,
        max: u32::MAX as u64,
      });
    }
    if self.frame_rate.den == 0 || self.frame_rate.den > u32::MAX as u64 {
      return Err(InvalidFrameRateDen {
        actual: self.frame_rate.den,
        max: u32::MAX as u64,
      });
    }
    if !(8..=14).contains(&self.bit_depth) {
      return Err(InvalidBitDepth(self.bit_depth));
    }
    if self.target_bitrate == 0 {
      return Err(TargetBitrateNeeded);
    }
    if self.ref_dist == 0 || self.ref_dist > MAX_REF_DIST {
      return Err(InvalidRefDist { actual: self.ref_dist, max: MAX_REF_DIST });
    }
    if let Some(hrd) = self.hrd {
      if hrd.buffer_size == 0 {
        return Err(InvalidBufferSize(hrd.buffer_size));
      }
      if hrd.initial_delay == 0 || hrd.initial_delay > hrd.buffer_size {
        return Err(InvalidInitialDelay {
          actual: hrd.initial_delay,
          max: hrd.buffer_size,
        });
      }
    }
    if self.max_frame_size == Some(0) {
      return Err(InvalidMaxFrameSize(0));
    }
    if let Some(win) = self.sliding_window {
      if win.length == 0 || win.length > u16::MAX as u32 {
        return Err(InvalidSlidingWindowLength {
          actual: win.length,
          max: u16::MAX as u32,
        });
      }
      if win.max_avg_bitrate < self.target_bitrate {
        return Err(InvalidSlidingWindowBitrate {
          actual: win.max_avg_bitrate,
          min: self.target_bitrate,
        });
      }
    }

    Ok(())
  }
}

const MAX_REF_DIST: u32 = 32;

impl fmt::Display for RateControlConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
    let opt = |v: Option<u64>| v.map_or("none".to_string(), |v| v.to_string());
    let pairs = [
      ("mode", self.mode.to_string()),
      ("bitrate", self.target_bitrate.to_string()),
      ("max_bitrate", self.max_bitrate.to_string()),
      ("fps", self.frame_rate.to_string()),
      ("width", self.width.to_string()),
      ("height", self.height.to_string()),
      ("chroma", self.chroma_sampling.to_string()),
      ("bit_depth", self.bit_depth.to_string()),
      ("gop", self.gop_size.to_string()),
      ("ref_dist", self.ref_dist.to_string()),
      ("b_pyramid", self.b_pyramid.to_string()),
      ("hrd_buffer", opt(self.hrd.map(|h| h.buffer_size))),
      ("hrd_delay", opt(self.hrd.map(|h| h.initial_delay))),
      ("max_frame_size", opt(self.max_frame_size)),
      ("window_bitrate", opt(self.sliding_window.map(|w| w.max_avg_bitrate))),
      ("window_len", opt(self.sliding_window.map(|w| u64::from(w.length)))),
      ("recode", self.recode.to_string()),
    ];
    write!(
      f,
      "{}",
      pairs.iter().map(|pair| format!("{}={}", pair.0, pair.1)).join(" ")
    )
  }
}

/// Settings of the lookahead controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookaheadConfig {
  /// Frames analysed ahead of the frame being encoded.
  pub depth: usize,
  /// Encoded frames whose actual size still counts against the budget.
  pub lookback: usize,
  /// Frames over which the prediction error is averaged.
  pub adaptation: usize,
}

impl Default for LookaheadConfig {
  fn default() -> Self {
    LookaheadConfig { depth: 100, lookback: 100, adaptation: 100 }
  }
}

impl LookaheadConfig {
  /// Largest supported lookahead depth.
  pub const MAX_DEPTH: usize = 1000;

  /// Set the lookahead depth.
  pub const fn with_depth(mut self, depth: usize) -> Self {
    self.depth = depth;
    self
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if a window length is out of range.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    use InvalidConfig::*;

    for actual in [self.depth, self.lookback, self.adaptation] {
      if actual == 0 || actual > Self::MAX_DEPTH {
        return Err(InvalidLookaheadFrames {
          actual,
          max: Self::MAX_DEPTH,
          min: 1,
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::str::FromStr;

  fn base() -> RateControlConfig {
    RateControlConfig::new().with_bitrate(1_000_000)
  }

  #[test]
  fn default_needs_bitrate() {
    assert_eq!(
      RateControlConfig::default().validate(),
      Err(InvalidConfig::TargetBitrateNeeded)
    );
    assert_eq!(base().validate(), Ok(()));
  }

  #[test]
  fn rejects_zero_frame_rate() {
    let cfg = base().with_frame_rate(Rational::new(0, 1));
    assert_eq!(
      cfg.validate(),
      Err(InvalidConfig::InvalidFrameRateNum {
        actual: 0,
        max: u32::MAX as u64
      })
    );
    let cfg = base().with_frame_rate(Rational::new(30, 0));
    assert!(matches!(
      cfg.validate(),
      Err(InvalidConfig::InvalidFrameRateDen { actual: 0, .. })
    ));
  }

  #[test]
  fn rejects_bad_hrd() {
    let cfg = base().with_hrd(0, 0);
    assert_eq!(cfg.validate(), Err(InvalidConfig::InvalidBufferSize(0)));
    let cfg = base().with_hrd(1_000, 2_000);
    assert_eq!(
      cfg.validate(),
      Err(InvalidConfig::InvalidInitialDelay { actual: 2_000, max: 1_000 })
    );
  }

  #[test]
  fn rejects_bad_window() {
    let cfg = base().with_sliding_window(2_000_000, 0);
    assert!(matches!(
      cfg.validate(),
      Err(InvalidConfig::InvalidSlidingWindowLength { actual: 0, .. })
    ));
    let cfg = base().with_sliding_window(500_000, 30);
    assert_eq!(
      cfg.validate(),
      Err(InvalidConfig::InvalidSlidingWindowBitrate {
        actual: 500_000,
        min: 1_000_000
      })
    );
  }

  #[test]
  fn qp_limits_consistency() {
    let good = QpLimits::uniform(QpRange::new(10, 40));
    assert!(good.is_consistent());
    let inverted = QpLimits { p: QpRange::new(40, 10), ..good };
    assert!(!inverted.is_consistent());
    let zero = QpLimits { b: QpRange::new(0, 30), ..good };
    assert!(!zero.is_consistent());
    let high = QpLimits { i: QpRange::new(10, 52), ..good };
    assert!(!high.is_consistent());
  }

  #[test]
  fn mode_parses() {
    assert!(matches!(
      RateControlMode::from_str("Vbr"),
      Ok(RateControlMode::Vbr)
    ));
    assert!(matches!(
      RateControlMode::from_str("Cbr"),
      Ok(RateControlMode::Cbr)
    ));
    assert!(RateControlMode::from_str("cqp").is_err());
  }

  #[test]
  fn display_lists_settings() {
    let s = base().with_hrd(2_000_000, 1_000_000).to_string();
    assert!(s.starts_with("mode=Cbr bitrate=1000000 "));
    assert!(s.contains(" hrd_buffer=2000000 hrd_delay=1000000 "));
    assert!(s.ends_with(" recode=true"));
  }

  #[test]
  fn lookahead_bounds() {
    assert_eq!(LookaheadConfig::default().validate(), Ok(()));
    assert!(LookaheadConfig::default().with_depth(0).validate().is_err());
  }
}
