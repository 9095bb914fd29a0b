// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::api::config::InvalidConfig;
use crate::serialize::{Deserialize, Serialize};

use std::fmt;

use thiserror::*;

/// A rational number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Rational {
  /// Numerator.
  pub num: u64,
  /// Denominator.
  pub den: u64,
}

impl Rational {
  /// Creates a rational number from the given numerator and denominator.
  pub const fn new(num: u64, den: u64) -> Self {
    Rational { num, den }
  }

  /// Returns the rational number as a floating-point number.
  pub fn as_f64(self) -> f64 {
    self.num as f64 / self.den as f64
  }
}

impl fmt::Display for Rational {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.num, self.den)
  }
}

#[cfg(feature = "serialize")]
impl serde::Serialize for Rational {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    (self.num, self.den).serialize(serializer)
  }
}

#[cfg(feature = "serialize")]
impl<'a> serde::Deserialize<'a> for Rational {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'a>,
  {
    let (num, den) = serde::Deserialize::deserialize(deserializer)?;

    Ok(Rational::new(num, den))
  }
}

/// Coding type of a frame, as far as rate control is concerned.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash, Serialize, Deserialize)]
#[repr(C)]
pub enum FrameType {
  /// Intra frame, including IDR.
  I,
  /// Forward predicted frame.
  P,
  /// Bidirectionally predicted frame.
  B,
}

impl FrameType {
  /// Index into per-type tables.
  #[inline]
  pub const fn index(self) -> usize {
    self as usize
  }

  /// Returns whether the frame is intra only.
  #[inline]
  pub fn is_intra(self) -> bool {
    self == FrameType::I
  }
}

impl fmt::Display for FrameType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::FrameType::*;
    match self {
      I => write!(f, "I frame"),
      P => write!(f, "P frame"),
      B => write!(f, "B frame"),
    }
  }
}

/// What the frame scheduler tells rate control about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameParams {
  /// Position in coding order.
  pub encode_order: u64,
  /// Position in display order.
  pub display_order: u64,
  /// Coding type.
  pub frame_type: FrameType,
  /// Layer inside the B-pyramid, 0 for non-hierarchical frames.
  pub pyramid_layer: u32,
  /// Number of encodes of this frame that already happened.
  ///
  /// 0 for the first encode, incremented for every recode.
  pub attempt: u32,
}

impl FrameParams {
  /// Describes the first encode of a frame.
  pub const fn new(
    encode_order: u64, display_order: u64, frame_type: FrameType,
    pyramid_layer: u32,
  ) -> Self {
    FrameParams {
      encode_order,
      display_order,
      frame_type,
      pyramid_layer,
      attempt: 0,
    }
  }

  /// Describes the next encode of the same frame.
  #[must_use]
  pub const fn recode(self) -> Self {
    FrameParams { attempt: self.attempt + 1, ..self }
  }
}

/// Verdict on a coded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrcStatus {
  /// The frame is accepted.
  Ok,
  /// The frame is too large, encode it again with the new QP.
  BigFrame,
  /// The frame is too small, encode it again with the new QP.
  SmallFrame,
  /// The frame is too large even at the highest usable QP.
  ///
  /// It must be accepted or skipped as it is.
  PanicBigFrame,
  /// The frame is too small even at the lowest usable QP.
  ///
  /// It must be accepted or padded as it is.
  PanicSmallFrame,
}

impl BrcStatus {
  /// Returns whether the frame overflowed its budget.
  #[inline]
  pub fn is_big(self) -> bool {
    matches!(self, BrcStatus::BigFrame | BrcStatus::PanicBigFrame)
  }

  /// Returns whether the frame fell short of its budget.
  #[inline]
  pub fn is_small(self) -> bool {
    matches!(self, BrcStatus::SmallFrame | BrcStatus::PanicSmallFrame)
  }

  /// Returns whether no further QP change can help.
  #[inline]
  pub fn is_panic(self) -> bool {
    matches!(self, BrcStatus::PanicBigFrame | BrcStatus::PanicSmallFrame)
  }

  /// Returns whether the caller should encode the frame again.
  #[inline]
  pub fn needs_recode(self) -> bool {
    matches!(self, BrcStatus::BigFrame | BrcStatus::SmallFrame)
  }

  /// The terminal variant of this verdict.
  #[must_use]
  pub fn escalate(self) -> Self {
    match self {
      BrcStatus::BigFrame => BrcStatus::PanicBigFrame,
      BrcStatus::SmallFrame => BrcStatus::PanicSmallFrame,
      other => other,
    }
  }
}

impl fmt::Display for BrcStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use self::BrcStatus::*;
    f.write_str(match self {
      Ok => "ok",
      BigFrame => "big frame",
      SmallFrame => "small frame",
      PanicBigFrame => "panic big frame",
      PanicSmallFrame => "panic small frame",
    })
  }
}

/// Result of reporting a coded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStatus {
  /// Verdict on the frame.
  pub status: BrcStatus,
  /// QP to use for the next encode of this frame when a recode is asked.
  pub qp: i32,
  /// Smallest size in bits the decoder buffer accepts for this frame.
  ///
  /// Always 0 without HRD.
  pub min_size: u64,
}

/// Errors reported by the rate controllers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum RateControlError {
  /// The configuration was rejected.
  #[error("invalid configuration: {0}")]
  InvalidConfig(#[from] InvalidConfig),
  /// The operation needs an initialized controller.
  #[error("rate control is not initialized")]
  NotInitialized,
  /// The caller did not follow the recode protocol.
  #[error(
    "recode protocol violation: frame {pending:?} pending, got frame {got} \
     (attempt {attempt})"
  )]
  RecodeProtocolViolation {
    /// The frame waiting for a recode, if any.
    pending: Option<u64>,
    /// The frame that was reported.
    got: u64,
    /// The attempt that was reported.
    attempt: u32,
  },
  /// The decoder buffer cannot hold the frame even after a panic.
  #[error("decoder buffer exhausted at frame {frame}")]
  BufferExhausted {
    /// Encode order of the frame.
    frame: u64,
  },
  /// The lookahead window holds no statistics for the frame.
  #[error("no lookahead statistics for frame {frame}")]
  MissingStatistics {
    /// Encode order of the frame.
    frame: u64,
  },
}
