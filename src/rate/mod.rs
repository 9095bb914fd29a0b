// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Bitrate control.
//!
//! Two controllers implement [`RateControl`]: [`SinglePassController`]
//! reacts to each coded frame and may ask for it to be encoded again,
//! [`LookaheadController`] plans the QP of a window of frames from their
//! pre-analysis statistics before any of them is encoded.

pub mod hrd;
pub mod lookahead;
pub mod params;
pub mod single_pass;
pub mod state;
pub mod window;

pub use self::lookahead::{
  FrameStatData, LookaheadController, LookaheadStatQueue, ScaleSolution,
};
pub use self::params::{ConfigChange, HrdParams, RateParameters};
pub use self::single_pass::{Phase, SinglePassController};

use crate::api::config::RateControlConfig;
use crate::api::util::{FrameParams, FrameStatus, RateControlError};

/// Extra encodes a frame may get before its verdict becomes terminal.
pub const MAX_RECODE: u32 = 2;

/// Period of the long moving average of the frame size.
pub const AB_PERIOD_LONG: f64 = 100.;
/// Period of the short moving average of the frame size.
pub const AB_PERIOD_SHORT: f64 = 5.;
/// Period of the moving average of `1/QP`.
pub const DQ_AB_PERIOD: f64 = 100.;
/// Frames over which the accumulated deviation is paid back.
pub const B_AB_PERIOD: f64 = 100.;

// These thresholds are empirical. They were tuned on 8-bit content at
// common frame rates.

/// Ratio of distortion weighted rates above which a frame starts a new
/// scene.
pub const SCENE_CHANGE_RATIO: f64 = 20.;
/// Ratio below which a frame right after a scene cut still belongs to the
/// old scene.
pub const OLD_SCENE_RATIO: f64 = 0.01;
/// Largest size, relative to the long average, of an old scene frame.
pub const OLD_SCENE_SIZE_FACTOR: f64 = 1.5;

/// Per-stream bitrate controller.
///
/// Calls for one stream must be made in encode order. A controller owns
/// all of its state, so independent streams can run on separate threads.
pub trait RateControl {
  /// Hands pre-analysis statistics of a future frame to the controller.
  ///
  /// Controllers without lookahead ignore them.
  fn submit_stat(&mut self, _stat: FrameStatData) {}

  /// Whether more statistics are needed before `order` can be planned.
  fn needs_stats(&self, _order: u64) -> bool {
    false
  }

  /// Whether the statistics of `order` itself were submitted.
  fn has_stats(&self, _order: u64) -> bool {
    true
  }

  /// Prepares the controller for `frame`, the next frame to be encoded.
  ///
  /// # Errors
  ///
  /// Returns `RateControlError` if the controller cannot plan the frame.
  fn pre_enc(&mut self, _frame: &FrameParams) -> Result<(), RateControlError> {
    Ok(())
  }

  /// QP to encode `frame` with.
  ///
  /// # Errors
  ///
  /// Returns `RateControlError` if the controller cannot plan the frame.
  fn frame_qp(&mut self, frame: &FrameParams) -> Result<i32, RateControlError>;

  /// Reports the size of `frame` coded at `qp_used`.
  ///
  /// # Errors
  ///
  /// - Returns `RecodeProtocolViolation` if a recode was asked for another
  ///   frame, or `frame` moves its QP against the last verdict.
  /// - Returns `BufferExhausted` if the decoder buffer cannot hold the
  ///   final encode of a frame.
  fn report(
    &mut self, frame: &FrameParams, qp_used: i32, coded_bits: u64,
  ) -> Result<FrameStatus, RateControlError>;

  /// Switches the controller to `cfg` in the middle of a stream.
  ///
  /// # Errors
  ///
  /// Returns `InvalidConfig` if `cfg` does not validate. The controller
  /// keeps its previous configuration in that case.
  fn reset(
    &mut self, cfg: &RateControlConfig,
  ) -> Result<ConfigChange, RateControlError>;
}
