// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::util::FrameType;
use crate::rate::params::RateParameters;
use crate::util::clamp;

/// A scene change was detected on the last frame.
pub const SCENE_CHANGE_DETECTED: u8 = 1;
/// A new scene started on a reference frame and is still fresh.
pub const SCENE_CHANGE_START: u8 = 16;

/// Per-stream memory of the single pass controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameControlState {
  /// QP anchors per frame type.
  pub quant_i: i32,
  pub quant_p: i32,
  pub quant_b: i32,
  /// QP of the frame being decided and its legal range.
  pub quant: i32,
  pub quant_min: i32,
  pub quant_max: i32,
  pub to_recode: bool,
  pub panic: bool,
  pub encode_order: Option<u64>,
  pub poc: u64,
  pub last_intra_order: u64,
  pub scene_change: u8,
  pub scene_change_poc: u64,
  pub last_non_b_frame_size: f64,
  /// Moving averages of the frame size.
  pub long_average: f64,
  pub short_average: f64,
  /// Moving average of `1/QP`.
  pub dequant_average: f64,
  /// Sum of `coded - nominal` bits over the stream.
  pub total_deviation: i64,
  /// Distortion weighted rate of the last P frame and of the last scene
  /// anchor.
  pub e_rate: f64,
  pub e_rate_scene: f64,
}

impl FrameControlState {
  pub fn new(bits_per_frame: f64) -> Self {
    FrameControlState {
      quant_i: 0,
      quant_p: 0,
      quant_b: 0,
      quant: 0,
      quant_min: 0,
      quant_max: 0,
      to_recode: false,
      panic: false,
      encode_order: None,
      poc: 0,
      last_intra_order: 0,
      scene_change: 0,
      scene_change_poc: 0,
      last_non_b_frame_size: 0.,
      long_average: bits_per_frame,
      short_average: bits_per_frame,
      dequant_average: 0.,
      total_deviation: 0,
      e_rate: 0.,
      e_rate_scene: 0.,
    }
  }

  /// Moves every anchor so that a frame of `frame_type` at `layer` gets
  /// `qp`, keeping the fixed offsets between types.
  pub fn set_anchor(
    &mut self, qp: i32, frame_type: FrameType, layer: u32, min: i32, max: i32,
  ) {
    let layer = layer as i32;
    self.quant = qp;
    let (i, p, b) = match frame_type {
      FrameType::I => (qp, qp + 1, qp + 2),
      FrameType::P => {
        let qp = qp - layer;
        (qp - 1, qp, qp + 1)
      }
      FrameType::B => {
        let qp = qp - (layer - 1).max(0);
        (qp - 2, qp - 1, qp)
      }
    };
    self.quant_i = clamp(i, min, max);
    self.quant_p = clamp(p, min, max);
    self.quant_b = clamp(b, min, max);
  }

  /// QP a new frame of `frame_type` at `layer` would get.
  pub fn active_qp(
    &self, params: &RateParameters, frame_type: FrameType, layer: u32,
  ) -> i32 {
    let layer = layer as i32;
    let qp = match frame_type {
      FrameType::I => self.quant_i,
      FrameType::P => self.quant_p + layer,
      FrameType::B => self.quant_b + (layer - 1).max(0),
    };
    params.clip_qp(frame_type, qp)
  }

  pub fn reset_averages(&mut self, bits_per_frame: f64) {
    self.long_average = bits_per_frame;
    self.short_average = bits_per_frame;
  }

  #[inline]
  pub fn is_scene_start(&self) -> bool {
    self.scene_change & SCENE_CHANGE_START != 0
  }
}
