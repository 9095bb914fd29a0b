// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use crate::api::util::BrcStatus;
use crate::rate::params::HrdParams;
use crate::rate::MAX_RECODE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrdState {
  /// No frame has been evaluated yet.
  Idle,
  /// The last evaluation was the first encode of its frame.
  Committed,
  /// The last evaluation was a recode, rolled back before it ran.
  SpeculativeRecode,
}

/// Leaky bucket model of the decoder buffer.
///
/// Fullness is the amount of bits in the decoder buffer right before a
/// frame is removed from it. Every frame removes its size and the channel
/// refills `bits_per_frame`.
#[derive(Debug, Clone, Copy)]
pub struct Hrd {
  buffer_size: f64,
  bits_per_frame: f64,
  initial_delay: f64,
  cbr: bool,
  fullness: f64,
  // fullness before the frame under evaluation
  prev_fullness: f64,
  frame_num: u64,
  min_frame_size: f64,
  max_frame_size: f64,
  underflow_qp: i32,
  overflow_qp: i32,
  state: HrdState,
}

impl Hrd {
  pub fn new(params: &HrdParams) -> Self {
    let mut hrd = Hrd {
      buffer_size: params.buffer_size,
      bits_per_frame: params.bits_per_frame,
      initial_delay: params.initial_delay,
      cbr: params.cbr,
      fullness: params.initial_delay,
      prev_fullness: params.initial_delay,
      frame_num: 0,
      min_frame_size: 0.,
      max_frame_size: 0.,
      underflow_qp: 0,
      overflow_qp: 999,
      state: HrdState::Idle,
    };
    hrd.update_limits();
    hrd
  }

  /// Starts a new frame from the current fullness.
  pub fn begin_frame(&mut self) {
    self.prev_fullness = self.fullness;
    self.frame_num += 1;
    self.update_limits();
  }

  fn update_limits(&mut self) {
    self.max_frame_size = (self.fullness - 1.).max(0.);
    self.min_frame_size = if self.cbr {
      (self.fullness + 2. + self.bits_per_frame - self.buffer_size).max(0.)
    } else {
      0.
    };
    self.min_frame_size = self.min_frame_size.min(self.max_frame_size);
  }

  /// Removes a frame of `coded_bits` from the buffer.
  ///
  /// A recode (`attempt > 0`) first rolls the buffer back to where the
  /// frame started. The QP bounds of the frame start out as one step
  /// outside `[qp_min, qp_max]`.
  pub fn evaluate(
    &mut self, coded_bits: f64, attempt: u32, qp_min: i32, qp_max: i32,
  ) -> BrcStatus {
    if attempt == 0 || self.state == HrdState::Idle {
      self.begin_frame();
      self.underflow_qp = qp_min - 1;
      self.overflow_qp = qp_max + 1;
      self.state = HrdState::Committed;
    } else {
      self.fullness = self.prev_fullness;
      self.update_limits();
      self.state = HrdState::SpeculativeRecode;
    }

    let top = self.buffer_size - 1.;
    let mut status = BrcStatus::Ok;
    let remaining = self.fullness - coded_bits;
    if remaining < 2. {
      self.fullness = self.bits_per_frame.min(top);
      status = BrcStatus::BigFrame;
    } else {
      let refilled = remaining + self.bits_per_frame;
      if refilled > top {
        self.fullness = top;
        if self.cbr {
          status = BrcStatus::SmallFrame;
        }
      } else {
        self.fullness = refilled;
      }
    }

    if attempt >= MAX_RECODE {
      status = status.escalate();
    }
    status
  }

  /// Narrows the QP range of the frame after a recode verdict at `qp`.
  pub fn record_recode_bound(&mut self, status: BrcStatus, qp: i32) {
    if status.is_big() {
      self.underflow_qp = qp;
    } else if status.is_small() {
      self.overflow_qp = qp;
    }
  }

  pub fn min_qp_bound(&self) -> i32 {
    self.underflow_qp + 1
  }

  pub fn max_qp_bound(&self) -> i32 {
    self.overflow_qp - 1
  }

  /// Size a recoded frame should aim for.
  pub fn target_size_for_recode(&self, status: BrcStatus) -> f64 {
    if status.is_big() {
      self.max_frame_size * 3. / 4.
    } else if status.is_small() {
      self.min_frame_size * 5. / 4.
    } else {
      self.max_frame_size
    }
  }

  /// Distance from the fullness the VBR feedback steers towards.
  pub fn buffer_deviation(&self, target_bps: f64) -> f64 {
    let half = self.buffer_size / 2.;
    let target = self.initial_delay.min(half).max(half.min(target_bps * 2.));
    target - self.fullness
  }

  pub fn fullness(&self) -> f64 {
    self.fullness
  }

  pub fn min_frame_size(&self) -> f64 {
    self.min_frame_size
  }

  pub fn max_frame_size(&self) -> f64 {
    self.max_frame_size
  }

  pub fn frame_num(&self) -> u64 {
    self.frame_num
  }

  pub fn state(&self) -> HrdState {
    self.state
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaChaRng;

  fn hrd(cbr: bool) -> Hrd {
    Hrd::new(&HrdParams {
      buffer_size: 1_000_000.,
      initial_delay: 500_000.,
      bits_per_frame: 100_000.,
      cbr,
    })
  }

  #[test]
  fn steady_stream_keeps_fullness() {
    let mut h = hrd(true);
    assert_eq!(h.state(), HrdState::Idle);
    for _ in 0..10 {
      assert_eq!(h.evaluate(100_000., 0, 1, 51), BrcStatus::Ok);
      assert_eq!(h.fullness(), 500_000.);
    }
    assert_eq!(h.frame_num(), 10);
    assert_eq!(h.state(), HrdState::Committed);
  }

  #[test]
  fn underflow_is_big_frame() {
    let mut h = hrd(false);
    assert_eq!(h.evaluate(600_000., 0, 1, 51), BrcStatus::BigFrame);
    assert_eq!(h.fullness(), 100_000.);
    assert_eq!(h.max_frame_size(), 499_999.);
    assert_eq!(h.target_size_for_recode(BrcStatus::BigFrame), 374_999.25);
  }

  #[test]
  fn overflow_is_small_frame_for_cbr_only() {
    let mut h = hrd(true);
    assert_eq!(h.evaluate(100_000., 0, 1, 51), BrcStatus::Ok);
    // 500k + 5 * 100k refill hits the top
    for _ in 0..4 {
      h.evaluate(0., 0, 1, 51);
    }
    assert_eq!(h.evaluate(0., 0, 1, 51), BrcStatus::SmallFrame);
    assert_eq!(h.fullness(), 999_999.);
    assert!(h.min_frame_size() > 0.);

    let mut h = hrd(false);
    for _ in 0..10 {
      assert_eq!(h.evaluate(0., 0, 1, 51), BrcStatus::Ok);
    }
    assert_eq!(h.fullness(), 999_999.);
    assert_eq!(h.min_frame_size(), 0.);
  }

  #[test]
  fn recode_rolls_back() {
    let mut h = hrd(true);
    assert_eq!(h.evaluate(700_000., 0, 1, 51), BrcStatus::BigFrame);
    h.record_recode_bound(BrcStatus::BigFrame, 30);
    assert_eq!(h.min_qp_bound(), 31);
    assert_eq!(h.max_qp_bound(), 51);

    assert_eq!(h.evaluate(300_000., 1, 1, 51), BrcStatus::Ok);
    assert_eq!(h.state(), HrdState::SpeculativeRecode);
    assert_eq!(h.fullness(), 300_000.);
    // bounds survive recodes
    assert_eq!(h.min_qp_bound(), 31);
    assert_eq!(h.frame_num(), 1);

    assert_eq!(h.evaluate(100_000., 0, 1, 51), BrcStatus::Ok);
    assert_eq!(h.min_qp_bound(), 1);
    assert_eq!(h.fullness(), 300_000.);
  }

  #[test]
  fn final_attempt_panics() {
    let mut h = hrd(true);
    h.evaluate(900_000., 0, 1, 51);
    h.evaluate(900_000., 1, 1, 51);
    assert_eq!(h.evaluate(900_000., 2, 1, 51), BrcStatus::PanicBigFrame);
  }

  #[test]
  fn buffer_deviation_targets_half_buffer() {
    let h = hrd(false);
    assert_eq!(h.buffer_deviation(1_000_000.), 0.);
    let mut h = hrd(false);
    h.evaluate(300_000., 0, 1, 51);
    assert_eq!(h.buffer_deviation(1_000_000.), 200_000.);
  }

  #[test]
  fn invariants_hold_for_random_sizes() {
    let mut rng = ChaChaRng::from_seed([0; 32]);
    for cbr in [true, false] {
      let mut h = hrd(cbr);
      for _ in 0..2_000 {
        let attempts = rng.gen_range(0..3);
        for attempt in 0..=attempts {
          let bits = rng.gen_range(0. ..400_000.);
          h.evaluate(bits, attempt, 1, 51);
          assert!(h.min_frame_size() <= h.max_frame_size());
          assert!(h.fullness() >= 0.);
          assert!(h.fullness() <= 999_999.);
        }
      }
    }
  }
}
