// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use log::{debug, trace, warn};

use crate::api::config::{InvalidConfig, RateControlConfig};
use crate::api::util::*;
use crate::quantize::{qp_to_qstep, qstep_to_qp};
use crate::rate::hrd::Hrd;
use crate::rate::params::{ConfigChange, RateParameters};
use crate::rate::state::*;
use crate::rate::window::SlidingWindow;
use crate::rate::*;
use crate::util::{clamp, moving_average};

/// Exponent of the QP seed taken from the uncompressed frame size.
const INITIAL_QP_EXPONENT: f64 = 0.5;
/// Exponent of the QP rescale on a bitrate change.
const RESEED_EXPONENT: f64 = 0.32;
/// Exponent of the size correction applied to the dequantizer average.
const DEQUANT_EXPONENT: f64 = 1.2;
/// Dequantizer averaging period right after a recode that tightened the
/// QP, and one that loosened it.
const DQ_PERIOD_TIGHTEN: f64 = 16.;
const DQ_PERIOD_LOOSEN: f64 = 25.;
/// Slack added to the HRD minimum frame size for byte alignment.
const MIN_SIZE_SLACK: f64 = 7.;

/// How far a QP estimate may move from the current QP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpChange {
  /// Go straight to the estimate.
  Free,
  /// Move at most half way towards the end of the legal range.
  Limited,
  /// As `Limited`, and always by at least one step.
  Strict,
}

/// QP that would bring a frame of `total` bits to `target` bits.
///
/// The quantizer step scales with `(total / target)^exponent`. The QP is
/// left alone when it already sits at the end of `[min, max]` it would
/// have to move past.
pub fn new_qp(
  total: f64, target: f64, min: i32, max: i32, qp: i32, qp_offset: i32,
  exponent: f64, change: QpChange,
) -> i32 {
  let qstep = qp_to_qstep(qp, qp_offset) * (total / target).powf(exponent);
  let mut qp_new = qstep_to_qp(qstep, qp_offset);
  let limited = change != QpChange::Free;
  let strict = change == QpChange::Strict;

  if total < target {
    if qp <= min {
      return qp;
    }
    if limited {
      qp_new = qp_new.max((min + qp + 1) >> 1);
    }
    if strict {
      qp_new = qp_new.min(qp - 1);
    }
  } else {
    if qp >= max {
      return qp;
    }
    if limited {
      qp_new = qp_new.min((max + qp + 1) >> 1);
    }
    if strict {
      qp_new = qp_new.max(qp + 1);
    }
  }
  clamp(qp_new, min, max)
}

/// QP that pays back the accumulated deviation.
///
/// `offset` is the deviation normalized by its payback period and the
/// frame budget; `dequant` is the expected `1/QP`. The step away from `qp`
/// is limited to a small band unless a new scene starts.
pub fn new_qp_total(
  offset: f64, dequant: f64, min: i32, max: i32, qp: i32, pyramid: bool,
  scene_change: bool,
) -> i32 {
  let (lo, hi) = (1. / max as f64, 1. / min as f64);
  let offset = clamp(offset, -1., 1.);
  let mut dequant = clamp(dequant, lo, hi);
  dequant += (lo - dequant) * offset;
  dequant = clamp(dequant, lo, hi);
  let mut qp_new = (1. / dequant + 0.5) as i32;

  if scene_change {
    qp_new = clamp(qp_new, qp - 5, qp + 5);
  } else {
    let (small, large) = if pyramid { (2, 3) } else { (1, 2) };
    if qp_new >= qp + 5 {
      qp_new = qp + large;
    } else if qp_new > qp + 3 {
      qp_new = qp + small;
    } else if qp_new <= qp - 5 {
      qp_new = qp - large;
    } else if qp_new < qp - 2 {
      qp_new = qp - small;
    }
  }
  clamp(qp_new, min, max)
}

/// Scale of the deviation payback period at frame `num_in_gop` of a GOP.
///
/// Long at the start of a GOP and short right before the next intra frame,
/// so the intra frame does not drain the buffer.
pub fn gop_period_coeff(num_in_gop: u64, gop_size: u32) -> f64 {
  const MAX_CORRECTION: u32 = 30;
  const MAX_VALUE: f64 = 1.5;
  const MIN_VALUE: f64 = 1.;

  let gop = u64::from(gop_size);
  if gop_size < 2 || num_in_gop >= gop {
    return 1.;
  }
  let len = (gop_size / 2).min(MAX_CORRECTION) as u64;
  let k = |i: u64| {
    MAX_VALUE - (MAX_VALUE - MIN_VALUE) * i.min(len - 1) as f64 / len as f64
  };
  if num_in_gop < gop / 2 {
    k(num_in_gop)
  } else {
    1. / k(gop - 1 - num_in_gop)
  }
}

/// Where the controller stands in the encode/recode cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// The last reported frame was accepted.
  Committed,
  /// A QP was handed out for a frame that has not been reported yet.
  Proposed { order: u64 },
  /// The frame has to be encoded again.
  Recoding {
    order: u64,
    /// Attempt that got the verdict.
    attempt: u32,
    verdict: BrcStatus,
    /// QP of that attempt, offset included.
    qp: i32,
  },
  /// The frame got a terminal verdict and is kept as it is.
  Panicked { order: u64 },
}

impl Phase {
  fn pending(self) -> Option<u64> {
    match self {
      Phase::Recoding { order, .. } => Some(order),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy)]
struct WindowSample {
  size: f64,
  order: u64,
  panic: bool,
  scene_change: bool,
  attempt: u32,
}

/// Outcome of a report, applied by `SinglePassController::commit`.
#[derive(Debug, Clone, Copy)]
struct Decision {
  state: FrameControlState,
  hrd: Option<Hrd>,
  window: Option<WindowSample>,
  phase: Phase,
  status: FrameStatus,
}

/// Frame by frame feedback controller.
///
/// Each reported frame is accepted, or sent back to the encoder with a new
/// QP at most [`MAX_RECODE`] times before its verdict becomes terminal.
#[derive(Debug, Clone)]
pub struct SinglePassController {
  params: RateParameters,
  hrd: Option<Hrd>,
  window: Option<SlidingWindow>,
  state: FrameControlState,
  phase: Phase,
}

impl SinglePassController {
  /// Creates a controller for `cfg`.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the configuration does not validate.
  pub fn new(cfg: &RateControlConfig) -> Result<Self, InvalidConfig> {
    Ok(Self::with_params(RateParameters::derive(cfg)?))
  }

  fn with_params(params: RateParameters) -> Self {
    let bpf = params.bits_per_frame;
    let mut state = FrameControlState::new(bpf);

    let (min, max) = params.qp_bounds(FrameType::I);
    let qp = new_qp(
      params.raw_frame_bits(),
      bpf,
      min,
      max,
      1,
      params.qp_offset,
      INITIAL_QP_EXPONENT,
      QpChange::Free,
    );
    state.set_anchor(qp, FrameType::I, 0, min, max);
    state.dequant_average = if qp > 0 { 1. / qp as f64 } else { 1. };

    debug!(
      "single pass: {:.0} bits per frame, initial qp {}",
      bpf,
      qp - params.qp_offset
    );

    SinglePassController {
      hrd: params.hrd.as_ref().map(Hrd::new),
      window: Self::build_window(&params),
      params,
      state,
      phase: Phase::Committed,
    }
  }

  fn build_window(params: &RateParameters) -> Option<SlidingWindow> {
    params.sliding_window.map(|w| {
      SlidingWindow::new(
        w.length,
        w.max_avg_bitrate as f64 / params.fps,
        params.bits_per_frame,
      )
    })
  }

  pub fn params(&self) -> &RateParameters {
    &self.params
  }

  pub fn state(&self) -> &FrameControlState {
    &self.state
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  pub fn hrd(&self) -> Option<&Hrd> {
    self.hrd.as_ref()
  }

  pub fn window(&self) -> Option<&SlidingWindow> {
    self.window.as_ref()
  }

  /// QP for `frame`, without the bit depth offset.
  ///
  /// A frame that is waiting for a recode gets the QP of its verdict.
  pub fn get_frame_ctrl(&mut self, frame: &FrameParams) -> i32 {
    let order = frame.encode_order;
    let qp = if self.state.encode_order == Some(order) {
      self.state.quant
    } else {
      let frame_type = self.params.rate_class(frame.frame_type);
      self.state.active_qp(&self.params, frame_type, frame.pyramid_layer)
    };
    if matches!(self.phase, Phase::Committed | Phase::Panicked { .. }) {
      self.phase = Phase::Proposed { order };
    }
    trace!(
      "frame {} ({}, layer {}): qp {}",
      order,
      frame.frame_type,
      frame.pyramid_layer,
      qp - self.params.qp_offset
    );
    qp - self.params.qp_offset
  }

  /// Reports `frame` coded at `qp_used` to `coded_bits` bits.
  ///
  /// # Errors
  ///
  /// - Returns `RecodeProtocolViolation` if another frame is waiting for a
  ///   recode, or the QP moved against the verdict.
  /// - Returns `BufferExhausted` if the decoder buffer still cannot hold a
  ///   frame after a terminal verdict.
  pub fn update(
    &mut self, frame: &FrameParams, qp_used: i32, coded_bits: u64,
  ) -> Result<FrameStatus, RateControlError> {
    let decision = self.decide(frame, qp_used, coded_bits).map_err(|e| {
      warn!("frame {}: {}", frame.encode_order, e);
      e
    })?;
    Ok(self.commit(frame, decision))
  }

  fn check_protocol(
    &self, frame: &FrameParams, qp: i32,
  ) -> Result<(), RateControlError> {
    if let Phase::Recoding { order, verdict, qp: last_qp, .. } = self.phase {
      let wrong_frame = frame.encode_order != order || frame.attempt == 0;
      let wrong_way = (verdict.is_big() && qp < last_qp)
        || (verdict.is_small() && qp > last_qp);
      if wrong_frame || wrong_way {
        return Err(RateControlError::RecodeProtocolViolation {
          pending: self.phase.pending(),
          got: frame.encode_order,
          attempt: frame.attempt,
        });
      }
    }
    Ok(())
  }

  fn decide(
    &self, frame: &FrameParams, qp_used: i32, coded_bits: u64,
  ) -> Result<Decision, RateControlError> {
    let p = &self.params;
    let off = p.qp_offset;
    let qp = qp_used + off;
    self.check_protocol(frame, qp)?;

    let order = frame.encode_order;
    let attempt = frame.attempt;
    let layer = frame.pyramid_layer;
    let frame_type = p.rate_class(frame.frame_type);
    let is_intra = frame_type == FrameType::I;
    let bits = coded_bits as f64;
    let bpf = p.bits_per_frame;

    let mut ctx = self.state;
    let mut hrd = self.hrd;

    let mut long_avg = moving_average(ctx.long_average, bits, AB_PERIOD_LONG);
    let mut short_avg =
      moving_average(ctx.short_average, bits, AB_PERIOD_SHORT);
    let e_rate = bits * qp_to_qstep(qp, off).sqrt();
    let reference_rate = if is_intra { ctx.e_rate_scene } else { ctx.e_rate };
    let e2pe = if reference_rate == 0. {
      SCENE_CHANGE_RATIO + 1.
    } else {
      e_rate / reference_rate
    };
    let max_frame_size_mode = match p.max_frame_size {
      Some(max) => {
        !p.is_cbr()
          && (max as f64) < bpf * 2.
          && (ctx.total_deviation as f64) < -bpf * p.fps
      }
      None => false,
    };

    let mut status = BrcStatus::Ok;
    let mut scene_start = false;
    let mut need_update_qp = false;
    let mut min_size = 0.;

    if attempt == 0 || ctx.encode_order != Some(order) {
      if is_intra {
        ctx.last_intra_order = order;
      }
      ctx.encode_order = Some(order);
      ctx.poc = frame.display_order;
      ctx.to_recode = false;
      ctx.panic = false;
      (ctx.quant_min, ctx.quant_max) = p.qp_bounds(frame_type);
      if ctx.scene_change != 0
        && (ctx.poc > ctx.scene_change_poc + 1 || ctx.poc == 0)
      {
        ctx.scene_change &= !SCENE_CHANGE_START;
      }
      need_update_qp = true;
    }
    ctx.quant = qp;

    if e2pe > SCENE_CHANGE_RATIO {
      long_avg = bpf;
      short_avg = bpf;
      ctx.reset_averages(bpf);
      ctx.scene_change |= SCENE_CHANGE_DETECTED;
      if frame_type != FrameType::B {
        scene_start = true;
        ctx.scene_change |= SCENE_CHANGE_START;
        ctx.e_rate_scene = e_rate;
        let since_anchor = frame.display_order < ctx.scene_change_poc
          || frame.display_order - ctx.scene_change_poc
            >= (p.fps as u64).min(u64::from(p.ref_dist));
        if since_anchor {
          ctx.dequant_average = 1. / ctx.quant as f64;
        }
        ctx.scene_change_poc = frame.display_order;
      }
      debug!("frame {}: scene change, rate ratio {:.2}", order, e2pe);
    }

    if let Some(hrd) = hrd.as_mut() {
      status = hrd.evaluate(bits, attempt, ctx.quant_min, ctx.quant_max);
      if status != BrcStatus::Ok && ctx.panic {
        return Err(RateControlError::BufferExhausted { frame: order });
      }
      if status.needs_recode() {
        hrd.record_recode_bound(status, qp);
      } else {
        need_update_qp = true;
      }
      min_size = hrd.min_frame_size() + MIN_SIZE_SLACK;
    }

    let scene_or_intra = scene_start || is_intra;
    let mut size_limit = f64::MAX;
    if let Some(window) = &self.window {
      size_limit =
        size_limit.min(window.max_allowed(ctx.panic, scene_or_intra, attempt));
    }
    if let Some(max) = p.max_frame_size {
      size_limit = size_limit.min(max as f64);
    }

    let recode = |ctx, hrd, verdict, qp_new, min, max| {
      let mut decision = Decision {
        state: ctx,
        hrd,
        window: None,
        phase: Phase::Committed,
        status: FrameStatus { status: verdict, qp: 0, min_size: 0 },
      };
      let status = set_recode(
        &mut decision.state,
        verdict,
        qp,
        qp_new,
        min,
        max,
        attempt,
      );
      decision.phase = if status.is_panic() {
        Phase::Panicked { order }
      } else {
        Phase::Recoding { order, attempt, verdict: status, qp }
      };
      decision.status = FrameStatus {
        status,
        qp: decision.state.quant - off,
        min_size: min_size as u64,
      };
      decision
    };

    if attempt < MAX_RECODE && !ctx.panic {
      let target = bpf.max(long_avg);
      let factor = if order == 0 {
        6.
      } else if scene_or_intra {
        8.
      } else {
        4.
      };
      let pyramid = if p.b_pyramid { 1.5 } else { 1. };
      let mut max_fs = (factor * target * pyramid).min(size_limit);
      let (mut qmin, mut qmax) = (ctx.quant_min, ctx.quant_max);
      if let Some(hrd) = &hrd {
        let hrd_max = hrd.max_frame_size();
        max_fs = max_fs.min(if scene_or_intra {
          3.5 / 9. * hrd_max + 5.5 / 9. * target
        } else {
          2.5 / 9. * hrd_max + 6.5 / 9. * target
        });
        qmax = hrd.max_qp_bound().min(qmax);
        qmin = hrd.min_qp_bound().max(qmin);
      }
      max_fs = max_fs.max(target);

      if bits > max_fs && qp < qmax {
        let qp_new =
          new_qp(bits, max_fs, qmin, qmax, qp, off, 1., QpChange::Limited);
        if qp_new > qp {
          need_update_qp = false;
          if qp_new > ctx.active_qp(p, frame_type, layer) {
            let anchor = if max_frame_size_mode { qp_new - 1 } else { qp_new };
            restart(
              &mut ctx, anchor, qp_new, frame_type, layer, qmin, qmax, bpf,
            );
            long_avg = bpf;
            short_avg = bpf;
          }
          if p.recode {
            return Ok(recode(
              ctx,
              hrd,
              BrcStatus::BigFrame,
              qp_new,
              qmin,
              qmax,
            ));
          }
        }
      }

      if bits > max_fs
        && qp == qmax
        && !is_intra
        && p.panic
        && !ctx.panic
        && p.is_frame_before_intra(order, ctx.last_intra_order)
      {
        return Ok(recode(ctx, hrd, BrcStatus::PanicBigFrame, qp, qmin, qmax));
      }

      if let Some(hrd_model) = &hrd {
        if attempt == 0 && qp < qmax {
          let fa_max =
            1. / 9. * hrd_model.max_frame_size() + 8. / 9. * long_avg;
          if short_avg > fa_max {
            let qp_new = new_qp(
              short_avg,
              fa_max,
              qmin,
              qmax,
              qp,
              off,
              0.5,
              QpChange::Limited,
            );
            if qp_new > qp {
              need_update_qp = false;
              if qp_new > ctx.active_qp(p, frame_type, layer) {
                restart(
                  &mut ctx, qp_new, qp_new, frame_type, layer, qmin, qmax,
                  bpf,
                );
                long_avg = bpf;
                short_avg = bpf;
              }
              if p.recode {
                return Ok(recode(
                  ctx,
                  hrd,
                  BrcStatus::BigFrame,
                  qp_new,
                  qmin,
                  qmax,
                ));
              }
            }
          }
        }
      }
    }

    let over_limit = bits > size_limit;
    if (status != BrcStatus::Ok || over_limit) && p.recode && !ctx.panic {
      let quant = ctx.quant;
      let mut qp_new = quant;
      if over_limit {
        status = BrcStatus::BigFrame;
        qp_new = new_qp(
          bits,
          size_limit,
          ctx.quant_min,
          ctx.quant_max,
          quant,
          off,
          1.,
          QpChange::Strict,
        );
      } else if let (true, Some(hrd)) = (status.needs_recode(), &hrd) {
        qp_new = new_qp(
          bits,
          hrd.target_size_for_recode(status),
          ctx.quant_min,
          ctx.quant_max,
          quant,
          off,
          1.,
          QpChange::Strict,
        );
      }
      if qp_new != quant {
        if status == BrcStatus::SmallFrame {
          qp_new = qp_new.max(quant - 2);
          status = BrcStatus::PanicSmallFrame;
        }
        if qp_new > ctx.active_qp(p, frame_type, layer) {
          let (min, max) = (ctx.quant_min, ctx.quant_max);
          ctx.set_anchor(qp_new, frame_type, layer, min, max);
        }
      }
      let (min, max) = (ctx.quant_min, ctx.quant_max);
      return Ok(recode(ctx, hrd, status, qp_new, min, max));
    }

    // Accept the frame.
    let k = 1. / ctx.quant as f64;
    let dq_period = if !ctx.to_recode {
      DQ_AB_PERIOD
    } else if k < ctx.dequant_average {
      DQ_PERIOD_TIGHTEN
    } else {
      DQ_PERIOD_LOOSEN
    };
    if need_update_qp {
      ctx.dequant_average = clamp(
        moving_average(ctx.dequant_average, k, dq_period),
        1. / ctx.quant_max as f64,
        1. / ctx.quant_min as f64,
      );
      ctx.long_average = long_avg;
      ctx.short_average = short_avg;
    }

    let old_scene = ctx.is_scene_start()
      && ctx.poc < ctx.scene_change_poc
      && e2pe < OLD_SCENE_RATIO
      && bits < OLD_SCENE_SIZE_FACTOR * long_avg;

    if frame_type != FrameType::B {
      ctx.last_non_b_frame_size = bits;
      if is_intra {
        ctx.e_rate_scene = e_rate;
      } else {
        ctx.e_rate = e_rate;
      }
    }

    let window = self.window.as_ref().map(|_| WindowSample {
      size: bits,
      order,
      panic: ctx.panic,
      scene_change: scene_or_intra,
      attempt,
    });

    ctx.total_deviation += coded_bits as i64 - bpf as i64;

    if !ctx.panic && !old_scene && need_update_qp {
      let mut deviation = ctx.total_deviation as f64;
      let dequant =
        ctx.dequant_average * (bpf / ctx.long_average).powf(DEQUANT_EXPONENT);
      let mut period = B_AB_PERIOD;
      if let (Some(hrd), true) = (&hrd, deviation > 0.) {
        if !p.is_cbr() {
          deviation = deviation.max(hrd.buffer_deviation(p.target_bps as f64));
        }
        let gop_factor = if p.b_pyramid { 4. } else { 3. };
        period = gop_factor * hrd.max_frame_size() / bpf
          * gop_period_coeff(
            order.saturating_sub(ctx.last_intra_order),
            p.gop_size,
          );
        period = clamp(period, B_AB_PERIOD / 10., B_AB_PERIOD);
      }
      let mut qp_new = new_qp_total(
        deviation / period / bpf,
        dequant,
        ctx.quant_min,
        ctx.quant_max,
        ctx.quant,
        p.b_pyramid && p.recode,
        scene_start && !ctx.to_recode,
      );

      if let (true, Some(max)) = (max_frame_size_mode, p.max_frame_size) {
        let max = max as f64;
        let (hi, lo) = if scene_or_intra { (0.95, 0.9) } else { (0.9, 0.8) };
        let (min_q, max_q) = (ctx.quant_min, ctx.quant_max);
        let lower = new_qp(
          bits, max * hi, min_q, max_q, ctx.quant, off, 1., QpChange::Free,
        );
        let upper = new_qp(
          bits, max * lo, min_q, max_q, ctx.quant, off, 1., QpChange::Free,
        );
        let mut corrected = ctx.quant;
        if corrected < lower - 3 {
          corrected += 2;
        }
        if corrected < lower {
          corrected += 1;
        } else if corrected > upper + 3 {
          corrected -= 2;
        } else if corrected > upper {
          corrected -= 1;
        }
        qp_new = clamp(corrected, min_q, max_q);
      }

      let active = ctx.active_qp(p, frame_type, layer);
      if (qp_new - ctx.quant) * (qp_new - active) > 0 {
        trace!(
          "frame {}: deviation {}, qp {} -> {}",
          order,
          ctx.total_deviation,
          ctx.quant - off,
          qp_new - off
        );
        let (min, max) = (ctx.quant_min, ctx.quant_max);
        ctx.set_anchor(qp_new, frame_type, layer, min, max);
      }
    }
    ctx.to_recode = false;

    // Terminal verdicts only come from the HRD once recoding is over or
    // switched off.
    let status =
      if status.needs_recode() { status.escalate() } else { status };

    Ok(Decision {
      state: ctx,
      hrd,
      window,
      phase: Phase::Committed,
      status: FrameStatus { status, qp: qp_used, min_size: min_size as u64 },
    })
  }

  fn commit(
    &mut self, frame: &FrameParams, decision: Decision,
  ) -> FrameStatus {
    self.state = decision.state;
    self.hrd = decision.hrd;
    if let (Some(window), Some(s)) = (self.window.as_mut(), decision.window) {
      window.observe(s.size, s.order, s.panic, s.scene_change, s.attempt);
    }
    self.phase = decision.phase;

    let status = decision.status;
    if status.status != BrcStatus::Ok {
      debug!(
        "frame {} attempt {}: {}, next qp {}",
        frame.encode_order, frame.attempt, status.status, status.qp
      );
    }
    status
  }

  /// Switches to `cfg`, carrying the stream state over when possible.
  ///
  /// A pending recode is abandoned.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if `cfg` does not validate.
  pub fn reset(
    &mut self, cfg: &RateControlConfig,
  ) -> Result<ConfigChange, RateControlError> {
    let params = RateParameters::derive(cfg)?;
    let change = self.params.classify_change(&params);

    match change {
      ConfigChange::FullResetRequired => {
        *self = Self::with_params(params);
      }
      ConfigChange::Compatible { reseed, rebuild_window } => {
        if reseed {
          let (min, max) = params.qp_bounds(FrameType::I);
          let scale = (self.state.long_average / params.bits_per_frame)
            .powf(RESEED_EXPONENT);
          let qp = clamp(
            ((1. / self.state.dequant_average) * scale + 0.5) as i32,
            min,
            max,
          );
          self.state.set_anchor(qp, FrameType::I, 0, min, max);
          self.state.dequant_average = 1. / qp as f64;
        }
        if rebuild_window {
          self.window = Self::build_window(&params);
        }
        self.params = params;
      }
    }
    self.state.to_recode = false;
    self.phase = Phase::Committed;

    debug!(
      "reset: {:?}, i frame qp {}",
      change,
      self.state.quant_i - self.params.qp_offset
    );
    Ok(change)
  }
}

// Moves the anchors to `anchor` and restarts the size averages after a
// frame blew its budget at `qp`.
fn restart(
  ctx: &mut FrameControlState, anchor: i32, qp: i32, frame_type: FrameType,
  layer: u32, min: i32, max: i32, bits_per_frame: f64,
) {
  ctx.set_anchor(anchor, frame_type, layer, min, max);
  ctx.reset_averages(bits_per_frame);
  ctx.dequant_average = 1. / qp as f64;
}

// Applies a recode verdict to the frame state and returns the verdict the
// caller gets. A verdict that cannot move the QP becomes terminal.
fn set_recode(
  ctx: &mut FrameControlState, verdict: BrcStatus, qp: i32, qp_new: i32,
  min: i32, max: i32, attempt: u32,
) -> BrcStatus {
  ctx.to_recode = true;
  let mut status = verdict;
  if verdict.is_big() {
    ctx.quant = qp_new.max(qp);
    ctx.quant_max = max;
    if verdict == BrcStatus::BigFrame && qp_new > qp {
      ctx.quant_min = (qp + 1).max(min);
    } else {
      ctx.quant_min = min;
      status = BrcStatus::PanicBigFrame;
    }
  } else if verdict.is_small() {
    ctx.quant = qp_new.min(qp);
    ctx.quant_min = min;
    if verdict == BrcStatus::SmallFrame && qp_new < qp {
      ctx.quant_max = (qp - 1).min(max);
    } else {
      ctx.quant_max = max;
      status = BrcStatus::PanicSmallFrame;
    }
  }
  if attempt >= MAX_RECODE {
    status = status.escalate();
  }
  if status.is_panic() {
    ctx.panic = true;
  }
  status
}

impl RateControl for SinglePassController {
  fn frame_qp(
    &mut self, frame: &FrameParams,
  ) -> Result<i32, RateControlError> {
    Ok(self.get_frame_ctrl(frame))
  }

  fn report(
    &mut self, frame: &FrameParams, qp_used: i32, coded_bits: u64,
  ) -> Result<FrameStatus, RateControlError> {
    self.update(frame, qp_used, coded_bits)
  }

  fn reset(
    &mut self, cfg: &RateControlConfig,
  ) -> Result<ConfigChange, RateControlError> {
    SinglePassController::reset(self, cfg)
  }
}
