// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! QP planning over a window of pre-analysed frames.
//!
//! Every frame is first encoded by a cheap pre-analysis pass that reports
//! its size, distortion and how much of it is intra coded. From those the
//! controller estimates a complexity per frame, smooths it along the
//! prediction chain and looks for the single scale that makes the window's
//! predicted size match its share of the bitrate.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::api::config::{InvalidConfig, LookaheadConfig, RateControlConfig};
use crate::api::util::*;
use crate::quantize::{qp_to_qstep, qstep_to_qp, MAX_QP, MIN_QP};
use crate::rate::params::{ConfigChange, RateParameters};
use crate::rate::RateControl;

/// Frames on each side of the blur kernel, the centre included.
pub const BLUR_LENGTH: usize = 10;
const GAUSS_VARIANCE: f64 = 160.;
const BLUR_STOP: f64 = 0.001;
const DIST_COMPL_EXPONENT: f64 = 0.5;
const QSTEP_COMPL_EXPONENT: f64 = 0.4;
const INTRA_QSTEP_FACTOR: f64 = 1.4;
const B_QSTEP_EXPONENT: f64 = 0.35;

/// Relative error of the predicted window size the solver stops at.
pub const RATE_RATIO_ACCURACY: f64 = 0.001;
/// Iteration cap of the solver.
pub const MAX_SOLVE_ITERATIONS: u32 = 30;
/// Frames the short-horizon correction looks back on.
pub const SHORT_WINDOW: usize = 5;

/// Pre-analysis statistics of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStatData {
  pub encode_order: u64,
  pub display_order: u64,
  pub frame_type: FrameType,
  /// QP the pre-analysis encode used, without the bit depth offset.
  pub qp: i32,
  /// Share of the frame coded intra, in `[0, 1]`.
  pub intra_share: f64,
  /// How much later frames reference this one, relative to its peers.
  pub propagation_weight: f64,
  /// Size of the pre-analysis encode in bits.
  pub frame_size: u64,
  /// Distortion of the pre-analysis encode.
  pub distortion: f64,

  qstep_original: f64,
  propagation: f64,
  complexity_original: f64,
  complexity: f64,
  qstep: f64,
  solved_qp: Option<i32>,
  bits_predicted: f64,
  bits_encoded: Option<u64>,
}

impl FrameStatData {
  pub fn new(
    encode_order: u64, display_order: u64, frame_type: FrameType, qp: i32,
    frame_size: u64,
  ) -> Self {
    FrameStatData {
      encode_order,
      display_order,
      frame_type,
      qp,
      intra_share: if frame_type.is_intra() { 1. } else { 0. },
      propagation_weight: 1.,
      frame_size,
      distortion: 0.,
      qstep_original: 0.,
      propagation: 1.,
      complexity_original: 0.,
      complexity: 0.,
      qstep: 0.,
      solved_qp: None,
      bits_predicted: 0.,
      bits_encoded: None,
    }
  }

  pub const fn with_intra_share(mut self, intra_share: f64) -> Self {
    self.intra_share = intra_share;
    self
  }

  pub const fn with_propagation_weight(mut self, weight: f64) -> Self {
    self.propagation_weight = weight;
    self
  }

  pub const fn with_distortion(mut self, distortion: f64) -> Self {
    self.distortion = distortion;
    self
  }

  /// Quantizer step of the pre-analysis encode.
  #[inline]
  pub fn qstep_original(&self) -> f64 {
    self.qstep_original
  }

  /// Fraction of the frame that carries over to the next one.
  #[inline]
  pub fn propagation(&self) -> f64 {
    self.propagation
  }

  #[inline]
  pub fn complexity_original(&self) -> f64 {
    self.complexity_original
  }

  /// Complexity after smoothing along the prediction chain.
  #[inline]
  pub fn complexity(&self) -> f64 {
    self.complexity
  }

  /// Quantizer step planned by the last solve.
  #[inline]
  pub fn qstep(&self) -> f64 {
    self.qstep
  }

  /// QP handed out for the frame, offset included.
  #[inline]
  pub fn solved_qp(&self) -> Option<i32> {
    self.solved_qp
  }

  /// Size predicted for the planned quantizer step.
  #[inline]
  pub fn bits_predicted(&self) -> f64 {
    self.bits_predicted
  }

  /// Size of the real encode, once reported.
  #[inline]
  pub fn bits_encoded(&self) -> Option<u64> {
    self.bits_encoded
  }

  fn predict(&mut self) -> f64 {
    self.bits_predicted = if self.frame_size == 0 {
      0.
    } else {
      self.qstep_original / self.qstep * self.frame_size as f64
    };
    self.bits_predicted
  }

  fn class(&self) -> BitsClass {
    match self.frame_type {
      FrameType::B => BitsClass::Bidir,
      _ => BitsClass::Reference,
    }
  }
}

// Prediction errors of B frames and of the frames they reference are
// tracked apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitsClass {
  Reference,
  Bidir,
}

/// Statistics of the frames around the one being encoded.
///
/// Holds the look-back of already encoded frames and the window of
/// frames ahead, in encode order.
#[derive(Debug, Clone)]
pub struct LookaheadStatQueue {
  frames: VecDeque<FrameStatData>,
  depth: usize,
  lookback: usize,
  adaptation: usize,
  cur: Option<usize>,
  qp_offset: i32,
  norm_factors: [f64; BLUR_LENGTH - 1],
}

impl LookaheadStatQueue {
  pub fn new(cfg: &LookaheadConfig, qp_offset: i32) -> Self {
    let mut norm_factors = [0.; BLUR_LENGTH - 1];
    for (j, f) in norm_factors.iter_mut().enumerate() {
      let d = (j + 1) as f64;
      *f = (-d * d / GAUSS_VARIANCE).exp();
    }
    LookaheadStatQueue {
      frames: VecDeque::with_capacity(
        1 + cfg.lookback.max(cfg.adaptation) + cfg.depth,
      ),
      depth: cfg.depth,
      lookback: cfg.lookback,
      adaptation: cfg.adaptation,
      cur: None,
      qp_offset,
      norm_factors,
    }
  }

  /// Most entries kept once the frames in front have been encoded.
  #[inline]
  pub fn size_limit(&self) -> usize {
    1 + self.lookback.max(self.adaptation) + self.depth
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.frames.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn depth(&self) -> usize {
    self.depth
  }

  /// Encode order of the frame being planned.
  pub fn current(&self) -> Option<u64> {
    self.cur.map(|i| self.frames[i].encode_order)
  }

  /// Whether the statistics of `order` and the frames after it fill a
  /// whole window.
  pub fn window_ready(&self, order: u64) -> bool {
    match self.position(order) {
      Some(i) => self.frames.len() - i >= self.depth,
      None => false,
    }
  }

  /// Appends the statistics of the next frame in encode order.
  pub fn submit(&mut self, mut stat: FrameStatData) {
    let qp = stat.qp + self.qp_offset;
    stat.qstep_original = qp_to_qstep(qp, self.qp_offset);
    let share = stat.intra_share.clamp(0., 1.);
    stat.propagation = 1. - share * share;
    stat.complexity_original = stat.qstep_original * stat.frame_size as f64;
    stat.complexity = stat.complexity_original;
    stat.qstep = stat.qstep_original;
    stat.solved_qp = None;
    stat.bits_predicted = stat.frame_size as f64;
    stat.bits_encoded = None;
    self.frames.push_back(stat);
    self.trim();
  }

  /// Moves the window to start at `order`.
  ///
  /// # Errors
  ///
  /// - Returns `MissingStatistics` if `order` was never submitted or has
  ///   already left the look-back.
  pub fn advance(&mut self, order: u64) -> Result<usize, RateControlError> {
    let i = self
      .position(order)
      .ok_or(RateControlError::MissingStatistics { frame: order })?;
    self.cur = Some(i);
    self.trim();
    Ok(self.cur.unwrap_or(i))
  }

  pub fn get(&self, order: u64) -> Option<&FrameStatData> {
    self.position(order).map(|i| &self.frames[i])
  }

  pub fn get_mut(&mut self, order: u64) -> Option<&mut FrameStatData> {
    self.position(order).map(move |i| &mut self.frames[i])
  }

  /// Frames from the current one up to the lookahead depth.
  pub fn window(&self) -> impl Iterator<Item = &FrameStatData> + '_ {
    let (start, end) = self.window_range();
    self.frames.range(start..end)
  }

  pub fn clear(&mut self) {
    self.frames.clear();
    self.cur = None;
  }

  fn position(&self, order: u64) -> Option<usize> {
    self.frames.iter().position(|f| f.encode_order == order)
  }

  // Encoded frames in front of the window go first. Frames that were never
  // planned stay.
  fn trim(&mut self) {
    while self.frames.len() > self.size_limit() {
      match self.cur {
        Some(cur) if cur > 0 => {
          self.frames.pop_front();
          self.cur = Some(cur - 1);
        }
        _ => break,
      }
    }
  }

  fn window_range(&self) -> (usize, usize) {
    match self.cur {
      Some(start) => (start, self.frames.len().min(start + self.depth)),
      None => (0, 0),
    }
  }

  fn window_mut(&mut self) -> &mut [FrameStatData] {
    let (start, end) = self.window_range();
    &mut self.frames.make_contiguous()[start..end]
  }

  /// Recomputes the raw and the smoothed complexity of the window.
  pub fn update_complexities(&mut self) {
    let (start, end) = self.window_range();
    if start == end {
      return;
    }
    let n = (end - start) as f64;
    let avg_distortion =
      self.frames.range(start..end).map(|f| f.distortion).sum::<f64>() / n;
    let avg_weight = self
      .frames
      .range(start..end)
      .map(|f| f.propagation_weight)
      .sum::<f64>()
      / n;

    for f in self.frames.range_mut(start..end) {
      let distortion_factor = if avg_distortion > 0. {
        (avg_distortion / (f.distortion + 1.)).powf(DIST_COMPL_EXPONENT)
      } else {
        1.
      };
      let relative_weight = if avg_weight > 0. && f.propagation_weight > 0.
      {
        f.propagation_weight / avg_weight
      } else {
        1.
      };
      f.complexity_original = f.qstep_original
        * f.frame_size as f64
        * distortion_factor
        / relative_weight;
    }

    for i in start..end {
      let mut complexity = self.frames[i].complexity_original;
      let mut w = 1.;

      // Frames coded after this one inherit from it while they propagate.
      let mut wr = 1.;
      for j in 1..BLUR_LENGTH.min(end - i) {
        wr *= self.frames[i + j].propagation;
        if wr < BLUR_STOP {
          break;
        }
        let wnorm = wr * self.norm_factors[j - 1];
        complexity += self.frames[i + j].complexity_original * wnorm;
        w += wnorm;
      }

      let mut wl = 1.;
      for j in 1..BLUR_LENGTH.min(i + 1) {
        wl *= self.frames[i - j + 1].propagation;
        if wl < BLUR_STOP || self.frames[i - j].frame_type.is_intra() {
          break;
        }
        let wnorm = wl * self.norm_factors[j - 1];
        complexity += self.frames[i - j].complexity_original * wnorm;
        w += wnorm;
      }

      self.frames[i].complexity = complexity / w;
    }
  }

  /// Actual over predicted bits of the last `span` encoded frames,
  /// optionally of a single class.
  fn correction_ratio(&self, span: usize, class: Option<BitsClass>) -> f64 {
    let (encoded, predicted) = self
      .frames
      .iter()
      .rev()
      .filter(|f| f.bits_encoded.is_some())
      .filter(|f| class.map_or(true, |c| f.class() == c))
      .take(span)
      .fold((0., 0.), |(e, p), f| {
        (e + f.bits_encoded.unwrap_or(0) as f64, p + f.bits_predicted)
      });
    (encoded + 1.) / (predicted + 1.)
  }

  /// Actual over predicted bits over the adaptation window.
  pub fn long_ratio(&self) -> f64 {
    self.correction_ratio(self.adaptation, None)
  }

  // Number of encoded frames in the look-back and their total size.
  fn lookback_bits(&self) -> (usize, u64) {
    let (start, _) = self.window_range();
    self
      .frames
      .range(..start)
      .rev()
      .filter_map(|f| f.bits_encoded)
      .take(self.lookback)
      .fold((0, 0), |(n, bits), b| (n + 1, bits + b))
  }
}

/// Which end of the scale range the solver stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleBound {
  /// The budget is too small even at the coarsest quantizer.
  Coarsest,
  /// The budget is too large even at the finest quantizer.
  Finest,
}

/// Outcome of [`solve_scale`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSolution {
  pub scale: f64,
  /// Predicted over budgeted bits at `scale`.
  pub ratio: f64,
  pub iterations: u32,
  pub bound: Option<ScaleBound>,
}

fn plan_qsteps(frames: &mut [FrameStatData], scale: f64) {
  for f in frames.iter_mut() {
    f.qstep = f.complexity.max(1.).powf(QSTEP_COMPL_EXPONENT) / scale;
  }
  plan_reference_qsteps(frames);
}

// Walks the window backwards. Intra frames take the log-average step of the
// P frames that depend on them, B frames follow the reference coded right
// before them.
fn plan_reference_qsteps(frames: &mut [FrameStatData]) {
  let mut norm = 0f64;
  let mut logq = 0f64;
  let mut last_ref = frames.len();

  for i in (0..frames.len()).rev() {
    if frames[i].frame_type == FrameType::B {
      continue;
    }

    let mut qstep = frames[i].qstep;
    if frames[i].frame_type.is_intra() {
      if norm > 0. {
        let propagated = (logq / norm).exp() / INTRA_QSTEP_FACTOR;
        qstep = if norm >= 1. {
          propagated
        } else {
          propagated * norm + qstep * (1. - norm)
        };
      }
      logq = 0.;
      norm = 0.;
    } else {
      let p = frames[i].propagation;
      logq = (logq + qstep.ln()) * p;
      norm = (norm + 1.) * p;
    }

    let c_ref = frames[i].complexity_original;
    for b in frames[i + 1..last_ref].iter_mut() {
      let ratio = (c_ref + 1.) / (b.complexity_original + 1.);
      b.qstep =
        (qstep * ratio.powf(B_QSTEP_EXPONENT)).clamp(qstep, 2. * qstep);
    }

    last_ref = i;
    frames[i].qstep = qstep;
  }
}

fn predict_bits(frames: &mut [FrameStatData], scale: f64) -> f64 {
  plan_qsteps(frames, scale);
  frames.iter_mut().map(FrameStatData::predict).sum()
}

/// Finds the scale at which the predicted size of `frames` meets `budget`.
///
/// Leaves every frame with the quantizer step and predicted size of the
/// returned scale.
pub fn solve_scale(
  frames: &mut [FrameStatData], budget: f64,
) -> ScaleSolution {
  let mut rs = qp_to_qstep(MAX_QP, 0) / qp_to_qstep(MIN_QP, 0);
  let mut ls = 1. / rs;

  if frames.is_empty() || budget <= 0. {
    return ScaleSolution {
      scale: ls,
      ratio: 1.,
      iterations: 0,
      bound: Some(ScaleBound::Coarsest),
    };
  }

  let mut lr = predict_bits(frames, ls) / budget;
  if lr >= 1. {
    return ScaleSolution {
      scale: ls,
      ratio: lr,
      iterations: 0,
      bound: Some(ScaleBound::Coarsest),
    };
  }
  let mut rr = predict_bits(frames, rs) / budget;
  if rr <= 1. {
    return ScaleSolution {
      scale: rs,
      ratio: rr,
      iterations: 0,
      bound: Some(ScaleBound::Finest),
    };
  }

  let mut solution =
    ScaleSolution { scale: rs, ratio: rr, iterations: 0, bound: None };
  for i in 1..=MAX_SOLVE_ITERATIONS {
    let scale = ls + (1. - lr) * (rs - ls) / (rr - lr);
    let ratio = predict_bits(frames, scale) / budget;
    solution = ScaleSolution { scale, ratio, iterations: i, bound: None };

    if (ratio - 1.).abs() < RATE_RATIO_ACCURACY {
      break;
    }
    if ratio < 1. {
      if ratio <= lr {
        break;
      }
      lr = ratio;
      ls = scale;
    } else {
      if ratio >= rr {
        break;
      }
      rr = ratio;
      rs = scale;
    }
  }
  solution
}

/// Lookahead controller.
///
/// Frames are never encoded twice: every QP comes from the plan of the
/// window it starts, corrected by how well recent plans held.
#[derive(Debug, Clone)]
pub struct LookaheadController {
  params: RateParameters,
  config: LookaheadConfig,
  queue: LookaheadStatQueue,
  encoded_frames: u64,
  planned: Option<u64>,
  last_solution: Option<ScaleSolution>,
}

impl LookaheadController {
  /// Creates a controller for `cfg` planning over `lookahead`.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if either configuration does not validate,
  ///   or `cfg` asks for limits only a single pass controller enforces.
  pub fn new(
    cfg: &RateControlConfig, lookahead: LookaheadConfig,
  ) -> Result<Self, InvalidConfig> {
    lookahead.validate()?;
    let params = Self::derive(cfg)?;
    let queue = LookaheadStatQueue::new(&lookahead, params.qp_offset);
    Ok(LookaheadController {
      params,
      config: lookahead,
      queue,
      encoded_frames: 0,
      planned: None,
      last_solution: None,
    })
  }

  fn derive(cfg: &RateControlConfig) -> Result<RateParameters, InvalidConfig> {
    let params = RateParameters::derive(cfg)?;
    if params.hrd.is_some()
      || params.max_frame_size.is_some()
      || params.sliding_window.is_some()
    {
      return Err(InvalidConfig::RateControlConfigurationMismatch);
    }
    Ok(params)
  }

  pub fn params(&self) -> &RateParameters {
    &self.params
  }

  pub fn config(&self) -> &LookaheadConfig {
    &self.config
  }

  pub fn queue(&self) -> &LookaheadStatQueue {
    &self.queue
  }

  pub fn last_solution(&self) -> Option<ScaleSolution> {
    self.last_solution
  }

  pub fn submit(&mut self, stat: FrameStatData) {
    self.queue.submit(stat);
  }

  /// Whether the statistics of `order` and the frames after it still have
  /// to be submitted before `order` can be planned.
  pub fn needs_stats(&self, order: u64) -> bool {
    !self.queue.window_ready(order)
  }

  /// Plans the window starting at `order`.
  ///
  /// # Errors
  ///
  /// - Returns `MissingStatistics` if no statistics of `order` were
  ///   submitted.
  pub fn pre_enc(
    &mut self, order: u64,
  ) -> Result<ScaleSolution, RateControlError> {
    self.queue.advance(order)?;
    self.queue.update_complexities();

    let bpf = self.params.bits_per_frame;
    let window = self.queue.window().count() as f64;
    let (lookback_frames, lookback_bits) = self.queue.lookback_bits();
    let remaining =
      bpf * (lookback_frames as f64 + window) - lookback_bits as f64;
    let long_ratio = self.queue.long_ratio();
    let budget = remaining.max(0.5 * bpf * window) / long_ratio;

    let solution = solve_scale(self.queue.window_mut(), budget);
    if let Some(frame) = self.queue.get_mut(order) {
      frame.solved_qp = None;
    }
    debug!(
      "lookahead frame {}: {} frames, budget {:.0}, scale {:.4}, ratio {:.4} \
       after {} iterations ({:?})",
      order,
      window,
      budget,
      solution.scale,
      solution.ratio,
      solution.iterations,
      solution.bound
    );

    self.planned = Some(order);
    self.last_solution = Some(solution);
    Ok(solution)
  }

  /// QP of `order`, without the bit depth offset.
  ///
  /// Asking again before `order` is reported returns the same QP.
  ///
  /// # Errors
  ///
  /// - Returns `MissingStatistics` if no statistics of `order` were
  ///   submitted.
  pub fn get_qp(&mut self, order: u64) -> Result<i32, RateControlError> {
    let missing = RateControlError::MissingStatistics { frame: order };
    if self.planned == Some(order) {
      let solved = self.queue.get(order).ok_or(missing)?.solved_qp;
      if let Some(qp) = solved {
        return Ok(qp - self.params.qp_offset);
      }
    } else {
      self.pre_enc(order)?;
    }
    let class = self.queue.get(order).ok_or(missing)?.class();
    let long =
      self.queue.correction_ratio(self.config.adaptation, Some(class));
    let short = self.queue.correction_ratio(SHORT_WINDOW, Some(class));
    let exponent =
      (self.encoded_frames as f64 / self.config.depth as f64).min(1.);

    let params = &self.params;
    let frame = self.queue.get_mut(order).ok_or(missing)?;
    let qstep = frame.qstep * (short / long).powf(exponent);
    let qp = params.clip_qp(
      params.rate_class(frame.frame_type),
      qstep_to_qp(qstep, params.qp_offset),
    );
    frame.qstep = qp_to_qstep(qp, params.qp_offset);
    frame.solved_qp = Some(qp);
    frame.predict();

    trace!(
      "lookahead frame {}: qstep {:.3} corrected by {:.3}^{:.2}, qp {}",
      order,
      qstep,
      short / long,
      exponent,
      qp - params.qp_offset
    );
    Ok(qp - params.qp_offset)
  }

  /// Records the size `order` was coded at.
  ///
  /// # Errors
  ///
  /// - Returns `MissingStatistics` if the statistics of `order` are gone.
  pub fn report(
    &mut self, order: u64, coded_bits: u64,
  ) -> Result<(), RateControlError> {
    let frame = self
      .queue
      .get_mut(order)
      .ok_or(RateControlError::MissingStatistics { frame: order })?;
    frame.bits_encoded = Some(coded_bits);
    self.encoded_frames += 1;
    if self.planned == Some(order) {
      self.planned = None;
    }
    Ok(())
  }

  /// Switches to `cfg`.
  ///
  /// A compatible change keeps the queue and the correction history, any
  /// other change starts over.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if `cfg` does not validate or asks for
  ///   limits the lookahead controller does not enforce.
  pub fn reset(
    &mut self, cfg: &RateControlConfig,
  ) -> Result<ConfigChange, RateControlError> {
    let params = Self::derive(cfg)?;
    let change = self.params.classify_change(&params);
    if change == ConfigChange::FullResetRequired {
      self.queue = LookaheadStatQueue::new(&self.config, params.qp_offset);
      self.encoded_frames = 0;
      self.last_solution = None;
    }
    self.planned = None;
    self.params = params;
    debug!("lookahead reset: {:?}", change);
    Ok(change)
  }
}

impl RateControl for LookaheadController {
  fn submit_stat(&mut self, stat: FrameStatData) {
    self.submit(stat);
  }

  fn needs_stats(&self, order: u64) -> bool {
    LookaheadController::needs_stats(self, order)
  }

  fn has_stats(&self, order: u64) -> bool {
    self.queue.get(order).is_some()
  }

  fn pre_enc(&mut self, frame: &FrameParams) -> Result<(), RateControlError> {
    LookaheadController::pre_enc(self, frame.encode_order).map(|_| ())
  }

  fn frame_qp(
    &mut self, frame: &FrameParams,
  ) -> Result<i32, RateControlError> {
    self.get_qp(frame.encode_order)
  }

  fn report(
    &mut self, frame: &FrameParams, qp_used: i32, coded_bits: u64,
  ) -> Result<FrameStatus, RateControlError> {
    LookaheadController::report(self, frame.encode_order, coded_bits)?;
    Ok(FrameStatus { status: BrcStatus::Ok, qp: qp_used, min_size: 0 })
  }

  fn reset(
    &mut self, cfg: &RateControlConfig,
  ) -> Result<ConfigChange, RateControlError> {
    LookaheadController::reset(self, cfg)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::api::color::ChromaSampling;
  use interpolate_name::interpolate_test;
  use pretty_assertions::assert_eq;
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaChaRng;

  const BITRATE: u64 = 1_000_000;

  fn config() -> RateControlConfig {
    RateControlConfig::new()
      .with_bitrate(BITRATE)
      .with_picture(1920, 1080, ChromaSampling::Cs420, 8)
      .with_gop(30, 1, false)
  }

  fn lookahead(depth: usize) -> LookaheadConfig {
    LookaheadConfig { depth, lookback: depth, adaptation: depth }
  }

  fn frame_type(order: u64) -> FrameType {
    if order % 30 == 0 {
      FrameType::I
    } else {
      FrameType::P
    }
  }

  fn stat(order: u64, size: u64) -> FrameStatData {
    FrameStatData::new(order, order, frame_type(order), 30, size)
      .with_distortion(40.)
  }

  fn queue_of(frames: &[FrameStatData]) -> LookaheadStatQueue {
    let mut queue = LookaheadStatQueue::new(&lookahead(100), 0);
    for f in frames {
      queue.submit(*f);
    }
    queue.advance(frames[0].encode_order).unwrap();
    queue.update_complexities();
    queue
  }

  #[test]
  fn submit_derives_propagation() {
    let mut queue = LookaheadStatQueue::new(&lookahead(10), 0);
    queue.submit(stat(0, 1000).with_intra_share(0.5));
    let f = queue.get(0).unwrap();
    assert_eq!(f.propagation(), 0.75);
    assert_eq!(f.qstep_original(), qp_to_qstep(30, 0));
  }

  #[test]
  fn flat_window_keeps_complexity() {
    let frames: Vec<_> = (1..21).map(|i| stat(i, 20_000)).collect();
    let queue = queue_of(&frames);
    let expected = qp_to_qstep(30, 0) * 20_000. * (40f64 / 41.).sqrt();
    for f in queue.window() {
      assert!((f.complexity() - expected).abs() < 1e-6 * expected);
    }
  }

  #[test]
  fn blur_stops_at_intra_frame() {
    // 29 P frames, then the I frame of the next GOP and a P frame after it
    let mut frames: Vec<_> = (1..30).map(|i| stat(i, 10_000)).collect();
    frames.push(stat(30, 200_000));
    frames.push(stat(31, 50_000));
    let queue = queue_of(&frames);
    let unchanged = |order: u64| {
      let f = queue.get(order).unwrap();
      (f.complexity() - f.complexity_original()).abs()
        < 1e-9 * f.complexity_original()
    };

    assert!(unchanged(10));
    // nothing crosses the intra frame in either direction
    assert!(unchanged(29));
    assert!(unchanged(31));

    // the intra frame itself is blended with what follows it
    let i_frame = queue.get(30).unwrap();
    assert_eq!(i_frame.propagation(), 0.);
    let after = queue.get(31).unwrap().complexity_original();
    assert!(i_frame.complexity() < i_frame.complexity_original());
    assert!(i_frame.complexity() > after);
  }

  #[interpolate_test(p_only, false)]
  #[interpolate_test(mixed, true)]
  fn solver_meets_budget(b_frames: bool) {
    let mut rng = ChaChaRng::from_seed([0; 32]);
    let mut frames: Vec<_> = (0..60u64)
      .map(|i| {
        let ft = if i % 30 == 0 {
          FrameType::I
        } else if b_frames && i % 3 != 1 {
          FrameType::B
        } else {
          FrameType::P
        };
        FrameStatData::new(i, i, ft, 30, rng.gen_range(5_000..60_000))
          .with_intra_share(if ft == FrameType::I { 1. } else { 0.1 })
          .with_distortion(rng.gen_range(10.0..80.0))
      })
      .collect();
    let mut queue = LookaheadStatQueue::new(&lookahead(100), 0);
    for f in frames.drain(..) {
      queue.submit(f);
    }
    queue.advance(0).unwrap();
    queue.update_complexities();

    let budget = 33_333. * 60.;
    let solution = solve_scale(queue.window_mut(), budget);
    assert_eq!(solution.bound, None);
    assert!(solution.iterations <= MAX_SOLVE_ITERATIONS);
    assert!((solution.ratio - 1.).abs() < RATE_RATIO_ACCURACY);
    let predicted: f64 = queue.window().map(|f| f.bits_predicted()).sum();
    assert!((predicted / budget - 1.).abs() < RATE_RATIO_ACCURACY);

    for f in queue.window().filter(|f| f.frame_type == FrameType::B) {
      assert!(f.qstep() > 0.);
    }
  }

  #[test]
  fn b_frames_are_coarser_than_their_reference() {
    let frames: Vec<_> = (0..9u64)
      .map(|i| {
        let ft = match i {
          0 => FrameType::I,
          i if i % 3 == 1 => FrameType::P,
          _ => FrameType::B,
        };
        FrameStatData::new(i, i, ft, 30, 20_000).with_intra_share(0.)
      })
      .collect();
    let mut queue = queue_of(&frames);
    solve_scale(queue.window_mut(), 9. * 20_000.);
    for i in [2, 3, 5, 6] {
      let b = queue.get(i).unwrap().qstep();
      let r = queue.get(if i < 4 { 1 } else { 4 }).unwrap().qstep();
      assert!(b >= r && b <= 2. * r, "frame {}: {} vs {}", i, b, r);
    }
  }

  #[test]
  fn one_sided_bounds() {
    let frames: Vec<_> = (1..11).map(|i| stat(i, 20_000)).collect();

    let mut queue = queue_of(&frames);
    let solution = solve_scale(queue.window_mut(), 1.);
    assert_eq!(solution.bound, Some(ScaleBound::Coarsest));
    assert_eq!(solution.iterations, 0);
    assert!(solution.ratio >= 1.);

    let mut queue = queue_of(&frames);
    let solution = solve_scale(queue.window_mut(), 1e15);
    assert_eq!(solution.bound, Some(ScaleBound::Finest));
    assert!(solution.ratio <= 1.);

    let solution = solve_scale(&mut [], 1000.);
    assert_eq!(solution.bound, Some(ScaleBound::Coarsest));
  }

  #[test]
  fn queue_size_is_bounded() {
    let mut queue = LookaheadStatQueue::new(&lookahead(10), 0);
    for i in 0..10 {
      queue.submit(stat(i, 1000));
    }
    // nothing is dropped before it was planned
    for i in 10..40 {
      queue.submit(stat(i, 1000));
    }
    assert_eq!(queue.len(), 40);

    queue.advance(25).unwrap();
    assert_eq!(queue.len(), queue.size_limit());
    assert_eq!(queue.current(), Some(25));
    assert!(queue.get(18).is_none());
    assert!(queue.get(19).is_some());
    assert!(queue.window_ready(25));
    assert!(!queue.window_ready(31));
  }

  #[test]
  fn missing_statistics() {
    let mut c = LookaheadController::new(&config(), lookahead(10)).unwrap();
    assert_eq!(
      c.pre_enc(0),
      Err(RateControlError::MissingStatistics { frame: 0 })
    );
    assert_eq!(
      c.get_qp(3),
      Err(RateControlError::MissingStatistics { frame: 3 })
    );
    assert_eq!(
      LookaheadController::report(&mut c, 3, 100),
      Err(RateControlError::MissingStatistics { frame: 3 })
    );
  }

  #[test]
  fn rejects_single_pass_limits() {
    for cfg in [
      config().with_hrd(2_000_000, 1_000_000),
      config().with_max_frame_size(100_000),
      config().with_sliding_window(1_500_000, 30),
    ] {
      assert_eq!(
        LookaheadController::new(&cfg, lookahead(10)).err(),
        Some(InvalidConfig::RateControlConfigurationMismatch)
      );
    }
  }

  fn run(
    c: &mut LookaheadController, frames: u64, coded: impl Fn(u64, i32) -> u64,
  ) -> Vec<i32> {
    let depth = c.config().depth as u64;
    for i in 0..depth {
      c.submit(stat(i, 30_000));
    }
    let mut qps = Vec::new();
    for i in 0..frames {
      c.submit(stat(i + depth, 30_000));
      c.pre_enc(i).unwrap();
      let qp = c.get_qp(i).unwrap();
      LookaheadController::report(c, i, coded(i, qp)).unwrap();
      qps.push(qp);
    }
    qps
  }

  #[test]
  fn predicted_sizes_keep_qp() {
    let mut c = LookaheadController::new(&config(), lookahead(20)).unwrap();
    let qps = run(&mut c, 60, |_, qp| {
      (qp_to_qstep(30, 0) / qp_to_qstep(qp, 0) * 30_000.) as u64
    });
    // the steady state does not drift
    let tail = &qps[40..];
    let (lo, hi) =
      (tail.iter().min().unwrap(), tail.iter().max().unwrap());
    assert!(hi - lo <= 2, "{:?}", tail);
    assert!(c.last_solution().unwrap().bound.is_none());
  }

  #[interpolate_test(overshoot, 2.)]
  #[interpolate_test(undershoot, 0.5)]
  fn corrects_prediction_error(factor: f64) {
    let mut reference =
      LookaheadController::new(&config(), lookahead(20)).unwrap();
    let mut c = LookaheadController::new(&config(), lookahead(20)).unwrap();
    let model =
      |qp: i32| qp_to_qstep(30, 0) / qp_to_qstep(qp, 0) * 30_000.;
    let expected = run(&mut reference, 60, |_, qp| model(qp) as u64);
    let actual = run(&mut c, 60, |_, qp| (model(qp) * factor) as u64);

    let last = *actual.last().unwrap();
    let base = *expected.last().unwrap();
    if factor > 1. {
      assert!(last > base, "{} vs {}", last, base);
    } else {
      assert!(last < base, "{} vs {}", last, base);
    }
  }

  #[test]
  fn qp_requery_is_stable() {
    let mut c = LookaheadController::new(&config(), lookahead(10)).unwrap();
    for i in 0..30 {
      c.submit(stat(i, 30_000));
    }
    for i in 0..20 {
      c.pre_enc(i).unwrap();
      c.get_qp(i).unwrap();
      let bits = if i < 12 { 30_000 } else { 40_000 };
      LookaheadController::report(&mut c, i, bits).unwrap();
    }
    c.pre_enc(20).unwrap();
    let a = c.get_qp(20).unwrap();
    let b = c.get_qp(20).unwrap();
    let d = c.get_qp(20).unwrap();
    assert_eq!(a, b);
    assert_eq!(b, d);
    // planning again starts from the solved step
    c.pre_enc(20).unwrap();
    assert_eq!(c.get_qp(20).unwrap(), a);
  }

  #[test]
  fn qp_respects_limits() {
    use crate::api::config::{QpLimits, QpRange};
    let cfg = config().with_qp_limits(QpLimits::uniform(QpRange::new(35, 40)));
    let mut c = LookaheadController::new(&cfg, lookahead(10)).unwrap();
    let qps = run(&mut c, 20, |_, _| 1_000);
    assert!(qps.iter().all(|&qp| (35..=40).contains(&qp)), "{:?}", qps);
  }

  #[test]
  fn high_bit_depth_reports_without_offset() {
    let cfg = config().with_picture(1920, 1080, ChromaSampling::Cs420, 10);
    let mut c = LookaheadController::new(&cfg, lookahead(10)).unwrap();
    let qps = run(&mut c, 5, |_, _| 30_000);
    let mut eight =
      LookaheadController::new(&config(), lookahead(10)).unwrap();
    let expected = run(&mut eight, 5, |_, _| 30_000);
    assert_eq!(qps, expected);
  }

  #[test]
  fn reset_keeps_queue_when_compatible() {
    use crate::api::config::RateControlMode;
    let vbr = || config().with_mode(RateControlMode::Vbr);
    let mut c = LookaheadController::new(&vbr(), lookahead(10)).unwrap();
    run(&mut c, 5, |_, _| 30_000);
    let len = c.queue().len();

    let change = c.reset(&vbr().with_bitrate(2 * BITRATE)).unwrap();
    assert_eq!(
      change,
      ConfigChange::Compatible { reseed: true, rebuild_window: false }
    );
    assert_eq!(c.queue().len(), len);
    // a larger budget plans finer steps
    c.pre_enc(5).unwrap();
    let qp = c.get_qp(5).unwrap();
    let mut before =
      LookaheadController::new(&vbr(), lookahead(10)).unwrap();
    run(&mut before, 5, |_, _| 30_000);
    before.pre_enc(5).unwrap();
    assert!(qp < before.get_qp(5).unwrap());

    let change = c
      .reset(&vbr().with_picture(1280, 720, ChromaSampling::Cs420, 8))
      .unwrap();
    assert_eq!(change, ConfigChange::FullResetRequired);
    assert!(c.queue().is_empty());
  }

  #[test]
  fn reset_rejects_single_pass_limits() {
    let mut c = LookaheadController::new(&config(), lookahead(10)).unwrap();
    assert!(c.reset(&config().with_max_frame_size(1000)).is_err());
    assert_eq!(c.params().max_frame_size, None);
  }
}
