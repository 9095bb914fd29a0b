// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.
#![deny(missing_docs)]

use crate::api::config::*;
use crate::api::util::*;
use crate::rate::{ConfigChange, FrameStatData, RateControl};

use log::{debug, warn};

use std::fmt;

/// The rate control context.
///
/// Owns the controller of one stream.
pub struct Context {
  controller: Option<Box<dyn RateControl + Send>>,
  config: Config,
}

impl Context {
  pub(crate) fn new(
    controller: Box<dyn RateControl + Send>, config: Config,
  ) -> Self {
    Context { controller: Some(controller), config }
  }

  fn controller(
    &mut self,
  ) -> Result<&mut (dyn RateControl + Send + 'static), RateControlError> {
    self.controller.as_deref_mut().ok_or(RateControlError::NotInitialized)
  }

  /// Hands pre-analysis statistics of a future frame to the controller.
  ///
  /// # Errors
  ///
  /// - Returns `NotInitialized` after [`close`].
  ///
  /// [`close`]: #method.close
  pub fn submit_stat(
    &mut self, stat: FrameStatData,
  ) -> Result<(), RateControlError> {
    self.controller()?.submit_stat(stat);
    Ok(())
  }

  /// Prepares the controller for the next frame in encode order.
  ///
  /// Needed only with a lookahead; [`frame_qp`] plans the frame itself
  /// otherwise.
  ///
  /// # Errors
  ///
  /// - Returns `NotInitialized` after [`close`].
  /// - Returns `MissingStatistics` if the lookahead has no statistics of
  ///   the frame.
  ///
  /// [`frame_qp`]: #method.frame_qp
  /// [`close`]: #method.close
  pub fn pre_enc(
    &mut self, frame: &FrameParams,
  ) -> Result<(), RateControlError> {
    self.controller()?.pre_enc(frame)
  }

  /// Returns the QP to encode `frame` with.
  ///
  /// Asking again before the frame is reported returns the same QP.
  ///
  /// # Errors
  ///
  /// - Returns `NotInitialized` after [`close`].
  /// - Returns `MissingStatistics` if the lookahead has no statistics of
  ///   the frame.
  ///
  /// # Examples
  ///
  /// ```
  /// use ratectl::*;
  ///
  /// # fn main() -> Result<(), RateControlError> {
  /// let rc = RateControlConfig::new().with_bitrate(1_000_000);
  /// let mut ctx = Config::new().with_rate_control(rc).new_context()?;
  ///
  /// let frame = FrameParams::new(0, 0, FrameType::I, 0);
  /// let qp = ctx.frame_qp(&frame)?;
  /// let status = ctx.report(&frame, qp, 120_000)?;
  /// # let _ = status;
  /// # Ok(())
  /// # }
  /// ```
  ///
  /// [`close`]: #method.close
  pub fn frame_qp(
    &mut self, frame: &FrameParams,
  ) -> Result<i32, RateControlError> {
    self.controller()?.frame_qp(frame)
  }

  /// Reports the size `frame` was coded at with `qp_used`.
  ///
  /// A `BigFrame` or `SmallFrame` status asks for the frame to be encoded
  /// again at the returned QP, reported with [`FrameParams::recode`].
  ///
  /// # Errors
  ///
  /// - Returns `NotInitialized` after [`close`].
  /// - Returns `RecodeProtocolViolation` if the frame does not follow a
  ///   pending recode request.
  /// - Returns `BufferExhausted` if the decoder buffer cannot hold the
  ///   frame even as it is.
  ///
  /// [`close`]: #method.close
  pub fn report(
    &mut self, frame: &FrameParams, qp_used: i32, coded_bits: u64,
  ) -> Result<FrameStatus, RateControlError> {
    let status = self.controller()?.report(frame, qp_used, coded_bits);
    if let Err(e) = status {
      warn!("frame {}: {}", frame.encode_order, e);
    }
    status
  }

  /// Switches to new session settings in the middle of the stream.
  ///
  /// # Errors
  ///
  /// - Returns `NotInitialized` after [`close`].
  /// - Returns `InvalidConfig` if `cfg` is rejected. The context keeps
  ///   running with its previous settings then.
  ///
  /// [`close`]: #method.close
  pub fn reset(
    &mut self, cfg: &RateControlConfig,
  ) -> Result<ConfigChange, RateControlError> {
    let change = self.controller()?.reset(cfg)?;
    self.config.rate_control = *cfg;
    Ok(change)
  }

  /// Starts the stream over with `cfg`.
  ///
  /// Works on a closed context as well.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if `cfg` is rejected. A running context
  ///   keeps its controller then.
  pub fn init(&mut self, cfg: &Config) -> Result<(), RateControlError> {
    let controller = cfg.new_controller()?;
    self.controller = Some(controller);
    self.config = *cfg;
    debug!("rate control initialized: {}", self.config.rate_control);
    Ok(())
  }

  /// Drops the controller and its state.
  pub fn close(&mut self) {
    self.controller = None;
  }

  /// Returns whether a controller is running.
  pub fn is_initialized(&self) -> bool {
    self.controller.is_some()
  }

  /// Settings the context runs with.
  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Whether more statistics are needed before `order` can be planned.
  pub fn needs_stats(&self, order: u64) -> bool {
    self.controller.as_ref().map_or(false, |c| c.needs_stats(order))
  }

  /// Gives direct access to the controller.
  ///
  /// # Errors
  ///
  /// - Returns `NotInitialized` after [`close`].
  ///
  /// [`close`]: #method.close
  pub fn rate_control(
    &mut self,
  ) -> Result<&mut (dyn RateControl + Send + 'static), RateControlError> {
    self.controller()
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("config", &self.config)
      .field("initialized", &self.is_initialized())
      .finish()
  }
}
