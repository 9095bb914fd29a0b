// Copyright (c) 2020-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

use thiserror::Error;

use crate::api::Context;
use crate::rate::{LookaheadController, RateControl, SinglePassController};

mod rate;
pub use rate::*;

/// Enumeration of possible invalid configuration errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum InvalidConfig {
  /// The width is invalid.
  #[error("invalid width {0} (expected >= 1, <= 65535)")]
  InvalidWidth(usize),
  /// The height is invalid.
  #[error("invalid height {0} (expected >= 1, <= 65535)")]
  InvalidHeight(usize),
  /// Framerate numerator is invalid.
  #[error("invalid framerate numerator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateNum {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// Framerate denominator is invalid.
  #[error("invalid framerate denominator {actual} (expected > 0, <= {max})")]
  InvalidFrameRateDen {
    /// The actual value.
    actual: u64,
    /// The maximal supported value.
    max: u64,
  },
  /// The bit depth is invalid.
  #[error("invalid bit depth {0} (expected >= 8, <= 14)")]
  InvalidBitDepth(u8),
  /// The rate control needs a target bitrate in order to produce results
  #[error("The rate control requires a target bitrate")]
  TargetBitrateNeeded,
  /// Reference distance is invalid.
  #[error("invalid reference distance {actual} (expected > 0, <= {max})")]
  InvalidRefDist {
    /// The actual value.
    actual: u32,
    /// The maximal supported value.
    max: u32,
  },
  /// The decoder buffer size is invalid.
  #[error("invalid buffer size {0} (expected > 0)")]
  InvalidBufferSize(u64),
  /// The initial decoder buffer fullness is invalid.
  #[error("invalid initial delay {actual} (expected > 0, <= {max})")]
  InvalidInitialDelay {
    /// The actual value.
    actual: u64,
    /// The buffer size.
    max: u64,
  },
  /// The frame size limit is invalid.
  #[error("invalid max frame size {0} (expected > 0)")]
  InvalidMaxFrameSize(u64),
  /// The sliding window length is invalid.
  #[error("invalid sliding window length {actual} (expected > 0, <= {max})")]
  InvalidSlidingWindowLength {
    /// The actual value.
    actual: u32,
    /// The maximal supported value.
    max: u32,
  },
  /// The sliding window bitrate is below the target.
  #[error("invalid sliding window bitrate {actual} (expected >= {min})")]
  InvalidSlidingWindowBitrate {
    /// The actual value.
    actual: u64,
    /// The target bitrate.
    min: u64,
  },
  /// Lookahead frame count is invalid.
  #[error("invalid lookahead frames {actual} (expected <= {max} and >= {min})")]
  InvalidLookaheadFrames {
    /// The actual value.
    actual: usize,
    /// The maximal supported value.
    max: usize,
    /// The minimal supported value.
    min: usize,
  },
  /// The lookahead controller cannot enforce per-frame limits.
  #[error("Mismatch in the rate control configuration")]
  RateControlConfigurationMismatch,
}

/// Contains the rate control configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
  /// Session settings.
  pub(crate) rate_control: RateControlConfig,
  /// Lookahead settings, single pass control when unset.
  pub(crate) lookahead: Option<LookaheadConfig>,
}

impl Config {
  /// Create a default configuration
  ///
  /// same as `Default::default()`
  pub fn new() -> Self {
    Config::default()
  }

  /// Set the session settings.
  pub const fn with_rate_control(
    mut self, rate_control: RateControlConfig,
  ) -> Self {
    self.rate_control = rate_control;
    self
  }

  /// Use the lookahead controller.
  ///
  /// Statistics of upcoming frames must then be submitted ahead of their
  /// encode.
  pub const fn with_lookahead(mut self, lookahead: LookaheadConfig) -> Self {
    self.lookahead = Some(lookahead);
    self
  }

  /// Session settings.
  pub const fn rate_control(&self) -> &RateControlConfig {
    &self.rate_control
  }

  /// Lookahead settings.
  pub const fn lookahead(&self) -> Option<LookaheadConfig> {
    self.lookahead
  }

  /// Validates the configuration.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the configuration is invalid.
  pub fn validate(&self) -> Result<(), InvalidConfig> {
    self.rate_control.validate()?;
    if let Some(lookahead) = self.lookahead {
      lookahead.validate()?;
      let rc = &self.rate_control;
      if rc.hrd.is_some()
        || rc.max_frame_size.is_some()
        || rc.sliding_window.is_some()
      {
        return Err(InvalidConfig::RateControlConfigurationMismatch);
      }
    }
    Ok(())
  }

  /// Creates a rate control context
  ///
  /// The lookahead controller is used when a lookahead is configured, the
  /// single pass controller otherwise.
  ///
  /// # Errors
  ///
  /// - Returns `InvalidConfig` if the configuration is invalid.
  pub fn new_context(&self) -> Result<Context, InvalidConfig> {
    Ok(Context::new(self.new_controller()?, *self))
  }

  pub(crate) fn new_controller(
    &self,
  ) -> Result<Box<dyn RateControl + Send>, InvalidConfig> {
    self.validate()?;

    let controller: Box<dyn RateControl + Send> = match self.lookahead {
      Some(lookahead) => {
        Box::new(LookaheadController::new(&self.rate_control, lookahead)?)
      }
      None => Box::new(SinglePassController::new(&self.rate_control)?),
    };
    Ok(controller)
  }
}
