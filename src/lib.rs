// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! ratectl is a bitrate controller for block-based video encoders.
//!
//! It picks the quantization parameter of every frame so that a stream
//! meets its target bitrate, and optionally a decoder buffer model, a hard
//! frame size limit and a maximum bitrate over a sliding window.
//!
//! # Basic usage
//!
//! ```
//! use ratectl::*;
//!
//! # fn main() -> Result<(), RateControlError> {
//! let rc = RateControlConfig::new()
//!   .with_bitrate(2_000_000)
//!   .with_picture(1920, 1080, ChromaSampling::Cs420, 8)
//!   .with_gop(60, 1, false);
//! let mut ctx = Config::new().with_rate_control(rc).new_context()?;
//!
//! for order in 0..10 {
//!   let frame_type = if order == 0 { FrameType::I } else { FrameType::P };
//!   let mut frame = FrameParams::new(order, order, frame_type, 0);
//!   let mut qp = ctx.frame_qp(&frame)?;
//!   loop {
//!     // encode the frame at `qp`
//!     let coded_bits = 60_000;
//!     let status = ctx.report(&frame, qp, coded_bits)?;
//!     if !status.status.needs_recode() {
//!       break;
//!     }
//!     frame = frame.recode();
//!     qp = status.qp;
//!   }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(bare_trait_objects)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::verbose_bit_mask)]
#![warn(clippy::expl_impl_clone_on_copy)]
#![warn(clippy::linkedlist)]
#![warn(clippy::map_flatten)]
#![warn(clippy::mem_forget)]
#![warn(clippy::mut_mut)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_continue)]
#![warn(clippy::path_buf_push_overwrite)]
#![warn(clippy::range_plus_one)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::missing_errors_doc)]

mod serialize {
  cfg_if::cfg_if! {
    if #[cfg(feature="serialize")] {
      pub use serde::*;
    } else {
      pub use noop_proc_macro::{Deserialize, Serialize};
    }
  }
}

mod util;

pub mod quantize;
pub mod rate;

mod api;

pub use crate::api::*;

#[cfg(feature = "fuzzing")]
#[doc(hidden)]
pub mod fuzzing;

/// Commonly used types and traits.
pub mod prelude {
  pub use crate::api::*;
  pub use crate::rate::{
    ConfigChange, FrameStatData, LookaheadController, RateControl,
    SinglePassController,
  };
}
