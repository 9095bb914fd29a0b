// Copyright (c) 2018-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

//! Hands pre-analysis statistics from an analysis thread to the thread
//! that runs the lookahead controller.

use crate::rate::{FrameStatData, RateControl};

use crossbeam::channel::{bounded, Receiver, Sender};
use log::debug;
use thiserror::Error;

/// An error returned from the `send` methods.
///
/// The statistics could not be sent because the receiver is gone.
///
/// The error contains the statistics so they can be recovered.
#[derive(PartialEq, Clone, Copy, Debug, Error)]
#[error("sending on a disconnected channel")]
pub struct SendError<T>(pub T);

/// An error returned from the `try_send` methods.
///
/// The error contains the statistics being sent so they can be recovered.
#[derive(PartialEq, Clone, Copy, Debug, Error)]
pub enum TrySendError<T> {
  /// The window is full.
  #[error("sending on a full channel")]
  Full(T),

  /// The receiver is gone.
  #[error("sending on a disconnected channel")]
  Disconnected(T),
}

impl<T> SendError<T> {
  fn from(value: crossbeam::channel::SendError<T>) -> Self {
    Self(value.0)
  }
}

impl<T> TrySendError<T> {
  fn from(value: crossbeam::channel::TrySendError<T>) -> Self {
    use crossbeam::channel::TrySendError::*;
    match value {
      Full(v) => TrySendError::Full(v),
      Disconnected(v) => TrySendError::Disconnected(v),
    }
  }
}

/// State of the window after [`StatReceiver::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
  /// The window of the frame is complete.
  Ready,
  /// The sender is gone, the frame is planned over what is left.
  Draining,
  /// The sender is gone and the frame has no statistics.
  Finished,
}

/// Endpoint to send pre-analysis statistics
pub struct StatSender(Sender<FrameStatData>);

impl StatSender {
  /// Sends the statistics of the next frame in encode order.
  ///
  /// Blocks while the channel holds a whole window.
  ///
  /// # Errors
  ///
  /// - `SendError` if the receiver is gone.
  pub fn send(
    &self, stat: FrameStatData,
  ) -> Result<(), SendError<FrameStatData>> {
    self.0.send(stat).map_err(SendError::from)
  }

  /// Sends the statistics of the next frame in encode order, if there is
  /// room for them.
  ///
  /// # Errors
  ///
  /// - `TrySendError::Full` if the channel holds a whole window.
  /// - `TrySendError::Disconnected` if the receiver is gone.
  pub fn try_send(
    &self, stat: FrameStatData,
  ) -> Result<(), TrySendError<FrameStatData>> {
    self.0.try_send(stat).map_err(TrySendError::from)
  }

  /// Statistics in flight.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Returns whether nothing is in flight.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Returns whether a `send` would block.
  pub fn is_full(&self) -> bool {
    self.0.is_full()
  }
}

/// Endpoint to receive pre-analysis statistics
pub struct StatReceiver(Receiver<FrameStatData>);

impl StatReceiver {
  /// Moves statistics into `controller` until `order` can be planned.
  ///
  /// Blocks until the window of `order` is complete or the sender is gone.
  pub fn fill<R: RateControl + ?Sized>(
    &self, controller: &mut R, order: u64,
  ) -> FillStatus {
    while controller.needs_stats(order) {
      match self.0.recv() {
        Ok(stat) => controller.submit_stat(stat),
        Err(_) => {
          let status = if controller.has_stats(order) {
            FillStatus::Draining
          } else {
            FillStatus::Finished
          };
          debug!("frame {}: {:?}", order, status);
          return status;
        }
      }
    }
    FillStatus::Ready
  }

  /// Statistics waiting to be moved.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Returns whether nothing is waiting.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Creates a channel holding at most `depth` statistics in flight.
pub fn stat_channel(depth: usize) -> (StatSender, StatReceiver) {
  let (tx, rx) = bounded(depth.max(1));
  (StatSender(tx), StatReceiver(rx))
}
