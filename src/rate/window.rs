// Copyright (c) 2019-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

/// Peak bitrate limiter over the last `len` committed frames.
///
/// The window may never hold more than `max_win_bits`. Inside that bound
/// an adaptive ceiling shrinks by `step` per frame while the stream stays
/// under it, so a burst has to be paid back before the next one.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
  sizes: Box<[f64]>,
  pos: usize,
  last_order: Option<u64>,
  max_win_bits: f64,
  limit: f64,
  min_limit: f64,
  step: f64,
}

impl SlidingWindow {
  pub fn new(
    len: u32, max_bits_per_frame: f64, avg_bits_per_frame: f64,
  ) -> Self {
    let len = len.max(1) as usize;
    let max_win_bits = max_bits_per_frame * len as f64;
    let avg = avg_bits_per_frame.min(max_bits_per_frame);
    let step = (max_win_bits / len as f64 - avg) / 2.;
    let min_limit = max_win_bits - step * len as f64;

    SlidingWindow {
      sizes: vec![max_bits_per_frame / 3.; len].into_boxed_slice(),
      pos: 0,
      last_order: None,
      max_win_bits,
      limit: min_limit,
      min_limit,
      step,
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.sizes.len()
  }

  /// Hard bound on the bits of any `len` consecutive frames.
  pub fn max_window_bits(&self) -> f64 {
    self.max_win_bits
  }

  pub fn limit(&self) -> f64 {
    self.limit
  }

  // Sum of the `n` most recent sizes, current slot included.
  fn last_bits(&self, n: usize) -> f64 {
    let len = self.len();
    (0..n.min(len)).map(|i| self.sizes[(self.pos + len - i) % len]).sum()
  }

  /// Records a committed frame size.
  ///
  /// Calls repeating the previous `order` overwrite its size in place and
  /// leave the ceiling where it is.
  pub fn observe(
    &mut self, size: f64, order: u64, panic: bool, scene_change: bool,
    recode: u32,
  ) {
    let advanced = self.last_order != Some(order);
    if advanced {
      self.last_order = Some(order);
      self.pos = (self.pos + 1) % self.len();
    }
    self.sizes[self.pos] = size;
    if !advanced {
      return;
    }

    let len = self.len();
    if panic || scene_change {
      self.limit = ((self.last_bits(len) + self.max_win_bits) / 2.)
        .min(self.max_win_bits)
        .max(self.min_limit);
    } else if recode > 0 {
      self.limit = (self.last_bits(len) + self.step / 2.)
        .max(self.limit)
        .min(self.max_win_bits);
    } else if self.limit > self.min_limit + self.step
      && self.limit - self.step > self.last_bits(len - 1) + size
    {
      self.limit -= self.step;
    }
  }

  /// Largest size the next frame may have.
  pub fn max_allowed(
    &self, panic: bool, scene_change: bool, recode: u32,
  ) -> f64 {
    let win_bits = self.last_bits(self.len() - 1);
    let mut limit = self.limit;
    if scene_change {
      limit = (self.max_win_bits + limit) / 2.;
    }
    if panic {
      limit = self.max_win_bits;
    }
    limit =
      (limit + f64::from(recode) * self.step / 2.).min(self.max_win_bits);

    let allowed = if win_bits >= self.limit {
      self.max_win_bits - win_bits
    } else {
      limit - win_bits
    };
    allowed.max(0.)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaChaRng;

  // 10 frames, 200 kbit peak, 100 kbit average
  fn window() -> SlidingWindow {
    SlidingWindow::new(10, 200_000., 100_000.)
  }

  fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
  }

  #[test]
  fn initial_state() {
    let w = window();
    assert_eq!(w.max_window_bits(), 2_000_000.);
    // step 50k, floor 1.5M
    assert_eq!(w.limit(), 1_500_000.);
    let prefill = 9. * 200_000. / 3.;
    assert_close(w.max_allowed(false, false, 0), 1_500_000. - prefill);
    assert_close(w.max_allowed(true, false, 0), 2_000_000. - prefill);
    assert_close(w.max_allowed(false, true, 0), 1_750_000. - prefill);
    assert_close(w.max_allowed(false, false, 2), 1_550_000. - prefill);
  }

  #[test]
  fn same_order_overwrites() {
    let mut w = window();
    w.observe(500_000., 0, false, false, 0);
    w.observe(100_000., 0, false, false, 1);
    let prefill = 8. * 200_000. / 3.;
    assert_close(
      w.max_allowed(false, false, 0),
      1_500_000. - prefill - 100_000.,
    );
  }

  #[test]
  fn repeated_order_keeps_limit() {
    let mut w = window();
    for order in 0..10 {
      w.observe(190_000., order, false, false, 0);
    }
    let limit = w.limit();
    w.observe(190_000., 9, true, false, 1);
    assert_eq!(w.limit(), limit);
    w.observe(190_000., 9, false, true, 2);
    assert_eq!(w.limit(), limit);
    assert_close(w.max_allowed(false, false, 0), 2_000_000. - 9. * 190_000.);
  }

  #[test]
  fn scene_change_widens_limit() {
    let mut w = window();
    w.observe(900_000., 0, false, true, 0);
    assert!(w.limit() > 1_500_000.);
    assert!(w.limit() <= w.max_window_bits());
    let widened = w.limit();
    for order in 1..40 {
      w.observe(50_000., order, false, false, 0);
    }
    assert!(w.limit() < widened);
    assert!(w.limit() >= 1_500_000.);
  }

  #[test]
  fn bounded_window_sums() {
    let mut rng = ChaChaRng::from_seed([0; 32]);
    let mut w = window();
    let mut history = Vec::new();
    for order in 0..1_000 {
      let wanted: f64 = rng.gen_range(0. ..600_000.);
      let size = wanted.min(w.max_allowed(false, false, 0));
      w.observe(size, order, false, false, 0);
      history.push(size);
    }
    for win in history.windows(10) {
      let sum: f64 = win.iter().sum();
      assert!(sum <= w.max_window_bits() + 1e-6, "{sum}");
    }
  }
}
