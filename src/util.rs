// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

/// Clamps `input` to `[min, max]`.
///
/// Unlike `Ord::clamp` this never panics: when the bounds cross, `max`
/// wins.
#[inline]
pub fn clamp<T: PartialOrd>(input: T, min: T, max: T) -> T {
  let input = if input < min { min } else { input };
  if input > max {
    max
  } else {
    input
  }
}

/// Exponential moving average with the given period.
#[inline]
pub fn moving_average(average: f64, sample: f64, period: f64) -> f64 {
  average + (sample - average) / period
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn clamp_crossed_bounds() {
    assert_eq!(clamp(5, 1, 10), 5);
    assert_eq!(clamp(0, 1, 10), 1);
    assert_eq!(clamp(11, 1, 10), 10);
    assert_eq!(clamp(5, 8, 6), 6);
    assert_eq!(clamp(0.5, 0., 1.), 0.5);
  }

  #[test]
  fn moving_average_converges() {
    let mut avg = 0.;
    for _ in 0..1000 {
      avg = moving_average(avg, 10., 100.);
    }
    assert!((avg - 10.).abs() < 1e-3);
    assert_eq!(moving_average(4., 8., 1.), 8.);
  }
}
