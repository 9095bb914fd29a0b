// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

mod tables;

pub use tables::*;

/// Highest QP of an 8-bit stream.
pub const MAX_QP: i32 = 51;
/// Lowest QP the controllers ever hand out.
pub const MIN_QP: i32 = 1;

/// Offset added to every QP for streams deeper than 8 bits.
pub const fn qp_offset(bit_depth: u8) -> i32 {
  6 * (bit_depth as i32 - 8)
}

/// Highest table index usable with `qp_offset`.
#[inline]
pub fn max_qp_index(qp_offset: i32) -> i32 {
  (MAX_QP + qp_offset).clamp(0, QSTEP_LEN as i32 - 1)
}

/// Quantizer step of `qp`, clamped to the legal range.
#[inline]
pub fn qp_to_qstep(qp: i32, qp_offset: i32) -> f64 {
  QSTEP[qp.clamp(0, max_qp_index(qp_offset)) as usize]
}

/// Largest QP whose step does not exceed `qstep`.
pub fn qstep_to_qp_floor(qstep: f64, qp_offset: i32) -> i32 {
  let legal = &QSTEP[..=max_qp_index(qp_offset) as usize];
  let upper = legal.partition_point(|&q| q <= qstep);
  (upper as i32 - 1).max(0)
}

/// QP whose step is nearest to `qstep`.
///
/// Ties at the exact midpoint of two entries go to the higher QP.
pub fn qstep_to_qp(qstep: f64, qp_offset: i32) -> i32 {
  let qp = qstep_to_qp_floor(qstep, qp_offset);
  if qp >= max_qp_index(qp_offset) {
    return max_qp_index(qp_offset);
  }
  let idx = qp as usize;
  if qstep >= (QSTEP[idx] + QSTEP[idx + 1]) / 2. {
    qp + 1
  } else {
    qp
  }
}
