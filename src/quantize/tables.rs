// Copyright (c) 2017-2024, The rav1e contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License and
// the Alliance for Open Media Patent License 1.0. If the BSD 2 Clause License
// was not distributed with this source code in the LICENSE file, you can
// obtain it at www.aomedia.org/license/software. If the Alliance for Open
// Media Patent License 1.0 was not distributed with this source code in the
// PATENTS file, you can obtain it at www.aomedia.org/license/patent.

/// Number of entries in [`QSTEP`].
pub const QSTEP_LEN: usize = 88;

/// Quantizer step size for every QP, 8-bit range first.
///
/// The step doubles every 6 QP. Entries past 51 are only reachable with the
/// QP offset of high bit depth streams. Rate models exchanged between
/// implementations depend on these exact values.
#[rustfmt::skip]
pub static QSTEP: [f64; QSTEP_LEN] = [
  0.630, 0.707, 0.794, 0.891, 1.000, 1.122, 1.260, 1.414,
  1.587, 1.782, 2.000, 2.245, 2.520, 2.828, 3.175, 3.564,
  4.000, 4.490, 5.040, 5.657, 6.350, 7.127, 8.000, 8.980,
  10.079, 11.314, 12.699, 14.254, 16.000, 17.959, 20.159, 22.627,
  25.398, 28.509, 32.000, 35.919, 40.317, 45.255, 50.797, 57.018,
  64.000, 71.838, 80.635, 90.510, 101.594, 114.035, 128.000, 143.675,
  161.270, 181.019, 203.187, 228.070, 256.000, 287.350, 322.540, 362.039,
  406.375, 456.140, 512.000, 574.701, 645.080, 724.077, 812.749, 912.280,
  1024.000, 1149.401, 1290.159, 1448.155, 1625.499, 1824.561, 2048.000,
  2298.802, 2580.318, 2896.309, 3250.997, 3649.121, 4096.000, 4597.605,
  5160.637, 5792.619, 6501.995, 7298.242, 8192.000, 9195.209, 10321.273,
  11585.238, 13003.989, 14596.485,
];
