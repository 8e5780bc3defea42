// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The escape-time kernel.
//!
//! Points are iterated eight at a time in plain `[f64; 8]` lane
//! arrays.  Each step is written as whole-array arithmetic followed by
//! a masked select, with no per-lane branch, which leaves the compiler
//! free to use vector instructions where the target has them.  Nothing
//! here depends on it doing so.  Each lane carries its own iterate and
//! counter; a bitmask tracks which lanes are still inside the radius-2
//! disk.  Once a lane leaves, the select keeps its state frozen, and
//! the whole batch stops as soon as every lane has left.  Most points
//! escape in a handful of steps, so that early exit is where the time
//! goes.
//!
//! `escape_time` is the one-point reference.  The batch kernel must
//! agree with it exactly, lane for lane.

use num::Complex;

use crate::planes::Viewport;

/// Points per batch.
pub const LANES: usize = 8;

/// One coordinate per lane.
pub type Lanes = [f64; LANES];

/// Which lanes of a batch hold real points.  Bit `i` set means lane
/// `i` is valid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaneMask(u8);

impl LaneMask {
    /// Every lane valid.
    pub const FULL: LaneMask = LaneMask(0xff);

    /// The first `n` lanes valid.  `n` past `LANES` saturates.
    pub fn first(n: usize) -> LaneMask {
        if n >= LANES {
            LaneMask::FULL
        } else {
            LaneMask(((1u16 << n) - 1) as u8)
        }
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Is lane `lane` valid?
    #[inline]
    pub fn contains(self, lane: usize) -> bool {
        lane < LANES && self.0 & (1 << lane) != 0
    }

    /// Number of valid lanes.
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl From<u8> for LaneMask {
    fn from(bits: u8) -> Self {
        LaneMask(bits)
    }
}

#[inline(always)]
fn mul(a: &Lanes, b: &Lanes) -> Lanes {
    let mut res = [0.0; LANES];
    for i in 0..LANES {
        res[i] = a[i] * b[i];
    }
    res
}

#[inline(always)]
fn add(a: &Lanes, b: &Lanes) -> Lanes {
    let mut res = [0.0; LANES];
    for i in 0..LANES {
        res[i] = a[i] + b[i];
    }
    res
}

#[inline(always)]
fn sub(a: &Lanes, b: &Lanes) -> Lanes {
    let mut res = [0.0; LANES];
    for i in 0..LANES {
        res[i] = a[i] - b[i];
    }
    res
}

/// Iterate up to eight points whose imaginary parts all equal `y0`.
/// This is the shape of a row: one imaginary coordinate, consecutive
/// real coordinates.  Only lanes in `mask` are read from `xs` or
/// written to `counts`.
pub fn compute_batch(xs: &Lanes, y0: f64, mask: LaneMask, max_iter: u32, counts: &mut [u32; LANES]) {
    compute_lanes(xs, &[y0; LANES], mask, max_iter, counts)
}

/// Iterate up to eight independent points `xs[i] + ys[i]i`.  For every
/// lane in `mask`, `counts[i]` receives the iteration at which
/// |z|² first reached 4.0, or `max_iter` if it never did.  Lanes
/// outside `mask` are neither read nor written.
pub fn compute_lanes(xs: &Lanes, ys: &Lanes, mask: LaneMask, max_iter: u32, counts: &mut [u32; LANES]) {
    // Padding lanes start (and stay) at c = 0, whatever the caller left there.
    let mut x0: Lanes = [0.0; LANES];
    let mut y0: Lanes = [0.0; LANES];
    for lane in 0..LANES {
        if mask.contains(lane) {
            x0[lane] = xs[lane];
            y0[lane] = ys[lane];
        }
    }

    let mut x: Lanes = [0.0; LANES];
    let mut y: Lanes = [0.0; LANES];
    let mut iters = [0u32; LANES];
    let mut active = mask.bits();

    for _ in 0..max_iter {
        let x2 = mul(&x, &x);
        let y2 = mul(&y, &y);
        let mag = add(&x2, &y2);
        let mut inside = 0u8;
        for lane in 0..LANES {
            inside |= ((mag[lane] < 4.0) as u8) << lane;
        }

        active &= inside;
        if active == 0 {
            break;
        }

        // z² + c for every lane, live or not; the select drops the rest.
        let xy = mul(&x, &y);
        let next_x = add(&sub(&x2, &y2), &x0);
        let next_y = add(&add(&xy, &xy), &y0);
        for lane in 0..LANES {
            let live = (active >> lane) & 1;
            iters[lane] += u32::from(live);
            x[lane] = if live != 0 { next_x[lane] } else { x[lane] };
            y[lane] = if live != 0 { next_y[lane] } else { y[lane] };
        }
    }

    for lane in 0..LANES {
        if mask.contains(lane) {
            counts[lane] = iters[lane];
        }
    }
}

/// One-point reference: iterate z ← z² + c from zero and report the
/// step at which |z|² first reaches 4.0, or `max_iter`.
pub fn escape_time(c: Complex<f64>, max_iter: u32) -> u32 {
    let mut z = Complex::new(0.0, 0.0);
    for i in 0..max_iter {
        if z.norm_sqr() >= 4.0 {
            return i;
        }
        z = z * z + c;
    }
    max_iter
}

/// Compute every column of row `row` into `out`, which must be
/// exactly one row wide.  The trailing batch is masked down to the
/// columns that exist.
pub fn fill_row(viewport: &Viewport, row: usize, out: &mut [u32]) {
    debug_assert_eq!(out.len(), viewport.width());
    let y0 = viewport.imag_at(row);
    let mut xs: Lanes = [0.0; LANES];
    let mut counts = [0u32; LANES];
    for (batch, cells) in out.chunks_mut(LANES).enumerate() {
        let base = batch * LANES;
        for (lane, x) in xs.iter_mut().enumerate().take(cells.len()) {
            *x = viewport.real_at(base + lane);
        }
        compute_batch(&xs, y0, LaneMask::first(cells.len()), viewport.max_iter(), &mut counts);
        cells.copy_from_slice(&counts[..cells.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planes::Pixel;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn lane_mask_first() {
        assert_eq!(LaneMask::first(0).bits(), 0);
        assert_eq!(LaneMask::first(3).bits(), 0b111);
        assert_eq!(LaneMask::first(8), LaneMask::FULL);
        assert_eq!(LaneMask::first(20), LaneMask::FULL);
        assert_eq!(LaneMask::first(5).count(), 5);
        assert!(!LaneMask::first(5).contains(5));
        assert!(LaneMask::first(5).contains(4));
    }

    #[test]
    fn origin_never_escapes() {
        assert_eq!(escape_time(Complex::new(0.0, 0.0), 100), 100);
        let mut counts = [0; LANES];
        compute_batch(&[0.0; LANES], 0.0, LaneMask::FULL, 100, &mut counts);
        assert_eq!(counts, [100; LANES]);
    }

    #[test]
    fn far_point_escapes_after_one_step() {
        // z1 = c = 3, so |z1|² = 9 and the second check fails.
        assert_eq!(escape_time(Complex::new(3.0, 0.0), 100), 1);
    }

    #[test]
    fn zero_iterations_reports_zero() {
        let mut counts = [7; LANES];
        compute_batch(&[0.0; LANES], 0.0, LaneMask::FULL, 0, &mut counts);
        assert_eq!(counts, [0; LANES]);
        assert_eq!(escape_time(Complex::new(5.0, 5.0), 0), 0);
    }

    #[test]
    fn radius_two_is_outside() {
        // c = -2 stays on |z| = 2 forever: z = -2, 2, 2, ...
        // |z1|² = 4 is not strictly inside, so it escapes at 1.
        assert_eq!(escape_time(Complex::new(-2.0, 0.0), 50), 1);
        let mut counts = [0; LANES];
        compute_batch(&[-2.0; LANES], 0.0, LaneMask::first(1), 50, &mut counts);
        assert_eq!(counts[0], 1);
    }

    #[test]
    fn invalid_lanes_are_untouched() {
        let mut counts = [u32::max_value(); LANES];
        let xs = [0.0, 0.0, 0.0, std::f64::NAN, 1e300, -1e300, 0.0, 0.0];
        compute_batch(&xs, 0.0, LaneMask::first(3), 40, &mut counts);
        assert_eq!(&counts[..3], &[40, 40, 40]);
        assert_eq!(&counts[3..], &[u32::max_value(); 5]);
    }

    #[test]
    fn padding_does_not_change_valid_lanes() {
        let xs = [-0.75, 0.25, 0.3, 0.9, -1.9, 0.0, 0.0, 0.0];
        let mut padded = xs;
        for lane in 5..LANES {
            padded[lane] = std::f64::NAN;
        }
        let mut a = [0; LANES];
        let mut b = [0; LANES];
        compute_batch(&xs, 0.1, LaneMask::first(5), 500, &mut a);
        compute_batch(&padded, 0.1, LaneMask::first(5), 500, &mut b);
        assert_eq!(&a[..5], &b[..5]);
    }

    #[test]
    fn batch_matches_reference_on_random_points() {
        let mut rng = StdRng::seed_from_u64(0x6d61_6e64);
        for _ in 0..500 {
            let mut xs = [0.0; LANES];
            let mut ys = [0.0; LANES];
            for lane in 0..LANES {
                xs[lane] = rng.gen_range(-2.2, 0.8);
                ys[lane] = rng.gen_range(-1.3, 1.3);
            }
            let valid = rng.gen_range(1, LANES + 1);
            let max_iter = rng.gen_range(0, 300);
            let mut counts = [0; LANES];
            compute_lanes(&xs, &ys, LaneMask::first(valid), max_iter, &mut counts);
            for lane in 0..valid {
                let want = escape_time(Complex::new(xs[lane], ys[lane]), max_iter);
                assert_eq!(counts[lane], want, "lane {} at {} + {}i", lane, xs[lane], ys[lane]);
            }
        }
    }

    #[test]
    fn escaped_lanes_stay_frozen_while_others_run() {
        // Lanes 0 and 5 leave after one step.  Lanes 1 and 6 never
        // leave, so the batch runs to the cap around the frozen lanes.
        let xs = [3.0, 0.0, -0.75, 0.3, 0.0, 3.0, -1.0, 0.5];
        let ys = [0.0, 0.0, 0.1, 0.5, 0.0, 3.0, 0.0, 0.5];
        let mut counts = [0; LANES];
        compute_lanes(&xs, &ys, LaneMask::FULL, 1000, &mut counts);
        for lane in 0..LANES {
            let want = escape_time(Complex::new(xs[lane], ys[lane]), 1000);
            assert_eq!(counts[lane], want, "lane {}", lane);
        }
        assert_eq!(counts[0], 1);
        assert_eq!(counts[1], 1000);
    }

    #[test]
    fn known_scenario_on_classic_view() {
        let vp = Viewport::new(-2.0, 1.0, -1.0, 1.0, 800, 800, 100).unwrap();
        let mut row = vec![0; 800];
        fill_row(&vp, 400, &mut row);
        assert_eq!(row[400], 100);
        // Column 787 sits at real 0.95125.
        assert!(row[787] < 10);
        for (x, cell) in row.iter().enumerate() {
            assert_eq!(*cell, escape_time(vp.pixel_to_point(&Pixel(x, 400)), 100));
        }
    }

    #[test]
    fn fill_row_handles_ragged_widths() {
        for width in 1..20 {
            let vp = Viewport::new(-2.0, 1.0, -1.0, 1.0, width, 3, 60).unwrap();
            let mut row = vec![u32::max_value(); width];
            fill_row(&vp, 1, &mut row);
            for (x, cell) in row.iter().enumerate() {
                assert!(*cell <= 60);
                assert_eq!(*cell, escape_time(vp.pixel_to_point(&Pixel(x, 1)), 60));
            }
        }
    }
}
