//! Semi-global block matching.
//!
//! Census transform, Hamming costs summed over a square window, cost
//! aggregation along mode-dependent scanlines, winner-take-all with a
//! uniqueness test, parabolic sub-pixel refinement, left/right consistency
//! and speckle removal. Disparities come out in fixed point, `DISP_SCALE`
//! units per pixel.

use image::{GrayImage, Luma};
use ndarray::{Array2, Array3};

use crate::error::{Error, Result};
use crate::params::{MatcherMode, StereoParams};

pub const DISP_SHIFT: u32 = 4;
/// Fixed-point sub-pixel factor of [`SgbmMatcher::compute`] output.
pub const DISP_SCALE: i32 = 1 << DISP_SHIFT;

const PRE_BLUR_SIGMA: f32 = 1.0;
/// Hamming distance between two 8-bit census codes that share nothing.
const MAX_PIXEL_COST: u32 = 8;

struct ScanLine {
    drow: i32,
    dcol: i32,
}

const fn scan(drow: i32, dcol: i32) -> ScanLine {
    ScanLine { drow, dcol }
}

static PATHS_3WAY: [ScanLine; 3] = [scan(0, 1), scan(0, -1), scan(1, 0)];
static PATHS_HH4: [ScanLine; 4] = [scan(0, 1), scan(0, -1), scan(1, 0), scan(-1, 0)];
static PATHS_SGBM: [ScanLine; 5] = [scan(0, 1), scan(1, 1), scan(1, 0), scan(1, -1), scan(0, -1)];
static PATH8: [ScanLine; 8] = [
    scan(1, 1),
    scan(1, 0),
    scan(1, -1),
    scan(0, -1),
    scan(-1, -1),
    scan(-1, 0),
    scan(-1, 1),
    scan(0, 1),
];

fn scan_lines(mode: MatcherMode) -> &'static [ScanLine] {
    match mode {
        MatcherMode::Sgbm3Way => &PATHS_3WAY,
        MatcherMode::Hh4 => &PATHS_HH4,
        MatcherMode::Sgbm => &PATHS_SGBM,
        MatcherMode::Hh => &PATH8,
    }
}

/// Reject configurations the matcher cannot run.
pub fn validate(params: &StereoParams) -> Result<()> {
    let reject = |msg: String| Err(Error::ConfigurationInvalid(msg));
    if params.num_disparities <= 0 || params.num_disparities % 16 != 0 {
        return reject(format!(
            "numDisparities must be a positive multiple of 16, got {}",
            params.num_disparities
        ));
    }
    if params.block_size < 1 || params.block_size % 2 == 0 {
        return reject(format!(
            "blockSize must be odd and at least 1, got {}",
            params.block_size
        ));
    }
    if params.effective_p1() < 0 || params.effective_p2() < 0 {
        return reject(format!(
            "penalties must be non-negative, got P1={} P2={}",
            params.effective_p1(),
            params.effective_p2()
        ));
    }
    if !(0..100).contains(&params.uniqueness_ratio) {
        return reject(format!(
            "uniquenessRatio must be in [0, 100), got {}",
            params.uniqueness_ratio
        ));
    }
    if params.speckle_window_size < 0 || params.speckle_range < 0 {
        return reject(format!(
            "speckle filter knobs must be non-negative, got window {} range {}",
            params.speckle_window_size, params.speckle_range
        ));
    }
    let span = (params.min_disparity as i64).abs() + params.num_disparities as i64 + 1;
    if span * DISP_SCALE as i64 > i16::MAX as i64 {
        return reject(format!(
            "disparity range {}..{} does not fit fixed-point output",
            params.min_disparity,
            params.min_disparity as i64 + params.num_disparities as i64
        ));
    }
    Ok(())
}

fn calc_hamming_distance(val_l: u8, val_r: u8) -> u32 {
    (val_l ^ val_r).count_ones()
}

fn census_transform(img: &GrayImage) -> GrayImage {
    let (imgx, imgy) = img.dimensions();
    let mut census = GrayImage::new(imgx, imgy);
    for y in 0..imgy {
        for x in 0..imgx {
            let Luma([center]) = *img.get_pixel(x, y);
            let mut val: u8 = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let xdx = (x as i64 + dx).clamp(0, imgx as i64 - 1) as u32;
                    let ydy = (y as i64 + dy).clamp(0, imgy as i64 - 1) as u32;
                    let Luma([t]) = *img.get_pixel(xdx, ydy);
                    val = (val << 1) | u8::from(t >= center);
                }
            }
            census.put_pixel(x, y, Luma([val]));
        }
    }
    census
}

/// Per-pixel census costs, `(rows, cols, numDisparities)`.
fn calc_pixel_cost(census_l: &GrayImage, census_r: &GrayImage, min_disp: i32, d_range: usize) -> Array3<u32> {
    let imgx = census_l.width() as usize;
    let imgy = census_l.height() as usize;
    let mut ans = Array3::<u32>::from_elem((imgy, imgx, d_range), MAX_PIXEL_COST);
    for (x, y, val_l) in census_l.enumerate_pixels() {
        for d in 0..d_range {
            let xr = x as i64 - (min_disp as i64 + d as i64);
            if xr >= 0 && xr < imgx as i64 {
                let val_r = census_r.get_pixel(xr as u32, y);
                ans[(y as usize, x as usize, d)] = calc_hamming_distance(val_l.0[0], val_r.0[0]);
            }
        }
    }
    ans
}

/// Sum pixel costs over a `block x block` window, replicating borders.
fn window_sum(pixel_cost: &Array3<u32>, block: usize) -> Array3<u32> {
    let (rows, cols, d_range) = pixel_cost.dim();
    let half = (block / 2) as i64;
    let clamp = |v: i64, n: usize| v.clamp(0, n as i64 - 1) as usize;

    let mut horizontal = Array3::<u32>::zeros((rows, cols, d_range));
    for row in 0..rows {
        for col in 0..cols {
            for k in -half..=half {
                let c = clamp(col as i64 + k, cols);
                for d in 0..d_range {
                    horizontal[(row, col, d)] += pixel_cost[(row, c, d)];
                }
            }
        }
    }

    let mut summed = Array3::<u32>::zeros((rows, cols, d_range));
    for row in 0..rows {
        for k in -half..=half {
            let r = clamp(row as i64 + k, rows);
            for col in 0..cols {
                for d in 0..d_range {
                    summed[(row, col, d)] += horizontal[(r, col, d)];
                }
            }
        }
    }
    summed
}

fn ordered(n: usize, forward: bool) -> Box<dyn Iterator<Item = usize>> {
    if forward {
        Box::new(0..n)
    } else {
        Box::new((0..n).rev())
    }
}

/// Accumulate one scanline direction into `sum_cost`. `path_cost` is scratch.
fn aggregate_along(
    cost_array: &Array3<u32>,
    path: &ScanLine,
    p1: u32,
    p2: u32,
    path_cost: &mut Array3<u32>,
    sum_cost: &mut Array3<u32>,
) {
    let (rows, cols, d_range) = cost_array.dim();
    for row in ordered(rows, path.drow >= 0) {
        for col in ordered(cols, path.dcol >= 0) {
            let prow = row as i64 - path.drow as i64;
            let pcol = col as i64 - path.dcol as i64;
            if prow < 0 || prow >= rows as i64 || pcol < 0 || pcol >= cols as i64 {
                for d in 0..d_range {
                    let c = cost_array[(row, col, d)];
                    path_cost[(row, col, d)] = c;
                    sum_cost[(row, col, d)] += c;
                }
                continue;
            }
            let (prow, pcol) = (prow as usize, pcol as usize);
            let mut min_prev_d = u32::MAX;
            for d in 0..d_range {
                min_prev_d = min_prev_d.min(path_cost[(prow, pcol, d)]);
            }
            let jump = min_prev_d.saturating_add(p2);
            for d in 0..d_range {
                let mut best = path_cost[(prow, pcol, d)].min(jump);
                if d > 0 {
                    best = best.min(path_cost[(prow, pcol, d - 1)].saturating_add(p1));
                }
                if d + 1 < d_range {
                    best = best.min(path_cost[(prow, pcol, d + 1)].saturating_add(p1));
                }
                let v = cost_array[(row, col, d)] + (best - min_prev_d);
                path_cost[(row, col, d)] = v;
                sum_cost[(row, col, d)] = sum_cost[(row, col, d)].saturating_add(v);
            }
        }
    }
}

/// Remove connected regions of at most `max_speckle_size` pixels whose
/// neighbouring disparities differ by at most `max_diff`.
pub fn filter_speckles(disp: &mut Array2<i16>, new_val: i16, max_speckle_size: usize, max_diff: i32) {
    let (rows, cols) = disp.dim();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut region: Vec<(usize, usize)> = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if visited[(row, col)] || disp[(row, col)] == new_val {
                continue;
            }
            visited[(row, col)] = true;
            stack.push((row, col));
            region.clear();
            while let Some((r, c)) = stack.pop() {
                region.push((r, c));
                let d = disp[(r, c)] as i32;
                let neighbours = [
                    (r.wrapping_sub(1), c),
                    (r + 1, c),
                    (r, c.wrapping_sub(1)),
                    (r, c + 1),
                ];
                for &(nr, nc) in neighbours.iter() {
                    if nr >= rows || nc >= cols || visited[(nr, nc)] {
                        continue;
                    }
                    let nd = disp[(nr, nc)];
                    if nd != new_val && (nd as i32 - d).abs() <= max_diff {
                        visited[(nr, nc)] = true;
                        stack.push((nr, nc));
                    }
                }
            }
            if region.len() <= max_speckle_size {
                for &(r, c) in &region {
                    disp[(r, c)] = new_val;
                }
            }
        }
    }
}

/// Semi-global block matcher bound to one validated configuration.
#[derive(Debug, Clone)]
pub struct SgbmMatcher {
    params: StereoParams,
    p1: u32,
    p2: u32,
}

impl SgbmMatcher {
    /// Fails with `ConfigurationInvalid` when the configuration cannot run.
    /// `P2` is raised to `P1 + 1` when not larger than `P1`.
    pub fn new(params: StereoParams) -> Result<Self> {
        validate(&params)?;
        let p1 = params.effective_p1() as u32;
        let p2 = (params.effective_p2() as u32).max(p1.saturating_add(1));
        Ok(SgbmMatcher { params, p1, p2 })
    }

    pub fn params(&self) -> &StereoParams {
        &self.params
    }

    /// Output value of pixels without a reliable match.
    pub fn invalid_value(&self) -> i16 {
        ((self.params.min_disparity - 1) * DISP_SCALE) as i16
    }

    /// Fixed-point disparity of `left` against `right`, one value per left pixel.
    pub fn compute(&self, left: &GrayImage, right: &GrayImage) -> Result<Array2<i16>> {
        if left.dimensions() != right.dimensions() {
            return Err(Error::TypeMismatch(format!(
                "left is {:?} but right is {:?}",
                left.dimensions(),
                right.dimensions()
            )));
        }
        if left.width() == 0 || left.height() == 0 {
            return Err(Error::TypeMismatch("empty images".into()));
        }

        let min_disp = self.params.min_disparity;
        let d_range = self.params.num_disparities as usize;

        let left_g = image::imageops::blur(left, PRE_BLUR_SIGMA);
        let right_g = image::imageops::blur(right, PRE_BLUR_SIGMA);
        let census_l = census_transform(&left_g);
        let census_r = census_transform(&right_g);
        let pixel_cost = calc_pixel_cost(&census_l, &census_r, min_disp, d_range);
        let cost_array = window_sum(&pixel_cost, self.params.block_size as usize);
        drop(pixel_cost);

        let mut path_cost = Array3::<u32>::zeros(cost_array.dim());
        let mut sum_cost = Array3::<u32>::zeros(cost_array.dim());
        for path in scan_lines(self.params.mode) {
            aggregate_along(&cost_array, path, self.p1, self.p2, &mut path_cost, &mut sum_cost);
        }
        drop(path_cost);

        let mut disp = self.calc_disparity(&sum_cost);

        if self.params.speckle_window_size > 0 && self.params.speckle_range > 0 {
            filter_speckles(
                &mut disp,
                self.invalid_value(),
                self.params.speckle_window_size as usize,
                self.params.speckle_range.saturating_mul(DISP_SCALE),
            );
        }
        Ok(disp)
    }

    fn calc_disparity(&self, sum_cost: &Array3<u32>) -> Array2<i16> {
        let (rows, cols, d_range) = sum_cost.dim();
        let min_disp = self.params.min_disparity;
        let invalid = self.invalid_value();
        let uniqueness = self.params.uniqueness_ratio as u64;
        let max_diff = self.params.disp12_max_diff;

        let mut disp = Array2::<i16>::from_elem((rows, cols), invalid);
        let mut disp2 = vec![i32::MIN; cols];
        let mut disp2cost = vec![u32::MAX; cols];

        for row in 0..rows {
            disp2.iter_mut().for_each(|v| *v = i32::MIN);
            disp2cost.iter_mut().for_each(|v| *v = u32::MAX);

            for col in 0..cols {
                let cost = |d: usize| sum_cost[(row, col, d)];
                let best = (0..d_range).min_by_key(|&d| cost(d)).unwrap_or(0);
                let min_s = cost(best);

                let ambiguous = (0..d_range).any(|d| {
                    (d as i64 - best as i64).abs() > 1
                        && (cost(d) as u64) * (100 - uniqueness) < (min_s as u64) * 100
                });
                if ambiguous {
                    continue;
                }

                let whole = min_disp + best as i32;
                let xr = col as i64 - whole as i64;
                if xr >= 0 && (xr as usize) < cols && disp2cost[xr as usize] > min_s {
                    disp2cost[xr as usize] = min_s;
                    disp2[xr as usize] = whole;
                }

                let mut fixed = whole * DISP_SCALE;
                if best > 0 && best + 1 < d_range {
                    let prev = cost(best - 1) as i64;
                    let next = cost(best + 1) as i64;
                    let denom2 = (prev + next - 2 * min_s as i64).max(1);
                    fixed += (((prev - next) * DISP_SCALE as i64 + denom2) / (denom2 * 2)) as i32;
                }
                disp[(row, col)] = fixed as i16;
            }

            if max_diff >= 0 {
                for col in 0..cols {
                    let d = disp[(row, col)];
                    if d == invalid {
                        continue;
                    }
                    let d = d as i32;
                    let d_floor = d >> DISP_SHIFT;
                    let d_ceil = (d + DISP_SCALE - 1) >> DISP_SHIFT;
                    let disagrees = |dd: i32| {
                        let xr = col as i64 - dd as i64;
                        if xr < 0 || xr >= cols as i64 {
                            return false;
                        }
                        let other = disp2[xr as usize];
                        other != i32::MIN && (other - dd).abs() > max_diff
                    };
                    if disagrees(d_floor) && disagrees(d_ceil) {
                        disp[(row, col)] = invalid;
                    }
                }
            }
        }
        disp
    }
}

/// Fixed-point disparity of `left` against `right` under `params`.
pub fn compute_disp(left: &GrayImage, right: &GrayImage, params: &StereoParams) -> Result<Array2<i16>> {
    SgbmMatcher::new(*params)?.compute(left, right)
}
