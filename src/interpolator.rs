use nalgebra::Vector3;
use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::enums::Interpolation;

/// Tap count of the widest supported kernel (order 5).
const MAX_TAPS: usize = 6;

/// Horizon precision of the causal filter initialisation.
const PREFILTER_TOLERANCE: f64 = 1e-10;

/// B-spline sampler over a 3D grid with mirrored boundaries.
///
/// Orders 2 and up sample from prefiltered coefficients, see
/// [`Interpolator::coefficients`]; orders 0 and 1 sample the data itself.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Interpolator {
    order: usize,
}

impl Interpolator {
    pub(crate) fn new(interpolation: Interpolation) -> Self {
        Self {
            order: interpolation.order().min(5) as usize,
        }
    }

    /// Voxel count per axis covering `extent` mm at `voxel` mm.
    pub(crate) fn output_shape(extent: &Vector3<f64>, voxel: &Vector3<f64>) -> [usize; 3] {
        let count = |axis: usize| {
            let ratio = (extent[axis] / voxel[axis] * 1e4).round() / 1e4;
            ratio.ceil().max(0.0) as usize + 1
        };
        [count(0), count(1), count(2)]
    }

    /// Interpolation coefficients for `data`, computed in place.
    pub(crate) fn coefficients(&self, mut data: Array3<f64>) -> Array3<f64> {
        let poles = poles(self.order);
        if poles.is_empty() {
            return data;
        }
        for axis in 0..3 {
            Zip::from(data.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
                let mut line = lane.to_vec();
                filter_line(&mut line, &poles);
                for (value, filtered) in lane.iter_mut().zip(line) {
                    *value = filtered;
                }
            });
        }
        data
    }

    /// Value at a continuous voxel position.
    pub(crate) fn sample(&self, coefficients: &ArrayView3<f64>, point: &Vector3<f64>) -> f64 {
        let shape = coefficients.dim();
        let shape = [shape.0, shape.1, shape.2];

        if self.order == 0 {
            let index = |axis: usize| {
                (point[axis].round().max(0.0) as usize).min(shape[axis] - 1)
            };
            return coefficients[[index(0), index(1), index(2)]];
        }

        let taps = self.order + 1;
        let mut indices = [[0usize; MAX_TAPS]; 3];
        let mut weights = [[0f64; MAX_TAPS]; 3];
        for axis in 0..3 {
            let start = (point[axis] - taps as f64 / 2.0).floor() as i64 + 1;
            for tap in 0..taps {
                let index = start + tap as i64;
                indices[axis][tap] = mirror(index, shape[axis]);
                weights[axis][tap] = bspline(self.order, point[axis] - index as f64);
            }
        }

        let mut value = 0.0;
        for i in 0..taps {
            for j in 0..taps {
                let weight = weights[0][i] * weights[1][j];
                if weight == 0.0 {
                    continue;
                }
                for k in 0..taps {
                    value = (weight * weights[2][k])
                        .mul_add(coefficients[[indices[0][i], indices[1][j], indices[2][k]]], value);
                }
            }
        }
        value
    }
}

/// Centred B-spline of degree `order` at `x`.
fn bspline(order: usize, x: f64) -> f64 {
    let half = (order + 1) as f64 / 2.0;
    let mut sum = 0.0;
    let mut binomial = 1.0;
    for k in 0..=order + 1 {
        let term = (x + half - k as f64).max(0.0).powi(order as i32);
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign * binomial * term;
        binomial = binomial * (order + 1 - k) as f64 / (k + 1) as f64;
    }
    sum / factorial(order)
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// Reflect an index into `0..n`, the edge sample not repeated.
#[inline]
fn mirror(index: i64, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as i64 - 1);
    let wrapped = index.rem_euclid(period);
    if wrapped >= n as i64 {
        (period - wrapped) as usize
    } else {
        wrapped as usize
    }
}

fn poles(order: usize) -> Vec<f64> {
    match order {
        2 => vec![8f64.sqrt() - 3.0],
        3 => vec![3f64.sqrt() - 2.0],
        4 => vec![
            (664.0 - 438976f64.sqrt()).sqrt() + 304f64.sqrt() - 19.0,
            (664.0 + 438976f64.sqrt()).sqrt() - 304f64.sqrt() - 19.0,
        ],
        5 => vec![
            (135.0 / 2.0 - (17745.0f64 / 4.0).sqrt()).sqrt() + (105.0f64 / 4.0).sqrt() - 13.0 / 2.0,
            (135.0 / 2.0 + (17745.0f64 / 4.0).sqrt()).sqrt() - (105.0f64 / 4.0).sqrt() - 13.0 / 2.0,
        ],
        _ => Vec::new(),
    }
}

/// Recursive B-spline prefilter of one line, mirror boundary.
fn filter_line(line: &mut [f64], poles: &[f64]) {
    let n = line.len();
    if n < 2 {
        return;
    }
    let gain: f64 = poles
        .iter()
        .map(|z| (1.0 - z) * (1.0 - 1.0 / z))
        .product();
    for value in line.iter_mut() {
        *value *= gain;
    }

    for &z in poles {
        line[0] = causal_init(line, z);
        for i in 1..n {
            line[i] += z * line[i - 1];
        }
        line[n - 1] = (z / (z * z - 1.0)) * (z * line[n - 2] + line[n - 1]);
        for i in (0..n - 1).rev() {
            line[i] = z * (line[i + 1] - line[i]);
        }
    }
}

fn causal_init(line: &[f64], z: f64) -> f64 {
    let n = line.len();
    let horizon = (PREFILTER_TOLERANCE.ln() / z.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = z;
        let mut sum = line[0];
        for value in &line[1..horizon] {
            sum += zn * value;
            zn *= z;
        }
        return sum;
    }

    let inverse = 1.0 / z;
    let mut zn = z;
    let mut z2n = z.powi(n as i32 - 1);
    let mut sum = line[0] + z2n * line[n - 1];
    z2n *= z2n * inverse;
    for value in &line[1..n - 1] {
        sum += (zn + z2n) * value;
        zn *= z;
        z2n *= inverse;
    }
    sum / (1.0 - zn * zn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp() -> Array3<f64> {
        Array3::from_shape_fn((6, 5, 4), |(x, y, z)| x as f64 + 2.0 * y as f64 - 0.5 * z as f64)
    }

    #[test]
    fn kernels_are_partitions_of_unity() {
        for order in 1..=5 {
            for x in [0.0, 0.25, 0.5, 0.9] {
                let start = (x - (order + 1) as f64 / 2.0).floor() as i64 + 1;
                let total: f64 = (0..=order)
                    .map(|tap| bspline(order, x - (start + tap as i64) as f64))
                    .sum();
                assert_relative_eq!(total, 1.0, epsilon = 1e-12);
            }
        }
        assert_relative_eq!(bspline(3, 0.0), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn mirrored_indices() {
        assert_eq!(mirror(-1, 5), 1);
        assert_eq!(mirror(5, 5), 3);
        assert_eq!(mirror(9, 5), 1);
        assert_eq!(mirror(3, 1), 0);
    }

    #[test]
    fn every_order_reproduces_grid_values() {
        let data = ramp();
        for order in 0..=5 {
            let interpolator = Interpolator::new(Interpolation::from_order(order).unwrap());
            let coefficients = interpolator.coefficients(data.clone());
            let value = interpolator.sample(&coefficients.view(), &Vector3::new(2.0, 3.0, 1.0));
            assert_relative_eq!(value, data[[2, 3, 1]], epsilon = 1e-6);
        }
    }

    #[test]
    fn linear_between_samples() {
        let data = ramp();
        let interpolator = Interpolator::new(Interpolation::Linear);
        let value = interpolator.sample(&data.view(), &Vector3::new(1.5, 2.25, 0.5));
        assert_relative_eq!(value, 1.5 + 4.5 - 0.25, epsilon = 1e-12);

        let nearest = Interpolator::new(Interpolation::Nearest);
        assert_relative_eq!(nearest.sample(&data.view(), &Vector3::new(1.4, 2.6, 0.0)), 7.0);
    }

    #[test]
    fn output_shape_counts_endpoints() {
        let shape = Interpolator::output_shape(&Vector3::new(10.0, 4.00001, 0.0), &Vector3::new(2.0, 2.0, 1.0));
        assert_eq!(shape, [6, 3, 1]);
    }
}
