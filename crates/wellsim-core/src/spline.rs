//! Interpolation over evenly spaced knots.
//!
//! The drift model samples wander values at fixed knot times and evaluates
//! them with either a natural cubic spline or piecewise-linear interpolation.
//! Both are pure functions of the knot values, so two callers evaluating the
//! same curve at the same time get bit-identical results.

use serde::{Deserialize, Serialize};

use crate::linalg::solve_tridiagonal;

/// Interpolation scheme for knot curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    CubicSpline,
    Linear,
}

/// Values at evenly spaced knots on `[start, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct KnotCurve {
    start: f64,
    step: f64,
    values: Vec<f64>,
    /// Second derivatives at the knots; all zero for linear curves.
    moments: Vec<f64>,
}

impl KnotCurve {
    /// Build a curve. `values` must hold at least two knots and `end > start`.
    pub fn new(start: f64, end: f64, values: Vec<f64>, interpolation: Interpolation) -> Self {
        let n = values.len();
        let step = if n > 1 { (end - start) / (n - 1) as f64 } else { 0.0 };
        let moments = match interpolation {
            Interpolation::CubicSpline if n > 2 => natural_moments(&values, step),
            _ => vec![0.0; n],
        };
        Self {
            start,
            step,
            values,
            moments,
        }
    }

    pub fn knots(&self) -> &[f64] {
        &self.values
    }

    /// Evaluate at `t`, clamped to the knot span.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.values.len();
        match n {
            0 => return 0.0,
            1 => return self.values[0],
            _ => {}
        }
        let end = self.start + self.step * (n - 1) as f64;
        let t = if t.is_nan() { self.start } else { t.clamp(self.start, end) };
        let pos = (t - self.start) / self.step;
        let i = (pos.floor() as usize).min(n - 2);
        let b = pos - i as f64;
        let a = 1.0 - b;
        let (y0, y1) = (self.values[i], self.values[i + 1]);
        let (m0, m1) = (self.moments[i], self.moments[i + 1]);
        a * y0 + b * y1 + ((a * a * a - a) * m0 + (b * b * b - b) * m1) * self.step * self.step / 6.0
    }
}

/// Second derivatives of the natural cubic spline through `y` with uniform
/// spacing `h` (zero at both ends).
fn natural_moments(y: &[f64], h: f64) -> Vec<f64> {
    let n = y.len();
    let interior = n - 2;
    let scale = 6.0 / (h * h);
    let rhs: Vec<f64> = (1..n - 1)
        .map(|i| scale * (y[i - 1] - 2.0 * y[i] + y[i + 1]))
        .collect();
    let inner = solve_tridiagonal(
        &vec![1.0; interior],
        &vec![4.0; interior],
        &vec![1.0; interior],
        &rhs,
    );
    let mut m = Vec::with_capacity(n);
    m.push(0.0);
    m.extend(inner);
    m.push(0.0);
    m
}
