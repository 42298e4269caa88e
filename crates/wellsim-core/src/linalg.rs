//! Small dense linear algebra for channel-sized matrices (k ≤ ~16).

/// Lower-triangular Cholesky factor `L` with `A = L·Lᵀ`.
///
/// Returns `Err(pivot_index)` when a pivot is not strictly positive, i.e. the
/// matrix is not positive definite. No jitter or regularisation is applied.
pub fn cholesky(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, usize> {
    let k = a.len();
    let mut l = vec![vec![0.0f64; k]; k];
    for i in 0..k {
        for j in 0..=i {
            let mut sum = a[i][j];
            for p in 0..j {
                sum -= l[i][p] * l[j][p];
            }
            if i == j {
                if !(sum > 1e-12) {
                    return Err(i);
                }
                l[i][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }
    Ok(l)
}

/// `L · z` for lower-triangular `L`.
pub fn lower_mul(l: &[Vec<f64>], z: &[f64]) -> Vec<f64> {
    l.iter()
        .enumerate()
        .map(|(i, row)| (0..=i).map(|j| row[j] * z[j]).sum())
        .collect()
}

/// Solve `L · y = b` by forward substitution.
pub fn solve_lower(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let k = b.len();
    let mut y = vec![0.0f64; k];
    for i in 0..k {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i][j] * y[j];
        }
        y[i] = sum / l[i][i];
    }
    y
}

/// Largest `|a[i][j] - a[j][i]|`, or `None` when the matrix is not square.
pub fn asymmetry(a: &[Vec<f64>]) -> Option<f64> {
    let k = a.len();
    if a.iter().any(|row| row.len() != k) {
        return None;
    }
    let mut worst = 0.0f64;
    for i in 0..k {
        for j in (i + 1)..k {
            worst = worst.max((a[i][j] - a[j][i]).abs());
        }
    }
    Some(worst)
}

/// Solve a tridiagonal system with the Thomas algorithm.
///
/// `sub[i]` multiplies `x[i-1]` in row `i` (`sub[0]` unused), `diag[i]`
/// multiplies `x[i]`, `sup[i]` multiplies `x[i+1]` (last entry unused).
/// The system must be diagonally dominant.
pub fn solve_tridiagonal(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    if n == 0 {
        return Vec::new();
    }
    let mut c = vec![0.0f64; n];
    let mut d = vec![0.0f64; n];
    c[0] = sup[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..n {
        let m = diag[i] - sub[i] * c[i - 1];
        c[i] = if i + 1 < n { sup[i] / m } else { 0.0 };
        d[i] = (rhs[i] - sub[i] * d[i - 1]) / m;
    }
    let mut x = vec![0.0f64; n];
    x[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d[i] - c[i] * x[i + 1];
    }
    x
}
