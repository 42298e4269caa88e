//! Per-well QC flags.
//!
//! [`annotate`] records `edge_distance` and `is_outlier` in each well's
//! metadata. Outliers are wells whose log-channel vector lies beyond the
//! χ²(k) quantile `1 − alpha` in squared Mahalanobis distance from the plate
//! mean.
//!
//! Small plates or collinear channels give a singular sample covariance. In
//! that case the distance falls back to a diagonal (standardised Euclidean)
//! form and a warning is logged. Zero-variance channels are dropped from the
//! diagonal distance.

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{Error, Result};
use crate::linalg::{cholesky, solve_lower};
use crate::well::PlateBatch;

/// Floor applied before taking logs.
const LOG_FLOOR: f64 = 1e-9;

/// How the outlier distance was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceKind {
    Mahalanobis,
    /// Singular covariance; standardised Euclidean.
    Diagonal,
}

/// Squared distances per well (`None` for wells missing a channel).
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierScores {
    pub kind: DistanceKind,
    pub dims: usize,
    pub distances: Vec<Option<f64>>,
}

/// Squared Mahalanobis distances of every well's log-`category` vector.
pub fn outlier_scores(batch: &PlateBatch, category: &str) -> OutlierScores {
    let channels: Vec<String> = batch
        .iter()
        .find_map(|w| w.readouts.get(category))
        .map(|c| c.keys().cloned().collect())
        .unwrap_or_default();
    let k = channels.len();
    let vectors: Vec<Option<Vec<f64>>> = batch
        .iter()
        .map(|w| {
            let values = w.readouts.get(category)?;
            channels
                .iter()
                .map(|ch| values.get(ch).map(|v| v.max(LOG_FLOOR).ln()))
                .collect()
        })
        .collect();
    let complete: Vec<&Vec<f64>> = vectors.iter().flatten().collect();
    let n = complete.len();
    if k == 0 || n < 2 {
        return OutlierScores {
            kind: DistanceKind::Diagonal,
            dims: k,
            distances: vec![None; batch.len()],
        };
    }

    let mean: Vec<f64> = (0..k)
        .map(|j| complete.iter().map(|v| v[j]).sum::<f64>() / n as f64)
        .collect();
    let mut cov = vec![vec![0.0f64; k]; k];
    for v in &complete {
        for i in 0..k {
            for j in 0..=i {
                cov[i][j] += (v[i] - mean[i]) * (v[j] - mean[j]);
            }
        }
    }
    for i in 0..k {
        for j in 0..=i {
            cov[i][j] /= (n - 1) as f64;
            cov[j][i] = cov[i][j];
        }
    }

    let factor = if n > k { cholesky(&cov).ok() } else { None };
    let kind = if factor.is_some() {
        DistanceKind::Mahalanobis
    } else {
        log::warn!(
            "plate {}: singular {category} covariance ({n} wells, {k} channels), using diagonal distance",
            batch.plate_id()
        );
        DistanceKind::Diagonal
    };
    let used_dims = match kind {
        DistanceKind::Mahalanobis => k,
        DistanceKind::Diagonal => (0..k).filter(|&i| cov[i][i] > 0.0).count(),
    };
    let distances = vectors
        .iter()
        .map(|v| {
            let v = v.as_ref()?;
            let centred: Vec<f64> = v.iter().zip(&mean).map(|(x, m)| x - m).collect();
            Some(match &factor {
                Some(l) => solve_lower(l, &centred).iter().map(|y| y * y).sum(),
                None => (0..k)
                    .filter(|&i| cov[i][i] > 0.0)
                    .map(|i| centred[i] * centred[i] / cov[i][i])
                    .sum(),
            })
        })
        .collect();
    OutlierScores {
        kind,
        dims: used_dims,
        distances,
    }
}

/// Record `edge_distance` and `is_outlier` on every well.
///
/// `alpha` is the per-well false-positive rate under a multivariate normal
/// null and must lie in `(0, 1)`.
pub fn annotate(batch: &PlateBatch, category: &str, alpha: f64) -> Result<PlateBatch> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::config("alpha", format!("must be in (0, 1), got {alpha}")));
    }
    let geometry = batch.geometry();
    let scores = outlier_scores(batch, category);
    let cutoff = if scores.dims > 0 {
        ChiSquared::new(scores.dims as f64)
            .map_err(|e| Error::config("alpha", e.to_string()))?
            .inverse_cdf(1.0 - alpha)
    } else {
        f64::INFINITY
    };
    let mut flagged = 0usize;
    let wells = batch
        .iter()
        .zip(&scores.distances)
        .map(|(well, d)| {
            let outlier = d.is_some_and(|d| d > cutoff);
            flagged += usize::from(outlier);
            well.clone()
                .with_metadata("edge_distance", well.location.edge_distance(geometry))
                .with_metadata("is_outlier", outlier)
        })
        .collect();
    log::debug!(
        "plate {}: {flagged} outliers of {} ({:?}, cutoff {cutoff:.3})",
        batch.plate_id(),
        batch.len(),
        scores.kind
    );
    Ok(batch.with_wells(wells))
}
