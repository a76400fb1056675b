use crate::error::BenchError;
use crate::linalg::utils::KahanSum;
use crate::roc::RocCurve;

/// Trapezoidal area under tpr(fpr), taken in curve order.
///
/// The points are not sorted by fpr first, so a curve whose fpr moves back
/// and forth can give a negative area or one above 1. A curve whose fpr never
/// changes has area 0.
pub fn trapezoid_auc(curve: &RocCurve) -> Result<f64, BenchError> {
    let pairs: Vec<(f64, f64)> = curve.fpr_tpr().collect();
    trapezoid_auc_pairs(&pairs)
}

/// Same rule over raw (fpr, tpr) pairs.
pub fn trapezoid_auc_pairs(pairs: &[(f64, f64)]) -> Result<f64, BenchError> {
    if pairs.len() < 2 {
        return Err(BenchError::InsufficientPoints {
            available: pairs.len(),
        });
    }
    let mut area = KahanSum::default();
    for w in pairs.windows(2) {
        let (x0, y0) = w[0];
        let (x1, y1) = w[1];
        area.add(0.5 * (x1 - x0) * (y0 + y1));
    }
    Ok(area.sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_is_one_half() {
        assert_eq!(trapezoid_auc_pairs(&[(0.0, 0.0), (1.0, 1.0)]).unwrap(), 0.5);
    }

    #[test]
    fn perfect_separation_is_one() {
        let auc = trapezoid_auc_pairs(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]).unwrap();
        assert_eq!(auc, 1.0);
    }

    #[test]
    fn constant_curve_is_zero() {
        let auc = trapezoid_auc_pairs(&[(0.0, 1.0); 5]).unwrap();
        assert_eq!(auc, 0.0);
    }

    #[test]
    fn order_is_not_normalized() {
        // Descending fpr integrates to a negative area.
        let auc = trapezoid_auc_pairs(&[(1.0, 1.0), (0.0, 0.0)]).unwrap();
        assert_eq!(auc, -0.5);
        let forward = trapezoid_auc_pairs(&[(0.0, 0.0), (0.5, 1.0), (0.25, 1.0), (1.0, 1.0)])
            .unwrap();
        assert!((forward - 0.75).abs() < 1e-12);
    }

    #[test]
    fn fewer_than_two_points_is_an_error() {
        assert!(matches!(
            trapezoid_auc_pairs(&[]),
            Err(BenchError::InsufficientPoints { available: 0 })
        ));
        assert!(matches!(
            trapezoid_auc_pairs(&[(0.2, 0.4)]),
            Err(BenchError::InsufficientPoints { available: 1 })
        ));
        assert!(matches!(
            trapezoid_auc(&RocCurve::default()),
            Err(BenchError::InsufficientPoints { available: 0 })
        ));
    }
}
