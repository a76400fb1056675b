use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

/// Failures of the dense factorizations behind the estimators and generators.
#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("Matrix '{label}' is not square: {rows}x{cols}")]
    NotSquare {
        label: String,
        rows: usize,
        cols: usize,
    },
    #[error("Matrix '{label}' contains non-finite entries")]
    NonFinite { label: String },
}

/// Run `f` on a faer view of `array`.
///
/// Positive-stride layouts are borrowed in place. Reversed or broadcast views
/// are first copied into standard layout, since faer kernels walk forward.
fn with_mat_ref<S, T, F>(array: &ArrayBase<S, Ix2>, f: F) -> T
where
    S: Data<Elem = f64>,
    F: for<'m> FnOnce(MatRef<'m, f64>) -> T,
{
    let (rows, cols) = array.dim();
    let strides = array.strides();
    if strides[0] > 0 && strides[1] > 0 {
        // SAFETY: shape and strides describe the live borrowed buffer.
        let view =
            unsafe { MatRef::from_raw_parts(array.as_ptr(), rows, cols, strides[0], strides[1]) };
        return f(view);
    }
    let compact = Mat::<f64>::from_fn(rows, cols, |i, j| array[[i, j]]);
    f(compact.as_ref())
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let column = diag.column_vector().as_mat();
    Array1::from_shape_fn(column.nrows(), |i| column[(i, 0)])
}

pub trait FaerEigh {
    /// Eigenvalues in ascending order with matching eigenvector columns.
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        with_mat_ref(self, |view| {
            let eigen = view
                .self_adjoint_eigen(side)
                .map_err(FaerLinalgError::SelfAdjointEigen)?;
            Ok((diag_to_array(eigen.S()), mat_to_array(eigen.U())))
        })
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    /// A⁻¹ B for the factored A.
    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut sol = Mat::<f64>::from_fn(rhs.nrows(), rhs.ncols(), |i, j| rhs[[i, j]]);
        self.factor.solve_in_place(sol.as_mut());
        mat_to_array(sol.as_ref())
    }

    /// Diagonal of the lower factor L.
    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.factor.L().diagonal())
    }

    pub fn lower_triangular(&self) -> Array2<f64> {
        mat_to_array(self.factor.L())
    }

    /// log det(A) = 2 Σ log L_ii.
    pub fn log_det(&self) -> f64 {
        2.0 * self.diag().iter().map(|v| v.ln()).sum::<f64>()
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        with_mat_ref(self, |view| {
            view.llt(side)
                .map(|factor| FaerCholeskyFactor { factor })
                .map_err(FaerLinalgError::Cholesky)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Axis, array, s};

    #[test]
    fn cholesky_reconstructs_spd_matrix() {
        let a = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let chol = a.cholesky(Side::Lower).expect("SPD matrix should factor");
        let l = chol.lower_triangular();
        let rebuilt = l.dot(&l.t());
        let max_err = (&rebuilt - &a)
            .iter()
            .fold(0.0f64, |acc, &x| acc.max(x.abs()));
        assert!(max_err < 1e-12, "reconstruction error too large: {max_err:e}");

        let inv = chol.solve_mat(&Array2::eye(3));
        let ident = a.dot(&inv);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((ident[[i, j]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            a.cholesky(Side::Lower),
            Err(FaerLinalgError::Cholesky(_))
        ));
    }

    #[test]
    fn log_det_matches_diagonal_product() {
        let a = array![[2.0, 0.0], [0.0, 8.0]];
        let chol = a.cholesky(Side::Lower).expect("diagonal SPD");
        assert!((chol.log_det() - 16.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn eigh_accepts_reversed_view() {
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let reversed = a.slice(s![..;-1, ..;-1]);
        let (values, vectors) = reversed.eigh(Side::Lower).expect("symmetric input");
        assert!((values[0] - 1.0).abs() < 1e-12);
        assert!((values[1] - 3.0).abs() < 1e-12);
        for col in vectors.axis_iter(Axis(1)) {
            let norm = col.dot(&col).sqrt();
            assert!((norm - 1.0).abs() < 1e-12);
        }
    }
}
