//! Lattice basis representation and reduction.

use nalgebra::{Matrix3, Vector3};

/// A 3D lattice described by a 3×3 basis whose columns are the three
/// generating vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
    basis: Matrix3<f64>,
}

impl Lattice {
    /// Creates a lattice from a basis matrix (columns are basis vectors).
    #[must_use]
    pub fn new(basis: Matrix3<f64>) -> Self {
        Self { basis }
    }

    /// Creates a lattice from three basis vectors.
    #[must_use]
    pub fn from_vectors(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Self {
        Self {
            basis: Matrix3::from_columns(&[*a, *b, *c]),
        }
    }

    /// Returns the basis matrix.
    #[must_use]
    pub fn basis(&self) -> &Matrix3<f64> {
        &self.basis
    }

    /// Returns the determinant of the basis (signed unit-cell volume).
    #[must_use]
    pub fn det(&self) -> f64 {
        self.basis.determinant()
    }

    /// Returns the norms of the three basis vectors.
    #[must_use]
    pub fn basis_vector_norms(&self) -> Vector3<f64> {
        Vector3::new(
            self.basis.column(0).norm(),
            self.basis.column(1).norm(),
            self.basis.column(2).norm(),
        )
    }

    /// Returns the pairwise angles between basis vectors in radians as
    /// (alpha, beta, gamma) = (∠bc, ∠ac, ∠ab).
    #[must_use]
    pub fn basis_vector_angles_rad(&self) -> Vector3<f64> {
        let a = self.basis.column(0);
        let b = self.basis.column(1);
        let c = self.basis.column(2);
        Vector3::new(
            b.angle(&c.into_owned()),
            a.angle(&c.into_owned()),
            a.angle(&b.into_owned()),
        )
    }

    /// Returns the reciprocal lattice (inverse-transpose basis).
    ///
    /// Returns `None` if the basis is singular.
    #[must_use]
    pub fn reciprocal(&self) -> Option<Self> {
        self.basis
            .try_inverse()
            .map(|inv| Self { basis: inv.transpose() })
    }

    /// Reduces the basis to an equivalent one with shorter, more
    /// orthogonal vectors, columns sorted by ascending norm.
    ///
    /// Idempotent: reducing an already reduced basis leaves it unchanged.
    /// |det| is preserved (all operations are unimodular up to column
    /// permutation). Near-zero-norm columns are left untouched.
    pub fn minimize(&mut self) -> &mut Self {
        const MAX_SWEEPS: usize = 64;
        // Relative tolerance: only apply a reduction that strictly
        // shortens the vector, otherwise rounding ties cycle forever.
        const SHRINK_TOLERANCE: f64 = 1.0 - 1e-12;

        for _ in 0..MAX_SWEEPS {
            self.sort_columns_by_norm();
            let mut changed = false;
            for j in 0..3 {
                for i in 0..3 {
                    if i == j {
                        continue;
                    }
                    let bi = self.basis.column(i).into_owned();
                    let bj = self.basis.column(j).into_owned();
                    let norm_sq_i = bi.norm_squared();
                    if norm_sq_i <= f64::MIN_POSITIVE {
                        continue;
                    }
                    let m = (bj.dot(&bi) / norm_sq_i).round();
                    if m == 0.0 {
                        continue;
                    }
                    let reduced = bj - m * bi;
                    if reduced.norm_squared() < bj.norm_squared() * SHRINK_TOLERANCE {
                        self.basis.set_column(j, &reduced);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        self.sort_columns_by_norm();
        self
    }

    fn sort_columns_by_norm(&mut self) {
        let mut columns: [Vector3<f64>; 3] = [
            self.basis.column(0).into_owned(),
            self.basis.column(1).into_owned(),
            self.basis.column(2).into_owned(),
        ];
        columns.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));
        self.basis = Matrix3::from_columns(&columns);
    }
}
