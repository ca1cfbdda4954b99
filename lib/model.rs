//! Interface to the external tight-binding model collaborator.
//!
//! The Wannierization engine never constructs Hamiltonians itself; it only
//! needs the geometry of the model and a way to evaluate and diagonalize its
//! Bloch Hamiltonian at arbitrary k-points.

use ndarray as nd;
use ndarray_linalg::{ self as la, EighInto, error::LinalgError };
use num_complex::Complex64 as C64;

/// A periodic tight-binding model sampled in reciprocal space.
///
/// Implementors expose the lattice geometry and a Bloch-Hamiltonian
/// generator; the provided [`solve_kpt`][Self::solve_kpt] diagonalizer
/// suffices for any Hermitian model. Eigenvectors are returned with one
/// state per row (`[band, orbital]`), ordered by ascending eigenvalue, in
/// the cell-periodic gauge (no `exp(i k·τ)` orbital phases).
///
/// The Hamiltonian must be built in the atomic gauge, carrying the
/// orbital-position phases,
/// `H_mn(k) = Σ_R t_mn(R) exp(i 2π k·(R + τ_n - τ_m))`, so that its
/// eigenvectors satisfy the periodic-gauge condition
/// `u(k + G) = u(k)·exp(-i 2π τ·G)` assumed by the boundary-phase table.
pub trait TightBinding {
    /// Number of periodic dimensions.
    fn dim(&self) -> usize;

    /// Number of orbitals in the home cell.
    fn n_orb(&self) -> usize;

    /// Real-space primitive vectors (rows).
    fn lat_vecs(&self) -> nd::Array2<f64>;

    /// Orbital positions in reduced coordinates (rows).
    fn orb_positions(&self) -> nd::Array2<f64>;

    /// Bloch Hamiltonian at a reduced k-point, `[n_orb, n_orb]`, Hermitian.
    fn hamiltonian(&self, kpt: nd::ArrayView1<f64>) -> nd::Array2<C64>;

    /// Diagonalize the Bloch Hamiltonian at a reduced k-point, returning
    /// eigenvalues and row-wise eigenstates.
    fn solve_kpt(&self, kpt: nd::ArrayView1<f64>)
        -> Result<(nd::Array1<f64>, nd::Array2<C64>), LinalgError>
    {
        let (evals, evecs) =
            self.hamiltonian(kpt).eigh_into(la::UPLO::Lower)?;
        Ok((evals, evecs.t().to_owned()))
    }
}

impl<M: TightBinding + ?Sized> TightBinding for &M {
    fn dim(&self) -> usize { (**self).dim() }
    fn n_orb(&self) -> usize { (**self).n_orb() }
    fn lat_vecs(&self) -> nd::Array2<f64> { (**self).lat_vecs() }
    fn orb_positions(&self) -> nd::Array2<f64> { (**self).orb_positions() }
    fn hamiltonian(&self, kpt: nd::ArrayView1<f64>) -> nd::Array2<C64> {
        (**self).hamiltonian(kpt)
    }
    fn solve_kpt(&self, kpt: nd::ArrayView1<f64>)
        -> Result<(nd::Array1<f64>, nd::Array2<C64>), LinalgError>
    {
        (**self).solve_kpt(kpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;
    use num_complex::Complex64 as C64;

    // two decoupled orbitals with onsite energies ∓1
    struct Atomic;

    impl TightBinding for Atomic {
        fn dim(&self) -> usize { 1 }
        fn n_orb(&self) -> usize { 2 }
        fn lat_vecs(&self) -> nd::Array2<f64> { nd::array![[1.0]] }
        fn orb_positions(&self) -> nd::Array2<f64> {
            nd::array![[0.0], [0.5]]
        }
        fn hamiltonian(&self, _kpt: nd::ArrayView1<f64>) -> nd::Array2<C64> {
            nd::array![
                [C64::new(-1.0, 0.0), C64::new(0.0, 0.0)],
                [C64::new(0.0, 0.0), C64::new(1.0, 0.0)],
            ]
        }
    }

    #[test]
    fn default_solver_orders_states_by_energy() {
        let k = nd::array![0.25];
        let (evals, evecs) = Atomic.solve_kpt(k.view()).unwrap();
        assert!((evals[0] + 1.0).abs() < 1e-14);
        assert!((evals[1] - 1.0).abs() < 1e-14);
        // rows are states
        assert!((evecs[[0, 0]].norm() - 1.0).abs() < 1e-14);
        assert!((evecs[[1, 1]].norm() - 1.0).abs() < 1e-14);
    }
}
