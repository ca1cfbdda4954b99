//! Static real-space geometry: primitive lattice vectors, their reciprocal
//! counterparts, and orbital positions.

use std::f64::consts::TAU;
use ndarray as nd;
use ndarray_linalg::Inverse;
use crate::error::LatticeError;

/// Immutable lattice geometry.
///
/// Rows of the lattice matrix are the real-space primitive vectors; rows of
/// the reciprocal matrix are the reciprocal vectors, normalized so that
/// `lat · recipᵗ = 2π · I`. Orbital positions are stored in reduced
/// (fractional) coordinates and never change after construction.
#[derive(Clone, Debug)]
pub struct Lattice {
    // [dim, dim]; rows are primitive vectors
    lat: nd::Array2<f64>,
    // [dim, dim]; rows are reciprocal vectors
    recip: nd::Array2<f64>,
    // [n_orb, dim]; reduced coordinates
    orbs: nd::Array2<f64>,
}

impl Lattice {
    /// Create a new `Lattice` from a square matrix of row-wise primitive
    /// vectors and a matrix of row-wise reduced orbital positions.
    pub fn new(lat: nd::Array2<f64>, orbs: nd::Array2<f64>)
        -> Result<Self, LatticeError>
    {
        let (r, c) = lat.dim();
        if r != c { return Err(LatticeError::NotSquare(r, c)); }
        if orbs.ncols() != r {
            return Err(
                LatticeError::OrbDim { expected: r, got: orbs.ncols() });
        }
        let recip = lat.inv()?.t().mapv(|a| TAU * a);
        Ok(Self { lat, recip, orbs })
    }

    /// Number of periodic dimensions.
    pub fn dim(&self) -> usize { self.lat.nrows() }

    /// Number of orbitals in the home cell.
    pub fn n_orb(&self) -> usize { self.orbs.nrows() }

    /// Real-space primitive vectors (rows).
    pub fn lat_vecs(&self) -> nd::ArrayView2<f64> { self.lat.view() }

    /// Reciprocal lattice vectors (rows).
    pub fn recip_vecs(&self) -> nd::ArrayView2<f64> { self.recip.view() }

    /// Orbital positions in reduced coordinates.
    pub fn orbs(&self) -> nd::ArrayView2<f64> { self.orbs.view() }

    /// Orbital positions in Cartesian coordinates.
    pub fn orbs_cart(&self) -> nd::Array2<f64> { self.orbs.dot(&self.lat) }

    /// Convert a reduced position to Cartesian coordinates.
    pub fn to_cart(&self, red: nd::ArrayView1<f64>) -> nd::Array1<f64> {
        red.dot(&self.lat)
    }

    /// Convert a reduced k-point to Cartesian reciprocal coordinates.
    pub fn k_to_cart(&self, k_red: nd::ArrayView1<f64>) -> nd::Array1<f64> {
        k_red.dot(&self.recip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;

    #[test]
    fn reciprocal_duality() {
        let lat = nd::array![[1.0, 0.1], [0.0, 1.2]];
        let orbs = nd::array![[0.0, 0.0], [0.5, 0.5]];
        let lattice = Lattice::new(lat.clone(), orbs).unwrap();
        let prod = lat.dot(&lattice.recip_vecs().t());
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { TAU } else { 0.0 };
                assert!((prod[[i, j]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn cartesian_orbitals() {
        let lat = nd::array![[2.0, 0.0], [0.0, 3.0]];
        let orbs = nd::array![[0.5, 0.5]];
        let lattice = Lattice::new(lat, orbs).unwrap();
        let cart = lattice.orbs_cart();
        assert!((cart[[0, 0]] - 1.0).abs() < 1e-14);
        assert!((cart[[0, 1]] - 1.5).abs() < 1e-14);
    }

    #[test]
    fn rejects_mismatched_orbitals() {
        let lat = nd::array![[1.0, 0.0], [0.0, 1.0]];
        let orbs = nd::array![[0.0, 0.0, 0.0]];
        assert!(matches!(
            Lattice::new(lat, orbs),
            Err(LatticeError::OrbDim { expected: 2, got: 3 }),
        ));
    }
}
