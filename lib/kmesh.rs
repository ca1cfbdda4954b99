//! Regular reciprocal-space sampling mesh, nearest-neighbor shell geometry,
//! finite-difference weights, and Brillouin-zone boundary phases.
//!
//! The mesh covers `[0, 1)` per axis in reduced coordinates (the redundant
//! periodic image is excluded); every mesh point is identified by a
//! row-major flat index so that all downstream algorithms are independent of
//! the number of periodic axes. Neighbor access across the zone boundary is
//! precomputed once into a wrapped-index map plus the per-orbital phase
//! `exp(-i 2π τ·G)` that keeps the cell-periodic gauge continuous,
//! `u(k + G) = u(k) exp(-i G·r)`.

use std::f64::consts::TAU;
use itertools::Itertools;
use log::warn;
use ndarray as nd;
use ndarray_linalg::SVD;
use num_complex::Complex64 as C64;
use num_traits::One;
use crate::{
    error::MeshError,
    lattice::Lattice,
    SHELL_ROUND_DP,
    WResult,
};

/// One group of neighbor offsets at equal distance from the origin.
#[derive(Clone, Debug)]
pub struct Shell {
    /// Integer offsets connecting a mesh index to its neighbors, `[nb, dim]`.
    pub idx: nd::Array2<i64>,
    /// Cartesian connecting vectors, `[nb, dim]`.
    pub bvecs: nd::Array2<f64>,
    /// Squared Cartesian length shared by the shell (rounded).
    pub dist2: f64,
}

impl Shell {
    /// Number of neighbor offsets in the shell.
    pub fn len(&self) -> usize { self.idx.nrows() }

    pub fn is_empty(&self) -> bool { self.idx.nrows() == 0 }
}

/// Regular mesh over the Brillouin zone.
#[derive(Clone, Debug)]
pub struct KMesh {
    nks: Vec<usize>,
    nk: usize,
    // [nk, dim]; integer mesh coordinates, row-major enumeration
    idx: nd::Array2<usize>,
    // [nk, dim]; reduced coordinates in [0, 1)
    flat: nd::Array2<f64>,
}

impl KMesh {
    /// Create a mesh from per-axis point counts.
    ///
    /// Every axis must hold at least 2 points; at least 3 are recommended
    /// for shell-1 finite differences.
    pub fn new(nks: &[usize]) -> Result<Self, MeshError> {
        MeshError::check_axes(nks, 2)?;
        let dim = nks.len();
        let nk: usize = nks.iter().product();
        let mut idx: nd::Array2<usize> = nd::Array2::zeros((nk, dim));
        let mut flat: nd::Array2<f64> = nd::Array2::zeros((nk, dim));
        let coords = nks.iter().map(|&n| 0..n).multi_cartesian_product();
        for (i, c) in coords.enumerate() {
            for (j, &cj) in c.iter().enumerate() {
                idx[[i, j]] = cj;
                flat[[i, j]] = cj as f64 / nks[j] as f64;
            }
        }
        Ok(Self { nks: nks.to_vec(), nk, idx, flat })
    }

    /// Number of periodic axes.
    pub fn dim(&self) -> usize { self.nks.len() }

    /// Total number of mesh points.
    pub fn nk(&self) -> usize { self.nk }

    /// Per-axis point counts.
    pub fn nks(&self) -> &[usize] { &self.nks }

    /// All mesh points in reduced coordinates, `[nk, dim]` (flat view).
    pub fn kpts(&self) -> nd::ArrayView2<f64> { self.flat.view() }

    /// Integer mesh coordinates, `[nk, dim]`.
    pub fn indices(&self) -> nd::ArrayView2<usize> { self.idx.view() }

    /// Reduced coordinates of one mesh point.
    pub fn kpt(&self, i: usize) -> nd::ArrayView1<f64> { self.flat.row(i) }

    /// Mesh points reshaped to the axis-shaped view `[n₁, …, n_D, dim]`.
    pub fn full(&self) -> nd::ArrayD<f64> {
        let mut shape = self.nks.clone();
        shape.push(self.dim());
        self.flat.clone().into_shape(shape).expect("consistent mesh shape")
    }

    /// Flat index of the mesh point with the given (wrapped) integer
    /// coordinates.
    pub(crate) fn flat_index(&self, coords: &[i64]) -> usize {
        let mut i = 0;
        for (j, &c) in coords.iter().enumerate() {
            let n = self.nks[j] as i64;
            i = i * self.nks[j] + c.rem_euclid(n) as usize;
        }
        i
    }

    /// Group neighbor offsets into `n_sh` shells of equal Cartesian
    /// distance.
    ///
    /// Candidate offsets run over `[-n_sh, n_sh]` per axis; squared
    /// distances are rounded to [`SHELL_ROUND_DP`] decimals before grouping
    /// so that floating noise cannot split a shell. Ties at equal rounded
    /// distance stay in the same shell.
    pub fn shells(&self, lattice: &Lattice, n_sh: usize)
        -> Result<Vec<Shell>, MeshError>
    {
        let min = if n_sh <= 1 { 2 } else { 2 * n_sh + 1 };
        MeshError::check_axes(&self.nks, min)?;
        let dim = self.dim();
        // mesh steps along each reciprocal axis
        let mut dk: nd::Array2<f64> = lattice.recip_vecs().to_owned();
        for (i, mut row) in dk.outer_iter_mut().enumerate() {
            row /= self.nks[i] as f64;
        }

        let span = -(n_sh as i64)..=n_sh as i64;
        let offsets: Vec<Vec<i64>> = (0..dim)
            .map(|_| span.clone())
            .multi_cartesian_product()
            .filter(|c| c.iter().any(|&x| x != 0))
            .collect();

        let round = 10.0_f64.powi(SHELL_ROUND_DP);
        let mut entries: Vec<(f64, Vec<i64>, nd::Array1<f64>)> = offsets
            .into_iter()
            .map(|c| {
                let b: nd::Array1<f64> = c.iter().enumerate()
                    .map(|(j, &cj)| cj as f64 * dk.row(j).to_owned())
                    .fold(nd::Array1::zeros(dim), |acc, v| acc + v);
                let d2 = (b.dot(&b) * round).round() / round;
                (d2, c, b)
            })
            .collect();
        entries.sort_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut shells: Vec<Shell> = Vec::with_capacity(n_sh);
        let mut group: Vec<(Vec<i64>, nd::Array1<f64>)> = Vec::new();
        let mut d2_cur = f64::NAN;
        for (d2, c, b) in entries {
            if shells.len() == n_sh { break; }
            if d2 != d2_cur && !group.is_empty() {
                shells.push(Self::close_shell(d2_cur, &group, dim));
                group.clear();
            }
            d2_cur = d2;
            group.push((c, b));
        }
        if shells.len() < n_sh && !group.is_empty() {
            shells.push(Self::close_shell(d2_cur, &group, dim));
        }
        if shells.len() < n_sh {
            return Err(MeshError::ShellCount {
                requested: n_sh,
                found: shells.len(),
            });
        }
        Ok(shells)
    }

    fn close_shell(
        d2: f64,
        group: &[(Vec<i64>, nd::Array1<f64>)],
        dim: usize,
    ) -> Shell {
        let nb = group.len();
        let mut idx: nd::Array2<i64> = nd::Array2::zeros((nb, dim));
        let mut bvecs: nd::Array2<f64> = nd::Array2::zeros((nb, dim));
        for (i, (c, b)) in group.iter().enumerate() {
            for j in 0..dim {
                idx[[i, j]] = c[j];
                bvecs[[i, j]] = b[j];
            }
        }
        Shell { idx, bvecs, dist2: d2 }
    }

    /// Solve for the per-shell finite-difference weights `w_s` satisfying
    /// `Σ_s w_s Σ_{b∊s} b_α b_β = δ_αβ` in the least-squares sense.
    ///
    /// The system couples the unique Cartesian component pairs (α ≤ β) to
    /// the identity tensor and is solved through the SVD pseudo-inverse. A
    /// completeness residual above `1e-8` is logged as a warning: center
    /// and spread formulas silently lose accuracy when the requested shell
    /// set cannot resolve every Cartesian direction of the lattice.
    pub fn fd_weights(&self, lattice: &Lattice, n_sh: usize)
        -> WResult<(nd::Array1<f64>, Vec<Shell>)>
    {
        let shells = self.shells(lattice, n_sh)?;
        let dim = self.dim();
        let pairs: Vec<Vec<usize>> =
            (0..dim).combinations_with_replacement(2).collect();
        let n_pairs = pairs.len();

        let mut A: nd::Array2<f64> = nd::Array2::zeros((n_pairs, n_sh));
        let mut q: nd::Array1<f64> = nd::Array1::zeros(n_pairs);
        for (j, pair) in pairs.iter().enumerate() {
            let (alpha, beta) = (pair[0], pair[1]);
            if alpha == beta { q[j] = 1.0; }
            for (s, shell) in shells.iter().enumerate() {
                A[[j, s]] = shell.bvecs.column(alpha)
                    .dot(&shell.bvecs.column(beta));
            }
        }

        let (u, s, vt) = A.svd(true, true)?;
        let u = u.expect("svd with u requested");
        let vt = vt.expect("svd with vt requested");
        let utq = u.t().dot(&q);
        let mut coef: nd::Array1<f64> = nd::Array1::zeros(s.len());
        for (i, &si) in s.iter().enumerate() {
            if si.abs() > f64::EPSILON { coef[i] = utq[i] / si; }
        }
        let w = vt.t().dot(&coef);

        let res = (A.dot(&w) - &q).iter()
            .fold(0.0_f64, |acc, r| acc.max(r.abs()));
        if res > 1e-8 {
            warn!(
                "kmesh::fd_weights: completeness residual {:.3e}; \
                {} shell(s) cannot resolve every Cartesian direction",
                res, n_sh,
            );
        }
        Ok((w, shells))
    }

    /// Build the shell-1 neighbor table consumed by overlap and projector
    /// construction: the finite-difference weight, the wrapped-neighbor
    /// index map, and the boundary-phase table.
    pub fn nbr_table(&self, lattice: &Lattice) -> WResult<NbrTable> {
        let (w, shells) = self.fd_weights(lattice, 1)?;
        let shell = shells.into_iter().next().expect("one shell requested");
        let nb = shell.len();
        let n_orb = lattice.n_orb();
        let dim = self.dim();

        let mut map: nd::Array2<usize> = nd::Array2::zeros((self.nk, nb));
        let mut phase: nd::Array3<C64> =
            nd::Array3::from_elem((self.nk, nb, n_orb), C64::one());
        let mut raw: Vec<i64> = vec![0; dim];
        for k in 0..self.nk {
            for b in 0..nb {
                let mut crossed = false;
                for j in 0..dim {
                    raw[j] = self.idx[[k, j]] as i64 + shell.idx[[b, j]];
                    let n = self.nks[j] as i64;
                    crossed |= raw[j] < 0 || raw[j] >= n;
                }
                map[[k, b]] = self.flat_index(&raw);
                if crossed {
                    // crossed reciprocal-lattice vector in reduced coords
                    for o in 0..n_orb {
                        let mut arg = 0.0;
                        for j in 0..dim {
                            let n = self.nks[j] as i64;
                            let g = (raw[j] - raw[j].rem_euclid(n)) / n;
                            arg -= TAU
                                * lattice.orbs()[[o, j]]
                                * g as f64;
                        }
                        phase[[k, b, o]] = C64::cis(arg);
                    }
                }
            }
        }
        Ok(NbrTable {
            offsets: shell.idx,
            bvecs: shell.bvecs,
            weight: w[0],
            map,
            phase,
        })
    }
}

/// Shell-1 neighbor geometry of a mesh: offsets, Cartesian connecting
/// vectors, the finite-difference weight, the wrapped-neighbor index map,
/// and the per-orbital boundary phases.
#[derive(Clone, Debug)]
pub struct NbrTable {
    // [nb, dim]
    offsets: nd::Array2<i64>,
    // [nb, dim]
    bvecs: nd::Array2<f64>,
    weight: f64,
    // [nk, nb]; wrapped flat index of k + b
    map: nd::Array2<usize>,
    // [nk, nb, n_orb]; identity away from the zone boundary
    phase: nd::Array3<C64>,
}

impl NbrTable {
    /// Number of shell-1 neighbors per mesh point.
    pub fn n_nbrs(&self) -> usize { self.offsets.nrows() }

    /// Integer neighbor offsets, `[nb, dim]`.
    pub fn offsets(&self) -> nd::ArrayView2<i64> { self.offsets.view() }

    /// Cartesian connecting vectors, `[nb, dim]`.
    pub fn bvecs(&self) -> nd::ArrayView2<f64> { self.bvecs.view() }

    /// Finite-difference weight of the shell.
    pub fn weight(&self) -> f64 { self.weight }

    /// Wrapped flat index of neighbor `b` of mesh point `k`.
    pub fn nbr_of(&self, k: usize, b: usize) -> usize { self.map[[k, b]] }

    /// Boundary-phase table, `[nk, nb, n_orb]`.
    pub fn phase(&self) -> nd::ArrayView3<C64> { self.phase.view() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;

    fn square_lattice() -> Lattice {
        Lattice::new(
            nd::array![[1.0, 0.0], [0.0, 1.0]],
            nd::array![[0.0, 0.0], [0.5, 0.5]],
        ).unwrap()
    }

    fn chain_lattice() -> Lattice {
        Lattice::new(nd::array![[1.0]], nd::array![[0.0], [0.3]]).unwrap()
    }

    #[test]
    fn mesh_is_half_open_and_row_major() {
        let mesh = KMesh::new(&[4, 2]).unwrap();
        assert_eq!(mesh.nk(), 8);
        assert!(mesh.kpts().iter().all(|&k| (0.0..1.0).contains(&k)));
        // row-major: second axis varies fastest
        assert_eq!(mesh.indices().row(1).to_vec(), vec![0, 1]);
        assert_eq!(mesh.indices().row(2).to_vec(), vec![1, 0]);
        assert!((mesh.kpt(2)[0] - 0.25).abs() < 1e-14);
        // axis-shaped and flat views cover the same points
        let full = mesh.full();
        assert_eq!(full.shape(), &[4, 2, 2]);
        assert!((full[[1, 1, 0]] - 0.25).abs() < 1e-14);
        assert!((full[[1, 1, 1]] - 0.5).abs() < 1e-14);
    }

    #[test]
    fn rejects_single_point_axis() {
        assert!(matches!(
            KMesh::new(&[4, 1]),
            Err(MeshError::TooFew { axis: 1, len: 1, min: 2 }),
        ));
    }

    #[test]
    fn first_shell_of_square_mesh() {
        let mesh = KMesh::new(&[4, 4]).unwrap();
        let shells = mesh.shells(&square_lattice(), 1).unwrap();
        assert_eq!(shells.len(), 1);
        assert_eq!(shells[0].len(), 4);
        let step = TAU / 4.0;
        for b in shells[0].bvecs.outer_iter() {
            assert!((b.dot(&b) - step * step).abs() < 1e-10);
        }
    }

    #[test]
    fn weights_satisfy_completeness() {
        for (nks, lattice) in [
            (vec![8_usize], chain_lattice()),
            (vec![4, 4], square_lattice()),
        ] {
            let mesh = KMesh::new(&nks).unwrap();
            let (w, shells) = mesh.fd_weights(&lattice, 1).unwrap();
            let dim = mesh.dim();
            for alpha in 0..dim {
                for beta in 0..dim {
                    let sum: f64 = shells.iter().zip(w.iter())
                        .map(|(sh, &ws)| {
                            ws * sh.bvecs.column(alpha)
                                .dot(&sh.bvecs.column(beta))
                        })
                        .sum();
                    let expected = if alpha == beta { 1.0 } else { 0.0 };
                    assert!(
                        (sum - expected).abs() < 1e-8,
                        "completeness violated at ({}, {}): {}",
                        alpha, beta, sum,
                    );
                }
            }
        }
    }

    #[test]
    fn boundary_phase_is_identity_off_boundary_and_unimodular() {
        let mesh = KMesh::new(&[4]).unwrap();
        let lattice = chain_lattice();
        let nbr = mesh.nbr_table(&lattice).unwrap();
        for k in 0..mesh.nk() {
            for b in 0..nbr.n_nbrs() {
                let raw = mesh.indices()[[k, 0]] as i64 + nbr.offsets()[[b, 0]];
                let crossed = raw < 0 || raw >= 4;
                for o in 0..lattice.n_orb() {
                    let ph = nbr.phase()[[k, b, o]];
                    assert!((ph.norm() - 1.0).abs() < 1e-14);
                    if !crossed {
                        assert!((ph - C64::new(1.0, 0.0)).norm() < 1e-14);
                    }
                }
            }
        }
        // crossing k = 3 by +1 wraps through G = +1
        let b_up = (0..nbr.n_nbrs())
            .find(|&b| nbr.offsets()[[b, 0]] == 1)
            .unwrap();
        assert_eq!(nbr.nbr_of(3, b_up), 0);
        let expected = C64::cis(-TAU * 0.3);
        assert!((nbr.phase()[[3, b_up, 1]] - expected).norm() < 1e-14);
    }

    #[test]
    fn neighbor_map_wraps() {
        let mesh = KMesh::new(&[3, 3]).unwrap();
        let lattice = square_lattice();
        let nbr = mesh.nbr_table(&lattice).unwrap();
        for k in 0..mesh.nk() {
            for b in 0..nbr.n_nbrs() {
                let mut coords = [0_i64; 2];
                for j in 0..2 {
                    coords[j] = mesh.indices()[[k, j]] as i64
                        + nbr.offsets()[[b, j]];
                }
                assert_eq!(nbr.nbr_of(k, b), mesh.flat_index(&coords));
            }
        }
    }
}
