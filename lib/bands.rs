//! Band-structure interpolation along a reciprocal-space path from the
//! rotated, real-space-truncated Hamiltonian of a Wannier set.

use std::f64::consts::TAU;
use ndarray::{ self as nd, s };
use ndarray_linalg::{ self as la, EigValsh, Inverse };
use num_complex::Complex64 as C64;
use crate::{
    error::MeshError,
    kmesh::KMesh,
    lattice::Lattice,
    WResult,
};

/// A sampled path through reciprocal space.
#[derive(Clone, Debug)]
pub struct KPath {
    /// Sampled k-points in reduced coordinates, `[nk, dim]`.
    pub kpts: nd::Array2<f64>,
    /// Cumulative path length at each sample, `[nk]`.
    pub dist: nd::Array1<f64>,
    /// Cumulative path length at each node, `[n_nodes]`.
    pub nodes: nd::Array1<f64>,
}

/// Sample a path through the given high-symmetry nodes (reduced
/// coordinates, one node per row) with `nk` points total, spaced uniformly
/// in the reduced-coordinate metric `(A·Aᵗ)⁻¹`.
pub fn k_path(lattice: &Lattice, nodes: nd::ArrayView2<f64>, nk: usize)
    -> WResult<KPath>
{
    let n_node = nodes.nrows();
    let dim = lattice.dim();
    if nodes.ncols() != dim {
        return Err(MeshError::PathDim {
            expected: dim,
            got: nodes.ncols(),
        }.into());
    }
    if n_node < 2 || nk < n_node {
        return Err(MeshError::PathPoints {
            nodes: n_node,
            min: n_node.max(2),
            got: nk,
        }.into());
    }

    let lat = lattice.lat_vecs();
    let k_metric = lat.dot(&lat.t()).inv()?;
    let mut node_dist: nd::Array1<f64> = nd::Array1::zeros(n_node);
    for n in 1..n_node {
        let dk = &nodes.row(n) - &nodes.row(n - 1);
        let len = dk.dot(&k_metric.dot(&dk)).sqrt();
        node_dist[n] = node_dist[n - 1] + len;
    }

    let total = node_dist[n_node - 1];
    let mut node_index: Vec<usize> = vec![0];
    for n in 1..n_node - 1 {
        let frac = node_dist[n] / total;
        node_index.push((frac * (nk - 1) as f64).round() as usize);
    }
    node_index.push(nk - 1);

    let mut dist: nd::Array1<f64> = nd::Array1::zeros(nk);
    let mut kpts: nd::Array2<f64> = nd::Array2::zeros((nk, dim));
    kpts.row_mut(0).assign(&nodes.row(0));
    for n in 1..n_node {
        let (i0, i1) = (node_index[n - 1], node_index[n]);
        let (d0, d1) = (node_dist[n - 1], node_dist[n]);
        for j in i0..=i1 {
            let frac = (j - i0) as f64 / (i1 - i0) as f64;
            dist[j] = d0 + frac * (d1 - d0);
            let kj: nd::Array1<f64> = nodes.row(n - 1).iter()
                .zip(nodes.row(n))
                .map(|(&a, &b)| (1.0 - frac) * a + frac * b)
                .collect();
            kpts.row_mut(j).assign(&kj);
        }
    }
    Ok(KPath { kpts, dist, nodes: node_dist })
}

/// Interpolate the band structure of a Wannier set along a path.
///
/// The Hamiltonian is rotated into the working subspace,
/// `H̃(k) = ũ*(k)·H(k)·ũᵗ(k)`, Fourier transformed to real space on the
/// centered residue set of the mesh (truncating hoppings beyond half the
/// supercell), and re-summed at each path point; eigenvalues come out in
/// ascending order, `[nk_path, n_wann]`.
pub fn interpolate(
    mesh: &KMesh,
    tilde_u: nd::ArrayView3<C64>,
    hamk: nd::ArrayView3<C64>,
    path: &KPath,
) -> WResult<nd::Array2<f64>> {
    let nk = mesh.nk();
    let dim = mesh.dim();
    let n_wann = tilde_u.dim().1;

    // centered lattice vectors attached to each mesh index
    let mut rvecs: nd::Array2<f64> = nd::Array2::zeros((nk, dim));
    for i in 0..nk {
        for j in 0..dim {
            let n = mesh.nks()[j];
            let c = mesh.indices()[[i, j]];
            rvecs[[i, j]] =
                if c <= n / 2 { c as f64 } else { c as f64 - n as f64 };
        }
    }

    // H(R) = (1/Nk) Σ_k exp(-i 2π k·R) ũ*(k)·H(k)·ũᵗ(k)
    let mut ham_r: nd::Array3<C64> =
        nd::Array3::zeros((nk, n_wann, n_wann));
    for k in 0..nk {
        let uk = tilde_u.index_axis(nd::Axis(0), k);
        let hk = hamk.index_axis(nd::Axis(0), k);
        let htil = uk.mapv(|z| z.conj()).dot(&hk).dot(&uk.t());
        for (i, rv) in rvecs.outer_iter().enumerate() {
            let ph = C64::cis(-TAU * mesh.kpt(k).dot(&rv)) / nk as f64;
            let mut dst = ham_r.index_axis_mut(nd::Axis(0), i);
            dst.scaled_add(ph, &htil);
        }
    }

    let nk_path = path.kpts.nrows();
    let mut bands: nd::Array2<f64> = nd::Array2::zeros((nk_path, n_wann));
    for (p, kp) in path.kpts.outer_iter().enumerate() {
        let mut hk: nd::Array2<C64> = nd::Array2::zeros((n_wann, n_wann));
        for (i, rv) in rvecs.outer_iter().enumerate() {
            let ph = C64::cis(TAU * kp.dot(&rv));
            hk.scaled_add(ph, &ham_r.index_axis(nd::Axis(0), i));
        }
        let evals = hk.eigvalsh(la::UPLO::Lower)?;
        bands.slice_mut(s![p, ..]).assign(&evals);
    }
    Ok(bands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;

    fn square_lattice() -> Lattice {
        Lattice::new(
            nd::array![[1.0, 0.0], [0.0, 1.0]],
            nd::array![[0.0, 0.0]],
        ).unwrap()
    }

    #[test]
    fn path_hits_nodes_and_is_monotonic() {
        let lattice = square_lattice();
        let nodes = nd::array![[0.0, 0.0], [0.5, 0.0], [0.5, 0.5]];
        let path = k_path(&lattice, nodes.view(), 21).unwrap();
        assert_eq!(path.kpts.nrows(), 21);
        assert!((&path.kpts.row(0) - &nodes.row(0)).iter()
            .all(|d| d.abs() < 1e-14));
        assert!((&path.kpts.row(20) - &nodes.row(2)).iter()
            .all(|d| d.abs() < 1e-14));
        for i in 1..21 {
            assert!(path.dist[i] > path.dist[i - 1] - 1e-14);
        }
        assert_eq!(path.nodes.len(), 3);
        assert!((path.nodes[2] - path.dist[20]).abs() < 1e-12);
    }

    #[test]
    fn path_validation() {
        let lattice = square_lattice();
        let nodes = nd::array![[0.0, 0.0], [0.5, 0.0]];
        assert!(matches!(
            k_path(&lattice, nodes.view(), 1),
            Err(crate::WannierError::Mesh(MeshError::PathPoints { .. })),
        ));
        let bad = nd::array![[0.0], [0.5]];
        assert!(matches!(
            k_path(&lattice, bad.view(), 10),
            Err(crate::WannierError::Mesh(MeshError::PathDim { .. })),
        ));
    }
}
