//! Quadratic-spread functional of a Wannier set: centers, ⟨r²⟩, and the
//! decomposition Ω = Ω_I + Ω̃ into gauge-invariant and gauge-dependent
//! parts.
//!
//! The reciprocal-space finite-difference expressions (diagonal phases and
//! magnitudes of the nearest-neighbor overlap matrix) are the operational
//! forms driving both minimizers; the real-space summation over a centered
//! supercell of Wannier amplitudes is an independent, slower cross-check
//! and is specialized to 2-D meshes.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::WannierError,
    lattice::Lattice,
    WResult,
};

/// Spread decomposition of one Wannier set.
#[derive(Clone, Debug)]
pub struct Spread {
    /// Per-function quadratic spread Ω_n.
    pub spread_n: nd::Array1<f64>,
    /// Gauge-invariant part Ω_I.
    pub omega_i: f64,
    /// Gauge-dependent part Ω̃.
    pub omega_til: f64,
    /// Per-function center ⟨r⟩_n in Cartesian coordinates, `[n, dim]`.
    pub centers: nd::Array2<f64>,
    /// Per-function ⟨r²⟩_n.
    pub rsq: nd::Array1<f64>,
}

impl Spread {
    /// Total spread Ω = Σ_n Ω_n.
    pub fn omega(&self) -> f64 { self.spread_n.sum() }
}

/// Wannier centers from the diagonal overlap phases,
/// `r_n = -(w/Nk) Σ_{k,b} Im ln M_nn(k, b) · b`.
pub fn centers(M: nd::ArrayView4<C64>, w: f64, bvecs: nd::ArrayView2<f64>)
    -> nd::Array2<f64>
{
    let (nk, nb, ns, _) = M.dim();
    let dim = bvecs.ncols();
    let scale = w / nk as f64;
    let mut r: nd::Array2<f64> = nd::Array2::zeros((ns, dim));
    for k in 0..nk {
        for b in 0..nb {
            for n in 0..ns {
                let phase = M[[k, b, n, n]].arg();
                for a in 0..dim {
                    r[[n, a]] -= scale * phase * bvecs[[b, a]];
                }
            }
        }
    }
    r
}

/// Gauge-invariant spread
/// `Ω_I = w·n_states·nb - (w/Nk) Σ_{k,b} Σ_{mn} |M_mn|²`.
pub fn omega_i(M: nd::ArrayView4<C64>, w: f64) -> f64 {
    let (nk, nb, ns, _) = M.dim();
    let abs2: f64 = M.iter().map(|z| z.norm_sqr()).sum();
    w * (ns * nb) as f64 - w / nk as f64 * abs2
}

/// Gauge-dependent spread
/// `Ω̃ = (w/Nk) [Σ_{k,b,n} (-Im ln M_nn - b·r_n)² + Σ|M|² - Σ|M_nn|²]`.
pub fn omega_til(M: nd::ArrayView4<C64>, w: f64, bvecs: nd::ArrayView2<f64>)
    -> f64
{
    let (nk, nb, ns, _) = M.dim();
    let dim = bvecs.ncols();
    let r = centers(M, w, bvecs);
    let mut quad = 0.0;
    let mut abs_diag2 = 0.0;
    for k in 0..nk {
        for b in 0..nb {
            for n in 0..ns {
                let d = M[[k, b, n, n]];
                let mut bd = 0.0;
                for a in 0..dim { bd += bvecs[[b, a]] * r[[n, a]]; }
                quad += (-d.arg() - bd).powi(2);
                abs_diag2 += d.norm_sqr();
            }
        }
    }
    let abs2: f64 = M.iter().map(|z| z.norm_sqr()).sum();
    w / nk as f64 * (quad + abs2 - abs_diag2)
}

/// Full reciprocal-space spread decomposition of an overlap matrix.
pub fn spread_recip(
    M: nd::ArrayView4<C64>,
    w: f64,
    bvecs: nd::ArrayView2<f64>,
) -> Spread {
    let (nk, nb, ns, _) = M.dim();
    let scale = w / nk as f64;
    let r = centers(M, w, bvecs);
    let mut rsq: nd::Array1<f64> = nd::Array1::zeros(ns);
    for k in 0..nk {
        for b in 0..nb {
            for n in 0..ns {
                let d = M[[k, b, n, n]];
                rsq[n] += scale * (1.0 - d.norm_sqr() + d.arg().powi(2));
            }
        }
    }
    let spread_n: nd::Array1<f64> = (0..ns)
        .map(|n| rsq[n] - r.row(n).dot(&r.row(n)))
        .collect();
    Spread {
        spread_n,
        omega_i: omega_i(M, w),
        omega_til: omega_til(M, w, bvecs),
        centers: r,
        rsq,
    }
}

/// Real-space spread of a 2-D Wannier set, summed directly over a centered
/// supercell of amplitudes.
///
/// `wfs` is indexed `[n₁, n₂, wannier, orbital]`, home cell at index
/// `(0, 0)`, as produced by the mesh-axis inverse DFT. On a converged set
/// this must agree with [`spread_recip`] to numerical tolerance.
pub fn spread_real(wfs: nd::ArrayViewD<C64>, lattice: &Lattice)
    -> WResult<Spread>
{
    if wfs.ndim() != 4 {
        return Err(WannierError::RealSpaceDim(wfs.ndim() - 2));
    }
    let wfs = wfs.into_dimensionality::<nd::Ix4>()
        .expect("checked dimensionality");
    let (nx, ny, n_wf, n_orb) = wfs.dim();
    let orbs = lattice.orbs();
    let lat = lattice.lat_vecs();

    // centered complete residue set per axis
    let lo_x = -((nx as i64 + 1) / 2);
    let lo_y = -((ny as i64 + 1) / 2);
    let cells: Vec<(i64, i64)> = (lo_x..lo_x + nx as i64)
        .flat_map(|tx| (lo_y..lo_y + ny as i64).map(move |ty| (tx, ty)))
        .collect();
    let home = cells.iter().position(|&t| t == (0, 0)).expect("home cell");
    let wrap = |t: i64, n: usize| t.rem_euclid(n as i64) as usize;

    let mut r_n: nd::Array2<f64> = nd::Array2::zeros((n_wf, 2));
    let mut rsq: nd::Array1<f64> = nd::Array1::zeros(n_wf);
    // R_nm[axis, n, m, translation] = Σ_r w_n(r) conj(w_m(r - R)) r_axis
    let mut R_nm: nd::Array4<C64> =
        nd::Array4::zeros((2, n_wf, n_wf, cells.len()));

    for n in 0..n_wf {
        for &(tx, ty) in cells.iter() {
            let (ix, iy) = (wrap(tx, nx), wrap(ty, ny));
            for i in 0..n_orb {
                let pos_x = (orbs[[i, 0]] + tx as f64) * lat[[0, 0]]
                    + (orbs[[i, 1]] + ty as f64) * lat[[1, 0]];
                let pos_y = (orbs[[i, 0]] + tx as f64) * lat[[0, 1]]
                    + (orbs[[i, 1]] + ty as f64) * lat[[1, 1]];
                let w0n = wfs[[ix, iy, n, i]];
                let wt = w0n.norm_sqr();
                r_n[[n, 0]] += wt * pos_x;
                r_n[[n, 1]] += wt * pos_y;
                rsq[n] += (pos_x * pos_x + pos_y * pos_y) * wt;
                for m in 0..n_wf {
                    for (j, &(dx, dy)) in cells.iter().enumerate() {
                        let wrm = wfs[[
                            wrap(tx + dx, nx),
                            wrap(ty + dy, ny),
                            m,
                            i,
                        ]];
                        let prod = w0n * wrm.conj();
                        R_nm[[0, n, m, j]] += prod * pos_x;
                        R_nm[[1, n, m, j]] += prod * pos_y;
                    }
                }
            }
        }
    }

    let sigma2: f64 = R_nm.iter().map(|z| z.norm_sqr()).sum();
    let mut diag2 = 0.0;
    for a in 0..2 {
        for n in 0..n_wf {
            diag2 += R_nm[[a, n, n, home]].norm_sqr();
        }
    }
    let omega_i = rsq.sum() - sigma2;
    let omega_til = sigma2 - diag2;
    let spread_n: nd::Array1<f64> = (0..n_wf)
        .map(|n| rsq[n] - r_n.row(n).dot(&r_n.row(n)))
        .collect();
    Ok(Spread { spread_n, omega_i, omega_til, centers: r_n, rsq })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;
    use std::f64::consts::TAU;

    // overlap matrix of a single state pinned to a delta at reduced
    // position tau on an nk-point chain with unit lattice constant
    fn delta_overlap(nk: usize, tau: f64)
        -> (nd::Array4<C64>, f64, nd::Array2<f64>)
    {
        let step = TAU / nk as f64;
        let bvecs = nd::array![[step], [-step]];
        let w = 1.0 / (2.0 * step * step);
        let mut M: nd::Array4<C64> = nd::Array4::zeros((nk, 2, 1, 1));
        for k in 0..nk {
            for (b, sign) in [1.0_f64, -1.0].into_iter().enumerate() {
                M[[k, b, 0, 0]] = C64::cis(-TAU * sign / nk as f64 * tau);
            }
        }
        (M, w, bvecs)
    }

    #[test]
    fn delta_function_center_and_vanishing_spread() {
        let (M, w, bvecs) = delta_overlap(8, 0.3);
        let sp = spread_recip(M.view(), w, bvecs.view());
        assert!((sp.centers[[0, 0]] - 0.3).abs() < 1e-12);
        assert!(sp.omega().abs() < 1e-12);
        assert!(sp.omega_i.abs() < 1e-12);
        assert!(sp.omega_til.abs() < 1e-12);
        assert!((sp.rsq[0] - 0.09).abs() < 1e-12);
    }

    #[test]
    fn spread_sum_rule_for_delta_states() {
        let (M, w, bvecs) = delta_overlap(6, 0.25);
        let sp = spread_recip(M.view(), w, bvecs.view());
        assert!(
            (sp.spread_n.sum() - (sp.omega_i + sp.omega_til)).abs() < 1e-12
        );
    }

    #[test]
    fn real_space_rejects_non_2d() {
        let lattice = Lattice::new(
            nd::array![[1.0]], nd::array![[0.0]]).unwrap();
        let wfs: nd::ArrayD<C64> = nd::ArrayD::zeros(nd::IxDyn(&[4, 1, 1]));
        assert!(matches!(
            spread_real(wfs.view(), &lattice),
            Err(WannierError::RealSpaceDim(1)),
        ));
    }
}
