//! Miscellaneous numerical tools: mesh-axis Fourier transforms and small
//! dense-matrix helpers shared by the Wannierization routines.

use ndarray as nd;
use ndarray_linalg::{ self as la, Eigh, SVD, error::LinalgError };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rustfft as fft;
use crate::{ Arr2, Arr3 };

/// Perform the inverse discrete Fourier transform of a state array over all
/// mesh axes.
///
/// The flat `[nk, n_states, n_orb]` array is reshaped to
/// `[n₁, …, n_D, n_states, n_orb]` and an inverse FFT (scaled by `1/nᵢ`
/// per axis, so `1/Nk` overall) is applied along each mesh axis in turn.
/// Index 0 along every transformed axis is the home cell; index `nᵢ - 1` is
/// the first periodic image in the negative direction.
///
/// *Panics if the product of `nks` does not match the leading axis length.*
pub fn ifftn_mesh<S>(states: &Arr3<S>, nks: &[usize]) -> nd::ArrayD<C64>
where S: nd::Data<Elem = C64>
{
    let (nk, ns, n_orb) = states.dim();
    assert_eq!(nk, nks.iter().product::<usize>());
    let mut shape: Vec<usize> = nks.to_vec();
    shape.push(ns);
    shape.push(n_orb);
    let mut out = states.to_owned()
        .into_shape(shape)
        .expect("consistent mesh shape");
    let mut planner = fft::FftPlanner::new();
    for (ax, &n) in nks.iter().enumerate() {
        let plan = planner.plan_fft_inverse(n);
        let scale = (n as f64).recip();
        let mut buf: Vec<C64> = vec![C64::zero(); n];
        for mut lane in out.lanes_mut(nd::Axis(ax)) {
            buf.iter_mut().zip(lane.iter()).for_each(|(b, &v)| { *b = v; });
            plan.process(&mut buf);
            lane.iter_mut().zip(buf.iter())
                .for_each(|(v, &b)| { *v = b * scale; });
        }
    }
    out
}

/// Compute `exp(scale · G)` for an anti-Hermitian generator `G`.
///
/// `iG` is Hermitian, so the exponential is evaluated through a (always
/// well-conditioned) Hermitian eigendecomposition,
/// `exp(scale·G) = V · exp(-i·scale·Λ) · Vᴴ`, and the result is exactly
/// unitary up to roundoff. The anti-Hermiticity of `G` is assumed, not
/// checked.
pub fn expm_antiherm<S>(g: &Arr2<S>, scale: f64)
    -> Result<nd::Array2<C64>, LinalgError>
where S: nd::Data<Elem = C64>
{
    let h = g.mapv(|z| z * C64::i());
    let (evals, evecs) = h.eigh(la::UPLO::Lower)?;
    let mut scaled = evecs.clone();
    for (j, mut col) in scaled.columns_mut().into_iter().enumerate() {
        let ph = C64::cis(-scale * evals[j]);
        col.iter_mut().for_each(|z| { *z *= ph; });
    }
    Ok(scaled.dot(&evecs.t().mapv(|z| z.conj())))
}

/// Orthonormal basis for the row space of `d`: the `keep` leading
/// right-singular vectors, returned as rows.
pub fn orthonormal_rows<S>(d: &Arr2<S>, keep: usize)
    -> Result<nd::Array2<C64>, LinalgError>
where S: nd::Data<Elem = C64>
{
    let (_, _, vt) = d.svd(false, true)?;
    let vt = vt.expect("svd with vt requested");
    Ok(vt.slice(nd::s![0..keep, ..]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;
    use std::f64::consts::TAU;

    #[test]
    fn ifft_of_flat_spectrum_is_a_home_cell_delta() {
        // constant over k transforms to a function supported at R = 0
        let n = 6;
        let states: nd::Array3<C64> =
            nd::Array3::from_elem((n, 1, 2), C64::new(1.0, 0.0));
        let w = ifftn_mesh(&states, &[n]);
        assert_eq!(w.shape(), &[n, 1, 2]);
        for r in 0..n {
            let expected = if r == 0 { 1.0 } else { 0.0 };
            for o in 0..2 {
                assert!((w[[r, 0, o]] - C64::new(expected, 0.0)).norm()
                    < 1e-12);
            }
        }
    }

    #[test]
    fn ifft_matches_direct_sum_on_a_2d_mesh() {
        let (n1, n2) = (4, 3);
        let nk = n1 * n2;
        let mut states: nd::Array3<C64> = nd::Array3::zeros((nk, 1, 1));
        for k1 in 0..n1 {
            for k2 in 0..n2 {
                states[[k1 * n2 + k2, 0, 0]] =
                    C64::cis(0.7 * k1 as f64 - 1.3 * k2 as f64);
            }
        }
        let w = ifftn_mesh(&states, &[n1, n2]);
        for r1 in 0..n1 {
            for r2 in 0..n2 {
                let mut direct = C64::new(0.0, 0.0);
                for k1 in 0..n1 {
                    for k2 in 0..n2 {
                        let arg = TAU * (
                            k1 as f64 * r1 as f64 / n1 as f64
                            + k2 as f64 * r2 as f64 / n2 as f64
                        );
                        direct += states[[k1 * n2 + k2, 0, 0]]
                            * C64::cis(arg);
                    }
                }
                direct /= nk as f64;
                assert!((w[[r1, r2, 0, 0]] - direct).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn antihermitian_exponential_is_unitary() {
        // G = i·σ_y-ish anti-Hermitian generator
        let g = nd::array![
            [C64::new(0.0, 0.2), C64::new(0.5, 0.1)],
            [C64::new(-0.5, 0.1), C64::new(0.0, -0.7)],
        ];
        let e = expm_antiherm(&g, 0.8).unwrap();
        let prod = e.t().mapv(|z| z.conj()).dot(&e);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod[[i, j]] - C64::new(expected, 0.0)).norm()
                    < 1e-12);
            }
        }
    }

    #[test]
    fn exponential_matches_series_for_small_generators() {
        let g = nd::array![
            [C64::new(0.0, 0.01), C64::new(0.02, 0.0)],
            [C64::new(-0.02, 0.0), C64::new(0.0, -0.01)],
        ];
        let e = expm_antiherm(&g, 1.0).unwrap();
        // I + G + G²/2 + O(G³)
        let eye: nd::Array2<C64> = nd::Array2::eye(2);
        let series = &eye + &g + &g.dot(&g).mapv(|z| z * 0.5);
        for i in 0..2 {
            for j in 0..2 {
                assert!((e[[i, j]] - series[[i, j]]).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn row_space_basis_is_orthonormal() {
        let d = nd::array![
            [C64::new(1.0, 0.0), C64::new(1.0, 0.0), C64::new(0.0, 0.0)],
            [C64::new(0.0, 0.0), C64::new(1.0, 0.0), C64::new(1.0, 1.0)],
        ];
        let q = orthonormal_rows(&d, 2).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                let dot: C64 = q.row(i).iter().zip(q.row(j))
                    .map(|(a, b)| a.conj() * *b)
                    .sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - C64::new(expected, 0.0)).norm() < 1e-12);
            }
        }
    }
}
