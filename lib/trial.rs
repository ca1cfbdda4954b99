//! Trial wavefunctions: fixed, k-independent localized functions used to
//! seed the projection-based initial guess for Wannier functions.

use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::Rng;
use crate::error::TrialError;

/// A single trial function over the home-cell orbitals.
#[derive(Clone, Debug)]
pub enum TrialFn {
    /// Unit amplitude on a single site.
    Site(usize),
    /// Explicit (site, amplitude) pairs; normalized to unit weight on
    /// construction.
    Amps(Vec<(usize, C64)>),
}

/// Trial-function request handed to the Wannierization engine.
#[derive(Clone, Debug)]
pub enum Trials {
    /// An explicit list of trial functions.
    List(Vec<TrialFn>),
    /// A number of random, mutually orthonormal trial functions.
    Random(usize),
}

/// Assemble the dense trial matrix `[n_trial, n_orb]` from a specification
/// list.
///
/// Site specifications become unit-weight deltas; amplitude lists are
/// normalized to unit norm. Out-of-range sites and zero-weight functions
/// are validation failures.
pub fn trial_matrix(tfs: &[TrialFn], n_orb: usize)
    -> Result<nd::Array2<C64>, TrialError>
{
    if tfs.is_empty() { return Err(TrialError::NoFunctions); }
    let mut t: nd::Array2<C64> = nd::Array2::zeros((tfs.len(), n_orb));
    for (j, tf) in tfs.iter().enumerate() {
        match tf {
            TrialFn::Site(site) => {
                if *site >= n_orb {
                    return Err(TrialError::SiteOutOfRange {
                        trial: j, site: *site, n_orb });
                }
                t[[j, *site]] = C64::new(1.0, 0.0);
            },
            TrialFn::Amps(amps) => {
                for &(site, amp) in amps {
                    if site >= n_orb {
                        return Err(TrialError::SiteOutOfRange {
                            trial: j, site, n_orb });
                    }
                    t[[j, site]] = amp;
                }
                let norm: f64 = t.row(j).iter()
                    .map(|z| z.norm_sqr())
                    .sum::<f64>()
                    .sqrt();
                if norm <= f64::EPSILON {
                    return Err(TrialError::ZeroWeight { trial: j });
                }
                let mut row = t.row_mut(j);
                row.iter_mut().for_each(|z| { *z /= norm; });
            },
        }
    }
    Ok(t)
}

/// Draw `n_tf` random trial functions and orthonormalize them by
/// Gram-Schmidt, `[n_tf, n_orb]`.
///
/// Vectors that collapse under orthogonalization (norm below `1e-10`) are
/// discarded and redrawn.
pub fn random_trial_matrix<R>(n_tf: usize, n_orb: usize, rng: &mut R)
    -> Result<nd::Array2<C64>, TrialError>
where R: Rng + ?Sized
{
    if n_tf == 0 || n_tf > n_orb { return Err(TrialError::NoFunctions); }
    let mut basis: Vec<nd::Array1<C64>> = Vec::with_capacity(n_tf);
    while basis.len() < n_tf {
        let mut v: nd::Array1<C64> = (0..n_orb)
            .map(|_| C64::new(rng.gen::<f64>(), 0.0))
            .collect();
        for u in basis.iter() {
            let overlap: C64 = u.iter().zip(v.iter())
                .map(|(ui, vi)| ui.conj() * *vi)
                .sum();
            v.zip_mut_with(u, |vi, ui| { *vi -= overlap * *ui; });
        }
        let norm: f64 = v.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        if norm > 1e-10 {
            v.iter_mut().for_each(|z| { *z /= norm; });
            basis.push(v);
        }
    }
    let mut t: nd::Array2<C64> = nd::Array2::zeros((n_tf, n_orb));
    for (j, v) in basis.into_iter().enumerate() {
        t.row_mut(j).assign(&v);
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn site_spec_is_a_delta() {
        let t = trial_matrix(&[TrialFn::Site(1)], 3).unwrap();
        assert_eq!(t.dim(), (1, 3));
        assert!((t[[0, 1]] - C64::new(1.0, 0.0)).norm() < 1e-15);
        assert!(t[[0, 0]].norm() < 1e-15 && t[[0, 2]].norm() < 1e-15);
    }

    #[test]
    fn amplitude_spec_is_normalized() {
        let t = trial_matrix(
            &[TrialFn::Amps(vec![
                (0, C64::new(3.0, 0.0)),
                (2, C64::new(0.0, 4.0)),
            ])],
            3,
        ).unwrap();
        let norm: f64 = t.row(0).iter().map(|z| z.norm_sqr()).sum();
        assert!((norm - 1.0).abs() < 1e-14);
        assert!((t[[0, 0]].re - 0.6).abs() < 1e-14);
        assert!((t[[0, 2]].im - 0.8).abs() < 1e-14);
    }

    #[test]
    fn rejects_bad_specs() {
        assert!(matches!(
            trial_matrix(&[TrialFn::Site(5)], 2),
            Err(TrialError::SiteOutOfRange { site: 5, n_orb: 2, .. }),
        ));
        assert!(matches!(
            trial_matrix(&[], 2),
            Err(TrialError::NoFunctions),
        ));
        assert!(matches!(
            trial_matrix(&[TrialFn::Amps(vec![])], 2),
            Err(TrialError::ZeroWeight { trial: 0 }),
        ));
    }

    #[test]
    fn random_trials_are_orthonormal() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = random_trial_matrix(3, 4, &mut rng).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let dot: C64 = t.row(i).iter().zip(t.row(j))
                    .map(|(a, b)| a.conj() * *b)
                    .sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - C64::new(expected, 0.0)).norm() < 1e-12);
            }
        }
    }
}
