//! The Wannierization engine: trial-function projection, subspace selection
//! (disentanglement), gauge optimization, and the inverse Fourier transform
//! to home-cell Wannier functions.
//!
//! The engine owns two state containers: the energy eigenstates, written
//! once when the model is solved on the mesh, and the "tilde" working
//! states, which are replaced wholesale by every projection, subspace, or
//! gauge update. Both iterative minimizers run strictly sequentially across
//! iterations; numerical trouble inside them (spread increasing, gradient
//! growing, exhausted budgets) is logged and never aborts a run.

use log::{ debug, warn };
use ndarray::{ self as nd, s };
use ndarray_linalg::{ self as la, Eigh, SVD };
use num_complex::Complex64 as C64;
use rand::Rng;
use crate::{
    bands::{ self, KPath },
    bloch::{ projector, states_pbc, BlochSet, Gauge },
    error::{ WannierError, WindowError },
    kmesh::{ KMesh, NbrTable },
    lattice::Lattice,
    model::TightBinding,
    spread::{ self, Spread },
    trial::{ self, Trials },
    utils::{ expm_antiherm, ifftn_mesh, orthonormal_rows },
    DEF_MAXITERS,
    DEF_MIXING,
    DEF_STEP,
    DEF_TOL,
    WResult,
};

/// Selects a set of candidate states at every mesh point.
///
/// Resolved exactly once, against the solved band energies, into per-k
/// index tables; all downstream algorithms are table-driven.
#[derive(Clone, Debug)]
pub enum Window {
    /// The lower half of the bands (half filling).
    Occupied,
    /// Explicit band indices, applied uniformly at every mesh point.
    Bands(Vec<usize>),
    /// All bands with energy inside `[min, max]`; the number of selected
    /// states may vary from mesh point to mesh point.
    Energy { min: f64, max: f64 },
}

impl Window {
    /// Per-mesh-point sorted band-index table.
    pub(crate) fn resolve(
        &self,
        energies: nd::ArrayView2<f64>,
        n_occ: usize,
    ) -> Result<Vec<Vec<usize>>, WindowError> {
        let (nk, n_states) = energies.dim();
        match self {
            Self::Occupied => Ok(vec![(0..n_occ).collect(); nk]),
            Self::Bands(bands) => {
                let mut idx: Vec<usize> = bands.clone();
                idx.sort_unstable();
                idx.dedup();
                if let Some(&band) = idx.iter().find(|&&b| b >= n_states) {
                    return Err(WindowError::BandOutOfRange {
                        band, n_states });
                }
                Ok(vec![idx; nk])
            },
            Self::Energy { min, max } => {
                Ok((0..nk)
                    .map(|k| {
                        energies.row(k).iter().enumerate()
                            .filter(|(_, &e)| (*min..=*max).contains(&e))
                            .map(|(n, _)| n)
                            .collect()
                    })
                    .collect())
            },
        }
    }
}

/// Tunables for subspace selection (Ω_I minimization).
#[derive(Clone, Debug)]
pub struct SubspaceOpts {
    /// Iteration budget (default: `1000`).
    pub maxiters: usize,
    /// Convergence tolerance on the projected remaining change in Ω_I
    /// (default: `1e-10`).
    pub tol: f64,
    /// Projector mixing factor in (0, 1]; 1 is undamped (default: `1.0`).
    pub alpha: f64,
}

impl Default for SubspaceOpts {
    fn default() -> Self {
        Self { maxiters: DEF_MAXITERS, tol: DEF_TOL, alpha: DEF_MIXING }
    }
}

/// Tunables for gauge optimization (Ω̃ minimization).
#[derive(Clone, Debug)]
pub struct GaugeOpts {
    /// Gradient-descent step size ε (default: `1e-3`).
    pub eps: f64,
    /// Constant damping factor η on the step (default: `1.0`).
    pub eta: f64,
    /// Iteration budget (default: `1000`).
    pub maxiters: usize,
    /// Convergence tolerance on the gradient norm and the projected
    /// remaining change in Ω̃ (default: `1e-10`).
    pub tol: f64,
    /// Opt-in stagnation escape: when set, a random anti-Hermitian
    /// perturbation of this relative scale is applied to the unitaries
    /// whenever the gradient stalls (default: `None`).
    pub stagnation_kick: Option<f64>,
}

impl Default for GaugeOpts {
    fn default() -> Self {
        Self {
            eps: DEF_STEP,
            eta: 1.0,
            maxiters: DEF_MAXITERS,
            tol: DEF_TOL,
            stagnation_kick: None,
        }
    }
}

/// Outcome of a subspace-selection run.
#[derive(Clone, Debug)]
pub struct SubspaceReport {
    /// Final gauge-invariant spread.
    pub omega_i: f64,
    /// Iterations actually performed.
    pub iterations: usize,
    /// Whether the tolerance was met within the budget.
    pub converged: bool,
}

/// Outcome of a gauge-optimization run.
#[derive(Clone, Debug)]
pub struct GaugeReport {
    /// Final gauge-dependent spread.
    pub omega_til: f64,
    /// Final gradient norm.
    pub grad_norm: f64,
    /// Iterations actually performed.
    pub iterations: usize,
    /// Whether the tolerance was met within the budget.
    pub converged: bool,
}

/// Wannierization engine over a tight-binding model.
pub struct Wannier<M> {
    model: M,
    lattice: Lattice,
    mesh: KMesh,
    nbr: NbrTable,
    // energy eigenstates; written once here, read-only thereafter
    eig: BlochSet,
    // [n_trial, n_orb]
    trials: nd::Array2<C64>,
    // working states; rewritten wholesale, never partially mutated
    tilde: Option<BlochSet>,
    // [n₁, …, n_D, wannier, orbital]
    wfs: Option<nd::ArrayD<C64>>,
}

impl<M: TightBinding + Sync> Wannier<M> {
    /// Build the mesh geometry, solve the model on it, and prepare the
    /// trial functions.
    pub fn new(model: M, nks: &[usize], trials: Trials) -> WResult<Self> {
        let lattice = Lattice::new(model.lat_vecs(), model.orb_positions())?;
        let mesh = KMesh::new(nks)?;
        let nbr = mesh.nbr_table(&lattice)?;
        let eig = BlochSet::solve(&model, &lattice, &mesh, &nbr)?;
        let trials = match trials {
            Trials::List(tfs) =>
                trial::trial_matrix(&tfs, lattice.n_orb())?,
            Trials::Random(n) => trial::random_trial_matrix(
                n, lattice.n_orb(), &mut rand::thread_rng())?,
        };
        Ok(Self {
            model, lattice, mesh, nbr, eig, trials,
            tilde: None,
            wfs: None,
        })
    }

    /// The underlying tight-binding model.
    pub fn model(&self) -> &M { &self.model }

    /// Lattice geometry.
    pub fn lattice(&self) -> &Lattice { &self.lattice }

    /// Reciprocal-space mesh.
    pub fn mesh(&self) -> &KMesh { &self.mesh }

    /// Shell-1 neighbor table.
    pub fn nbr_table(&self) -> &NbrTable { &self.nbr }

    /// Energy eigenstates solved on the mesh.
    pub fn eig_states(&self) -> &BlochSet { &self.eig }

    /// Current working states.
    pub fn tilde_states(&self) -> WResult<&BlochSet> {
        self.tilde.as_ref().ok_or(WannierError::MissingStates)
    }

    /// Trial-function matrix, `[n_trial, n_orb]`.
    pub fn trials(&self) -> nd::ArrayView2<C64> { self.trials.view() }

    /// Wannier functions from the last [`wannierize`][Self::wannierize]
    /// call, `[n₁, …, n_D, wannier, orbital]`.
    pub fn wannier_fns(&self) -> Option<nd::ArrayViewD<C64>> {
        self.wfs.as_ref().map(|w| w.view())
    }

    fn set_tilde(&mut self, states: nd::Array3<C64>, gauge: Gauge)
        -> WResult<()>
    {
        self.tilde = Some(BlochSet::from_states(
            states, gauge, &self.lattice, &self.mesh, &self.nbr)?);
        self.wfs = None;
        Ok(())
    }

    /// Single-shot Wannierization: project the trial functions onto the
    /// chosen energy eigenstates and install the Löwdin-orthonormalized
    /// result as the working states.
    ///
    /// `bands` defaults to the occupied (lower) half of the spectrum. The
    /// number of trial functions must not exceed the number of chosen
    /// bands.
    pub fn project(&mut self, bands: Option<&[usize]>) -> WResult<()> {
        let n_states = self.eig.n_states();
        let idx: Vec<usize> = match bands {
            Some(list) => {
                let mut idx = list.to_vec();
                idx.sort_unstable();
                idx.dedup();
                if let Some(&band) = idx.iter().find(|&&b| b >= n_states) {
                    return Err(WindowError::BandOutOfRange {
                        band, n_states }.into());
                }
                idx
            },
            None => (0..self.eig.n_occ()).collect(),
        };
        let psi_tilde =
            project_states(self.eig.psi(), &idx, self.trials.view())?;
        self.set_tilde(psi_tilde, Gauge::Bloch)
    }

    /// Select the subspace minimizing the gauge-invariant spread Ω_I by
    /// fixed-point iteration over neighbor-averaged projectors.
    ///
    /// Candidate states come from the `outer` window of the energy
    /// eigenstates; states in the optional `frozen` window are retained
    /// unrotated and only the complement is optimized. The working states
    /// from the preceding projection seed the iteration and define the
    /// target subspace dimension.
    pub fn disentangle(
        &mut self,
        outer: &Window,
        frozen: Option<&Window>,
        opts: &SubspaceOpts,
    ) -> WResult<SubspaceReport> {
        let tilde = self.tilde.as_ref().ok_or(WannierError::MissingStates)?;
        let n_wann = tilde.n_states();
        let nk = self.mesh.nk();
        let nb = self.nbr.n_nbrs();
        let n_orb = self.lattice.n_orb();
        let w = self.nbr.weight();
        let energies = self.eig.energies().expect("solved eigenstates");

        let outer_idx = outer.resolve(energies, self.eig.n_occ())?;
        let froz_idx = match frozen {
            Some(win) => win.resolve(energies, self.eig.n_occ())?,
            None => vec![Vec::new(); nk],
        };
        for k in 0..nk {
            if froz_idx[k].iter().any(|f| !outer_idx[k].contains(f)) {
                return Err(
                    WindowError::FrozenOutsideOuter { k_index: k }.into());
            }
            if froz_idx[k].len() > n_wann {
                return Err(WindowError::FrozenTooLarge {
                    k_index: k,
                    got: froz_idx[k].len(),
                    max: n_wann,
                }.into());
            }
            if outer_idx[k].len() < n_wann {
                return Err(WindowError::TooNarrow {
                    k_index: k,
                    need: n_wann,
                    got: outer_idx[k].len(),
                }.into());
            }
        }

        // per-k valid counts with fixed-width padded storage
        let froz_count: Vec<usize> =
            froz_idx.iter().map(|f| f.len()).collect();
        let free_count: Vec<usize> = (0..nk)
            .map(|k| outer_idx[k].len() - froz_count[k])
            .collect();
        let max_free = free_count.iter().copied().max().unwrap_or(0);

        let mut free_basis: nd::Array3<C64> =
            nd::Array3::zeros((nk, max_free.max(1), n_orb));
        // working subspace, frozen states first
        let mut subspace: nd::Array3<C64> =
            nd::Array3::zeros((nk, n_wann, n_orb));

        let eig_u = self.eig.u();
        for k in 0..nk {
            let nf = froz_count[k];
            let outer_states = eig_u
                .index_axis(nd::Axis(0), k)
                .select(nd::Axis(0), &outer_idx[k]);
            if nf == 0 {
                free_basis
                    .slice_mut(s![k, 0..free_count[k], ..])
                    .assign(&outer_states);
                subspace.index_axis_mut(nd::Axis(0), k)
                    .assign(&tilde.u().index_axis(nd::Axis(0), k));
            } else {
                let froz = eig_u
                    .index_axis(nd::Axis(0), k)
                    .select(nd::Axis(0), &froz_idx[k]);
                let free = deflate(
                    outer_states.view(), froz.view(), free_count[k])?;
                free_basis
                    .slice_mut(s![k, 0..free_count[k], ..])
                    .assign(&free);
                subspace.slice_mut(s![k, 0..nf, ..]).assign(&froz);
                if n_wann > nf {
                    let seed = deflate(
                        tilde.u().index_axis(nd::Axis(0), k),
                        froz.view(),
                        n_wann - nf,
                    )?;
                    subspace.slice_mut(s![k, nf.., ..]).assign(&seed);
                }
            }
        }

        let (mut p_min, mut p_nbr_min) =
            subspace_projectors(&subspace, &self.nbr);
        let mut omega_prev = omega_i_projected(&p_min, &p_nbr_min, w);
        debug!("wannier::disentangle: initial Omega_I = {:.6e}", omega_prev);

        let alpha = opts.alpha;
        let mut iterations = 0;
        let mut converged = false;
        for i in 0..opts.maxiters {
            iterations = i + 1;
            // neighbor-averaged projector, then the optimal complement of
            // the frozen block at each mesh point
            for k in 0..nk {
                let n_opt = n_wann - froz_count[k];
                if n_opt == 0 { continue; }
                let mut p_avg: nd::Array2<C64> =
                    nd::Array2::zeros((n_orb, n_orb));
                for b in 0..nb {
                    p_avg.scaled_add(
                        C64::new(w, 0.0),
                        &p_nbr_min.index_axis(nd::Axis(0), k)
                            .index_axis(nd::Axis(0), b),
                    );
                }
                let basis = free_basis.slice(s![k, 0..free_count[k], ..]);
                let z = basis.mapv(|z| z.conj())
                    .dot(&p_avg)
                    .dot(&basis.t());
                let (_, evecs) = z.eigh(la::UPLO::Lower)?;
                let sel = evecs.slice(s![.., free_count[k] - n_opt..]);
                let opt = sel.t().dot(&basis);
                subspace
                    .slice_mut(s![k, froz_count[k].., ..])
                    .assign(&opt);
            }

            let (p_new, p_nbr_new) =
                subspace_projectors(&subspace, &self.nbr);
            mix_inplace(&mut p_min, &p_new, alpha);
            mix_inplace_4(&mut p_nbr_min, &p_nbr_new, alpha);

            let omega_new = omega_i_projected(&p_min, &p_nbr_min, w);
            if omega_new > omega_prev + 1e-12 {
                warn!(
                    "wannier::disentangle: Omega_I increased \
                    ({:.6e} -> {:.6e}) at iteration {}",
                    omega_prev, omega_new, i,
                );
            }
            // projected remaining change over the rest of the budget
            let delta = (omega_prev - omega_new).abs();
            let remaining = (opts.maxiters - i) as f64;
            omega_prev = omega_new;
            if delta * remaining <= opts.tol {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "wannier::disentangle: iteration budget ({}) exhausted \
                before tolerance",
                opts.maxiters,
            );
        }

        self.set_tilde(subspace, Gauge::CellPeriodic)?;
        Ok(SubspaceReport { omega_i: omega_prev, iterations, converged })
    }

    /// Minimize the gauge-dependent spread Ω̃ by gradient descent on the
    /// manifold of per-k unitaries, then install the rotated states.
    pub fn optimize_gauge(&mut self, opts: &GaugeOpts)
        -> WResult<GaugeReport>
    {
        let tilde = self.tilde.as_ref().ok_or(WannierError::MissingStates)?;
        let ns = tilde.n_states();
        let nk = self.mesh.nk();
        let nb = self.nbr.n_nbrs();
        let dim = self.mesh.dim();
        let w = self.nbr.weight();
        let bvecs = self.nbr.bvecs();

        let m0 = tilde.overlap().to_owned();
        let mut m = m0.clone();
        let mut u_rot: nd::Array3<C64> = nd::Array3::zeros((nk, ns, ns));
        let eye: nd::Array2<C64> = nd::Array2::eye(ns);
        for k in 0..nk {
            u_rot.index_axis_mut(nd::Axis(0), k).assign(&eye);
        }

        let step = opts.eta * opts.eps;
        let mut omega_prev = spread::omega_til(m.view(), w, bvecs);
        let mut grad_prev = 0.0;
        let mut grad_norm = f64::INFINITY;
        let mut iterations = 0;
        let mut converged = false;
        debug!(
            "wannier::optimize_gauge: initial Omega_til = {:.6e}",
            omega_prev,
        );

        for i in 0..opts.maxiters {
            iterations = i + 1;
            let r = spread::centers(m.view(), w, bvecs);
            let mut g_sum: nd::Array2<C64> = nd::Array2::zeros((ns, ns));
            let mut grads: nd::Array3<C64> =
                nd::Array3::zeros((nk, ns, ns));
            for k in 0..nk {
                let mut g: nd::Array2<C64> = nd::Array2::zeros((ns, ns));
                for b in 0..nb {
                    let mk = m.index_axis(nd::Axis(0), k);
                    let mkb = mk.index_axis(nd::Axis(0), b);
                    // q_n = Im ln M_nn + b·r_n
                    let mut q: Vec<f64> = Vec::with_capacity(ns);
                    let mut d: Vec<C64> = Vec::with_capacity(ns);
                    for n in 0..ns {
                        let dn = mkb[[n, n]];
                        let mut bd = 0.0;
                        for a in 0..dim { bd += bvecs[[b, a]] * r[[n, a]]; }
                        q.push(dn.arg() + bd);
                        d.push(dn);
                    }
                    // R = M ⊙ conj(diag M), T = (M / diag M) ⊙ q
                    let mut rm: nd::Array2<C64> =
                        nd::Array2::zeros((ns, ns));
                    let mut tm: nd::Array2<C64> =
                        nd::Array2::zeros((ns, ns));
                    for mm in 0..ns {
                        for n in 0..ns {
                            rm[[mm, n]] = mkb[[mm, n]] * d[n].conj();
                            tm[[mm, n]] = mkb[[mm, n]] / d[n] * q[n];
                        }
                    }
                    // G += 4w (A[R] - S[T])
                    for mm in 0..ns {
                        for n in 0..ns {
                            let a_r = (rm[[mm, n]] - rm[[n, mm]].conj())
                                / 2.0;
                            let s_t = (tm[[mm, n]] + tm[[n, mm]].conj())
                                / (2.0 * C64::i());
                            g[[mm, n]] += 4.0 * w * (a_r - s_t);
                        }
                    }
                }
                g_sum += &g;
                grads.index_axis_mut(nd::Axis(0), k).assign(&g);
            }
            grad_norm = g_sum.iter()
                .map(|z| z.norm_sqr())
                .sum::<f64>()
                .sqrt();

            for k in 0..nk {
                let e = expm_antiherm(
                    &grads.index_axis(nd::Axis(0), k).to_owned(), step)?;
                let uk = u_rot.index_axis(nd::Axis(0), k).dot(&e);
                u_rot.index_axis_mut(nd::Axis(0), k).assign(&uk);
            }
            for k in 0..nk {
                let uk_dag = u_rot.index_axis(nd::Axis(0), k)
                    .t()
                    .mapv(|z| z.conj());
                for b in 0..nb {
                    let u_nbr = u_rot
                        .index_axis(nd::Axis(0), self.nbr.nbr_of(k, b));
                    let m0k = m0.index_axis(nd::Axis(0), k);
                    let m0kb = m0k.index_axis(nd::Axis(0), b);
                    let rotated = uk_dag.dot(&m0kb).dot(&u_nbr);
                    m.index_axis_mut(nd::Axis(0), k)
                        .index_axis_mut(nd::Axis(0), b)
                        .assign(&rotated);
                }
            }

            let omega_new = spread::omega_til(m.view(), w, bvecs);
            let delta = (omega_prev - omega_new).abs();
            let remaining = (opts.maxiters - i) as f64;
            omega_prev = omega_new;
            if grad_norm <= opts.tol && delta * remaining <= opts.tol {
                converged = true;
                break;
            }
            if i > 0 && grad_norm > grad_prev {
                warn!(
                    "wannier::optimize_gauge: gradient norm increased \
                    ({:.6e} -> {:.6e}) at iteration {}",
                    grad_prev, grad_norm, i,
                );
            }
            let stalled = i > 0 && (grad_prev - grad_norm).abs() <= opts.tol;
            if stalled {
                warn!(
                    "wannier::optimize_gauge: gradient stalled at {:.6e}",
                    grad_norm,
                );
                if let Some(scale) = opts.stagnation_kick {
                    kick_unitaries(&mut u_rot, scale)?;
                    for k in 0..nk {
                        let uk_dag = u_rot.index_axis(nd::Axis(0), k)
                            .t()
                            .mapv(|z| z.conj());
                        for b in 0..nb {
                            let u_nbr = u_rot.index_axis(
                                nd::Axis(0), self.nbr.nbr_of(k, b));
                            let m0k = m0.index_axis(nd::Axis(0), k);
                            let m0kb = m0k.index_axis(nd::Axis(0), b);
                            let rotated = uk_dag.dot(&m0kb).dot(&u_nbr);
                            m.index_axis_mut(nd::Axis(0), k)
                                .index_axis_mut(nd::Axis(0), b)
                                .assign(&rotated);
                        }
                    }
                    omega_prev = spread::omega_til(m.view(), w, bvecs);
                }
            }
            grad_prev = grad_norm;
        }
        if !converged {
            warn!(
                "wannier::optimize_gauge: iteration budget ({}) exhausted \
                before tolerance",
                opts.maxiters,
            );
        }

        // rotate the working states by the accumulated unitaries
        let tilde = self.tilde.as_ref().expect("checked above");
        let mut rotated: nd::Array3<C64> =
            nd::Array3::zeros(tilde.u().raw_dim());
        for k in 0..nk {
            let uk = u_rot.index_axis(nd::Axis(0), k);
            let new = uk.t().dot(&tilde.u().index_axis(nd::Axis(0), k));
            rotated.index_axis_mut(nd::Axis(0), k).assign(&new);
        }
        self.set_tilde(rotated, Gauge::CellPeriodic)?;
        let tilde = self.tilde.as_ref().expect("just set");
        let omega_til =
            spread::omega_til(tilde.overlap(), w, self.nbr.bvecs());
        Ok(GaugeReport {
            omega_til,
            grad_norm,
            iterations,
            converged,
        })
    }

    /// Inverse discrete Fourier transform of the working Bloch states over
    /// the mesh axes, yielding home-cell Wannier functions
    /// `[n₁, …, n_D, wannier, orbital]`.
    pub fn wannierize(&mut self) -> WResult<nd::ArrayViewD<C64>> {
        let tilde = self.tilde.as_ref().ok_or(WannierError::MissingStates)?;
        let wfs = ifftn_mesh(&tilde.psi(), self.mesh.nks());
        self.wfs = Some(wfs);
        Ok(self.wfs.as_ref().expect("just set").view())
    }

    /// Full maximal-localization pipeline: subspace selection, a second
    /// trial projection on the selected subspace, gauge optimization, and
    /// the final Wannier transform. Returns the converged spread
    /// decomposition.
    pub fn max_loc(
        &mut self,
        outer: &Window,
        frozen: Option<&Window>,
        sub_opts: &SubspaceOpts,
        gauge_opts: &GaugeOpts,
    ) -> WResult<Spread> {
        self.disentangle(outer, frozen, sub_opts)?;
        let tilde = self.tilde.as_ref().expect("set by disentangle");
        let all: Vec<usize> = (0..tilde.n_states()).collect();
        let psi_tilde =
            project_states(tilde.psi(), &all, self.trials.view())?;
        self.set_tilde(psi_tilde, Gauge::Bloch)?;
        self.optimize_gauge(gauge_opts)?;
        self.wannierize()?;
        self.spread_recip()
    }

    /// Reciprocal-space spread decomposition of the working states.
    pub fn spread_recip(&self) -> WResult<Spread> {
        let tilde = self.tilde.as_ref().ok_or(WannierError::MissingStates)?;
        Ok(spread::spread_recip(
            tilde.overlap(), self.nbr.weight(), self.nbr.bvecs()))
    }

    /// Real-space spread of the Wannier functions (2-D meshes only); an
    /// independent cross-check of [`spread_recip`][Self::spread_recip].
    pub fn spread_real(&self) -> WResult<Spread> {
        let wfs = self.wfs.as_ref().ok_or(WannierError::MissingStates)?;
        spread::spread_real(wfs.view(), &self.lattice)
    }

    /// Band structure interpolated along a k-path from the rotated,
    /// real-space-truncated Hamiltonian of the working states.
    pub fn interp_bands(&self, nodes: nd::ArrayView2<f64>, nk_path: usize)
        -> WResult<(KPath, nd::Array2<f64>)>
    {
        let tilde = self.tilde.as_ref().ok_or(WannierError::MissingStates)?;
        let hamk = self.eig.hamk().expect("solved eigenstates");
        let path = bands::k_path(&self.lattice, nodes, nk_path)?;
        let e = bands::interpolate(
            &self.mesh, tilde.u(), hamk, &path)?;
        Ok((path, e))
    }
}

// Löwdin-orthonormalized projection of trial functions onto the chosen
// Bloch states: A = ⟨ψ|t⟩, A = VΣWᴴ, ψ̃ = (V·Wᴴ)ᵗ·ψ
fn project_states(
    psi: nd::ArrayView3<C64>,
    idx: &[usize],
    trials: nd::ArrayView2<C64>,
) -> WResult<nd::Array3<C64>> {
    let (nk, _, n_orb) = psi.dim();
    let n_sel = idx.len();
    let n_tf = trials.nrows();
    if n_tf > n_sel || n_sel == 0 {
        return Err(WannierError::TrialCount {
            n_trial: n_tf,
            n_bands: n_sel,
        });
    }
    let mut out: nd::Array3<C64> = nd::Array3::zeros((nk, n_tf, n_orb));
    let mut s_min = f64::INFINITY;
    let mut k_min = 0;
    for k in 0..nk {
        let psi_sel = psi.index_axis(nd::Axis(0), k)
            .select(nd::Axis(0), idx);
        let a = psi_sel.mapv(|z| z.conj()).dot(&trials.t());
        let (u, sv, vt) = a.svd(true, true)?;
        let u = u.expect("svd with u requested");
        let vt = vt.expect("svd with vt requested");
        if let Some(&s_last) = sv.to_vec().last() {
            if s_last < s_min { s_min = s_last; k_min = k; }
        }
        let r = sv.len();
        let vwh = u.slice(s![.., 0..r]).dot(&vt.slice(s![0..r, ..]));
        let tilde_k = vwh.t().dot(&psi_sel);
        out.index_axis_mut(nd::Axis(0), k).assign(&tilde_k);
    }
    if s_min < 1e-8 {
        warn!(
            "wannier::project_states: near-singular trial overlap \
            (smallest singular value {:.3e} at mesh point {}); projection \
            quality degrades",
            s_min, k_min,
        );
    }
    Ok(out)
}

// remove the frozen component from row-wise states and return an
// orthonormal basis of the remainder
fn deflate(
    states: nd::ArrayView2<C64>,
    frozen: nd::ArrayView2<C64>,
    keep: usize,
) -> WResult<nd::Array2<C64>> {
    let b = states.dot(&frozen.mapv(|z| z.conj()).t());
    let d = states.to_owned() - b.dot(&frozen);
    Ok(orthonormal_rows(&d, keep)?)
}

fn subspace_projectors(states: &nd::Array3<C64>, nbr: &NbrTable)
    -> (nd::Array3<C64>, nd::Array4<C64>)
{
    let (nk, _, n_orb) = states.dim();
    let nb = nbr.n_nbrs();
    let mut p: nd::Array3<C64> = nd::Array3::zeros((nk, n_orb, n_orb));
    let mut p_nbr: nd::Array4<C64> =
        nd::Array4::zeros((nk, nb, n_orb, n_orb));
    for k in 0..nk {
        p.index_axis_mut(nd::Axis(0), k)
            .assign(&projector(states.index_axis(nd::Axis(0), k)));
        for b in 0..nb {
            let pbc = states_pbc(states.view(), nbr, k, b);
            p_nbr.index_axis_mut(nd::Axis(0), k)
                .index_axis_mut(nd::Axis(0), b)
                .assign(&projector(pbc.view()));
        }
    }
    (p, p_nbr)
}

// Ω_I = (w/Nk) Σ_{k,b} Tr[P(k)·(I - P_nbr(k,b))]
fn omega_i_projected(
    p: &nd::Array3<C64>,
    p_nbr: &nd::Array4<C64>,
    w: f64,
) -> f64 {
    let (nk, nb, n_orb, _) = p_nbr.dim();
    let mut acc = 0.0;
    for k in 0..nk {
        let pk = p.index_axis(nd::Axis(0), k);
        for b in 0..nb {
            let pnk = p_nbr.index_axis(nd::Axis(0), k);
            let pn = pnk.index_axis(nd::Axis(0), b);
            for i in 0..n_orb {
                acc += pk[[i, i]].re;
                for j in 0..n_orb {
                    acc -= (pk[[i, j]] * pn[[j, i]]).re;
                }
            }
        }
    }
    w / nk as f64 * acc
}

fn mix_inplace(dst: &mut nd::Array3<C64>, new: &nd::Array3<C64>, alpha: f64) {
    if alpha >= 1.0 {
        dst.assign(new);
    } else {
        nd::Zip::from(dst).and(new).for_each(|d, &n| {
            *d = alpha * n + (1.0 - alpha) * *d;
        });
    }
}

fn mix_inplace_4(
    dst: &mut nd::Array4<C64>,
    new: &nd::Array4<C64>,
    alpha: f64,
) {
    if alpha >= 1.0 {
        dst.assign(new);
    } else {
        nd::Zip::from(dst).and(new).for_each(|d, &n| {
            *d = alpha * n + (1.0 - alpha) * *d;
        });
    }
}

// random anti-Hermitian perturbation of each unitary, scaled relative to
// its largest entry
fn kick_unitaries(u: &mut nd::Array3<C64>, scale: f64) -> WResult<()> {
    let (nk, ns, _) = u.dim();
    let mut rng = rand::thread_rng();
    let u_max = u.iter().fold(0.0_f64, |acc, z| acc.max(z.norm()));
    let s = scale * u_max;
    for k in 0..nk {
        let mut pert: nd::Array2<C64> = nd::Array2::zeros((ns, ns));
        for i in 0..ns {
            for j in 0..ns {
                pert[[i, j]] = C64::new(
                    s * (rng.gen::<f64>() - 0.5),
                    s * (rng.gen::<f64>() - 0.5),
                );
            }
        }
        // anti-Hermitian part: (P + Pᴴ) / 2i
        let mut anti: nd::Array2<C64> = nd::Array2::zeros((ns, ns));
        for i in 0..ns {
            for j in 0..ns {
                anti[[i, j]] = (pert[[i, j]] + pert[[j, i]].conj())
                    / (2.0 * C64::i());
            }
        }
        let e = expm_antiherm(&anti, 1.0)?;
        let uk = u.index_axis(nd::Axis(0), k).dot(&e);
        u.index_axis_mut(nd::Axis(0), k).assign(&uk);
    }
    Ok(())
}
