//! Container for a set of Bloch states on a mesh, with eagerly derived
//! overlap matrices and band projectors.
//!
//! A [`BlochSet`] is an immutable snapshot: it is built once (by
//! [`BlochSet::solve`] or [`BlochSet::from_states`]) and every derived
//! quantity (the complementary gauge, the nearest-neighbor overlap matrix
//! `M[k, b, m, n] = ⟨u_{m,k}|u_{n,k+b}⟩`, the band projector
//! `P = Σ_n |u_n⟩⟨u_n|`, and the neighbor projectors) is computed in the
//! constructor. Installing new working states means building a new snapshot,
//! so no reader can ever observe a partially updated container.

use ndarray as nd;
use num_complex::Complex64 as C64;
use rayon::prelude::*;
use std::f64::consts::TAU;
use crate::{
    error::WannierError,
    kmesh::{ KMesh, NbrTable },
    lattice::Lattice,
    model::TightBinding,
    WResult,
};

/// Gauge of a state array handed to [`BlochSet::from_states`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Gauge {
    /// Cell-periodic amplitudes `u_{n,k}`.
    CellPeriodic,
    /// Bloch amplitudes `ψ_{n,k} = u_{n,k} · exp(+i 2π k·τ)`.
    Bloch,
}

/// A set of states over the full mesh together with its derived overlap
/// matrix and projectors.
#[derive(Clone, Debug)]
pub struct BlochSet {
    // [nk, n_states, n_orb]
    u: nd::Array3<C64>,
    psi: nd::Array3<C64>,
    // [nk, nb, n_states, n_states]
    M: nd::Array4<C64>,
    // [nk, n_orb, n_orb]
    proj: nd::Array3<C64>,
    // [nk, nb, n_orb, n_orb]
    proj_nbr: nd::Array4<C64>,
    // present only for energy eigenstates produced by `solve`
    energies: Option<nd::Array2<f64>>,
    hamk: Option<nd::Array3<C64>>,
}

impl BlochSet {
    /// Diagonalize the model at every mesh point and store eigenvalues,
    /// cell-periodic eigenstates, and the sampled Bloch Hamiltonian.
    ///
    /// Mesh points are independent, so the diagonalization fans out over a
    /// rayon thread pool. Fails if the model yields a band count
    /// inconsistent with its orbital count at any mesh point.
    pub fn solve<M>(
        model: &M,
        lattice: &Lattice,
        mesh: &KMesh,
        nbr: &NbrTable,
    ) -> WResult<Self>
    where M: TightBinding + Sync
    {
        let nk = mesh.nk();
        let n_orb = lattice.n_orb();
        let solved: Vec<_> = (0..nk).into_par_iter()
            .map(|k| {
                let kpt = mesh.kpt(k);
                let h = model.hamiltonian(kpt);
                (h, model.solve_kpt(kpt))
            })
            .collect();

        let mut energies: nd::Array2<f64> = nd::Array2::zeros((nk, n_orb));
        let mut u: nd::Array3<C64> = nd::Array3::zeros((nk, n_orb, n_orb));
        let mut hamk: nd::Array3<C64> = nd::Array3::zeros((nk, n_orb, n_orb));
        for (k, (h, sol)) in solved.into_iter().enumerate() {
            let (evals, evecs) = sol?;
            WannierError::check_bands(k, evals.len(), n_orb)?;
            energies.row_mut(k).assign(&evals);
            u.index_axis_mut(nd::Axis(0), k).assign(&evecs);
            hamk.index_axis_mut(nd::Axis(0), k).assign(&h);
        }
        Self::build(u, Gauge::CellPeriodic, Some(energies), Some(hamk),
                    lattice, mesh, nbr)
    }

    /// Install a new set of working states in either gauge.
    ///
    /// This is the single way states enter a container; the complementary
    /// gauge, overlap matrix, and all projectors are derived here, in full,
    /// every time.
    pub fn from_states(
        states: nd::Array3<C64>,
        gauge: Gauge,
        lattice: &Lattice,
        mesh: &KMesh,
        nbr: &NbrTable,
    ) -> WResult<Self> {
        Self::build(states, gauge, None, None, lattice, mesh, nbr)
    }

    fn build(
        states: nd::Array3<C64>,
        gauge: Gauge,
        energies: Option<nd::Array2<f64>>,
        hamk: Option<nd::Array3<C64>>,
        lattice: &Lattice,
        mesh: &KMesh,
        nbr: &NbrTable,
    ) -> WResult<Self> {
        let (nk, _, n_orb) = states.dim();
        if nk != mesh.nk() || n_orb != lattice.n_orb() {
            return Err(WannierError::StateShape {
                nk: mesh.nk(),
                n_orb: lattice.n_orb(),
                got: states.shape().to_vec(),
            });
        }
        let (u, psi) = match gauge {
            Gauge::CellPeriodic => {
                let psi = apply_orb_phases(&states, lattice, mesh, 1.0);
                (states, psi)
            },
            Gauge::Bloch => {
                let u = apply_orb_phases(&states, lattice, mesh, -1.0);
                (u, states)
            },
        };
        let M = overlaps(&u, nbr);
        let (proj, proj_nbr) = projectors(&u, nbr);
        Ok(Self { u, psi, M, proj, proj_nbr, energies, hamk })
    }

    /// Number of states per mesh point.
    pub fn n_states(&self) -> usize { self.u.dim().1 }

    /// Number of occupied states at half filling.
    pub fn n_occ(&self) -> usize { self.n_states() / 2 }

    /// Cell-periodic states, `[nk, n_states, n_orb]`.
    pub fn u(&self) -> nd::ArrayView3<C64> { self.u.view() }

    /// Bloch-gauge states, `[nk, n_states, n_orb]`.
    pub fn psi(&self) -> nd::ArrayView3<C64> { self.psi.view() }

    /// Nearest-neighbor overlap matrix, `[nk, nb, n_states, n_states]`.
    pub fn overlap(&self) -> nd::ArrayView4<C64> { self.M.view() }

    /// Band projector at every mesh point, `[nk, n_orb, n_orb]`.
    pub fn proj(&self) -> nd::ArrayView3<C64> { self.proj.view() }

    /// Neighbor-subspace projectors, `[nk, nb, n_orb, n_orb]`.
    pub fn proj_nbr(&self) -> nd::ArrayView4<C64> { self.proj_nbr.view() }

    /// Complement `Q = I - P_nbr(k, b)` of one neighbor projector.
    pub fn q_nbr(&self, k: usize, b: usize) -> nd::Array2<C64> {
        let n_orb = self.u.dim().2;
        let mut q: nd::Array2<C64> = nd::Array2::eye(n_orb);
        q -= &self.proj_nbr
            .index_axis(nd::Axis(0), k)
            .index_axis(nd::Axis(0), b);
        q
    }

    /// Eigenvalues from [`solve`][Self::solve], `[nk, n_bands]`.
    pub fn energies(&self) -> Option<nd::ArrayView2<f64>> {
        self.energies.as_ref().map(|e| e.view())
    }

    /// Sampled Bloch Hamiltonian from [`solve`][Self::solve],
    /// `[nk, n_orb, n_orb]`.
    pub fn hamk(&self) -> Option<nd::ArrayView3<C64>> {
        self.hamk.as_ref().map(|h| h.view())
    }
}

// per-orbital phases exp(lam · i 2π k·τ); lam = +1 maps cell-periodic to
// Bloch, lam = -1 inverts
fn apply_orb_phases(
    states: &nd::Array3<C64>,
    lattice: &Lattice,
    mesh: &KMesh,
    lam: f64,
) -> nd::Array3<C64> {
    let (nk, ns, n_orb) = states.dim();
    let mut out = states.clone();
    for k in 0..nk {
        let kpt = mesh.kpt(k);
        for o in 0..n_orb {
            let arg = lam * TAU * lattice.orbs().row(o).dot(&kpt);
            let ph = C64::cis(arg);
            for n in 0..ns {
                out[[k, n, o]] *= ph;
            }
        }
    }
    out
}

/// States at the wrapped neighbor `k + b`, multiplied by the boundary phase
/// for that connection, `[n_states, n_orb]`.
pub(crate) fn states_pbc(
    states: nd::ArrayView3<C64>,
    nbr: &NbrTable,
    k: usize,
    b: usize,
) -> nd::Array2<C64> {
    let mut out = states
        .index_axis(nd::Axis(0), nbr.nbr_of(k, b))
        .to_owned();
    let phase = nbr.phase();
    for (o, mut col) in out.columns_mut().into_iter().enumerate() {
        let ph = phase[[k, b, o]];
        col.iter_mut().for_each(|z| { *z *= ph; });
    }
    out
}

// M[k, b, m, n] = Σ_j conj(u[k, m, j]) · u_pbc[n, j]
fn overlaps(u: &nd::Array3<C64>, nbr: &NbrTable) -> nd::Array4<C64> {
    let (nk, ns, _) = u.dim();
    let nb = nbr.n_nbrs();
    let mut M: nd::Array4<C64> = nd::Array4::zeros((nk, nb, ns, ns));
    for k in 0..nk {
        let uk_conj = u.index_axis(nd::Axis(0), k).mapv(|z| z.conj());
        for b in 0..nb {
            let upbc = states_pbc(u.view(), nbr, k, b);
            let mkb = uk_conj.dot(&upbc.t());
            M.index_axis_mut(nd::Axis(0), k)
                .index_axis_mut(nd::Axis(0), b)
                .assign(&mkb);
        }
    }
    M
}

/// Projector onto the span of row-wise states:
/// `P[i, j] = Σ_n s[n, i] · conj(s[n, j])`.
pub(crate) fn projector(states: nd::ArrayView2<C64>) -> nd::Array2<C64> {
    states.t().dot(&states.mapv(|z| z.conj()))
}

fn projectors(u: &nd::Array3<C64>, nbr: &NbrTable)
    -> (nd::Array3<C64>, nd::Array4<C64>)
{
    let (nk, _, n_orb) = u.dim();
    let nb = nbr.n_nbrs();
    let mut proj: nd::Array3<C64> = nd::Array3::zeros((nk, n_orb, n_orb));
    let mut proj_nbr: nd::Array4<C64> =
        nd::Array4::zeros((nk, nb, n_orb, n_orb));
    for k in 0..nk {
        proj.index_axis_mut(nd::Axis(0), k)
            .assign(&projector(u.index_axis(nd::Axis(0), k)));
        for b in 0..nb {
            let upbc = states_pbc(u.view(), nbr, k, b);
            proj_nbr.index_axis_mut(nd::Axis(0), k)
                .index_axis_mut(nd::Axis(0), b)
                .assign(&projector(upbc.view()));
        }
    }
    (proj, proj_nbr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray as nd;

    // alternating-hopping two-orbital chain; Hamiltonian carries the
    // orbital-position phases so that u(k+G) = u(k)·exp(-i 2π τ·G)
    struct Chain { v: f64, w: f64 }

    impl TightBinding for Chain {
        fn dim(&self) -> usize { 1 }
        fn n_orb(&self) -> usize { 2 }
        fn lat_vecs(&self) -> nd::Array2<f64> { nd::array![[1.0]] }
        fn orb_positions(&self) -> nd::Array2<f64> {
            nd::array![[0.0], [0.5]]
        }
        fn hamiltonian(&self, kpt: nd::ArrayView1<f64>) -> nd::Array2<C64> {
            let k = kpt[0];
            let h01 = self.v * C64::cis(TAU * 0.5 * k)
                + self.w * C64::cis(-TAU * 0.5 * k);
            nd::array![
                [C64::new(0.0, 0.0), h01],
                [h01.conj(), C64::new(0.0, 0.0)],
            ]
        }
    }

    fn setup() -> (Lattice, KMesh, NbrTable, BlochSet) {
        let model = Chain { v: 1.5, w: 0.5 };
        let lattice = Lattice::new(
            model.lat_vecs(), model.orb_positions()).unwrap();
        let mesh = KMesh::new(&[8]).unwrap();
        let nbr = mesh.nbr_table(&lattice).unwrap();
        let states = BlochSet::solve(&model, &lattice, &mesh, &nbr).unwrap();
        (lattice, mesh, nbr, states)
    }

    #[test]
    fn solve_yields_sorted_full_band_set() {
        let (_, mesh, nbr, states) = setup();
        assert_eq!(states.n_states(), 2);
        assert_eq!(states.n_occ(), 1);
        assert_eq!(states.overlap().dim(), (8, nbr.n_nbrs(), 2, 2));
        let e = states.energies().unwrap();
        for k in 0..mesh.nk() {
            assert!(e[[k, 0]] <= e[[k, 1]]);
            assert!(e[[k, 0]] < 0.0 && e[[k, 1]] > 0.0);
        }
        assert!(states.hamk().is_some());
    }

    #[test]
    fn band_projector_is_hermitian_and_idempotent() {
        let (_, mesh, _, states) = setup();
        for k in 0..mesh.nk() {
            let p = states.proj().index_axis(nd::Axis(0), k).to_owned();
            let p_dag = p.t().mapv(|z| z.conj());
            let p2 = p.dot(&p);
            for i in 0..2 {
                for j in 0..2 {
                    assert!((p[[i, j]] - p_dag[[i, j]]).norm() < 1e-12);
                    assert!((p2[[i, j]] - p[[i, j]]).norm() < 1e-12);
                }
            }
            // a full band set spans every orbital, so the neighbor
            // complement vanishes
            let q = states.q_nbr(k, 0);
            assert!(q.iter().all(|z| z.norm() < 1e-12));
        }
    }

    #[test]
    fn gauge_roundtrip_between_cell_periodic_and_bloch() {
        let (lattice, mesh, nbr, states) = setup();
        let rebuilt = BlochSet::from_states(
            states.psi().to_owned(),
            Gauge::Bloch,
            &lattice, &mesh, &nbr,
        ).unwrap();
        let diff = (&rebuilt.u() - &states.u())
            .iter()
            .fold(0.0_f64, |acc, z| acc.max(z.norm()));
        assert!(diff < 1e-13);
    }

    #[test]
    fn overlap_magnitudes_are_gauge_invariant() {
        let (lattice, mesh, nbr, states) = setup();
        // rotate the two states into each other with a k-dependent phase
        // mix; |M| sums must not change
        let mut rotated = states.u().to_owned();
        for k in 0..mesh.nk() {
            let th = 0.3 * k as f64;
            let (c, s) = (th.cos(), th.sin());
            let w = nd::array![
                [C64::new(c, 0.0), C64::new(0.0, s)],
                [C64::new(0.0, s), C64::new(c, 0.0)],
            ];
            let uk = states.u().index_axis(nd::Axis(0), k).to_owned();
            rotated.index_axis_mut(nd::Axis(0), k).assign(&w.dot(&uk));
        }
        let rot = BlochSet::from_states(
            rotated, Gauge::CellPeriodic, &lattice, &mesh, &nbr).unwrap();
        let sum = |m: nd::ArrayView4<C64>| -> f64 {
            m.iter().map(|z| z.norm_sqr()).sum()
        };
        assert!((sum(states.overlap()) - sum(rot.overlap())).abs() < 1e-10);
    }

    #[test]
    fn rejects_mismatched_state_shape() {
        let (lattice, mesh, nbr, _) = setup();
        let bad: nd::Array3<C64> = nd::Array3::zeros((8, 2, 3));
        assert!(matches!(
            BlochSet::from_states(
                bad, Gauge::CellPeriodic, &lattice, &mesh, &nbr),
            Err(WannierError::StateShape { .. }),
        ));
    }
}
