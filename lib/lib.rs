#![allow(dead_code, non_snake_case)]

//! Constructs maximally localized Wannier functions for periodic
//! tight-binding models sampled on a regular reciprocal-space mesh.
//!
//! Starting from a Bloch Hamiltonian supplied by an external model (see
//! [`model::TightBinding`]), the crate
//! - builds the mesh, its nearest-neighbor shells, finite-difference
//!   weights, and Brillouin-zone boundary phases ([`kmesh`]);
//! - diagonalizes the model on the mesh and derives nearest-neighbor
//!   overlap matrices and band projectors ([`bloch`]);
//! - seeds localized states by Löwdin projection onto trial functions,
//!   optionally disentangles an optimal subspace minimizing the
//!   gauge-invariant spread Ω_I, and gradient-descends on the manifold of
//!   per-k unitaries to minimize the gauge-dependent spread Ω̃
//!   ([`wannier`]);
//! - Fourier transforms the result to home-cell Wannier functions and
//!   evaluates the Marzari-Vanderbilt spread decomposition ([`spread`]).
//!
//! See [`docs`] for theoretical background.

pub mod error;
pub mod lattice;
pub mod model;
pub mod kmesh;
pub mod bloch;
pub mod trial;
pub mod spread;
pub mod wannier;
pub mod bands;
pub mod utils;

pub mod docs;

/// Default convergence tolerance for the iterative minimizers.
pub(crate) const DEF_TOL: f64 = 1e-10;
/// Default iteration budget for the iterative minimizers.
pub(crate) const DEF_MAXITERS: usize = 1000;
/// Default gradient-descent step size for the gauge optimizer.
pub(crate) const DEF_STEP: f64 = 1e-3;
/// Default projector mixing factor for subspace selection (1 = undamped).
pub(crate) const DEF_MIXING: f64 = 1.0;
/// Decimal precision used to group neighbor shells by squared distance.
pub(crate) const SHELL_ROUND_DP: i32 = 8;

pub type Arr1<S> = ndarray::ArrayBase<S, ndarray::Ix1>;
pub type Arr2<S> = ndarray::ArrayBase<S, ndarray::Ix2>;
pub type Arr3<S> = ndarray::ArrayBase<S, ndarray::Ix3>;

pub use error::{ WResult, WannierError };
pub use lattice::Lattice;
pub use model::TightBinding;
pub use kmesh::{ KMesh, NbrTable, Shell };
pub use bloch::{ BlochSet, Gauge };
pub use trial::{ TrialFn, Trials };
pub use spread::Spread;
pub use bands::KPath;
pub use wannier::{
    GaugeOpts,
    GaugeReport,
    SubspaceOpts,
    SubspaceReport,
    Wannier,
    Window,
};
