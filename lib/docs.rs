//! Theoretical background.
//!
//! # Contents
//! - [Background](#background)
//! - [Finite-difference mesh geometry](#finite-difference-mesh-geometry)
//! - [Spread functional](#spread-functional)
//! - [Subspace selection](#subspace-selection)
//! - [Gauge optimization](#gauge-optimization)
//!
//! # Background
//! The eigenstates of a periodic Hamiltonian are Bloch states
//! ```text
//! ψ_{n,k}(r) = e^{i k·r} u_{n,k}(r)
//! ```
//! with *u* cell-periodic. In a tight-binding representation both gauges
//! reduce to complex amplitude vectors over the home-cell orbitals, related
//! by the per-orbital phase `exp(i 2π k·τ)` where *τ* is the orbital
//! position in reduced coordinates.
//!
//! A Wannier function is the lattice Fourier transform of a Bloch band,
//! ```text
//!            1
//! |R n⟩  =  ---  Σ_k e^{-i k·R} |ψ_{n,k}⟩
//!           N_k
//! ```
//! Because any k-dependent unitary mixing of the states (a *gauge*
//! transformation) leaves the spanned space invariant while changing every
//! individual |R n⟩, Wannier functions are massively non-unique. The
//! maximally localized choice of Marzari and Vanderbilt[^1] fixes the gauge
//! by minimizing the total quadratic spread
//! ```text
//! Ω = Σ_n ( ⟨r²⟩_n - ⟨r⟩_n² )
//! ```
//!
//! # Finite-difference mesh geometry
//! All position moments are evaluated from overlaps between cell-periodic
//! states at neighboring mesh points,
//! ```text
//! M_mn(k, b) = ⟨u_{m,k} | u_{n,k+b}⟩
//! ```
//! where the offsets *b* run over shells of equal distance and carry
//! weights *w_b* satisfying the completeness condition
//! ```text
//! Σ_b w_b b_α b_β = δ_αβ
//! ```
//! solved here by least squares over the requested shell count. When `k+b`
//! leaves the sampled zone the wrapped state is patched by the phase
//! `exp(-i 2π τ·G)` of the crossed reciprocal vector *G*, which is exactly
//! the periodic-gauge condition `u_{n,k+G} = u_{n,k} e^{-i G·r}`.
//!
//! # Spread functional
//! With those ingredients the center and second moment of each Wannier
//! function follow from the diagonal overlaps,
//! ```text
//! ⟨r⟩_n  = -(1/N_k) Σ_{k,b} w_b  Im ln M_nn(k, b)  b
//! ⟨r²⟩_n =  (1/N_k) Σ_{k,b} w_b [ 1 - |M_nn|² + (Im ln M_nn)² ]
//! ```
//! and the spread splits as `Ω = Ω_I + Ω̃` into a gauge-invariant part
//! ```text
//! Ω_I = (1/N_k) Σ_{k,b} w_b [ N - Σ_{mn} |M_mn|² ]
//! ```
//! and a gauge-dependent remainder Ω̃. Ω_I measures how much the occupied
//! subspace changes between neighboring mesh points; Ω̃ measures how badly
//! the individual states are aligned within that subspace.
//!
//! # Subspace selection
//! When the target states must be carved out of a larger manifold, the
//! disentanglement procedure of Souza, Marzari, and Vanderbilt[^2]
//! minimizes Ω_I alone: at every mesh point the M-dimensional subspace with
//! the largest overlap onto the neighbor-averaged projector
//! ```text
//! P̄(k) = Σ_b w_b P(k+b)
//! ```
//! is selected by diagonalizing `Z = ⟨outer| P̄ |outer⟩` and keeping the
//! leading eigenvectors, iterating to self-consistency. States inside a
//! frozen window are excluded from the rotation and re-attached verbatim;
//! a mixing factor α ∈ (0, 1] damps the projector update when the plain
//! iteration oscillates.
//!
//! # Gauge optimization
//! The remaining spread Ω̃ is minimized by gradient descent on the manifold
//! of per-k unitaries. Writing `R = M ⊙ conj(diag M)` and
//! `T = (M / diag M) ⊙ q` with `q_n = Im ln M_nn + b·⟨r⟩_n`, the
//! Riemannian gradient is the anti-Hermitian matrix
//! ```text
//! G(k) = 4 Σ_b w_b ( A[R] - S[T] )
//! A[X] = (X - Xᴴ)/2,   S[X] = (X + Xᴴ)/2i
//! ```
//! and each step applies `U(k) ← U(k) · exp(η ε G(k))`. Since *G* is
//! anti-Hermitian, the exponential is evaluated through the Hermitian
//! eigendecomposition of *iG*, which cannot run into defective-matrix
//! trouble. The overlap matrix is rotated as `Uᴴ(k)·M⁰(k,b)·U(k+b)` with
//! the neighbor unitary read through the wrapped mesh index.
//!
//! [^1]: N. Marzari and D. Vanderbilt, "Maximally localized generalized
//!     Wannier functions for composite energy bands", Phys. Rev. B **56**,
//!     12847 (1997).
//!
//! [^2]: I. Souza, N. Marzari, and D. Vanderbilt, "Maximally localized
//!     Wannier functions for entangled energy bands", Phys. Rev. B **65**,
//!     035109 (2001).
