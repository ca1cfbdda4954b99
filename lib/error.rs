//! Collection of all error types.
//!
//! All errors derive [`thiserror::Error`], making them composable when allowed
//! and compatible with application code using [`anyhow`][anyhow].
//!
//! Validation failures are fatal and surface immediately as `Err`; purely
//! numerical trouble inside the iterative minimizers (spread increasing,
//! gradient growing, budget exhaustion) is reported through [`log`] and never
//! aborts a running optimization.
//!
//! [anyhow]: https://crates.io/crates/anyhow

use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Returned when lattice geometry cannot be constructed.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// Returned when the lattice matrix is not square.
    #[error("lattice matrix must be square; got {0}x{1}")]
    NotSquare(usize, usize),

    /// Returned when orbital positions do not match the lattice dimension.
    #[error("orbital positions have {got} components; lattice dimension is {expected}")]
    OrbDim { expected: usize, got: usize },

    /// Returned when the lattice matrix cannot be inverted to form
    /// reciprocal vectors.
    #[error("lattice matrix is singular: {0}")]
    Singular(#[from] LinalgError),
}

/// Returned when a reciprocal-space mesh cannot be built or cannot support a
/// requested neighbor-shell count.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Returned when no periodic axes are given.
    #[error("mesh must have at least one periodic axis")]
    Empty,

    /// Returned when an axis has too few points for the requested shell
    /// structure.
    #[error("mesh axis {axis} has {len} points; at least {min} are required")]
    TooFew { axis: usize, len: usize, min: usize },

    /// Returned when fewer distinct neighbor distances exist than requested
    /// shells.
    #[error("mesh supports only {found} distinct neighbor shells; {requested} requested")]
    ShellCount { requested: usize, found: usize },

    /// Returned when a k-path is sampled with too few points for its node
    /// list.
    #[error("k-path over {nodes} nodes needs at least {min} sampling points; got {got}")]
    PathPoints { nodes: usize, min: usize, got: usize },

    /// Returned when k-path nodes do not match the lattice dimension.
    #[error("k-path nodes have {got} components; lattice dimension is {expected}")]
    PathDim { expected: usize, got: usize },
}

impl MeshError {
    pub(crate) fn check_axes(nks: &[usize], min: usize) -> Result<(), Self> {
        if nks.is_empty() { return Err(Self::Empty); }
        for (axis, &len) in nks.iter().enumerate() {
            if len < min { return Err(Self::TooFew { axis, len, min }); }
        }
        Ok(())
    }
}

/// Returned when a trial-wavefunction specification is malformed.
#[derive(Debug, Error)]
pub enum TrialError {
    /// Returned when no trial functions are specified.
    #[error("at least one trial function is required")]
    NoFunctions,

    /// Returned when a trial function references an orbital outside the
    /// model.
    #[error("trial function {trial} references site {site}; model has {n_orb} orbitals")]
    SiteOutOfRange { trial: usize, site: usize, n_orb: usize },

    /// Returned when a trial function has zero total weight and cannot be
    /// normalized.
    #[error("trial function {trial} has zero weight")]
    ZeroWeight { trial: usize },
}

/// Returned when an outer/inner window specification cannot be resolved
/// against the solved band structure.
#[derive(Debug, Error)]
pub enum WindowError {
    /// Returned when an explicit band index exceeds the number of solved
    /// bands.
    #[error("band index {band} out of range; {n_states} bands are available")]
    BandOutOfRange { band: usize, n_states: usize },

    /// Returned when a window holds fewer states than the target subspace at
    /// some mesh point.
    #[error("window holds {got} states at mesh point {k_index}; {need} are required")]
    TooNarrow { k_index: usize, need: usize, got: usize },

    /// Returned when a frozen (inner) window is not contained in the outer
    /// window.
    #[error("frozen window is not contained in the outer window at mesh point {k_index}")]
    FrozenOutsideOuter { k_index: usize },

    /// Returned when a frozen window is larger than the target subspace at
    /// some mesh point.
    #[error("frozen window holds {got} states at mesh point {k_index}; at most {max} fit the target subspace")]
    FrozenTooLarge { k_index: usize, got: usize, max: usize },
}

/// Returned from the Wannierization engine and the Bloch-state container.
#[derive(Debug, Error)]
pub enum WannierError {
    /// [`LatticeError`]
    #[error("lattice error: {0}")]
    Lattice(#[from] LatticeError),

    /// [`MeshError`]
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    /// [`TrialError`]
    #[error("trial-function error: {0}")]
    Trial(#[from] TrialError),

    /// [`WindowError`]
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Returned when the model's diagonalizer yields a band count
    /// inconsistent with its orbital count.
    #[error("model produced {got} bands at mesh point {k_index}; expected {expected}")]
    BandCount { k_index: usize, got: usize, expected: usize },

    /// Returned when an operation needs working states that have not been
    /// installed yet.
    #[error("no working states have been set; run a projection first")]
    MissingStates,

    /// Returned when a state array does not match the mesh/orbital layout.
    #[error("state array has shape {got:?}; expected [{nk}, _, {n_orb}]")]
    StateShape { nk: usize, n_orb: usize, got: Vec<usize> },

    /// Returned when the number of trial functions does not match an
    /// operation's expected subspace size.
    #[error("{n_trial} trial functions cannot project onto {n_bands} bands")]
    TrialCount { n_trial: usize, n_bands: usize },

    /// Returned when a real-space quantity is requested for an unsupported
    /// mesh dimension.
    #[error("real-space spread is implemented for 2-D meshes only; got {0} periodic axes")]
    RealSpaceDim(usize),

    /// [`LinalgError`]
    #[error("linalg error: {0}")]
    Linalg(#[from] LinalgError),
}

impl WannierError {
    pub(crate) fn check_bands(k_index: usize, got: usize, expected: usize)
        -> Result<(), Self>
    {
        (got == expected).then_some(())
            .ok_or(Self::BandCount { k_index, got, expected })
    }
}

pub type WResult<T> = Result<T, WannierError>;
