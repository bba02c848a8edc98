use thiserror::Error;

/// Failures the equilibrium engine can report
///
/// * Configuration errors are raised once, at construction or setup, and are never retried
/// * Equilibrium errors are fatal for one solve attempt; the caller decides whether to fall back
/// * Numerical errors come from the dense linear algebra inside the optimisers
///
/// Convergence failures (Picard cap, li cap, optimiser cap) are **not** errors; they are reported
/// through the `converged` flag of the corresponding result object.
#[derive(Debug, Error)]
pub enum EquilibriaError {
    // Configuration errors
    #[error("invalid boundary condition selector: '{0}' (expected 'free' or 'fixed')")]
    InvalidBoundary(String),

    #[error("invalid vertical control selector: '{0}' (expected 'virtual', 'feedback' or 'none')")]
    InvalidVerticalControl(String),

    #[error("vertical control '{0}' is not implemented")]
    VerticalControlNotImplemented(String),

    #[error("current bounds have length {n_bounds} but there are {n_control} control coils")]
    CurrentBoundsLength { n_bounds: usize, n_control: usize },

    #[error("Grad-Shafranov operator is singular (LAPACK dgbtrf info = {info})")]
    SingularOperator { info: i32 },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    #[error("duplicate coil name: '{0}'")]
    DuplicateCoilName(String),

    #[error("coil '{name}' is incorrectly sized: {reason}")]
    CoilSize { name: String, reason: String },

    #[error("unknown coil: '{0}'")]
    UnknownCoil(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("{what}: expected length {expected}, found {found}")]
    ArrayLength { what: String, expected: usize, found: usize },

    // Equilibrium errors
    #[error("no O-point found in the flux map")]
    NoOPoint,

    #[error("an internal inductance target is required but has not been set")]
    LiTargetUnset,

    #[error("normalised flux {0} is outside [0, 1]")]
    PsiNormOutOfRange(f64),

    #[error("no closed flux surface found at psi_n = {0}")]
    NoFluxSurface(f64),

    #[error("profile cannot be normalised: {0}")]
    ProfileDegenerate(String),

    // Numerical errors
    #[error("linear solve failed: {0}")]
    LinearSolve(String),

    // Record and settings files
    #[error("record file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EquilibriaResult<T> = Result<T, EquilibriaError>;

#[test]
fn test_error_messages() {
    let error: EquilibriaError = EquilibriaError::CurrentBoundsLength { n_bounds: 3, n_control: 5 };
    assert_eq!(error.to_string(), "current bounds have length 3 but there are 5 control coils");

    let error: EquilibriaError = EquilibriaError::InvalidBoundary("periodic".to_string());
    assert!(error.to_string().contains("'periodic'"));
}

#[test]
fn test_json_and_io_errors_convert() {
    let parse = || -> EquilibriaResult<Vec<f64>> {
        let values: Vec<f64> = serde_json::from_str("[1.0, oops]")?;
        return Ok(values);
    };
    assert!(matches!(parse(), Err(EquilibriaError::Json(_))));

    let read = || -> EquilibriaResult<String> {
        let text: String = std::fs::read_to_string("/nonexistent/equilibria_rs/record.json")?;
        return Ok(text);
    };
    let error: EquilibriaError = read().expect_err("missing file");
    assert!(matches!(error, EquilibriaError::Io(_)));
    assert!(error.to_string().starts_with("record file error"));
}
