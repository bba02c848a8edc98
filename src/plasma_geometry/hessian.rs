/// Kind of stationary point of the flux, from the Hessian
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StationaryKind {
    /// Both curvatures have the same sign: maximum or minimum, a magnetic axis candidate
    OPoint,
    /// Curvatures have opposite signs: saddle, a separatrix candidate
    XPoint,
    /// Determinant too close to zero to decide
    Degenerate,
}

/// Calculates the Hessian determinant and trace for the poloidal flux function `psi`:
/// * det(Hessian(R, Z)) > 0: Both curvatures have the same sign ⇒ turning point (minimum or maximum)
///     * trace > 0: Minimum
///     * trace < 0: Maximum
/// * det(Hessian(R, Z)) < 0: Curvatures have opposite signs ⇒ saddle point
///
/// # Arguments
/// * `d2_psi_d_r2` - weber / radian / metre^2
/// * `d2_psi_d_z2` - weber / radian / metre^2
/// * `d2_psi_d_r_d_z` - weber / radian / metre^2
///
/// # Returns
/// * `(determinant, trace)`
///
/// # Example
/// ```
/// use equilibria_rs::plasma_geometry::hessian;
///
/// let (hessian_det, hessian_trace): (f64, f64) = hessian(-1.0, -2.0, 0.5);
/// assert!(hessian_det > 0.0 && hessian_trace < 0.0); // local maximum
/// ```
pub fn hessian(d2_psi_d_r2: f64, d2_psi_d_z2: f64, d2_psi_d_r_d_z: f64) -> (f64, f64) {
    let hessian_det: f64 = d2_psi_d_r2 * d2_psi_d_z2 - d2_psi_d_r_d_z.powi(2);
    let hessian_trace: f64 = d2_psi_d_r2 + d2_psi_d_z2;
    return (hessian_det, hessian_trace);
}

/// Classify a stationary point
///
/// The determinant is compared against the product of the diagonal magnitudes, so the test does not depend on the flux units.
pub fn classify_stationary_point(d2_psi_d_r2: f64, d2_psi_d_z2: f64, d2_psi_d_r_d_z: f64) -> StationaryKind {
    let (hessian_det, _hessian_trace): (f64, f64) = hessian(d2_psi_d_r2, d2_psi_d_z2, d2_psi_d_r_d_z);
    let scale: f64 = (d2_psi_d_r2 * d2_psi_d_z2).abs() + d2_psi_d_r_d_z.powi(2);
    if scale == 0.0 || hessian_det.abs() < 1e-12 * scale {
        return StationaryKind::Degenerate;
    }
    if hessian_det > 0.0 {
        return StationaryKind::OPoint;
    }
    return StationaryKind::XPoint;
}

#[test]
fn test_classify_stationary_point() {
    assert_eq!(classify_stationary_point(-1.0, -3.0, 0.2), StationaryKind::OPoint);
    assert_eq!(classify_stationary_point(2.0, 1.0, 0.0), StationaryKind::OPoint);
    assert_eq!(classify_stationary_point(1.0, -1.0, 0.0), StationaryKind::XPoint);
    assert_eq!(classify_stationary_point(1.0, 1.0, 2.0), StationaryKind::XPoint);
    assert_eq!(classify_stationary_point(0.0, 0.0, 0.0), StationaryKind::Degenerate);
}
