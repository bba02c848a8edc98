use super::analysis::{CoilSummary, PlasmaSummary, analyse_coils};
use super::controller::VirtualController;
use super::settings::{Boundary, EquilibriumSettings, VerticalControl};
use super::snapshot::Snapshot;
use super::state::MagneticState;
use crate::cache::{LazyCache, next_generation};
use crate::coils::{Coil, CoilSelection, CoilSet, CoilType};
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grad_shafranov::{FreeBoundaryKernel, GsSolver};
use crate::grid::Grid;
use crate::limiter::Limiter;
use crate::plasma_geometry::{
    CoreRegion, CriticalPoint, CriticalPoints, FluxSurface, FluxSurfaceGeometry, LCFS_PSI_NORM, PsiGradients, find_core_region, find_critical_points, find_flux_surface,
    find_separatrix, interpolate_map, interpolate_map_at, nudge_psi_norm, psi_curvatures, psi_gradients,
};
use crate::profiles::{LiOptimisationResult, Profile, masked_psi_norm, optimise_li};
use log::{debug, info};
use ndarray::{Array1, Array2};
use ndarray_stats::QuantileExt;
use std::sync::Arc;

const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;
const PI: f64 = std::f64::consts::PI;

/// Half-widths of the coil standing in for the plasma outside the grid, in grid cells
const PLASMA_COIL_CELLS: f64 = 5.0;

/// Factorised Grad-Shafranov operator and free-boundary kernel of one grid
///
/// Both are expensive to build and depend only on the grid, so equilibria on the same grid share them.
#[derive(Debug)]
pub struct GridOperators {
    solver: GsSolver,
    kernel: Option<FreeBoundaryKernel>,
}

impl GridOperators {
    pub fn new(grid: &Grid, boundary: Boundary) -> EquilibriaResult<Self> {
        let solver: GsSolver = GsSolver::new(grid)?;
        let kernel: Option<FreeBoundaryKernel> = match boundary {
            Boundary::Free => Some(FreeBoundaryKernel::new(grid)),
            Boundary::Fixed => None,
        };
        return Ok(GridOperators { solver, kernel });
    }

    pub fn boundary(&self) -> Boundary {
        return match self.kernel {
            Some(_) => Boundary::Free,
            None => Boundary::Fixed,
        };
    }

    /// Plasma flux produced by a toroidal current density
    ///
    /// Solves Δ*ψ = -μ0 R jtor, with the edge flux from the Green's functions (free boundary) or zero (fixed boundary).
    pub fn solve_plasma_psi(&self, grid: &Grid, jtor: &Array2<f64>) -> EquilibriaResult<Array2<f64>> {
        let mut rhs: Array2<f64> = -MU_0 * grid.mesh_r() * jtor;
        match &self.kernel {
            Some(kernel) => kernel.apply(&mut rhs, jtor),
            None => {
                for (i_z, i_r) in grid.edge_nodes() {
                    rhs[[i_z, i_r]] = 0.0;
                }
            }
        }
        return self.solver.solve(&rhs);
    }
}

/// Gaussian bump used to seed the first solve, zero on the grid edge
pub fn initial_psi(grid: &Grid) -> Array2<f64> {
    let r_max: f64 = grid.r_max();
    let z_min: f64 = grid.z_min();
    let z_range: f64 = grid.z_max() - grid.z_min();
    let mut psi: Array2<f64> = Array2::from_shape_fn((grid.n_z(), grid.n_r()), |(i_z, i_r)| {
        let r_n: f64 = grid.r()[i_r] / r_max - 0.5;
        let z_n: f64 = (grid.z()[i_z] - z_min) / z_range - 0.5;
        100.0 * (-(r_n * r_n + z_n * z_n) / 0.1).exp()
    });
    for (i_z, i_r) in grid.edge_nodes() {
        psi[[i_z, i_r]] = 0.0;
    }
    return psi;
}

/// A free- or fixed-boundary plasma equilibrium
///
/// Owns the grid, coil set, profile and plasma flux. Derived quantities (total flux, fields, critical points, core
/// region) are computed on demand and cached against the generation stamps of the plasma, the coil set and the
/// vertical controller, so changing any of them invalidates exactly what depends on it.
#[derive(Clone, Debug)]
pub struct Equilibrium {
    grid: Grid,
    coilset: CoilSet,
    profile: Box<dyn Profile>,
    limiter: Option<Limiter>,
    settings: EquilibriumSettings,
    controller: Option<VirtualController>,
    operators: Arc<GridOperators>,

    psi_plasma: Array2<f64>,
    jtor: Array2<f64>,
    i_p: f64,
    generation: u64,

    // Response of every grid node to every coil, per ampere, shape = (n_nodes, n_coils)
    coil_psi_table: LazyCache<u64, Array2<f64>>,
    coil_field_tables: LazyCache<u64, (Array2<f64>, Array2<f64>)>,
    psi_total: LazyCache<(u64, u64, u64), Array2<f64>>,
    plasma_field: LazyCache<u64, (Array2<f64>, Array2<f64>)>,
    critical_points: LazyCache<(u64, u64, u64), CriticalPoints>,
    core_region: LazyCache<(u64, u64, u64), CoreRegion>,
    plasma_coil: LazyCache<u64, Option<Coil>>,
}

impl Equilibrium {
    /// Create an equilibrium seeded with a Gaussian flux bump
    ///
    /// # Errors
    /// * `EquilibriaError::SingularOperator` if the Grad-Shafranov operator cannot be factorised
    pub fn new(grid: Grid, coilset: CoilSet, profile: Box<dyn Profile>, limiter: Option<Limiter>, settings: EquilibriumSettings) -> EquilibriaResult<Self> {
        let operators: Arc<GridOperators> = Arc::new(GridOperators::new(&grid, settings.boundary)?);
        return Equilibrium::with_operators(grid, coilset, profile, limiter, settings, operators);
    }

    /// Create an equilibrium reusing operators already built for this grid
    pub fn with_operators(
        grid: Grid,
        coilset: CoilSet,
        profile: Box<dyn Profile>,
        limiter: Option<Limiter>,
        settings: EquilibriumSettings,
        operators: Arc<GridOperators>,
    ) -> EquilibriaResult<Self> {
        let controller: Option<VirtualController> = match settings.vertical_control {
            VerticalControl::Virtual => Some(VirtualController::new(&grid, settings.controller_gain)?),
            VerticalControl::None => None,
        };
        let n_z: usize = grid.n_z();
        let n_r: usize = grid.n_r();

        let mut equilibrium: Equilibrium = Equilibrium {
            grid,
            coilset,
            profile,
            limiter,
            settings,
            controller,
            operators,
            psi_plasma: Array2::zeros((n_z, n_r)),
            jtor: Array2::zeros((n_z, n_r)),
            i_p: 0.0,
            generation: next_generation(),
            coil_psi_table: LazyCache::new(),
            coil_field_tables: LazyCache::new(),
            psi_total: LazyCache::new(),
            plasma_field: LazyCache::new(),
            critical_points: LazyCache::new(),
            core_region: LazyCache::new(),
            plasma_coil: LazyCache::new(),
        };

        // The seed is a total flux, so the coil contribution is removed from the plasma part
        let psi_plasma: Array2<f64> = initial_psi(&equilibrium.grid) - equilibrium.coil_psi() - equilibrium.controller_psi();
        equilibrium.psi_plasma = psi_plasma;
        equilibrium.generation = next_generation();
        return Ok(equilibrium);
    }

    /// Rebuild a working equilibrium from a snapshot
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        return Equilibrium {
            grid: snapshot.grid().clone(),
            coilset: snapshot.coilset().clone(),
            profile: snapshot.profile().clone_box(),
            limiter: snapshot.limiter().cloned(),
            settings: snapshot.settings().clone(),
            controller: snapshot.controller().cloned(),
            operators: snapshot.operators(),
            psi_plasma: snapshot.psi_plasma().clone(),
            jtor: snapshot.jtor().clone(),
            i_p: snapshot.i_p(),
            generation: next_generation(),
            coil_psi_table: LazyCache::new(),
            coil_field_tables: LazyCache::new(),
            psi_total: LazyCache::new(),
            plasma_field: LazyCache::new(),
            critical_points: LazyCache::new(),
            core_region: LazyCache::new(),
            plasma_coil: LazyCache::new(),
        };
    }

    /// Immutable copy of the current state
    pub fn snapshot(&self, label: &str) -> Snapshot {
        return Snapshot::new(
            label,
            self.grid.clone(),
            self.coilset.clone(),
            self.psi(),
            self.psi_plasma.clone(),
            self.jtor.clone(),
            self.i_p,
            (*self.get_ox_points(false)).clone(),
            self.profile.clone_box(),
            self.limiter.clone(),
            self.settings.clone(),
            self.controller.clone(),
            Arc::clone(&self.operators),
        );
    }

    pub fn profile(&self) -> &dyn Profile {
        return self.profile.as_ref();
    }

    pub fn profile_mut(&mut self) -> &mut dyn Profile {
        return self.profile.as_mut();
    }

    pub fn settings(&self) -> &EquilibriumSettings {
        return &self.settings;
    }

    pub fn label(&self) -> &str {
        return &self.settings.label;
    }

    pub fn controller(&self) -> Option<&VirtualController> {
        return self.controller.as_ref();
    }

    pub fn operators(&self) -> Arc<GridOperators> {
        return Arc::clone(&self.operators);
    }

    /// Flux from the plasma current alone, shape = (n_z, n_r)
    pub fn psi_plasma(&self) -> &Array2<f64> {
        return &self.psi_plasma;
    }

    /// Toroidal current density of the last solve, A/m^2
    pub fn jtor(&self) -> &Array2<f64> {
        return &self.jtor;
    }

    /// Plasma current of the last solve, ampere
    pub fn i_p(&self) -> f64 {
        return self.i_p;
    }

    /// Generation stamp of the plasma flux
    pub fn generation(&self) -> u64 {
        return self.generation;
    }

    fn psi_key(&self) -> (u64, u64, u64) {
        let controller_generation: u64 = self.controller.as_ref().map(|controller| controller.generation()).unwrap_or(0);
        return (self.generation, self.coilset.generation(), controller_generation);
    }

    fn grid_nodes(&self) -> (Array1<f64>, Array1<f64>) {
        let x: Array1<f64> = self.grid.mesh_r().iter().cloned().collect();
        let z: Array1<f64> = self.grid.mesh_z().iter().cloned().collect();
        return (x, z);
    }

    fn to_map(&self, values: Array1<f64>) -> Array2<f64> {
        return values
            .into_shape_with_order((self.grid.n_z(), self.grid.n_r()))
            .expect("Equilibrium::to_map: one value per grid node");
    }

    fn check_map_shape(&self, what: &str, map: &Array2<f64>) -> EquilibriaResult<()> {
        if map.dim() != (self.grid.n_z(), self.grid.n_r()) {
            return Err(EquilibriaError::ArrayLength {
                what: what.to_string(),
                expected: self.grid.n_nodes(),
                found: map.len(),
            });
        }
        return Ok(());
    }

    /// Flux from the coil set over the grid
    pub fn coil_psi(&self) -> Array2<f64> {
        let table: Arc<Array2<f64>> = self.coil_psi_table.get_or_compute(self.coilset.geometry_generation(), || {
            let (x, z): (Array1<f64>, Array1<f64>) = self.grid_nodes();
            self.coilset.psi_response(&x, &z, CoilSelection::All)
        });
        return self.to_map(table.dot(&self.coilset.get_currents()));
    }

    /// Flux from the vertical controller over the grid; zero without one
    pub fn controller_psi(&self) -> Array2<f64> {
        return match &self.controller {
            Some(controller) => controller.psi_map(&self.grid),
            None => Array2::zeros((self.grid.n_z(), self.grid.n_r())),
        };
    }

    /// Total flux over the grid, shape = (n_z, n_r)
    pub fn psi(&self) -> Array2<f64> {
        let psi: Arc<Array2<f64>> = self
            .psi_total
            .get_or_compute(self.psi_key(), || self.coil_psi() + self.controller_psi() + &self.psi_plasma);
        return (*psi).clone();
    }

    fn plasma_field_maps(&self) -> Arc<(Array2<f64>, Array2<f64>)> {
        return self.plasma_field.get_or_compute(self.generation, || {
            let gradients: PsiGradients = psi_gradients(&self.grid, &self.psi_plasma);
            let bx: Array2<f64> = -&gradients.d_psi_d_z / self.grid.mesh_r();
            let bz: Array2<f64> = &gradients.d_psi_d_r / self.grid.mesh_r();
            (bx, bz)
        });
    }

    /// Total (BR, BZ) over the grid
    fn field_maps(&self) -> (Array2<f64>, Array2<f64>) {
        let tables: Arc<(Array2<f64>, Array2<f64>)> = self.coil_field_tables.get_or_compute(self.coilset.geometry_generation(), || {
            let (x, z): (Array1<f64>, Array1<f64>) = self.grid_nodes();
            self.coilset.field_response(&x, &z, CoilSelection::All)
        });
        let currents: Array1<f64> = self.coilset.get_currents();
        let plasma: Arc<(Array2<f64>, Array2<f64>)> = self.plasma_field_maps();

        let mut bx: Array2<f64> = self.to_map(tables.0.dot(&currents)) + &plasma.0;
        let mut bz: Array2<f64> = self.to_map(tables.1.dot(&currents)) + &plasma.1;
        if let Some(controller) = &self.controller {
            let (x, z): (Array1<f64>, Array1<f64>) = self.grid_nodes();
            let (controller_bx, controller_bz): (Array1<f64>, Array1<f64>) = controller.field(&x, &z);
            bx = bx + self.to_map(controller_bx);
            bz = bz + self.to_map(controller_bz);
        }
        return (bx, bz);
    }

    /// Total radial field over the grid, tesla
    pub fn bx(&self) -> Array2<f64> {
        return self.field_maps().0;
    }

    /// Total vertical field over the grid, tesla
    pub fn bz(&self) -> Array2<f64> {
        return self.field_maps().1;
    }

    /// Total poloidal field magnitude over the grid, tesla
    pub fn bp(&self) -> Array2<f64> {
        let (bx, bz): (Array2<f64>, Array2<f64>) = self.field_maps();
        return ndarray::Zip::from(&bx).and(&bz).map_collect(|&bx, &bz| bx.hypot(bz));
    }

    /// Current centroid of the plasma: (sqrt(∫R² j dA / Ip), ∫Z j dA / Ip)
    ///
    /// The grid centre while there is no plasma current.
    pub fn effective_centre(&self) -> (f64, f64) {
        if self.i_p == 0.0 {
            return self.grid.centre();
        }
        let d_area: f64 = self.grid.d_area();
        let r_squared: f64 = (self.grid.mesh_r().mapv(|r| r * r) * &self.jtor).sum() * d_area / self.i_p;
        let z_c: f64 = (self.grid.mesh_z() * &self.jtor).sum() * d_area / self.i_p;
        return (r_squared.max(0.0).sqrt(), z_c);
    }

    /// Coil carrying the plasma current at the current centroid, used to evaluate plasma terms off the grid
    fn plasma_coil(&self) -> Arc<Option<Coil>> {
        return self.plasma_coil.get_or_compute(self.generation, || {
            if self.i_p == 0.0 {
                return None;
            }
            let (x_c, z_c): (f64, f64) = self.effective_centre();
            return Coil::new(x_c, z_c, PLASMA_COIL_CELLS * self.grid.d_r(), PLASMA_COIL_CELLS * self.grid.d_z())
                .ok()
                .map(|coil| {
                    coil.with_name("PLASMA")
                        .with_ctype(CoilType::Plasma)
                        .with_current(self.i_p)
                        .with_control(false)
                });
        });
    }

    /// Interpolate a plasma map at the points, falling back to the plasma coil outside the grid
    fn plasma_values_at<F>(&self, x: &Array1<f64>, z: &Array1<f64>, map: &Array2<f64>, outside: F) -> EquilibriaResult<Array1<f64>>
    where
        F: Fn(&Coil, &Array1<f64>, &Array1<f64>) -> Array1<f64>,
    {
        let mut values: Array1<f64> = interpolate_map(&self.grid, map, x, z)?;
        let i_outside: Vec<usize> = values.iter().enumerate().filter(|(_, value)| value.is_nan()).map(|(i_point, _)| i_point).collect();
        if i_outside.is_empty() {
            return Ok(values);
        }

        let x_outside: Array1<f64> = i_outside.iter().map(|&i_point| x[i_point]).collect();
        let z_outside: Array1<f64> = i_outside.iter().map(|&i_point| z[i_point]).collect();
        let outside_values: Array1<f64> = match self.plasma_coil().as_ref() {
            Some(coil) => outside(coil, &x_outside, &z_outside),
            None => Array1::zeros(i_outside.len()),
        };
        for (i_value, &i_point) in i_outside.iter().enumerate() {
            values[i_point] = outside_values[i_value];
        }
        return Ok(values);
    }

    fn presumed_axis(&self) -> (f64, f64) {
        return self.effective_centre();
    }

    /// O-points and X-points of the total flux
    ///
    /// # Arguments
    /// * `force_update` - discard the cached result and search again
    pub fn get_ox_points(&self, force_update: bool) -> Arc<CriticalPoints> {
        if force_update {
            self.critical_points.clear();
        }
        return self.critical_points.get_or_compute(self.psi_key(), || {
            let psi: Array2<f64> = self.psi();
            let critical_points: CriticalPoints = find_critical_points(&self.grid, &psi, self.limiter.as_ref(), Some(self.presumed_axis()));
            debug!(
                "Equilibrium::get_ox_points: {} O-points, {} X-points",
                critical_points.o_points().len(),
                critical_points.x_points().len()
            );
            critical_points
        });
    }

    pub fn is_double_null(&self) -> bool {
        return self.get_ox_points(false).is_double_null();
    }

    fn primary_o_point(&self) -> EquilibriaResult<CriticalPoint> {
        return self.get_ox_points(false).primary_o_point().ok_or(EquilibriaError::NoOPoint);
    }

    /// Core region of an arbitrary flux map on this equilibrium's grid and limiter
    fn core_region_of(&self, psi: &Array2<f64>) -> EquilibriaResult<CoreRegion> {
        let critical_points: CriticalPoints = find_critical_points(&self.grid, psi, self.limiter.as_ref(), Some(self.presumed_axis()));
        return find_core_region(&self.grid, psi, &critical_points, self.limiter.as_ref());
    }

    /// Axis and boundary flux and the mask of the confined plasma
    pub fn core_region(&self) -> EquilibriaResult<Arc<CoreRegion>> {
        return self.core_region.try_get_or_compute(self.psi_key(), || {
            let critical_points: Arc<CriticalPoints> = self.get_ox_points(false);
            find_core_region(&self.grid, &self.psi(), &critical_points, self.limiter.as_ref())
        });
    }

    /// Normalised flux over the grid, 0 on axis and 1 on the boundary
    pub fn psi_norm(&self) -> EquilibriaResult<Array2<f64>> {
        return Ok(self.core_region()?.psi_norm(&self.psi()));
    }

    /// Plasma pressure over the grid, pascal, zero outside the core
    pub fn pressure_map(&self) -> EquilibriaResult<Array2<f64>> {
        let core: Arc<CoreRegion> = self.core_region()?;
        let psi_n: Array1<f64> = masked_psi_norm(&self.psi(), &core).iter().cloned().collect();
        return Ok(self.to_map(self.profile.pressure(&psi_n)) * &core.mask);
    }

    /// Solve for the plasma flux
    ///
    /// Without `jtor`, the current density is evaluated from the profile on `psi` (default: the current total
    /// flux). After the solve, the vertical controller (if any) takes one feedback step.
    ///
    /// # Errors
    /// * `EquilibriaError::NoOPoint` if the flux used for the profile has no magnetic axis
    /// * `EquilibriaError::ArrayLength` if `jtor` or `psi` does not match the grid
    pub fn solve(&mut self, jtor: Option<Array2<f64>>, psi: Option<&Array2<f64>>) -> EquilibriaResult<()> {
        let jtor: Array2<f64> = match jtor {
            Some(jtor) => {
                self.check_map_shape("Equilibrium::solve: jtor", &jtor)?;
                jtor
            }
            None => match psi {
                Some(psi) => {
                    self.check_map_shape("Equilibrium::solve: psi", psi)?;
                    let core: CoreRegion = self.core_region_of(psi)?;
                    self.profile.jtor(&self.grid, psi, &core)?
                }
                None => {
                    let psi: Array2<f64> = self.psi();
                    let core: Arc<CoreRegion> = self.core_region()?;
                    self.profile.jtor(&self.grid, &psi, &core)?
                }
            },
        };
        return self.update_plasma(jtor);
    }

    fn update_plasma(&mut self, jtor: Array2<f64>) -> EquilibriaResult<()> {
        let psi_plasma: Array2<f64> = self.operators.solve_plasma_psi(&self.grid, &jtor)?;
        self.i_p = jtor.sum() * self.grid.d_area();
        self.jtor = jtor;
        self.psi_plasma = psi_plasma;
        self.generation = next_generation();
        debug!("Equilibrium::update_plasma: Ip = {:.4e} A", self.i_p);

        let centre: (f64, f64) = self.effective_centre();
        if let Some(controller) = &mut self.controller {
            controller.stabilise(&self.coilset, centre)?;
        }
        return Ok(());
    }

    /// Replace the plasma flux directly, keeping the current density
    pub fn set_plasma_psi(&mut self, psi_plasma: Array2<f64>) -> EquilibriaResult<()> {
        self.check_map_shape("Equilibrium::set_plasma_psi", &psi_plasma)?;
        self.psi_plasma = psi_plasma;
        self.generation = next_generation();
        return Ok(());
    }

    /// Replace the plasma flux and current density, for example when loading a record
    pub(crate) fn set_plasma_state(&mut self, psi_plasma: Array2<f64>, jtor: Array2<f64>) -> EquilibriaResult<()> {
        self.check_map_shape("Equilibrium::set_plasma_state: jtor", &jtor)?;
        self.i_p = jtor.sum() * self.grid.d_area();
        self.jtor = jtor;
        return self.set_plasma_psi(psi_plasma);
    }

    /// Solve while adjusting the profile's current shape to match the internal inductance target
    ///
    /// Every trial shape is evaluated against the same flux `psi` (default: the current total flux) and core.
    /// The equilibrium is left solved at the best coefficients found.
    ///
    /// # Errors
    /// * `EquilibriaError::LiTargetUnset` if the settings have no li target
    /// * `EquilibriaError::ProfileDegenerate` if the profile has no adjustable shape
    pub fn solve_li(&mut self, psi: Option<&Array2<f64>>) -> EquilibriaResult<LiOptimisationResult> {
        let li_target: f64 = self.settings.li_target.ok_or(EquilibriaError::LiTargetUnset)?;
        let (x0, bounds): (Array1<f64>, (f64, f64)) = match self.profile.shape() {
            Some(shape) => (shape.shape_coefficients(), shape.coefficient_bounds()),
            None => return Err(EquilibriaError::ProfileDegenerate("profile has no adjustable current shape".to_string())),
        };
        let psi_guess: Array2<f64> = match psi {
            Some(psi) => {
                self.check_map_shape("Equilibrium::solve_li: psi", psi)?;
                psi.clone()
            }
            None => self.psi(),
        };
        let core: CoreRegion = self.core_region_of(&psi_guess)?;
        let li_settings = self.settings.li_settings.clone();

        let result: LiOptimisationResult = optimise_li(li_target, &x0, bounds, &li_settings, |coefficients| {
            self.solve_with_shape(coefficients, &psi_guess, &core)?;
            return self.calc_li();
        })?;

        self.solve_with_shape(&result.coefficients, &psi_guess, &core)?;
        info!(
            "Equilibrium::solve_li: li = {:.4} (target {:.4}) after {} solves, converged = {}",
            result.li, li_target, result.n_evals, result.converged
        );
        return Ok(result);
    }

    fn solve_with_shape(&mut self, coefficients: &Array1<f64>, psi: &Array2<f64>, core: &CoreRegion) -> EquilibriaResult<()> {
        if let Some(shape) = self.profile.shape_mut() {
            shape.set_shape_coefficients(coefficients);
        }
        let jtor: Array2<f64> = self.profile.jtor(&self.grid, psi, core)?;
        return self.update_plasma(jtor);
    }

    /// Closed flux surface at a normalised flux; exactly 0 or 1 is nudged inwards
    pub fn get_flux_surface(&self, psi_n: f64) -> EquilibriaResult<FluxSurface> {
        let psi_n: f64 = nudge_psi_norm(psi_n)?;
        let psi_norm: Array2<f64> = self.psi_norm()?;
        return find_flux_surface(&self.grid, &psi_norm, psi_n, &self.get_ox_points(false));
    }

    /// Last closed flux surface
    pub fn get_lcfs(&self) -> EquilibriaResult<FluxSurface> {
        let psi_norm: Array2<f64> = self.psi_norm()?;
        return find_flux_surface(&self.grid, &psi_norm, LCFS_PSI_NORM, &self.get_ox_points(false));
    }

    /// Separatrix, the ψ_N = 1 surface through the X-point(s)
    pub fn get_separatrix(&self) -> EquilibriaResult<Vec<FluxSurface>> {
        let psi_norm: Array2<f64> = self.psi_norm()?;
        return find_separatrix(&self.grid, &psi_norm, &self.get_ox_points(false));
    }

    /// Shape parameters of the flux surface at a normalised flux
    pub fn analyse_flux_surface(&self, psi_n: f64) -> EquilibriaResult<FluxSurfaceGeometry> {
        return Ok(self.get_flux_surface(psi_n)?.geometry());
    }

    /// Normalised internal inductance li(3) = 2 ∫ Bp² dV / (μ0² Ip² R0)
    pub fn calc_li(&self) -> EquilibriaResult<f64> {
        if self.i_p == 0.0 {
            return Err(EquilibriaError::ProfileDegenerate("internal inductance needs a plasma current".to_string()));
        }
        let core: Arc<CoreRegion> = self.core_region()?;
        let bp_squared: Array2<f64> = self.bp().mapv(|bp| bp * bp);
        let energy_integral: f64 = (bp_squared * &core.mask * self.grid.mesh_r()).sum() * 2.0 * PI * self.grid.d_area();
        let r_0: f64 = self.profile.r_0();
        return Ok(2.0 * energy_integral / (MU_0 * MU_0 * self.i_p * self.i_p * r_0));
    }

    /// Safety factor on axis, F_axis / (R_axis sqrt(ψ_RR ψ_ZZ))
    pub fn calc_q0(&self) -> EquilibriaResult<f64> {
        let o_point: CriticalPoint = self.primary_o_point()?;
        let (d2_psi_d_r2, d2_psi_d_z2): (Array2<f64>, Array2<f64>) = psi_curvatures(&self.grid, &self.psi());
        let psi_rr: f64 = interpolate_map_at(&self.grid, &d2_psi_d_r2, o_point.r, o_point.z)?.ok_or(EquilibriaError::NoOPoint)?;
        let psi_zz: f64 = interpolate_map_at(&self.grid, &d2_psi_d_z2, o_point.r, o_point.z)?.ok_or(EquilibriaError::NoOPoint)?;
        let f_axis: f64 = self.profile.fpol(&Array1::from(vec![0.0]))[0];
        return Ok((f_axis / (o_point.r * (psi_rr * psi_zz).abs().sqrt())).abs());
    }

    /// Poloidal beta, (8π / μ0) ∫p dA / Ip²
    pub fn calc_beta_p(&self) -> EquilibriaResult<f64> {
        if self.i_p == 0.0 {
            return Err(EquilibriaError::ProfileDegenerate("poloidal beta needs a plasma current".to_string()));
        }
        let pressure_integral: f64 = self.pressure_map()?.sum() * self.grid.d_area();
        return Ok(8.0 * PI * pressure_integral / (MU_0 * self.i_p * self.i_p));
    }

    /// (R_axis - R_geometric, Z_axis - Z_geometric) with the geometric centre of the last closed flux surface
    pub fn shafranov_shift(&self) -> EquilibriaResult<(f64, f64)> {
        let o_point: CriticalPoint = self.primary_o_point()?;
        let lcfs: FluxSurface = self.get_lcfs()?;
        let no_surface = |_| EquilibriaError::NoFluxSurface(LCFS_PSI_NORM);
        let z_max: f64 = *lcfs.z().max().map_err(no_surface)?;
        let z_min: f64 = *lcfs.z().min().map_err(no_surface)?;
        let r_geometric: f64 = lcfs.geometry().r_0;
        return Ok((o_point.r - r_geometric, o_point.z - 0.5 * (z_max + z_min)));
    }

    /// Global plasma parameters
    pub fn analyse_plasma(&self) -> EquilibriaResult<PlasmaSummary> {
        let o_point: CriticalPoint = self.primary_o_point()?;
        let core: Arc<CoreRegion> = self.core_region()?;
        let lcfs: FluxSurface = self.get_lcfs()?;
        return Ok(PlasmaSummary {
            i_p: self.i_p,
            li: self.calc_li()?,
            q_0: self.calc_q0()?,
            beta_p: self.calc_beta_p()?,
            r_axis: o_point.r,
            z_axis: o_point.z,
            psi_axis: core.psi_axis,
            psi_boundary: core.psi_boundary,
            shafranov_shift: self.shafranov_shift()?,
            geometry: lcfs.geometry(),
            diverted: core.diverted,
            double_null: self.is_double_null(),
        });
    }

    /// Current, force and peak field of every coil
    pub fn analyse_coils(&self) -> EquilibriaResult<Vec<CoilSummary>> {
        return analyse_coils(self);
    }
}

impl MagneticState for Equilibrium {
    fn grid(&self) -> &Grid {
        return &self.grid;
    }

    fn coilset(&self) -> &CoilSet {
        return &self.coilset;
    }

    fn coilset_mut(&mut self) -> &mut CoilSet {
        return &mut self.coilset;
    }

    fn limiter(&self) -> Option<&Limiter> {
        return self.limiter.as_ref();
    }

    fn plasma_psi_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        let mut psi: Array1<f64> = self.plasma_values_at(x, z, &self.psi_plasma, |coil, x, z| coil.psi(x, z))?;
        if let Some(controller) = &self.controller {
            psi = psi + controller.psi(x, z);
        }
        return Ok(psi);
    }

    fn plasma_bx_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        let maps: Arc<(Array2<f64>, Array2<f64>)> = self.plasma_field_maps();
        let mut bx: Array1<f64> = self.plasma_values_at(x, z, &maps.0, |coil, x, z| coil.field(x, z).0)?;
        if let Some(controller) = &self.controller {
            bx = bx + controller.field(x, z).0;
        }
        return Ok(bx);
    }

    fn plasma_bz_at(&self, x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Array1<f64>> {
        let maps: Arc<(Array2<f64>, Array2<f64>)> = self.plasma_field_maps();
        let mut bz: Array1<f64> = self.plasma_values_at(x, z, &maps.1, |coil, x, z| coil.field(x, z).1)?;
        if let Some(controller) = &self.controller {
            bz = bz + controller.field(x, z).1;
        }
        return Ok(bz);
    }
}

#[cfg(test)]
fn symmetric_test_equilibrium(boundary: Boundary) -> Equilibrium {
    use crate::profiles::{BetaIpProfile, DoublePowerShape};

    let grid: Grid = Grid::new(4.0, 12.0, -6.0, 6.0, 33, 33).expect("grid");
    let mut coils: Vec<Coil> = Vec::new();
    for (i_pair, (x, z, current)) in [(5.0, 7.5, -4e6), (11.0, 7.5, -6e6), (14.0, 3.0, -8e6)].iter().enumerate() {
        coils.push(Coil::new(*x, *z, 0.4, 0.4).expect("coil").with_name(&format!("PF_U{i_pair}")).with_current(*current));
        coils.push(Coil::new(*x, -*z, 0.4, 0.4).expect("coil").with_name(&format!("PF_L{i_pair}")).with_current(*current));
    }
    let coilset: CoilSet = CoilSet::new(coils).expect("coilset");
    let profile: BetaIpProfile = BetaIpProfile::new(0.5, 8e6, 8.0, 5.0, Some(Box::new(DoublePowerShape::new(2.0, 1.5))));
    let settings: EquilibriumSettings = EquilibriumSettings {
        boundary,
        ..EquilibriumSettings::default()
    };
    return Equilibrium::new(grid, coilset, Box::new(profile), None, settings).expect("equilibrium");
}

#[test]
fn test_initial_psi_is_zero_on_edge() {
    let grid: Grid = Grid::new(3.0, 13.0, -10.0, 10.0, 17, 17).expect("grid");
    let psi: Array2<f64> = initial_psi(&grid);
    for (i_z, i_r) in grid.edge_nodes() {
        assert_eq!(psi[[i_z, i_r]], 0.0);
    }
    assert!(psi[[8, 6]] > 90.0);
}

#[test]
fn test_fixed_boundary_solve_recovers_current() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let mut equilibrium: Equilibrium = symmetric_test_equilibrium(Boundary::Fixed);
    equilibrium.solve(None, None).expect("solve");

    assert_relative_eq!(equilibrium.i_p(), 8e6, max_relative = 1e-9);
    for (i_z, i_r) in equilibrium.grid().edge_nodes() {
        assert_eq!(equilibrium.psi_plasma()[[i_z, i_r]], 0.0);
    }
    // The plasma flux peaks where the current is
    let (i_z_max, _): (usize, usize) = equilibrium.psi_plasma().argmax().expect("argmax");
    assert_eq!(i_z_max, 16);
}

#[test]
fn test_solve_is_up_down_symmetric() {
    let mut equilibrium: Equilibrium = symmetric_test_equilibrium(Boundary::Free);
    for _ in 0..3 {
        equilibrium.solve(None, None).expect("solve");
    }
    let psi: Array2<f64> = equilibrium.psi();
    let n_z: usize = psi.nrows();
    let scale: f64 = psi.iter().fold(0.0_f64, |acc, value| acc.max(value.abs()));
    for i_z in 0..n_z {
        for i_r in 0..psi.ncols() {
            assert!((psi[[i_z, i_r]] - psi[[n_z - 1 - i_z, i_r]]).abs() < 1e-6 * scale);
        }
    }
    let o_point: CriticalPoint = equilibrium.get_ox_points(false).primary_o_point().expect("O-point");
    assert!(o_point.z.abs() < 0.5 * equilibrium.grid().d_z());
}

#[test]
fn test_derived_quantities_follow_coil_changes() {
    let mut equilibrium: Equilibrium = symmetric_test_equilibrium(Boundary::Free);
    equilibrium.solve(None, None).expect("solve");
    let psi_before: Array2<f64> = equilibrium.psi();

    equilibrium.coilset_mut().set_current("PF_U0", -5e6).expect("set current");
    let psi_after: Array2<f64> = equilibrium.psi();
    let expected: Array2<f64> = equilibrium.coil_psi() + equilibrium.psi_plasma();
    assert!((&psi_after - &psi_before).iter().any(|delta| delta.abs() > 0.0));
    assert!((&psi_after - &expected).iter().all(|delta| delta.abs() < 1e-9));
}

#[test]
fn test_plasma_terms_continue_off_grid() {
    let mut equilibrium: Equilibrium = symmetric_test_equilibrium(Boundary::Free);
    equilibrium.solve(None, None).expect("solve");

    // Far from the plasma the flux approaches that of a coil carrying Ip at the current centroid
    let x: Array1<f64> = Array1::from(vec![30.0, 12.0 - 1e-9]);
    let z: Array1<f64> = Array1::from(vec![0.0, 0.0]);
    let psi: Array1<f64> = equilibrium.plasma_psi_at(&x, &z).expect("plasma psi");
    assert!(psi.iter().all(|value| value.is_finite()));
    assert!(psi[0] > 0.0);
    assert!(psi[0] < psi[1]);
}

#[test]
fn test_coil_summaries() {
    let mut equilibrium: Equilibrium = symmetric_test_equilibrium(Boundary::Free);
    equilibrium.solve(None, None).expect("solve");
    let summaries: Vec<CoilSummary> = equilibrium.analyse_coils().expect("coil summaries");
    assert_eq!(summaries.len(), 6);
    // Mirror-image coils carry equal radial forces and opposite vertical forces
    assert!((summaries[0].f_x - summaries[1].f_x).abs() < 1e-6 * summaries[0].f_x.abs());
    assert!((summaries[0].f_z + summaries[1].f_z).abs() < 1e-6 * summaries[0].f_z.abs().max(1.0));
    assert!(summaries.iter().all(|summary| summary.b_peak > 0.0));
}
