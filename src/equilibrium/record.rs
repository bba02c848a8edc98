use super::equilibrium::Equilibrium;
use super::settings::EquilibriumSettings;
use super::state::MagneticState;
use crate::coils::{Coil, CoilSet};
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::grad_shafranov::apply_gs_operator;
use crate::grid::Grid;
use crate::limiter::Limiter;
use crate::plasma_geometry::{CoreRegion, CriticalPoint, FluxSurface};
use crate::profiles::CustomProfile;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const MU_0: f64 = physical_constants::VACUUM_MAG_PERMEABILITY;

/// EQDSK-like persisted equilibrium
///
/// Field names follow the usual G-EQDSK quantities. `psi` is stored as `psi[i_x][i_z]`, radial index first.
/// The 1-D profiles are sampled on `pnorm`, which is uniform in normalised flux with `nx` points.
/// `qpsi` is not computed and holds `None` (written as `null`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EqdskRecord {
    pub name: String,
    pub nx: usize,
    pub nz: usize,
    pub xdim: f64,
    pub zdim: f64,
    pub xcentre: f64,
    pub bcentre: f64,
    pub xgrid1: f64,
    pub zmid: f64,
    pub xmag: f64,
    pub zmag: f64,
    pub psimag: f64,
    pub psibdry: f64,
    pub cplasma: f64,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub psi: Vec<Vec<f64>>,
    pub fpol: Vec<f64>,
    pub ffprime: Vec<f64>,
    pub pprime: Vec<f64>,
    pub pressure: Vec<f64>,
    pub pnorm: Vec<f64>,
    pub qpsi: Vec<Option<f64>>,
    pub nbdry: usize,
    pub xbdry: Vec<f64>,
    pub zbdry: Vec<f64>,
    pub nlim: usize,
    pub xlim: Vec<f64>,
    pub zlim: Vec<f64>,
    pub ncoil: usize,
    pub xc: Vec<f64>,
    pub zc: Vec<f64>,
    pub dxc: Vec<f64>,
    pub dzc: Vec<f64>,
    #[serde(rename = "Ic")]
    pub i_c: Vec<f64>,
}

impl EqdskRecord {
    /// Write the record as JSON
    pub fn save(&self, path: &Path) -> EquilibriaResult<()> {
        let json: String = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        return Ok(());
    }

    /// Read a record written by `save`
    pub fn load(path: &Path) -> EquilibriaResult<Self> {
        let json: String = std::fs::read_to_string(path)?;
        let record: EqdskRecord = serde_json::from_str(&json)?;
        return Ok(record);
    }

    /// Check that every array matches the sizes the record declares
    fn validate(&self) -> EquilibriaResult<()> {
        let mut checks: Vec<(&str, usize, usize)> = vec![
            ("EqdskRecord: psi", self.nx, self.psi.len()),
            ("EqdskRecord: xlim", self.nlim, self.xlim.len()),
            ("EqdskRecord: zlim", self.nlim, self.zlim.len()),
            ("EqdskRecord: xc", self.ncoil, self.xc.len()),
            ("EqdskRecord: zc", self.ncoil, self.zc.len()),
            ("EqdskRecord: dxc", self.ncoil, self.dxc.len()),
            ("EqdskRecord: dzc", self.ncoil, self.dzc.len()),
            ("EqdskRecord: Ic", self.ncoil, self.i_c.len()),
        ];
        for column in self.psi.iter() {
            checks.push(("EqdskRecord: psi column", self.nz, column.len()));
        }
        for (what, expected, found) in checks {
            if expected != found {
                return Err(EquilibriaError::ArrayLength {
                    what: what.to_string(),
                    expected,
                    found,
                });
            }
        }
        return Ok(());
    }

    fn psi_map(&self) -> Array2<f64> {
        return Array2::from_shape_fn((self.nz, self.nx), |(i_z, i_x)| self.psi[i_x][i_z]);
    }
}

impl Equilibrium {
    /// Persisted form of a solved equilibrium
    ///
    /// # Errors
    /// * `EquilibriaError::NoOPoint` or `EquilibriaError::NoFluxSurface` if the plasma boundary cannot be found
    pub fn to_record(&self, name: &str) -> EquilibriaResult<EqdskRecord> {
        let grid: &Grid = self.grid();
        let core: Arc<CoreRegion> = self.core_region()?;
        let o_point: Option<CriticalPoint> = self.get_ox_points(false).primary_o_point();
        let (xmag, zmag): (f64, f64) = o_point.map(|point| (point.r, point.z)).unwrap_or(self.effective_centre());
        let lcfs: FluxSurface = self.get_lcfs()?;

        let nx: usize = grid.n_r();
        let pnorm: Array1<f64> = Array1::linspace(0.0, 1.0, nx);
        let psi: Array2<f64> = self.psi();

        let coilset: &CoilSet = self.coilset();
        let (xlim, zlim): (Vec<f64>, Vec<f64>) = match self.limiter() {
            Some(limiter) => (limiter.x().to_vec(), limiter.z().to_vec()),
            None => (Vec::new(), Vec::new()),
        };

        return Ok(EqdskRecord {
            name: name.to_string(),
            nx,
            nz: grid.n_z(),
            xdim: grid.r_max() - grid.r_min(),
            zdim: grid.z_max() - grid.z_min(),
            xcentre: self.profile().r_0(),
            bcentre: self.profile().b_0(),
            xgrid1: grid.r_min(),
            zmid: 0.5 * (grid.z_max() + grid.z_min()),
            xmag,
            zmag,
            psimag: core.psi_axis,
            psibdry: core.psi_boundary,
            cplasma: self.i_p(),
            x: grid.r().to_vec(),
            z: grid.z().to_vec(),
            psi: (0..nx).map(|i_x| psi.column(i_x).to_vec()).collect(),
            fpol: self.profile().fpol(&pnorm).to_vec(),
            ffprime: self.profile().ffprime(&pnorm).to_vec(),
            pprime: self.profile().pprime(&pnorm).to_vec(),
            pressure: self.profile().pressure(&pnorm).to_vec(),
            pnorm: pnorm.to_vec(),
            qpsi: vec![None; nx],
            nbdry: lcfs.n_points(),
            xbdry: lcfs.r().to_vec(),
            zbdry: lcfs.z().to_vec(),
            nlim: xlim.len(),
            xlim,
            zlim,
            ncoil: coilset.n_coils(),
            xc: coilset.coils().iter().map(|coil| coil.x()).collect(),
            zc: coilset.coils().iter().map(|coil| coil.z()).collect(),
            dxc: coilset.coils().iter().map(|coil| coil.dx()).collect(),
            dzc: coilset.coils().iter().map(|coil| coil.dz()).collect(),
            i_c: coilset.coils().iter().map(|coil| coil.current()).collect(),
        });
    }

    /// Rebuild an equilibrium from a record
    ///
    /// The plasma flux is the stored total flux with the coil (and controller) flux removed. The current density is
    /// recovered from the Grad-Shafranov operator applied to the plasma flux, and the profile becomes a
    /// `CustomProfile` of the stored p' and FF'.
    ///
    /// # Errors
    /// * `EquilibriaError::ArrayLength` if the arrays do not match the declared sizes
    pub fn from_record(record: &EqdskRecord, settings: EquilibriumSettings) -> EquilibriaResult<Self> {
        record.validate()?;
        let grid: Grid = Grid::new(
            record.xgrid1,
            record.xgrid1 + record.xdim,
            record.zmid - 0.5 * record.zdim,
            record.zmid + 0.5 * record.zdim,
            record.nx,
            record.nz,
        )?;

        let mut coils: Vec<Coil> = Vec::with_capacity(record.ncoil);
        for i_coil in 0..record.ncoil {
            coils.push(Coil::new(record.xc[i_coil], record.zc[i_coil], record.dxc[i_coil], record.dzc[i_coil])?.with_current(record.i_c[i_coil]));
        }
        let coilset: CoilSet = CoilSet::new(coils)?;

        let limiter: Option<Limiter> = match record.nlim {
            0 => None,
            _ => Some(Limiter::new(&Array1::from(record.xlim.clone()), &Array1::from(record.zlim.clone()))?),
        };
        let profile: CustomProfile = CustomProfile::new(
            Array1::from(record.pprime.clone()),
            Array1::from(record.ffprime.clone()),
            Some(record.cplasma),
            record.xcentre,
            record.bcentre,
        )?;

        let mut equilibrium: Equilibrium = Equilibrium::new(grid, coilset, Box::new(profile), limiter, settings)?;
        let psi_plasma: Array2<f64> = record.psi_map() - equilibrium.coil_psi() - equilibrium.controller_psi();

        let grid: &Grid = equilibrium.grid();
        let mut jtor: Array2<f64> = -apply_gs_operator(grid, &psi_plasma) / (MU_0 * grid.mesh_r());
        for (i_z, i_r) in grid.edge_nodes() {
            jtor[[i_z, i_r]] = 0.0;
        }
        equilibrium.set_plasma_state(psi_plasma, jtor)?;
        return Ok(equilibrium);
    }
}
