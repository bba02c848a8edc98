use super::coil::{Coil, CoilFilaments, CoilType, collapse_filaments};
use crate::cache::next_generation;
use crate::error::{EquilibriaError, EquilibriaResult};
use crate::greens::{greens_magnetic_field, greens_psi, self_inductance};
use ndarray::{Array1, Array2};
use std::collections::{HashMap, HashSet};

// Global constants
const PI: f64 = std::f64::consts::PI;

/// Which coils a response matrix covers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoilSelection {
    All,
    Control,
    Fixed,
}

/// Ordered collection of coils with unique names
///
/// The coil set carries two generation stamps:
/// * `geometry_generation` changes when any position, size or discretisation changes
/// * `generation` changes on any mutation, currents included
///
/// Owners use them to decide when cached Green's tables or critical points are stale.
#[derive(Clone, Debug)]
pub struct CoilSet {
    coils: Vec<Coil>,
    geometry_generation: u64,
    generation: u64,
}

impl CoilSet {
    /// Create a coil set
    ///
    /// Coils with an empty name are named `"{CTYPE}_{n}"`, numbering each type from 1.
    ///
    /// # Errors
    /// `EquilibriaError::DuplicateCoilName` if two coils share a name
    pub fn new(coils: Vec<Coil>) -> EquilibriaResult<Self> {
        let mut coils: Vec<Coil> = coils;

        // Assign default names
        let mut counters: HashMap<CoilType, usize> = HashMap::new();
        let taken: HashSet<String> = coils.iter().map(|coil| coil.name().to_string()).filter(|name| !name.is_empty()).collect();
        for coil in coils.iter_mut() {
            if coil.name().is_empty() {
                let counter: &mut usize = counters.entry(coil.ctype()).or_insert(0);
                loop {
                    *counter += 1;
                    let candidate: String = format!("{}_{}", coil.ctype(), counter);
                    if !taken.contains(&candidate) {
                        coil.set_name(candidate);
                        break;
                    }
                }
            }
        }

        // Names must be unique
        let mut seen: HashSet<String> = HashSet::new();
        for coil in coils.iter() {
            if !seen.insert(coil.name().to_string()) {
                return Err(EquilibriaError::DuplicateCoilName(coil.name().to_string()));
            }
        }

        let generation: u64 = next_generation();
        return Ok(CoilSet {
            coils,
            geometry_generation: generation,
            generation,
        });
    }

    fn touch_geometry(&mut self) {
        let generation: u64 = next_generation();
        self.geometry_generation = generation;
        self.generation = generation;
    }

    fn touch(&mut self) {
        self.generation = next_generation();
    }

    pub fn geometry_generation(&self) -> u64 {
        return self.geometry_generation;
    }

    pub fn generation(&self) -> u64 {
        return self.generation;
    }

    pub fn n_coils(&self) -> usize {
        return self.coils.len();
    }

    pub fn n_control(&self) -> usize {
        return self.coils.iter().filter(|coil| coil.control()).count();
    }

    pub fn coils(&self) -> &[Coil] {
        return &self.coils;
    }

    pub fn names(&self) -> Vec<String> {
        return self.coils.iter().map(|coil| coil.name().to_string()).collect();
    }

    pub fn control_names(&self) -> Vec<String> {
        return self.coils.iter().filter(|coil| coil.control()).map(|coil| coil.name().to_string()).collect();
    }

    /// Indices of the control coils within `coils()`
    pub fn control_indices(&self) -> Vec<usize> {
        return (0..self.coils.len()).filter(|&i_coil| self.coils[i_coil].control()).collect();
    }

    fn selected_indices(&self, selection: CoilSelection) -> Vec<usize> {
        return (0..self.coils.len())
            .filter(|&i_coil| match selection {
                CoilSelection::All => true,
                CoilSelection::Control => self.coils[i_coil].control(),
                CoilSelection::Fixed => !self.coils[i_coil].control(),
            })
            .collect();
    }

    fn index_of(&self, name: &str) -> EquilibriaResult<usize> {
        return self
            .coils
            .iter()
            .position(|coil| coil.name() == name)
            .ok_or_else(|| EquilibriaError::UnknownCoil(name.to_string()));
    }

    pub fn coil(&self, name: &str) -> EquilibriaResult<&Coil> {
        let i_coil: usize = self.index_of(name)?;
        return Ok(&self.coils[i_coil]);
    }

    // ----- Currents -----

    /// Currents of all coils, ampere
    pub fn get_currents(&self) -> Array1<f64> {
        return self.coils.iter().map(|coil| coil.current()).collect();
    }

    /// Currents of the control coils, ampere
    pub fn get_control_currents(&self) -> Array1<f64> {
        return self.coils.iter().filter(|coil| coil.control()).map(|coil| coil.current()).collect();
    }

    /// Set the currents of the control coils, ampere
    ///
    /// Coils that are not size-fixed are resized to their new current.
    pub fn set_control_currents(&mut self, currents: &Array1<f64>) -> EquilibriaResult<()> {
        let indices: Vec<usize> = self.control_indices();
        if currents.len() != indices.len() {
            return Err(EquilibriaError::ArrayLength {
                what: "set_control_currents".to_string(),
                expected: indices.len(),
                found: currents.len(),
            });
        }
        let mut resized: bool = false;
        for (i_current, &i_coil) in indices.iter().enumerate() {
            self.coils[i_coil].set_current(currents[i_current]);
            resized |= self.coils[i_coil].resize_to_current();
        }
        if resized {
            self.touch_geometry();
        } else {
            self.touch();
        }
        return Ok(());
    }

    /// Add `delta` to the control coil currents, ampere
    pub fn adjust_control_currents(&mut self, delta: &Array1<f64>) -> EquilibriaResult<()> {
        let currents: Array1<f64> = self.get_control_currents();
        if delta.len() != currents.len() {
            return Err(EquilibriaError::ArrayLength {
                what: "adjust_control_currents".to_string(),
                expected: currents.len(),
                found: delta.len(),
            });
        }
        return self.set_control_currents(&(currents + delta));
    }

    pub fn set_current(&mut self, name: &str, current: f64) -> EquilibriaResult<()> {
        let i_coil: usize = self.index_of(name)?;
        self.coils[i_coil].set_current(current);
        if self.coils[i_coil].resize_to_current() {
            self.touch_geometry();
        } else {
            self.touch();
        }
        return Ok(());
    }

    /// Maximum currents of the control coils, ampere
    pub fn get_max_currents(&self) -> Array1<f64> {
        return self.coils.iter().filter(|coil| coil.control()).map(|coil| coil.get_max_current()).collect();
    }

    /// Peak field limits of the control coils, tesla; unlimited where no limit is set
    pub fn get_max_fields(&self) -> Array1<f64> {
        return self
            .coils
            .iter()
            .filter(|coil| coil.control())
            .map(|coil| coil.b_max().unwrap_or(f64::INFINITY))
            .collect();
    }

    // ----- Geometry -----

    /// Positions of the control coils, (x, z), metre
    pub fn get_control_positions(&self) -> (Array1<f64>, Array1<f64>) {
        let x: Array1<f64> = self.coils.iter().filter(|coil| coil.control()).map(|coil| coil.x()).collect();
        let z: Array1<f64> = self.coils.iter().filter(|coil| coil.control()).map(|coil| coil.z()).collect();
        return (x, z);
    }

    pub fn set_position(&mut self, name: &str, x: f64, z: f64) -> EquilibriaResult<()> {
        let i_coil: usize = self.index_of(name)?;
        if !(x > 0.0) {
            return Err(EquilibriaError::CoilSize {
                name: name.to_string(),
                reason: format!("coil centre must be at positive R, got x = {x}"),
            });
        }
        self.coils[i_coil].set_position(x, z);
        self.touch_geometry();
        return Ok(());
    }

    pub fn set_size(&mut self, name: &str, dx: f64, dz: f64) -> EquilibriaResult<()> {
        let i_coil: usize = self.index_of(name)?;
        self.coils[i_coil].set_size(dx, dz);
        self.touch_geometry();
        return Ok(());
    }

    pub fn set_control(&mut self, name: &str, control: bool) -> EquilibriaResult<()> {
        let i_coil: usize = self.index_of(name)?;
        self.coils[i_coil].set_control(control);
        self.touch();
        return Ok(());
    }

    /// Assign current density and field limits to all coils of one type
    pub fn assign_coil_materials(&mut self, ctype: CoilType, j_max: Option<f64>, b_max: Option<f64>) {
        for coil in self.coils.iter_mut().filter(|coil| coil.ctype() == ctype) {
            coil.set_material(j_max, b_max);
        }
        self.touch();
    }

    /// Stop coils from resizing with their current
    pub fn fix_sizes(&mut self) {
        for coil in self.coils.iter_mut() {
            coil.fix_size();
        }
        self.touch();
    }

    /// Sub-divide every coil into rectangles no larger than `d_coil`, metre
    pub fn mesh_coils(&mut self, d_coil: f64) {
        for coil in self.coils.iter_mut() {
            coil.set_discretisation(if d_coil > 0.0 { Some(d_coil) } else { None });
        }
        self.touch_geometry();
    }

    // ----- Responses -----

    fn filaments_of(&self, indices: &[usize]) -> (CoilFilaments, Vec<usize>) {
        let mut x: Vec<f64> = Vec::new();
        let mut z: Vec<f64> = Vec::new();
        let mut dx: Vec<f64> = Vec::new();
        let mut dz: Vec<f64> = Vec::new();
        let mut weight: Vec<f64> = Vec::new();
        let mut owner: Vec<usize> = Vec::new();
        for (i_selected, &i_coil) in indices.iter().enumerate() {
            let filaments: CoilFilaments = self.coils[i_coil].filaments();
            x.extend(filaments.x.iter());
            z.extend(filaments.z.iter());
            dx.extend(filaments.dx.iter());
            dz.extend(filaments.dz.iter());
            weight.extend(filaments.weight.iter());
            owner.extend(std::iter::repeat(i_selected).take(filaments.x.len()));
        }
        let filaments: CoilFilaments = CoilFilaments {
            x: Array1::from(x),
            z: Array1::from(z),
            dx: Array1::from(dx),
            dz: Array1::from(dz),
            weight: Array1::from(weight),
        };
        return (filaments, owner);
    }

    /// Flux per radian at the points per ampere in each selected coil
    ///
    /// # Returns
    /// * `Array2<f64>` - shape = (n_points, n_selected_coils)
    pub fn psi_response(&self, x: &Array1<f64>, z: &Array1<f64>, selection: CoilSelection) -> Array2<f64> {
        let indices: Vec<usize> = self.selected_indices(selection);
        let (filaments, owner): (CoilFilaments, Vec<usize>) = self.filaments_of(&indices);
        let g: Array2<f64> = greens_psi(x, z, &filaments.x, &filaments.z, &filaments.dx, &filaments.dz);
        return collapse_filaments(&g, &owner, &filaments.weight, indices.len());
    }

    /// (BR, BZ) at the points per ampere in each selected coil
    ///
    /// # Returns
    /// * `(Array2<f64>, Array2<f64>)` - each shape = (n_points, n_selected_coils)
    pub fn field_response(&self, x: &Array1<f64>, z: &Array1<f64>, selection: CoilSelection) -> (Array2<f64>, Array2<f64>) {
        let indices: Vec<usize> = self.selected_indices(selection);
        let (filaments, owner): (CoilFilaments, Vec<usize>) = self.filaments_of(&indices);
        let (g_br, g_bz): (Array2<f64>, Array2<f64>) = greens_magnetic_field(x, z, &filaments.x, &filaments.z, &filaments.dx, &filaments.dz);
        let n_selected: usize = indices.len();
        return (
            collapse_filaments(&g_br, &owner, &filaments.weight, n_selected),
            collapse_filaments(&g_bz, &owner, &filaments.weight, n_selected),
        );
    }

    fn selected_currents(&self, selection: CoilSelection) -> Array1<f64> {
        return self.selected_indices(selection).iter().map(|&i_coil| self.coils[i_coil].current()).collect();
    }

    /// Flux per radian at the points from the selected coils' present currents
    pub fn psi(&self, x: &Array1<f64>, z: &Array1<f64>, selection: CoilSelection) -> Array1<f64> {
        return self.psi_response(x, z, selection).dot(&self.selected_currents(selection));
    }

    /// (BR, BZ) at the points from the selected coils' present currents
    pub fn field(&self, x: &Array1<f64>, z: &Array1<f64>, selection: CoilSelection) -> (Array1<f64>, Array1<f64>) {
        let currents: Array1<f64> = self.selected_currents(selection);
        let (g_br, g_bz): (Array2<f64>, Array2<f64>) = self.field_response(x, z, selection);
        return (g_br.dot(&currents), g_bz.dot(&currents));
    }

    /// Flux response of the control coils at the points, shape = (n_points, n_control)
    pub fn control_psi(&self, x: &Array1<f64>, z: &Array1<f64>) -> Array2<f64> {
        return self.psi_response(x, z, CoilSelection::Control);
    }

    /// BR response of the control coils at the points, shape = (n_points, n_control)
    pub fn control_bx(&self, x: &Array1<f64>, z: &Array1<f64>) -> Array2<f64> {
        return self.field_response(x, z, CoilSelection::Control).0;
    }

    /// BZ response of the control coils at the points, shape = (n_points, n_control)
    pub fn control_bz(&self, x: &Array1<f64>, z: &Array1<f64>) -> Array2<f64> {
        return self.field_response(x, z, CoilSelection::Control).1;
    }

    /// Mutual inductance matrix, henry, shape = (n_coils, n_coils)
    ///
    /// Off-diagonal terms use the filament Green's function between coil centres.
    /// Diagonal terms are the finite-size self inductance of each rectangular coil.
    pub fn mutual_inductance_matrix(&self) -> Array2<f64> {
        let n_coils: usize = self.coils.len();
        let x: Array1<f64> = self.coils.iter().map(|coil| coil.x()).collect();
        let z: Array1<f64> = self.coils.iter().map(|coil| coil.z()).collect();
        let zero: Array1<f64> = Array1::zeros(n_coils);

        let mut inductance: Array2<f64> = greens_psi(&x, &z, &x, &z, &zero, &zero) * (2.0 * PI);
        for i_coil in 0..n_coils {
            let coil: &Coil = &self.coils[i_coil];
            inductance[[i_coil, i_coil]] = self_inductance(coil.x(), 2.0 * coil.dx(), 2.0 * coil.dz());
        }
        return inductance;
    }

    /// Radial and vertical Lorentz forces on every coil, newton, shape = (n_coils, 2)
    ///
    /// F_x = 2π R I B_Z and F_z = -2π R I B_R, with the field at each coil centre from the whole coil set
    /// plus an external contribution (the plasma, for an equilibrium).
    ///
    /// # Arguments
    /// * `external_bx`, `external_bz` - external field at each coil centre, length n_coils
    pub fn get_coil_forces(&self, external_bx: &Array1<f64>, external_bz: &Array1<f64>) -> EquilibriaResult<Array2<f64>> {
        let n_coils: usize = self.coils.len();
        for (what, array) in [("get_coil_forces: external_bx", external_bx), ("get_coil_forces: external_bz", external_bz)] {
            if array.len() != n_coils {
                return Err(EquilibriaError::ArrayLength {
                    what: what.to_string(),
                    expected: n_coils,
                    found: array.len(),
                });
            }
        }

        let x: Array1<f64> = self.coils.iter().map(|coil| coil.x()).collect();
        let z: Array1<f64> = self.coils.iter().map(|coil| coil.z()).collect();
        let (coil_bx, coil_bz): (Array1<f64>, Array1<f64>) = self.field(&x, &z, CoilSelection::All);

        let mut forces: Array2<f64> = Array2::zeros((n_coils, 2));
        for (i_coil, coil) in self.coils.iter().enumerate() {
            let b_r: f64 = coil_bx[i_coil] + external_bx[i_coil];
            let b_z: f64 = coil_bz[i_coil] + external_bz[i_coil];
            forces[[i_coil, 0]] = 2.0 * PI * coil.x() * coil.current() * b_z;
            forces[[i_coil, 1]] = -2.0 * PI * coil.x() * coil.current() * b_r;
        }
        return Ok(forces);
    }

    /// Check that the coil set is up-down symmetric
    ///
    /// Every coil above the midplane must have a partner at the mirrored position with the same size and current.
    /// Coils on the midplane are their own partner.
    pub fn check_symmetric(&self, tolerance: f64) -> bool {
        let same = |a: f64, b: f64| (a - b).abs() <= tolerance * (1.0 + a.abs().max(b.abs()));
        for coil in self.coils.iter() {
            if coil.z().abs() <= tolerance {
                continue;
            }
            let partner: Option<&Coil> = self.coils.iter().find(|other| {
                same(other.x(), coil.x())
                    && same(other.z(), -coil.z())
                    && same(other.dx(), coil.dx())
                    && same(other.dz(), coil.dz())
                    && same(other.current(), coil.current())
            });
            if partner.is_none() {
                return false;
            }
        }
        return true;
    }
}

#[cfg(test)]
fn five_coil_set() -> CoilSet {
    let positions: [(f64, f64); 5] = [(5.0, 8.0), (14.0, 5.0), (16.0, 0.0), (14.0, -5.0), (5.0, -8.0)];
    let coils: Vec<Coil> = positions
        .iter()
        .map(|&(x, z)| Coil::new(x, z, 0.5, 0.5).expect("five_coil_set: coil").with_current(1e6))
        .collect();
    return CoilSet::new(coils).expect("five_coil_set: coilset");
}

#[test]
fn test_coilset_default_names_and_uniqueness() {
    let coilset: CoilSet = five_coil_set();
    assert_eq!(coilset.names(), vec!["PF_1", "PF_2", "PF_3", "PF_4", "PF_5"]);

    let duplicate: Vec<Coil> = vec![
        Coil::new(5.0, 1.0, 0.2, 0.2).expect("coil").with_name("A"),
        Coil::new(6.0, 1.0, 0.2, 0.2).expect("coil").with_name("A"),
    ];
    assert!(matches!(CoilSet::new(duplicate), Err(EquilibriaError::DuplicateCoilName(_))));
}

#[test]
fn test_coilset_generations() {
    let mut coilset: CoilSet = five_coil_set();
    let geometry_generation: u64 = coilset.geometry_generation();
    let generation: u64 = coilset.generation();

    coilset.set_control_currents(&Array1::from_elem(5, 2e6)).expect("set currents");
    assert_eq!(coilset.geometry_generation(), geometry_generation);
    assert_ne!(coilset.generation(), generation);

    coilset.set_position("PF_2", 14.5, 5.0).expect("set position");
    assert_ne!(coilset.geometry_generation(), geometry_generation);

    assert!(coilset.set_control_currents(&Array1::zeros(3)).is_err());
}

#[test]
fn test_coilset_symmetry_and_inductance() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let mut coilset: CoilSet = five_coil_set();
    assert!(coilset.check_symmetric(1e-9));

    let inductance: Array2<f64> = coilset.mutual_inductance_matrix();
    assert_relative_eq!(inductance[[0, 4]], inductance[[4, 0]], max_relative = 1e-12);
    for i_coil in 0..5 {
        assert!(inductance[[i_coil, i_coil]] > inductance[[i_coil, (i_coil + 1) % 5]]);
    }

    coilset.set_current("PF_1", 3e6).expect("set current");
    assert!(!coilset.check_symmetric(1e-9));
}

#[test]
fn test_coilset_flux_superposition() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let coilset: CoilSet = five_coil_set();
    let x: Array1<f64> = Array1::from(vec![8.0, 9.0]);
    let z: Array1<f64> = Array1::from(vec![0.0, 1.0]);

    let psi_total: Array1<f64> = coilset.psi(&x, &z, CoilSelection::All);
    let mut psi_sum: Array1<f64> = Array1::zeros(2);
    for coil in coilset.coils() {
        psi_sum = psi_sum + coil.psi(&x, &z);
    }
    assert_relative_eq!(psi_total, psi_sum, max_relative = 1e-12);
}

#[test]
fn test_coil_forces_are_mirrored() {
    // Lazy loading of packages which are not used anywhere else in the code
    use approx::assert_relative_eq;

    let coilset: CoilSet = five_coil_set();
    let zero: Array1<f64> = Array1::zeros(5);
    let forces: Array2<f64> = coilset.get_coil_forces(&zero, &zero).expect("forces");

    // Up-down symmetric set: equal radial forces, opposite vertical forces on mirrored coils
    assert_relative_eq!(forces[[0, 0]], forces[[4, 0]], max_relative = 1e-9);
    assert_relative_eq!(forces[[0, 1]], -forces[[4, 1]], max_relative = 1e-9);
    assert!(forces[[2, 1]].abs() < 1e-6 * forces[[2, 0]].abs().max(1.0));

    // Parallel currents attract: the upper coil is pulled down towards the midplane coils
    assert!(forces[[0, 1]] < 0.0);
    assert!(coilset.get_coil_forces(&Array1::zeros(2), &zero).is_err());
}
