use crate::error::EquilibriaError;
use crate::profiles::LiSettings;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Boundary condition on the plasma flux at the grid edge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// Edge flux from the Green's-function integral of the plasma current
    #[default]
    Free,
    /// Zero plasma flux on the edge
    Fixed,
}

impl FromStr for Boundary {
    type Err = EquilibriaError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        return match selector.to_lowercase().as_str() {
            "free" => Ok(Boundary::Free),
            "fixed" => Ok(Boundary::Fixed),
            _ => Err(EquilibriaError::InvalidBoundary(selector.to_string())),
        };
    }
}

/// Numerical vertical position control
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerticalControl {
    #[default]
    None,
    /// A pair of virtual coils above and below the grid
    Virtual,
}

impl FromStr for VerticalControl {
    type Err = EquilibriaError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        return match selector.to_lowercase().as_str() {
            "none" | "" => Ok(VerticalControl::None),
            "virtual" => Ok(VerticalControl::Virtual),
            "feedback" => Err(EquilibriaError::VerticalControlNotImplemented(selector.to_string())),
            _ => Err(EquilibriaError::InvalidVerticalControl(selector.to_string())),
        };
    }
}

/// Settings of an equilibrium, loadable from JSON
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquilibriumSettings {
    pub boundary: Boundary,
    pub vertical_control: VerticalControl,
    /// Gain of the virtual vertical controller
    pub controller_gain: f64,
    /// Internal inductance target; only needed by `Equilibrium::solve_li`
    pub li_target: Option<f64>,
    pub li_settings: LiSettings,
    pub label: String,
}

impl Default for EquilibriumSettings {
    fn default() -> Self {
        return EquilibriumSettings {
            boundary: Boundary::Free,
            vertical_control: VerticalControl::None,
            controller_gain: 2.2,
            li_target: None,
            li_settings: LiSettings::default(),
            label: "equilibrium".to_string(),
        };
    }
}

#[test]
fn test_selectors_from_strings() {
    assert_eq!("free".parse::<Boundary>().expect("free"), Boundary::Free);
    assert_eq!("Fixed".parse::<Boundary>().expect("fixed"), Boundary::Fixed);
    assert!(matches!("periodic".parse::<Boundary>(), Err(EquilibriaError::InvalidBoundary(_))));

    assert_eq!("virtual".parse::<VerticalControl>().expect("virtual"), VerticalControl::Virtual);
    assert_eq!("none".parse::<VerticalControl>().expect("none"), VerticalControl::None);
    assert!(matches!("feedback".parse::<VerticalControl>(), Err(EquilibriaError::VerticalControlNotImplemented(_))));
    assert!(matches!("magic".parse::<VerticalControl>(), Err(EquilibriaError::InvalidVerticalControl(_))));
}

#[test]
fn test_settings_from_partial_json() {
    let settings: EquilibriumSettings = serde_json::from_str(r#"{"boundary": "Fixed", "li_target": 0.8}"#).expect("settings");
    assert_eq!(settings.boundary, Boundary::Fixed);
    assert_eq!(settings.li_target, Some(0.8));
    assert_eq!(settings.vertical_control, VerticalControl::None);
    assert_eq!(settings.controller_gain, 2.2);
}
