use crate::error::{EquilibriaError, EquilibriaResult};
use geo::{Contains, Coord, LineString, Point, Polygon};
use ndarray::Array1;

/// Physical limiter: an ordered set of wall points the plasma may touch
///
/// The points are used both as candidate limiting points for the plasma boundary and,
/// closed into a polygon, as the region where critical points and plasma current are allowed.
#[derive(Clone, Debug, PartialEq)]
pub struct Limiter {
    x: Vec<f64>,
    z: Vec<f64>,
    /// The points closed into a polygon, built once
    polygon: Polygon,
}

impl Limiter {
    /// # Errors
    /// `EquilibriaError::ArrayLength` if `x` and `z` differ in length, or fewer than three points are given
    pub fn new(x: &Array1<f64>, z: &Array1<f64>) -> EquilibriaResult<Self> {
        if x.len() != z.len() {
            return Err(EquilibriaError::ArrayLength {
                what: "Limiter::new z".to_string(),
                expected: x.len(),
                found: z.len(),
            });
        }
        if x.len() < 3 {
            return Err(EquilibriaError::ArrayLength {
                what: "Limiter::new needs at least 3 points".to_string(),
                expected: 3,
                found: x.len(),
            });
        }
        let coordinates: Vec<Coord<f64>> = x.iter().zip(z.iter()).map(|(&x, &y)| Coord { x, y }).collect();
        let polygon: Polygon = Polygon::new(
            LineString::from(coordinates),
            vec![], // No holes
        );
        return Ok(Limiter {
            x: x.to_vec(),
            z: z.to_vec(),
            polygon,
        });
    }

    pub fn n_points(&self) -> usize {
        return self.x.len();
    }

    pub fn x(&self) -> Array1<f64> {
        return Array1::from(self.x.clone());
    }

    pub fn z(&self) -> Array1<f64> {
        return Array1::from(self.z.clone());
    }

    /// The limiter closed into a polygon
    pub fn polygon(&self) -> &Polygon {
        return &self.polygon;
    }

    /// Returns true if (x, z) lies strictly inside the limiter polygon
    pub fn contains(&self, x: f64, z: f64) -> bool {
        return self.polygon.contains(&Point::new(x, z));
    }
}

#[test]
fn test_limiter_contains() {
    let x: Array1<f64> = Array1::from(vec![4.0, 12.0, 12.0, 4.0]);
    let z: Array1<f64> = Array1::from(vec![-6.0, -6.0, 6.0, 6.0]);
    let limiter: Limiter = Limiter::new(&x, &z).expect("test_limiter_contains: limiter");

    assert!(limiter.contains(8.0, 0.0));
    assert!(!limiter.contains(3.0, 0.0));
    assert!(!limiter.contains(8.0, 7.0));
    assert!(Limiter::new(&x, &Array1::zeros(3)).is_err());
}

#[test]
fn test_limiter_polygon_is_closed_once() {
    let x: Array1<f64> = Array1::from(vec![4.0, 12.0, 8.0]);
    let z: Array1<f64> = Array1::from(vec![-6.0, -6.0, 6.0]);
    let limiter: Limiter = Limiter::new(&x, &z).expect("test_limiter_polygon: limiter");

    // geo closes the ring by repeating the first point
    let ring: Vec<(f64, f64)> = limiter.polygon().exterior().coords().map(|coord| (coord.x, coord.y)).collect();
    assert_eq!(ring.len(), 4);
    assert_eq!(ring.first(), ring.last());

    // The cached polygon travels with clones
    let copy: Limiter = limiter.clone();
    assert_eq!(copy, limiter);
    assert!(copy.contains(8.0, 0.0));
    assert!(!copy.contains(5.0, 5.0));
}
