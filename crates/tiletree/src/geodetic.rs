//! Geodetic reference surface and coordinate conversions.
//!
//! Bounding regions are expressed as geographic extents over a reference
//! ellipsoid. This module provides the WGS84 ellipsoid and the conversions
//! between cartographic (longitude/latitude/height) and Cartesian positions
//! that the region math builds on.

use glam::DVec3;

/// Tolerances for the iterative geodetic algorithms.
pub(crate) const EPSILON10: f64 = 1e-10;
pub(crate) const EPSILON12: f64 = 1e-12;
pub(crate) const EPSILON14: f64 = 1e-14;

/// Squared-norm threshold below which a position counts as the ellipsoid
/// center, where surface projection has no unique answer.
const CENTER_TOLERANCE_SQUARED: f64 = 1e-1;

/// A geodetic position: longitude and latitude in radians, height in meters
/// above the ellipsoid surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cartographic {
    /// Longitude in radians, positive east.
    pub longitude: f64,
    /// Latitude in radians, positive north.
    pub latitude: f64,
    /// Height in meters above the ellipsoid surface.
    pub height: f64,
}

impl Cartographic {
    /// Create a cartographic position from radians and meters.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }
}

/// A quadric reference surface defined by three orthogonal radii.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    radii: DVec3,
    radii_squared: DVec3,
    one_over_radii: DVec3,
    one_over_radii_squared: DVec3,
}

impl Ellipsoid {
    /// The World Geodetic System 1984 ellipsoid.
    pub const WGS84: Self = Self::new(6378137.0, 6378137.0, 6356752.314_245_179_3);

    /// Create an ellipsoid from its radii along the x, y, and z axes.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            radii: DVec3::new(x, y, z),
            radii_squared: DVec3::new(x * x, y * y, z * z),
            one_over_radii: DVec3::new(1.0 / x, 1.0 / y, 1.0 / z),
            one_over_radii_squared: DVec3::new(1.0 / (x * x), 1.0 / (y * y), 1.0 / (z * z)),
        }
    }

    /// The radii along the x, y, and z axes.
    #[must_use]
    pub const fn radii(&self) -> DVec3 {
        self.radii
    }

    /// The outward surface normal at a Cartesian position on or near the
    /// surface.
    #[must_use]
    pub fn geodetic_surface_normal(&self, position: DVec3) -> DVec3 {
        (position * self.one_over_radii_squared).normalize()
    }

    /// The outward surface normal at a cartographic position.
    #[must_use]
    pub fn geodetic_surface_normal_cartographic(&self, cartographic: &Cartographic) -> DVec3 {
        let cos_latitude = cartographic.latitude.cos();
        DVec3::new(
            cos_latitude * cartographic.longitude.cos(),
            cos_latitude * cartographic.longitude.sin(),
            cartographic.latitude.sin(),
        )
        .normalize()
    }

    /// Convert a cartographic position to Cartesian coordinates.
    #[must_use]
    pub fn cartographic_to_cartesian(&self, cartographic: &Cartographic) -> DVec3 {
        let n = self.geodetic_surface_normal_cartographic(cartographic);
        let mut k = self.radii_squared * n;
        let gamma = n.dot(k).sqrt();
        k /= gamma;
        k + n * cartographic.height
    }

    /// Convert a Cartesian position to cartographic coordinates.
    ///
    /// Returns `None` for positions at the ellipsoid center, which have no
    /// unique surface projection.
    #[must_use]
    pub fn cartesian_to_cartographic(&self, cartesian: DVec3) -> Option<Cartographic> {
        let p = self.scale_to_geodetic_surface(cartesian)?;

        let n = self.geodetic_surface_normal(p);
        let h = cartesian - p;

        let longitude = n.y.atan2(n.x);
        let latitude = n.z.asin();
        let height = sign(h.dot(cartesian)) * h.length();

        Some(Cartographic::new(longitude, latitude, height))
    }

    /// Scale a Cartesian position along the geodetic surface normal so it
    /// lies on the ellipsoid surface.
    ///
    /// Returns `None` for positions at the ellipsoid center, where the
    /// iteration cannot converge.
    #[must_use]
    pub fn scale_to_geodetic_surface(&self, cartesian: DVec3) -> Option<DVec3> {
        let x2 = cartesian.x * cartesian.x * self.one_over_radii.x * self.one_over_radii.x;
        let y2 = cartesian.y * cartesian.y * self.one_over_radii.y * self.one_over_radii.y;
        let z2 = cartesian.z * cartesian.z * self.one_over_radii.z * self.one_over_radii.z;

        let squared_norm = x2 + y2 + z2;
        let ratio = (1.0 / squared_norm).sqrt();

        // First approximation: the radial intersection with the surface.
        let intersection = cartesian * ratio;

        if squared_norm < CENTER_TOLERANCE_SQUARED {
            return ratio.is_finite().then_some(intersection);
        }

        // The gradient at the intersection stands in for the unit normal;
        // the magnitude difference is absorbed into the multiplier.
        let gradient = intersection * self.one_over_radii_squared * 2.0;

        let mut lambda = (1.0 - ratio) * cartesian.length() / (0.5 * gradient.length());
        let mut correction = 0.0;

        let mut x_multiplier;
        let mut y_multiplier;
        let mut z_multiplier;

        loop {
            lambda -= correction;

            x_multiplier = 1.0 / (1.0 + lambda * self.one_over_radii_squared.x);
            y_multiplier = 1.0 / (1.0 + lambda * self.one_over_radii_squared.y);
            z_multiplier = 1.0 / (1.0 + lambda * self.one_over_radii_squared.z);

            let x_multiplier2 = x_multiplier * x_multiplier;
            let y_multiplier2 = y_multiplier * y_multiplier;
            let z_multiplier2 = z_multiplier * z_multiplier;

            let x_multiplier3 = x_multiplier2 * x_multiplier;
            let y_multiplier3 = y_multiplier2 * y_multiplier;
            let z_multiplier3 = z_multiplier2 * z_multiplier;

            let func = x2 * x_multiplier2 + y2 * y_multiplier2 + z2 * z_multiplier2 - 1.0;

            let denominator = x2 * x_multiplier3 * self.one_over_radii_squared.x
                + y2 * y_multiplier3 * self.one_over_radii_squared.y
                + z2 * z_multiplier3 * self.one_over_radii_squared.z;

            let derivative = -2.0 * denominator;

            correction = func / derivative;

            if func.abs() <= EPSILON12 {
                break;
            }
        }

        Some(DVec3::new(
            cartesian.x * x_multiplier,
            cartesian.y * y_multiplier,
            cartesian.z * z_multiplier,
        ))
    }
}

/// A longitude/latitude extent on the globe, in radians.
///
/// A rectangle whose `west` is greater than its `east` crosses the
/// antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobeRectangle {
    /// Westernmost longitude in radians.
    pub west: f64,
    /// Southernmost latitude in radians.
    pub south: f64,
    /// Easternmost longitude in radians.
    pub east: f64,
    /// Northernmost latitude in radians.
    pub north: f64,
}

impl GlobeRectangle {
    /// Create a rectangle from bounds in radians.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Longitudinal span in radians, accounting for antimeridian crossing.
    #[must_use]
    pub fn compute_width(&self) -> f64 {
        if self.east < self.west {
            self.east + std::f64::consts::TAU - self.west
        } else {
            self.east - self.west
        }
    }

    /// The center of the rectangle, at height zero.
    #[must_use]
    pub fn compute_center(&self) -> Cartographic {
        let mut east = self.east;
        if east < self.west {
            east += std::f64::consts::TAU;
        }
        let longitude = negative_pi_to_pi((self.west + east) * 0.5);
        Cartographic::new(longitude, (self.south + self.north) * 0.5, 0.0)
    }

    /// Whether the rectangle contains a cartographic position, heights
    /// ignored.
    #[must_use]
    pub fn contains(&self, position: &Cartographic) -> bool {
        let mut longitude = position.longitude;
        let latitude = position.latitude;

        let west = self.west;
        let mut east = self.east;
        if east < west {
            east += std::f64::consts::TAU;
            if longitude < 0.0 {
                longitude += std::f64::consts::TAU;
            }
        }

        (longitude > west || equals_epsilon(longitude, west, EPSILON14))
            && (longitude < east || equals_epsilon(longitude, east, EPSILON14))
            && latitude >= self.south
            && latitude <= self.north
    }

    /// The southwest corner at height zero.
    #[must_use]
    pub fn southwest(&self) -> Cartographic {
        Cartographic::new(self.west, self.south, 0.0)
    }

    /// The southeast corner at height zero.
    #[must_use]
    pub fn southeast(&self) -> Cartographic {
        Cartographic::new(self.east, self.south, 0.0)
    }

    /// The northwest corner at height zero.
    #[must_use]
    pub fn northwest(&self) -> Cartographic {
        Cartographic::new(self.west, self.north, 0.0)
    }

    /// The northeast corner at height zero.
    #[must_use]
    pub fn northeast(&self) -> Cartographic {
        Cartographic::new(self.east, self.north, 0.0)
    }
}

/// Remap an angle to the range [-pi, pi).
fn negative_pi_to_pi(angle: f64) -> f64 {
    zero_to_two_pi(angle + std::f64::consts::PI) - std::f64::consts::PI
}

/// Remap an angle to the range [0, 2*pi), keeping exact multiples of 2*pi
/// at 2*pi rather than collapsing them to zero.
fn zero_to_two_pi(angle: f64) -> f64 {
    let modulo = positive_mod(angle, std::f64::consts::TAU);
    if modulo.abs() < EPSILON14 && angle.abs() > EPSILON14 {
        std::f64::consts::TAU
    } else {
        modulo
    }
}

fn positive_mod(m: f64, n: f64) -> f64 {
    ((m % n) + n) % n
}

fn equals_epsilon(left: f64, right: f64, relative_epsilon: f64) -> bool {
    let diff = (left - right).abs();
    diff <= relative_epsilon || diff <= relative_epsilon * left.abs().max(right.abs())
}

/// The sign of a value: -1, 1, or the value itself when zero or NaN.
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        value
    }
}
