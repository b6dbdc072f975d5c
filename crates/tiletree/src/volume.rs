//! Bounding volumes and the plane tests used for culling.
//!
//! A tile carries one of three volume shapes. Culling tests each volume
//! against the camera's frustum planes one plane at a time; LOD selection
//! asks each volume for its squared distance to the camera position.

use glam::{DMat3, DMat4, DVec3};

use crate::region::BoundingRegion;

/// Threshold below which a ray and plane count as parallel.
const PARALLEL_EPSILON: f64 = 1e-15;

/// Which side of a plane a volume lies on.
///
/// Sides are named from the plane normal's point of view: `Inside` means
/// entirely on the side the normal points toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    /// Entirely on the side the plane normal points toward.
    Inside,
    /// Entirely on the opposite side.
    Outside,
    /// Straddling the plane.
    Intersecting,
}

/// A plane in Hessian normal form: `normal.dot(p) + distance == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal of the plane.
    pub normal: DVec3,
    /// Signed shortest distance from the origin to the plane.
    pub distance: f64,
}

impl Plane {
    /// Create a plane from a unit normal and its origin distance.
    #[must_use]
    pub const fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Create the plane through `point` with the given unit normal.
    #[must_use]
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        Self::new(normal, -normal.dot(point))
    }

    /// Signed distance from the plane to a point, positive on the normal
    /// side.
    #[must_use]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }

    /// Project a point onto the plane.
    #[must_use]
    pub fn project_point(&self, point: DVec3) -> DVec3 {
        point - self.normal * self.signed_distance(point)
    }

    /// Where the ray from `origin` along `direction` first hits the plane,
    /// if it does.
    #[must_use]
    pub fn intersect_ray(&self, origin: DVec3, direction: DVec3) -> Option<DVec3> {
        let denominator = self.normal.dot(direction);
        if denominator.abs() < PARALLEL_EPSILON {
            return None;
        }
        let t = (-self.distance - self.normal.dot(origin)) / denominator;
        if t < 0.0 {
            return None;
        }
        Some(origin + direction * t)
    }
}

/// An oriented bounding box: a center plus three half-axis vectors stored
/// as the columns of a matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    /// Center of the box.
    pub center: DVec3,
    /// Half-axis vectors as matrix columns; their lengths are the box's
    /// half-extents.
    pub half_axes: DMat3,
}

impl OrientedBox {
    /// Create a box from its center and half-axis columns.
    #[must_use]
    pub const fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Create an axis-aligned box from its center and half-extents.
    #[must_use]
    pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
        Self::new(
            center,
            DMat3::from_cols(
                DVec3::new(half_extents.x, 0.0, 0.0),
                DVec3::new(0.0, half_extents.y, 0.0),
                DVec3::new(0.0, 0.0, half_extents.z),
            ),
        )
    }

    /// Build a box from extents measured along the axes of a plane frame.
    ///
    /// The frame is given by an origin and three orthonormal axes; the six
    /// extents are signed offsets along those axes.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn from_plane_extents(
        origin: DVec3,
        x_axis: DVec3,
        y_axis: DVec3,
        z_axis: DVec3,
        minimum_x: f64,
        maximum_x: f64,
        minimum_y: f64,
        maximum_y: f64,
        minimum_z: f64,
        maximum_z: f64,
    ) -> Self {
        let axes = DMat3::from_cols(x_axis, y_axis, z_axis);

        let center_offset = DVec3::new(
            (minimum_x + maximum_x) / 2.0,
            (minimum_y + maximum_y) / 2.0,
            (minimum_z + maximum_z) / 2.0,
        );

        let scale = DVec3::new(
            (maximum_x - minimum_x) / 2.0,
            (maximum_y - minimum_y) / 2.0,
            (maximum_z - minimum_z) / 2.0,
        );

        let half_axes = DMat3::from_cols(
            axes.x_axis * scale.x,
            axes.y_axis * scale.y,
            axes.z_axis * scale.z,
        );

        Self::new(origin + axes * center_offset, half_axes)
    }

    /// Which side of a plane the box lies on.
    ///
    /// Projects each half-axis onto the plane normal; the sum of absolute
    /// projections is the box's effective radius along that normal.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> PlaneSide {
        let normal = plane.normal;

        let effective_radius = self.half_axes.x_axis.dot(normal).abs()
            + self.half_axes.y_axis.dot(normal).abs()
            + self.half_axes.z_axis.dot(normal).abs();

        let distance_to_plane = plane.signed_distance(self.center);

        if distance_to_plane <= -effective_radius {
            PlaneSide::Outside
        } else if distance_to_plane >= effective_radius {
            PlaneSide::Inside
        } else {
            PlaneSide::Intersecting
        }
    }

    /// Squared distance from a point to the nearest point on the box.
    ///
    /// Zero when the point is inside.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let offset = position - self.center;

        let u = self.half_axes.x_axis;
        let v = self.half_axes.y_axis;
        let w = self.half_axes.z_axis;

        let u_half = u.length();
        let v_half = v.length();
        let w_half = w.length();

        // Coordinates of the offset in the box's unit frame.
        let p = DVec3::new(
            offset.dot(u / u_half),
            offset.dot(v / v_half),
            offset.dot(w / w_half),
        );

        let mut distance_squared = 0.0;

        if p.x < -u_half {
            let d = p.x + u_half;
            distance_squared += d * d;
        } else if p.x > u_half {
            let d = p.x - u_half;
            distance_squared += d * d;
        }

        if p.y < -v_half {
            let d = p.y + v_half;
            distance_squared += d * d;
        } else if p.y > v_half {
            let d = p.y - v_half;
            distance_squared += d * d;
        }

        if p.z < -w_half {
            let d = p.z + w_half;
            distance_squared += d * d;
        } else if p.z > w_half {
            let d = p.z - w_half;
            distance_squared += d * d;
        }

        distance_squared
    }

    /// Apply an affine transform to the box.
    #[must_use]
    pub fn transform(&self, matrix: &DMat4) -> Self {
        Self::new(
            matrix.transform_point3(self.center),
            DMat3::from_mat4(*matrix) * self.half_axes,
        )
    }
}

/// A bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// Center of the sphere.
    pub center: DVec3,
    /// Radius of the sphere.
    pub radius: f64,
}

impl BoundingSphere {
    /// Create a sphere from its center and radius.
    #[must_use]
    pub const fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Which side of a plane the sphere lies on.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> PlaneSide {
        let distance_to_plane = plane.signed_distance(self.center);

        if distance_to_plane < -self.radius {
            PlaneSide::Outside
        } else if distance_to_plane < self.radius {
            PlaneSide::Intersecting
        } else {
            PlaneSide::Inside
        }
    }

    /// Squared distance from a point to the sphere surface, zero inside.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let distance = ((position - self.center).length() - self.radius).max(0.0);
        distance * distance
    }

    /// Apply an affine transform to the sphere.
    ///
    /// The radius scales by the largest column length of the transform's
    /// linear part, so non-uniform scales stay conservative.
    #[must_use]
    pub fn transform(&self, matrix: &DMat4) -> Self {
        let uniform_scale = matrix
            .x_axis
            .truncate()
            .length()
            .max(matrix.y_axis.truncate().length())
            .max(matrix.z_axis.truncate().length());

        Self::new(
            matrix.transform_point3(self.center),
            self.radius * uniform_scale,
        )
    }
}

/// The bounding volume variants a tile can carry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    /// An oriented bounding box.
    Box(OrientedBox),
    /// A geographic extent with a height band, fixed to the globe frame.
    Region(BoundingRegion),
    /// A bounding sphere.
    Sphere(BoundingSphere),
}

impl BoundingVolume {
    /// Which side of a plane the volume lies on.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> PlaneSide {
        match self {
            BoundingVolume::Box(boxed) => boxed.intersect_plane(plane),
            BoundingVolume::Region(region) => region.intersect_plane(plane),
            BoundingVolume::Sphere(sphere) => sphere.intersect_plane(plane),
        }
    }

    /// Squared distance from a point to the volume, zero inside.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        match self {
            BoundingVolume::Box(boxed) => boxed.distance_squared_to(position),
            BoundingVolume::Region(region) => region.distance_squared_to(position),
            BoundingVolume::Sphere(sphere) => sphere.distance_squared_to(position),
        }
    }

    /// Apply an affine transform to the volume.
    ///
    /// Regions are already expressed in the fixed globe frame and pass
    /// through unchanged.
    #[must_use]
    pub fn transform(&self, matrix: &DMat4) -> Self {
        match self {
            BoundingVolume::Box(boxed) => BoundingVolume::Box(boxed.transform(matrix)),
            BoundingVolume::Region(_) => *self,
            BoundingVolume::Sphere(sphere) => BoundingVolume::Sphere(sphere.transform(matrix)),
        }
    }

    /// A representative center point of the volume.
    #[must_use]
    pub fn center(&self) -> DVec3 {
        match self {
            BoundingVolume::Box(boxed) => boxed.center,
            BoundingVolume::Region(region) => region.bounding_box().center,
            BoundingVolume::Sphere(sphere) => sphere.center,
        }
    }
}

impl From<OrientedBox> for BoundingVolume {
    fn from(value: OrientedBox) -> Self {
        BoundingVolume::Box(value)
    }
}

impl From<BoundingRegion> for BoundingVolume {
    fn from(value: BoundingRegion) -> Self {
        BoundingVolume::Region(value)
    }
}

impl From<BoundingSphere> for BoundingVolume {
    fn from(value: BoundingSphere) -> Self {
        BoundingVolume::Sphere(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_box_plane_sides() {
        let boxed = OrientedBox::from_center_half_extents(DVec3::ZERO, DVec3::ONE);

        // Plane x = -2, normal +x: the box is fully on the normal side.
        let inside = Plane::new(DVec3::X, 2.0);
        assert_eq!(boxed.intersect_plane(&inside), PlaneSide::Inside);

        // Plane x = 2, normal +x: the box is fully behind.
        let outside = Plane::new(DVec3::X, -2.0);
        assert_eq!(boxed.intersect_plane(&outside), PlaneSide::Outside);

        // Plane x = 0 cuts the box.
        let through = Plane::new(DVec3::X, 0.0);
        assert_eq!(boxed.intersect_plane(&through), PlaneSide::Intersecting);
    }

    #[test]
    fn test_box_effective_radius_uses_all_axes() {
        // A box rotated 45 degrees around z reaches sqrt(2) along x.
        let half_axes = DMat3::from_rotation_z(std::f64::consts::FRAC_PI_4);
        let boxed = OrientedBox::new(DVec3::ZERO, half_axes);

        let plane = Plane::new(DVec3::X, -1.2);
        assert_eq!(boxed.intersect_plane(&plane), PlaneSide::Intersecting);

        let plane = Plane::new(DVec3::X, -1.5);
        assert_eq!(boxed.intersect_plane(&plane), PlaneSide::Outside);
    }

    #[test]
    fn test_box_distance_squared() {
        let boxed = OrientedBox::from_center_half_extents(DVec3::ZERO, DVec3::ONE);

        assert!(boxed.distance_squared_to(DVec3::new(0.5, -0.5, 0.25)).abs() < 1e-12);
        assert!((boxed.distance_squared_to(DVec3::new(3.0, 0.0, 0.0)) - 4.0).abs() < 1e-12);
        assert!((boxed.distance_squared_to(DVec3::new(2.0, 2.0, 0.0)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_sphere_plane_sides() {
        let sphere = BoundingSphere::new(DVec3::new(0.0, 0.0, 5.0), 1.0);

        let below = Plane::new(DVec3::Z, 0.0);
        assert_eq!(sphere.intersect_plane(&below), PlaneSide::Inside);

        let above = Plane::new(DVec3::Z, -10.0);
        assert_eq!(sphere.intersect_plane(&above), PlaneSide::Outside);

        let touching = Plane::new(DVec3::Z, -5.0);
        assert_eq!(sphere.intersect_plane(&touching), PlaneSide::Intersecting);
    }

    #[test]
    fn test_sphere_transform_scales_radius_conservatively() {
        let sphere = BoundingSphere::new(DVec3::X, 2.0);
        let matrix = DMat4::from_scale(DVec3::new(1.0, 3.0, 2.0));

        let transformed = sphere.transform(&matrix);
        assert!((transformed.radius - 6.0).abs() < 1e-12);
        assert!((transformed.center - DVec3::X).length() < 1e-12);
    }

    #[test]
    fn test_box_transform_moves_center_and_axes() {
        let boxed = OrientedBox::from_center_half_extents(DVec3::ZERO, DVec3::ONE);
        let matrix = DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0))
            * DMat4::from_scale(DVec3::splat(2.0));

        let transformed = boxed.transform(&matrix);
        assert!((transformed.center - DVec3::new(10.0, 0.0, 0.0)).length() < 1e-12);
        assert!((transformed.half_axes.x_axis.length() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_plane_extents_centers_offset() {
        let boxed = OrientedBox::from_plane_extents(
            DVec3::new(5.0, 0.0, 0.0),
            DVec3::X,
            DVec3::Y,
            DVec3::Z,
            -1.0,
            3.0,
            -2.0,
            2.0,
            0.0,
            4.0,
        );

        assert!((boxed.center - DVec3::new(6.0, 0.0, 2.0)).length() < 1e-12);
        assert!((boxed.half_axes.x_axis.length() - 2.0).abs() < 1e-12);
        assert!((boxed.half_axes.y_axis.length() - 2.0).abs() < 1e-12);
        assert!((boxed.half_axes.z_axis.length() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_ray_plane_intersection() {
        let plane = Plane::new(DVec3::Z, -2.0);

        let hit = plane
            .intersect_ray(DVec3::ZERO, DVec3::Z)
            .expect("ray toward plane must hit");
        assert!((hit - DVec3::new(0.0, 0.0, 2.0)).length() < 1e-12);

        // Pointing away: no hit.
        assert!(plane.intersect_ray(DVec3::ZERO, -DVec3::Z).is_none());

        // Parallel: no hit.
        assert!(plane.intersect_ray(DVec3::ZERO, DVec3::X).is_none());
    }

    proptest! {
        #[test]
        fn test_sphere_side_flips_with_translation(
            x in -100.0f64..100.0,
            y in -100.0f64..100.0,
            z in -100.0f64..100.0,
            radius in 0.1f64..10.0,
        ) {
            let sphere = BoundingSphere::new(DVec3::new(x, y, z), radius);

            // Far along the normal: inside. Far against it: outside.
            let near = Plane::from_point_normal(
                DVec3::new(x, y, z) - DVec3::X * (radius + 1000.0),
                DVec3::X,
            );
            let far = Plane::from_point_normal(
                DVec3::new(x, y, z) + DVec3::X * (radius + 1000.0),
                DVec3::X,
            );
            prop_assert_eq!(sphere.intersect_plane(&near), PlaneSide::Inside);
            prop_assert_eq!(sphere.intersect_plane(&far), PlaneSide::Outside);
        }

        #[test]
        fn test_box_distance_zero_inside(
            x in -0.9f64..0.9,
            y in -0.9f64..0.9,
            z in -0.9f64..0.9,
        ) {
            let boxed = OrientedBox::from_center_half_extents(DVec3::ZERO, DVec3::ONE);
            prop_assert!(boxed.distance_squared_to(DVec3::new(x, y, z)) < 1e-12);
        }
    }
}
