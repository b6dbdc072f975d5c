//! Camera snapshot, frustum culling volume, and screen-space error.
//!
//! The camera is a per-frame value: position and orientation in world
//! space, viewport size in pixels, and the two fields of view. Derived
//! state (the screen-space-error denominator and the four lateral frustum
//! planes) is recomputed whenever the view parameters change, never per
//! tile.

use glam::{DVec2, DVec3};

use crate::volume::{BoundingVolume, Plane, PlaneSide};

/// Distances below this count as the camera being inside the volume, where
/// screen-space error is taken as infinite.
const MINIMUM_DISTANCE: f64 = 1e-7;

/// A camera's view of a tileset for one frame.
#[derive(Debug, Clone)]
pub struct Camera {
    position: DVec3,
    direction: DVec3,
    up: DVec3,
    viewport_size: DVec2,
    horizontal_field_of_view: f64,
    vertical_field_of_view: f64,
    sse_denominator: f64,
    left_plane: Plane,
    right_plane: Plane,
    bottom_plane: Plane,
    top_plane: Plane,
}

impl Camera {
    /// Create a camera snapshot.
    ///
    /// `direction` and `up` must be unit length and orthogonal; the
    /// viewport size is in pixels and the fields of view in radians.
    #[must_use]
    pub fn new(
        position: DVec3,
        direction: DVec3,
        up: DVec3,
        viewport_size: DVec2,
        horizontal_field_of_view: f64,
        vertical_field_of_view: f64,
    ) -> Self {
        let mut camera = Self {
            position,
            direction,
            up,
            viewport_size,
            horizontal_field_of_view,
            vertical_field_of_view,
            sse_denominator: 0.0,
            left_plane: Plane::new(DVec3::Z, 0.0),
            right_plane: Plane::new(DVec3::Z, 0.0),
            bottom_plane: Plane::new(DVec3::Z, 0.0),
            top_plane: Plane::new(DVec3::Z, 0.0),
        };
        camera.update_view_parameters(
            viewport_size,
            horizontal_field_of_view,
            vertical_field_of_view,
        );
        camera
    }

    /// The camera position in world space.
    #[must_use]
    pub const fn position(&self) -> DVec3 {
        self.position
    }

    /// The unit view direction.
    #[must_use]
    pub const fn direction(&self) -> DVec3 {
        self.direction
    }

    /// The unit up vector.
    #[must_use]
    pub const fn up(&self) -> DVec3 {
        self.up
    }

    /// The viewport size in pixels.
    #[must_use]
    pub const fn viewport_size(&self) -> DVec2 {
        self.viewport_size
    }

    /// Move or turn the camera, keeping the view parameters.
    pub fn update_position_and_orientation(
        &mut self,
        position: DVec3,
        direction: DVec3,
        up: DVec3,
    ) {
        self.position = position;
        self.direction = direction;
        self.up = up;

        self.update_culling_volume();
    }

    /// Change the viewport or fields of view.
    pub fn update_view_parameters(
        &mut self,
        viewport_size: DVec2,
        horizontal_field_of_view: f64,
        vertical_field_of_view: f64,
    ) {
        self.viewport_size = viewport_size;
        self.horizontal_field_of_view = horizontal_field_of_view;
        self.vertical_field_of_view = vertical_field_of_view;

        self.sse_denominator = 2.0 * (0.5 * vertical_field_of_view).tan();

        self.update_culling_volume();
    }

    /// Rebuild the four lateral frustum planes from the current view.
    ///
    /// Each plane passes through the camera position with its normal
    /// pointing into the frustum, so a volume fully behind any plane is
    /// out of view.
    fn update_culling_volume(&mut self) {
        let t = (0.5 * self.vertical_field_of_view).tan();
        let b = -t;
        let r = (0.5 * self.horizontal_field_of_view).tan();
        let l = -r;

        let right = self.direction.cross(self.up);
        let near_center = self.position + self.direction;

        let left_edge = near_center + right * l - self.position;
        let normal = left_edge.cross(self.up).normalize();
        self.left_plane = Plane::from_point_normal(self.position, normal);

        let right_edge = near_center + right * r - self.position;
        let normal = self.up.cross(right_edge).normalize();
        self.right_plane = Plane::from_point_normal(self.position, normal);

        let bottom_edge = near_center + self.up * b - self.position;
        let normal = right.cross(bottom_edge).normalize();
        self.bottom_plane = Plane::from_point_normal(self.position, normal);

        let top_edge = near_center + self.up * t - self.position;
        let normal = top_edge.cross(right).normalize();
        self.top_plane = Plane::from_point_normal(self.position, normal);
    }

    /// Whether any part of a bounding volume is inside the view frustum.
    #[must_use]
    pub fn is_bounding_volume_visible(&self, bounding_volume: &BoundingVolume) -> bool {
        for plane in [
            &self.left_plane,
            &self.right_plane,
            &self.top_plane,
            &self.bottom_plane,
        ] {
            if bounding_volume.intersect_plane(plane) == PlaneSide::Outside {
                return false;
            }
        }
        true
    }

    /// Squared distance from the camera to a bounding volume, zero inside.
    #[must_use]
    pub fn compute_distance_squared_to_bounding_volume(
        &self,
        bounding_volume: &BoundingVolume,
    ) -> f64 {
        bounding_volume.distance_squared_to(self.position)
    }

    /// The error in pixels of rendering a tile with the given world-space
    /// geometric error at the given distance.
    ///
    /// Infinite when the camera is inside the volume, so the caller always
    /// refines rather than oscillating on a division by zero.
    #[must_use]
    pub fn compute_screen_space_error(&self, geometric_error: f64, distance: f64) -> f64 {
        if distance < MINIMUM_DISTANCE {
            return f64::INFINITY;
        }
        (geometric_error * self.viewport_size.y) / (distance * self.sse_denominator)
    }
}
