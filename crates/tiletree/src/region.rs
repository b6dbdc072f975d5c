//! Geographic bounding regions over a reference ellipsoid.
//!
//! A region is a longitude/latitude rectangle with a height band. For plane
//! tests it fits an oriented box around itself once at construction; for
//! distance queries it keeps the bounding planes of its four edges plus the
//! height band, which stays accurate even for large regions where the
//! fitted box is loose.

use glam::{DVec2, DVec3};

use crate::geodetic::{Cartographic, EPSILON10, Ellipsoid, GlobeRectangle};
use crate::volume::{OrientedBox, Plane, PlaneSide};

/// A plane tangent to an ellipsoid at a surface point, with local east and
/// north axes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EllipsoidTangentPlane {
    origin: DVec3,
    x_axis: DVec3,
    y_axis: DVec3,
    plane: Plane,
}

impl EllipsoidTangentPlane {
    /// Create the tangent plane at a point already on the ellipsoid
    /// surface.
    pub(crate) fn new(origin: DVec3, ellipsoid: &Ellipsoid) -> Self {
        let normal = ellipsoid.geodetic_surface_normal(origin);

        // East/north frame; fall back to an arbitrary orthonormal frame at
        // the poles where east is undefined.
        let east = DVec3::Z.cross(normal);
        let x_axis = if east.length_squared() < EPSILON10 {
            DVec3::Y
        } else {
            east.normalize()
        };
        let y_axis = normal.cross(x_axis);

        Self {
            origin,
            x_axis,
            y_axis,
            plane: Plane::from_point_normal(origin, normal),
        }
    }

    pub(crate) fn origin(&self) -> DVec3 {
        self.origin
    }

    pub(crate) fn x_axis(&self) -> DVec3 {
        self.x_axis
    }

    pub(crate) fn y_axis(&self) -> DVec3 {
        self.y_axis
    }

    pub(crate) fn z_axis(&self) -> DVec3 {
        self.plane.normal
    }

    pub(crate) fn plane(&self) -> &Plane {
        &self.plane
    }

    /// Project a point onto the plane along the plane normal and express it
    /// in the plane's east/north coordinates.
    pub(crate) fn project_point_to_nearest_on_plane(&self, point: DVec3) -> DVec2 {
        let intersection = self
            .plane
            .intersect_ray(point, self.plane.normal)
            .or_else(|| self.plane.intersect_ray(point, -self.plane.normal))
            .unwrap_or(point);

        let v = intersection - self.origin;
        DVec2::new(self.x_axis.dot(v), self.y_axis.dot(v))
    }
}

/// A longitude/latitude rectangle with a height band, bounding geometry on
/// an ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRegion {
    rectangle: GlobeRectangle,
    minimum_height: f64,
    maximum_height: f64,
    bounding_box: OrientedBox,
    southwest_corner: DVec3,
    northeast_corner: DVec3,
    west_normal: DVec3,
    east_normal: DVec3,
    south_normal: DVec3,
    north_normal: DVec3,
    ellipsoid: Ellipsoid,
}

impl BoundingRegion {
    /// Create a region from a rectangle and a height band over an
    /// ellipsoid.
    #[must_use]
    pub fn new(
        rectangle: GlobeRectangle,
        minimum_height: f64,
        maximum_height: f64,
        ellipsoid: &Ellipsoid,
    ) -> Self {
        let bounding_box =
            Self::compute_bounding_box(&rectangle, minimum_height, maximum_height, ellipsoid);

        let mut southwest_corner = ellipsoid.cartographic_to_cartesian(&rectangle.southwest());
        let mut northeast_corner = ellipsoid.cartographic_to_cartesian(&rectangle.northeast());

        let mid_latitude = (rectangle.south + rectangle.north) * 0.5;
        let mid_longitude = (rectangle.west + rectangle.east) * 0.5;

        // The middle latitude on the western edge.
        let western_midpoint = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            rectangle.west,
            mid_latitude,
            0.0,
        ));

        let west_normal = western_midpoint.cross(DVec3::Z).normalize();

        // The middle latitude on the eastern edge.
        let eastern_midpoint = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            rectangle.east,
            mid_latitude,
            0.0,
        ));

        let east_normal = DVec3::Z.cross(eastern_midpoint).normalize();

        let west_vector = western_midpoint - eastern_midpoint;
        let east_west_normal = west_vector.normalize();

        // Plane bounding the southern edge.
        let south_surface_normal = if rectangle.south > 0.0 {
            // The rectangle is entirely above the equator; slide the
            // southwest corner so the south plane does not cut the tile.
            let south_center = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
                mid_longitude,
                rectangle.south,
                0.0,
            ));
            let west_plane = Plane::from_point_normal(southwest_corner, west_normal);
            if let Some(corner) = west_plane.intersect_ray(south_center, east_west_normal) {
                southwest_corner = corner;
            }
            ellipsoid.geodetic_surface_normal(south_center)
        } else {
            ellipsoid.geodetic_surface_normal_cartographic(&rectangle.southeast())
        };
        let south_normal = south_surface_normal.cross(west_vector).normalize();

        // Plane bounding the northern edge.
        let north_surface_normal = if rectangle.north < 0.0 {
            // The rectangle is entirely below the equator; slide the
            // northeast corner so the north plane does not cut the tile.
            let north_center = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
                mid_longitude,
                rectangle.north,
                0.0,
            ));
            let east_plane = Plane::from_point_normal(northeast_corner, east_normal);
            if let Some(corner) = east_plane.intersect_ray(north_center, -east_west_normal) {
                northeast_corner = corner;
            }
            ellipsoid.geodetic_surface_normal(north_center)
        } else {
            ellipsoid.geodetic_surface_normal_cartographic(&rectangle.northwest())
        };
        let north_normal = west_vector.cross(north_surface_normal).normalize();

        Self {
            rectangle,
            minimum_height,
            maximum_height,
            bounding_box,
            southwest_corner,
            northeast_corner,
            west_normal,
            east_normal,
            south_normal,
            north_normal,
            ellipsoid: *ellipsoid,
        }
    }

    /// The geographic rectangle.
    #[must_use]
    pub const fn rectangle(&self) -> &GlobeRectangle {
        &self.rectangle
    }

    /// The bottom of the height band, in meters above the ellipsoid.
    #[must_use]
    pub const fn minimum_height(&self) -> f64 {
        self.minimum_height
    }

    /// The top of the height band, in meters above the ellipsoid.
    #[must_use]
    pub const fn maximum_height(&self) -> f64 {
        self.maximum_height
    }

    /// The oriented box fitted around the region at construction.
    #[must_use]
    pub const fn bounding_box(&self) -> &OrientedBox {
        &self.bounding_box
    }

    /// Which side of a plane the region lies on, via the fitted box.
    #[must_use]
    pub fn intersect_plane(&self, plane: &Plane) -> PlaneSide {
        self.bounding_box.intersect_plane(plane)
    }

    /// Squared distance from a Cartesian position to the region.
    ///
    /// Zero when the position is inside the rectangle and the height band.
    #[must_use]
    pub fn distance_squared_to(&self, position: DVec3) -> f64 {
        let Some(cartographic) = self.ellipsoid.cartesian_to_cartographic(position) else {
            // The ellipsoid center projects nowhere; treat it as touching.
            return 0.0;
        };
        self.distance_squared_to_cartographic(&cartographic, position)
    }

    fn distance_squared_to_cartographic(
        &self,
        cartographic: &Cartographic,
        position: DVec3,
    ) -> f64 {
        let mut result = 0.0;

        if !self.rectangle.contains(cartographic) {
            let from_southwest = position - self.southwest_corner;
            let distance_to_west_plane = from_southwest.dot(self.west_normal);
            let distance_to_south_plane = from_southwest.dot(self.south_normal);

            let from_northeast = position - self.northeast_corner;
            let distance_to_east_plane = from_northeast.dot(self.east_normal);
            let distance_to_north_plane = from_northeast.dot(self.north_normal);

            if distance_to_west_plane > 0.0 {
                result += distance_to_west_plane * distance_to_west_plane;
            } else if distance_to_east_plane > 0.0 {
                result += distance_to_east_plane * distance_to_east_plane;
            }

            if distance_to_south_plane > 0.0 {
                result += distance_to_south_plane * distance_to_south_plane;
            } else if distance_to_north_plane > 0.0 {
                result += distance_to_north_plane * distance_to_north_plane;
            }
        }

        let camera_height = cartographic.height;
        if camera_height > self.maximum_height {
            let distance_above_top = camera_height - self.maximum_height;
            result += distance_above_top * distance_above_top;
        } else if camera_height < self.minimum_height {
            let distance_below_bottom = self.minimum_height - camera_height;
            result += distance_below_bottom * distance_below_bottom;
        }

        result
    }

    fn compute_bounding_box(
        rectangle: &GlobeRectangle,
        minimum_height: f64,
        maximum_height: f64,
        ellipsoid: &Ellipsoid,
    ) -> OrientedBox {
        if rectangle.compute_width() <= std::f64::consts::PI {
            // The box aligns with the tangent plane at the rectangle's
            // center.
            let tangent_point_cartographic = rectangle.compute_center();
            let tangent_point = ellipsoid.cartographic_to_cartesian(&tangent_point_cartographic);
            let tangent_plane = EllipsoidTangentPlane::new(tangent_point, ellipsoid);
            let plane = tangent_plane.plane();

            let lon_center = tangent_point_cartographic.longitude;
            // A rectangle that spans the equator sticks out farthest at the
            // equator, so measure the center-west extent there.
            let lat_center = if rectangle.south < 0.0 && rectangle.north > 0.0 {
                0.0
            } else {
                tangent_point_cartographic.latitude
            };

            // XY extents come from the rectangle perimeter at maximum
            // height.
            let mut perimeter_nw =
                Cartographic::new(rectangle.west, rectangle.north, maximum_height);
            let mut perimeter_sw =
                Cartographic::new(rectangle.west, rectangle.south, maximum_height);
            let perimeter_nc = Cartographic::new(lon_center, rectangle.north, maximum_height);
            let perimeter_cw = Cartographic::new(rectangle.west, lat_center, maximum_height);
            let perimeter_sc = Cartographic::new(lon_center, rectangle.south, maximum_height);

            let projected_nc = tangent_plane.project_point_to_nearest_on_plane(
                ellipsoid.cartographic_to_cartesian(&perimeter_nc),
            );
            let projected_nw = tangent_plane.project_point_to_nearest_on_plane(
                ellipsoid.cartographic_to_cartesian(&perimeter_nw),
            );
            let projected_cw = tangent_plane.project_point_to_nearest_on_plane(
                ellipsoid.cartographic_to_cartesian(&perimeter_cw),
            );
            let projected_sw = tangent_plane.project_point_to_nearest_on_plane(
                ellipsoid.cartographic_to_cartesian(&perimeter_sw),
            );
            let projected_sc = tangent_plane.project_point_to_nearest_on_plane(
                ellipsoid.cartographic_to_cartesian(&perimeter_sc),
            );

            let minimum_x = projected_nw.x.min(projected_cw.x).min(projected_sw.x);
            let maximum_x = -minimum_x; // symmetrical

            let maximum_y = projected_nw.y.max(projected_nc.y);
            let minimum_y = projected_sw.y.min(projected_sc.y);

            // The minimum Z uses the perimeter at minimum height, which
            // dips deeper below the tangent plane than the maximum height
            // does.
            perimeter_nw.height = minimum_height;
            perimeter_sw.height = minimum_height;
            let minimum_z = plane
                .signed_distance(ellipsoid.cartographic_to_cartesian(&perimeter_nw))
                .min(plane.signed_distance(ellipsoid.cartographic_to_cartesian(&perimeter_sw)));
            // The tangent plane touches the surface at height zero, so the
            // maximum height bounds Z from above.
            let maximum_z = maximum_height;

            return OrientedBox::from_plane_extents(
                tangent_plane.origin(),
                tangent_plane.x_axis(),
                tangent_plane.y_axis(),
                tangent_plane.z_axis(),
                minimum_x,
                maximum_x,
                minimum_y,
                maximum_y,
                minimum_z,
                maximum_z,
            );
        }

        // The rectangle wraps around more than half the ellipsoid. Fit a
        // frame that rotates around the Z axis instead, anchored at the
        // latitude nearest the equator where the rectangle bulges farthest.
        let fully_above_equator = rectangle.south > 0.0;
        let fully_below_equator = rectangle.north < 0.0;
        let latitude_nearest_to_equator = if fully_above_equator {
            rectangle.south
        } else if fully_below_equator {
            rectangle.north
        } else {
            0.0
        };
        let center_longitude = rectangle.compute_center().longitude;

        let mut plane_origin = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            center_longitude,
            latitude_nearest_to_equator,
            maximum_height,
        ));
        // Center the frame on the equator so the normal is horizontal.
        plane_origin.z = 0.0;
        let is_pole = plane_origin.x.abs() < EPSILON10 && plane_origin.y.abs() < EPSILON10;
        let plane_normal = if is_pole {
            DVec3::X
        } else {
            plane_origin.normalize()
        };
        let plane_y_axis = DVec3::Z;
        let plane_x_axis = plane_normal.cross(plane_y_axis);
        let plane = Plane::from_point_normal(plane_origin, plane_normal);

        // The horizon point is the farthest extent along the frame's X.
        let horizon = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            center_longitude + std::f64::consts::FRAC_PI_2,
            latitude_nearest_to_equator,
            maximum_height,
        ));
        let maximum_x = plane.project_point(horizon).dot(plane_x_axis);
        let minimum_x = -maximum_x; // symmetrical

        // Min and max Y use whichever height yields the larger extent.
        let maximum_y = ellipsoid
            .cartographic_to_cartesian(&Cartographic::new(
                0.0,
                rectangle.north,
                if fully_below_equator {
                    minimum_height
                } else {
                    maximum_height
                },
            ))
            .z;
        let minimum_y = ellipsoid
            .cartographic_to_cartesian(&Cartographic::new(
                0.0,
                rectangle.south,
                if fully_above_equator {
                    minimum_height
                } else {
                    maximum_height
                },
            ))
            .z;

        let far_z = ellipsoid.cartographic_to_cartesian(&Cartographic::new(
            rectangle.east,
            latitude_nearest_to_equator,
            maximum_height,
        ));
        let minimum_z = plane.signed_distance(far_z);
        // The frame origin already sits at the outermost extent.
        let maximum_z = 0.0;

        OrientedBox::from_plane_extents(
            plane_origin,
            plane_x_axis,
            plane_y_axis,
            plane_normal,
            minimum_x,
            maximum_x,
            minimum_y,
            maximum_y,
            minimum_z,
            maximum_z,
        )
    }
}
