// src/transform.rs - Detector pixel space to scene space
use nalgebra::Vector3;

pub type Point3 = Vector3<f64>;

/// Depth divisor for body landmarks.
pub const BODY_Z_SCALE: f64 = 400.0;
/// Depth divisor for hand landmarks. Hands cover a much smaller depth range in frame.
pub const HAND_Z_SCALE: f64 = 40.0;

const PIXELS_PER_UNIT: f64 = 100.0;

/// Centers x on the frame, lifts y so the bottom edge is the ground line, and
/// divides the detector's depth estimate by `z_scale`.
pub fn normalize(point: &Point3, frame_height: f64, frame_width: f64, z_scale: f64) -> Point3 {
    Point3::new(
        (point.x - frame_width / 2.0) / PIXELS_PER_UNIT,
        (point.y - frame_height) / PIXELS_PER_UNIT,
        point.z / z_scale,
    )
}

/// Detector convention (y down, z into the screen) to scene convention (z up).
pub fn to_scene_axes(point: &Point3) -> Point3 {
    Point3::new(point.x, point.z, -point.y)
}

/// Inverse of [`to_scene_axes`].
pub fn from_scene_axes(point: &Point3) -> Point3 {
    Point3::new(point.x, -point.z, point.y)
}

/// Arithmetic mean of the points, `None` for an empty slice.
pub fn centroid(points: &[Point3]) -> Option<Point3> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Point3::zeros(), |acc, p| acc + p);
    Some(sum / points.len() as f64)
}

/// Reads point `index` out of a flattened `x0,y0,z0,x1,...` frame.
pub fn point_at(frame: &[f64], index: usize) -> Point3 {
    Point3::new(frame[3 * index], frame[3 * index + 1], frame[3 * index + 2])
}
