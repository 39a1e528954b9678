//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the projection helpers the renderer uses.
//! All vector arithmetic is nalgebra's componentwise arithmetic.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Position, rotation and scale of a drawable
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in world space
    pub position: Vec3,
    /// Rotation quaternion
    pub rotation: Quat,
    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with only a position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform from position, rotation and scale
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// Rotate by `angle` radians around `axis`
    pub fn rotate(&mut self, axis: &Vec3, angle: f32) {
        let axis = Unit::new_normalize(*axis);
        self.rotation = Quat::from_axis_angle(&axis, angle) * self.rotation;
    }

    /// Model matrix: translation * rotation * scale
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Translation component of a model matrix
pub fn matrix_position(matrix: &Mat4) -> Vec3 {
    Vec3::new(matrix.m14, matrix.m24, matrix.m34)
}

/// Right-handed perspective projection with a Y flip and a `[0, 1]` depth range.
pub fn perspective(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y_radians * 0.5).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = f / aspect;
    m[(1, 1)] = -f;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = (near * far) / (near - far);
    m[(3, 2)] = -1.0;
    m
}

/// Orthographic projection with a `[0, 1]` depth range, origin at `left, top`.
pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let mut m = Mat4::identity();
    m[(0, 0)] = 2.0 / (right - left);
    m[(1, 1)] = 2.0 / (bottom - top);
    m[(2, 2)] = 1.0 / (near - far);
    m[(0, 3)] = -(right + left) / (right - left);
    m[(1, 3)] = -(bottom + top) / (bottom - top);
    m[(2, 3)] = near / (near - far);
    m
}

/// Degrees to radians
pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees.to_radians()
}

/// Round `value` up to the next multiple of `alignment`. A zero alignment leaves the value unchanged.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) / alignment * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 4), 16);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn test_vector_subtraction_is_componentwise() {
        let a = Vec3::new(5.0, 7.0, 9.0);
        let b = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(a - b, Vec3::new(4.0, 5.0, 6.0));

        let c = Vec2::new(6.0, 8.0);
        let d = Vec2::new(2.0, 4.0);
        assert_eq!(c.component_div(&d), Vec2::new(3.0, 2.0));
        assert_eq!(c.component_mul(&d), Vec2::new(12.0, 32.0));
    }

    #[test]
    fn test_transform_matrix_translation() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        let matrix = transform.to_matrix();
        assert_relative_eq!(matrix_position(&matrix), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_perspective_maps_near_plane_to_zero_depth() {
        let proj = perspective(deg_to_rad(45.0), 800.0 / 600.0, 0.1, 1000.0);
        let p = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert_relative_eq!(p.z / p.w, 0.0, epsilon = 1e-5);
        let p = proj * Vec4::new(0.0, 0.0, -1000.0, 1.0);
        assert_relative_eq!(p.z / p.w, 1.0, epsilon = 1e-4);
    }
}
