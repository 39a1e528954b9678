//! Euler-angle camera
//!
//! Position plus pitch/yaw/roll in radians. The view matrix is the inverse of
//! the camera's world transform and is only rebuilt after the camera moves.

use crate::foundation::math::{Mat4, Quat, Vec3};
use std::cell::Cell;

/// Pitch is kept just short of straight up or down
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Free-look camera used by the world and skybox views
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    // x = pitch, y = yaw, z = roll
    euler_rotation: Vec3,
    view: Cell<Option<Mat4>>,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::zeros())
    }
}

impl Camera {
    /// Camera at `position` looking down -Z
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            euler_rotation: Vec3::zeros(),
            view: Cell::new(None),
        }
    }

    /// World-space position
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Pitch, yaw and roll in radians
    pub fn rotation(&self) -> Vec3 {
        self.euler_rotation
    }

    /// Move the camera
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.view.set(None);
    }

    /// Set pitch, yaw and roll in radians. Pitch is clamped short of the poles.
    pub fn set_rotation(&mut self, euler_rotation: Vec3) {
        self.euler_rotation = euler_rotation;
        self.euler_rotation.x = self.euler_rotation.x.clamp(-PITCH_LIMIT, PITCH_LIMIT);
        self.view.set(None);
    }

    /// Turn around the world Y axis
    pub fn yaw(&mut self, amount: f32) {
        let mut rotation = self.euler_rotation;
        rotation.y += amount;
        self.set_rotation(rotation);
    }

    /// Tilt up or down
    pub fn pitch(&mut self, amount: f32) {
        let mut rotation = self.euler_rotation;
        rotation.x += amount;
        self.set_rotation(rotation);
    }

    fn orientation(&self) -> Quat {
        Quat::from_euler_angles(self.euler_rotation.x, self.euler_rotation.y, self.euler_rotation.z)
    }

    /// Unit vector the camera looks along
    pub fn forward(&self) -> Vec3 {
        self.orientation() * -Vec3::z()
    }

    /// Unit vector to the camera's right
    pub fn right(&self) -> Vec3 {
        self.orientation() * Vec3::x()
    }

    /// Move along the view direction
    pub fn move_forward(&mut self, amount: f32) {
        let position = self.position + self.forward() * amount;
        self.set_position(position);
    }

    /// Strafe along the right vector
    pub fn move_right(&mut self, amount: f32) {
        let position = self.position + self.right() * amount;
        self.set_position(position);
    }

    /// Move along world Y
    pub fn move_up(&mut self, amount: f32) {
        let position = self.position + Vec3::y() * amount;
        self.set_position(position);
    }

    /// World-to-view matrix
    pub fn view(&self) -> Mat4 {
        if let Some(view) = self.view.get() {
            return view;
        }
        let world = Mat4::new_translation(&self.position) * self.orientation().to_homogeneous();
        let view = world.try_inverse().unwrap_or_else(Mat4::identity);
        self.view.set(Some(view));
        view
    }

    /// View matrix with translation removed, for the skybox
    pub fn rotation_only_view(&self) -> Mat4 {
        let mut view = self.view();
        view.m14 = 0.0;
        view.m24 = 0.0;
        view.m34 = 0.0;
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_view_translates_world_opposite_to_camera() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 10.0));
        let p = camera.view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.z, -10.0, epsilon = 1e-5);
    }

    #[test]
    fn test_view_recomputed_after_move() {
        let mut camera = Camera::new(Vec3::zeros());
        let before = camera.view();
        camera.move_forward(2.0);
        assert_relative_eq!(camera.position(), Vec3::new(0.0, 0.0, -2.0), epsilon = 1e-5);
        assert_ne!(before, camera.view());
    }

    #[test]
    fn test_yaw_turns_forward_vector() {
        let mut camera = Camera::default();
        camera.yaw(std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(camera.forward(), Vec3::new(-1.0, 0.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_pitch_clamped() {
        let mut camera = Camera::default();
        camera.pitch(10.0);
        assert!(camera.rotation().x < std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn test_rotation_only_view_drops_translation() {
        let camera = Camera::new(Vec3::new(3.0, 4.0, 5.0));
        let view = camera.rotation_only_view();
        assert_relative_eq!(view.m14, 0.0);
        assert_relative_eq!(view.m34, 0.0);
    }
}
