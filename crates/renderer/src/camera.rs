use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::persist::CameraState;

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Yaw/pitch fly camera driven by the preview window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub speed: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self::from_state(&CameraState::default())
    }
}

impl FlyCamera {
    pub fn from_state(state: &CameraState) -> Self {
        let rotation = Mat4::from_cols_array(&state.rotation).transpose();
        let (yaw, pitch, _) = Quat::from_mat4(&rotation).to_euler(EulerRot::YXZ);
        Self {
            position: Vec3::from_array(state.position),
            yaw,
            pitch,
            fov: state.fov,
            speed: state.speed,
        }
    }

    pub fn rotation(&self) -> Mat4 {
        Mat4::from_euler(EulerRot::YXZ, self.yaw, self.pitch, 0.0)
    }

    pub fn state(&self) -> CameraState {
        CameraState {
            position: self.position.to_array(),
            rotation: self.rotation().transpose().to_cols_array(),
            fov: self.fov,
            speed: self.speed,
        }
    }

    /// Moves along camera-local axes (x right, y up, z forward).
    pub fn translate_local(&mut self, local: Vec3) {
        self.position += self.rotation().transform_vector3(local);
    }

    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        self.yaw += yaw;
        self.pitch = (self.pitch + pitch).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_orientation() {
        let mut camera = FlyCamera::default();
        camera.rotate(0.7, -0.3);
        camera.position = Vec3::new(1.0, 2.0, 3.0);
        let restored = FlyCamera::from_state(&camera.state());
        assert!((restored.yaw - camera.yaw).abs() < 1e-4);
        assert!((restored.pitch - camera.pitch).abs() < 1e-4);
        assert_eq!(restored.position, camera.position);
    }

    #[test]
    fn speed_survives_the_state_record() {
        let mut camera = FlyCamera::default();
        camera.speed = 7.0;
        assert_eq!(camera.state().speed, 7.0);
        assert_eq!(FlyCamera::from_state(&camera.state()).speed, 7.0);
    }

    #[test]
    fn forward_follows_yaw() {
        let mut camera = FlyCamera::default();
        camera.position = Vec3::ZERO;
        camera.rotate(std::f32::consts::FRAC_PI_2, 0.0);
        camera.translate_local(Vec3::Z);
        assert!((camera.position - Vec3::X).length() < 1e-5);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = FlyCamera::default();
        camera.rotate(0.0, 10.0);
        assert!(camera.pitch < std::f32::consts::FRAC_PI_2);
    }
}
