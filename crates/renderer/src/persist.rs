use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Uniform fields with this prefix are user-tunable and survive restarts.
pub const PERSISTED_PREFIX: &str = "custom_";

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Fly speed in world units per second.
pub const DEFAULT_CAMERA_SPEED: f32 = 2.5;

/// Camera transform as the uniform block sees it, plus the fly speed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraState {
    pub position: [f32; 3],
    /// Row-major 4x4 rotation.
    pub rotation: [f32; 16],
    pub fov: f32,
    /// Not part of the uniform block.
    pub speed: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, -5.0],
            rotation: IDENTITY,
            fov: 60.0,
            speed: DEFAULT_CAMERA_SPEED,
        }
    }
}

/// Record handed to the host's storage between sessions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub camera: CameraState,
    pub custom: BTreeMap<String, f32>,
    pub sdf_source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let state: PersistedState =
            serde_json::from_str(r#"{ "custom": { "custom_a": 2.5 } }"#).unwrap();
        assert_eq!(state.camera, CameraState::default());
        assert_eq!(state.custom.get("custom_a"), Some(&2.5));
        assert!(state.sdf_source.is_none());
    }

    #[test]
    fn older_records_without_speed_use_the_default() {
        let state: PersistedState =
            serde_json::from_str(r#"{ "camera": { "position": [1.0, 2.0, 3.0], "fov": 45.0 } }"#)
                .unwrap();
        assert_eq!(state.camera.position, [1.0, 2.0, 3.0]);
        assert_eq!(state.camera.fov, 45.0);
        assert_eq!(state.camera.speed, DEFAULT_CAMERA_SPEED);
    }

    #[test]
    fn json_keeps_row_major_rotation() {
        let mut state = PersistedState::default();
        state.camera.rotation[3] = 4.0;
        let text = serde_json::to_string(&state).unwrap();
        let parsed: PersistedState = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.camera.rotation[3], 4.0);
        assert_eq!(parsed, state);
    }
}
