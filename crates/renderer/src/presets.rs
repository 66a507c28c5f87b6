//! Uniform layouts for the renderer variants the playground ships with.
//!
//! Every layout is padded by declaration so the packed block matches the
//! WGSL struct generated from it field-for-field.

use crate::compile::ShaderSources;
use crate::error::RenderError;
use crate::gpu::PingPongSpec;
use crate::schema::Schema;
use crate::value::UniformValue;

pub const PRESET_NAMES: &[&str] = &["raymarcher", "fractal", "lensing", "voxels", "particles"];

/// A bundled signed distance function with the custom values it expects.
#[derive(Debug)]
pub struct SdfPreset {
    pub name: &'static str,
    pub source: &'static str,
    pub custom: &'static [(&'static str, f32)],
}

pub const SDF_PRESETS: &[SdfPreset] = &[
    SdfPreset {
        name: "sphere",
        source: include_str!("../shaders/sdf/sphere.wgsl"),
        custom: &[("custom_a", -2.0), ("custom_b", 1.0)],
    },
    SdfPreset {
        name: "mandelbulb",
        source: include_str!("../shaders/sdf/mandelbulb.wgsl"),
        custom: &[("custom_a", 8.0), ("custom_b", 10.0)],
    },
    SdfPreset {
        name: "mandelbox",
        source: include_str!("../shaders/sdf/mandelbox.wgsl"),
        custom: &[("custom_a", -2.0), ("custom_b", 12.0), ("custom_c", 0.5)],
    },
];

pub fn sdf_preset(name: &str) -> Option<&'static SdfPreset> {
    SDF_PRESETS.iter().find(|preset| preset.name == name)
}

#[derive(Clone, Debug)]
pub struct Preset {
    pub name: &'static str,
    pub schema: Schema,
    pub ping_pong: Vec<PingPongSpec>,
    /// Bundled infrastructure shaders, if the preset has any.
    pub shaders: Option<ShaderSources>,
    pub default_sdf: Option<&'static str>,
}

impl Preset {
    pub fn load(name: &str) -> Result<Self, RenderError> {
        let preset = match name {
            "raymarcher" => Preset {
                name: "raymarcher",
                schema: raymarcher_schema()?,
                ping_pong: Vec::new(),
                shaders: Some(ShaderSources::raymarcher()),
                default_sdf: Some(SDF_PRESETS[0].source),
            },
            "fractal" => Preset {
                name: "fractal",
                schema: fractal_schema()?,
                ping_pong: Vec::new(),
                shaders: Some(ShaderSources::raymarcher()),
                default_sdf: Some(SDF_PRESETS[1].source),
            },
            "lensing" => Preset {
                name: "lensing",
                schema: lensing_schema()?,
                ping_pong: Vec::new(),
                shaders: None,
                default_sdf: None,
            },
            "voxels" => Preset {
                name: "voxels",
                schema: voxels_schema()?,
                ping_pong: Vec::new(),
                shaders: None,
                default_sdf: None,
            },
            "particles" => Preset {
                name: "particles",
                schema: particles_schema()?,
                ping_pong: vec![
                    PingPongSpec::new("positions", PARTICLE_BUFFER_BYTES),
                    PingPongSpec::new("velocities", PARTICLE_BUFFER_BYTES),
                ],
                shaders: None,
                default_sdf: None,
            },
            other => return Err(RenderError::UnknownResource(format!("preset '{other}'"))),
        };
        Ok(preset)
    }
}

const PARTICLE_GRID: u64 = 256;
const PARTICLE_BUFFER_BYTES: u64 = PARTICLE_GRID * PARTICLE_GRID * 16;

fn camera_rotation() -> UniformValue {
    UniformValue::identity()
}

fn raymarcher_schema() -> Result<Schema, RenderError> {
    Schema::builder()
        .field("canvas_size", UniformValue::Vec2([1.0, 1.0]))
        .field("buffer_size", UniformValue::Vec2([1.0, 1.0]))
        .field("render_scale", 1.0)
        .field("temporal_counter", 1.0)
        .field("focus_distance", 5.0)
        .field("focus_strength", 0.0)
        .field("camera_rotation", camera_rotation())
        .field("camera_position", UniformValue::Vec3([0.0, 0.0, -5.0]))
        .field("fov", 60.0)
        .field("sun_direction", UniformValue::Vec3([0.5, 1.0, -0.3]))
        .field("shader_mode", 0.0)
        .field("max_bounces", 1.0)
        .field("max_marches", 100.0)
        .field("epsilon", 0.0001)
        .field("detail", 10.0)
        .field("custom_a", -2.0)
        .field("custom_b", 1.0)
        .field("custom_c", 0.5)
        .field("custom_d", 2.0)
        .build()
}

fn fractal_schema() -> Result<Schema, RenderError> {
    Schema::builder()
        .field("canvas_size", UniformValue::Vec2([1.0, 1.0]))
        .field("buffer_size", UniformValue::Vec2([1.0, 1.0]))
        .field("render_scale", 1.0)
        .field("temporal_counter", 1.0)
        .field("focus_distance", 3.0)
        .field("focus_strength", 0.0)
        .field("camera_rotation", camera_rotation())
        .field("camera_position", UniformValue::Vec3([0.0, 0.0, -3.0]))
        .field("fov", 60.0)
        .field("sun_direction", UniformValue::Vec3([0.5, 1.0, -0.3]))
        .field("shader_mode", 1.0)
        .field("max_bounces", 1.0)
        .field("max_marches", 50.0)
        .field("epsilon", 0.001)
        .field("normals_precision", 0.001)
        .field("sun_intensity", 100.0)
        .field("sky_intensity", 0.5)
        .field("custom_a", 8.0)
        .field("custom_b", 10.0)
        .field("custom_c", 0.5)
        .field("custom_d", 2.0)
        .field("custom_e", 0.0)
        .pad(1)
        .build()
}

fn lensing_schema() -> Result<Schema, RenderError> {
    Schema::builder()
        .field("canvas_size", UniformValue::Vec2([1.0, 1.0]))
        .field("buffer_size", UniformValue::Vec2([1.0, 1.0]))
        .field("render_scale", 1.0)
        .field("temporal_counter", 1.0)
        .field("shader_mode", 0.0)
        .field("force_threshold", 0.1)
        .field("camera_rotation", camera_rotation())
        .field("camera_position", UniformValue::Vec3([0.0, 1.0, -10.0]))
        .field("fov", 60.0)
        .field("max_marches", 200.0)
        .field("march_size", 0.05)
        .field("force_strength", 1.0)
        .field("ring_density", 1.0)
        .field("ring_radius", 4.0)
        .pad(3)
        .build()
}

fn voxels_schema() -> Result<Schema, RenderError> {
    Schema::builder()
        .field("canvas_size", UniformValue::Vec2([1.0, 1.0]))
        .field("buffer_size", UniformValue::Vec2([1.0, 1.0]))
        .field("grid_size", UniformValue::Vec3([256.0, 64.0, 256.0]))
        .field("render_scale", 1.0)
        .field("camera_rotation", camera_rotation())
        .field("camera_position", UniformValue::Vec3([0.0, 80.0, -128.0]))
        .field("fov", 60.0)
        .field("grid_scale", 1.0)
        .field("shading_mode", 0.0)
        .pad(2)
        .field("height_offset", 0.0)
        .field("height_multiplier", 1.0)
        .field("height_gamma", 1.0)
        .field("height_invert", 0.0)
        .field("fade_blend", 0.0)
        .field("voxel_blend", 1.0)
        .field("grayscale_blend", 0.0)
        .field("normals_epsilon", 0.01)
        .build()
}

fn particles_schema() -> Result<Schema, RenderError> {
    let grid = PARTICLE_GRID as f32;
    Schema::builder()
        .field("buffer_size", UniformValue::Vec2([grid, grid]))
        .field("canvas_size", UniformValue::Vec2([1.0, 1.0]))
        .field("grid_size", UniformValue::Vec2([grid, grid]))
        .field("gap", 0.75)
        .field("blend", 0.1)
        .field("frame", 0)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BlockAlignment;

    #[test]
    fn every_preset_is_aligned() {
        for name in PRESET_NAMES {
            let preset = Preset::load(name).unwrap();
            assert!(
                preset.schema.alignment_issues().is_empty(),
                "{name}: {:?}",
                preset.schema.alignment_issues()
            );
        }
    }

    #[test]
    fn preset_block_sizes() {
        let lanes = |name: &str| {
            Preset::load(name)
                .unwrap()
                .schema
                .packed_len(BlockAlignment::Std140)
                / 4
        };
        assert_eq!(lanes("raymarcher"), 40);
        assert_eq!(lanes("fractal"), 44);
        assert_eq!(lanes("lensing"), 36);
        assert_eq!(lanes("voxels"), 40);
        // Nine lanes, rounded up by the packer.
        assert_eq!(lanes("particles"), 12);
    }

    #[test]
    fn sdf_presets_only_touch_declared_fields() {
        let schema = Preset::load("fractal").unwrap().schema;
        for sdf in SDF_PRESETS {
            for (name, _) in sdf.custom {
                assert!(schema.field(name).is_some(), "{}: {name}", sdf.name);
            }
        }
    }

    #[test]
    fn unknown_presets_are_rejected() {
        assert!(matches!(
            Preset::load("teapot"),
            Err(RenderError::UnknownResource(_))
        ));
    }
}
