//! Resolves config, preset, shaders and saved state into a preview session.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use playconfig::PlayConfig;
use renderer::{
    run_preview, sdf_preset, Extent, PingPongSpec, Preset, PreviewConfig, RenderSettings,
    Schema, ShaderSources, UniformValue,
};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;
use crate::state::StateStore;

const DEFAULT_WINDOW: Extent = Extent::new(1280, 720);

pub fn initialise_tracing() {
    let default_filter = "info,naga=warn,wgpu=error,wgpu_core=error,wgpu_hal=error,winit=error";
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    tracing::debug!(
        config = %paths.config_dir().display(),
        data = %paths.data_dir().display(),
        "resolved marchbox paths"
    );
    let (config, config_path) = load_config(args.config.as_deref(), Some(paths.config_file()))?;

    let preset_name = args.preset.as_deref().unwrap_or(&config.render.preset);
    let preset = Preset::load(preset_name).context("failed to load preset")?;
    let sources = shader_sources(&config, config_path.as_deref(), &preset)?;

    let store = StateStore::new(
        args.state_file.clone().unwrap_or_else(|| paths.state_file()),
        config.persist.keep_source,
    );
    let restored = if args.no_restore {
        None
    } else {
        match store.load() {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!("ignoring saved state: {err:#}");
                None
            }
        }
    };

    let explicit_sdf = args.sdf.is_some() || config.shader.sdf.is_some();
    let mut sdf = resolve_sdf(args.sdf.as_deref(), &config, config_path.as_deref(), &preset)?;
    if !explicit_sdf && config.persist.keep_source {
        if let Some(saved) = restored.as_ref().and_then(|state| state.sdf_source.clone()) {
            tracing::info!("restoring SDF from previous session");
            sdf.source = saved;
        }
    }

    let mut uniforms = sdf.custom.clone();
    uniforms.extend(uniform_overrides(&config, &preset.schema));

    let max = config.render.max_resolution;
    let mut ping_pong = preset.ping_pong.clone();
    ping_pong.extend(
        config
            .ping_pong
            .iter()
            .map(|entry| match entry.auto_swap {
                true => PingPongSpec::new(&entry.name, entry.bytes),
                false => PingPongSpec::manual(&entry.name, entry.bytes),
            }),
    );
    let settings = RenderSettings {
        max_resolution: Extent::new(max.width, max.height),
        workgroup: config.render.workgroup,
        render_scale: args
            .render_scale
            .map(|scale| scale.clamp(1, 16) as u32)
            .unwrap_or(config.render.render_scale),
        auto_refresh: args.auto_refresh || config.render.auto_refresh,
        exposure: args.exposure.or(config.render.exposure),
        ping_pong,
        ..RenderSettings::default()
    };

    let window_size = args
        .size
        .or(config.render.window_size)
        .map(|size| Extent::new(size.width, size.height))
        .unwrap_or(DEFAULT_WINDOW);

    tracing::info!(
        preset = preset.name,
        sdf = %sdf.label,
        max = %settings.max_resolution,
        state = %store.path().display(),
        "starting marchbox"
    );

    let preview = PreviewConfig {
        title: format!("marchbox - {}", sdf.label),
        window_size,
        schema: preset.schema,
        sources,
        sdf_source: sdf.source,
        sdf_path: sdf.path,
        settings,
        uniforms,
        restore: restored,
        camera_speed: config.camera.speed,
        screenshot_dir: paths.screenshot_dir(),
        autosave: config.persist.autosave,
    };
    run_preview(preview, Box::new(store))
}

/// Loads `explicit` if given, else `fallback` when it exists, else defaults.
pub fn load_config(
    explicit: Option<&Path>,
    fallback: Option<PathBuf>,
) -> Result<(PlayConfig, Option<PathBuf>)> {
    let path = match (explicit, fallback) {
        (Some(path), _) => Some(path.to_path_buf()),
        (None, Some(path)) if path.exists() => Some(path),
        _ => None,
    };
    match path {
        Some(path) => {
            let config = PlayConfig::load(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok((config, Some(path)))
        }
        None => Ok((PlayConfig::default(), None)),
    }
}

/// Infrastructure shaders from `[shader]`, falling back to the preset's bundled set.
pub fn shader_sources(
    config: &PlayConfig,
    config_path: Option<&Path>,
    preset: &Preset,
) -> Result<ShaderSources> {
    let bundled = preset.shaders.clone();
    let compute = match &config.shader.base {
        Some(path) => read_shader(config_path, path)?,
        None => bundled
            .as_ref()
            .map(|sources| sources.compute.clone())
            .ok_or_else(|| {
                anyhow!(
                    "preset '{}' has no bundled compute shader; set [shader] base in the config",
                    preset.name
                )
            })?,
    };
    let render = match &config.shader.render {
        Some(path) => read_shader(config_path, path)?,
        None => bundled
            .map(|sources| sources.render)
            .unwrap_or_else(|| ShaderSources::raymarcher().render),
    };
    Ok(ShaderSources { compute, render })
}

fn read_shader(config_path: Option<&Path>, path: &Path) -> Result<String> {
    let resolved = match config_path {
        Some(config_path) => PlayConfig::resolve_path(config_path, path),
        None => path.to_path_buf(),
    };
    fs::read_to_string(&resolved)
        .with_context(|| format!("failed to read shader at {}", resolved.display()))
}

struct SdfChoice {
    label: String,
    source: String,
    path: Option<PathBuf>,
    custom: Vec<(String, UniformValue)>,
}

fn resolve_sdf(
    cli: Option<&str>,
    config: &PlayConfig,
    config_path: Option<&Path>,
    preset: &Preset,
) -> Result<SdfChoice> {
    if let Some(raw) = cli {
        let path = PathBuf::from(raw);
        if !path.exists() {
            if let Some(bundled) = sdf_preset(raw) {
                return Ok(bundled_choice(bundled.name, bundled.source, bundled.custom));
            }
        }
        return sdf_file(path);
    }
    if let Some(path) = &config.shader.sdf {
        let resolved = match config_path {
            Some(config_path) => PlayConfig::resolve_path(config_path, path),
            None => path.clone(),
        };
        return sdf_file(resolved);
    }
    let source = preset
        .default_sdf
        .ok_or_else(|| anyhow!("preset '{}' has no default SDF; pass --sdf", preset.name))?;
    Ok(SdfChoice {
        label: preset.name.to_string(),
        source: source.to_string(),
        path: None,
        custom: Vec::new(),
    })
}

fn bundled_choice(name: &str, source: &str, custom: &[(&str, f32)]) -> SdfChoice {
    SdfChoice {
        label: name.to_string(),
        source: source.to_string(),
        path: None,
        custom: custom
            .iter()
            .map(|(field, value)| (field.to_string(), UniformValue::float(*value)))
            .collect(),
    }
}

fn sdf_file(path: PathBuf) -> Result<SdfChoice> {
    let source = fs::read_to_string(&path)
        .with_context(|| format!("failed to read SDF at {}", path.display()))?;
    Ok(SdfChoice {
        label: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        source,
        path: Some(path),
        custom: Vec::new(),
    })
}

fn uniform_overrides(config: &PlayConfig, schema: &Schema) -> Vec<(String, UniformValue)> {
    let mut out = Vec::with_capacity(config.uniforms.len());
    for (name, value) in &config.uniforms {
        let Some(kind) = schema.kind_of(name) else {
            tracing::warn!(field = %name, "config overrides a uniform the preset does not declare");
            continue;
        };
        match UniformValue::with_kind(name, kind, &value.components()) {
            Ok(value) => out.push((name.clone(), value)),
            Err(err) => tracing::warn!(field = %name, error = %err, "ignoring uniform override"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_the_schema_kind() {
        let config = PlayConfig::from_toml_str(
            "version = 1\n[uniforms]\ncustom_a = 3.0\nsun_direction = [0.0, 1.0, 0.0]\nmissing = 1.0\nfov = [1.0, 2.0]\n",
        )
        .unwrap();
        let preset = Preset::load("raymarcher").unwrap();
        let overrides = uniform_overrides(&config, &preset.schema);
        assert_eq!(
            overrides,
            vec![
                ("custom_a".to_string(), UniformValue::float(3.0)),
                (
                    "sun_direction".to_string(),
                    UniformValue::Vec3([0.0, 1.0, 0.0])
                ),
            ]
        );
    }

    #[test]
    fn bundled_sdf_names_resolve_with_their_defaults() {
        let config = PlayConfig::default();
        let preset = Preset::load("raymarcher").unwrap();
        let choice = resolve_sdf(Some("mandelbox"), &config, None, &preset).unwrap();
        assert_eq!(choice.label, "mandelbox");
        assert!(choice.path.is_none());
        assert!(choice
            .custom
            .contains(&("custom_c".to_string(), UniformValue::float(0.5))));
    }

    #[test]
    fn presets_without_shaders_need_a_base() {
        let preset = Preset::load("lensing").unwrap();
        let err = shader_sources(&PlayConfig::default(), None, &preset).unwrap_err();
        assert!(err.to_string().contains("[shader] base"));
    }
}
