use std::fs;

use anyhow::{bail, Context, Result};
use renderer::compile::UNIFORM_STRUCT;
use renderer::{compose, BlockAlignment, Preset, Severity, ShaderConstants};

use crate::cli::{CheckArgs, LayoutArgs};
use crate::run::{load_config, shader_sources};

/// Composes the SDF against the preset's shaders and validates the result.
pub fn check(args: CheckArgs) -> Result<()> {
    let (config, config_path) = load_config(args.config.as_deref(), None)?;
    let preset_name = args.preset.as_deref().unwrap_or(&config.render.preset);
    let preset = Preset::load(preset_name).context("failed to load preset")?;
    let sources = shader_sources(&config, config_path.as_deref(), &preset)?;
    let source = fs::read_to_string(&args.sdf)
        .with_context(|| format!("failed to read SDF at {}", args.sdf.display()))?;

    let constants = ShaderConstants {
        workgroup: config.render.workgroup,
        exposure: config.render.exposure,
    };
    match compose(&preset.schema, &sources, &constants, &source) {
        Ok(composed) => {
            for warning in composed.warnings.iter() {
                eprintln!("{warning}");
            }
            println!(
                "{}: ok (preset '{}', {} warning(s))",
                args.sdf.display(),
                preset.name,
                composed.warnings.count(Severity::Warning)
            );
            Ok(())
        }
        Err(diagnostics) => {
            for diagnostic in diagnostics.iter() {
                eprintln!("{diagnostic}");
            }
            bail!(
                "{} error(s) in {}",
                diagnostics.count(Severity::Error),
                args.sdf.display()
            )
        }
    }
}

/// Prints offsets and sizes of a preset's packed uniform block.
pub fn layout(args: LayoutArgs) -> Result<()> {
    let preset = Preset::load(&args.preset).context("failed to load preset")?;
    let schema = &preset.schema;
    if args.wgsl {
        println!("{}", schema.wgsl_struct(UNIFORM_STRUCT));
        return Ok(());
    }

    println!("preset {}", preset.name);
    println!("{:>6}  {:>4}  {:<6}  name", "offset", "size", "kind");
    for field in schema.layout() {
        let kind = field
            .kind
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "pad".to_string());
        let name = field.name.as_deref().unwrap_or("-");
        println!("{:>6}  {:>4}  {:<6}  {name}", field.offset, field.size, kind);
    }
    println!(
        "packed: {} bytes ({} lanes)",
        schema.packed_len(BlockAlignment::Std140),
        schema.lanes()
    );
    for spec in &preset.ping_pong {
        println!("ping-pong {}: 2 x {} bytes", spec.name, spec.bytes);
    }
    for issue in schema.alignment_issues() {
        eprintln!("error: {issue}");
    }
    Ok(())
}
