use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use playconfig::Resolution;

#[derive(Parser, Debug)]
#[command(
    name = "marchbox",
    author,
    version,
    about = "Live raymarching playground for WGSL signed distance functions",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Playground config (TOML); defaults to `marchbox.toml` in the config directory.
    #[arg(long, value_name = "PATH", env = "MARCHBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// SDF source file, or the name of a bundled SDF (`sphere`, `mandelbulb`, `mandelbox`).
    #[arg(long, value_name = "PATH|NAME")]
    pub sdf: Option<String>,

    /// Uniform schema preset.
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Initial window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_resolution)]
    pub size: Option<Resolution>,

    /// Render every Nth pixel per axis; clamped to 1..=16.
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub render_scale: Option<i64>,

    /// Restart accumulation every frame.
    #[arg(long)]
    pub auto_refresh: bool,

    /// Exposure for the `1 - exp(-c * exposure)` curve.
    #[arg(long, value_name = "VALUE", value_parser = parse_exposure)]
    pub exposure: Option<f32>,

    /// Where camera and custom uniforms are saved between sessions.
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Start from config defaults instead of the saved state.
    #[arg(long)]
    pub no_restore: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the preview window (default).
    Run(RunArgs),
    /// Compose and validate an SDF without opening a window.
    Check(CheckArgs),
    /// Print the packed uniform layout of a preset.
    Layout(LayoutArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// SDF source file.
    #[arg(value_name = "SDF")]
    pub sdf: PathBuf,

    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct LayoutArgs {
    #[arg(long, value_name = "NAME", default_value = "raymarcher")]
    pub preset: String,

    /// Print the generated WGSL struct instead of the offset table.
    #[arg(long)]
    pub wgsl: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_resolution(raw: &str) -> Result<Resolution, String> {
    let size: Resolution = raw.parse()?;
    if size.width == 0 || size.height == 0 {
        return Err(format!("size must be non-zero, got {size}"));
    }
    Ok(size)
}

fn parse_exposure(raw: &str) -> Result<f32, String> {
    let exposure: f32 = raw
        .trim()
        .parse()
        .map_err(|err| format!("invalid exposure '{raw}': {err}"))?;
    playconfig::validate_positive("--exposure", exposure).map_err(|err| err.to_string())?;
    Ok(exposure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_flags_parse_without_subcommand() {
        let cli = Cli::try_parse_from([
            "marchbox",
            "--sdf",
            "mandelbulb",
            "--size",
            "800x600",
            "--render-scale",
            "-3",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.sdf.as_deref(), Some("mandelbulb"));
        assert_eq!(cli.run.size, Some(Resolution::new(800, 600)));
        assert_eq!(cli.run.render_scale, Some(-3));
    }

    #[test]
    fn layout_defaults_to_raymarcher() {
        let cli = Cli::try_parse_from(["marchbox", "layout", "--wgsl"]).unwrap();
        match cli.command {
            Some(Command::Layout(args)) => {
                assert_eq!(args.preset, "raymarcher");
                assert!(args.wgsl);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(Cli::try_parse_from(["marchbox", "--size", "0x600"]).is_err());
    }

    #[test]
    fn exposure_flag_is_validated_like_the_config() {
        let cli = Cli::try_parse_from(["marchbox", "--exposure", "1.25"]).unwrap();
        assert_eq!(cli.run.exposure, Some(1.25));
        for bad in ["NaN", "0", "inf", "bright"] {
            assert!(
                Cli::try_parse_from(["marchbox", "--exposure", bad]).is_err(),
                "{bad}"
            );
        }
    }
}
