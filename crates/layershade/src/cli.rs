use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::paths::{ENV_CONFIG, ENV_SHADER_DIR};

#[derive(Parser, Debug)]
#[command(
    name = "layershade",
    author,
    version,
    about = "Layered shader wallpaper compositor",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub locations: Locations,
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct Locations {
    /// Render configuration file (TOML).
    #[arg(long, global = true, env = ENV_CONFIG, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding `.frag` layer shaders.
    #[arg(long, global = true, env = ENV_SHADER_DIR, value_name = "DIR")]
    pub shader_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Preview window size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Target draws per second; overrides `runtime.fps` from the config.
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open the preview window and render the configured layers (default).
    Run(RunArgs),
    /// Inspect the shader catalog.
    Shaders(ShadersCommand),
    /// Render headlessly for a fixed number of frames and report the rate.
    Bench(BenchArgs),
}

#[derive(Args, Debug)]
pub struct ShadersCommand {
    #[command(subcommand)]
    pub action: ShadersAction,
}

#[derive(Subcommand, Debug)]
pub enum ShadersAction {
    /// Print every discovered shader.
    List {
        /// Emit descriptors as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Compile every discovered shader on a headless GPU device.
    Check,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Frames to render.
    #[arg(long, default_value_t = 300)]
    pub frames: u64,

    /// Render target size.
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_surface_size,
        default_value = "1280x720"
    )]
    pub size: (u32, u32),
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1920x1080".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size".to_string())?;

    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".into());
    }

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_surface_size("1920x1080"), Ok((1920, 1080)));
        assert_eq!(parse_surface_size(" 640 X 480 "), Ok((640, 480)));
        assert!(parse_surface_size("0x10").is_err());
        assert!(parse_surface_size("wide").is_err());
    }

    #[test]
    fn bare_invocation_runs() {
        let cli = Cli::try_parse_from(["layershade", "--size", "800x600"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.size, Some((800, 600)));
    }

    #[test]
    fn shaders_list_accepts_global_locations() {
        let cli = Cli::try_parse_from([
            "layershade",
            "shaders",
            "list",
            "--json",
            "--shader-dir",
            "/tmp/shaders",
        ])
        .unwrap();
        assert_eq!(cli.locations.shader_dir, Some(PathBuf::from("/tmp/shaders")));
        assert!(matches!(
            cli.command,
            Some(Command::Shaders(ShadersCommand {
                action: ShadersAction::List { json: true }
            }))
        ));
    }

    #[test]
    fn bench_defaults() {
        let cli = Cli::try_parse_from(["layershade", "bench"]).unwrap();
        match cli.command {
            Some(Command::Bench(args)) => {
                assert_eq!(args.frames, 300);
                assert_eq!(args.size, (1280, 720));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
