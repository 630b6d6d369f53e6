mod cli;
mod paths;
mod run;
mod shaders;

use anyhow::Result;
use cli::{Command, ShadersAction};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    let paths = AppPaths::resolve(&cli.locations)?;
    tracing::debug!(
        config = %paths.config_file().display(),
        shaders = %paths.shader_dir().display(),
        "resolved layershade paths"
    );

    match cli.command {
        Some(Command::Run(args)) => run::run(args, &paths),
        Some(Command::Shaders(shaders_cmd)) => match shaders_cmd.action {
            ShadersAction::List { json } => shaders::list(&paths, json),
            ShadersAction::Check => shaders::check(&paths),
        },
        Some(Command::Bench(args)) => run::bench(args, &paths),
        None => run::run(cli.run, &paths),
    }
}
