//! Entry point wiring the CLI surface to the preview runtime and the headless
//! `check` / `layout` commands.

mod cli;
mod commands;
mod paths;
mod run;
mod state;

use anyhow::Result;
use cli::Command;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Run(args)) => run::run(args),
        Some(Command::Check(args)) => commands::check(args),
        Some(Command::Layout(args)) => commands::layout(args),
        None => run::run(cli.run),
    }
}
