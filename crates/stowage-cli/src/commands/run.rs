//! `stowage run`: Run a command inside an imported image.

use clap::Args;

use super::Context;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image name or canonical reference.
    pub name: String,

    /// Command to run. Defaults to the image's entrypoint and command.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command, forwarding the captured output.
///
/// # Errors
///
/// Returns an error if the image is not available or the command fails.
#[allow(clippy::print_stdout, clippy::print_stderr)]
pub fn execute(ctx: &Context, args: RunArgs) -> anyhow::Result<()> {
    let reference = ctx.engine.resolve(ctx.topology, &args.name)?;
    let output = ctx
        .engine
        .run(ctx.topology, &reference, &args.command)?;

    if !output.stdout.is_empty() {
        print!("{}", output.stdout);
    }
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    Ok(())
}
