//! `stowage load`: Import an image archive.

use std::path::PathBuf;

use clap::Args;

use super::Context;

/// Arguments for the `load` command.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Archive created with `docker save`.
    pub archive: PathBuf,

    /// Name to store the image under, e.g. `alpine` or `app:1.0`.
    pub name: String,
}

/// Executes the `load` command, printing the canonical reference.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or stored.
#[allow(clippy::print_stdout)]
pub fn execute(ctx: &Context, args: LoadArgs) -> anyhow::Result<()> {
    let report = ctx.engine.import(ctx.topology, &args.archive, &args.name)?;
    tracing::debug!(states = ?report.states, "import finished");
    println!("{}", report.reference);
    Ok(())
}
