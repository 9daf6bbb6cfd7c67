//! `stowage rmi`: Remove an imported image.

use clap::Args;

use super::Context;

/// Arguments for the `rmi` command.
#[derive(Args, Debug)]
pub struct RmiArgs {
    /// Image name or canonical reference.
    pub name: String,
}

/// Executes the `rmi` command. Removing an absent image succeeds.
///
/// # Errors
///
/// Returns an error if the name is invalid or the repository cannot be
/// modified.
#[allow(clippy::print_stdout)]
pub fn execute(ctx: &Context, args: RmiArgs) -> anyhow::Result<()> {
    let reference = ctx.engine.resolve(ctx.topology, &args.name)?;
    if ctx.engine.remove(ctx.topology, &args.name)? {
        println!("removed {reference}");
    } else {
        tracing::info!(%reference, "image was not present");
    }
    Ok(())
}
