//! `stowage images`: List imported images.

use clap::Args;

use super::Context;
use crate::output::{format_bytes, format_timestamp};

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Show full image IDs.
    #[arg(long)]
    pub no_trunc: bool,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the repository cannot be read.
#[allow(clippy::print_stdout)]
pub fn execute(ctx: &Context, args: ImagesArgs) -> anyhow::Result<()> {
    let entries = ctx.engine.list(ctx.topology)?;
    tracing::info!(topology = %ctx.topology, count = entries.len(), "listing images");

    println!(
        "{:<40} {:<14} {:<12} {:<20} DESCRIPTION",
        "REFERENCE", "IMAGE ID", "SIZE", "IMPORTED"
    );
    for entry in &entries {
        let id = if args.no_trunc {
            entry.id.as_str()
        } else {
            entry.id.short()
        };
        println!(
            "{:<40} {:<14} {:<12} {:<20} {}",
            entry.reference.to_string(),
            id,
            format_bytes(entry.size_bytes),
            format_timestamp(&entry.imported_at),
            entry.manifest.description(),
        );
    }
    Ok(())
}
