//! Build script for capturing build metadata at compile time
//!
//! Embeds the git commit and build timestamp so the server can log them at
//! startup. Falls back to empty values when building without a .git directory
//! (source tarballs, container builds).

use std::error::Error;
use vergen_gix::{Build, Emitter, Gix};

fn main() -> Result<(), Box<dyn Error>> {
    if std::env::var("VERGEN_GIT_SHA").is_ok() {
        // Metadata already supplied via build args
        return Ok(());
    }

    Emitter::default()
        .add_instructions(&Build::all_build())?
        .add_instructions(&Gix::all_git())?
        .emit()?;
    Ok(())
}
