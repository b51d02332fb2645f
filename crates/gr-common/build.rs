//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Shared primitives and utilities for the rover runtime."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_build().all_cargo().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
