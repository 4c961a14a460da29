use std::error::Error;

use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn Error>> {
    // build info for the debug console banner
    EmitBuilder::builder().all_build().all_cargo().emit()?;

    Ok(())
}
