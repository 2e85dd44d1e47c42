use super::{json_pretty, print_deploy, with_spinner, CommandError, EXIT_SUCCESS};
use foundation_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, CommandError> {
    let _lock = engine.lock()?;
    engine.preflight(false)?;

    let outcome = with_spinner(json, "deploying...", "deploy finished", || engine.deploy())?;
    if json {
        println!("{}", json_pretty(&outcome)?);
    } else {
        print_deploy(&outcome);
    }
    Ok(EXIT_SUCCESS)
}
