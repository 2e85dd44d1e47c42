use super::{
    json_pretty, print_deploy, print_update, with_spinner, CommandError, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use foundation_core::Engine;

pub fn run(engine: &Engine, name: &str, json: bool) -> Result<u8, CommandError> {
    let _lock = engine.lock()?;
    engine.preflight(true)?;

    let report = with_spinner(
        json,
        &format!("deleting {name}..."),
        &format!("{name} deleted"),
        || engine.delete(name),
    )?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(if report.update.is_clean() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        });
    }
    if !report.removed {
        println!("{name} was not registered");
    }
    let code = print_update(&report.update);
    print_deploy(&report.deploy);
    Ok(code)
}
