use super::{
    json_pretty, print_deploy, print_update, with_spinner, CommandError, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use foundation_core::{CreateRequest, Engine};

pub fn run(engine: &Engine, request: CreateRequest, json: bool) -> Result<u8, CommandError> {
    let _lock = engine.lock()?;
    engine.preflight(true)?;

    let name = request.name.clone();
    let report = with_spinner(
        json,
        &format!("creating {name}..."),
        &format!("{name} created"),
        || engine.create(request),
    )?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(if report.update.is_clean() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        });
    }
    println!("{}: registered ({})", report.service, report.strategy);
    let code = print_update(&report.update);
    print_deploy(&report.deploy);
    Ok(code)
}
