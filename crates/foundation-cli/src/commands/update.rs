use super::{json_pretty, print_update, with_spinner, CommandError, EXIT_FAILURE, EXIT_SUCCESS};
use foundation_core::Engine;

/// Pull, refresh and rebuild. Deploying the result is a separate step.
pub fn run(engine: &Engine, json: bool) -> Result<u8, CommandError> {
    let _lock = engine.lock()?;
    engine.preflight(true)?;

    let report = with_spinner(json, "updating services...", "services updated", || {
        engine.update()
    })?;

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(if report.is_clean() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        });
    }
    if !report.document_changed && report.refreshed.is_empty() {
        println!("no upstream changes");
    }
    Ok(print_update(&report))
}
