use super::{colorize_state, json_pretty, CommandError, EXIT_SUCCESS};
use foundation_core::Engine;

/// Escape codes would skew `{:<width}`, so pad the plain text length.
fn styled_cell(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text.chars().count());
    format!("{}{}", colorize_state(text), " ".repeat(pad))
}

pub fn run(engine: &Engine, json: bool) -> Result<u8, CommandError> {
    engine.preflight(true)?;
    let services = engine.status()?;

    if json {
        println!("{}", json_pretty(&services)?);
    } else if services.is_empty() {
        println!("no services found; run 'foundation create' to add one");
    } else {
        println!(
            "{:<20} {:<10} {:<22} {:<14} {:<11} HOST",
            "NAME", "STATE", "STATUS", "STRATEGY", "LIFECYCLE"
        );
        for svc in &services {
            println!(
                "{:<20} {} {:<22} {:<14} {} {}",
                svc.name,
                styled_cell(svc.state.as_deref().unwrap_or("-"), 10),
                svc.status.as_deref().unwrap_or("-"),
                svc.strategy.to_string(),
                styled_cell(&svc.lifecycle.to_string(), 11),
                svc.host.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
