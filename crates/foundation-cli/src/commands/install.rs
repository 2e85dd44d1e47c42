use super::{json_pretty, print_deploy, with_spinner, CommandError, EXIT_SUCCESS};
use dialoguer::Input;
use foundation_core::Engine;
use std::io::{stdin, IsTerminal};

pub fn run(
    engine: &mut Engine,
    email: Option<String>,
    no_service: bool,
    json: bool,
) -> Result<u8, CommandError> {
    let email = resolve_email(engine, email, json)?;
    let _lock = engine.lock()?;

    let installed = with_spinner(json, "checking prerequisites...", "prerequisites checked", || {
        engine.bootstrap_prerequisites()
    })?;
    for tool in &installed {
        if !json {
            println!("installed {}", tool.name());
        }
    }

    let report = with_spinner(
        json,
        "writing configuration...",
        "configuration written",
        || engine.install(&email),
    )?;
    if report.preserved_services > 0 && !json {
        println!(
            "kept {} existing service(s) from the previous configuration",
            report.preserved_services
        );
    }

    let supervisor = if no_service {
        None
    } else {
        Some(install_supervisor(engine, json))
    };

    engine.preflight(false)?;
    let deploy = with_spinner(json, "starting reverse proxy...", "reverse proxy active", || {
        engine.deploy()
    })?;

    if json {
        let payload = serde_json::json!({
            "home": report.home,
            "email": report.email,
            "preserved_services": report.preserved_services,
            "installed_tools": installed.iter().map(|t| t.name()).collect::<Vec<_>>(),
            "service_installed": supervisor,
            "deploy": deploy,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_deploy(&deploy);
        println!("foundation installed in {}", report.home.display());
    }
    Ok(EXIT_SUCCESS)
}

/// `--email`, else the email recorded by a previous install, else a prompt
/// when attached to a terminal.
fn resolve_email(
    engine: &Engine,
    email: Option<String>,
    json: bool,
) -> Result<String, CommandError> {
    if let Some(email) = email.or_else(|| engine.settings().default_email.clone()) {
        return validate_email(email);
    }
    if json || !stdin().is_terminal() {
        return Err(CommandError::validation(
            "no Let's Encrypt email given (pass --email)",
        ));
    }
    let email: String = Input::new()
        .with_prompt("Email for SSL")
        .interact_text()
        .map_err(|e| format!("prompt failed: {e}"))?;
    validate_email(email)
}

fn validate_email(email: String) -> Result<String, CommandError> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(trimmed.to_owned())
        }
        _ => Err(CommandError::validation(format!(
            "'{email}' is not a valid email address"
        ))),
    }
}

/// The watcher service is optional: without it, updates are manual.
fn install_supervisor(engine: &Engine, json: bool) -> bool {
    let result = std::env::current_exe()
        .map_err(|e| e.to_string())
        .and_then(|exe| engine.install_supervisor(&exe).map_err(|e| e.to_string()));
    match result {
        Ok(()) => {
            if !json {
                println!("background update service installed");
            }
            true
        }
        Err(e) => {
            eprintln!("warning: could not install the background update service: {e}");
            false
        }
    }
}
