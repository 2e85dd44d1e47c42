use super::{json_pretty, CommandError, EXIT_FAILURE, EXIT_SUCCESS};
use foundation_core::{CommandLock, Engine};
use foundation_runtime::{check_collaborators, format_missing};
use foundation_schema::{ACME_SERVICE, PROXY_SERVICE};
use foundation_store::{DocumentKind, DocumentStore};
use std::path::Path;

pub fn run(engine: &Engine, json_output: bool) -> Result<u8, CommandError> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(engine, &mut checks, &mut all_pass);

    let home = engine.layout().root();
    if engine.layout().is_installed() {
        checks.push(Check::pass("home_exists", "Foundation home is initialized"));
        check_documents(engine, &mut checks, &mut all_pass);
        check_lock(engine, &mut checks, &mut all_pass);
        check_disk_space(home, &mut checks);
    } else {
        all_pass = false;
        checks.push(Check::fail(
            "home_exists",
            &format!(
                "{} is not initialized (run 'foundation install')",
                home.display()
            ),
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(engine: &Engine, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let collaborators = engine.collaborators();
    let missing = check_collaborators(
        &*collaborators.engine,
        &*collaborators.vcs,
        &*collaborators.planner,
    );
    if missing.is_empty() {
        checks.push(Check::pass(
            "prerequisites",
            &format!(
                "{}, git and railpack are available",
                collaborators.engine.name()
            ),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail("prerequisites", &format_missing(&missing)));
    }
}

fn check_documents(engine: &Engine, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let documents = DocumentStore::new(engine.layout().clone());
    let validator = &*engine.collaborators().engine;

    for kind in [DocumentKind::Proxy, DocumentKind::Services] {
        let name = format!("{kind}_document");
        match documents.read(kind, validator) {
            Ok(doc) => checks.push(Check::pass(
                &name,
                &format!("{kind} document valid ({} services)", doc.services.len()),
            )),
            Err(e) => {
                *all_pass = false;
                checks.push(Check::fail(&name, &format!("{kind} document: {e}")));
            }
        }
    }

    match validator.status(&documents.path(DocumentKind::Proxy)) {
        Ok(containers) => {
            let inactive: Vec<&str> = [PROXY_SERVICE, ACME_SERVICE]
                .into_iter()
                .filter(|n| !containers.get(*n).is_some_and(|c| c.is_running()))
                .collect();
            if inactive.is_empty() {
                checks.push(Check::pass("proxy_running", "Reverse proxy is running"));
            } else {
                checks.push(Check::warn(
                    "proxy_running",
                    &format!(
                        "Not running: {} (run 'foundation deploy')",
                        inactive.join(", ")
                    ),
                ));
            }
        }
        Err(e) => checks.push(Check::warn(
            "proxy_running",
            &format!("Cannot query proxy containers: {e}"),
        )),
    }
}

fn check_lock(engine: &Engine, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match CommandLock::try_acquire(&engine.layout().lock_file()) {
        Ok(_) => checks.push(Check::pass("command_lock", "Command lock is free")),
        Err(foundation_core::CoreError::Busy(_)) => checks.push(Check::warn(
            "command_lock",
            "Command lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "command_lock",
                &format!("Cannot check command lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, CommandError> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("Foundation Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &str, status: &'static str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }
}

fn check_disk_space(home: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(home.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs with a valid, NUL-terminated path and a zeroed output
    // struct is well-defined; the struct is only read when ret == 0.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return;
    }

    // Image builds and checkouts need headroom.
    let avail_mb = (stat.f_bavail as u64 * stat.f_frsize as u64) / (1024 * 1024);
    if avail_mb < 1024 {
        checks.push(Check::warn(
            "disk_space",
            &format!("Low disk space: {avail_mb} MB available for builds"),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            &format!("Disk space: {} GB available", avail_mb / 1024),
        ));
    }
}
