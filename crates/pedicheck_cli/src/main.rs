//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `pedicheck_core` linkage and the configured database.
//! - Print a deterministic health report: reference seal and active trees.
//!
//! Usage: `pedicheck_cli [config.json]`

use log::info;
use pedicheck_core::db::{open_db, open_db_in_memory};
use pedicheck_core::repo::reference_repo::{ReferenceRepository, SqliteReferenceRepository};
use pedicheck_core::{bootstrap_service, init_logging, CoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("pedicheck_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = match std::env::args_os().nth(1) {
        Some(path) => CoreConfig::from_file(path).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir).map_err(|err| err.to_string())?;
    }

    println!("pedicheck_core ping={}", pedicheck_core::ping());
    println!("pedicheck_core version={}", pedicheck_core::core_version());

    let conn = match &config.database_path {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    }
    .map_err(|err| err.to_string())?;

    let seal = SqliteReferenceRepository::try_new(&conn)
        .and_then(|repo| repo.seal_status())
        .map_err(|err| err.to_string())?;
    let Some(seal) = seal else {
        println!("reference status=unsealed");
        return Ok(());
    };
    println!(
        "reference status=sealed dataset_version={} rows={} fingerprint={}",
        seal.dataset_version, seal.row_count, seal.fingerprint
    );

    let (service, report) = bootstrap_service(&conn, &config).map_err(|err| err.to_string())?;
    for disease_id in service.trees().active_diseases() {
        if let Some(version) = service.trees().active_version(&disease_id) {
            println!("tree disease_id={disease_id} active_version={version}");
        }
    }
    for rejected in &report.rejected {
        println!("tree status=rejected error={rejected}");
    }

    info!(
        "event=cli_probe module=cli status=ok trees_active={} trees_rejected={}",
        report.activated.len(),
        report.rejected.len()
    );
    Ok(())
}
