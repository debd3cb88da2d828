mod backend;
mod check;
mod cli;
mod dose;
mod error_fmt;
mod logging;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;

use crate::cli::{Cli, Commands, JSON_MODE};
use crate::dose::OneShot;
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn install_ctrlc() -> eyre::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)).wrap_err("installing Ctrl-C handler")?;
    Ok(shutdown)
}

fn one_shot_finished(record: &chem_core::DoseRecord) -> eyre::Result<()> {
    if record.reason.is_completion() {
        Ok(())
    } else {
        eyre::bail!("{} dose ended early: {}", record.chemical, record.reason)
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    if !cli.json {
        // Pretty reports only; a second install in the same process is harmless.
        let _ = color_eyre::install();
    }
    let cfg = match chem_config::load_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            logging::init(cli.log_level.as_deref(), cli.json, None);
            return Err(e);
        }
    };
    logging::init(cli.log_level.as_deref(), cli.json, Some(&cfg.logging));
    tracing::debug!(config = %cli.config.display(), controllers = cfg.controllers.len(), "config loaded");

    match cli.cmd {
        Commands::Run { for_secs, state, service } => {
            let shutdown = install_ctrlc()?;
            let services = backend::services(&cfg)?;
            let opts = run::RunOptions {
                state,
                for_secs,
                service,
                json: cli.json,
            };
            run::run(&cfg, services, &opts, &shutdown)
        }
        Commands::Dose {
            controller,
            chemical,
            volume,
        } => {
            let shutdown = install_ctrlc()?;
            let services = backend::services(&cfg)?;
            let record = dose::run_one_shot(
                &cfg,
                services,
                OneShot::Dose,
                controller,
                &chemical,
                &volume,
                cli.json,
                &shutdown,
            )?;
            one_shot_finished(&record)
        }
        Commands::Calibrate {
            controller,
            chemical,
            secs,
        } => {
            let shutdown = install_ctrlc()?;
            let services = backend::services(&cfg)?;
            let record = dose::run_one_shot(
                &cfg,
                services,
                OneShot::Calibrate,
                controller,
                &chemical,
                &secs,
                cli.json,
                &shutdown,
            )?;
            one_shot_finished(&record)
        }
        Commands::DosePlan {
            controller,
            chemical,
            level,
        } => {
            // Plans never touch real relays.
            let services = backend::sim_services(&cfg)?;
            let snap = dose::plan(cfg, services, controller, &chemical, level)?;
            dose::print_plan(&snap, cli.json)
        }
        Commands::Check => {
            let lines = check::summary(&cfg);
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "ok": true, "controllers": cfg.controllers.len(), "summary": lines })
                );
            } else {
                println!("Config OK");
                for l in &lines {
                    println!("{l}");
                }
            }
            Ok(())
        }
        Commands::SelfCheck => {
            let services = backend::services(&cfg)?;
            let results = check::self_check(&cfg, &services);
            let failed = results.iter().filter(|r| !r.ok).count();
            for r in &results {
                if cli.json {
                    println!(
                        "{}",
                        serde_json::json!({ "device": r.device, "ok": r.ok, "detail": r.detail })
                    );
                } else {
                    println!("{} {}: {}", if r.ok { "OK  " } else { "FAIL" }, r.device, r.detail);
                }
            }
            if failed > 0 {
                eyre::bail!("{failed} device(s) failed the self-check");
            }
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::debug!(error = ?e, "command failed");
        std::process::exit(exit_code_for_error(&e));
    }
}
