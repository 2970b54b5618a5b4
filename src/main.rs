use anyhow::Context;
use clap::Parser;
use trade_balance_etl::core::context::CallBudget;
use trade_balance_etl::core::orchestrator::{SourceOutcome, SourceSelection};
use trade_balance_etl::domain::source::SourceId;
use trade_balance_etl::utils::{logger, validation::Validate};
use trade_balance_etl::{
    build_adapters, CliArgs, EtlConfig, EtlError, LocalStorage, Orchestrator, RunContext, RunStatus, TableStore,
};

const EXIT_PARTIAL: i32 = 2;
const EXIT_ALL_FAILED: i32 = 1;
const EXIT_CONFIG: i32 = 3;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // logging first, so config errors are reported too
    if args.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!(mode = ?args.mode(), dry_run = args.dry_run, "starting trade-etl");

    let (config, selection) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, category = ?e.category(), "configuration rejected");
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(EXIT_CONFIG);
        }
    };

    let mut ctx = RunContext::new(args.mode(), chrono::Local::now().date_naive());
    for id in SourceId::ALL {
        if let Some(limit) = config.source(id)?.daily_call_limit {
            ctx = ctx.with_budget(id, CallBudget::limited(limit));
        }
    }

    let adapters = match build_adapters(&config) {
        Ok(adapters) => adapters,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(EXIT_CONFIG);
        }
    };

    let store = TableStore::new(LocalStorage::new(config.data_dir().to_string()));
    let orchestrator = Orchestrator::new(store).with_adapters(adapters);

    if args.dry_run {
        let plan = orchestrator
            .plan(&ctx, &selection)
            .await
            .context("reading stored tables for the dry-run plan")?;
        println!("📋 Fetch plan (reference date {}):", ctx.reference_date);
        for entry in plan {
            if entry.ranges.is_empty() {
                println!("  {:<9} {:<3} up to date", entry.source.name(), entry.reporter);
                continue;
            }
            let ranges: Vec<String> = entry
                .ranges
                .iter()
                .map(|(start, end)| format!("{} .. {}", start, end))
                .collect();
            println!("  {:<9} {:<3} {}", entry.source.name(), entry.reporter, ranges.join(", "));
        }
        return Ok(());
    }

    let report = orchestrator.run(&mut ctx, &selection).await;

    for source in &report.sources {
        match &source.outcome {
            SourceOutcome::Success { new_rows } => {
                println!("✅ {}: {} new rows ({} unclassified)", source.source, new_rows, source.unclassified)
            }
            SourceOutcome::UpToDate => println!("✅ {}: already current", source.source),
            SourceOutcome::Failed { reason } => println!("❌ {}: {}", source.source, reason),
        }
    }

    if args.json_logs {
        tracing::info!(summary = %report.summary(), "run finished");
    }

    match report.status() {
        RunStatus::AllSucceeded => Ok(()),
        RunStatus::PartiallySucceeded => {
            eprintln!("⚠️ Some sources failed; their tables were left unchanged");
            std::process::exit(EXIT_PARTIAL);
        }
        RunStatus::AllFailed => {
            eprintln!("❌ Every selected source failed");
            std::process::exit(EXIT_ALL_FAILED);
        }
    }
}

fn load_config(args: &CliArgs) -> Result<(EtlConfig, SourceSelection), EtlError> {
    let mut config = match &args.config {
        Some(path) => EtlConfig::from_file(path)?,
        None => EtlConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = Some(dir.clone());
    }
    config.validate()?;

    let selection = SourceSelection {
        only: args.only_groups()?,
        skip: args.skip_groups()?,
    };
    Ok((config, selection))
}
