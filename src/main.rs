use std::process::ExitCode;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use issuesync::{
    integrations::github::GithubTracker,
    reconcile::Reconciler,
    report::{self, RunReport, Summary},
    settings::Settings,
    table::DesiredTable,
};

async fn run() -> Result<Summary> {
    let settings = Settings::new().context("loading settings")?;
    let token = settings.credential()?;
    let table = DesiredTable::load(&settings.run.table)?;
    let tracker = GithubTracker::new(&settings.github, &token)?;
    let repository = format!("{}/{}", settings.github.owner, settings.github.repo);

    info!(
        "reconciling {} records against {repository}{}",
        table.records.len(),
        if settings.run.dry_run { " (dry run)" } else { "" }
    );

    let started_at = OffsetDateTime::now_utc();
    let results = Reconciler::new(tracker, settings.reconcile_options())
        .with_milestone_descriptions(table.milestone_descriptions)
        .run(&table.records)
        .await?;
    let finished_at = OffsetDateTime::now_utc();

    let summary = Summary::from_results(&results);
    print!("{}", report::render(&summary, &results, settings.run.dry_run));

    if let Some(path) = settings.run.report.as_deref() {
        report::write_json(
            path,
            &RunReport {
                repository,
                dry_run: settings.run.dry_run,
                started_at,
                finished_at,
                summary,
                records: &results,
            },
        )?;
        info!("run report written to {path}");
    }

    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run().await {
        Ok(summary) if summary.has_failures() => ExitCode::from(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}
