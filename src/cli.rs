//! Command line entry point. Mirrors the HTTP payload surface: a task name
//! plus overrides for the per-performance identifiers.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use crate::fetch::QueryParams;
use crate::reconcile::ReconcileOptions;
use crate::tasks::{params_from_env, Pipeline, PerformanceSelector};
use crate::util::env::env_req;

#[derive(Debug, Parser)]
#[command(name = "roh", about = "Royal Opera House ticketing pipeline")]
pub struct Cli {
    /// Task to run: "seats" or "events".
    pub task_name: String,

    /// Target the soonest upcoming Main Stage performance.
    #[arg(long)]
    pub soonest: bool,

    /// Performance id, or "soonest" / "soonest_N".
    #[arg(short = 'p', long = "pid")]
    pub performance_id: Option<String>,

    /// Mode of sale id override.
    #[arg(short = 'm', long = "mosid")]
    pub mode_of_sale_id: Option<i64>,

    /// Reserved hook; runs the task normally when no hook is configured.
    #[arg(long)]
    pub secret_function: bool,

    /// Skip printing result tables.
    #[arg(long)]
    pub no_plot: bool,

    /// Refresh the events table without persisting anything: no new rows,
    /// no discovery, no cast bookkeeping.
    #[arg(long)]
    pub dont_save: bool,
}

impl Cli {
    fn selector(&self) -> Result<PerformanceSelector> {
        if self.soonest {
            return Ok(PerformanceSelector::Soonest(0));
        }
        match &self.performance_id {
            Some(raw) => raw.parse(),
            None => env_req("PERFORMANCE_ID")?.parse(),
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if cli.secret_function {
        info!("no secret hook is built in; running the task normally");
    }
    let pipeline = Pipeline::from_env()?;
    match cli.task_name.as_str() {
        "seats" => {
            let has_overrides =
                cli.soonest || cli.performance_id.is_some() || cli.mode_of_sale_id.is_some();
            let params = if has_overrides {
                let performance_id = pipeline.resolve_performance_id(cli.selector()?).await?;
                QueryParams {
                    performance_id,
                    mode_of_sale_id: match cli.mode_of_sale_id {
                        Some(id) => id,
                        None => env_req("MODE_OF_SALE_ID")?
                            .parse()
                            .context("MODE_OF_SALE_ID")?,
                    },
                    constituent_id: env_req("CONSTITUENT_ID")?
                        .parse()
                        .context("CONSTITUENT_ID")?,
                    source_id: env_req("SOURCE_ID")?.parse().context("SOURCE_ID")?,
                }
            } else {
                params_from_env(&pipeline).await?
            };
            let performance_id = params.performance_id;
            let bundle = pipeline
                .seats_task(&params, &ReconcileOptions::default())
                .await?;
            if !cli.no_plot {
                let available = bundle.seats.iter().filter(|s| s.seat_available).count();
                println!(
                    "performance {performance_id}: {available} of {} seats available",
                    bundle.seats.len()
                );
            }
        }
        "events" => {
            let outcome = pipeline.events_task(!cli.dont_save).await?;
            if !cli.no_plot {
                println!("today and tomorrow:");
                for event in &outcome.today_tomorrow {
                    println!("  {} {}  {}", event.date, event.time, event.title);
                }
                println!("next seven days:");
                for event in &outcome.next_week {
                    println!("  {} {}  {}", event.date, event.time, event.title);
                }
                println!(
                    "saved {} new events, discovered {} performances",
                    outcome.saved_events, outcome.discovered_performances
                );
            }
        }
        other => bail!("task {other:?} not found"),
    }
    Ok(())
}
