use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod attendance;
mod batch;
mod config;
mod db;
mod error;
mod grades;
mod models;
mod notify;
mod report;
mod rules;
mod store;

use crate::attendance::{AttendanceAnalyzer, AttendanceThresholds};
use crate::batch::BatchRunner;
use crate::config::EngineConfig;
use crate::db::{ImportKind, PgStore};
use crate::grades::GradeAggregator;
use crate::models::DateWindow;
use crate::notify::LogChannel;
use crate::store::MetricStore;

#[derive(Parser)]
#[command(name = "academic-alert-engine")]
#[command(about = "Academic analytics and guardian notification engine", long_about = None)]
struct Cli {
    /// Engine configuration (TOML); built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import records from a CSV file
    Import {
        #[arg(long, value_enum)]
        kind: ImportKind,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Weighted grade for one student in one offering
    Grade {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        offering: Uuid,
    },
    /// Period GPA, or cumulative GPA when no period is given
    Gpa {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        period: Option<String>,
    },
    /// Attendance rate and patterns over a trailing window
    Attendance {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        offering: Uuid,
        #[arg(long)]
        since_days: Option<i64>,
    },
    /// Run the daily alert pass
    Run {
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Write a markdown report to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("academic_alert_engine=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.worker_count.max(1) as u32 + 2)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PgStore::new(pool));

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(store.pool()).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { kind, csv } => {
            let inserted = db::import_csv(store.pool(), kind, &csv).await?;
            println!("Imported {inserted} rows from {}.", csv.display());
        }
        Commands::Grade { student, offering } => {
            let aggregator = GradeAggregator::new(store, config.credit_hour_weighting_enabled);
            let grade = aggregator.compute_offering_grade(student, offering).await?;
            println!("{:.1}% ({})", grade.percentage, grade.letter);
            for category in grade.categories.iter() {
                println!(
                    "- {} (weight {:.2}): {:.1}% across {} graded",
                    category.category,
                    category.weight,
                    category.percentage(),
                    category.graded_count
                );
            }
        }
        Commands::Gpa { student, period } => {
            let aggregator = GradeAggregator::new(store, config.credit_hour_weighting_enabled);
            let (label, gpa) = match period {
                Some(period) => {
                    let gpa = aggregator.compute_period_gpa(student, &period).await?;
                    (format!("Period {period}"), gpa)
                }
                None => (
                    "Cumulative".to_string(),
                    aggregator.compute_cumulative_gpa(student).await?,
                ),
            };
            println!(
                "{label} GPA {:.2} ({:.1}%) across {} offerings",
                gpa.gpa4, gpa.gpa_percent, gpa.offering_count
            );
        }
        Commands::Attendance {
            student,
            offering,
            since_days,
        } => {
            let today = Utc::now().date_naive();
            let window =
                DateWindow::trailing(today, since_days.unwrap_or(config.attendance_window_days));
            let schedule = store
                .offering(offering)
                .await?
                .with_context(|| format!("unknown offering {offering}"))?
                .schedule;
            let scheduled = attendance::meeting_days(&schedule, window).len();

            let analyzer = AttendanceAnalyzer::new(store, AttendanceThresholds::from(&config));
            let rate = analyzer
                .compute_attendance_rate(student, offering, window)
                .await?;
            let patterns = analyzer.detect_patterns(student, offering, window).await?;

            println!(
                "Attendance {:.1}% over {} recorded of {} scheduled days ({} to {})",
                rate.rate * 100.0,
                rate.total_days,
                scheduled,
                window.start,
                window.end
            );
            println!(
                "- absent {}, tardy {}, excused {}; longest absence streak {}",
                patterns.absent_days,
                patterns.tardy_days,
                patterns.excused_days,
                patterns.longest_absence_streak
            );
            if patterns.monday_friday_absences {
                println!("- absences cluster on Mondays and Fridays");
            }
        }
        Commands::Run {
            as_of,
            report: report_path,
            json,
        } => {
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let runner = BatchRunner::new(
                store.clone(),
                store.clone(),
                store,
                Arc::new(LogChannel),
                config,
            );
            let summary = runner.run_daily_pass(as_of).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Processed {} of {} students: {} alerts, {} notifications handed off.",
                    summary.students_processed,
                    summary.students_total,
                    summary.dispatch.alerts_generated,
                    summary.dispatch.notifications_sent
                );
            }

            if let Some(out) = report_path {
                std::fs::write(&out, report::build_report(&summary))?;
                println!("Report written to {}.", out.display());
            }
        }
    }

    Ok(())
}
