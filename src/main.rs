use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use food_dashboard::db::{DataSource, MemorySource, PgSource};
use food_dashboard::export::{self, DirectoryTarget};
use food_dashboard::format::{self, DateFormat, DEFAULT_TRUNCATE_LENGTH};
use food_dashboard::models::AggregatedBucket;
use food_dashboard::processing::{self, DEFAULT_RANKING_LIMIT};
use food_dashboard::report;
use food_dashboard::service::{DashboardService, DEFAULT_RECENT_COMMENTS};
use food_dashboard::theme::{FileSettingsStore, Theme, ThemeContext};
use food_dashboard::timeline::TimeRange;

#[derive(Parser)]
#[command(name = "food-dashboard")]
#[command(about = "Dish, comment and pantry dashboard for the food master backend", long_about = None)]
struct Cli {
    /// Postgres connection string for the hosted backend
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Read tables from a JSON fixture instead of the database
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Per-request timeout
    #[arg(long, env = "DASHBOARD_TIMEOUT_SECS", default_value_t = 10, global = true)]
    timeout_secs: u64,

    /// Theme settings file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Range {
    Day,
    Week,
    Month,
}

impl From<Range> for TimeRange {
    fn from(range: Range) -> Self {
        match range {
            Range::Day => TimeRange::Day,
            Range::Week => TimeRange::Week,
            Range::Month => TimeRange::Month,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum TrendKind {
    Dishes,
    Comments,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Csv,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Dataset {
    All,
    Statistics,
    Cuisines,
    Difficulty,
    DishTrend,
    CommentTimeline,
    Ranking,
    Expiring,
    Comments,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the colour theme
    Theme {
        #[arg(long)]
        set: Option<String>,
    },
    #[command(flatten)]
    Data(DataCommand),
}

#[derive(Subcommand)]
enum DataCommand {
    /// Show headline counters
    Stats,
    /// Dishes per cuisine
    Cuisines,
    /// Dishes per difficulty
    Difficulty,
    /// Daily counts over a trailing window
    Trend {
        #[arg(long, value_enum, default_value = "dishes")]
        kind: TrendKind,
        #[arg(long, value_enum, default_value = "month")]
        range: Range,
    },
    /// Most active users
    Ranking {
        #[arg(long, default_value_t = DEFAULT_RANKING_LIMIT)]
        limit: usize,
    },
    /// Foods close to expiry
    Expiring,
    /// Newest comments
    Comments {
        #[arg(long, default_value_t = DEFAULT_RECENT_COMMENTS)]
        limit: usize,
        /// Flag a comment for this session only (repeatable)
        #[arg(long)]
        flag: Vec<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete a comment
    DeleteComment {
        #[arg(long)]
        id: String,
    },
    /// Export datasets as JSON or CSV files
    Export {
        #[arg(long, value_enum, default_value = "json")]
        format: ExportFormat,
        #[arg(long, value_enum, default_value = "all")]
        dataset: Dataset,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// File name without extension
        #[arg(long)]
        name: Option<String>,
    },
    /// Write a markdown summary of the whole dashboard
    Report {
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
}

/// Comment ids are numeric in the backend; anything else is passed through
/// as text.
fn parse_id(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn dataset_name(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::All => "dashboard-export",
        Dataset::Statistics => "statistics",
        Dataset::Cuisines => "cuisine-distribution",
        Dataset::Difficulty => "difficulty-distribution",
        Dataset::DishTrend => "dish-trend",
        Dataset::CommentTimeline => "comment-timeline",
        Dataset::Ranking => "user-ranking",
        Dataset::Expiring => "expiring-foods",
        Dataset::Comments => "recent-comments",
    }
}

async fn fetch_dataset<S: DataSource>(
    service: &DashboardService<S>,
    dataset: Dataset,
) -> anyhow::Result<Value> {
    let value = match dataset {
        Dataset::All => serde_json::to_value(service.export_all().await?)?,
        Dataset::Statistics => serde_json::to_value(vec![service.statistics().await?])?,
        Dataset::Cuisines => serde_json::to_value(processing::calculate_percentages(
            &service.cuisine_distribution().await?,
        ))?,
        Dataset::Difficulty => serde_json::to_value(processing::calculate_percentages(
            &service.difficulty_distribution().await?,
        ))?,
        Dataset::DishTrend => serde_json::to_value(service.dish_trend(TimeRange::Month).await?)?,
        Dataset::CommentTimeline => {
            serde_json::to_value(service.comment_timeline(TimeRange::Month).await?)?
        }
        Dataset::Ranking => serde_json::to_value(processing::calculate_user_ranking(
            &service.user_ranking(DEFAULT_RANKING_LIMIT).await?,
        ))?,
        Dataset::Expiring => serde_json::to_value(service.expiring_foods().await?)?,
        Dataset::Comments => {
            serde_json::to_value(service.recent_comments(DEFAULT_RECENT_COMMENTS).await?)?
        }
    };
    Ok(value)
}

fn print_mix(buckets: &[AggregatedBucket]) {
    if buckets.is_empty() {
        println!("No dishes recorded yet.");
        return;
    }
    for bucket in processing::calculate_percentages(buckets) {
        println!(
            "- {}: {} ({:.2}%)",
            bucket.bucket.group_key, bucket.bucket.count, bucket.percentage
        );
    }
}

async fn run<S: DataSource>(service: DashboardService<S>, command: DataCommand) -> anyhow::Result<()> {
    match command {
        DataCommand::Stats => {
            let stats = service.statistics().await?;
            println!("Users: {}", stats.total_users);
            println!("Dishes: {}", stats.total_dishes);
            println!("Comments: {}", stats.total_comments);
            println!("Foods: {}", stats.total_foods);
        }
        DataCommand::Cuisines => print_mix(&service.cuisine_distribution().await?),
        DataCommand::Difficulty => print_mix(&service.difficulty_distribution().await?),
        DataCommand::Trend { kind, range } => {
            let range = TimeRange::from(range);
            let points = match kind {
                TrendKind::Dishes => service.dish_trend(range).await?,
                TrendKind::Comments => service.comment_timeline(range).await?,
            };

            if points.is_empty() {
                println!("No activity in the last {} days.", range.window_days());
                return Ok(());
            }
            for point in points {
                println!("{} {}", point.date, point.count);
            }
        }
        DataCommand::Ranking { limit } => {
            let users = service.user_ranking(limit).await?;
            if users.is_empty() {
                println!("No user activity yet.");
                return Ok(());
            }

            println!("Most active users:");
            for (index, user) in users.iter().enumerate() {
                println!(
                    "{}. {} score {} ({} dishes, {} comments)",
                    index + 1,
                    user.user_name,
                    user.activity_score,
                    user.dish_count,
                    user.comment_count
                );
            }
        }
        DataCommand::Expiring => {
            let foods = service.expiring_foods().await?;
            if foods.is_empty() {
                println!("Nothing is about to expire.");
                return Ok(());
            }
            for food in foods {
                let days = food.get("days_remaining").cloned().unwrap_or(Value::Null);
                let urgency = processing::classify_urgency(&days);
                println!("- [{urgency}] {}", Value::Object(food));
            }
        }
        DataCommand::Comments {
            limit,
            flag,
            reason,
        } => {
            for id in &flag {
                service.flag_comment(&parse_id(id), reason.as_deref());
            }

            for comment in service.recent_comments(limit).await? {
                let created_at = comment.created_at.clone().map(Value::String).unwrap_or_default();
                println!(
                    "#{} {} {}: {}{}",
                    comment.id,
                    format::format_date(&created_at, DateFormat::DateTime),
                    comment.user_name.as_deref().unwrap_or("anonymous"),
                    format::truncate_text(
                        comment.content.as_deref().unwrap_or_default(),
                        DEFAULT_TRUNCATE_LENGTH
                    ),
                    if comment.flagged { " [flagged]" } else { "" }
                );
            }
        }
        DataCommand::DeleteComment { id } => {
            service.delete_comment(&parse_id(&id)).await?;
            println!("Deleted comment {id}.");
        }
        DataCommand::Export {
            format,
            dataset,
            out,
            name,
        } => {
            if matches!(format, ExportFormat::Csv) && dataset == Dataset::All {
                anyhow::bail!("CSV export needs a single dataset; pass --dataset");
            }

            let target = DirectoryTarget::new(&out);
            let name = name.unwrap_or_else(|| dataset_name(dataset).to_string());
            let value = fetch_dataset(&service, dataset).await?;

            let saved = match (format, dataset) {
                (ExportFormat::Json, Dataset::All) => {
                    export::export_multiple_datasets_to_json(&target, &value, &name)
                }
                (ExportFormat::Json, _) => export::export_to_json(&target, &value, &name),
                (ExportFormat::Csv, _) => {
                    let rows: Vec<_> = serde_json::from_value(value)
                        .context("dataset is not a list of rows")?;
                    export::export_to_csv(&target, &export::prepare_data_for_csv(&rows), &name, None)
                }
            };

            if !saved {
                anyhow::bail!("export of {name} failed");
            }
            println!("Export written to {}.", out.display());
        }
        DataCommand::Report { out } => {
            let snapshot = service.export_all().await?;
            let comments = service.recent_comments(DEFAULT_RECENT_COMMENTS).await?;
            let report = report::build_report(&snapshot, &comments, &chrono::Local);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn run_theme(settings: Option<PathBuf>, set: Option<String>) -> anyhow::Result<()> {
    let path = settings.unwrap_or_else(FileSettingsStore::default_path);
    let mut context = ThemeContext::load(FileSettingsStore::new(path));
    if let Some(name) = set {
        context.apply(&name).context("failed to save theme settings")?;
    }

    println!("Theme: {}", context.current().name());
    for (variable, value) in context.css_variables() {
        println!("  {variable}: {value}");
    }
    let names: Vec<_> = Theme::ALL.iter().map(|theme| theme.name()).collect();
    println!("Available: {}", names.join(", "));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let command = match cli.command {
        Commands::Theme { set } => return run_theme(cli.settings, set),
        Commands::Data(command) => command,
    };
    let timeout = Duration::from_secs(cli.timeout_secs);

    if let Some(fixture) = &cli.fixture {
        let source = MemorySource::from_fixture(fixture)
            .with_context(|| format!("failed to load fixture {}", fixture.display()))?;
        return run(DashboardService::new(source).with_timeout(timeout), command).await;
    }

    let database_url = cli
        .database_url
        .context("DATABASE_URL must be set to the dashboard's Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    run(
        DashboardService::new(PgSource::new(pool)).with_timeout(timeout),
        command,
    )
    .await
}
