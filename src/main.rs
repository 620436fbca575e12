use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

mod analytics;
mod announcements;
mod classify;
mod event_log;
mod logging;
mod models;
mod report;
mod scoring;
mod sessions;

use analytics::AnalyticsOptions;
use announcements::{AnnouncementRepository, NewAnnouncement};
use classify::EnginePreference;
use event_log::EventLog;
use models::{AnalyticsReport, Event, EventKind, UserProfile};

#[derive(Parser)]
#[command(name = "ack-engagement")]
#[command(about = "Announcement acknowledgement tracker with engagement analytics", long_about = None)]
struct Cli {
    /// Line-delimited JSON event log
    #[arg(long, global = true, env = "ACK_EVENTS_FILE", default_value = "events.json")]
    events: PathBuf,
    /// JSON file holding created announcements
    #[arg(
        long,
        global = true,
        env = "ACK_ANNOUNCEMENTS_FILE",
        default_value = "announcements.json"
    )]
    announcements: PathBuf,
    /// User segmentation engine
    #[arg(
        long,
        global = true,
        env = "ACK_CLASSIFIER",
        value_enum,
        default_value_t = EnginePreference::Auto
    )]
    engine: EnginePreference,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "ACK_LOG", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordKind {
    Opened,
    Acknowledged,
}

impl From<RecordKind> for EventKind {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Opened => EventKind::Opened,
            RecordKind::Acknowledged => EventKind::Acknowledged,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an announcement and print its tracking link
    Announce {
        #[arg(long)]
        title: String,
        #[arg(long)]
        details: String,
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "http://localhost:5000")]
        base_url: String,
    },
    /// Append an opened or acknowledged event to the log
    Record {
        #[arg(value_enum)]
        kind: RecordKind,
        #[arg(long)]
        id: Option<i64>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        ip: Option<String>,
    },
    /// Print engagement analytics for the whole log
    Analyze {
        #[arg(long)]
        json: bool,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export one CSV row per user profile
    Export {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level);

    let log = EventLog::new(&cli.events);
    let options = AnalyticsOptions { engine: cli.engine };

    match cli.command {
        Commands::Announce {
            title,
            details,
            target,
            base_url,
        } => {
            let repository = AnnouncementRepository::load(&cli.announcements).await?;
            let announcement = repository.create(NewAnnouncement {
                title,
                details,
                target,
            })?;
            repository.save(&cli.announcements).await?;
            let link = announcements::tracking_link(&base_url, &announcement)?;
            println!(
                "Created announcement {}: {} ({} stored).",
                announcement.id,
                announcement.title,
                repository.count()
            );
            println!("Tracking link: {link}");
        }
        Commands::Record {
            kind,
            id,
            user,
            target,
            device,
            ip,
        } => {
            let target = match target {
                Some(target) => Some(target),
                None => lookup_target(&cli.announcements, id).await?,
            };
            let event = Event {
                kind: kind.into(),
                announcement_id: id,
                user: Some(user.unwrap_or_else(|| models::ANONYMOUS_USER.to_string())),
                target,
                timestamp: Some(models::format_timestamp(chrono::Utc::now())),
                device,
                ip,
            };
            log.append(&event).await?;
            println!(
                "Recorded {} event for {}.",
                String::from(event.kind.clone()),
                event.normalized_user()
            );
        }
        Commands::Analyze { json, limit } => {
            let report = load_report(&log, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report, limit);
            }
        }
        Commands::Report { title, out } => {
            let report = load_report(&log, &options).await?;
            let markdown = report::build_report(title.as_deref(), &report);
            tokio::fs::write(&out, markdown)
                .await
                .with_context(|| format!("failed to write report {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { csv } => {
            let report = load_report(&log, &options).await?;
            let rows = export_profiles(&csv, &report.profiles)?;
            println!("Exported {rows} profiles to {}.", csv.display());
        }
    }

    Ok(())
}

async fn lookup_target(store: &Path, id: Option<i64>) -> anyhow::Result<Option<String>> {
    let Some(id) = id.and_then(|id| u64::try_from(id).ok()) else {
        return Ok(None);
    };
    let repository = AnnouncementRepository::load(store).await?;
    Ok(repository.find(id).map(|announcement| announcement.target))
}

async fn load_report(log: &EventLog, options: &AnalyticsOptions) -> anyhow::Result<AnalyticsReport> {
    let loaded = log.load().await?;
    if loaded.skipped_lines > 0 {
        tracing::warn!(
            skipped = loaded.skipped_lines,
            path = %log.path().display(),
            "Ignored malformed event lines"
        );
    }
    Ok(analyze_events(&loaded.events, options))
}

fn analyze_events(events: &[Event], options: &AnalyticsOptions) -> AnalyticsReport {
    match options.engine {
        EnginePreference::Auto => analytics::compute_analytics(events),
        EnginePreference::Heuristic => analytics::compute_analytics_with(events, options),
    }
}

fn print_summary(report: &AnalyticsReport, limit: usize) {
    if report.overall.total_events == 0 {
        for insight in &report.insights {
            println!("{insight}");
        }
        return;
    }

    println!(
        "Engine: {} | Users: {} | Conversion: {:.1}%{}",
        report.engine,
        report.overall.total_users,
        report.overall.conversion_rate,
        report
            .overall
            .avg_ack_minutes
            .map(|minutes| format!(" | Avg ack delay: {minutes:.1} min"))
            .unwrap_or_default()
    );

    println!("Top contributors:");
    for leader in &report.leaders {
        println!(
            "- {} ({}) score {:.4}, ack rate {:.1}%",
            leader.user, leader.classification, leader.score, leader.ack_rate_percent
        );
    }

    if !report.risks.is_empty() {
        println!("Needs follow-up:");
        for risk in &report.risks {
            println!(
                "- {} risk {:.3}, {} pending, ack rate {:.1}%",
                risk.user, risk.risk_score, risk.outstanding, risk.ack_rate_percent
            );
        }
    }

    let mut profiles: Vec<&UserProfile> = report.profiles.iter().collect();
    profiles.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    println!("Users by score:");
    for profile in profiles.iter().take(limit) {
        println!(
            "- {} [{}] {} opens, {} acks, {} pending",
            profile.user, profile.classification, profile.opens, profile.acks, profile.outstanding
        );
    }

    println!("Insights:");
    for insight in &report.insights {
        println!("- {insight}");
    }
}

fn export_profiles(path: &Path, profiles: &[UserProfile]) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for profile in profiles {
        writer.serialize(profile)?;
    }
    writer.flush()?;
    Ok(profiles.len())
}
