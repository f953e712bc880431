//! Waypoint - learning progress and gamification
//!
//! CLI entry point with global panic handler.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use waypoint::cli::{
    read_blueprint, AchievementsCommand, AchievementsOptions, ProgressAction, ProgressCommand,
    ProgressOptions, StatusCommand, StatusOptions,
};
use waypoint::config::{crash_log_path, Config};
use waypoint::error::{exit_codes, WaypointError};
use waypoint::local;
use waypoint::stats::SocialCounts;
use waypoint::storage::FileDocumentStore;
use waypoint::sync::ReconciliationService;

// =============================================================================
// CLI Definition
// =============================================================================

/// Waypoint - learning progress and gamification
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Learner whose progress document is used
    #[arg(long, short, global = true, env = "WAYPOINT_LEARNER")]
    learner: Option<String>,
    /// Output as JSON
    #[arg(long, short, global = true)]
    json: bool,
    /// Suppress output
    #[arg(long, short, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show level, streak, roadmap, courses, achievements and skins
    Status,

    /// Add (or with a negative amount, remove) XP
    Xp {
        #[arg(allow_hyphen_values = true)]
        amount: i64,
    },

    /// Mark a course lesson complete
    Lesson {
        course: String,
        lesson: String,
        /// Number of lessons in the course
        #[arg(long)]
        total: Option<u32>,
    },

    /// Work on the roadmap in focus
    Roadmap {
        #[command(subcommand)]
        action: RoadmapAction,
    },

    /// Record learning activity for the streak
    Activity {
        /// Day of the activity (YYYY-MM-DD), today by default
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Evaluate achievements and persist unlocks
    Achievements {
        /// Follower count from the social service
        #[arg(long, default_value_t = 0)]
        followers: u64,
        /// Post count from the social service
        #[arg(long, default_value_t = 0)]
        posts: u64,
        /// List every rule, not only unlocked ones
        #[arg(long, short)]
        all: bool,
    },

    /// Equip an unlocked skin
    Skin { id: String },
}

#[derive(Subcommand)]
enum RoadmapAction {
    /// Start (or switch to) a roadmap from a generated blueprint file
    Start { file: PathBuf },
    /// Complete a node and unlock its dependents
    Node { id: String },
    /// Record a finished lesson inside a node
    Lesson { node: String },
    /// Complete a key point
    KeyPoint { id: String },
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    setup_panic_handler();
    setup_tracing();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("waypoint error: {}", e);
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

/// Log to stderr, filtered by `WAYPOINT_LOG` (default `warn`).
fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("WAYPOINT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Set up the global panic handler.
///
/// On panic, logs to `<waypoint_home>/crash.log` and exits with code 3.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("waypoint panic: {}", info);

        if let Some(crash_log) = crash_log_path() {
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

/// Run the CLI and return the exit code.
async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let learner = cli
        .learner
        .clone()
        .ok_or("no learner given (use --learner or WAYPOINT_LEARNER)")?;

    let config = Config::load();
    let dir = config.store_dir().ok_or_else(|| {
        WaypointError::config("could not determine documents directory (no home directory)")
    })?;
    let store = FileDocumentStore::with_dir(dir)?;
    let service = ReconciliationService::from_config(store, local::shared(), &config);

    let (success, text) = match cli.command {
        Commands::Status => {
            let options = StatusOptions {
                json: cli.json,
                quiet: cli.quiet,
            };
            let cmd = StatusCommand::new(service);
            let output = cmd.run(&learner).await;
            (output.success, cmd.format_output(&output, &options))
        }
        Commands::Achievements {
            followers,
            posts,
            all,
        } => {
            let options = AchievementsOptions {
                json: cli.json,
                quiet: cli.quiet,
                all,
            };
            let cmd = AchievementsCommand::new(service);
            let output = cmd.run(&learner, SocialCounts { followers, posts }).await;
            (output.success, cmd.format_output(&output, &options))
        }
        command => {
            let options = ProgressOptions {
                json: cli.json,
                quiet: cli.quiet,
            };
            let action = progress_action(command)?;
            let cmd = ProgressCommand::new(service);
            let output = cmd.run(&learner, &action).await;
            (output.success, cmd.format_output(&output, &options))
        }
    };

    print!("{}", text);
    if success {
        Ok(ExitCode::from(exit_codes::SUCCESS as u8))
    } else {
        Ok(ExitCode::from(exit_codes::ERROR as u8))
    }
}

fn progress_action(command: Commands) -> Result<ProgressAction, WaypointError> {
    let action = match command {
        Commands::Xp { amount } => ProgressAction::AddXp { amount },
        Commands::Lesson {
            course,
            lesson,
            total,
        } => ProgressAction::CompleteLesson {
            course_id: course,
            lesson_id: lesson,
            total_lessons: total,
        },
        Commands::Roadmap { action } => match action {
            RoadmapAction::Start { file } => ProgressAction::StartRoadmap {
                blueprint: read_blueprint(&file)?,
            },
            RoadmapAction::Node { id } => ProgressAction::CompleteNode { node_id: id },
            RoadmapAction::Lesson { node } => ProgressAction::NodeLesson { node_id: node },
            RoadmapAction::KeyPoint { id } => ProgressAction::CompleteKeyPoint { key_point_id: id },
        },
        Commands::Activity { date } => ProgressAction::RecordActivity {
            day: date.unwrap_or_else(|| chrono::Utc::now().date_naive()),
        },
        Commands::Skin { id } => ProgressAction::EquipSkin { skin_id: id },
        Commands::Status | Commands::Achievements { .. } => {
            return Err(WaypointError::invalid_state("not a progress command"));
        }
    };
    Ok(action)
}
