//! mixplan - command-line driver for the setup recommendation engine
//!
//! Opens (or creates) the SQLite database under the configured root folder
//! and runs one command against it. Output is JSON on stdout; logs go to
//! stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use mixplan_common::config::{ConfigOverrides, EngineConfig};
use mixplan_common::models::{
    CorrectionEntry, GearItem, GearLoan, Location, PerformerRequirement, Plan,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use mixplan_engine::db::{gear, locations};
use mixplan_engine::models::{RecommendOutcome, Recommendation, ReuseRequest, SetupRequest};
use mixplan_engine::services::{
    BillingEvent, GeneratorError, GeneratorOutput, KnowledgeLearner, LearnHardwareRequest,
    LearnProfileRequest, MessagesApiGenerator, SetupGenerator,
};
use mixplan_engine::{EngineError, GenerationOrchestrator};

/// Command-line arguments for mixplan
#[derive(Parser, Debug)]
#[command(name = "mixplan")]
#[command(about = "Mixer setup recommendations for live events")]
#[command(version)]
struct Args {
    /// Config file (default: <config dir>/mixplan/config.toml)
    #[arg(short, long, env = "MIXPLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Account the command acts for
    #[arg(short, long, env = "MIXPLAN_ACCOUNT")]
    account: Uuid,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage venues
    #[command(subcommand)]
    Location(LocationCommand),

    /// Manage owned gear and loans
    #[command(subcommand)]
    Gear(GearCommand),

    /// Research hardware, instruments or venue types into the knowledge library
    #[command(subcommand)]
    Learn(LearnCommand),

    /// Recommend a setup for a venue and lineup
    Recommend {
        #[arg(long)]
        location: Uuid,
        /// Lineup row as TYPE or TYPE:COUNT (repeatable)
        #[arg(short, long = "performer", required = true, value_parser = parse_performer)]
        performers: Vec<PerformerRequirement>,
        #[arg(long)]
        event_name: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        event_date: Option<NaiveDate>,
        /// Skip matching and always generate
        #[arg(long)]
        force: bool,
    },

    /// Accept a reuse candidate as a new setup
    Reuse {
        source: Uuid,
        #[arg(long)]
        event_name: Option<String>,
        #[arg(long)]
        event_date: Option<NaiveDate>,
    },

    /// Regenerate an existing setup's technical settings
    Refresh { setup: Uuid },

    /// Rate a setup 1-5
    Rate {
        setup: Uuid,
        rating: i64,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Log per-channel corrections on a rated setup
    Corrections {
        setup: Uuid,
        /// JSON object keyed by channel
        #[arg(long)]
        json: String,
    },

    /// Show usage counters for the current period
    Quota,

    /// Apply a billing event
    #[command(subcommand)]
    Billing(BillingCommand),
}

#[derive(Subcommand, Debug)]
enum LocationCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        venue_type: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum GearCommand {
    /// Register owned gear
    Add {
        /// mic, mixer, speaker, amplifier, di_box, ...
        #[arg(long)]
        kind: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 1)]
        quantity: i64,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Gear with its loans
    List,
    /// Lend units of an owned item
    Loan {
        gear: Uuid,
        #[arg(long)]
        borrower: String,
        #[arg(long, default_value_t = 1)]
        quantity: i64,
        #[arg(long)]
        expected_return: Option<DateTime<Utc>>,
    },
    /// Mark a loan returned
    Return { loan: Uuid },
}

#[derive(Subcommand, Debug)]
enum LearnCommand {
    /// Microphone, speaker, amplifier, DI box or mixer
    Hardware {
        #[arg(long = "type")]
        hardware_type: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        model: String,
        /// JSON object of known specifications
        #[arg(long)]
        specs: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Research again even if already in the library
        #[arg(long)]
        relearn: bool,
    },
    /// Instrument or performer type
    Instrument {
        name: String,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Venue type such as church or gurdwara
    VenueType {
        name: String,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum BillingCommand {
    /// New billing period; counters reset
    Renew {
        #[arg(long)]
        period_start: DateTime<Utc>,
        #[arg(long)]
        period_end: DateTime<Utc>,
    },
    /// New subscription
    Activate {
        #[arg(long)]
        plan: Plan,
    },
    /// Subscription cancelled; back to free
    Cancel,
}

fn parse_performer(raw: &str) -> std::result::Result<PerformerRequirement, String> {
    let (kind, count) = match raw.rsplit_once(':') {
        Some((kind, count)) => {
            let count = count
                .trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid count in '{}': {}", raw, e))?;
            (kind, count)
        }
        None => (raw, 1),
    };
    let performer = PerformerRequirement::new(kind.trim(), count);
    performer.validate().map_err(|e| e.to_string())?;
    Ok(performer)
}

#[derive(Serialize)]
struct RecommendationView<'a> {
    outcome: &'static str,
    run_id: Uuid,
    path: Vec<mixplan_engine::models::GenerationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<mixplan_engine::models::MatchQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
    setup: &'a mixplan_common::models::HistoricalSetup,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_recommendation(recommendation: &Recommendation) -> Result<()> {
    let outcome = recommendation.outcome.outcome();
    let view = match &recommendation.outcome {
        RecommendOutcome::ReuseCandidate { quality, score, source } => RecommendationView {
            outcome,
            run_id: recommendation.run.run_id,
            path: recommendation.run.path(),
            quality: Some(*quality),
            score: Some(*score),
            elapsed_ms: None,
            setup: source,
        },
        RecommendOutcome::Generated { setup, elapsed, .. } => RecommendationView {
            outcome,
            run_id: recommendation.run.run_id,
            path: recommendation.run.path(),
            quality: None,
            score: None,
            elapsed_ms: Some(elapsed.as_millis() as u64),
            setup,
        },
    };
    print_json(&view)
}

fn build_generator(config: &EngineConfig) -> Result<Arc<dyn SetupGenerator>> {
    config.require_api_key()?;
    let generator = MessagesApiGenerator::new(&config.generator)
        .map_err(|e| anyhow!("Failed to create generator client: {}", e))?;
    Ok(Arc::new(generator))
}

/// Token cancelled on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, cancelling request");
                child.cancel();
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::resolve(&ConfigOverrides {
        config_path: args.config.clone(),
        root_folder: args.root_folder.clone(),
        log_level: args.log_level.clone(),
    })
    .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting mixplan v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Database: {}", config.database_path().display());
    let pool = mixplan_common::db::init_database(&config.database_path())
        .await
        .context("Failed to open database")?;

    let config = Arc::new(config);
    let account = args.account;

    match run(args.command, account, pool, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(engine) = e.downcast_ref::<EngineError>() {
                eprintln!("{} ({})", engine, engine.outcome());
            }
            Err(e)
        }
    }
}

async fn run(
    command: Command,
    account: Uuid,
    pool: sqlx::SqlitePool,
    config: Arc<EngineConfig>,
) -> Result<()> {
    match command {
        Command::Location(LocationCommand::Add { name, venue_type, notes }) => {
            let mut location = Location::new(account, name);
            location.venue_type = venue_type;
            location.notes = notes;
            locations::insert_location(&pool, &location).await?;
            print_json(&location)
        }
        Command::Location(LocationCommand::List) => {
            print_json(&locations::list_locations(&pool, account).await?)
        }
        Command::Gear(GearCommand::Add { kind, brand, model, quantity, notes }) => {
            if quantity < 0 {
                return Err(anyhow!("Quantity cannot be negative"));
            }
            let mut item = GearItem::new(account, kind, quantity);
            item.brand = brand;
            item.model = model;
            item.notes = notes;
            gear::insert_gear(&pool, &item).await?;
            print_json(&item)
        }
        Command::Gear(GearCommand::List) => {
            print_json(&gear::list_gear_with_loans(&pool, account).await?)
        }
        Command::Gear(GearCommand::Loan { gear: gear_id, borrower, quantity, expected_return }) => {
            if quantity < 1 {
                return Err(anyhow!("A loan needs at least one unit"));
            }
            let loan = GearLoan {
                id: Uuid::new_v4(),
                gear_id,
                borrower_name: borrower,
                quantity_loaned: quantity,
                loan_date: Utc::now(),
                expected_return_date: expected_return,
                returned: false,
            };
            if !gear::insert_loan(&pool, account, &loan).await? {
                return Err(EngineError::NotFound(format!("Gear {}", gear_id)).into());
            }
            print_json(&loan)
        }
        Command::Gear(GearCommand::Return { loan }) => {
            if !gear::mark_loan_returned(&pool, account, loan).await? {
                return Err(EngineError::NotFound(format!("Loan {}", loan)).into());
            }
            info!(loan_id = %loan, "Loan returned");
            Ok(())
        }
        Command::Learn(learn) => {
            let learner = KnowledgeLearner::new(pool, config.clone(), build_generator(&config)?);
            let cancel = cancel_on_ctrl_c();
            match learn {
                LearnCommand::Hardware { hardware_type, brand, model, specs, notes, relearn } => {
                    let specs = specs
                        .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                        .transpose()
                        .context("Specs must be a JSON object")?;
                    let request = LearnHardwareRequest {
                        hardware_type,
                        brand,
                        model,
                        specs,
                        user_notes: notes,
                        relearn,
                    };
                    print_json(&learner.learn_hardware(account, request, &cancel).await?)
                }
                LearnCommand::Instrument { name, category, notes } => {
                    let request = LearnProfileRequest { name, category, user_notes: notes };
                    print_json(&learner.learn_instrument(account, request, &cancel).await?)
                }
                LearnCommand::VenueType { name, category, notes } => {
                    let request = LearnProfileRequest { name, category, user_notes: notes };
                    print_json(&learner.learn_venue_type(account, request, &cancel).await?)
                }
            }
        }
        Command::Recommend { location, performers, event_name, event_date, force } => {
            let orchestrator = GenerationOrchestrator::new(pool, config.clone(), build_generator(&config)?);
            let request = SetupRequest {
                location_id: location,
                performers,
                event_name,
                event_date,
                force_generate: force,
            };
            let recommendation = orchestrator
                .recommend(account, request, &cancel_on_ctrl_c())
                .await?;
            print_recommendation(&recommendation)
        }
        Command::Refresh { setup } => {
            let orchestrator = GenerationOrchestrator::new(pool, config.clone(), build_generator(&config)?);
            let recommendation = orchestrator.refresh(account, setup, &cancel_on_ctrl_c()).await?;
            print_recommendation(&recommendation)
        }
        Command::Reuse { source, event_name, event_date } => {
            let orchestrator = offline_orchestrator(pool, config);
            let setup = orchestrator
                .accept_reuse(
                    account,
                    source,
                    ReuseRequest {
                        event_name,
                        event_date,
                        performers: Vec::new(),
                    },
                )
                .await?;
            print_json(&setup)
        }
        Command::Rate { setup, rating, notes } => {
            let orchestrator = offline_orchestrator(pool, config);
            print_json(&orchestrator.rate_setup(account, setup, rating, notes).await?)
        }
        Command::Corrections { setup, json } => {
            let corrections: BTreeMap<String, CorrectionEntry> =
                serde_json::from_str(&json).context("Corrections must be a JSON object keyed by channel")?;
            let orchestrator = offline_orchestrator(pool, config);
            print_json(&orchestrator.record_corrections(account, setup, corrections).await?)
        }
        Command::Quota => {
            let orchestrator = offline_orchestrator(pool, config);
            print_json(&orchestrator.quota_gate().status(account).await?)
        }
        Command::Billing(billing) => {
            let event = match billing {
                BillingCommand::Renew { period_start, period_end } => {
                    BillingEvent::Renewed { period_start, period_end }
                }
                BillingCommand::Activate { plan } => BillingEvent::Activated { plan },
                BillingCommand::Cancel => BillingEvent::Cancelled,
            };
            let orchestrator = offline_orchestrator(pool, config);
            print_json(&orchestrator.quota_gate().apply_billing_event(account, event).await?)
        }
    }
}

/// Orchestrator for commands that never reach the generator
fn offline_orchestrator(pool: sqlx::SqlitePool, config: Arc<EngineConfig>) -> GenerationOrchestrator {
    GenerationOrchestrator::new(pool, config, Arc::new(Unconfigured))
}

struct Unconfigured;

#[async_trait::async_trait]
impl SetupGenerator for Unconfigured {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn generate(&self, _system: &str, _user: &str) -> std::result::Result<GeneratorOutput, GeneratorError> {
        Err(GeneratorError::NotConfigured(
            "Generator API key not configured".to_string(),
        ))
    }
}
