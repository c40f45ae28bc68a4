mod commands;
mod config;
mod store_manager;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signoff_db::{Decision, Team, WorkflowId};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "signoff")]
#[command(author, version, about = "Biller onboarding sign-off ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and directories
    Init {
        /// custom database path (default: ~/.signoff/signoff.db)
        #[arg(short, long)]
        db_path: Option<PathBuf>,

        /// custom attachment directory (default: ~/.signoff/attachments)
        #[arg(short, long)]
        attachments_dir: Option<PathBuf>,
    },

    /// Create a workflow from a JSON or YAML payload
    Create {
        #[arg(short, long)]
        file: PathBuf,

        /// files uploaded with the request; failures are reported, not fatal
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },

    Show {
        id: WorkflowId,
    },

    List,

    /// Print the step table
    Steps,

    /// Edit business fields (Business Team, Contract Negotiation only)
    Update {
        id: WorkflowId,

        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        team: Team,

        /// key=value, value parsed as JSON when possible
        #[arg(short, long = "set")]
        sets: Vec<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Approve or reject the current step
    Signoff {
        id: WorkflowId,

        #[arg(short, long)]
        step: u8,

        #[arg(short, long)]
        team: Team,

        #[arg(short, long)]
        person: String,

        #[arg(short, long)]
        decision: Decision,

        #[arg(short, long)]
        remarks: Option<String>,

        /// fail if the workflow changed since this version
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Re-open a rejected step
    Resubmit {
        id: WorkflowId,

        #[arg(short, long)]
        step: u8,

        #[arg(short, long)]
        team: Team,
    },

    History {
        id: WorkflowId,
    },

    Rejections {
        id: WorkflowId,
    },

    /// Upload a GL-detail attachment
    Attach {
        id: WorkflowId,

        path: PathBuf,

        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        team: Team,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Check snapshot checksums, ledgers and history chains
    Verify,

    /// Fold the write-ahead log into the snapshot
    Compact,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_path,
            attachments_dir,
        } => commands::init::run(db_path, attachments_dir)?,

        Commands::Create { file, attach } => commands::workflow::create(file, attach)?,
        Commands::Show { id } => commands::workflow::show(id)?,
        Commands::List => commands::workflow::list()?,
        Commands::Steps => commands::workflow::steps()?,

        Commands::Update {
            id,
            user,
            team,
            sets,
            file,
        } => commands::workflow::update(id, user, team, sets, file)?,

        Commands::Signoff {
            id,
            step,
            team,
            person,
            decision,
            remarks,
            expected_version,
        } => commands::workflow::signoff(
            id,
            step,
            team,
            person,
            decision,
            remarks,
            expected_version,
        )?,

        Commands::Resubmit { id, step, team } => commands::workflow::resubmit(id, step, team)?,
        Commands::History { id } => commands::workflow::history(id)?,
        Commands::Rejections { id } => commands::workflow::rejections(id)?,

        Commands::Attach {
            id,
            path,
            user,
            team,
            description,
        } => commands::workflow::attach(id, path, user, team, description)?,

        Commands::Verify => commands::store::verify()?,
        Commands::Compact => commands::store::compact()?,
    }
    Ok(())
}
