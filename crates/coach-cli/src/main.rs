mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, participant::ParticipantSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "coach",
    about = "Intervention engine for text and email coaching dialogs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .coach/)
    #[arg(long, global = true, env = "COACH_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .coach/ with a default config and an empty database
    Init,

    /// Import an intervention bundle (YAML)
    Import {
        /// Path to the bundle file
        file: PathBuf,
    },

    /// Run the HTTP API and the worker loops until ctrl-c
    Serve {
        /// Port to listen on (default: server.port from the config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one scheduling tick
    Tick {
        /// Dispatch due messages after the tick
        #[arg(long)]
        dispatch: bool,
    },

    /// Send every message that is due
    Dispatch,

    /// Revert messages left in SENDING by an interrupted process
    Recover,

    /// Handle one received message as if a gateway had delivered it
    Receive {
        /// Channel: sms, email, supervisor_sms or supervisor_email
        #[arg(long, default_value = "sms")]
        channel: String,
        /// Phone number or mail address of the sender
        #[arg(long)]
        sender: String,
        /// Gateway message id used to drop duplicates
        #[arg(long)]
        client_id: Option<String>,
        /// Order of the message this answers, if the gateway knows it
        #[arg(long)]
        order: Option<u64>,
        /// Message body
        body: String,
    },

    /// Show a participant's dialog status and messages
    Status {
        /// Participant id
        participant: uuid::Uuid,
    },

    /// Queue a manual message for a participant or their supervisor
    Send {
        /// Participant id
        participant: uuid::Uuid,
        /// Text; $variables are rendered
        text: String,
        /// Send to the supervisor instead
        #[arg(long)]
        supervisor: bool,
        /// Wait this many minutes for an answer
        #[arg(long)]
        reply_window: Option<u32>,
    },

    /// Administrative participant operations
    Participant {
        #[command(subcommand)]
        subcommand: ParticipantSubcommand,
    },

    /// Message counts per active intervention
    Stats,

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Import { file } => cmd::import::run(&root, &file, cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Tick { dispatch } => cmd::engine::tick(&root, dispatch, cli.json),
        Commands::Dispatch => cmd::engine::dispatch(&root, cli.json),
        Commands::Recover => cmd::engine::recover(&root, cli.json),
        Commands::Receive {
            channel,
            sender,
            client_id,
            order,
            body,
        } => cmd::engine::receive(
            &root,
            &channel,
            &sender,
            &body,
            client_id.as_deref(),
            order,
            cli.json,
        ),
        Commands::Status { participant } => cmd::participant::status(&root, participant, cli.json),
        Commands::Send {
            participant,
            text,
            supervisor,
            reply_window,
        } => cmd::participant::send(&root, participant, &text, supervisor, reply_window, cli.json),
        Commands::Participant { subcommand } => cmd::participant::run(&root, subcommand, cli.json),
        Commands::Stats => cmd::stats::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
