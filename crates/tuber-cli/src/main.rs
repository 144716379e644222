//! Tuber CLI - continuous deployment for Kubernetes with automatic rollback

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;
mod util;

use commands::Context;
use error::Result;

#[derive(Parser)]
#[command(name = "tuber")]
#[command(author = "Tuber Contributors")]
#[command(version)]
#[command(about = "Supervised Kubernetes releases with automatic rollback", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file
    #[arg(long, global = true, env = "TUBER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Release an image digest for an app
    Release {
        /// App name (also its namespace)
        app: String,

        /// Image digest to release
        #[arg(long)]
        digest: String,

        /// Directory containing the .tuber/ manifests for the digest
        #[arg(long, default_value = ".")]
        manifests: PathBuf,

        /// Image tags pointing at the digest
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Render and classify manifests without touching a cluster
    Render {
        /// App name (for interpolation)
        app: String,

        /// Image digest (for interpolation)
        #[arg(long)]
        digest: String,

        /// Directory containing the .tuber/ manifests
        #[arg(long, default_value = ".")]
        manifests: PathBuf,

        /// Resources to leave out (Kind/name)
        #[arg(long)]
        exclude: Vec<String>,

        /// App variables (key=value)
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Print the classified resource list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage app records
    Apps {
        #[command(subcommand)]
        command: AppsCommands,
    },
}

#[derive(Subcommand)]
enum AppsCommands {
    /// Register a new app
    Create {
        name: String,

        /// Image repository and tag to follow
        image: String,

        /// Slack channel for release notices
        #[arg(long)]
        channel: Option<String>,

        /// Mark as a review app (external monitors are skipped)
        #[arg(long)]
        review_app: bool,
    },

    /// Show an app record
    Show { name: String },

    /// Exclude resources from releases
    Exclude {
        name: String,

        /// Resources (Kind/name)
        #[arg(required = true)]
        resources: Vec<String>,

        /// Remove the exclusions instead
        #[arg(long)]
        remove: bool,
    },

    /// Set interpolation variables
    SetVar {
        name: String,

        /// Variables (key=value)
        vars: Vec<String>,

        /// Variables to remove
        #[arg(long)]
        unset: Vec<String>,
    },

    /// Stop releasing an app
    Pause { name: String },

    /// Resume releasing a paused app
    Resume { name: String },
}

fn init_tracing(debug: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug,hyper=info,kube=info")
        } else {
            EnvFilter::new("warn,tuber=info,tuber_kube=info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    if let Err(err) = run(cli.command, cli.config.as_deref()).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(command: Commands, config: Option<&Path>) -> Result<()> {
    let ctx = Context::load(config)?;

    match command {
        Commands::Release {
            app,
            digest,
            manifests,
            tags,
        } => commands::release::run(&ctx, &app, &digest, &manifests, &tags).await,

        Commands::Render {
            app,
            digest,
            manifests,
            exclude,
            vars,
            json,
        } => commands::render::run(&ctx, &app, &digest, &manifests, &exclude, &vars, json).await,

        Commands::Apps { command } => match command {
            AppsCommands::Create {
                name,
                image,
                channel,
                review_app,
            } => commands::apps::create(&ctx, &name, &image, channel.as_deref(), review_app).await,
            AppsCommands::Show { name } => commands::apps::show(&ctx, &name).await,
            AppsCommands::Exclude {
                name,
                resources,
                remove,
            } => commands::apps::exclude(&ctx, &name, &resources, remove).await,
            AppsCommands::SetVar { name, vars, unset } => {
                commands::apps::set_var(&ctx, &name, &vars, &unset).await
            }
            AppsCommands::Pause { name } => commands::apps::set_paused(&ctx, &name, true).await,
            AppsCommands::Resume { name } => commands::apps::set_paused(&ctx, &name, false).await,
        },
    }
}
