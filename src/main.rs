use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pcctl::auth::{AuthClient, AuthMode};
use pcctl::channels::FirebaseTree;
use pcctl::handlers::builtin_registry;
use pcctl::platform::SystemPlatform;
use pcctl::prompt::TerminalPrompt;
use pcctl::storage::FirebaseStorage;
use pcctl::supervisor::LoginPrompt;
use pcctl::{Backend, Config, CredentialBundle, SessionStore, Supervisor};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Remote device control agent.
#[derive(Parser, Debug)]
#[command(name = "pcctl", version, about, long_about = None)]
struct Cli {
    /// Debug logging for pcctl (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent (default)
    Run,
    /// Sign in and save the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account and save the session
    Register {
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the saved session
    Logout,
    /// Show resolved paths and whether a session is saved
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load()?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Login { email } => login(config, AuthMode::SignIn, email).await,
        Command::Register { email } => login(config, AuthMode::SignUp, email).await,
        Command::Logout => {
            let store = SessionStore::new(&config.session_path);
            if store.clear()? {
                println!("Removed {}", store.path().display());
            } else {
                println!("No saved session");
            }
            Ok(())
        }
        Command::Status => {
            let store = SessionStore::new(&config.session_path);
            println!("config:      {}", config.config_path.display());
            println!("credentials: {}", config.credentials_path.display());
            println!("session:     {}", store.path().display());
            match store.load() {
                Some(session) => println!("linked to:   {}", session.id()),
                None => println!("linked to:   (none)"),
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info,pcctl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_bundle(config: &Config) -> Result<CredentialBundle> {
    CredentialBundle::load(&config.credentials_path).with_context(|| {
        format!(
            "credential bundle is required (set PCCTL_CREDENTIALS or place it at {})",
            config.credentials_path.display()
        )
    })
}

async fn run(config: Config) -> Result<()> {
    let bundle = load_bundle(&config)?;
    let backend = Backend {
        tree: Arc::new(
            FirebaseTree::from_bundle(&bundle).with_idle_timeout(config.stream_idle_timeout()),
        ),
        storage: Arc::new(FirebaseStorage::from_bundle(&bundle)),
        platform: Arc::new(SystemPlatform::new(config.command_timeout())),
    };
    let supervisor = Supervisor::new(
        config.clone(),
        SessionStore::new(&config.session_path),
        AuthClient::from_bundle(&bundle),
        backend,
        builtin_registry(),
    );

    let prompt = TerminalPrompt::interactive();
    let prompt: Option<&dyn LoginPrompt> = if TerminalPrompt::is_available() {
        Some(&prompt)
    } else {
        None
    };

    tokio::select! {
        result = supervisor.run(prompt) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; marking device offline");
            supervisor.go_offline().await;
        }
    }
    Ok(())
}

async fn login(config: Config, mode: AuthMode, email: Option<String>) -> Result<()> {
    let bundle = load_bundle(&config)?;
    let auth = AuthClient::from_bundle(&bundle);
    let store = SessionStore::new(&config.session_path);
    let prompt = TerminalPrompt::with_mode(mode, email);

    loop {
        let Some(request) = prompt.next_attempt().await? else {
            anyhow::bail!("login cancelled");
        };
        match auth
            .authenticate(request.mode, &request.email, &request.password)
            .await
        {
            Ok(session) => {
                store.save(&session)?;
                println!("Linked to {} ({})", session.id(), store.path().display());
                return Ok(());
            }
            Err(err) => prompt.report_failure(&err).await,
        }
    }
}
