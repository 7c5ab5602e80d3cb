//! applock-hook: CLI bridge between lock screens and the applock daemon.
//!
//! Lock presenters call it to report authentication outcomes or have the
//! daemon check an entered secret; settings UIs call it after editing the
//! policy file.
//!
//! ## Subcommands
//!
//! - `auth-result`: Report an authentication outcome for an app
//! - `verify`: Check a secret read from stdin and report the outcome
//! - `reload`: Re-read the lock policy
//! - `status` / `health`: Print daemon JSON

mod daemon_client;
mod logging;

use applock_daemon_protocol::{AuthOutcome, Method};
use clap::{Parser, Subcommand, ValueEnum};
use daemon_client::ClientError;
use std::io::BufRead;
use std::process::ExitCode;

const EXIT_FAILURE: u8 = 1;
const EXIT_SECRET_MISMATCH: u8 = 2;

#[derive(Parser)]
#[command(name = "applock-hook")]
#[command(about = "Applock daemon client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report an authentication outcome (biometric or external lock screens)
    AuthResult {
        /// Application id the challenge was shown for
        #[arg(value_name = "APP")]
        app: String,

        #[arg(value_enum, value_name = "OUTCOME")]
        outcome: OutcomeArg,
    },

    /// Verify a PIN or pattern read from stdin (exit 2 on mismatch)
    Verify {
        #[arg(value_name = "APP")]
        app: String,
    },

    /// Reload the lock policy from the config file
    Reload,

    /// Print the current lock session
    Status,

    /// Print daemon health
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Authenticated,
    Failed,
}

impl From<OutcomeArg> for AuthOutcome {
    fn from(value: OutcomeArg) -> Self {
        match value {
            OutcomeArg::Authenticated => AuthOutcome::Authenticated,
            OutcomeArg::Failed => AuthOutcome::Failed,
        }
    }
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::AuthResult { app, outcome } => {
            finish(daemon_client::send_auth_result(&app, outcome.into()), "auth-result")
        }
        Commands::Verify { app } => run_verify(&app),
        Commands::Reload => print_data(daemon_client::call(Method::ReloadPolicy, None), "reload"),
        Commands::Status => print_data(daemon_client::call(Method::GetSession, None), "status"),
        Commands::Health => print_data(daemon_client::call(Method::GetHealth, None), "health"),
    }
}

fn run_verify(app: &str) -> ExitCode {
    let mut secret = String::new();
    if let Err(err) = std::io::stdin().lock().read_line(&mut secret) {
        tracing::error!(error = %err, "Failed to read secret from stdin");
        return ExitCode::from(EXIT_FAILURE);
    }
    let secret = secret.trim_end_matches(['\r', '\n']);

    match daemon_client::verify_secret(app, secret) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::info!(app, "Secret rejected");
            ExitCode::from(EXIT_SECRET_MISMATCH)
        }
        Err(err) => {
            // Fails closed: a disabled daemon cannot confirm a secret.
            tracing::error!(error = %err, "applock-hook verify failed");
            eprintln!("{}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn finish(result: Result<(), ClientError>, label: &str) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(ClientError::Disabled) => {
            tracing::debug!(command = label, "Daemon disabled; skipping");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, command = label, "applock-hook failed");
            eprintln!("{}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn print_data(result: Result<serde_json::Value, ClientError>, label: &str) -> ExitCode {
    let data = match result {
        Ok(data) => data,
        Err(err) => return finish(Err(err), label),
    };
    match serde_json::to_string_pretty(&data) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, command = label, "Failed to render daemon response");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
