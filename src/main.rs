use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use authstate::provider::types::{AttributeMap, ErrorCode};
use authstate::services::session::SessionObserver;
use authstate::{AuthContext, AuthError, SessionRecord};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::Json(_) => "E_CLI_OUTPUT",
            Self::Signal(_) => "E_CLI_SIGNAL",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.retryable(),
            Self::Json(_) | Self::Signal(_) => false,
        }
    }
}

/// One-line error report for stderr, e.g. `error[E_REJECTED]: User already exists`.
fn error_line(err: &CliError) -> String {
    let hint = if err.retryable() { " (retryable)" } else { "" };
    format!("error[{}]: {err}{hint}", err.error_code())
}

#[derive(Parser, Debug)]
#[command(name = "authctl", about = "Inspect and drive the authentication session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the recovered session record.
    Status,
    SignUp {
        #[arg(long)]
        email: String,
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    Confirm {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
    },
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long, env = "AUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    SignOut,
    /// Update user attributes. An empty value removes the attribute.
    Update {
        #[arg(long = "attr", value_parser = parse_attr, required = true)]
        attrs: Vec<(String, String)>,
    },
    /// Re-fetch the signed-in user's attributes.
    Refresh,
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    ConfirmReset {
        #[arg(long)]
        email: String,
        #[arg(long)]
        code: String,
        #[arg(long, env = "AUTH_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    ChangePassword {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
    /// Print every committed record until Ctrl-C.
    Watch {
        #[arg(long, help = "Re-fetch attributes on this interval")]
        refresh_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", error_line(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run_cli(cli: Cli) -> Result<(), CliError> {
    let ctx = AuthContext::from_env().await?;

    let logger: SessionObserver = Arc::new(|record: &SessionRecord| {
        let email = record.user.as_ref().map(|u| u.email.as_str());
        info!(status = %record.status(), ?email, "session record committed");
    });
    let _logging = ctx.session.subscribe(logger);

    ctx.session.initialize().await;
    run(&ctx, cli.command).await?;
    print_json(&ctx.session.snapshot())
}

async fn run(ctx: &AuthContext, command: Command) -> Result<(), CliError> {
    let session = &ctx.session;
    match command {
        Command::Status => Ok(()),
        Command::SignUp { email, password, name } => {
            let outcome = session.sign_up(&email, &password, name.as_deref()).await?;
            print_json(&outcome)
        }
        Command::Confirm { email, code } => Ok(session.confirm_sign_up(&email, &code).await?),
        Command::SignIn { email, password } => {
            let outcome = session.sign_in(&email, &password).await?;
            print_json(&outcome)
        }
        Command::SignOut => Ok(session.sign_out().await?),
        Command::Update { attrs } => {
            let attributes: AttributeMap = attrs.into_iter().collect();
            session.update_attributes(&attributes).await?;
            Ok(())
        }
        Command::Refresh => {
            session.refresh_user().await?;
            Ok(())
        }
        Command::ResetPassword { email } => {
            let outcome = session.reset_password(&email).await?;
            print_json(&outcome)
        }
        Command::ConfirmReset { email, code, password } => {
            Ok(session.confirm_reset_password(&email, &code, &password).await?)
        }
        Command::ChangePassword { old, new } => Ok(session.update_password(&old, &new).await?),
        Command::Watch { refresh_secs } => watch(ctx, refresh_secs).await,
    }
}

async fn watch(ctx: &AuthContext, refresh_secs: Option<u64>) -> Result<(), CliError> {
    let printer: SessionObserver = Arc::new(|record: &SessionRecord| match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "record serialization failed"),
    });
    let _printing = ctx.session.subscribe(printer);

    let Some(secs) = refresh_secs.filter(|s| *s > 0) else {
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => return Ok(signal?),
            _ = ticker.tick() => {
                match ctx.session.refresh_user().await {
                    Ok(_) | Err(AuthError::NoSession) => {}
                    Err(e) => warn!(error = %e, "watch: refresh failed"),
                }
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `key=value`. The value may be empty.
fn parse_attr(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute name in `{raw}`"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
