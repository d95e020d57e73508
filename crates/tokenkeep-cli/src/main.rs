//! tokenkeep - a command-line host for a token-authenticated HTTP API.
//!
//! Logs in, keeps the refresh token between runs, and sends authenticated
//! requests that renew the access token transparently when it expires.

use std::collections::BTreeMap;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tokenkeep_core::{ApiRequest, Config, LoginCredentials, SessionController, SessionEvent};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

const USERNAME_ENV: &str = "TOKENKEEP_USERNAME";
const PASSWORD_ENV: &str = "TOKENKEEP_PASSWORD";

/// When set, logs are also written to a daily file in this directory
const LOG_DIR_ENV: &str = "TOKENKEEP_LOG_DIR";

/// Upper bound for `burst`, to keep a typo from flooding the server
const MAX_BURST: usize = 64;

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tokenkeep.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[derive(Debug, PartialEq)]
enum Command {
    Login(Option<String>),
    Logout,
    Whoami,
    Get(String),
    Burst(String, usize),
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let arg = |i: usize| args.get(i).map(String::as_str);
        Ok(match arg(0) {
            Some("login") => Command::Login(arg(1).map(str::to_string)),
            Some("logout") => Command::Logout,
            Some("whoami") => Command::Whoami,
            Some("get") => match arg(1) {
                Some(path) => Command::Get(path.to_string()),
                None => bail!("get requires a path"),
            },
            Some("burst") => {
                let path = arg(1).context("burst requires a path")?;
                let count = match arg(2) {
                    Some(n) => n.parse().with_context(|| format!("invalid count: {}", n))?,
                    None => 5,
                };
                if count == 0 || count > MAX_BURST {
                    bail!("count must be between 1 and {}", MAX_BURST);
                }
                Command::Burst(path.to_string(), count)
            }
            Some("help") | Some("--help") | Some("-h") | None => Command::Help,
            Some(other) => bail!("unknown command: {}", other),
        })
    }
}

fn print_usage() {
    eprintln!(
        "Usage: tokenkeep <command>\n\n\
         Commands:\n  \
           login [username]    Log in and store the refresh token\n  \
           logout              End the session here and on the server\n  \
           whoami              Restore the stored session and show the profile\n  \
           get <path>          Send an authenticated GET and print the body\n  \
           burst <path> [n]    Send n concurrent GETs (exercises shared renewal)\n\n\
         Environment: TOKENKEEP_API_URL, TOKENKEEP_USERNAME, TOKENKEEP_PASSWORD,\n\
         TOKENKEEP_LOG_DIR, RUST_LOG"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n", e);
            print_usage();
            std::process::exit(2);
        }
    };
    if command == Command::Help {
        print_usage();
        return Ok(());
    }

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    info!(api = %config.api_base_url, storage = ?config.storage, "tokenkeep starting");

    let session = config
        .session_builder()?
        .build()
        .context("Failed to set up session")?;
    watch_session(&session);

    match command {
        Command::Login(username) => login(&session, &mut config, username).await,
        Command::Logout => {
            session.logout().await.context("Failed to clear stored credentials")?;
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => {
            match session.restore_session().await {
                Some(user) => {
                    println!("{}", user.display_name());
                    if !user.email.is_empty() {
                        println!("{}", user.email);
                    }
                    if let Some(current) = session.session() {
                        println!(
                            "Session resumed {}",
                            current.authenticated_at.format("%Y-%m-%d %H:%M:%S UTC")
                        );
                    }
                }
                None => println!("Not logged in."),
            }
            Ok(())
        }
        Command::Get(path) => {
            require_session(&session).await?;
            get(&session, &path).await
        }
        Command::Burst(path, count) => {
            require_session(&session).await?;
            burst(&session, &path, count).await
        }
        Command::Help => Ok(()),
    }
}

/// Tell the user when a failed renewal ends the session mid-command.
fn watch_session(session: &SessionController) {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::Terminated { reason } = event {
                eprintln!("Session ended ({}). Run `tokenkeep login` to sign in again.", reason);
            }
        }
    });
}

async fn require_session(session: &SessionController) -> Result<()> {
    if session.restore_session().await.is_none() {
        bail!("Not logged in. Run `tokenkeep login` first.");
    }
    Ok(())
}

async fn login(session: &SessionController, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| std::env::var(USERNAME_ENV).ok()) {
        Some(u) => u,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(p) => p,
        Err(_) => rpassword::prompt_password("Password: ")?,
    };

    println!("Authenticating...");
    let user = session
        .login(&LoginCredentials::new(username.clone(), password))
        .await?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}.", user.display_name());
    Ok(())
}

fn prompt_username(last_username: Option<&str>) -> Result<String> {
    match last_username {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last_username) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

async fn get(session: &SessionController, path: &str) -> Result<()> {
    let response = session.client().send(&ApiRequest::get(path)).await?;
    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    eprintln!("{}", status);
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", body),
    }
    Ok(())
}

async fn burst(session: &SessionController, path: &str, count: usize) -> Result<()> {
    let request = ApiRequest::get(path);
    let client = session.client();
    let results = join_all((0..count).map(|_| client.send(&request))).await;

    let mut tally: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        let key = match result {
            Ok(response) => response.status().to_string(),
            Err(e) => e.to_string(),
        };
        *tally.entry(key).or_default() += 1;
    }
    for (outcome, n) in tally {
        println!("{:>4}  {}", n, outcome);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args(&[])).unwrap(), Command::Help);
        assert_eq!(Command::parse(&args(&["login"])).unwrap(), Command::Login(None));
        assert_eq!(
            Command::parse(&args(&["login", "alice"])).unwrap(),
            Command::Login(Some("alice".into()))
        );
        assert_eq!(
            Command::parse(&args(&["get", "/notes"])).unwrap(),
            Command::Get("/notes".into())
        );
        assert_eq!(
            Command::parse(&args(&["burst", "/notes"])).unwrap(),
            Command::Burst("/notes".into(), 5)
        );
        assert_eq!(
            Command::parse(&args(&["burst", "/notes", "12"])).unwrap(),
            Command::Burst("/notes".into(), 12)
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Command::parse(&args(&["get"])).is_err());
        assert!(Command::parse(&args(&["burst", "/notes", "0"])).is_err());
        assert!(Command::parse(&args(&["burst", "/notes", "1000"])).is_err());
        assert!(Command::parse(&args(&["burst", "/notes", "many"])).is_err());
        assert!(Command::parse(&args(&["frobnicate"])).is_err());
    }
}
