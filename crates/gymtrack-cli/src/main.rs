//! gymtrack - command-line shell for the exercise tracking service.
//!
//! Signs in, keeps the session between runs, and exposes the exercise
//! catalog and workout history. Session renewal happens transparently in
//! the core client.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gymtrack_core::auth::MemoryCredentialStore;
use gymtrack_core::{ApiClient, ApiError, Config, CredentialStore, SessionStatus};

const USAGE: &str = "\
Usage: gymtrack [--ephemeral] <command> [args]

Commands:
  login [email]           Sign in (prompts for password)
  logout                  Sign out and forget stored credentials
  whoami                  Show the signed-in user
  signup <name> <email>   Create an account (prompts for password)
  rename <name>           Change your display name
  avatar <file>           Upload a new profile picture
  groups                  List muscle groups
  exercises <group>       List exercises of a group
  exercise <id>           Show exercise details
  register <exercise-id>  Log a completed exercise
  history                 Show your workout history";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let ephemeral = match args.iter().position(|a| a == "--ephemeral") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };
    let Some(command) = args.first().cloned() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let mut config = Config::load()?;
    let store: Arc<dyn CredentialStore> = if ephemeral {
        Arc::new(MemoryCredentialStore::new())
    } else {
        config.credential_store()?
    };
    let client = ApiClient::from_config(&config, store).context("Failed to create API client")?;

    let restored = client.session().restore().await;
    info!(restored, command = %command, "gymtrack starting");

    match command.as_str() {
        "login" => login(&client, &mut config, rest.first().map(String::as_str)).await,
        "logout" => {
            client.session().sign_out().await?;
            println!("Signed out.");
            Ok(())
        }
        "whoami" => {
            match client.session().status() {
                SessionStatus::Active(user) => {
                    println!("{} <{}>", user.name, user.email);
                    if let Some(url) = client.avatar_url(&user) {
                        println!("avatar: {}", url);
                    }
                }
                SessionStatus::Inactive => println!("Not signed in."),
            }
            Ok(())
        }
        "signup" => {
            let [name, email] = rest else { bail!("usage: gymtrack signup <name> <email>") };
            let password = prompt_password("Password: ")?;
            report(client.create_user(name, email, &password).await, "Could not create the account.")?;
            println!("Account created. Sign in with `gymtrack login {}`.", email);
            Ok(())
        }
        other => {
            require_session(&client)?;
            watch_session(&client);
            run_authenticated(&client, other, rest).await
        }
    }
}

async fn run_authenticated(client: &ApiClient, command: &str, args: &[String]) -> Result<()> {
    match (command, args) {
        ("groups", []) => {
            for group in report(client.groups().await, "Could not load muscle groups.")? {
                println!("{}", group);
            }
        }
        ("exercises", [group]) => {
            let exercises = report(client.exercises_by_group(group).await, "Could not load exercises.")?;
            if exercises.is_empty() {
                println!("No exercises for {}.", group);
            }
            for exercise in exercises {
                println!("{:>4}  {:<30} {}", exercise.id, exercise.name, exercise.summary());
            }
        }
        ("exercise", [id]) => {
            let exercise = report(client.exercise(id).await, "Could not load exercise details.")?;
            println!("{} ({})", exercise.name, exercise.group);
            println!("{}", exercise.summary());
            println!("demo: {}", client.exercise_demo_url(&exercise)?);
        }
        ("register", [id]) => {
            report(client.register_history(id).await, "Could not register the exercise.")?;
            println!("Exercise logged to your history.");
        }
        ("history", []) => {
            let days = report(client.history().await, "Could not load history.")?;
            if days.iter().all(|d| d.is_empty()) {
                println!("No exercises logged yet.");
            }
            for day in days.iter().filter(|d| !d.is_empty()) {
                println!("{}", day.title);
                for entry in &day.data {
                    println!("  {}  {:<30} {}", entry.hour, entry.name, entry.group);
                }
            }
        }
        ("rename", [name]) => {
            let user = report(client.update_user(name, None, None).await, "Could not update your profile.")?;
            println!("Profile updated: {}", user.name);
        }
        ("avatar", [file]) => {
            let path = Path::new(file);
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", file))?;
            let (file_name, mime) = avatar_upload_name(client, path)?;
            let user = report(
                client.update_avatar(&file_name, mime, bytes).await,
                "Could not update the photo. Please try again later.",
            )?;
            if let Some(url) = client.avatar_url(&user) {
                println!("Photo updated: {}", url);
            }
        }
        _ => {
            eprintln!("{}", USAGE);
            bail!("unknown command or wrong arguments: {}", command);
        }
    }
    Ok(())
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<&str>) -> Result<()> {
    let email = match email.map(str::to_string).or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("E-mail: ")?,
    };
    let password = prompt_password("Password: ")?;

    let user = report(
        client.session().sign_in(&email, &password).await,
        "Could not sign in. Please try again later.",
    )?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }
    println!("Welcome, {}!", user.name);
    Ok(())
}

fn require_session(client: &ApiClient) -> Result<()> {
    if !client.session().is_active() {
        bail!("Not signed in. Run `gymtrack login` first.");
    }
    Ok(())
}

/// Tell the user when the session ends underneath a running command
fn watch_session(client: &ApiClient) {
    let mut rx = client.session().subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if !rx.borrow_and_update().is_active() {
                eprintln!("Your session has expired. Run `gymtrack login` to sign in again.");
                break;
            }
        }
    });
}

/// Turn an API result into one with a user-facing message
fn report<T>(result: Result<T, ApiError>, fallback: &str) -> Result<T> {
    result.map_err(|e| {
        tracing::debug!(error = ?e, "Command failed");
        anyhow::anyhow!(e.user_message(fallback))
    })
}

/// Lowercased `<user name>.<extension>` and the image mime type
fn avatar_upload_name(client: &ApiClient, path: &Path) -> Result<(String, &'static str)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => bail!("Unsupported image type: {}", path.display()),
    };
    let name = client
        .session()
        .user()
        .map(|u| u.name)
        .unwrap_or_else(|| "avatar".to_string());
    Ok((format!("{}.{}", name, extension).to_lowercase(), mime))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("{} is required", label.trim_end_matches(": "));
    }
    Ok(line)
}

fn prompt_password(label: &str) -> Result<String> {
    let password = rpassword::prompt_password(label).context("Failed to read password")?;
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}
