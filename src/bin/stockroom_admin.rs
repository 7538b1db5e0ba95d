use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde_json::json;
use stockroom_api::{
    auth::{AuthConfig, AuthService},
    config, db,
};

#[derive(Parser)]
#[command(name = "stockroom-admin", about = "Provision Stockroom API users", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an active user with an argon2-hashed password
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Replace a user's password
    SetPassword {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Deactivate a user and revoke all of their refresh tokens
    DeactivateUser {
        #[arg(long)]
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        db::run_migrations(&pool).await?;
    }
    let auth = AuthService::new(AuthConfig::from(&cfg), Arc::new(pool));

    match cli.command {
        Commands::CreateUser { username, password } => {
            let user = auth
                .create_user(&username, &password)
                .await
                .with_context(|| format!("failed to create user '{}'", username))?;
            if cli.json {
                print_json(&json!({ "id": user.id, "username": user.username }))?;
            } else {
                println!("Created user {} (id {})", user.username, user.id);
            }
        }
        Commands::SetPassword { username, password } => {
            auth.set_password(&username, &password)
                .await
                .with_context(|| format!("failed to set password for '{}'", username))?;
            if cli.json {
                print_json(&json!({ "username": username, "password_updated": true }))?;
            } else {
                println!("Password updated for {}", username);
            }
        }
        Commands::DeactivateUser { username } => {
            let revoked = auth
                .deactivate_user(&username)
                .await
                .with_context(|| format!("failed to deactivate '{}'", username))?;
            if cli.json {
                print_json(&json!({ "username": username, "revoked_tokens": revoked }))?;
            } else {
                println!(
                    "Deactivated {} and revoked {} refresh token(s)",
                    username, revoked
                );
            }
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
