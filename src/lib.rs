pub mod admin;
pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod grading;
pub mod models;
pub mod storage;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Settings;
use error::AppResult;
use storage::QuizStorage;

pub async fn run() -> AppResult<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or(settings.data_dir);
    let storage = QuizStorage::new(&data_dir)?;

    cli::execute(&cli, &storage).await
}
