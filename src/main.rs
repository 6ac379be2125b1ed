use clap::Parser;
use tracing_subscriber::EnvFilter;

use agora::commands;
use agora::config::{Cli, Command, Config};
use agora::db;
use agora::model::User;
use agora::state::AppState;
use agora::sweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::debug!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let state = AppState::new(pool, config)?;
    User::system(&state)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::AddRoom {
            token,
            name,
            description,
        } => commands::add_room(&state, &token, name.as_deref(), description.as_deref()),
        Command::DeleteRoom { token, yes } => commands::delete_room(&state, &token, yes),
        Command::AddModerators {
            session_ids,
            rooms,
            admin,
            visible,
            hidden,
        } => commands::add_moderators(&state, &session_ids, &rooms, admin, visible, hidden),
        Command::DeleteModerators { session_ids, rooms } => {
            commands::delete_moderators(&state, &session_ids, &rooms)
        }
        Command::ListRooms => commands::list_rooms(&state),
        Command::ListGlobalMods => commands::list_global_mods(&state),
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    tokio::select! {
        _ = sweeper::run_sweeper_loop(state) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}
