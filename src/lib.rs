pub mod core;
pub mod db;
pub(crate) mod repositories;
pub mod schemas;
pub mod services;
pub mod stores;
pub(crate) mod tasks;

pub use services::session::{SessionEngine, SessionError};

use crate::core::{config::Settings, state::AppState, telemetry};

pub async fn run_sweeper() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let state = AppState::new(settings, db_pool);

    tracing::info!(
        environment = %state.settings().runtime().environment.as_str(),
        interval_seconds = state.settings().sweeper().interval_seconds,
        "Exam session sweeper starting"
    );

    tasks::sweeper::run(state).await
}
