//! Marks installment plans with missed terms as overdue.
//!
//! Meant to run once a day from cron. Plans that have caught up since the last
//! run are moved back to active.

use rust_installment_api::config::Config;
use rust_installment_api::db::Database;
use rust_installment_api::installments::InstallmentService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let db = Database::with_max_connections(&config.database_url, 2).await?;

    let today = chrono::Local::now().date_naive();
    tracing::info!("Connected to database. Refreshing overdue plans as of {}...", today);

    let result = InstallmentService::new(db.pool.clone())
        .refresh_overdue(today)
        .await;
    db.close().await;

    let (marked, restored) = result?;
    tracing::info!(
        "Overdue refresh complete. {} plan(s) marked overdue, {} restored to active.",
        marked,
        restored
    );
    Ok(())
}
