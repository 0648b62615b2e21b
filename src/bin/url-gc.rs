use anyhow::Context;
use shortlink::{config, url_store::url_store_capsule};
use time::OffsetDateTime;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let removed = container
        .read(url_store_capsule)
        .delete_expired(OffsetDateTime::now_utc())
        .await
        .context("Failed to delete expired URLs")?;
    info!(removed, "Deleted expired URLs");
    Ok(())
}
