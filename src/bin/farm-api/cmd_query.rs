use std::time::Duration;

use anyhow::Result;
use farm_api::{Config, Dispatched, Filament, Fleet, Machine, MachineTechnology};

async fn settled_fleet(cfg: &Config, settle_secs: u64) -> Result<Fleet> {
    let fleet = cfg.build_fleet().await?;
    tokio::time::sleep(Duration::from_secs(settle_secs)).await;

    for (identifier, err) in fleet.update_all().await {
        tracing::warn!(identifier = %identifier, error = %err, "machine did not refresh");
    }
    Ok(fleet)
}

pub async fn status(cfg: &Config, settle_secs: u64) -> Result<()> {
    let fleet = settled_fleet(cfg, settle_secs).await?;
    println!("{}", serde_json::to_string_pretty(&fleet.snapshots())?);
    Ok(())
}

pub async fn find(
    cfg: &Config,
    technology: MachineTechnology,
    material: &str,
    color: &str,
    settle_secs: u64,
) -> Result<()> {
    let filament = Filament::new(material, color)?;
    let fleet = settled_fleet(cfg, settle_secs).await?;

    let candidate = fleet
        .find_available_machine(technology, &filament)
        .map(|(machine, location)| Dispatched {
            identifier: machine.identifier().to_string(),
            location,
        });
    if candidate.is_none() {
        tracing::info!(%technology, %filament, "no machine available");
    }

    println!("{}", serde_json::to_string_pretty(&candidate)?);
    Ok(())
}
