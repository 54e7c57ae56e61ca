use std::{collections::BTreeMap, time::Duration};

use anyhow::Result;
use farm_api::{Config, Fleet, Machine, MachineState};

use super::handle_signals;

fn log_summary(fleet: &Fleet) {
    let mut by_status: BTreeMap<MachineState, usize> = BTreeMap::new();
    let mut unhealthy = 0;
    for machine in fleet.machines() {
        *by_status.entry(machine.state().status).or_default() += 1;
        if !machine.is_healthy() {
            unhealthy += 1;
        }
    }

    let summary = by_status
        .iter()
        .map(|(status, count)| format!("{}={}", status, count))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(machines = fleet.len(), unhealthy, %summary, "fleet summary");
}

pub async fn main(cfg: &Config, summary_secs: u64) -> Result<()> {
    let fleet = cfg.build_fleet().await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(summary_secs.max(1)));
    let signals = handle_signals();
    tokio::pin!(signals);

    loop {
        tokio::select! {
            result = &mut signals => {
                result?;
                break;
            }
            _ = ticker.tick() => log_summary(&fleet),
        }
    }

    tracing::info!("triggering cleanup...");
    drop(fleet);
    tracing::info!("all clean, exiting!");
    Ok(())
}
