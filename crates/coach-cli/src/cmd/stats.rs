use anyhow::Context;
use std::path::Path;

use super::open_engine;
use crate::output::{print_json, print_table};

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let stats = engine.statistics().context("failed to compute statistics")?;
    if json {
        return print_json(&stats);
    }
    if stats.is_empty() {
        println!("No active interventions.");
        return Ok(());
    }
    let rows = stats
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.participants.to_string(),
                s.monitoring_active.to_string(),
                s.sent.to_string(),
                s.received.to_string(),
                s.answered.to_string(),
                s.unanswered.to_string(),
            ]
        })
        .collect();
    print_table(
        &[
            "INTERVENTION",
            "PARTICIPANTS",
            "MONITORED",
            "SENT",
            "RECEIVED",
            "ANSWERED",
            "UNANSWERED",
        ],
        rows,
    );
    Ok(())
}
