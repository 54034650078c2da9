use anyhow::Context;
use coach_core::bundle::InterventionBundle;
use coach_core::clock::SystemClock;
use std::path::Path;

use super::open_engine;
use crate::output::print_json;

pub fn run(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let bundle = InterventionBundle::load(file)
        .with_context(|| format!("failed to read bundle {}", file.display()))?;
    let (_, engine) = open_engine(root)?;
    let report = bundle
        .import(engine.store(), &SystemClock)
        .context("import failed")?;

    if json {
        return print_json(&serde_json::json!({
            "intervention": bundle.intervention.id,
            "report": report,
        }));
    }

    println!(
        "Imported '{}' ({})",
        bundle.intervention.name, bundle.intervention.id
    );
    println!("  participants:        {}", report.participants);
    println!("  statuses created:    {}", report.statuses_created);
    println!("  rules:               {}", report.rules);
    println!("  messages:            {}", report.messages);
    println!("  micro-dialog items:  {}", report.micro_dialog_items);
    println!("  variables:           {}", report.variables);
    Ok(())
}
