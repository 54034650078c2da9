use anyhow::Context;
use clap::Subcommand;
use std::path::Path;
use uuid::Uuid;

use super::open_engine;
use crate::output::{print_json, print_table, truncate};

#[derive(Subcommand)]
pub enum ParticipantSubcommand {
    /// Toggle monitoring of the given participants
    Monitor {
        /// Participant ids
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },

    /// Set a participant variable ($system* and $participant* are protected)
    SetVar {
        participant: Uuid,
        /// Variable name including the leading '$'
        name: String,
        value: String,
    },

    /// Settle a message the engine could not process automatically
    Solve {
        /// Dialog message id
        message: Uuid,
        /// Corrected answer
        corrected: String,
    },
}

pub fn run(root: &Path, subcmd: ParticipantSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ParticipantSubcommand::Monitor { ids } => monitor(root, &ids, json),
        ParticipantSubcommand::SetVar {
            participant,
            name,
            value,
        } => set_var(root, participant, &name, &value, json),
        ParticipantSubcommand::Solve { message, corrected } => solve(root, message, &corrected, json),
    }
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

pub fn status(root: &Path, participant: Uuid, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let status = engine.participant_status(participant)?;
    let messages = engine.participant_messages(participant)?;

    if json {
        return print_json(&serde_json::json!({ "status": status, "messages": messages }));
    }

    println!("Participant: {participant}");
    println!("  contact data:       {}", status.contact_data_available);
    println!("  screening done:     {}", status.screening_survey_performed);
    println!("  monitoring done:    {}", status.monitoring_performed);
    println!("  days participated:  {}", status.days_participated);
    if let Some(date) = &status.last_daily_pass_date_index {
        println!("  last daily pass:    {date}");
    }
    println!();

    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }
    let rows = messages
        .iter()
        .map(|m| {
            vec![
                m.order.to_string(),
                m.status.to_string(),
                truncate(&m.text, 40),
                m.answer.clone().unwrap_or_default(),
                m.id.to_string(),
            ]
        })
        .collect();
    print_table(&["ORDER", "STATUS", "TEXT", "ANSWER", "ID"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// send
// ---------------------------------------------------------------------------

pub fn send(
    root: &Path,
    participant: Uuid,
    text: &str,
    supervisor: bool,
    reply_window: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let message = engine
        .send_manual_message(participant, text, supervisor, reply_window)
        .context("failed to queue message")?;
    if json {
        return print_json(&message);
    }
    println!("Queued message {} (order {}): {}", message.id, message.order, message.text);
    Ok(())
}

// ---------------------------------------------------------------------------
// monitor / set-var / solve
// ---------------------------------------------------------------------------

fn monitor(root: &Path, ids: &[Uuid], json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let switched = engine.participants_switch_monitoring(ids)?;
    if json {
        let list: Vec<serde_json::Value> = switched
            .iter()
            .map(|p| serde_json::json!({ "id": p.id, "monitoring_active": p.monitoring_active }))
            .collect();
        return print_json(&list);
    }
    for p in &switched {
        let state = if p.monitoring_active { "on" } else { "off" };
        println!("{}  monitoring {state}", p.id);
    }
    Ok(())
}

fn set_var(root: &Path, participant: Uuid, name: &str, value: &str, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    engine.participant_adjust_variable(participant, name, value)?;
    if json {
        return print_json(&serde_json::json!({ "participant": participant, "name": name, "value": value }));
    }
    println!("{name} = {value}");
    Ok(())
}

fn solve(root: &Path, message: Uuid, corrected: &str, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let solved = engine.mark_problem_solved(message, corrected)?;
    if json {
        return print_json(&solved);
    }
    println!("Message {} is now {}.", solved.id, solved.status);
    Ok(())
}
