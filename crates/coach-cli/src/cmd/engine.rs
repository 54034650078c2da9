use anyhow::Context;
use coach_core::engine::InboundOutcome;
use coach_core::model::DialogOptionType;
use std::path::Path;

use super::open_engine;
use crate::output::print_json;

// ---------------------------------------------------------------------------
// tick / dispatch
// ---------------------------------------------------------------------------

pub fn tick(root: &Path, dispatch: bool, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let tick = engine.run_scheduling_tick().context("scheduling tick failed")?;
    let sent = if dispatch {
        Some(engine.run_dispatch_pass().context("dispatch pass failed")?)
    } else {
        None
    };

    if json {
        return print_json(&serde_json::json!({ "tick": tick, "dispatch": sent }));
    }

    println!(
        "participants: {}  daily: {}  periodic: {}  created: {}  timeouts: {}  answers: {}  finished: {}",
        tick.participants,
        tick.daily_passes,
        tick.periodic_passes,
        tick.messages_created,
        tick.timeouts,
        tick.answers,
        tick.monitoring_finished,
    );
    if tick.failures > 0 {
        println!("failures: {} (see log)", tick.failures);
    }
    if let Some(report) = sent {
        println!(
            "sent: {}  activations: {}  retried: {}  discarded: {}",
            report.sent, report.activations, report.retried, report.discarded
        );
    }
    Ok(())
}

pub fn dispatch(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let report = engine.run_dispatch_pass().context("dispatch pass failed")?;
    if json {
        return print_json(&report);
    }
    println!(
        "sent: {}  activations: {}  retried: {}  discarded: {}  failures: {}",
        report.sent, report.activations, report.retried, report.discarded, report.failures
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// recover
// ---------------------------------------------------------------------------

pub fn recover(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, engine) = open_engine(root)?;
    let reverted = engine.startup_recovery().context("recovery failed")?;
    if json {
        return print_json(&serde_json::json!({ "reverted": reverted }));
    }
    println!("Reverted {reverted} message(s) to PREPARED_FOR_SENDING.");
    Ok(())
}

// ---------------------------------------------------------------------------
// receive
// ---------------------------------------------------------------------------

pub fn receive(
    root: &Path,
    channel: &str,
    sender: &str,
    body: &str,
    client_id: Option<&str>,
    order: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let channel: DialogOptionType = channel.parse()?;
    let (_, engine) = open_engine(root)?;
    let outcome = engine
        .handle_received_message(channel, sender, body, client_id, order, engine.now())
        .context("failed to handle received message")?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        InboundOutcome::UnknownSender => println!("No participant uses {sender} on {channel}."),
        InboundOutcome::Duplicate => println!("Duplicate, ignored."),
        InboundOutcome::StoppedMonitoring { participant } => {
            println!("Monitoring stopped for {participant}.")
        }
        InboundOutcome::Answered {
            message, accepted, ..
        } => {
            if accepted {
                println!("Answer to {message} accepted.");
            } else {
                println!("Answer to {message} failed validation and needs review.");
            }
        }
        InboundOutcome::Unexpected {
            message, handled, ..
        } => {
            if handled {
                println!("Unexpected message {message} handled by rules.");
            } else {
                println!("Unexpected message {message} needs review.");
            }
        }
        InboundOutcome::Intention { message, .. } => println!("Intention recorded as {message}."),
    }
    Ok(())
}
