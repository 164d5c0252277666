use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use crate::config::AppConfig;
use server::broker::BrokerClient;
use server::broker::azure::AzureBrokerClient;
use server::coordinator::{Coordinator, EngineEvent, OperationOutcome, SCAN_WARNING, Selection};
use server::model::{ConnectionDescriptor, Message, ResourceId};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

mod config;
mod demo;
mod logger;
mod render;

#[derive(Debug, Parser)]
#[command(name = "sbexplorer", version, about)]
struct Cli {
    /// Configuration file (defaults to ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a seeded in-memory namespace instead of Azure
    #[arg(long, global = true)]
    demo: bool,

    /// Connection string to open in addition to the configured ones
    #[arg(long = "connection", global = true)]
    connections: Vec<String>,

    /// Treat --connection values as namespace hosts using managed identity
    #[arg(long, global = true)]
    managed_identity: bool,

    /// Namespace to operate on when several are connected
    #[arg(long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print topics, subscriptions and queues with their counts
    Tree {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        regex: bool,
    },
    /// Browse messages without consuming them
    Peek {
        /// Queue name or `topic/Subscriptions/name`
        path: String,
        #[arg(long)]
        dlq: bool,
        #[arg(long)]
        json: bool,
        /// Show one message in full
        #[arg(long)]
        sequence: Option<i64>,
    },
    /// Remove one message, located by sequence number in the peeked page
    Delete {
        path: String,
        #[arg(long)]
        sequence: i64,
        #[arg(long)]
        dlq: bool,
        #[arg(long, short)]
        yes: bool,
    },
    /// Move one message to the dead-letter sub-queue
    DeadLetter {
        path: String,
        #[arg(long)]
        sequence: i64,
        #[arg(long, short)]
        yes: bool,
    },
    /// Remove every message from the entity or its dead-letter sub-queue
    Purge {
        path: String,
        #[arg(long)]
        dlq: bool,
        #[arg(long, short)]
        yes: bool,
    },
    /// Re-send every dead-lettered message to its entity
    Transfer {
        path: String,
        #[arg(long, short)]
        yes: bool,
    },
    /// Re-send one dead-lettered message and remove the original
    Resubmit {
        path: String,
        #[arg(long)]
        sequence: i64,
        #[arg(long, short)]
        yes: bool,
    },
    /// Send a text message to a topic or queue
    Send { path: String, text: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load(cli.config.as_deref())?;
    logger::setup_logger(app_config.logging()).context("Failed to initialise logging")?;

    let (broker, descriptors) = build_broker(&cli, &app_config)?;
    let mut coordinator = Coordinator::new(broker, app_config.engine().clone());
    let events = coordinator.subscribe();

    let mut opened = 0;
    for descriptor in descriptors {
        match coordinator.connect(descriptor.clone()).await {
            Ok(_) => opened += 1,
            Err(e) => eprintln!("Could not open {}: {}", descriptor.redacted(), e.user_message()),
        }
    }
    if opened == 0 {
        bail!("No connection could be opened. Configure [[connections]] or pass --connection");
    }

    let result = run(&cli, &mut coordinator).await;
    for event in events.try_iter() {
        if let EngineEvent::Log(line) = event {
            log::debug!("{line}");
        }
    }
    result
}

fn build_broker(
    cli: &Cli,
    app_config: &AppConfig,
) -> anyhow::Result<(Arc<dyn BrokerClient>, Vec<ConnectionDescriptor>)> {
    if cli.demo {
        let (broker, connection) = demo::seeded_broker()?;
        return Ok((Arc::new(broker), vec![connection]));
    }

    let mut descriptors: Vec<ConnectionDescriptor> = app_config
        .connections()
        .iter()
        .map(|c| c.descriptor())
        .collect();
    descriptors.extend(
        cli.connections
            .iter()
            .map(|c| ConnectionDescriptor::new(c.clone(), cli.managed_identity)),
    );

    let broker = AzureBrokerClient::new(
        app_config.management().clone(),
        app_config.engine().management_page_size(),
    );
    Ok((Arc::new(broker), descriptors))
}

async fn run(cli: &Cli, coordinator: &mut Coordinator) -> anyhow::Result<()> {
    match &cli.command {
        Command::Tree { search, regex } => {
            if let Some(text) = search {
                coordinator.set_search(text.clone(), *regex);
            }
            render::print_tree(coordinator.filtered_tree());
            render::print_headers(&coordinator.tab_headers());
        }
        Command::Peek {
            path,
            dlq,
            json,
            sequence,
        } => {
            select(cli, coordinator, path).await?;
            let messages = current_page(coordinator, *dlq);
            match sequence {
                Some(sequence) => render::print_message(&find_message(&messages, *sequence)?),
                None if *json => println!("{}", serde_json::to_string_pretty(&messages)?),
                None => {
                    render::print_messages(&messages);
                    render::print_headers(&coordinator.tab_headers());
                }
            }
        }
        Command::Delete {
            path,
            sequence,
            dlq,
            yes,
        } => {
            select(cli, coordinator, path).await?;
            let message = find_message(&current_page(coordinator, *dlq), *sequence)?;
            if !confirm(*yes, SCAN_WARNING)? {
                return Ok(());
            }
            report(coordinator.delete_message(&message).await?);
        }
        Command::DeadLetter {
            path,
            sequence,
            yes,
        } => {
            select(cli, coordinator, path).await?;
            let message = find_message(&current_page(coordinator, false), *sequence)?;
            if !confirm(*yes, SCAN_WARNING)? {
                return Ok(());
            }
            report(coordinator.dead_letter_message(&message).await?);
        }
        Command::Purge { path, dlq, yes } => {
            select(cli, coordinator, path).await?;
            let side = if *dlq { "dead-letter sub-queue" } else { "queue" };
            if !confirm(*yes, &format!("Every message in the {side} of {path} will be removed."))? {
                return Ok(());
            }
            report(coordinator.purge(*dlq).await?);
        }
        Command::Transfer { path, yes } => {
            select(cli, coordinator, path).await?;
            if !confirm(*yes, &format!("Every dead-lettered message of {path} will be re-sent."))? {
                return Ok(());
            }
            report(coordinator.transfer_dlq().await?);
        }
        Command::Resubmit {
            path,
            sequence,
            yes,
        } => {
            select(cli, coordinator, path).await?;
            let message = find_message(&current_page(coordinator, true), *sequence)?;
            if !confirm(*yes, &resubmit_warning(&message))? {
                return Ok(());
            }
            report(coordinator.resubmit_dlq_message(&message).await?);
        }
        Command::Send { path, text } => {
            select(cli, coordinator, path).await?;
            report(coordinator.send_message(text).await?);
        }
    }
    Ok(())
}

fn resource(cli: &Cli, coordinator: &Coordinator) -> anyhow::Result<ResourceId> {
    let mut resources = coordinator.tree().resources();
    let found = match &cli.namespace {
        Some(name) => resources.find(|r| r.name.eq_ignore_ascii_case(name)),
        None => resources.next(),
    };
    found
        .map(|r| r.id)
        .ok_or_else(|| anyhow!("Namespace not connected: {}", cli.namespace.as_deref().unwrap_or("")))
}

async fn select(cli: &Cli, coordinator: &mut Coordinator, path: &str) -> anyhow::Result<Selection> {
    let resource = resource(cli, coordinator)?;
    let selection = coordinator
        .locate(resource, path)
        .ok_or_else(|| anyhow!("No topic, subscription or queue named '{path}'"))?;
    coordinator
        .select(selection)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    Ok(selection)
}

fn current_page(coordinator: &Coordinator, is_dlq: bool) -> Vec<Message> {
    coordinator
        .current_collection()
        .map(|c| c.messages(is_dlq).to_vec())
        .unwrap_or_default()
}

fn find_message(messages: &[Message], sequence: i64) -> anyhow::Result<Message> {
    messages
        .iter()
        .find(|m| m.sequence_number == sequence)
        .cloned()
        .ok_or_else(|| anyhow!("Sequence number {sequence} is not in the fetched page"))
}

fn resubmit_warning(message: &Message) -> String {
    format!(
        "Message {} (sequence {}) will be re-sent and then removed from the dead-letter sub-queue. If the removal fails, the message will exist twice.",
        message.message_id, message.sequence_number
    )
}

fn confirm(assume_yes: bool, warning: &str) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    println!("{warning}");
    print!("Continue? [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn report(outcome: OperationOutcome) {
    if outcome.affected == 0 {
        println!("{}: nothing was affected", outcome.kind);
    } else {
        println!("{}: {} message(s)", outcome.kind, outcome.affected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubmit_confirms_unless_yes_is_given() {
        let cli = Cli::try_parse_from(["sbexplorer", "resubmit", "orders", "--sequence", "6"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Resubmit {
                sequence: 6,
                yes: false,
                ..
            }
        ));

        let cli = Cli::try_parse_from(["sbexplorer", "resubmit", "orders", "--sequence", "6", "-y"])
            .unwrap();
        assert!(matches!(cli.command, Command::Resubmit { yes: true, .. }));
        assert!(confirm(true, "unused").unwrap());
    }
}
