//! Drive an investigation from the terminal.
//!
//! Each line read from stdin is one turn. The engine's directives are
//! printed to stdout as JSON; logs go to stderr. Reads the API key from the
//! `OPENROUTER_KEY` environment variable unless `--offline` is given.
//!
//! # Examples
//!
//! ```sh
//! # Start a new case, persisted under .faultline/
//! faultline --case checkout-outage
//!
//! # Rule-based only, no reasoning service
//! faultline --case checkout-outage --offline
//!
//! # Continue an existing investigation
//! faultline --resume inv-18c2f3a1b-1
//!
//! # List stored investigations
//! faultline --list --store-dir /var/lib/faultline
//! ```
//!
//! Slash commands inside a session:
//!
//! ```text
//! /evidence E3 pool at 100% since 14:02     answer a request
//! /evidence saw OOM kills on worker-2       unsolicited evidence
//! /blocked E4 no access to the CDN console
//! /consent yes
//! /phase solution
//! /test H2 refuted rollback did not help
//! /fix rolled back release 412
//! /ack                                      confirm the anomaly frame
//! /status
//! /quit
//! ```

use std::process;
use std::sync::Arc;

use clap::Parser;
use faultline::api::OpenRouterReasoner;
use faultline::investigation::{Engine, EngineConfig, InvestigationService, TurnInput};
use faultline::model::{EvidenceSubmission, Phase, TestOutcome};
use faultline::store::FileStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Drive a structured incident investigation from the terminal.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "faultline")]
struct Cli {
    // ── Session ────────────────────────────────────────────────
    /// Case (conversation) identifier for a new investigation
    #[arg(long, default_value = "default")]
    case: String,

    /// Continue the investigation with this id instead of opening a case
    #[arg(long)]
    resume: Option<String>,

    /// List stored investigations and exit
    #[arg(long)]
    list: bool,

    /// Directory holding one subdirectory per investigation
    #[arg(long, default_value = ".faultline")]
    store_dir: String,

    // ── Reasoning service ──────────────────────────────────────
    /// Model used for framing, hypotheses and summaries
    #[arg(long)]
    model: Option<String>,

    /// Never call the reasoning service; use the rule-based paths only
    #[arg(long)]
    offline: bool,

    // ── Output ─────────────────────────────────────────────────
    /// Log engine events at debug level
    #[arg(long)]
    verbose: bool,
}

// ── Commands ───────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum Command {
    Turn(TurnInput),
    Status,
    Quit,
}

fn is_request_id(token: &str) -> bool {
    token
        .strip_prefix('E')
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn parse_phase(name: &str) -> Result<Phase, String> {
    let key = name.trim().to_lowercase().replace(['-', ' '], "_");
    serde_json::from_value(serde_json::Value::String(key))
        .map_err(|_| format!("unknown phase '{name}'"))
}

fn parse_outcome(word: &str) -> Result<TestOutcome, String> {
    match word.to_lowercase().as_str() {
        "supported" | "supports" | "pass" => Ok(TestOutcome::Supported),
        "refuted" | "refutes" | "fail" => Ok(TestOutcome::Refuted),
        "inconclusive" | "unclear" => Ok(TestOutcome::Inconclusive),
        other => Err(format!("unknown test outcome '{other}'")),
    }
}

/// Parse one input line. Plain text is a message turn.
fn parse_line(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Turn(TurnInput::message(line)));
    };
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();

    match name {
        "status" => Ok(Command::Status),
        "quit" | "exit" => Ok(Command::Quit),
        "ack" => Ok(Command::Turn(TurnInput::default().acknowledging())),
        "regression" => Ok(Command::Turn(
            TurnInput::message(args).with_regression(),
        )),
        "evidence" => {
            if args.is_empty() {
                return Err("usage: /evidence [E<n>] <content>".into());
            }
            let submission = match args.split_once(' ') {
                Some((id, content)) if is_request_id(id) => {
                    EvidenceSubmission::answering(id, content.trim())
                }
                _ => EvidenceSubmission::unsolicited(args),
            };
            Ok(Command::Turn(TurnInput::default().with_evidence(submission)))
        }
        "blocked" => match args.split_once(' ') {
            Some((id, reason)) if is_request_id(id) => {
                Ok(Command::Turn(TurnInput::default().blocking(id, reason.trim())))
            }
            _ if is_request_id(args) => {
                Ok(Command::Turn(TurnInput::default().blocking(args, "unavailable")))
            }
            _ => Err("usage: /blocked E<n> [reason]".into()),
        },
        "consent" => match args.to_lowercase().as_str() {
            "yes" | "y" => Ok(Command::Turn(TurnInput::default().with_consent(true))),
            "no" | "n" => Ok(Command::Turn(TurnInput::default().with_consent(false))),
            _ => Err("usage: /consent yes|no".into()),
        },
        "phase" => Ok(Command::Turn(
            TurnInput::default().requesting(parse_phase(args)?),
        )),
        "test" => {
            let mut parts = args.splitn(3, ' ');
            let (Some(id), Some(outcome)) = (parts.next(), parts.next()) else {
                return Err("usage: /test H<n> supported|refuted|inconclusive [description]".into());
            };
            let description = parts.next().unwrap_or("").trim();
            Ok(Command::Turn(TurnInput::default().with_test(
                id,
                parse_outcome(outcome)?,
                description,
            )))
        }
        "fix" => {
            if args.is_empty() {
                return Err("usage: /fix <description>".into());
            }
            Ok(Command::Turn(TurnInput::default().with_fix(args)))
        }
        "reopen" if !args.is_empty() => Ok(Command::Turn(TurnInput::default().reopening(args))),
        other => Err(format!("unknown command '/{other}'")),
    }
}

// ── Setup ──────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(level)
        .init();
}

fn build_engine(cli: &Cli) -> Result<Engine, String> {
    let mut config = if cli.offline {
        EngineConfig::offline()
    } else {
        EngineConfig::default()
    };
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if cli.offline {
        return Ok(Engine::offline(config));
    }

    let reasoner = OpenRouterReasoner::from_env(config.reasoning.config.model.clone())
        .map_err(|e| format!("{e} (use --offline to run without the reasoning service)"))?
        .with_retry(config.reasoning.config.retry.clone());
    Ok(Engine::new(config, Arc::new(reasoner)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("failed to serialize output: {e}"))?;
    println!("{json}");
    Ok(())
}

// ── Session loop ───────────────────────────────────────────────────

async fn run(cli: &Cli) -> Result<(), String> {
    let store = FileStore::new(&cli.store_dir).map_err(|e| e.to_string())?;

    if cli.list {
        let service = InvestigationService::new(Engine::offline(EngineConfig::offline()), store);
        for m in service.list().map_err(|e| e.to_string())? {
            println!(
                "{}\t{}\t{:?}\t{}\t{:?}\tturn {}\t{}",
                m.id,
                m.case_id,
                m.mode,
                m.phase,
                m.status,
                m.turn,
                m.updated_at.to_rfc3339()
            );
        }
        return Ok(());
    }

    let service = InvestigationService::new(build_engine(cli)?, store);
    if let Err(e) = service.prune() {
        warn!("pruning expired tiers failed: {e}");
    }

    let mut id = match &cli.resume {
        Some(id) => service.load(id).map_err(|e| e.to_string())?.id,
        None => service.open_case(&cli.case).map_err(|e| e.to_string())?.id,
    };
    info!(id = %id, "ready; type a message, or /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| format!("failed to read stdin: {e}"))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let input = match parse_line(&line) {
            Ok(Command::Quit) => break,
            Ok(Command::Status) => {
                print_json(&service.progress(&id).map_err(|e| e.to_string())?)?;
                continue;
            }
            Ok(Command::Turn(input)) => input,
            Err(e) => {
                eprintln!("  {e}");
                continue;
            }
        };

        match service.submit(&id, &input).await {
            Ok(outcome) => {
                if outcome.state.id != id {
                    info!(from = %id, to = %outcome.state.id, "now leading a new investigation");
                    id = outcome.state.id.clone();
                }
                print_json(&outcome.directives)?;
                if outcome.state.is_closed() {
                    info!(id = %id, "investigation closed");
                    break;
                }
            }
            Err(e) if e.requires_recovery() => return Err(e.to_string()),
            Err(e) => eprintln!("  turn rejected: {e}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(line: &str) -> TurnInput {
        match parse_line(line).unwrap() {
            Command::Turn(input) => input,
            other => panic!("expected a turn, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(turn("checkout is slow").message, "checkout is slow");
    }

    #[test]
    fn evidence_with_and_without_request_id() {
        let input = turn("/evidence E3 pool at 100%");
        assert_eq!(input.evidence[0].request_id.as_deref(), Some("E3"));
        assert_eq!(input.evidence[0].content, "pool at 100%");

        let input = turn("/evidence Everything restarted at 14:00");
        assert_eq!(input.evidence[0].request_id, None);
        assert!(input.evidence[0].content.starts_with("Everything"));
    }

    #[test]
    fn blocked_consent_phase_and_test() {
        assert_eq!(turn("/blocked E4 no access").blocked[0].reason, "no access");
        assert_eq!(turn("/consent yes").consent, Some(true));
        assert_eq!(
            turn("/phase blast-radius").requested_phase,
            Some(Phase::BlastRadius)
        );
        let t = turn("/test H2 refuted rollback did not help");
        assert_eq!(t.test_results[0].hypothesis_id, "H2");
        assert_eq!(t.test_results[0].outcome, TestOutcome::Refuted);
        assert_eq!(t.test_results[0].description, "rollback did not help");
    }

    #[test]
    fn bad_commands_are_errors() {
        assert!(parse_line("/consent maybe").is_err());
        assert!(parse_line("/phase lunch").is_err());
        assert!(parse_line("/blocked later").is_err());
        assert!(parse_line("/frobnicate").is_err());
        assert_eq!(parse_line("/status").unwrap(), Command::Status);
    }
}
