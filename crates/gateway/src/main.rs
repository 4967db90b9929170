//! Component J: the thin host binary. Loads configuration, initializes
//! `tracing`, constructs the global dialog registry and a concrete
//! `LlmProvider` + tool executor pair, and drives one dialog end-to-end
//! for demonstration and integration testing (§2 AMBIENT). Grounded on
//! `sa-gateway::main.rs`'s tracing-init + config-load + state-assembly
//! sequence, narrowed to dialog-core's own seams — this binary never
//! touches an HTTP/WebSocket surface, since that front-end is out of
//! scope (§1).

mod cli;
mod config;
mod directory;
mod dotenv;
mod provider_adapter;
mod tool_adapter;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sa_dialog_core::{
    BlockedReason, CancelRegistry, Dialog, DialogCoreConfig, DialogEvent, DialogId, DialogRegistry, Driver, DriveOutcome,
    DrivenNode, EventBus, Persistence, Pulled,
};
use sa_domain::config::ConfigSeverity;
use sa_providers::registry::ProviderRegistry;

use cli::{Cli, Command, ConfigCommand};
use config::GatewayConfig;
use directory::ConfigAgentDirectory;
use tool_adapter::GatewayToolExecutor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let (_dotenv_vars, dotenv_errors) = dotenv::load(&cwd);

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Doctor) {
        Command::Run { message, root_id, agent, task_doc } => {
            init_tracing();
            for err in &dotenv_errors {
                tracing::warn!(file = %err.file, line = err.line_number, reason = %err.reason, "dotenv: skipping malformed line");
            }
            let (config, _config_path) = cli::load_config()?;
            run_turn(&config, &message, root_id.as_deref(), &agent, &task_doc).await
        }
        Command::Doctor => {
            let (config, config_path) = cli::load_config()?;
            let passed = run_doctor(&config, &config_path);
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Command::Version => {
            println!("serialagent-dialog {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing, matching `sa-gateway`'s own
/// span/event conventions (§2 AMBIENT logging).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug,sa_dialog_core=debug")))
        .json()
        .init();
}

/// Diagnostic checks against the current configuration: runs
/// `GatewayConfig::validate()` plus a `DialogCoreConfig::default().validate()`
/// pass, printing every issue found (never aborting at the first one).
fn run_doctor(config: &GatewayConfig, config_path: &str) -> bool {
    let mut ok = true;

    let issues = config.validate();
    let errors = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => println!("[ERROR] {issue}"),
            ConfigSeverity::Warning => println!("[WARN] {issue}"),
        }
    }
    println!("{config_path}: {errors} error(s), {} warning(s)", issues.len() - errors);
    if errors > 0 {
        ok = false;
    }

    let dc_config = DialogCoreConfig::default();
    let dc_issues = dc_config.validate();
    if DialogCoreConfig::has_errors(&dc_issues) {
        ok = false;
    }
    for issue in &dc_issues {
        println!("[dialog-core] {issue}");
    }

    if config.llm.providers.is_empty() {
        println!("[WARN] no LLM providers configured — `run` will have nothing to drive with");
    }

    ok
}

/// Drive one user turn against a root dialog, printing every event the
/// bus publishes as it's published (§2 control flow summary).
async fn run_turn(
    config: &GatewayConfig,
    message: &str,
    root_id: Option<&str>,
    agent: &str,
    task_doc: &str,
) -> anyhow::Result<()> {
    let dc_config = DialogCoreConfig::default();
    let persistence = Persistence::new(dc_config.store_root.clone());
    let registry = DialogRegistry::new();
    let bus = EventBus::new();
    let cancel = CancelRegistry::new();

    let providers = Arc::new(ProviderRegistry::from_config(&config.llm)?);
    let directory = ConfigAgentDirectory::new(config, providers, dc_config.diligence_push_max);
    let tools = GatewayToolExecutor::new(&config.tools);

    let root = match root_id {
        Some(self_id) => {
            let revived = persistence.revive_root(self_id)?;
            registry.register(revived.root.clone());
            tracing::info!(
                self_id,
                rounds = revived.total_rounds,
                status = ?revived.completion_status,
                children = revived.subdialogs.len(),
                "revived root dialog"
            );
            revived.root
        }
        None => {
            let root = sa_dialog_core::RootDialog::create(&persistence, task_doc, agent, dc_config.diligence_push_max);
            persistence.persist_new_root(&root)?;
            registry.register(root.clone());
            root
        }
    };

    let root_dialog_id = DialogId { root_id: root.base().id.root_id.clone(), self_id: root.base().id.self_id.clone() };
    let mut sub = bus.subscribe(&root_dialog_id);
    let printer = tokio::spawn(async move {
        loop {
            match sub.pull(Duration::from_secs(2)).await {
                Pulled::Event(envelope) => print_event(&envelope),
                Pulled::Timeout => continue,
                Pulled::EndOfStream => break,
            }
        }
    });

    let driver = Driver::new(&bus, &directory, &tools, &cancel, &persistence, dc_config.max_context_rounds);
    let mut outcome = driver.drive_turn(&root, message).await?;

    // §4.G step 4's "hand off driving to that child": the root only
    // *registers* a pending Type-B/Type-C child when it blocks on
    // `waiting_for_subdialogs`; something has to actually drive each one to
    // completion and fold its summary back before the root can resume.
    // Bounded the same way the same-step tool/FBR loop is, so a child that
    // keeps re-blocking on its own subdialogs can't spin this forever.
    const MAX_DELEGATION_ROUNDS: usize = 25;
    let mut rounds = 0;
    while rounds < MAX_DELEGATION_ROUNDS {
        let has_subdialog_work = matches!(
            outcome,
            DriveOutcome::Blocked(BlockedReason::WaitingForSubdialogs | BlockedReason::NeedsHumanInputAndSubdialogs)
        );
        if !has_subdialog_work {
            break;
        }
        driver.drive_pending_children(&root).await?;
        if matches!(outcome, DriveOutcome::Blocked(BlockedReason::NeedsHumanInputAndSubdialogs)) {
            // still needs a human answer too; the root can't resume on its own.
            break;
        }
        outcome = driver.drive_node(root.clone(), DrivenNode::Root(root.clone()), None).await?;
        rounds += 1;
    }

    println!("\n--- outcome: {outcome:?} ---");
    println!("root selfId: {}", root.base().id.self_id);
    if matches!(outcome, sa_dialog_core::DriveOutcome::Blocked(BlockedReason::NeedsHumanInput | BlockedReason::NeedsHumanInputAndSubdialogs)) {
        for call_id in root.base().open_question_ids() {
            println!("open question: {call_id}");
        }
    }

    drop(driver);
    printer.abort();
    Ok(())
}

fn print_event(envelope: &sa_dialog_core::Envelope) {
    match &envelope.event {
        DialogEvent::MarkdownChunk { text } | DialogEvent::SayingChunk { text } => print!("{text}"),
        DialogEvent::CallingHeadlineChunk { text, .. } | DialogEvent::CallingBodyChunk { text, .. } => print!("{text}"),
        DialogEvent::DlgRunState { state } => println!("\n[state -> {state}]"),
        DialogEvent::NewQ4hAsked { question, .. } => println!("\n[asking human: {question}]"),
        DialogEvent::FuncResult { tool_name, result, is_error, .. } => {
            println!("\n[{tool_name} {}]: {result}", if *is_error { "error" } else { "ok" })
        }
        DialogEvent::StreamError { reason } => println!("\n[stream error: {reason}]"),
        DialogEvent::DiligenceBudget { remaining_count } => println!("\n[diligence budget remaining: {remaining_count}]"),
        DialogEvent::SubdialogCreated { target_agent_id, call_type, .. } => {
            println!("\n[subdialog created for {target_agent_id} ({call_type:?})]")
        }
        DialogEvent::SubdialogDone { summary, .. } => println!("\n[subdialog done: {summary}]"),
        _ => {}
    }
}
