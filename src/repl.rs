use anyhow::Result;
use lens_analytics::{IntentResolver, MetricAggregator};
use lens_core::config::AppConfig;
use lens_core::error::LensError;
use lens_core::session::{Session, SessionManager};
use lens_core::store::TransactionStore;
use lens_core::types::{Intent, Role, TimeWindow};
use rustyline::error::ReadlineError;
use rustyline::{Config as RlConfig, DefaultEditor};
use std::sync::Arc;

const BANNER: &str = r#"
  ╔═══════════════════════════════════════════╗
  ║          corridor-lens v0.1.0             ║
  ║   Ask about corridors, failures, volume   ║
  ╚═══════════════════════════════════════════╝

  Type a question and press Enter, e.g.
    ¿Cuál es el corredor con mayor tasa de fallo?
    Muestra el volumen total de transacciones por mes
    ¿Cuántos usuarios Enterprise tienen transacciones fallidas?
    Analiza el comportamiento del corredor USD_MXN
  Commands: /help for the full list, /exit to quit.
"#;

const HELP: &str = "  /filter [corridor|all]  — Show or set the corridor context
  /window <7d|30d|all>   — Set the time window context
  /corridors             — List known corridors
  /intents               — List the questions the assistant understands
  /history [n]           — Show the last n messages (default 10)
  /new [name]            — Start a fresh session
  /sessions              — List sessions
  /help                  — Show this help
  /exit                  — Quit
  Ctrl-C while waiting cancels the pending question.";

fn build_sessions(config: &AppConfig, store: Arc<dyn TransactionStore>) -> (MetricAggregator, SessionManager) {
    let aggregator = MetricAggregator::new(store);
    let resolver = IntentResolver::from_config(aggregator.clone(), &config.classifier);
    let manager = SessionManager::new(&config.assistant, Arc::new(resolver));
    (aggregator, manager)
}

/// Answer a single question and print the reply.
pub async fn ask_once(
    config: AppConfig,
    store: Arc<dyn TransactionStore>,
    session_name: Option<String>,
    question: &str,
) -> Result<()> {
    let (_, manager) = build_sessions(&config, store);
    let session = manager.create_session(session_name.unwrap_or_else(|| "cli".into()))?;
    let reply = session.submit(question).await?;
    println!("{}", reply.content);
    Ok(())
}

/// Run the interactive REPL.
pub async fn run(
    config: AppConfig,
    store: Arc<dyn TransactionStore>,
    session_name: Option<String>,
) -> Result<()> {
    println!("{}", BANNER);
    println!("  Data: {}", config.transactions_path().display());
    println!();

    let (aggregator, manager) = build_sessions(&config, store);
    let mut session = manager.create_session(session_name.unwrap_or_else(|| "analyst".into()))?;

    // Set up rustyline.
    let rl_config = RlConfig::builder().auto_add_history(true).build();
    let history_path = AppConfig::data_dir().join("repl_history.txt");
    let mut rl = DefaultEditor::with_config(rl_config)?;
    let _ = rl.load_history(&history_path);

    loop {
        let prompt = format!(
            "\x1b[1;36m{}\x1b[0m \x1b[2m[{}]\x1b[0m \x1b[1;32m❯\x1b[0m ",
            session.name(),
            session.filter()?.describe()
        );

        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                // Handle slash commands.
                if input.starts_with('/') {
                    match handle_command(input, &mut session, &manager, &aggregator).await {
                        Ok(true) => continue,
                        Ok(false) => break, // /exit
                        Err(e) => {
                            eprintln!("\x1b[0;31mError: {}\x1b[0m", e);
                            continue;
                        }
                    }
                }

                let outcome = tokio::select! {
                    reply = session.submit(input) => reply,
                    // Dropping the submit future abandons the pending question.
                    _ = tokio::signal::ctrl_c() => {
                        println!("\n  Cancelled.");
                        continue;
                    }
                };

                match outcome {
                    Ok(reply) => {
                        println!("\x1b[1;33massistant\x1b[0m: {}", reply.content);
                        if let Some(trace) = &reply.trace {
                            println!(
                                "  \x1b[2m{} · {} · {} rows\x1b[0m",
                                trace.intent,
                                trace.filter.describe(),
                                trace.result.len()
                            );
                        }
                    }
                    Err(LensError::Discarded) => {}
                    Err(e) => eprintln!("\x1b[0;31mError: {}\x1b[0m", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    // Save history.
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = rl.save_history(&history_path);

    Ok(())
}

/// Handle a slash command. Returns `true` to continue the loop, `false` to exit.
async fn handle_command(
    input: &str,
    session: &mut Arc<Session>,
    manager: &SessionManager,
    aggregator: &MetricAggregator,
) -> Result<bool> {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd {
        "/exit" | "/quit" | "/q" => {
            println!("Goodbye!");
            return Ok(false);
        }
        "/filter" => {
            if arg.is_empty() {
                println!("  {}", session.filter()?.describe());
            } else {
                let corridor = if arg.eq_ignore_ascii_case("all") {
                    None
                } else {
                    Some(arg)
                };
                let filter = session.filter()?.with_corridor(corridor);
                session.set_filter(filter.clone())?;
                println!("  Context: {}", filter.describe());
            }
        }
        "/window" => match arg.parse::<TimeWindow>() {
            Ok(window) if !arg.is_empty() => {
                let filter = session.filter()?.with_window(window);
                session.set_filter(filter.clone())?;
                println!("  Context: {}", filter.describe());
            }
            Ok(_) => println!("Usage: /window <7d|30d|all>"),
            Err(e) => println!("  {}", e),
        },
        "/corridors" => {
            let corridors = aggregator.known_corridors().await?;
            if corridors.is_empty() {
                println!("  No corridors.");
            } else {
                println!("  {}", corridors.join(", "));
            }
        }
        "/intents" => {
            for intent in Intent::all() {
                println!("    • {} — {}", intent.id(), intent.description());
            }
        }
        "/history" => {
            let n = arg.parse::<usize>().unwrap_or(10);
            for msg in session.recent_messages(n)? {
                let who = match msg.role {
                    Role::User => "\x1b[1;36myou\x1b[0m",
                    Role::Assistant => "\x1b[1;33massistant\x1b[0m",
                };
                println!("  {} {}: {}", msg.timestamp.format("%H:%M"), who, msg.content);
            }
        }
        "/new" => {
            let name = if arg.is_empty() {
                format!("session-{}", manager.len() + 1)
            } else {
                arg.to_string()
            };
            *session = manager.create_session(name)?;
            println!("Created session: {} ({})", session.name(), &session.id()[..8]);
        }
        "/sessions" | "/ls" => {
            for info in manager.list_sessions()? {
                let marker = if info.id == session.id() { " ◀" } else { "" };
                println!(
                    "  {} {} ({} msgs, {:?}){marker}",
                    &info.id[..8],
                    info.name,
                    info.message_count,
                    info.state
                );
            }
        }
        "/help" | "/?" => println!("{}", HELP),
        _ => {
            println!(
                "Unknown command: {}. Type /help for available commands.",
                cmd
            );
        }
    }

    Ok(true)
}
