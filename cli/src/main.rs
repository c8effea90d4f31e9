//! FinTech CLI - terminal front end for the advisor chat.
//!
//! ```text
//! main() -> Settings -> CompletionGateway -> ChatSession
//!                                              |
//!                          one-shot question or REPL loop
//! ```
//!
//! Plain input streams a reply fragment by fragment. Ctrl-C cancels a reply in
//! progress; at the prompt it exits.

mod display;

use std::{
    env,
    fs::{self, OpenOptions},
    io::{Write, stdout},
    path::PathBuf,
    pin::pin,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fintech_engine::{
    ChatSession, CompletionGateway, FintechConfig, GatewayConfig, ReplyOutcome, SUGGESTED_TOPICS,
    SendError, Settings, config_path, find_topic,
};

use display::{render_analysis, sanitize};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: keep stdout clean for replies.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // ~/.fintech/logs/fintech.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("fintech.log"));
    }

    candidates.push(PathBuf::from(".fintech").join("logs").join("fintech.log"));

    candidates
}

fn load_settings() -> Result<Settings> {
    let config = FintechConfig::load()
        .context("failed to load ~/.fintech/config.toml")?
        .unwrap_or_default();
    config.resolve().context("invalid configuration")
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Chat(&'a str),
    Ask(&'a str),
    Analyze(&'a str),
    Topics,
    Topic(&'a str),
    New,
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Chat(line));
        };

        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map(|(name, arg)| (name, arg.trim()))
            .unwrap_or((rest, ""));

        Some(match name {
            "ask" => Command::Ask(arg),
            "analyze" => Command::Analyze(arg),
            "topics" => Command::Topics,
            "topic" => Command::Topic(arg),
            "new" | "clear" => Command::New,
            "help" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(name),
        })
    }
}

const HELP: &str = "\
Type a question to get a streamed reply.
  /ask <question>      reply without streaming
  /analyze <question>  structured analysis
  /topics              list suggested topics
  /topic <n|title>     ask a suggested topic
  /new                 start a new conversation
  /quit                exit
Ctrl-C cancels a reply in progress.";

fn print_flush(text: &str) {
    let mut out = stdout().lock();
    let _ = out.write_all(sanitize(text).as_bytes());
    let _ = out.flush();
}

fn report_send_error(err: SendError) {
    match err {
        SendError::EmptyMessage => println!("Please enter a question."),
        SendError::Busy => println!("Still answering the previous question."),
        SendError::Cancelled => println!("[cancelled]"),
    }
}

/// Drives `call` to completion; Ctrl-C in the meantime cancels it through the session.
async fn cancellable<T>(session: &ChatSession, call: impl Future<Output = T>) -> T {
    let mut call = pin!(call);
    loop {
        tokio::select! {
            result = &mut call => return result,
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }
    }
}

async fn stream_reply(session: &ChatSession, text: &str) {
    match cancellable(session, session.send(text, print_flush)).await {
        Ok(reply) => match reply.outcome {
            ReplyOutcome::Cancelled => println!("\n[cancelled]"),
            ReplyOutcome::Completed | ReplyOutcome::Fallback(_) => println!(),
        },
        Err(err) => report_send_error(err),
    }
}

async fn ask_reply(session: &ChatSession, text: &str) {
    match cancellable(session, session.ask(text)).await {
        Ok(reply) if reply.outcome == ReplyOutcome::Cancelled => println!("[cancelled]"),
        Ok(reply) => println!("{}", sanitize(&reply.text)),
        Err(err) => report_send_error(err),
    }
}

async fn analyze_reply(session: &ChatSession, text: &str) {
    match cancellable(session, session.analyze(text)).await {
        Ok(analysis) => println!("{}", render_analysis(&analysis)),
        Err(err) => report_send_error(err),
    }
}

fn print_topics() {
    for (i, topic) in SUGGESTED_TOPICS.iter().enumerate() {
        println!("  {}. {}: {}", i + 1, topic.title, topic.query);
    }
}

async fn run_repl(session: &ChatSession) -> Result<()> {
    println!("FinTech advisor. Type /help for commands.");
    print_topics();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_flush("\n> ");
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        let Some(command) = Command::parse(&line) else {
            continue;
        };
        match command {
            Command::Chat(text) => stream_reply(session, text).await,
            Command::Ask(text) => ask_reply(session, text).await,
            Command::Analyze(text) => analyze_reply(session, text).await,
            Command::Topics => print_topics(),
            Command::Topic(selector) => match find_topic(selector) {
                Some(topic) => {
                    println!("> {}", topic.query);
                    stream_reply(session, topic.query).await;
                }
                None => println!("No such topic. Try /topics."),
            },
            Command::New => {
                session.new_conversation();
                println!("Started a new conversation.");
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Unknown(name) => println!("Unknown command /{name}. Try /help."),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = load_settings()?;
    let gateway = CompletionGateway::new(GatewayConfig::from_settings(&settings))
        .context("failed to initialize the completion gateway")?;
    let session = ChatSession::new(Arc::new(gateway), settings.send_policy);

    let question = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        run_repl(&session).await?;
    } else {
        stream_reply(&session, &question).await;
    }

    tracing::info!("Exiting");
    Ok(())
}
