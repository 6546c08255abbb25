#![forbid(unsafe_code)]

//! `acp-bridge`: line-oriented chat front-end for an ACP agent.
//!
//! Launches the configured agent, performs the handshake, opens (or loads)
//! a session in the workspace root, and relays prompts typed on stdin.
//! Logs go to stderr; the conversation goes to stdout.

use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_bridge::acp::client::AcpClient;
use acp_bridge::acp::events::{
    ConnectionEvent, ConnectionEvents, SessionEvent, SessionEvents, TurnOutcome,
};
use acp_bridge::acp::message::RequestId;
use acp_bridge::acp::schema::{PermissionOption, SessionUpdate, ToolCallUpdate};
use acp_bridge::acp::spawner::spawn_agent;
use acp_bridge::config::{BridgeConfig, PermissionPolicy};
use acp_bridge::{AppError, Result};

type Input = Lines<BufReader<Stdin>>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "acp-bridge",
    about = "Chat with an ACP agent from the terminal",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Resume this session instead of creating a new one.
    #[arg(long)]
    session: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("acp-bridge starting");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = BridgeConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        config = config.with_workspace_root(ws)?;
    }
    info!(workspace = %config.workspace_root.display(), "configuration loaded");

    // The child must outlive the connection; dropping it kills the agent.
    let agent = spawn_agent(&config.spawn_config())?;
    let mut child = agent.child;
    let (client, mut connection) =
        AcpClient::connect(agent.stdout, agent.stdin, config.client_options());

    client.initialize().await?;

    let (session_id, mut events) = match args.session {
        Some(session_id) => {
            let events = client.subscribe(&session_id).await;
            client
                .load_session(&session_id, &config.workspace_root)
                .await?;
            (session_id, events)
        }
        None => {
            let session_id = client.create_session(&config.workspace_root).await?;
            let events = client.subscribe(&session_id).await;
            (session_id, events)
        }
    };
    eprintln!("session {session_id} ready; type a prompt, Ctrl-C to quit");

    let policy = config.permissions.policy;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let outcome = chat(
        &client,
        &session_id,
        &mut events,
        &mut connection,
        &mut input,
        policy,
    )
    .await;

    client.shutdown().await;
    if let Err(err) = child.start_kill() {
        debug!(%err, "agent already exited");
    }
    info!("acp-bridge shut down");
    outcome
}

/// Idle loop: read a prompt, run the turn, repeat.
async fn chat(
    client: &AcpClient,
    session_id: &str,
    events: &mut SessionEvents,
    connection: &mut ConnectionEvents,
    input: &mut Input,
    policy: PermissionPolicy,
) -> Result<()> {
    loop {
        print_flush("> ");
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
            event = connection.recv() => {
                return Err(connection_failure(event));
            }
            line = input.next_line() => line?,
        };

        let Some(line) = line else {
            return Ok(());
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        client.prompt(session_id, text).await?;
        run_turn(client, session_id, events, input, policy).await?;
    }
}

/// Render session events until the turn ends.
async fn run_turn(
    client: &AcpClient,
    session_id: &str,
    events: &mut SessionEvents,
    input: &mut Input,
    policy: PermissionPolicy,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[cancelling]");
                client.cancel(session_id).await;
                continue;
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            return Err(AppError::ConnectionClosed("session stream ended".into()));
        };

        match event {
            SessionEvent::Update { update, .. } => render_update(&update),
            SessionEvent::PermissionRequested {
                request_id,
                tool_call,
                options,
                ..
            } => {
                let prompt = PermissionPrompt {
                    session_id,
                    request_id: &request_id,
                    tool_call: &tool_call,
                    options: &options,
                };
                answer_permission(client, &prompt, input, policy).await?;
            }
            SessionEvent::TurnEnded { outcome, .. } => {
                match outcome {
                    TurnOutcome::Completed { stop_reason } => {
                        println!();
                        debug!(?stop_reason, "turn complete");
                    }
                    TurnOutcome::Failed(err) => {
                        println!();
                        eprintln!("[turn failed: {err}]");
                        if err.is_transport() {
                            return Err(err);
                        }
                    }
                }
                return Ok(());
            }
        }
    }
}

fn render_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::AgentMessageChunk { content } => {
            if let Some(text) = content.as_text() {
                print_flush(text);
            }
        }
        SessionUpdate::UserMessageChunk { content } => {
            if let Some(text) = content.as_text() {
                println!("> {text}");
            }
        }
        SessionUpdate::ToolCall(call) => {
            println!("\n[tool {}] {}", call.tool_call_id, call.title);
        }
        SessionUpdate::ToolCallUpdate(update) => {
            if let Some(status) = update.status {
                println!("[tool {}] {status:?}", update.tool_call_id);
            }
        }
        SessionUpdate::Plan { entries } => println!("\n[plan: {} step(s)]", entries.len()),
        other => debug!(?other, "update not rendered"),
    }
}

/// One permission request awaiting an answer.
struct PermissionPrompt<'a> {
    session_id: &'a str,
    request_id: &'a RequestId,
    tool_call: &'a ToolCallUpdate,
    options: &'a [PermissionOption],
}

async fn answer_permission(
    client: &AcpClient,
    prompt: &PermissionPrompt<'_>,
    input: &mut Input,
    policy: PermissionPolicy,
) -> Result<()> {
    let PermissionPrompt {
        session_id,
        request_id,
        tool_call,
        options,
    } = *prompt;
    let title = tool_call.title.as_deref().unwrap_or(&tool_call.tool_call_id);

    if let Some(kind) = policy.preferred_kind() {
        return match options.iter().find(|opt| opt.kind == kind) {
            Some(opt) => {
                info!(
                    tool = title,
                    option = opt.option_id.as_str(),
                    "permission answered by policy"
                );
                client.resolve_permission(request_id, &opt.option_id).await
            }
            None => {
                warn!(tool = title, ?kind, "no option matches the policy, dismissing");
                client.dismiss_permission(request_id).await
            }
        };
    }

    println!("\n[permission] {title}");
    for (index, opt) in options.iter().enumerate() {
        println!("  {}) {}", index + 1, opt.name);
    }
    print_flush("choose: ");

    let line = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            // Cancelling the turn also answers this request `cancelled`.
            eprintln!("\n[cancelling]");
            client.cancel(session_id).await;
            return Ok(());
        }
        line = input.next_line() => line?,
    };
    let choice = line
        .and_then(|line| line.trim().parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| options.get(index));

    match choice {
        Some(opt) => client.resolve_permission(request_id, &opt.option_id).await,
        None => {
            println!("[dismissed]");
            client.dismiss_permission(request_id).await
        }
    }
}

fn connection_failure(event: Option<ConnectionEvent>) -> AppError {
    match event {
        Some(ConnectionEvent::Error(msg)) => AppError::ConnectionClosed(msg),
        Some(ConnectionEvent::Lost) | None => {
            AppError::ConnectionClosed("agent closed the connection".into())
        }
    }
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{text}");
    let _ = stdout.flush();
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
