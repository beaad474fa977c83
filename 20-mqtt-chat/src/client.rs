use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    select,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    cli::{Cli, OutputFormat},
    error::ChatError,
    session::{ChatSession, InboundMessage},
    transport::{BrokerClient, QoS, SubscribeOptions},
};

/// Session callbacks funneled into the terminal loop.
enum SessionEvent {
    Arrived(InboundMessage),
    Lost(ChatError),
}

pub async fn run(args: Cli) -> Result<()> {
    let params = args
        .connection_parameters()
        .context("invalid connection parameters")?;
    let session = ChatSession::mqtt(params);
    let stdin = BufReader::new(tokio::io::stdin());

    run_chat(&session, &args.topic, args.qos, args.format, stdin).await
}

/// Connects `session`, joins `topic`, and chats until `/quit`, end of input,
/// connection loss, or ctrl-c. Each line of `input` is sent as one message.
pub async fn run_chat<C, R>(
    session: &ChatSession<C>,
    topic: &str,
    qos: QoS,
    format: OutputFormat,
    input: R,
) -> Result<()>
where
    C: BrokerClient,
    R: AsyncBufRead + Unpin,
{
    let mut events = register_handlers(session);

    session
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", session.parameters().url()))?;
    write_stdout(&format!("*** connected as {}", session.identity())).await?;

    session
        .subscribe(topic, SubscribeOptions::with_qos(qos))
        .await
        .with_context(|| format!("failed to join topic '{topic}'"))?;
    write_stdout(&format!("*** joined {topic}")).await?;

    let mut lines = input.lines();
    let result = run_client_loop(session, topic, format, &mut events, &mut lines).await;
    shutdown_session(session).await;

    result
}

fn register_handlers<C: BrokerClient>(
    session: &ChatSession<C>,
) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    let arrived = tx.clone();
    session.on_message_arrived(move |message| {
        let _ = arrived.send(SessionEvent::Arrived(message));
    });
    session.on_connection_lost(move |err| {
        let _ = tx.send(SessionEvent::Lost(err));
    });
    session.on_message_delivered(|delivery| {
        debug!(packet_id = delivery.packet_id, "message delivered");
    });

    rx
}

// `next_line` keeps a partly read line buffered when another branch wins.
async fn run_client_loop<C, R>(
    session: &ChatSession<C>,
    topic: &str,
    format: OutputFormat,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    lines: &mut Lines<R>,
) -> Result<()>
where
    C: BrokerClient,
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            event = events.recv() => {
                if !handle_session_event(event, format).await? {
                    break;
                }
            }
            line = lines.next_line() => {
                if !handle_stdin_input(line, session, topic).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_session_event(event: Option<SessionEvent>, format: OutputFormat) -> Result<bool> {
    match event {
        Some(SessionEvent::Arrived(message)) => {
            render_message(&message, format).await?;
            Ok(true)
        }
        Some(SessionEvent::Lost(err)) => {
            write_stderr(&format!("!!! {err}")).await?;
            Ok(false)
        }
        None => Ok(false),
    }
}

async fn handle_stdin_input<C: BrokerClient>(
    line: io::Result<Option<String>>,
    session: &ChatSession<C>,
    topic: &str,
) -> Result<bool> {
    let Some(line) = line? else {
        return Ok(false);
    };

    let text = line.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    if let Err(err) = session.send(topic, text).await {
        write_stderr(&format!("!!! {err}")).await?;
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_session<C: BrokerClient>(session: &ChatSession<C>) {
    if let Err(error) = session.close().await {
        warn!(%error, "failed to close session cleanly");
    }
}

async fn render_message(message: &InboundMessage, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => write_stdout(&format!("<{}> {}", message.sender, message.payload)).await?,
        OutputFormat::Json => {
            let line = serde_json::to_string(message).context("failed to encode message")?;
            write_stdout(&line).await?;
        }
    }
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
