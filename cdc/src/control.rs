use std::path::Path;
use std::sync::Arc;

use common::err::ReError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

const MAX_RESPONSE_BYTES: usize = 40 * 1024;

/// One-shot commands accepted on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Stop,
    Reload(String),
    ShowMembers,
}

/// Exit codes the CLI side maps onto `std::process::exit`: 0
/// success, 1 usage (malformed command line), 2 runtime (the command ran
/// but failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Usage = 1,
    Runtime = 2,
}

pub fn parse_command(line: &str) -> Result<ControlCommand, String> {
    let mut parts = line.trim().splitn(2, ' ');
    match parts.next().unwrap_or("") {
        "STOP" => Ok(ControlCommand::Stop),
        "RELOAD" => {
            let target = parts.next().map(str::trim).unwrap_or("");
            if target.is_empty() {
                Err("usage: RELOAD <name|\"all\">".to_string())
            } else {
                Ok(ControlCommand::Reload(target.to_string()))
            }
        }
        "SHOW_MEMBERS" => Ok(ControlCommand::ShowMembers),
        other => Err(format!("unknown command '{other}'")),
    }
}

/// What the running process does in response to a parsed command. Kept
/// separate from socket plumbing so it can be unit tested without a real
/// socket.
#[async_trait::async_trait]
pub trait ControlHandler: Send + Sync {
    async fn stop(&self) -> Result<String, ReError>;
    async fn reload(&self, target: &str) -> Result<String, ReError>;
    async fn show_members(&self) -> Result<String, ReError>;
}

async fn dispatch(handler: &dyn ControlHandler, command: ControlCommand) -> (ExitCode, String) {
    let result = match command {
        ControlCommand::Stop => handler.stop().await,
        ControlCommand::Reload(target) => handler.reload(&target).await,
        ControlCommand::ShowMembers => handler.show_members().await,
    };
    match result {
        Ok(mut body) => {
            if body.len() > MAX_RESPONSE_BYTES {
                body.truncate(MAX_RESPONSE_BYTES);
            }
            (ExitCode::Success, body)
        }
        Err(e) => (ExitCode::Runtime, e.to_string()),
    }
}

/// Binds a Unix domain socket and serves one command per accepted
/// connection until `path`'s parent directory disappears or the listener
/// is dropped. Each response is plain UTF-8, terminated with a newline.
pub async fn serve(path: &Path, handler: Arc<dyn ControlHandler>) -> Result<(), ReError> {
    let _ = std::fs::remove_file(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let listener = UnixListener::bind(path).map_err(|e| ReError::ConnectionError(format!("bind control socket {}: {e}", path.display())))?;
    info!(path = %path.display(), "control channel listening");

    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "control channel accept failed");
                continue;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move { serve_one(stream, handler).await });
    }
}

async fn serve_one(stream: UnixStream, handler: Arc<dyn ControlHandler>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
        return;
    }
    let (exit_code, body) = match parse_command(&line) {
        Ok(command) => dispatch(handler.as_ref(), command).await,
        Err(usage) => (ExitCode::Usage, usage),
    };
    let response = format!("{}\nEXIT {}\n", body, exit_code as u8);
    let _ = write_half.write_all(response.as_bytes()).await;
}

/// Client-side dialer used by the CLI subcommands to talk to a running
/// process's control socket.
pub async fn send_command(path: &Path, line: &str) -> Result<String, ReError> {
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| ReError::ConnectionError(format!("connect to control socket {}: {e}", path.display())))?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await?;

    let mut reader = BufReader::new(read_half);
    let mut response = String::new();
    use tokio::io::AsyncReadExt;
    reader.read_to_string(&mut response).await?;
    Ok(response)
}
