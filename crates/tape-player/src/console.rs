//! Line-oriented console: commands in on stdin, JSON broadcasts out on stdout.
//!
//! This is the seam a UI plugs into.  Any program that can write
//! `link https://youtu.be/...` and read JSON lines can drive the player.

use tape_proto::protocol::{Broadcast, Command};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::CoreEvent;

/// Read commands from `input` until EOF, forwarding them to the core.
/// Unparseable lines are answered with a `Notice` and otherwise ignored.
/// EOF is treated as `quit`.
pub async fn read_commands<R>(
    input: R,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: mpsc::Sender<Broadcast>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("console: read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<Command>() {
            Ok(cmd) => {
                let quit = cmd == Command::Quit;
                if event_tx.send(CoreEvent::Command(cmd)).await.is_err() || quit {
                    return;
                }
            }
            Err(e) => {
                debug!("console: rejected {:?}: {}", line, e);
                let _ = broadcast_tx
                    .send(Broadcast::Notice {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }
    let _ = event_tx.send(CoreEvent::Command(Command::Quit)).await;
}

/// Write every broadcast to `output` as one JSON line, until `Bye`.
pub async fn write_broadcasts<W>(mut output: W, mut broadcast_rx: mpsc::Receiver<Broadcast>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = broadcast_rx.recv().await {
        let line = match msg.encode_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("console: could not encode {:?}: {}", msg, e);
                continue;
            }
        };
        if let Err(e) = output.write_all(line.as_bytes()).await {
            warn!("console: write error: {}", e);
            break;
        }
        let _ = output.flush().await;
        if msg == Broadcast::Bye {
            break;
        }
    }
}

/// Wire the console to the process's stdin and stdout.
pub fn start_stdio(
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(read_commands(
        BufReader::new(tokio::io::stdin()),
        event_tx,
        broadcast_tx,
    ));
    tokio::spawn(write_broadcasts(tokio::io::stdout(), broadcast_rx))
}
