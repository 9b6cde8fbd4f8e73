use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::process::AgentProcess;
use crate::types::{AgentOptions, Message};
use crate::Result;

// ─── QueryStream ──────────────────────────────────────────────────────────

/// Async stream of [`Message`]s from one `claude` subprocess.
///
/// A background task owns the process and forwards messages over an mpsc
/// channel until the terminal `Result` message or EOF. Dropping the stream
/// closes the receiver and the task stops on its next send.
pub struct QueryStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl QueryStream {
    pub(crate) fn new(prompt: String, opts: AgentOptions) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            match AgentProcess::spawn(&prompt, &opts).await {
                Ok(process) => forward(process, tx).await,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        QueryStream { rx }
    }

    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<Message>>) -> Self {
        Self { rx }
    }

    #[cfg(test)]
    pub(crate) fn from_process(process: AgentProcess) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(forward(process, tx));
        Self { rx }
    }
}

/// Pump messages from `process` into `tx`. A process that exits without a
/// result message surfaces its exit status and stderr as the last item.
async fn forward(mut process: AgentProcess, tx: mpsc::Sender<Result<Message>>) {
    let mut got_result = false;
    loop {
        match process.next_message().await {
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
            Ok(None) => break,
            Ok(Some(msg)) => {
                let terminal = matches!(msg, Message::Result(_));
                got_result |= terminal;
                if tx.send(Ok(msg)).await.is_err() || terminal {
                    break;
                }
            }
        }
    }

    if !got_result {
        if let Some(exit_err) = process.wait_exit_error().await {
            let _ = tx.send(Err(exit_err)).await;
        }
    }
    process.kill().await;
}

impl Stream for QueryStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
