use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warning};
use serde::{Deserialize, Serialize};
use std::{
    io::{BufRead, BufReader, Read},
    thread,
    time::Duration,
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, Stdout},
    sync::{Mutex, mpsc, mpsc::error::TryRecvError},
    time::timeout,
};

use crate::access::Confirmer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnrollPolicy {
    /// Ask the operator on the console.
    #[default]
    Prompt,
    /// Enroll every unknown pairing.
    Always,
    /// Never enroll.
    Never,
}

/// Fixed answer, for unattended lanes.
pub struct PolicyConfirmer(pub bool);

#[async_trait]
impl Confirmer for PolicyConfirmer {
    async fn confirm(&self, plate: &str, credential: &str) -> bool {
        info!(
            "Enrollment of ('{}', '{}') {} by policy",
            plate,
            credential,
            if self.0 { "accepted" } else { "declined" }
        );
        self.0
    }
}

/// Reads `input` line by line on its own OS thread.
///
/// The channel closes at end of input or on a read error. The thread is not
/// owned by the runtime, so a pending read never delays process exit.
pub fn spawn_line_feed<R>(input: R, name: &str) -> Result<mpsc::Receiver<String>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            for line in BufReader::new(input).lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warning!("Console read failed: {}", e);
                        break;
                    }
                }
            }
        })
        .with_context(|| format!("Failed to spawn {name} thread"))?;
    Ok(rx)
}

/// Asks on a line-oriented console. No answer before the timeout means no.
///
/// Lines typed before a prompt is shown are discarded, so a late reply to a
/// prompt that already timed out never answers the next one.
pub struct ConsoleConfirmer<W> {
    io: Mutex<(mpsc::Receiver<String>, W)>,
    timeout: Duration,
}

impl ConsoleConfirmer<Stdout> {
    pub fn stdio(timeout: Duration) -> Result<Self> {
        let answers = spawn_line_feed(std::io::stdin(), "console-input")?;
        Ok(Self::new(answers, tokio::io::stdout(), timeout))
    }
}

impl<W> ConsoleConfirmer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(answers: mpsc::Receiver<String>, output: W, timeout: Duration) -> Self {
        Self {
            io: Mutex::new((answers, output)),
            timeout,
        }
    }
}

#[async_trait]
impl<W> Confirmer for ConsoleConfirmer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn confirm(&self, plate: &str, credential: &str) -> bool {
        let mut io = self.io.lock().await;
        let (answers, out) = &mut *io;

        let mut stale = 0;
        loop {
            match answers.try_recv() {
                Ok(_) => stale += 1,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warning!("Console closed, enrollment declined");
                    return false;
                }
            }
        }
        if stale > 0 {
            debug!("Discarded {} line(s) typed before the prompt", stale);
        }

        let prompt = format!("Save pairing plate '{plate}' / credential '{credential}'? [y/N] ");
        if let Err(e) = async {
            out.write_all(prompt.as_bytes()).await?;
            out.flush().await
        }
        .await
        {
            warning!("Could not show enrollment prompt: {}", e);
            return false;
        }

        match timeout(self.timeout, answers.recv()).await {
            Ok(Some(answer)) => {
                matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
            }
            Ok(None) => {
                warning!("Console closed, enrollment declined");
                false
            }
            Err(_) => {
                info!("No answer within {:?}, enrollment declined", self.timeout);
                false
            }
        }
    }
}
