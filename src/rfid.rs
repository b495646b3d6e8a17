use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warning};
use regex::Regex;
use std::{
    fs::OpenOptions,
    io::{BufRead, BufReader, ErrorKind, Read},
    path::Path,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, mpsc, watch},
    time::{MissedTickBehavior, interval},
};

use crate::{access::Actuator, credential::CredentialTracker};

/// Opens the reader's serial device once. The reading half stays a plain file
/// for [`spawn_line_reader`]; the writing half drives the gate.
pub fn open_serial(device: &Path) -> Result<(std::fs::File, File)> {
    info!("Opening serial device {}", device.display());
    let reader = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .with_context(|| format!("Failed to open serial device {}", device.display()))?;
    let writer = reader
        .try_clone()
        .context("Failed to clone serial handle")?;
    Ok((reader, File::from_std(writer)))
}

/// Cleans a raw reader line into a token, if it is one.
pub fn parse_token(line: &str, token_re: &Regex) -> Option<String> {
    let token = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if token.is_empty() {
        return None;
    }
    if !token_re.is_match(token) {
        debug!("Ignoring malformed reader line {:?}", line);
        return None;
    }
    Some(token.to_string())
}

/// Forwards raw lines from the reader on its own OS thread.
///
/// A read on a quiet line can block indefinitely, so it never runs on the
/// runtime's blocking pool. Ends on read error or when nobody listens.
pub fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::Sender<String>,
    idle: Duration,
) -> Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("rfid-reader".into())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            loop {
                match reader.read_until(b'\n', &mut line) {
                    // Nothing buffered on the device right now.
                    Ok(0) => {
                        if tx.is_closed() {
                            break;
                        }
                        thread::sleep(idle);
                    }
                    Ok(_) if line.ends_with(b"\n") => {
                        let text = String::from_utf8_lossy(&line).into_owned();
                        line.clear();
                        if tx.blocking_send(text).is_err() {
                            break;
                        }
                    }
                    // Partial line, the rest is still on the wire.
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        error!("RFID read error: {}", e);
                        break;
                    }
                }
            }
            warning!("RFID reader stopped, running without credentials");
        })
        .context("Failed to spawn RFID reader thread")
}

/// Drains pending reader lines every `period` into the tracker.
pub async fn poll_credentials(
    mut rx: mpsc::Receiver<String>,
    tracker: Arc<CredentialTracker>,
    token_re: Regex,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting RFID polling loop (period: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        loop {
            match rx.try_recv() {
                Ok(line) => {
                    if let Some(token) = parse_token(&line, &token_re) {
                        info!("RFID: {}", token);
                        tracker.update(token, Instant::now());
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("RFID line feed closed");
                    return;
                }
            }
        }
    }

    info!("RFID task completed, shutting down");
}

/// Writes the grant byte to the gate controller.
pub struct SerialActuator<W> {
    port: Mutex<W>,
    grant_byte: u8,
}

impl<W: AsyncWrite + Unpin + Send> SerialActuator<W> {
    pub fn new(port: W, grant_byte: u8) -> Self {
        Self {
            port: Mutex::new(port),
            grant_byte,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Actuator for SerialActuator<W> {
    async fn grant(&self) -> Result<()> {
        let mut port = self.port.lock().await;
        port.write_all(&[self.grant_byte])
            .await
            .context("Failed to write grant byte")?;
        port.flush().await.context("Failed to flush serial port")?;
        debug!("Grant byte {:#04x} sent", self.grant_byte);
        Ok(())
    }
}

/// Used when no serial device is available.
pub struct NullActuator;

#[async_trait]
impl Actuator for NullActuator {
    async fn grant(&self) -> Result<()> {
        warning!("No gate controller attached, grant signal dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, os::unix::net::UnixStream};
    use tokio::{
        io::{AsyncReadExt, duplex},
        time::sleep,
    };

    fn token_re() -> Regex {
        Regex::new("^[0-9A-Za-z]+$").unwrap()
    }

    #[test]
    fn tokens_are_trimmed_and_validated() {
        let re = token_re();
        assert_eq!(parse_token("213213\r", &re).as_deref(), Some("213213"));
        assert_eq!(parse_token("  A1B2 \0", &re).as_deref(), Some("A1B2"));
        assert_eq!(parse_token("   ", &re), None);
        assert_eq!(parse_token("21-32", &re), None);
    }

    #[tokio::test]
    async fn reader_lines_update_the_tracker() {
        let (mut device, port) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tracker = Arc::new(CredentialTracker::new(Duration::from_secs(8)));

        spawn_line_reader(port, tx, Duration::from_millis(10)).unwrap();
        let poller = tokio::spawn(poll_credentials(
            rx,
            tracker.clone(),
            token_re(),
            Duration::from_millis(20),
            shutdown_rx,
        ));

        device.write_all(b"bad-line\n2132").unwrap();
        sleep(Duration::from_millis(30)).await;
        assert_eq!(tracker.current(Instant::now()), None);
        device.write_all(b"13\r\n").unwrap();

        let mut seen = None;
        for _ in 0..50 {
            sleep(Duration::from_millis(20)).await;
            seen = tracker.current(Instant::now());
            if seen.is_some() {
                break;
            }
        }
        assert_eq!(seen.as_deref(), Some("213213"));

        shutdown_tx.send(true).unwrap();
        poller.await.unwrap();
    }

    #[test]
    fn quiet_device_does_not_hold_up_runtime_shutdown() {
        // The peer stays open and silent, so the read never returns.
        let (_device, port) = UnixStream::pair().unwrap();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let tracker = Arc::new(CredentialTracker::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.block_on(async {
            let (tx, rx) = mpsc::channel(4);
            spawn_line_reader(port, tx, Duration::from_millis(10)).unwrap();
            tokio::spawn(poll_credentials(
                rx,
                tracker.clone(),
                token_re(),
                Duration::from_millis(20),
                shutdown_rx,
            ));
            sleep(Duration::from_millis(200)).await;
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(runtime);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
    }

    #[test]
    fn reader_thread_stops_when_nobody_listens() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = spawn_line_reader(&b""[..], tx, Duration::from_millis(5)).unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn actuator_writes_one_byte_per_grant() {
        let (port, mut gate) = duplex(16);
        let actuator = SerialActuator::new(port, b'y');

        actuator.grant().await.unwrap();
        actuator.grant().await.unwrap();

        let mut buf = [0u8; 2];
        gate.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"yy");
    }

    #[test]
    fn missing_device_is_an_error() {
        assert!(open_serial(Path::new("/nonexistent/ttyUSB9")).is_err());
    }
}
