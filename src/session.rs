//! The IRC session: connect/register/join state machine, socket I/O and
//! line framing, worker spawning, and the keepalive watchdog.
//!
//! The session task owns the socket. Every other component sends outbound
//! lines through an mpsc channel, so a single writer serializes them; a
//! write error flips the state to Disconnected and the driver reconnects.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::config::IrcConfig;
use crate::ratelimit::TokenBucket;
use crate::wire;

/// A registration step that does not advance within this window forces a
/// reconnect.
pub const STATE_TIMEOUT: Duration = Duration::from_secs(120);
/// Total input silence after which the process exits so the supervisor
/// restarts it.
pub const KEEPALIVE_LIMIT: Duration = Duration::from_secs(600);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on concurrently dispatching line workers.
const MAX_WORKERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    ConnectedPass,
    ConnectedNick,
    ConnectedUser,
    UserWait,
    ConnectedJoin,
    ConnectedWait,
    Running,
    Disconnecting,
}

/// Session state visible to workers: the state cell, the last-inbound
/// timestamp for the watchdog, and the per-channel joined flags.
pub struct Shared {
    state: Mutex<(SessionState, Instant)>,
    last_inbound: Mutex<Instant>,
    joined: Mutex<HashMap<String, bool>>,
}

impl Shared {
    pub fn new(channels: &[String]) -> Self {
        Self {
            state: Mutex::new((SessionState::Disconnected, Instant::now())),
            last_inbound: Mutex::new(Instant::now()),
            joined: Mutex::new(channels.iter().map(|c| (c.clone(), false)).collect()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().0
    }

    pub fn set_state(&self, next: SessionState) {
        let mut cell = self.state.lock().unwrap();
        if cell.0 != next {
            info!("session state changes from {:?} to {:?}", cell.0, next);
        }
        *cell = (next, Instant::now());
    }

    pub fn state_age(&self) -> Duration {
        self.state.lock().unwrap().1.elapsed()
    }

    pub fn mark_inbound(&self) {
        *self.last_inbound.lock().unwrap() = Instant::now();
    }

    pub fn inbound_age(&self) -> Duration {
        self.last_inbound.lock().unwrap().elapsed()
    }

    pub fn reset_joined(&self) {
        for flag in self.joined.lock().unwrap().values_mut() {
            *flag = false;
        }
    }

    /// Mark a configured channel as joined. Returns true once every
    /// configured channel is.
    pub fn mark_joined(&self, channel: &str) -> bool {
        let mut joined = self.joined.lock().unwrap();
        if let Some(flag) = joined.get_mut(channel) {
            *flag = true;
        }
        joined.values().all(|flag| *flag)
    }
}

type Conn = (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf);

enum TickEvent {
    Line(String),
    Eof,
    ReadError(std::io::Error),
    Outbound(String),
    OutboundClosed,
    Tick,
}

pub struct Session {
    cfg: IrcConfig,
    shared: Arc<Shared>,
    bot: Arc<Bot>,
    rx: mpsc::Receiver<String>,
    bucket: TokenBucket,
    workers: Arc<Semaphore>,
}

impl Session {
    pub fn new(cfg: IrcConfig, shared: Arc<Shared>, bot: Arc<Bot>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            cfg,
            shared,
            bot,
            rx,
            // A short burst is fine; sustained output paces out at two
            // lines per second.
            bucket: TokenBucket::new(4.0, 2.0),
            workers: Arc::new(Semaphore::new(MAX_WORKERS)),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut conn: Option<Conn> = None;
        info!("IRC session task started");

        loop {
            self.drive(&mut conn).await;

            let state = self.shared.state();
            let registering = !matches!(
                state,
                SessionState::Disconnected | SessionState::Disconnecting | SessionState::Running
            );
            if registering && self.shared.state_age() > STATE_TIMEOUT {
                warn!("state {:?} did not advance within {:?}", state, STATE_TIMEOUT);
                self.shared.set_state(SessionState::Disconnecting);
                continue;
            }

            let event = match conn.as_mut() {
                Some((lines, _)) => {
                    tokio::select! {
                        read = lines.next_line() => match read {
                            Ok(Some(line)) => TickEvent::Line(line),
                            Ok(None) => TickEvent::Eof,
                            Err(e) => TickEvent::ReadError(e),
                        },
                        outbound = self.rx.recv() => match outbound {
                            Some(line) => TickEvent::Outbound(line),
                            None => TickEvent::OutboundClosed,
                        },
                        _ = tokio::time::sleep(POLL_INTERVAL) => TickEvent::Tick,
                    }
                }
                None => {
                    tokio::select! {
                        outbound = self.rx.recv() => match outbound {
                            Some(line) => {
                                debug!("dropping outbound line while disconnected: {:?}", line);
                                TickEvent::Tick
                            }
                            None => TickEvent::OutboundClosed,
                        },
                        _ = tokio::time::sleep(POLL_INTERVAL) => TickEvent::Tick,
                    }
                }
            };

            match event {
                TickEvent::Line(line) => {
                    let line = line.trim_end_matches('\r').trim().to_string();
                    if !line.is_empty() {
                        self.spawn_worker(line);
                    }
                }
                TickEvent::Eof => {
                    warn!("IRC server closed the connection");
                    conn = None;
                    self.shared.set_state(SessionState::Disconnected);
                }
                TickEvent::ReadError(e) => {
                    error!("IRC read error: {}", e);
                    conn = None;
                    self.shared.set_state(SessionState::Disconnected);
                }
                TickEvent::Outbound(line) => {
                    self.write_line(&mut conn, &line).await;
                }
                TickEvent::OutboundClosed => {
                    info!("outbound channel closed, session task ending");
                    return Ok(());
                }
                TickEvent::Tick => {}
            }
        }
    }

    /// Advance the connect/register/join machine by one step.
    async fn drive(&self, conn: &mut Option<Conn>) {
        match self.shared.state() {
            SessionState::Disconnected => {
                *conn = None;
                info!("connecting to [{}]:{}", self.cfg.host, self.cfg.port);
                match TcpStream::connect((self.cfg.host.as_str(), self.cfg.port)).await {
                    Ok(stream) => {
                        let (read, write) = stream.into_split();
                        *conn = Some((BufReader::new(read).lines(), write));
                        self.shared.set_state(SessionState::ConnectedPass);
                    }
                    Err(e) => {
                        warn!("failed to connect: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            SessionState::ConnectedPass => {
                let sent = if self.cfg.password.is_empty() {
                    true
                } else {
                    self.write_line(conn, &wire::pass(&self.cfg.password)).await
                };
                if sent {
                    self.shared.set_state(SessionState::ConnectedNick);
                }
            }
            SessionState::ConnectedNick => {
                if self.write_line(conn, &wire::nick(&self.cfg.nick)).await {
                    self.shared.set_state(SessionState::ConnectedUser);
                }
            }
            SessionState::ConnectedUser => {
                if self.write_line(conn, &wire::user(&self.cfg.nick)).await {
                    self.shared.set_state(SessionState::UserWait);
                }
            }
            SessionState::ConnectedJoin => {
                self.shared.reset_joined();
                let mut all_ok = true;
                for channel in &self.cfg.channels {
                    if !self.write_line(conn, &wire::join(channel)).await {
                        all_ok = false;
                        break;
                    }
                }
                if all_ok {
                    self.shared.set_state(SessionState::ConnectedWait);
                }
            }
            // Advanced by the 001 / JOIN handlers.
            SessionState::UserWait | SessionState::ConnectedWait | SessionState::Running => {}
            SessionState::Disconnecting => {
                *conn = None;
                self.shared.set_state(SessionState::Disconnected);
            }
        }
    }

    async fn write_line(&self, conn: &mut Option<Conn>, line: &str) -> bool {
        let Some((_, writer)) = conn.as_mut() else {
            debug!("not connected, dropping {:?}", line);
            return false;
        };

        self.bucket.throttle().await;
        debug!("-> {}", line);

        match writer.write_all(format!("{}\r\n", line).as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                error!("failed transmitting to IRC server: {}", e);
                *conn = None;
                self.shared.set_state(SessionState::Disconnected);
                false
            }
        }
    }

    /// Hand the line to a short-lived worker so a slow database query never
    /// stalls framing. The semaphore bounds how many dispatch at once; the
    /// permit is taken inside the task so the reader keeps draining output
    /// even when every worker is busy.
    fn spawn_worker(&self, line: String) {
        self.shared.mark_inbound();
        debug!("<- {}", line);

        let workers = self.workers.clone();
        let bot = self.bot.clone();

        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            if let Err(e) = bot.handle_line(&line).await {
                error!("error handling IRC line {:?}: {:#}", line, e);
                bot.report_failure(&line, &e).await;
            }
        });
    }
}

/// Exit the process after prolonged input silence; the supervisor restarts
/// the service with a clean slate.
pub fn spawn_keepalive(shared: Arc<Shared>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let age = shared.inbound_age();
            if age >= KEEPALIVE_LIMIT {
                error!("no IRC input for {:?}, exiting for restart", age);
                std::process::exit(1);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<String> {
        vec!["#a".to_string(), "#b".to_string()]
    }

    #[test]
    fn initial_state_is_disconnected() {
        let shared = Shared::new(&channels());
        assert_eq!(shared.state(), SessionState::Disconnected);
    }

    #[test]
    fn mark_joined_reports_completion_only_when_all_joined() {
        let shared = Shared::new(&channels());
        assert!(!shared.mark_joined("#a"));
        assert!(shared.mark_joined("#b"));
    }

    #[test]
    fn unconfigured_channel_does_not_count() {
        let shared = Shared::new(&channels());
        assert!(!shared.mark_joined("#other"));
        assert!(!shared.mark_joined("#a"));
        assert!(shared.mark_joined("#b"));
    }

    #[test]
    fn reset_joined_clears_flags() {
        let shared = Shared::new(&channels());
        shared.mark_joined("#a");
        shared.mark_joined("#b");
        shared.reset_joined();
        assert!(!shared.mark_joined("#a"));
    }

    #[test]
    fn state_age_resets_on_transition() {
        let shared = Shared::new(&channels());
        std::thread::sleep(Duration::from_millis(20));
        assert!(shared.state_age() >= Duration::from_millis(20));

        shared.set_state(SessionState::ConnectedPass);
        assert!(shared.state_age() < Duration::from_millis(20));
    }
}
