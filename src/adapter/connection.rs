//! The per-adapter TCP client state machine.
//!
//! States: Disconnected → Connecting → Connected → Disconnected on error or
//! heartbeat timeout → Reconnecting (after `reconnect_interval`) →
//! Connecting, with Stopped reachable from anywhere via [`AdapterHandle::stop`].
//!
//! While connected, the loop multiplexes socket reads, the heartbeat timer,
//! and the shutdown signal. Silence on the line triggers a `* PING`; an
//! adapter that stays silent past `connection_timeout` is declared dead and
//! the connection recycles. `* PONG <ms>` responses advertise the adapter's
//! own heartbeat, which overrides the configured interval.

use crate::adapter::{AdapterEvent, ConnectionState, ObservationSink};
use crate::catalog::DeviceCatalog;
use crate::config::AdapterSettings;
use crate::error::AgentResult;
use crate::shdr::{AdapterCommand, DecodedLine, DecoderOptions, ShdrDecoder};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Why the connected line loop ended.
enum Disconnect {
    /// Peer closed or socket error; reconnect.
    Lost(String),
    /// Heartbeat window expired with no activity; reconnect.
    Timeout,
    /// Stop requested; do not reconnect.
    Stopped,
}

/// Handle to a running adapter connection task.
pub struct AdapterHandle {
    pub name: String,
    pub task: JoinHandle<AgentResult<()>>,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: broadcast::Sender<AdapterEvent>,
}

impl AdapterHandle {
    /// Current connection state; the receiver can also be awaited for
    /// transitions.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events_tx.subscribe()
    }

    /// Request a graceful stop and wait for the task to land in `Stopped`.
    /// The socket and timers are released; the buffer is untouched.
    pub async fn stop(self) -> AgentResult<()> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(adapter = %self.name, error = %join_err, "adapter task join failed");
                Ok(())
            }
        }
    }
}

/// One adapter's connection worker.
pub struct AdapterConnection {
    name: String,
    settings: AdapterSettings,
    catalog: Arc<dyn DeviceCatalog>,
    sink: Arc<dyn ObservationSink>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<AdapterEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AdapterConnection {
    /// Spawn the connection task. It runs until stopped, reconnecting
    /// indefinitely at `reconnect_interval` on any failure.
    pub fn spawn(
        name: impl Into<String>,
        settings: AdapterSettings,
        catalog: Arc<dyn DeviceCatalog>,
        sink: Arc<dyn ObservationSink>,
    ) -> AdapterHandle {
        let name = name.into();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = AdapterConnection {
            name: name.clone(),
            settings,
            catalog,
            sink,
            state_tx,
            events_tx: events_tx.clone(),
            shutdown_rx,
        };
        let task = tokio::spawn(connection.run());
        AdapterHandle {
            name,
            task,
            shutdown_tx,
            state_rx,
            events_tx,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    fn emit(&self, event: AdapterEvent) {
        let _ = self.events_tx.send(event);
    }

    fn stopping(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn run(mut self) -> AgentResult<()> {
        let address = format!("{}:{}", self.settings.host, self.settings.port);
        while !self.stopping() {
            self.set_state(ConnectionState::Connecting);
            match timeout(
                self.settings.connection_timeout,
                TcpStream::connect(address.as_str()),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    let peer = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| address.clone());
                    info!(adapter = %self.name, %peer, "adapter connected");
                    self.set_state(ConnectionState::Connected);
                    self.emit(AdapterEvent::Connected { peer });
                    if self.settings.available_on_connection {
                        if let Err(error) = self.sink.device_connected(&self.settings.device).await {
                            warn!(adapter = %self.name, %error, "availability injection failed");
                        }
                    }
                    match self.serve(stream).await {
                        Disconnect::Stopped => break,
                        Disconnect::Lost(reason) => {
                            info!(adapter = %self.name, %reason, "adapter disconnected");
                            self.emit(AdapterEvent::Disconnected { reason });
                        }
                        Disconnect::Timeout => {
                            warn!(adapter = %self.name, "adapter heartbeat timed out");
                            self.emit(AdapterEvent::Disconnected {
                                reason: "heartbeat timeout".into(),
                            });
                        }
                    }
                    self.set_state(ConnectionState::Disconnected);
                    if let Err(error) = self.sink.device_disconnected(&self.settings.device).await {
                        warn!(adapter = %self.name, %error, "unavailable injection failed");
                    }
                }
                Ok(Err(error)) => {
                    debug!(adapter = %self.name, %error, "connect failed");
                    self.emit(AdapterEvent::ConnectFailed {
                        error: error.to_string(),
                    });
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(_) => {
                    debug!(adapter = %self.name, "connect timed out");
                    self.emit(AdapterEvent::ConnectFailed {
                        error: "connect timeout".into(),
                    });
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            if self.stopping() {
                break;
            }
            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = sleep(self.settings.reconnect_interval) => {}
                _ = self.shutdown_rx.changed() => {}
            }
        }
        self.set_state(ConnectionState::Stopped);
        Ok(())
    }

    /// The connected line loop. Returns how the connection ended.
    async fn serve(&mut self, stream: TcpStream) -> Disconnect {
        let mut shutdown = self.shutdown_rx.clone();
        let (read_half, mut write_half) = stream.into_split();
        // next_line is cancellation safe, so losing a select race to a
        // timer never drops partially read bytes.
        let mut lines = BufReader::new(read_half).lines();
        let mut decoder = ShdrDecoder::new(
            self.catalog.clone(),
            self.settings.device.clone(),
            DecoderOptions {
                ignore_timestamps: self.settings.ignore_timestamps,
                relative_time: self.settings.relative_time,
                convert_units: self.settings.convert_units,
            },
        );

        let mut heartbeat = self.settings.heartbeat;
        let mut last_activity = Instant::now();
        let mut last_data = Instant::now();
        let mut last_ping = Instant::now();

        loop {
            let ping_deadline = last_ping + heartbeat;
            let dead_deadline = last_activity + self.settings.connection_timeout;
            tokio::select! {
                read = lines.next_line() => match read {
                    Ok(None) => return Disconnect::Lost("connection closed by adapter".into()),
                    Ok(Some(line)) => {
                        last_activity = Instant::now();
                        if let Some(disconnect) = self
                            .handle_line(&mut decoder, &mut write_half, &line, &mut heartbeat, &mut last_data)
                            .await
                        {
                            return disconnect;
                        }
                    }
                    Err(error) => return Disconnect::Lost(error.to_string()),
                },
                _ = tokio::time::sleep_until(dead_deadline) => {
                    return Disconnect::Timeout;
                }
                _ = tokio::time::sleep_until(ping_deadline) => {
                    let data_fresh = last_data.elapsed() < heartbeat;
                    if self.settings.ignore_heartbeat_on_change && data_fresh {
                        // Data lines already prove liveness; re-arm quietly.
                        last_ping = Instant::now();
                    } else {
                        if let Err(error) = write_half.write_all(b"* PING\n").await {
                            return Disconnect::Lost(error.to_string());
                        }
                        last_ping = Instant::now();
                        self.emit(AdapterEvent::PingSent);
                    }
                }
                _ = shutdown.changed() => {
                    return Disconnect::Stopped;
                }
            }
        }
    }

    async fn handle_line(
        &self,
        decoder: &mut ShdrDecoder,
        write_half: &mut OwnedWriteHalf,
        line: &str,
        heartbeat: &mut Duration,
        last_data: &mut Instant,
    ) -> Option<Disconnect> {
        match decoder.decode_line(line, Utc::now()) {
            DecodedLine::Observations(observations) => {
                *last_data = Instant::now();
                for input in observations {
                    if let Err(error) = self.sink.accept(input).await {
                        warn!(adapter = %self.name, %error, "observation rejected");
                    }
                }
            }
            DecodedLine::Ping => {
                let reply = format!("* PONG {}\n", heartbeat.as_millis());
                if let Err(error) = write_half.write_all(reply.as_bytes()).await {
                    return Some(Disconnect::Lost(error.to_string()));
                }
            }
            DecodedLine::Pong(advertised) => {
                if let Some(advertised) = advertised {
                    if advertised != *heartbeat && !advertised.is_zero() {
                        debug!(adapter = %self.name, ?advertised, "adapter advertised heartbeat");
                        *heartbeat = advertised;
                    }
                }
                self.emit(AdapterEvent::PongReceived {
                    heartbeat: advertised,
                });
            }
            DecodedLine::Command(command) => {
                match &command {
                    AdapterCommand::Device(device) => decoder.set_device_key(device.clone()),
                    AdapterCommand::ShdrVersion(version) => {
                        debug!(adapter = %self.name, %version, "adapter protocol version");
                    }
                    AdapterCommand::Other { .. } => {}
                }
                let (key, value) = command_parts(&command);
                self.emit(AdapterEvent::CommandReceived { key, value });
            }
            DecodedLine::Empty => {}
        }
        None
    }
}

fn command_parts(command: &AdapterCommand) -> (String, String) {
    match command {
        AdapterCommand::ShdrVersion(v) => ("shdrVersion".into(), v.clone()),
        AdapterCommand::Device(d) => ("device".into(), d.clone()),
        AdapterCommand::Other { key, value } => (key.clone(), value.clone()),
    }
}
