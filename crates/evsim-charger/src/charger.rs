//! Charger state engine.
//!
//! One connector, one optional transaction, a meter integrator and a small
//! fleet of background tasks. Local operator input, remote server commands
//! and periodic timers all mutate the same state, so every field lives
//! behind a single read/write lock. The lock is never held across a
//! transport send: mutations snapshot what they need, release, then send.

use crate::config::Config;
use crate::error::ChargerError;
use crate::rpc::PendingCalls;
use crate::transport::{self, WsSink, WsStream};
use evsim_ocpp::{frame, ConnectorStatus, Frame};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

/// Delay before a handler-accepted remote command is acted on, giving the
/// server time to observe the CallResult before the next outbound Call.
pub(crate) const FOLLOW_UP_DELAY: Duration = Duration::from_secs(1);

/// Dialect-tagged transaction identifier. OCPP 1.6 ids are integers assigned
/// by the server; OCPP 2.0.1 ids are UUID strings assigned locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionId {
    Seq(i64),
    Uuid(String),
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionId::Seq(id) => write!(f, "{id}"),
            TransactionId::Uuid(id) => f.write_str(id),
        }
    }
}

/// Mutable charger runtime state, guarded by the engine's lock.
pub(crate) struct ChargerState {
    pub(crate) status: ConnectorStatus,
    pub(crate) connected: bool,
    pub(crate) is_charging: bool,
    pub(crate) transaction_id: Option<TransactionId>,
    pub(crate) id_tag: Option<String>,
    /// Cumulative energy in Wh, reset on transaction start.
    pub(crate) meter_value: i64,
    pub(crate) soc: f64,
    /// TransactionEvent sequence number (2.0.1 only).
    pub(crate) seq_no: u64,
    /// Charging current limit in A; 0 means suspended.
    pub(crate) current: f64,
    /// Charging power limit in W, coupled to `current` via P = I·V.
    pub(crate) power: f64,
    pub(crate) license_plate: Option<String>,
    pub(crate) heartbeat_interval_s: u32,
    pub(crate) pending_remote_start_id_tag: Option<String>,
    pub(crate) pending_remote_start_id: Option<i64>,
    pub(crate) recv_stop: Option<watch::Sender<()>>,
    pub(crate) heartbeat_stop: Option<watch::Sender<()>>,
    pub(crate) meter_stop: Option<watch::Sender<()>>,
}

/// Read-only view of the charger for the CLI `info` command.
#[derive(Debug, Clone)]
pub struct ChargerSnapshot {
    pub connected: bool,
    pub status: ConnectorStatus,
    pub charging: bool,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub soc: f64,
    pub meter_value: i64,
    pub license_plate: Option<String>,
    pub transaction_id: Option<TransactionId>,
}

struct ChargerInner {
    config: Config,
    tls: Option<native_tls::TlsConnector>,
    state: RwLock<ChargerState>,
    pending: PendingCalls,
    sink: Mutex<Option<WsSink>>,
}

/// An OCPP charge point simulator bound to one configured Central System.
///
/// Cheap to clone: clones share the same connector, so background tasks
/// hold their own handle to the state they mutate.
#[derive(Clone)]
pub struct Charger {
    inner: Arc<ChargerInner>,
}

impl Charger {
    /// Create a charger from a validated configuration. TLS material is
    /// assembled eagerly so broken certificates fail at startup.
    pub fn new(config: Config) -> Result<Self, ChargerError> {
        let tls = config.tls_connector()?;
        let initial_power = (config.max_current * config.voltage).min(config.max_power);
        let state = ChargerState {
            status: config.initial_status,
            connected: false,
            is_charging: false,
            transaction_id: None,
            id_tag: None,
            meter_value: 0,
            soc: config.initial_soc,
            seq_no: 0,
            current: config.max_current,
            power: initial_power,
            license_plate: None,
            heartbeat_interval_s: config.heartbeat_interval,
            pending_remote_start_id_tag: None,
            pending_remote_start_id: None,
            recv_stop: None,
            heartbeat_stop: None,
            meter_stop: None,
        };
        Ok(Self {
            inner: Arc::new(ChargerInner {
                config,
                tls,
                state: RwLock::new(state),
                pending: PendingCalls::new(),
                sink: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.inner.pending
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, ChargerState> {
        self.inner.state.read().expect("charger state lock poisoned")
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, ChargerState> {
        self.inner.state.write().expect("charger state lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_charging(&self) -> bool {
        self.state().is_charging
    }

    pub fn status(&self) -> ConnectorStatus {
        self.state().status
    }

    pub fn soc(&self) -> f64 {
        self.state().soc
    }

    pub fn current(&self) -> f64 {
        self.state().current
    }

    pub fn snapshot(&self) -> ChargerSnapshot {
        let st = self.state();
        ChargerSnapshot {
            connected: st.connected,
            status: st.status,
            charging: st.is_charging,
            voltage: self.inner.config.voltage,
            current: st.current,
            power: st.power,
            soc: st.soc,
            meter_value: st.meter_value,
            license_plate: st.license_plate.clone(),
            transaction_id: st.transaction_id.clone(),
        }
    }

    /// Set the battery State of Charge.
    pub fn set_soc(&self, soc: f64) -> Result<(), ChargerError> {
        if !(0.0..=100.0).contains(&soc) {
            return Err(ChargerError::OutOfRange {
                quantity: "soc",
                value: soc,
                min: 0.0,
                max: 100.0,
            });
        }
        self.state_mut().soc = soc;
        Ok(())
    }

    /// Set the charging current limit in A.
    ///
    /// 0 suspends charging; a positive value must fall inside the configured
    /// envelope. Crossing 0 in either direction while the 1.6 status machine
    /// is in Charging/SuspendedEVSE drives the matching status transition.
    pub async fn set_current(&self, amps: f64) -> Result<(), ChargerError> {
        let config = self.config();
        if amps != 0.0 && (amps < config.min_current || amps > config.max_current) {
            return Err(ChargerError::OutOfRange {
                quantity: "current",
                value: amps,
                min: config.min_current,
                max: config.max_current,
            });
        }

        let (previous, status) = {
            let mut st = self.state_mut();
            let previous = st.current;
            st.current = amps;
            st.power = if amps > 0.0 {
                (amps * config.voltage).min(config.max_power)
            } else {
                0.0
            };
            (previous, st.status)
        };
        info!(amps, "current limit set");

        if amps == 0.0 && previous > 0.0 && status == ConnectorStatus::Charging {
            self.set_status(ConnectorStatus::SuspendedEVSE).await
        } else if amps > 0.0 && previous == 0.0 && status == ConnectorStatus::SuspendedEVSE {
            self.set_status(ConnectorStatus::Charging).await
        } else {
            Ok(())
        }
    }

    /// Set the charging power limit in W; the current limit follows as I = P/V.
    pub async fn set_power(&self, watts: f64) -> Result<(), ChargerError> {
        let config = self.config();
        if watts != 0.0 && (watts < config.min_power || watts > config.max_power) {
            return Err(ChargerError::OutOfRange {
                quantity: "power",
                value: watts,
                min: config.min_power,
                max: config.max_power,
            });
        }

        let (previous, status) = {
            let mut st = self.state_mut();
            let previous = st.power;
            st.power = watts;
            st.current = if watts > 0.0 {
                (watts / config.voltage).min(config.max_current)
            } else {
                0.0
            };
            (previous, st.status)
        };
        info!(watts, "power limit set");

        if watts == 0.0 && previous > 0.0 && status == ConnectorStatus::Charging {
            self.set_status(ConnectorStatus::SuspendedEVSE).await
        } else if watts > 0.0 && previous == 0.0 && status == ConnectorStatus::SuspendedEVSE {
            self.set_status(ConnectorStatus::Charging).await
        } else {
            Ok(())
        }
    }

    /// Update the connector status, driving the meter ticker on transitions
    /// into and out of Charging, and notify the server when connected.
    ///
    /// The local change is committed even if the notification fails; the
    /// send error is returned to the caller.
    pub async fn set_status(&self, status: ConnectorStatus) -> Result<(), ChargerError> {
        if !status.is_valid_for(self.config().version()) {
            return Err(ChargerError::InvalidStatus {
                status: status.to_string(),
                version: self.config().version(),
            });
        }

        let (connected, meter_stop) = {
            let mut st = self.state_mut();
            let previous = st.status;
            st.status = status;
            let entering =
                status == ConnectorStatus::Charging && previous != ConnectorStatus::Charging;
            let leaving =
                status != ConnectorStatus::Charging && previous == ConnectorStatus::Charging;
            if entering {
                self.start_meter_ticker_locked(&mut st);
            }
            let stop = if leaving { st.meter_stop.take() } else { None };
            (st.connected, stop)
        };
        drop(meter_stop);
        info!(%status, "status changed");

        if connected {
            self.send_status_notification(status).await?;
        }
        Ok(())
    }

    /// Simulate the car plugging in. Requires an Available connector; a
    /// latched remote-start authorization is consumed here and turned into a
    /// deferred transaction start.
    pub async fn plugin(&self) -> Result<(), ChargerError> {
        let pending_tag = {
            let mut st = self.state_mut();
            if st.status != ConnectorStatus::Available {
                return Err(ChargerError::WrongStatus {
                    operation: "plug in",
                    state: format!("status must be Available (current: {})", st.status),
                });
            }
            // the latched remoteStartId rides along into the Started event
            st.pending_remote_start_id_tag.take()
        };

        self.set_status(ConnectorStatus::occupied_for(self.config().version()))
            .await?;

        if let Some(id_tag) = pending_tag {
            info!(id_tag, "starting remotely authorized transaction");
            let charger = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(FOLLOW_UP_DELAY).await;
                if let Err(e) = charger.start_transaction(&id_tag).await {
                    warn!(error = %e, "deferred remote start failed");
                }
            });
        }
        Ok(())
    }

    /// Simulate the car unplugging: stop the meter ticker, reset the session
    /// state and return to Available.
    ///
    /// The whole reset happens under one lock acquisition so no concurrent
    /// operation observes a half-reset session.
    pub async fn unplug(&self) -> Result<(), ChargerError> {
        let (connected, meter_stop) = {
            let mut st = self.state_mut();
            st.is_charging = false;
            st.transaction_id = None;
            st.id_tag = None;
            st.license_plate = None;
            st.pending_remote_start_id_tag = None;
            st.pending_remote_start_id = None;
            st.soc = self.config().initial_soc;
            st.meter_value = 0;
            st.status = ConnectorStatus::Available;
            (st.connected, st.meter_stop.take())
        };
        drop(meter_stop);
        info!(status = %ConnectorStatus::Available, "status changed");

        if connected {
            self.send_status_notification(ConnectorStatus::Available)
                .await?;
        }
        Ok(())
    }

    /// Establish the WebSocket connection, register with the Central System
    /// and bring up the connection-owned background tasks.
    pub async fn connect(&self) -> Result<(), ChargerError> {
        if self.state().connected {
            return Err(ChargerError::AlreadyConnected);
        }

        let config = self.config();
        info!(url = %config.server_url, "connecting");
        let (sink, stream) =
            transport::connect(&config.server_url, config.version(), self.inner.tls.clone())
                .await?;
        *self.inner.sink.lock().await = Some(sink);

        let stop_rx = {
            let mut st = self.state_mut();
            st.connected = true;
            let (stop_tx, stop_rx) = watch::channel(());
            st.recv_stop = Some(stop_tx);
            stop_rx
        };
        self.spawn_receive_loop(stream, stop_rx);
        info!("connected");

        self.boot_notification().await?;
        self.start_heartbeat_ticker();
        // one baseline StatusNotification so the server knows where we stand
        let status = self.status();
        self.send_status_notification(status).await?;
        Ok(())
    }

    /// Tear down the connection and its background tasks. The meter ticker
    /// is left alone: an active charging session keeps integrating locally
    /// and resyncs on the next connect. No-op when not connected.
    pub async fn disconnect(&self) {
        let stops = {
            let mut st = self.state_mut();
            if !st.connected {
                return;
            }
            st.connected = false;
            (st.recv_stop.take(), st.heartbeat_stop.take())
        };
        drop(stops);

        let mut sink = self.inner.sink.lock().await;
        if let Some(mut sink) = sink.take() {
            let _ = sink.close().await;
        }
        info!("disconnected");
    }

    /// Write one text frame. Every frame goes through the sink mutex, so
    /// concurrent senders never interleave partial frames.
    pub(crate) async fn send_text(&self, text: &str) -> Result<(), ChargerError> {
        let mut guard = self.inner.sink.lock().await;
        let sink = guard.as_mut().ok_or(ChargerError::NotConnected)?;
        sink.send(Message::Text(text.to_owned()))
            .await
            .map_err(ChargerError::from)
    }

    /// Receive loop: owns the read half, hands each frame to a short-lived
    /// handler task so slow handlers never block the stream, and funnels
    /// read errors into `disconnect`.
    fn spawn_receive_loop(&self, mut stream: WsStream, mut stop: watch::Receiver<()>) {
        let charger = self.clone();
        tokio::spawn(async move {
            debug!("receive loop started");
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    next = stream.next() => match next {
                        Some(Ok(Message::Text(text))) => {
                            debug!(frame = %text, "received");
                            let charger = charger.clone();
                            tokio::spawn(async move {
                                charger.handle_frame(&text).await;
                            });
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("server closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read error");
                            break;
                        }
                    }
                }
            }
            debug!("receive loop stopped");
            charger.disconnect().await;
        });
    }

    /// Demultiplex one inbound frame: server-initiated Calls go to the
    /// action handlers, responses resolve the matching pending call.
    pub(crate) async fn handle_frame(&self, text: &str) {
        match frame::parse(text) {
            Ok(Frame::Call {
                unique_id,
                action,
                payload,
            }) => {
                self.handle_call(&unique_id, &action, payload).await;
            }
            Ok(Frame::CallResult { unique_id, payload }) => {
                if !self.pending().complete_result(&unique_id, payload) {
                    warn!(%unique_id, "response for unknown call dropped");
                }
            }
            Ok(Frame::CallError {
                unique_id,
                code,
                description,
                ..
            }) => {
                warn!(%unique_id, %code, %description, "received CallError");
                if !self.pending().complete_error(&unique_id, code, description) {
                    warn!(%unique_id, "error response for unknown call dropped");
                }
            }
            Err(e) => {
                warn!(error = %e, "discarding unparsable frame");
            }
        }
    }
}
