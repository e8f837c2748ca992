//! Session state machine
//!
//! Owns the lifecycle state, the credentials and the pending uplink. Every
//! method runs with exclusive access to both the machine and the engine; the
//! [`Device`](crate::device::Device) handle provides that by holding its state
//! lock for the duration of each call.

use core::fmt;

use heapless::Vec;
use log::{debug, error, info, trace, warn};

use super::DeviceState;
use crate::config::{Configuration, CredentialStore, SessionMaterial};
use crate::engine::{MacEngine, TxRxFlags};
use crate::error::DeviceError;

/// Maximum application payload size
pub const MAX_PAYLOAD_SIZE: usize = 242;

/// Lowest application port
pub const MIN_APP_PORT: u8 = 1;
/// Highest application port; 224 is the test port, 225..=255 are reserved
pub const MAX_APP_PORT: u8 = 223;

/// Fixed-capacity payload buffer
pub type Payload = Vec<u8, MAX_PAYLOAD_SIZE>;

/// Uplink handed to the engine and not yet completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Payload bytes, empty for a poll
    pub payload: Payload,
    /// Application port
    pub port: u8,
    /// Whether an acknowledgement was requested
    pub confirm: bool,
}

/// Downlink received in the receive windows of an uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Port, if the frame carried one
    pub port: Option<u8>,
    /// Application payload
    pub payload: Payload,
    /// RSSI in dBm
    pub rssi: i16,
    /// SNR in dB
    pub snr: i8,
}

/// Outcome of a completed uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxCompletion {
    /// Uplink counter after the transmission
    pub seqno_up: u32,
    /// Whether the network acknowledged a confirmed uplink
    pub acked: bool,
    /// Downlink payload, if any
    pub downlink: Option<Downlink>,
}

/// Session state machine
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    state: DeviceState,
    credentials: CredentialStore,
    config: Configuration,
    pending: Option<PendingMessage>,
    last_completion: Option<TxCompletion>,
}

impl SessionStateMachine {
    /// Create a new idle machine with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Stored credentials
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Current configuration
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Pending uplink, present iff transceiving
    pub fn pending(&self) -> Option<&PendingMessage> {
        self.pending.as_ref()
    }

    /// Outcome of the most recent uplink
    pub fn last_completion(&self) -> Option<&TxCompletion> {
        self.last_completion.as_ref()
    }

    fn reject<T, X: fmt::Debug>(&self, operation: &'static str) -> Result<T, DeviceError<X>> {
        error!("Can't {} in state {}", operation, self.state);
        Err(DeviceError::InvalidStateTransition {
            operation,
            state: self.state,
        })
    }

    /// Store a configuration and apply it to the engine
    pub fn configure<E: MacEngine>(&mut self, engine: &mut E, config: Configuration) {
        debug!("Applying configuration {:?}", config);
        engine.configure(&config);
        self.config = config;
    }

    /// Provision OTAA credentials. Not allowed while a join is in flight
    /// because the engine reads them asynchronously.
    pub fn provision_otaa<X: fmt::Debug>(
        &mut self,
        dev_eui: &str,
        app_eui: &str,
        app_key: &str,
    ) -> Result<(), DeviceError<X>> {
        trace!("Provisioning OTAA credentials");
        if self.state == DeviceState::Joining {
            return self.reject("provision OTAA credentials");
        }
        self.credentials.provision_otaa(dev_eui, app_eui, app_key).map_err(|e| {
            error!("Rejected OTAA credentials: {}", e);
            DeviceError::from(e)
        })
    }

    /// Provision an ABP session and become ready without a handshake
    pub fn provision_abp<E: MacEngine>(
        &mut self,
        engine: &mut E,
        dev_addr: &str,
        nwk_skey: &str,
        app_skey: &str,
        seqno_up: u32,
    ) -> Result<(), DeviceError<E::Error>> {
        let session = self.prepare_abp::<E::Error>(dev_addr, nwk_skey, app_skey, seqno_up)?;
        self.activate_abp(engine, session)
    }

    /// Decode ABP session material and check that it may be installed now.
    /// Nothing is stored.
    pub fn prepare_abp<X: fmt::Debug>(
        &self,
        dev_addr: &str,
        nwk_skey: &str,
        app_skey: &str,
        seqno_up: u32,
    ) -> Result<SessionMaterial, DeviceError<X>> {
        trace!("Provisioning ABP session");
        if matches!(self.state, DeviceState::Joining | DeviceState::Transceiving) {
            return self.reject("provision ABP session");
        }
        SessionMaterial::from_hex(self.config.net_id, dev_addr, nwk_skey, app_skey, seqno_up).map_err(|e| {
            error!("Rejected ABP session: {}", e);
            DeviceError::from(e)
        })
    }

    /// Install a decoded ABP session and become ready
    pub fn activate_abp<E: MacEngine>(
        &mut self,
        engine: &mut E,
        session: SessionMaterial,
    ) -> Result<(), DeviceError<E::Error>> {
        if matches!(self.state, DeviceState::Joining | DeviceState::Transceiving) {
            return self.reject("provision ABP session");
        }
        let seqno_up = session.seqno_up;
        engine.set_session(&session.keys());
        engine.configure(&self.config);
        engine.set_sequence_number_up(seqno_up);

        self.credentials.set_session(session);
        self.pending = None;
        self.state = DeviceState::Ready;
        info!("ABP session active, seqno_up {}", seqno_up);
        Ok(())
    }

    /// Check the join preconditions without changing anything
    pub fn check_join<X: fmt::Debug>(&self) -> Result<(), DeviceError<X>> {
        if self.credentials.identity().is_none() {
            error!("Can't join without OTAA credentials");
            return Err(DeviceError::MissingIdentity);
        }
        if !self.state.can_join() {
            return self.reject("join");
        }
        Ok(())
    }

    /// Drop the previous session and ask the engine to join again
    pub fn begin_join<E: MacEngine>(&mut self, engine: &mut E) -> Result<(), DeviceError<E::Error>> {
        trace!("Joining");
        self.check_join::<E::Error>()?;

        self.credentials.clear_session();
        self.pending = None;
        engine.unjoin();
        engine.start_joining();

        self.state = DeviceState::Joining;
        Ok(())
    }

    /// Queue an uplink. An empty payload solicits a downlink.
    pub fn submit<E: MacEngine>(
        &mut self,
        engine: &mut E,
        payload: &[u8],
        port: u8,
        confirm: bool,
    ) -> Result<(), DeviceError<E::Error>> {
        let operation = if payload.is_empty() { "poll" } else { "send data" };
        trace!("{} on port {}: {}", operation, port, hex::encode(payload));

        if self.state != DeviceState::Ready {
            return self.reject(operation);
        }
        if !(MIN_APP_PORT..=MAX_APP_PORT).contains(&port) {
            error!("Port {} is not an application port", port);
            return Err(DeviceError::InvalidPort(port));
        }
        let payload = Payload::from_slice(payload).map_err(|_| DeviceError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        })?;
        if engine.tx_pending() {
            error!("Engine indicates there's a pending transaction, cancelling {}", operation);
            return Err(DeviceError::EngineBusy);
        }

        engine.set_tx_data(port, &payload, confirm)?;

        self.pending = Some(PendingMessage { payload, port, confirm });
        self.state = DeviceState::Transceiving;
        Ok(())
    }

    /// Tear down the MAC state and return to idle
    pub fn stop<E: MacEngine>(&mut self, engine: &mut E) {
        trace!("Stopping");
        engine.reset_mac_state();
        self.credentials.clear_session();
        self.pending = None;
        self.state = DeviceState::Idle;
    }

    pub(crate) fn on_joining(&mut self) {
        trace!("handle_joining");
        match self.state {
            DeviceState::Joining | DeviceState::JoinFailed => self.state = DeviceState::Joining,
            DeviceState::Ready | DeviceState::Transceiving => {
                warn!("Engine started a rejoin, session in state {} dropped", self.state);
                self.credentials.clear_session();
                self.pending = None;
                self.state = DeviceState::Joining;
            }
            DeviceState::Idle | DeviceState::Disconnected => {
                warn!("Joining event in state {}, ignored", self.state);
            }
        }
    }

    pub(crate) fn on_joined<E: MacEngine>(&mut self, engine: &mut E) {
        trace!("handle_joined");
        if self.state != DeviceState::Joining {
            warn!("Joined event in state {}, ignored", self.state);
            return;
        }
        let session = SessionMaterial::from_keys(&engine.session_keys());
        info!(
            "Joined network {:#x} as {}",
            session.net_id,
            hex::encode(session.dev_addr)
        );
        self.credentials.set_session(session);
        engine.configure(&self.config);
        self.state = DeviceState::Ready;
    }

    pub(crate) fn on_join_tx_complete(&mut self) {
        trace!("handle_join_tx_complete");
        debug!("Join request sent, waiting for join accept");
    }

    pub(crate) fn on_join_failed(&mut self) {
        trace!("handle_join_failed");
        if self.state != DeviceState::Joining {
            warn!("JoinFailed event in state {}, ignored", self.state);
            return;
        }
        warn!("Join failed");
        self.state = DeviceState::JoinFailed;
    }

    pub(crate) fn on_tx_start(&mut self) {
        trace!("handle_tx_start");
    }

    pub(crate) fn on_tx_complete<E: MacEngine>(&mut self, engine: &mut E) -> Option<TxCompletion> {
        trace!("handle_tx_complete");
        if self.state != DeviceState::Transceiving {
            warn!("TxComplete event in state {}, ignored", self.state);
            return None;
        }
        let report = engine.tx_report();

        let seqno_up = match self.credentials.session_mut() {
            Some(session) if report.seqno_up >= session.seqno_up => {
                session.seqno_up = report.seqno_up;
                session.seqno_up
            }
            Some(session) => {
                warn!(
                    "Engine reported seqno_up {} below {}, keeping stored value",
                    report.seqno_up, session.seqno_up
                );
                session.seqno_up
            }
            None => report.seqno_up,
        };
        debug!("sequenceNumberUp: {}, txrxFlags: {:?}", seqno_up, report.flags);

        let acked = report.flags.contains(TxRxFlags::ACK);
        if acked {
            info!("Received ACK");
        }

        let downlink = match report.payload() {
            Some(data) => match Payload::from_slice(data) {
                Ok(payload) => {
                    debug!(
                        "Received data ({} bytes, data_beg {}): {}",
                        report.data_len,
                        report.data_beg,
                        hex::encode(data)
                    );
                    Some(Downlink {
                        port: report.port,
                        payload,
                        rssi: report.rssi,
                        snr: report.snr,
                    })
                }
                Err(_) => {
                    warn!("Downlink of {} bytes exceeds payload buffer, dropped", data.len());
                    None
                }
            },
            None if report.data_len > 0 => {
                warn!(
                    "Downlink window {}+{} outside frame of {} bytes, dropped",
                    report.data_beg,
                    report.data_len,
                    report.frame.len()
                );
                None
            }
            None => None,
        };

        let completion = TxCompletion {
            seqno_up,
            acked,
            downlink,
        };
        self.pending = None;
        self.state = DeviceState::Ready;
        self.last_completion = Some(completion.clone());
        Some(completion)
    }
}
