//! Credential storage for OTAA identities and session material

use thiserror::Error;

use super::{AESKey, DevAddr, EUI64};
use crate::engine::{CredentialSupplier, SessionKeys};

/// Credential decoding error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CredentialError {
    /// Input has the wrong number of hex characters
    #[error("{field}: expected {expected} hex characters, got {actual}")]
    WrongLength {
        /// Credential field name
        field: &'static str,
        /// Expected number of hex characters
        expected: usize,
        /// Actual input length
        actual: usize,
    },
    /// Input is not valid hex
    #[error("{field}: {source}")]
    InvalidHex {
        /// Credential field name
        field: &'static str,
        /// Decoder error
        #[source]
        source: hex::FromHexError,
    },
}

fn decode<const N: usize>(field: &'static str, input: &str) -> Result<[u8; N], CredentialError> {
    if input.len() != N * 2 {
        return Err(CredentialError::WrongLength {
            field,
            expected: N * 2,
            actual: input.len(),
        });
    }
    let mut bytes = [0u8; N];
    hex::decode_to_slice(input, &mut bytes)
        .map_err(|source| CredentialError::InvalidHex { field, source })?;
    Ok(bytes)
}

/// OTAA device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device EUI, most significant byte first
    pub dev_eui: EUI64,
    /// Application (join) EUI, most significant byte first
    pub app_eui: EUI64,
    /// Application root key
    pub app_key: AESKey,
}

impl DeviceIdentity {
    /// Create a new identity from raw bytes
    pub fn new(dev_eui: EUI64, app_eui: EUI64, app_key: AESKey) -> Self {
        Self {
            dev_eui,
            app_eui,
            app_key,
        }
    }

    /// Decode an identity from hex strings (16/16/32 characters)
    pub fn from_hex(dev_eui: &str, app_eui: &str, app_key: &str) -> Result<Self, CredentialError> {
        Ok(Self {
            dev_eui: decode("devEui", dev_eui)?,
            app_eui: decode("appEui", app_eui)?,
            app_key: decode("appKey", app_key)?,
        })
    }
}

/// Session material of an activated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMaterial {
    /// Network id
    pub net_id: u32,
    /// Device address, most significant byte first
    pub dev_addr: DevAddr,
    /// Network session key
    pub nwk_skey: AESKey,
    /// Application session key
    pub app_skey: AESKey,
    /// Uplink frame counter
    pub seqno_up: u32,
}

impl SessionMaterial {
    /// Create session material for ABP activation
    pub fn new_abp(net_id: u32, dev_addr: DevAddr, nwk_skey: AESKey, app_skey: AESKey, seqno_up: u32) -> Self {
        Self {
            net_id,
            dev_addr,
            nwk_skey,
            app_skey,
            seqno_up,
        }
    }

    /// Decode ABP session material from hex strings (8/32/32 characters)
    pub fn from_hex(
        net_id: u32,
        dev_addr: &str,
        nwk_skey: &str,
        app_skey: &str,
        seqno_up: u32,
    ) -> Result<Self, CredentialError> {
        Ok(Self::new_abp(
            net_id,
            decode("deviceAddress", dev_addr)?,
            decode("networkKey", nwk_skey)?,
            decode("appSessionKey", app_skey)?,
            seqno_up,
        ))
    }

    /// Build session material from the keys the engine derived during a join
    pub fn from_keys(keys: &SessionKeys) -> Self {
        Self {
            net_id: keys.net_id,
            dev_addr: keys.dev_addr.to_be_bytes(),
            nwk_skey: keys.nwk_key,
            app_skey: keys.art_key,
            seqno_up: 0,
        }
    }

    /// Session keys in the engine's representation
    pub fn keys(&self) -> SessionKeys {
        SessionKeys {
            net_id: self.net_id,
            dev_addr: u32::from_be_bytes(self.dev_addr),
            nwk_key: self.nwk_skey,
            art_key: self.app_skey,
        }
    }
}

/// Holds the device identity and the current session material
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    identity: Option<DeviceIdentity>,
    session: Option<SessionMaterial>,
}

impl CredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store OTAA credentials. On error the stored identity is kept.
    pub fn provision_otaa(&mut self, dev_eui: &str, app_eui: &str, app_key: &str) -> Result<(), CredentialError> {
        self.identity = Some(DeviceIdentity::from_hex(dev_eui, app_eui, app_key)?);
        Ok(())
    }

    /// Validate and store ABP session material. On error the stored session is kept.
    pub fn provision_abp(
        &mut self,
        net_id: u32,
        dev_addr: &str,
        nwk_skey: &str,
        app_skey: &str,
        seqno_up: u32,
    ) -> Result<&SessionMaterial, CredentialError> {
        let session = SessionMaterial::from_hex(net_id, dev_addr, nwk_skey, app_skey, seqno_up)?;
        Ok(self.session.insert(session))
    }

    /// Stored identity
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Current session material
    pub fn session(&self) -> Option<&SessionMaterial> {
        self.session.as_ref()
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut SessionMaterial> {
        self.session.as_mut()
    }

    pub(crate) fn set_session(&mut self, session: SessionMaterial) {
        self.session = Some(session);
    }

    pub(crate) fn clear_session(&mut self) {
        self.session = None;
    }

    /// Device EUI as hex
    pub fn device_eui(&self) -> String {
        self.identity.as_ref().map(|id| hex::encode(id.dev_eui)).unwrap_or_default()
    }

    /// Application EUI as hex
    pub fn app_eui(&self) -> String {
        self.identity.as_ref().map(|id| hex::encode(id.app_eui)).unwrap_or_default()
    }

    /// Application key as hex
    pub fn app_key(&self) -> String {
        self.identity.as_ref().map(|id| hex::encode(id.app_key)).unwrap_or_default()
    }

    /// Device address as hex
    pub fn device_address(&self) -> String {
        self.session.as_ref().map(|s| hex::encode(s.dev_addr)).unwrap_or_default()
    }

    /// Network session key as hex
    pub fn network_key(&self) -> String {
        self.session.as_ref().map(|s| hex::encode(s.nwk_skey)).unwrap_or_default()
    }

    /// Application session key as hex
    pub fn app_session_key(&self) -> String {
        self.session.as_ref().map(|s| hex::encode(s.app_skey)).unwrap_or_default()
    }

    /// Uplink frame counter, zero without a session
    pub fn sequence_number_up(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.seqno_up)
    }
}

// EUIs go over the air least significant byte first.
impl CredentialSupplier for CredentialStore {
    fn dev_eui_le(&self) -> Option<EUI64> {
        self.identity.as_ref().map(|id| reversed(id.dev_eui))
    }

    fn app_eui_le(&self) -> Option<EUI64> {
        self.identity.as_ref().map(|id| reversed(id.app_eui))
    }

    fn dev_key(&self) -> Option<AESKey> {
        self.identity.as_ref().map(|id| id.app_key)
    }
}

fn reversed(mut eui: EUI64) -> EUI64 {
    eui.reverse();
    eui
}
