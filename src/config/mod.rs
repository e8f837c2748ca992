//! Device and network configuration
//!
//! This module contains types for configuring a LoRaWAN end device:
//! - Credential storage (DevEUI, AppEUI, keys, session material)
//! - Engine tuning applied at configure time and on join

/// Device credentials and session material
pub mod device;

use core::time::Duration;

pub use device::{CredentialError, CredentialStore, DeviceIdentity, SessionMaterial};

/// EUI-64 (8 bytes)
pub type EUI64 = [u8; 8];
/// AES-128 key (16 bytes)
pub type AESKey = [u8; 16];
/// Device Address (4 bytes)
pub type DevAddr = [u8; 4];

/// Network id of The Things Network
pub const TTN_NET_ID: u32 = 0x13;

/// Data rate identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    /// Spreading factor 12
    SF12,
    /// Spreading factor 11
    SF11,
    /// Spreading factor 10
    SF10,
    /// Spreading factor 9
    SF9,
    /// Spreading factor 8
    SF8,
    /// Spreading factor 7
    SF7,
}

impl DataRate {
    /// Get spreading factor
    pub fn spreading_factor(&self) -> u8 {
        match self {
            DataRate::SF12 => 12,
            DataRate::SF11 => 11,
            DataRate::SF10 => 10,
            DataRate::SF9 => 9,
            DataRate::SF8 => 8,
            DataRate::SF7 => 7,
        }
    }
}

/// Engine tuning and session behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Periodically check whether the network still answers.
    /// Off by default, engine support for it is incomplete.
    pub link_check_enabled: bool,
    /// Data rate of the second receive window (TTN uses SF9)
    pub rx2_data_rate: DataRate,
    /// Uplink data rate
    pub tx_data_rate: DataRate,
    /// Uplink transmit power in dBm
    pub tx_power_dbm: i8,
    /// Tolerated clock error in percent
    pub clock_error_percent: u8,
    /// Network id used for ABP sessions
    pub net_id: u32,
    /// Interval between two background engine steps
    pub pump_interval: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            link_check_enabled: false,
            rx2_data_rate: DataRate::SF9,
            tx_data_rate: DataRate::SF7,
            tx_power_dbm: 14,
            clock_error_percent: 7,
            net_id: TTN_NET_ID,
            pump_interval: Duration::from_millis(16),
        }
    }
}

impl Configuration {
    /// Enable or disable link checks
    pub fn with_link_check(mut self, enabled: bool) -> Self {
        self.link_check_enabled = enabled;
        self
    }

    /// Set uplink data rate and transmit power
    pub fn with_tx(mut self, data_rate: DataRate, power_dbm: i8) -> Self {
        self.tx_data_rate = data_rate;
        self.tx_power_dbm = power_dbm;
        self
    }

    /// Set the RX2 data rate
    pub fn with_rx2_data_rate(mut self, data_rate: DataRate) -> Self {
        self.rx2_data_rate = data_rate;
        self
    }

    /// Set the network id used for ABP sessions
    pub fn with_net_id(mut self, net_id: u32) -> Self {
        self.net_id = net_id;
        self
    }

    /// Set the background pump interval. Zero is clamped to one millisecond.
    pub fn with_pump_interval(mut self, interval: Duration) -> Self {
        self.pump_interval = interval.max(Duration::from_millis(1));
        self
    }
}
