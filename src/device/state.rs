use core::fmt;

/// Lifecycle state of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceState {
    /// Not joined, no background driver
    #[default]
    Idle,
    /// Join requested, waiting for the network
    Joining,
    /// The engine gave up joining
    JoinFailed,
    /// Session established, ready to transmit
    Ready,
    /// Uplink in flight
    Transceiving,
    /// Session lost
    Disconnected,
}

impl DeviceState {
    /// Whether session material is valid in this state
    pub fn has_session(self) -> bool {
        matches!(self, DeviceState::Ready | DeviceState::Transceiving)
    }

    /// Whether a join may be started from this state
    pub fn can_join(self) -> bool {
        matches!(self, DeviceState::Idle | DeviceState::JoinFailed | DeviceState::Disconnected)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Idle => "idle",
            DeviceState::Joining => "joining",
            DeviceState::JoinFailed => "join_failed",
            DeviceState::Ready => "ready",
            DeviceState::Transceiving => "transceiving",
            DeviceState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}
