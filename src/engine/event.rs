use core::fmt;

use thiserror::Error;

/// Opaque event code as raised by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventCode(pub u8);

/// Event code outside the known table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown engine event code {0}")]
pub struct UnknownEvent(pub u8);

/// Engine events, numbered like the LMIC event table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EngineEvent {
    /// Beacon scan timed out
    ScanTimeout = 1,
    /// Beacon found
    BeaconFound = 2,
    /// Beacon missed
    BeaconMissed = 3,
    /// Beacon tracked
    BeaconTracked = 4,
    /// Join procedure started
    Joining = 5,
    /// Join accept received, session established
    Joined = 6,
    /// Reserved
    Rfu1 = 7,
    /// Join procedure gave up
    JoinFailed = 8,
    /// Rejoin failed
    RejoinFailed = 9,
    /// Uplink and its receive windows completed
    TxComplete = 10,
    /// Beacon time sync lost
    LostTsync = 11,
    /// MAC state was reset
    Reset = 12,
    /// Downlink received outside of a transmission
    RxComplete = 13,
    /// Network stopped answering link checks
    LinkDead = 14,
    /// Network answered again
    LinkAlive = 15,
    /// Scan found a beacon
    ScanFound = 16,
    /// Radio started transmitting
    TxStart = 17,
    /// Pending transmission was cancelled
    TxCanceled = 18,
    /// Receive window opened
    RxStart = 19,
    /// Join request sent, waiting for the accept
    JoinTxComplete = 20,
}

impl EngineEvent {
    /// Raw code of this event
    pub fn code(self) -> EventCode {
        EventCode(self as u8)
    }
}

impl From<EngineEvent> for EventCode {
    fn from(event: EngineEvent) -> Self {
        event.code()
    }
}

impl TryFrom<EventCode> for EngineEvent {
    type Error = UnknownEvent;

    fn try_from(code: EventCode) -> Result<Self, Self::Error> {
        let event = match code.0 {
            1 => EngineEvent::ScanTimeout,
            2 => EngineEvent::BeaconFound,
            3 => EngineEvent::BeaconMissed,
            4 => EngineEvent::BeaconTracked,
            5 => EngineEvent::Joining,
            6 => EngineEvent::Joined,
            7 => EngineEvent::Rfu1,
            8 => EngineEvent::JoinFailed,
            9 => EngineEvent::RejoinFailed,
            10 => EngineEvent::TxComplete,
            11 => EngineEvent::LostTsync,
            12 => EngineEvent::Reset,
            13 => EngineEvent::RxComplete,
            14 => EngineEvent::LinkDead,
            15 => EngineEvent::LinkAlive,
            16 => EngineEvent::ScanFound,
            17 => EngineEvent::TxStart,
            18 => EngineEvent::TxCanceled,
            19 => EngineEvent::RxStart,
            20 => EngineEvent::JoinTxComplete,
            other => return Err(UnknownEvent(other)),
        };
        Ok(event)
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineEvent::ScanTimeout => "EV_SCAN_TIMEOUT",
            EngineEvent::BeaconFound => "EV_BEACON_FOUND",
            EngineEvent::BeaconMissed => "EV_BEACON_MISSED",
            EngineEvent::BeaconTracked => "EV_BEACON_TRACKED",
            EngineEvent::Joining => "EV_JOINING",
            EngineEvent::Joined => "EV_JOINED",
            EngineEvent::Rfu1 => "EV_RFU1",
            EngineEvent::JoinFailed => "EV_JOIN_FAILED",
            EngineEvent::RejoinFailed => "EV_REJOIN_FAILED",
            EngineEvent::TxComplete => "EV_TXCOMPLETE",
            EngineEvent::LostTsync => "EV_LOST_TSYNC",
            EngineEvent::Reset => "EV_RESET",
            EngineEvent::RxComplete => "EV_RXCOMPLETE",
            EngineEvent::LinkDead => "EV_LINK_DEAD",
            EngineEvent::LinkAlive => "EV_LINK_ALIVE",
            EngineEvent::ScanFound => "EV_SCAN_FOUND",
            EngineEvent::TxStart => "EV_TXSTART",
            EngineEvent::TxCanceled => "EV_TXCANCELED",
            EngineEvent::RxStart => "EV_RXSTART",
            EngineEvent::JoinTxComplete => "EV_JOIN_TXCOMPLETE",
        };
        f.write_str(name)
    }
}
