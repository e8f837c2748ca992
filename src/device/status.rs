use core::fmt;

use super::{DeviceState, SessionStateMachine};

const RULE: &str = "-----------------------------";

/// Diagnostic snapshot of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Lifecycle state
    pub state: DeviceState,
    /// Pending uplink payload as hex, if transceiving
    pub pending_message: Option<String>,
    /// Device EUI as hex
    pub device_eui: String,
    /// Application EUI as hex
    pub app_eui: String,
    /// Application key as hex
    pub app_key: String,
    /// Device address as hex
    pub device_address: String,
    /// Network session key as hex
    pub network_key: String,
    /// Application session key as hex
    pub app_session_key: String,
    /// Uplink frame counter
    pub sequence_number_up: u32,
}

impl Status {
    /// Take a snapshot of the machine
    pub fn capture(machine: &SessionStateMachine) -> Self {
        let credentials = machine.credentials();
        Self {
            state: machine.state(),
            pending_message: machine.pending().map(|p| hex::encode(&p.payload)),
            device_eui: credentials.device_eui(),
            app_eui: credentials.app_eui(),
            app_key: credentials.app_key(),
            device_address: credentials.device_address(),
            network_key: credentials.network_key(),
            app_session_key: credentials.app_session_key(),
            sequence_number_up: credentials.sequence_number_up(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "State: {}", self.state)?;
        if let Some(pending) = &self.pending_message {
            writeln!(f, "Pending message: {}", pending)?;
        }
        writeln!(f, "DevEUI: {}", self.device_eui)?;
        writeln!(f, "AppEUI: {}", self.app_eui)?;
        writeln!(f, "AppKey: {}", self.app_key)?;
        writeln!(f, "DevAddr: {}", self.device_address)?;
        writeln!(f, "NwkSKey: {}", self.network_key)?;
        writeln!(f, "AppSKey: {}", self.app_session_key)?;
        writeln!(f, "SeqNoUp: {}", self.sequence_number_up)?;
        write!(f, "{}", RULE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_snapshot() {
        let status = Status::capture(&SessionStateMachine::new());
        let text = status.to_string();

        assert!(text.starts_with(RULE));
        assert!(text.ends_with(RULE));
        assert!(text.contains("State: idle\n"));
        assert!(!text.contains("Pending message"));
        assert!(text.contains("SeqNoUp: 0\n"));
    }
}
