//! Periodic sensor uplink against a simulated network
//!
//! Run with `RUST_LOG=debug cargo run --example periodic_uplink`.

use std::thread;
use std::time::Duration;

use simple_ttn::{
    config::Configuration,
    engine::{CredentialSupplier, EngineEvent, EventQueue, MacEngine, SessionKeys, TxReport, TxRxFlags},
    Device, DeviceState,
};

// Sensor data structure
#[derive(Default)]
struct SensorData {
    temperature: i16,
    humidity: u8,
    pressure: u16,
}

impl SensorData {
    fn to_bytes(&self) -> [u8; 5] {
        let mut bytes = [0u8; 5];
        bytes[0..2].copy_from_slice(&self.temperature.to_be_bytes());
        bytes[2] = self.humidity;
        bytes[3..5].copy_from_slice(&self.pressure.to_be_bytes());
        bytes
    }
}

/// Engine answering joins and uplinks after a few steps
#[derive(Default)]
struct SimulatedEngine {
    joining: Option<u32>,
    transmitting: Option<u32>,
    session: Option<SessionKeys>,
    seqno_up: u32,
    frame: Vec<u8>,
}

impl MacEngine for SimulatedEngine {
    type Error = ();

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn reset_mac_state(&mut self) {
        *self = Self::default();
    }

    fn unjoin(&mut self) {
        self.session = None;
        self.seqno_up = 0;
    }

    fn start_joining(&mut self) {
        self.joining = Some(0);
    }

    fn set_session(&mut self, keys: &SessionKeys) {
        self.session = Some(*keys);
    }

    fn configure(&mut self, _config: &Configuration) {}

    fn set_tx_data(&mut self, port: u8, payload: &[u8], _confirm: bool) -> nb::Result<(), Self::Error> {
        if self.transmitting.is_some() {
            return Err(nb::Error::WouldBlock);
        }
        // Echo the uplink back as downlink on the same port
        self.frame = vec![0x60, 0, 0, 0, 0, 0, 0, 0, port];
        self.frame.extend_from_slice(payload);
        self.transmitting = Some(0);
        Ok(())
    }

    fn set_sequence_number_up(&mut self, seqno: u32) {
        self.seqno_up = seqno;
    }

    fn tx_pending(&self) -> bool {
        self.transmitting.is_some()
    }

    fn pump_once(&mut self, credentials: &dyn CredentialSupplier, events: &mut EventQueue) {
        if let Some(steps) = self.joining.as_mut() {
            *steps += 1;
            if *steps == 1 {
                let _ = events.push_back(EngineEvent::Joining.code());
            } else if *steps == 50 {
                let dev_eui = credentials.dev_eui_le().unwrap_or_default();
                self.session = Some(SessionKeys {
                    net_id: 0x13,
                    dev_addr: u32::from_le_bytes([dev_eui[0], dev_eui[1], dev_eui[2], 0x26]),
                    nwk_key: credentials.dev_key().unwrap_or_default(),
                    art_key: [0x5A; 16],
                });
                self.joining = None;
                let _ = events.push_back(EngineEvent::Joined.code());
            }
        }
        if let Some(steps) = self.transmitting.as_mut() {
            *steps += 1;
            if *steps == 1 {
                let _ = events.push_back(EngineEvent::TxStart.code());
            } else if *steps == 20 {
                self.seqno_up += 1;
                self.transmitting = None;
                let _ = events.push_back(EngineEvent::TxComplete.code());
            }
        }
    }

    fn session_keys(&self) -> SessionKeys {
        self.session.unwrap_or(SessionKeys {
            net_id: 0,
            dev_addr: 0,
            nwk_key: [0; 16],
            art_key: [0; 16],
        })
    }

    fn tx_report(&self) -> TxReport<'_> {
        TxReport {
            seqno_up: self.seqno_up,
            flags: TxRxFlags::PORT | TxRxFlags::DNW1,
            frame: &self.frame,
            data_beg: 9,
            data_len: self.frame.len().saturating_sub(9),
            port: self.frame.get(8).copied(),
            rssi: -61,
            snr: 7,
        }
    }
}

fn main() {
    env_logger::init();

    let device = match Device::initialize(SimulatedEngine::default()) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Couldn't initialize device: {}", e);
            return;
        }
    };
    device.configure(Configuration::default());
    device.on_message(|completion| match &completion.downlink {
        Some(downlink) => println!(
            "Downlink on port {:?}: {:02x?} (RSSI {} dBm, SNR {} dB)",
            downlink.port, &downlink.payload[..], downlink.rssi, downlink.snr
        ),
        None => println!("Uplink {} complete, no downlink", completion.seqno_up),
    });

    if let Err(e) = device.provision_otaa("0011223344556677", "8877665544332211", "000102030405060708090A0B0C0D0E0F") {
        eprintln!("Bad credentials: {}", e);
        return;
    }
    if let Err(e) = device.join() {
        eprintln!("Couldn't join: {}", e);
        return;
    }

    while device.state() != DeviceState::Ready {
        thread::sleep(Duration::from_millis(50));
    }
    println!("{}", device.status_description());

    let mut sensor = SensorData::default();
    for _ in 0..3 {
        sensor.temperature += 215;
        sensor.humidity = 40;
        sensor.pressure = 1013;

        if let Err(e) = device.send(&sensor.to_bytes(), 1, false) {
            eprintln!("Send failed: {}", e);
        }
        while device.state() == DeviceState::Transceiving {
            thread::sleep(Duration::from_millis(50));
        }
    }

    println!("{}", device.status_description());
    device.stop();
}
