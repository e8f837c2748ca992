use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use simple_ttn::{
    engine::{EngineEvent, EventCode, SessionKeys, TxRxFlags},
    Configuration, Device, DeviceError, DeviceState, TxCompletion,
};

use mock::{finishes_within, wait_until, Call, MockEngine, MockHandle, Response};

const DEV_EUI: &str = "0011223344556677";
const APP_EUI: &str = "8877665544332211";
const APP_KEY: &str = "000102030405060708090A0B0C0D0E0F";

const JOINED_KEYS: SessionKeys = SessionKeys {
    net_id: 0x13,
    dev_addr: 0x2601_1BDA,
    nwk_key: [0xA1; 16],
    art_key: [0xB2; 16],
};

fn create_test_device() -> (Device<MockEngine>, MockHandle) {
    let (engine, handle) = MockEngine::new();
    let device = Device::initialize(engine).unwrap();
    device.configure(Configuration::default().with_pump_interval(Duration::from_millis(1)));
    device.provision_otaa(DEV_EUI, APP_EUI, APP_KEY).unwrap();
    (device, handle)
}

fn joined_device() -> (Device<MockEngine>, MockHandle) {
    let (device, handle) = create_test_device();
    handle.set_session_keys(JOINED_KEYS);
    device.join().unwrap();
    device.event_bridge().dispatch(EngineEvent::Joined);
    assert_eq!(device.state(), DeviceState::Ready);
    (device, handle)
}

#[test]
fn test_otaa_scenario() {
    let (device, handle) = create_test_device();

    device.join().unwrap();
    assert_eq!(device.state(), DeviceState::Joining);
    assert!(device.is_driver_running());

    device.event_bridge().dispatch(EngineEvent::Joined);
    assert_eq!(device.state(), DeviceState::Ready);

    device.send(&[0xDE, 0xAD], 1, false).unwrap();
    assert_eq!(device.state(), DeviceState::Transceiving);
    let pending = device.pending_message().unwrap();
    assert_eq!(&pending.payload[..], &[0xDE, 0xAD]);
    assert_eq!(pending.port, 1);
    assert!(!pending.confirm);
    assert!(device.status_description().contains("Pending message: dead"));

    device.event_bridge().dispatch(EngineEvent::TxComplete);
    assert_eq!(device.state(), DeviceState::Ready);
    assert!(device.pending_message().is_none());

    let completion = device.last_completion().unwrap();
    assert!(!completion.acked);
    assert!(completion.downlink.is_none());

    assert!(handle.calls().contains(&Call::SetTxData {
        port: 1,
        payload: vec![0xDE, 0xAD],
        confirm: false
    }));

    device.stop();
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(!device.is_driver_running());
}

#[test]
fn test_join_requests_unjoin_and_rejoin() {
    let (device, handle) = create_test_device();

    device.join().unwrap();

    let calls = handle.calls();
    let unjoin = calls.iter().position(|c| *c == Call::Unjoin).unwrap();
    let start = calls.iter().position(|c| *c == Call::StartJoining).unwrap();
    assert!(unjoin < start);
}

#[test]
fn test_engine_reads_reversed_euis() {
    let (device, handle) = create_test_device();

    device.join().unwrap();
    assert!(wait_until(|| handle.state().supplied.is_some()));

    let (dev_eui, app_eui, app_key) = handle.state().supplied.unwrap();
    assert_eq!(dev_eui, [0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x00]);
    assert_eq!(app_eui, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    assert_eq!(app_key[0], 0x00);
    assert_eq!(app_key[15], 0x0F);
}

#[test]
fn test_join_failed_and_retry() {
    let (device, handle) = create_test_device();

    device.join().unwrap();
    device.event_bridge().dispatch(EngineEvent::JoinFailed);
    assert_eq!(device.state(), DeviceState::JoinFailed);
    assert!(device.is_driver_running());

    device.join().unwrap();
    assert_eq!(device.state(), DeviceState::Joining);
    let starts = handle.calls().iter().filter(|c| **c == Call::StartJoining).count();
    assert_eq!(starts, 2);
}

#[test]
fn test_join_rejected_while_active() {
    let (device, _handle) = joined_device();

    assert!(matches!(
        device.join(),
        Err(DeviceError::InvalidStateTransition {
            operation: "join",
            state: DeviceState::Ready
        })
    ));
    assert_eq!(device.state(), DeviceState::Ready);
}

#[test]
fn test_provision_rejected_while_joining() {
    let (device, _handle) = create_test_device();
    device.join().unwrap();

    let result = device.provision_otaa("AABBCCDDEEFF0011", APP_EUI, APP_KEY);

    assert!(matches!(result, Err(DeviceError::InvalidStateTransition { .. })));
    assert_eq!(device.device_eui(), "0011223344556677");
}

#[test]
fn test_joined_session_material() {
    let (device, handle) = joined_device();

    assert_eq!(device.device_address(), "26011bda");
    assert_eq!(device.network_key(), "a1".repeat(16));
    assert_eq!(device.app_session_key(), "b2".repeat(16));
    assert_eq!(device.sequence_number_up(), 0);

    // Configuration is reapplied once joined
    let configures = handle
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Configure(_)))
        .count();
    assert_eq!(configures, 3);
}

#[test]
fn test_joined_ignored_after_join_failed() {
    let (device, handle) = create_test_device();
    handle.set_session_keys(JOINED_KEYS);

    device.join().unwrap();
    device.event_bridge().dispatch(EngineEvent::JoinFailed);
    device.event_bridge().dispatch(EngineEvent::Joined);

    assert_eq!(device.state(), DeviceState::JoinFailed);
    assert_eq!(device.device_address(), "");
}

#[test]
fn test_joined_ignored_when_idle() {
    let (device, handle) = create_test_device();
    handle.set_session_keys(JOINED_KEYS);

    device.event_bridge().dispatch(EngineEvent::Joined);

    assert_eq!(device.state(), DeviceState::Idle);
    assert_eq!(device.device_address(), "");
}

#[test]
fn test_events_from_driver() {
    let (device, handle) = create_test_device();
    handle.set_session_keys(JOINED_KEYS);

    device.join().unwrap();
    handle.raise(EngineEvent::Joining);
    handle.raise(EngineEvent::JoinTxComplete);
    handle.raise(EngineEvent::Joined);

    assert!(wait_until(|| device.state() == DeviceState::Ready));
    assert!(handle.pumps() > 0);
}

#[test]
fn test_tx_complete_with_ack_and_downlink() {
    let (device, handle) = joined_device();
    let received: Arc<Mutex<Vec<TxCompletion>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    device.on_message(move |completion| sink.lock().unwrap().push(completion.clone()));

    let mut response = Response::downlink(5, &[0xCA, 0xFE]);
    response.flags |= TxRxFlags::ACK;
    response.seqno_step = 3;
    handle.respond(response);

    device.send(&[0x01, 0x02], 2, true).unwrap();
    handle.raise(EngineEvent::TxStart);
    handle.raise(EngineEvent::TxComplete);

    assert!(wait_until(|| !received.lock().unwrap().is_empty()));
    assert_eq!(device.state(), DeviceState::Ready);
    assert_eq!(device.sequence_number_up(), 3);

    let completion = received.lock().unwrap()[0].clone();
    assert!(completion.acked);
    assert_eq!(completion.seqno_up, 3);
    let downlink = completion.downlink.unwrap();
    assert_eq!(downlink.port, Some(5));
    assert_eq!(&downlink.payload[..], &[0xCA, 0xFE]);
    assert_eq!(downlink.rssi, -57);
    assert_eq!(downlink.snr, 9);
}

#[test]
fn test_downlink_outside_frame_dropped() {
    let (device, handle) = joined_device();
    let mut response = Response::downlink(5, &[0xCA, 0xFE]);
    response.data_len = 40;
    handle.respond(response);

    device.send(&[0x01], 1, false).unwrap();
    device.event_bridge().dispatch(EngineEvent::TxComplete);

    assert_eq!(device.state(), DeviceState::Ready);
    assert!(device.last_completion().unwrap().downlink.is_none());
}

#[test]
fn test_sequence_number_advances_per_uplink() {
    let (device, _handle) = create_test_device();
    device
        .provision_abp("26011BDA", &"01".repeat(16), &"02".repeat(16), 10)
        .unwrap();

    for expected in 11..=13 {
        device.poll(1, false).unwrap();
        assert_eq!(device.state(), DeviceState::Transceiving);
        assert!(device.pending_message().unwrap().payload.is_empty());
        device.event_bridge().dispatch(EngineEvent::TxComplete);
        assert_eq!(device.sequence_number_up(), expected);
    }
}

#[test]
fn test_lower_reported_seqno_keeps_stored() {
    let (device, handle) = create_test_device();
    device
        .provision_abp("26011BDA", &"01".repeat(16), &"02".repeat(16), 10)
        .unwrap();
    handle.respond(Response {
        seqno_reported: Some(4),
        ..Response::default()
    });

    device.send(&[0x01], 1, false).unwrap();
    device.event_bridge().dispatch(EngineEvent::TxComplete);

    assert_eq!(device.state(), DeviceState::Ready);
    assert_eq!(device.sequence_number_up(), 10);
    assert_eq!(device.last_completion().unwrap().seqno_up, 10);
}

#[test]
fn test_events_raised_inside_join() {
    let (device, handle) = create_test_device();
    handle.attach(&device);
    handle.state().joining_on_start = true;
    let device = Arc::new(device);

    let joiner = device.clone();
    let joined = finishes_within(Duration::from_secs(3), move || joiner.join().is_ok());

    assert_eq!(joined, Some(true));
    assert_eq!(device.state(), DeviceState::Joining);
    device.stop();
}

#[test]
fn test_uplink_completed_inside_send() {
    let (device, handle) = create_test_device();
    device
        .provision_abp("26011BDA", &"01".repeat(16), &"02".repeat(16), 0)
        .unwrap();
    handle.attach(&device);
    handle.state().complete_inline = true;
    handle.respond(Response::downlink(3, &[0x42]));

    let received: Arc<Mutex<Vec<TxCompletion>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    device.on_message(move |completion| sink.lock().unwrap().push(completion.clone()));
    let device = Arc::new(device);

    let sender = device.clone();
    let sent = finishes_within(Duration::from_secs(3), move || sender.send(&[0x01], 1, false).is_ok());

    assert_eq!(sent, Some(true));
    assert_eq!(device.state(), DeviceState::Ready);
    assert_eq!(device.sequence_number_up(), 1);
    assert!(wait_until(|| received.lock().unwrap().len() == 1));
    let downlink = received.lock().unwrap()[0].downlink.clone().unwrap();
    assert_eq!(&downlink.payload[..], &[0x42]);
    device.stop();
}

#[test]
fn test_completions_delivered_in_order() {
    let (device, handle) = create_test_device();
    device
        .provision_abp("26011BDA", &"01".repeat(16), &"02".repeat(16), 0)
        .unwrap();

    let received: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    device.on_message(move |completion| {
        sink.lock().unwrap().push(completion.seqno_up);
        if completion.seqno_up == 1 {
            thread::sleep(Duration::from_millis(150));
        }
    });

    device.send(&[0x01], 1, false).unwrap();
    handle.raise(EngineEvent::TxComplete);
    // First callback is now sleeping on the driver thread
    assert!(wait_until(|| !received.lock().unwrap().is_empty()));

    device.send(&[0x02], 1, false).unwrap();
    device.event_bridge().dispatch(EngineEvent::TxComplete);

    assert!(wait_until(|| received.lock().unwrap().len() == 2));
    assert_eq!(*received.lock().unwrap(), vec![1, 2]);
    assert_eq!(device.last_completion().unwrap().seqno_up, 2);
}

#[test]
fn test_tx_complete_ignored_when_not_transceiving() {
    let (device, _handle) = joined_device();

    device.event_bridge().dispatch(EngineEvent::TxComplete);

    assert_eq!(device.state(), DeviceState::Ready);
    assert_eq!(device.sequence_number_up(), 0);
    assert!(device.last_completion().is_none());
}

#[test]
fn test_unknown_events_ignored() {
    let (device, handle) = joined_device();

    device.event_bridge().dispatch(EventCode(0));
    device.event_bridge().dispatch(EventCode(200));
    device.event_bridge().dispatch(EngineEvent::LinkDead);
    device.event_bridge().dispatch(EngineEvent::Reset);
    device.event_bridge().dispatch(EngineEvent::RxComplete);
    handle.raise_code(99);

    let pumps = handle.pumps();
    assert!(wait_until(|| handle.pumps() > pumps + 1));
    assert_eq!(device.state(), DeviceState::Ready);
    assert!(device.is_driver_running());
}

#[test]
fn test_send_from_callback_rejected() {
    let device = Arc::new(create_test_device());
    let (dev, handle) = &*device;
    handle.set_session_keys(JOINED_KEYS);
    dev.join().unwrap();
    dev.event_bridge().dispatch(EngineEvent::Joined);

    let outcome: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let slot = outcome.clone();
    let inner = Arc::downgrade(&device);
    dev.on_message(move |_| {
        if let Some(device) = inner.upgrade() {
            let reentrant = matches!(device.0.send(&[0x01], 1, false), Err(DeviceError::Reentrant));
            *slot.lock().unwrap() = Some(reentrant);
        }
    });

    dev.send(&[0x01], 1, false).unwrap();
    handle.raise(EngineEvent::TxComplete);

    assert!(wait_until(|| outcome.lock().unwrap().is_some()));
    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert_eq!(dev.state(), DeviceState::Ready);
    dev.stop();
}

#[test]
fn test_stop_from_any_state() {
    let (device, handle) = create_test_device();
    device.stop();
    assert_eq!(device.state(), DeviceState::Idle);

    device.join().unwrap();
    device.stop();
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(!device.is_driver_running());

    handle.set_session_keys(JOINED_KEYS);
    device.join().unwrap();
    device.event_bridge().dispatch(EngineEvent::Joined);
    device.send(&[0x01], 1, false).unwrap();
    device.stop();
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(device.pending_message().is_none());
    assert_eq!(device.device_address(), "");

    device.stop();
    device.stop();
    assert_eq!(device.state(), DeviceState::Idle);
    assert!(handle.calls().iter().filter(|c| **c == Call::Reset).count() >= 5);
}

#[test]
fn test_stop_halts_pumping() {
    let (device, handle) = create_test_device();
    device.join().unwrap();
    assert!(wait_until(|| handle.pumps() > 3));

    device.stop();
    let pumps = handle.pumps();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(handle.pumps(), pumps);
}

#[test]
fn test_stop_waits_for_slow_tick() {
    let (device, handle) = create_test_device();
    device.join().unwrap();
    handle.state().pump_delay = Duration::from_millis(50);
    assert!(wait_until(|| handle.state().pumping));

    device.stop();

    assert!(!handle.state().pumping);
    assert_eq!(handle.calls().last(), Some(&Call::Reset));
    assert_eq!(device.state(), DeviceState::Idle);
    let pumps = handle.pumps();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(handle.pumps(), pumps);
}

#[test]
fn test_stop_from_callback_during_stop() {
    let device = Arc::new(create_test_device());
    let (dev, handle) = &*device;
    dev.provision_abp("26011BDA", &"01".repeat(16), &"02".repeat(16), 0)
        .unwrap();

    let entered = Arc::new(AtomicBool::new(false));
    let flag = entered.clone();
    let inner = Arc::downgrade(&device);
    dev.on_message(move |_| {
        flag.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        if let Some(device) = inner.upgrade() {
            device.0.is_driver_running();
            device.0.stop();
        }
    });

    dev.send(&[0x01], 1, false).unwrap();
    handle.raise(EngineEvent::TxComplete);
    assert!(wait_until(|| entered.load(Ordering::SeqCst)));

    let stopper = device.clone();
    let stopped = finishes_within(Duration::from_secs(3), move || {
        stopper.0.stop();
        stopper.0.state()
    });

    assert_eq!(stopped, Some(DeviceState::Idle));
    assert!(!dev.is_driver_running());
}

#[test]
fn test_resume_after_callback_panic() {
    let (device, handle) = create_test_device();
    device
        .provision_abp("26011BDA", &"01".repeat(16), &"02".repeat(16), 0)
        .unwrap();
    device.on_message(|_| panic!("callback failed"));

    device.send(&[0x01], 1, false).unwrap();
    handle.raise(EngineEvent::TxComplete);
    assert!(wait_until(|| !device.is_driver_running()));
    assert_eq!(device.state(), DeviceState::Ready);

    device.resume().unwrap();
    assert!(device.is_driver_running());
    let pumps = handle.pumps();
    assert!(wait_until(|| handle.pumps() > pumps));

    // Outbox was released by the panic
    let received = Arc::new(AtomicBool::new(false));
    let flag = received.clone();
    device.on_message(move |_| flag.store(true, Ordering::SeqCst));
    device.send(&[0x02], 1, false).unwrap();
    handle.raise(EngineEvent::TxComplete);
    assert!(wait_until(|| received.load(Ordering::SeqCst)));

    device.stop();
}

#[test]
fn test_concurrent_stop() {
    let (device, _handle) = joined_device();
    let device = Arc::new(device);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let device = device.clone();
            thread::spawn(move || device.stop())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(device.state(), DeviceState::Idle);
    assert!(!device.is_driver_running());
}

#[test]
fn test_concurrent_sends_single_winner() {
    let (device, _handle) = joined_device();
    let device = Arc::new(device);

    let workers: Vec<_> = (0..8u8)
        .map(|i| {
            let device = device.clone();
            thread::spawn(move || device.send(&[i], 1, false).is_ok())
        })
        .collect();
    let accepted = workers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(device.state(), DeviceState::Transceiving);
    assert_eq!(device.pending_message().unwrap().payload.len(), 1);
}
