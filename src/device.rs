//! High-level LoRaWAN device interface
//!
//! [`Device`] is the application-facing handle. It owns the MAC engine and
//! the [`SessionStateMachine`] behind one lock, shared with the background
//! driver that pumps the engine. Every public call and every driver tick
//! holds that lock for the whole transition, so application calls and engine
//! events never interleave.
//!
//! Events the engine raises through an [`EventBridge`] from inside one of its
//! own methods (a synchronous `Joining` from `start_joining`, say) are queued
//! and dispatched before the running transition releases the lock.
//!
//! No call waits for the network: `join`, `send` and `poll` return once the
//! request is handed to the engine. Completion shows up in [`Device::state`]
//! and through the optional [`Device::on_message`] callback. Completions are
//! delivered in order, one at a time, with no lock held; usually on the
//! driver thread, otherwise on the thread whose call completed the uplink.

/// Session state machine
pub mod session;

/// Lifecycle states
pub mod state;

/// Diagnostic snapshot
pub mod status;

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{error, info, trace, warn};

use crate::bridge::{self, EventBridge};
use crate::config::Configuration;
use crate::driver::BackgroundDriver;
use crate::engine::{EventCode, EventQueue, MacEngine};
use crate::error::DeviceError;

pub use session::{Downlink, PendingMessage, SessionStateMachine, TxCompletion, MAX_PAYLOAD_SIZE};
pub use state::DeviceState;
pub use status::Status;

/// Callback receiving transmit outcomes
pub type MessageCallback = Box<dyn FnMut(&TxCompletion) + Send>;

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
    // Address of the device whose state lock this thread holds, 0 for none
    static HELD_CORE: Cell<usize> = const { Cell::new(0) };
}

struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        IN_CALLBACK.with(|flag| flag.set(true));
        CallbackScope
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        IN_CALLBACK.with(|flag| flag.set(false));
    }
}

struct CoreScope {
    previous: usize,
}

impl CoreScope {
    fn enter(id: usize) -> Self {
        CoreScope {
            previous: HELD_CORE.with(|held| held.replace(id)),
        }
    }
}

impl Drop for CoreScope {
    fn drop(&mut self) {
        HELD_CORE.with(|held| held.set(self.previous));
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Core<E> {
    engine: E,
    machine: SessionStateMachine,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<TxCompletion>,
    draining: bool,
}

// Releases the outbox if a callback panics mid-drain
struct DrainScope<'a>(&'a Mutex<Outbox>);

impl Drop for DrainScope<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

/// State shared between a device handle, its driver and its event bridges.
///
/// Lock order: `driver`, then `core`. `deferred`, `outbox` and `callback`
/// are leaves. No thread is ever joined with `driver` held.
pub(crate) struct Shared<E: MacEngine> {
    core: Mutex<Core<E>>,
    deferred: Mutex<EventQueue>,
    outbox: Mutex<Outbox>,
    driver: Mutex<Option<BackgroundDriver>>,
    callback: Mutex<Option<MessageCallback>>,
}

impl<E: MacEngine> Shared<E> {
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Whether the calling thread is inside a transition of this device
    pub(crate) fn holds_core(&self) -> bool {
        HELD_CORE.with(Cell::get) == self.id()
    }

    /// Queue an event raised from inside an engine call
    pub(crate) fn defer(&self, code: EventCode) {
        if lock(&self.deferred).push_back(code).is_err() {
            warn!("Deferred event queue full, event {:?} dropped", code);
        }
    }

    /// Run one transition under the state lock. Deferred events are
    /// dispatched before the lock is released and the completions they
    /// produce join `completions` in the outbox. Call [`Shared::flush`]
    /// afterwards, with no other lock held.
    pub(crate) fn transition<T>(
        &self,
        f: impl FnOnce(&mut SessionStateMachine, &mut E, &mut Vec<TxCompletion>) -> T,
    ) -> T {
        let mut core = lock(&self.core);
        let _scope = CoreScope::enter(self.id());
        let Core { engine, machine } = &mut *core;

        let mut completions = Vec::new();
        let result = f(&mut *machine, &mut *engine, &mut completions);
        loop {
            let Some(code) = lock(&self.deferred).pop_front() else {
                break;
            };
            completions.extend(bridge::dispatch(machine, engine, code));
        }

        if !completions.is_empty() {
            lock(&self.outbox).queue.extend(completions);
        }
        result
    }

    pub(crate) fn with_core<T>(&self, f: impl FnOnce(&mut SessionStateMachine, &mut E) -> T) -> T {
        let result = self.transition(|machine, engine, _| f(machine, engine));
        self.flush();
        result
    }

    fn read<T>(&self, f: impl FnOnce(&SessionStateMachine) -> T) -> T {
        f(&lock(&self.core).machine)
    }

    /// One driver step: pump the engine and dispatch what it raised
    fn tick(&self) {
        self.transition(|machine, engine, completions| {
            let mut events = EventQueue::new();
            engine.pump_once(machine.credentials(), &mut events);
            while let Some(code) = events.pop_front() {
                completions.extend(bridge::dispatch(machine, engine, code));
            }
        });
        self.flush();
    }

    /// Hand queued completions to the callback in order. Only one thread
    /// drains at a time; completions queued meanwhile are left to it.
    pub(crate) fn flush(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining || outbox.queue.is_empty() {
                return;
            }
            outbox.draining = true;
        }
        let _scope = DrainScope(&self.outbox);

        loop {
            let completion = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(completion) => completion,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.deliver(&completion);
        }
    }

    fn deliver(&self, completion: &TxCompletion) {
        let Some(mut callback) = lock(&self.callback).take() else {
            trace!("No message callback, completion {} not delivered", completion.seqno_up);
            return;
        };
        {
            let _scope = CallbackScope::enter();
            callback(completion);
        }

        let mut slot = lock(&self.callback);
        if slot.is_none() {
            *slot = Some(callback);
        }
    }
}

fn driver_running(slot: &Option<BackgroundDriver>) -> bool {
    slot.as_ref().map_or(false, BackgroundDriver::is_running)
}

/// LoRaWAN end device
pub struct Device<E: MacEngine + Send + 'static> {
    shared: Arc<Shared<E>>,
}

impl<E: MacEngine + Send + 'static> Device<E> {
    /// Initialize the engine and create an idle device with the default
    /// configuration. Fails with `EngineInitFailure` if the engine or its
    /// radio can't be brought up.
    pub fn initialize(mut engine: E) -> Result<Self, DeviceError<E::Error>> {
        trace!("Initializing");
        if let Err(e) = engine.init() {
            error!("Couldn't initialize engine: {:?}", e);
            return Err(DeviceError::EngineInitFailure(e));
        }
        engine.reset_mac_state();

        let mut machine = SessionStateMachine::new();
        machine.configure(&mut engine, Configuration::default());

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core { engine, machine }),
                deferred: Mutex::new(EventQueue::new()),
                outbox: Mutex::new(Outbox::default()),
                driver: Mutex::new(None),
                callback: Mutex::new(None),
            }),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> DeviceState {
        self.shared.read(|m| m.state())
    }

    /// Store a configuration and apply it to the engine
    pub fn configure(&self, config: Configuration) {
        self.shared.with_core(|machine, engine| machine.configure(engine, config));
    }

    /// Current configuration
    pub fn configuration(&self) -> Configuration {
        self.shared.read(|m| m.configuration().clone())
    }

    /// Provision OTAA credentials from hex strings (16/16/32 characters)
    pub fn provision_otaa(&self, dev_eui: &str, app_eui: &str, app_key: &str) -> Result<(), DeviceError<E::Error>> {
        self.shared
            .with_core(|machine, _| machine.provision_otaa(dev_eui, app_eui, app_key))
    }

    /// Provision an ABP session from hex strings (8/32/32 characters) and
    /// start the background driver. The device is ready without a handshake.
    pub fn provision_abp(
        &self,
        dev_addr: &str,
        nwk_skey: &str,
        app_skey: &str,
        seqno_up: u32,
    ) -> Result<(), DeviceError<E::Error>> {
        let session = self
            .shared
            .read(|m| m.prepare_abp::<E::Error>(dev_addr, nwk_skey, app_skey, seqno_up))?;
        self.with_driver(lock(&self.shared.driver), |machine, engine| {
            machine.activate_abp(engine, session)
        })
    }

    /// Start joining with the provisioned OTAA identity. Allowed from idle,
    /// join failed (retry, reusing the running driver) and disconnected.
    pub fn join(&self) -> Result<(), DeviceError<E::Error>> {
        let slot = lock(&self.shared.driver);
        let state = self
            .shared
            .read(|m| m.check_join::<E::Error>().map(|()| m.state()))?;
        if driver_running(&slot) && state != DeviceState::JoinFailed {
            error!("Can't join, background driver already running");
            return Err(DeviceError::DriverRunning);
        }
        self.with_driver(slot, |machine, engine| machine.begin_join(engine))?;
        info!("Joining");
        Ok(())
    }

    /// Restart the background driver of a ready session after it exited
    /// without `stop()`, which happens when a message callback panics.
    /// Does nothing while the driver runs.
    pub fn resume(&self) -> Result<(), DeviceError<E::Error>> {
        let slot = lock(&self.shared.driver);
        if driver_running(&slot) {
            return Ok(());
        }
        self.with_driver(slot, |machine, _| {
            if machine.state() == DeviceState::Ready {
                info!("Resuming session");
                Ok(())
            } else {
                error!("Can't resume in state {}", machine.state());
                Err(DeviceError::InvalidStateTransition {
                    operation: "resume",
                    state: machine.state(),
                })
            }
        })
    }

    /// Send an uplink. Requires `Ready` and an idle engine.
    pub fn send(&self, payload: &[u8], port: u8, confirm: bool) -> Result<(), DeviceError<E::Error>> {
        Self::check_reentrancy()?;
        self.shared
            .with_core(|machine, engine| machine.submit(engine, payload, port, confirm))
    }

    /// Send an empty uplink to solicit a downlink
    pub fn poll(&self, port: u8, confirm: bool) -> Result<(), DeviceError<E::Error>> {
        Self::check_reentrancy()?;
        self.shared
            .with_core(|machine, engine| machine.submit(engine, &[], port, confirm))
    }

    /// Stop the background driver, reset the MAC state and return to idle.
    /// Waits for a running driver tick to finish. Safe to call repeatedly,
    /// from several threads and from the message callback.
    pub fn stop(&self) {
        let driver = lock(&self.shared.driver).take();
        if let Some(driver) = driver {
            driver.stop();
        }
        self.shared.with_core(|machine, engine| machine.stop(engine));
        info!("Stopped");
    }

    /// Whether a background driver is running
    pub fn is_driver_running(&self) -> bool {
        driver_running(&lock(&self.shared.driver))
    }

    /// Register the callback receiving transmit outcomes. It runs with no
    /// device lock held and must not call `send` or `poll`.
    pub fn on_message<F>(&self, callback: F)
    where
        F: FnMut(&TxCompletion) + Send + 'static,
    {
        *lock(&self.shared.callback) = Some(Box::new(callback));
    }

    /// Handle for engines raising events outside of the driver tick
    pub fn event_bridge(&self) -> EventBridge<E> {
        EventBridge::new(&self.shared)
    }

    /// Pending uplink, present iff transceiving
    pub fn pending_message(&self) -> Option<PendingMessage> {
        self.shared.read(|m| m.pending().cloned())
    }

    /// Outcome of the most recent uplink
    pub fn last_completion(&self) -> Option<TxCompletion> {
        self.shared.read(|m| m.last_completion().cloned())
    }

    /// Device EUI as hex
    pub fn device_eui(&self) -> String {
        self.shared.read(|m| m.credentials().device_eui())
    }

    /// Application EUI as hex
    pub fn app_eui(&self) -> String {
        self.shared.read(|m| m.credentials().app_eui())
    }

    /// Application key as hex
    pub fn app_key(&self) -> String {
        self.shared.read(|m| m.credentials().app_key())
    }

    /// Device address as hex
    pub fn device_address(&self) -> String {
        self.shared.read(|m| m.credentials().device_address())
    }

    /// Network session key as hex
    pub fn network_key(&self) -> String {
        self.shared.read(|m| m.credentials().network_key())
    }

    /// Application session key as hex
    pub fn app_session_key(&self) -> String {
        self.shared.read(|m| m.credentials().app_session_key())
    }

    /// Uplink frame counter
    pub fn sequence_number_up(&self) -> u32 {
        self.shared.read(|m| m.credentials().sequence_number_up())
    }

    /// Diagnostic snapshot
    pub fn status(&self) -> Status {
        self.shared.read(Status::capture)
    }

    /// Diagnostic snapshot as text
    pub fn status_description(&self) -> String {
        self.status().to_string()
    }

    fn check_reentrancy() -> Result<(), DeviceError<E::Error>> {
        if IN_CALLBACK.with(Cell::get) {
            error!("send/poll called from a message callback");
            return Err(DeviceError::Reentrant);
        }
        Ok(())
    }

    /// Run a transition that needs the driver. A driver spawned for it is
    /// stopped again, after the slot is released, if the transition fails.
    fn with_driver(
        &self,
        mut slot: MutexGuard<'_, Option<BackgroundDriver>>,
        transition: impl FnOnce(&mut SessionStateMachine, &mut E) -> Result<(), DeviceError<E::Error>>,
    ) -> Result<(), DeviceError<E::Error>> {
        let spawned = if driver_running(&slot) {
            false
        } else {
            let interval = self.shared.read(|m| m.configuration().pump_interval);
            let shared = Arc::clone(&self.shared);
            *slot = Some(BackgroundDriver::spawn(interval, move || shared.tick())?);
            true
        };

        let result = self.shared.transition(|machine, engine, _| transition(machine, engine));
        let abandoned = if result.is_err() && spawned { slot.take() } else { None };
        drop(slot);

        if let Some(driver) = abandoned {
            driver.stop();
        }
        self.shared.flush();
        result
    }
}

impl<E: MacEngine + Send + 'static> Drop for Device<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
