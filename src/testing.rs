//! Test doubles for the platform seams.

use crate::error::{NodeError, Result};
use crate::led::LedDriver;
use crate::mesh::driver::{MeshDriver, Received};
use crate::mesh::types::{DeviceType, MacAddr};
use crate::platform::{FirmwareSlot, Level, PinReader, Platform, SettingsStore, StatusPin};
use crate::plugin::Plugin;
use crate::timer::{Timer, TimerCallback, TimerService};
use rgb::RGB8;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// LED
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LedLog(Arc<Mutex<Vec<RGB8>>>);

impl LedLog {
    pub fn last(&self) -> Option<RGB8> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn all(&self) -> Vec<RGB8> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub struct RecordingLed {
    log: LedLog,
}

impl RecordingLed {
    pub fn new() -> (Self, LedLog) {
        let log = LedLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl LedDriver for RecordingLed {
    fn write(&mut self, color: RGB8) -> Result<()> {
        self.log.0.lock().unwrap().push(color);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Default)]
struct Schedule {
    due: Option<Duration>,
    period: Option<Duration>,
}

struct Entry {
    name: &'static str,
    callback: Mutex<Option<TimerCallback>>,
    schedule: Mutex<Schedule>,
    deleted: AtomicBool,
}

#[derive(Default)]
struct Clock {
    now: Mutex<Duration>,
    entries: Mutex<Vec<Arc<Entry>>>,
}

impl Clock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn live(&self) -> Vec<Arc<Entry>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.deleted.load(Ordering::SeqCst))
            .cloned()
            .collect()
    }
}

/// Timer service driven by a virtual clock. No locks are held while a
/// callback runs, so callbacks may re-arm or cancel their own timer.
#[derive(Clone, Default)]
pub struct ManualTimerService {
    clock: Arc<Clock>,
}

impl ManualTimerService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Move the clock forward, firing every timer that falls due on the way in order.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.now() + by;
        loop {
            let mut next: Option<(Duration, Arc<Entry>)> = None;
            for entry in self.clock.live() {
                if let Some(due) = entry.schedule.lock().unwrap().due {
                    if due <= target && next.as_ref().map_or(true, |(d, _)| due < *d) {
                        next = Some((due, entry.clone()));
                    }
                }
            }
            let Some((due, entry)) = next else { break };
            *self.clock.now.lock().unwrap() = due;
            Self::reschedule(&entry, due);
            Self::run(&entry);
        }
        *self.clock.now.lock().unwrap() = target;
    }

    /// Fire every armed timer with this name immediately. Returns how many ran.
    pub fn fire(&self, name: &str) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        for entry in self.clock.live() {
            let armed = entry.schedule.lock().unwrap().due.is_some();
            if entry.name == name && armed {
                Self::reschedule(&entry, now);
                Self::run(&entry);
                fired += 1;
            }
        }
        fired
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.clock
            .live()
            .iter()
            .any(|e| e.name == name && e.schedule.lock().unwrap().due.is_some())
    }

    /// Timers with this name that have not been dropped.
    pub fn live(&self, name: &str) -> usize {
        self.clock.live().iter().filter(|e| e.name == name).count()
    }

    fn reschedule(entry: &Entry, fired_at: Duration) {
        let mut schedule = entry.schedule.lock().unwrap();
        schedule.due = schedule.period.map(|p| fired_at + p);
    }

    fn run(entry: &Entry) {
        let callback = entry.callback.lock().unwrap().take();
        if let Some(mut callback) = callback {
            callback();
            *entry.callback.lock().unwrap() = Some(callback);
        }
    }
}

impl TimerService for ManualTimerService {
    fn timer(&self, name: &'static str, callback: TimerCallback) -> Result<Box<dyn Timer>> {
        let entry = Arc::new(Entry {
            name,
            callback: Mutex::new(Some(callback)),
            schedule: Mutex::new(Schedule::default()),
            deleted: AtomicBool::new(false),
        });
        self.clock.entries.lock().unwrap().push(entry.clone());
        Ok(Box::new(ManualTimer {
            entry,
            clock: self.clock.clone(),
        }))
    }
}

struct ManualTimer {
    entry: Arc<Entry>,
    clock: Arc<Clock>,
}

impl Timer for ManualTimer {
    fn every(&self, period: Duration) -> Result<()> {
        let now = self.clock.now();
        *self.entry.schedule.lock().unwrap() = Schedule {
            due: Some(now + period),
            period: Some(period),
        };
        Ok(())
    }

    fn after(&self, delay: Duration) -> Result<()> {
        let now = self.clock.now();
        *self.entry.schedule.lock().unwrap() = Schedule {
            due: Some(now + delay),
            period: None,
        };
        Ok(())
    }

    fn cancel(&self) -> Result<bool> {
        let mut schedule = self.entry.schedule.lock().unwrap();
        let was_armed = schedule.due.is_some();
        *schedule = Schedule::default();
        Ok(was_armed)
    }

    fn is_scheduled(&self) -> bool {
        self.entry.schedule.lock().unwrap().due.is_some()
    }
}

impl Drop for ManualTimer {
    fn drop(&mut self) {
        self.entry.deleted.store(true, Ordering::SeqCst);
        *self.entry.schedule.lock().unwrap() = Schedule::default();
    }
}

// ---------------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------------

struct MeshState {
    root: bool,
    me: MacAddr,
    children: Vec<MacAddr>,
    failing: HashMap<MacAddr, NodeError>,
    sent: Vec<(MacAddr, Vec<u8>)>,
    self_organized: Vec<(bool, bool)>,
    fix_root: bool,
    fix_root_calls: Vec<bool>,
    device_type: Option<DeviceType>,
    channel_switch: Option<bool>,
    inbox: VecDeque<Received>,
}

type SendHook = Box<dyn Fn(&MacAddr, &[u8]) + Send + Sync>;

/// Mesh stack stand-in that records every call.
pub struct ScriptedMesh {
    state: Mutex<MeshState>,
    on_send: Mutex<Option<Arc<SendHook>>>,
}

impl ScriptedMesh {
    fn with_root(root: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MeshState {
                root,
                me: MacAddr([0xAA, 0, 0, 0, 0, 0x01]),
                children: Vec::new(),
                failing: HashMap::new(),
                sent: Vec::new(),
                self_organized: Vec::new(),
                fix_root: false,
                fix_root_calls: Vec::new(),
                device_type: None,
                channel_switch: None,
                inbox: VecDeque::new(),
            }),
            on_send: Mutex::new(None),
        })
    }

    pub fn root() -> Arc<Self> {
        Self::with_root(true)
    }

    pub fn leaf() -> Arc<Self> {
        Self::with_root(false)
    }

    /// Runs `hook` after every successful send, outside the state lock.
    pub fn on_send(&self, hook: impl Fn(&MacAddr, &[u8]) + Send + Sync + 'static) {
        *self.on_send.lock().unwrap() = Some(Arc::new(Box::new(hook)));
    }

    pub fn set_root(&self, root: bool) {
        self.state.lock().unwrap().root = root;
    }

    pub fn set_children(&self, children: &[MacAddr]) {
        self.state.lock().unwrap().children = children.to_vec();
    }

    pub fn fail_sends_to(&self, peer: MacAddr, err: NodeError) {
        self.state.lock().unwrap().failing.insert(peer, err);
    }

    pub fn push_rx(&self, from: MacAddr, data: &[u8]) {
        self.state.lock().unwrap().inbox.push_back(Received {
            from,
            data: data.to_vec(),
        });
    }

    pub fn sent(&self) -> Vec<(MacAddr, Vec<u8>)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }

    pub fn self_organized_calls(&self) -> Vec<(bool, bool)> {
        self.state.lock().unwrap().self_organized.clone()
    }

    pub fn fix_root_calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().fix_root_calls.clone()
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.state.lock().unwrap().device_type
    }

    pub fn channel_switch(&self) -> Option<bool> {
        self.state.lock().unwrap().channel_switch
    }
}

impl MeshDriver for ScriptedMesh {
    fn is_root(&self) -> bool {
        self.state.lock().unwrap().root
    }

    fn self_addr(&self) -> MacAddr {
        self.state.lock().unwrap().me
    }

    fn routing_table(&self) -> Result<Vec<MacAddr>> {
        let state = self.state.lock().unwrap();
        let mut table = vec![state.me];
        table.extend(state.children.iter().copied());
        Ok(table)
    }

    fn send(&self, dest: &MacAddr, frame: &[u8]) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.failing.get(dest) {
                return Err(*err);
            }
            state.sent.push((*dest, frame.to_vec()));
        }
        let hook = self.on_send.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(dest, frame);
        }
        Ok(())
    }

    fn recv(&self, _timeout: Duration) -> Result<Received> {
        self.state
            .lock()
            .unwrap()
            .inbox
            .pop_front()
            .ok_or(NodeError::TransportFailure(0x107))
    }

    fn set_self_organized(&self, enable: bool, select_parent: bool) -> Result<()> {
        self.state.lock().unwrap().self_organized.push((enable, select_parent));
        Ok(())
    }

    fn set_fix_root(&self, enable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.fix_root = enable;
        state.fix_root_calls.push(enable);
        Ok(())
    }

    fn is_root_fixed(&self) -> bool {
        self.state.lock().unwrap().fix_root
    }

    fn set_device_type(&self, kind: DeviceType) -> Result<()> {
        self.state.lock().unwrap().device_type = Some(kind);
        Ok(())
    }

    fn set_channel_switch(&self, allow: bool) -> Result<()> {
        self.state.lock().unwrap().channel_switch = Some(allow);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPlatform {
    restarts: AtomicUsize,
    delays: Mutex<Vec<Duration>>,
}

impl RecordingPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

impl Platform for RecordingPlatform {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn delay(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

pub struct FixedPins(pub Level, pub Level);

impl PinReader for FixedPins {
    fn sample(&mut self) -> Result<(Level, Level)> {
        Ok((self.0, self.1))
    }
}

#[derive(Clone, Default)]
pub struct MemStore {
    u8s: Arc<Mutex<HashMap<String, u8>>>,
    strs: Arc<Mutex<HashMap<String, String>>>,
}

impl SettingsStore for MemStore {
    fn get_u8(&mut self, key: &str) -> Result<Option<u8>> {
        Ok(self.u8s.lock().unwrap().get(key).copied())
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        self.u8s.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn get_str(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.strs.lock().unwrap().get(key).cloned())
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.strs.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.u8s.lock().unwrap().remove(key);
        self.strs.lock().unwrap().remove(key);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeSlot {
    pub marked_valid: Arc<AtomicUsize>,
    pub rollbacks: Arc<AtomicUsize>,
}

impl FirmwareSlot for FakeSlot {
    fn mark_valid(&mut self) -> Result<()> {
        self.marked_valid.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingPin(pub Arc<Mutex<Vec<bool>>>);

impl RecordingPin {
    pub fn levels(&self) -> Vec<bool> {
        self.0.lock().unwrap().clone()
    }
}

impl StatusPin for RecordingPin {
    fn set(&mut self, on: bool) -> Result<()> {
        self.0.lock().unwrap().push(on);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// Plugin that records every hook call as a string.
pub struct TestPlugin {
    name: String,
    calls: Mutex<Vec<String>>,
    fail_init: AtomicBool,
    fail_activate: AtomicBool,
}

impl TestPlugin {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            fail_init: AtomicBool::new(false),
            fail_activate: AtomicBool::new(false),
        })
    }

    pub fn fail_init(&self) {
        self.fail_init.store(true, Ordering::SeqCst);
    }

    pub fn fail_activate(&self) {
        self.fail_activate.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn command_handler(&self, data: &[u8]) -> Result<()> {
        let hex: String = data.iter().map(|b| format!("{:02X}", b)).collect();
        self.record(format!("data:{}", hex));
        Ok(())
    }

    fn init(&self) -> Result<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(NodeError::Fatal);
        }
        Ok(())
    }

    fn deinit(&self) -> Result<()> {
        self.record("deinit".into());
        Ok(())
    }

    fn on_activate(&self) -> Result<()> {
        if self.fail_activate.load(Ordering::SeqCst) {
            return Err(NodeError::Fatal);
        }
        self.record("activate".into());
        Ok(())
    }

    fn on_deactivate(&self) -> Result<()> {
        self.record("deactivate".into());
        Ok(())
    }

    fn on_start(&self) -> Result<()> {
        self.record("start".into());
        Ok(())
    }

    fn on_stop(&self) -> Result<()> {
        self.record("stop".into());
        Ok(())
    }

    fn on_pause(&self) -> Result<()> {
        self.record("pause".into());
        Ok(())
    }

    fn on_reset(&self) -> Result<()> {
        self.record("reset".into());
        Ok(())
    }

    fn heartbeat_handler(&self, pointer: Option<u8>, counter: u8) {
        self.record(format!("heartbeat:{:?}:{}", pointer, counter));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_manual_timers_fire_in_order() {
        let service = ManualTimerService::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let periodic = service
            .timer("tick", Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        periodic.every(Duration::from_millis(100)).unwrap();

        service.advance(Duration::from_millis(350));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        periodic.cancel().unwrap();
        service.advance(Duration::from_millis(500));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        drop(periodic);
        assert_eq!(service.live("tick"), 0);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let service = ManualTimerService::new();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let once = service
            .timer("once", Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        once.after(Duration::from_millis(10)).unwrap();
        service.advance(Duration::from_secs(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!once.is_scheduled());
    }
}
