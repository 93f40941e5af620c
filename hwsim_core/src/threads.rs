//! Simulation threads: clock, timer driver, pipeline workers and one
//! update thread per object.
//!
//! # Thread states
//!
//! ```text
//!   Created ──► Running ⇄ Paused
//!                  │         │
//!                  └──► Stopped ◄┘
//! ```
//!
//! # Pause protocol
//!
//! The pauser bumps a shared epoch to an odd value. Every thread checks the
//! epoch at the top of its loop, stores it as acknowledged and idles in a
//! fixed sleep loop until the epoch changes. The pauser polls until every
//! live thread has acknowledged, so once `pause()` returns no object update
//! or pipeline pass is running.
//!
//! # Stop order
//!
//! Non-clock threads are stopped and joined first, then the clock. The
//! clock keeps publishing (and notifying) until the end, so no thread can
//! be left waiting on a clock that already exited.

use crate::clock::VirtualClock;
use crate::error::{CoreError, CoreResult};
use crate::notify::WakeSignal;
use crate::timers::TimerWheel;
use hwsim_common::consts::PAUSE_POLL_US;
use hwsim_common::object::ObjectId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep; bounds how long stop/pause take to be noticed.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Spawned, body not entered yet.
    Created = 0,
    /// Running its loop.
    Running = 1,
    /// Idling on the pause gate.
    Paused = 2,
    /// Loop exited.
    Stopped = 3,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ThreadState::Created,
            1 => ThreadState::Running,
            2 => ThreadState::Paused,
            _ => ThreadState::Stopped,
        }
    }
}

/// What a simulation thread drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// Virtual clock publisher.
    Clock,
    /// Timer wheel driver.
    Timers,
    /// Command / event / completion worker.
    Worker,
    /// Update thread of one object.
    Object(ObjectId),
}

/// Shared pause epoch. Odd = paused.
#[derive(Debug, Default)]
pub struct PauseGate {
    epoch: AtomicU64,
}

impl PauseGate {
    /// Gate in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        self.epoch() % 2 == 1
    }

    /// Enter the paused state. Returns the pause epoch.
    pub(crate) fn close(&self) -> u64 {
        let current = self.epoch();
        if current % 2 == 1 {
            return current;
        }
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Leave the paused state.
    pub(crate) fn open(&self) {
        let current = self.epoch();
        if current % 2 == 1 {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[derive(Debug)]
struct ThreadControl {
    name: String,
    role: ThreadRole,
    state: AtomicU8,
    stop: AtomicBool,
    acked: AtomicU64,
}

/// Outcome of a loop checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Carry on.
    Run,
    /// Carry on after a pause; timing references should be reset.
    Resumed,
    /// Leave the loop.
    Stop,
}

/// Handle a thread body uses to cooperate with stop and pause.
#[derive(Clone)]
pub struct ThreadCtl {
    control: Arc<ThreadControl>,
    gate: Arc<PauseGate>,
}

impl ThreadCtl {
    /// Thread name.
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// True once stop was requested.
    pub fn should_stop(&self) -> bool {
        self.control.stop.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ThreadState) {
        self.control.state.store(state as u8, Ordering::Release);
    }

    /// Honour stop and pause requests. Call at the top of every loop pass.
    pub fn checkpoint(&self) -> Checkpoint {
        if self.should_stop() {
            return Checkpoint::Stop;
        }
        let epoch = self.gate.epoch();
        if epoch % 2 == 0 {
            return Checkpoint::Run;
        }

        self.set_state(ThreadState::Paused);
        self.control.acked.store(epoch, Ordering::Release);
        let poll = Duration::from_micros(PAUSE_POLL_US);
        while self.gate.epoch() == epoch {
            if self.should_stop() {
                return Checkpoint::Stop;
            }
            thread::sleep(poll);
        }
        self.set_state(ThreadState::Running);
        Checkpoint::Resumed
    }

    /// Sleep for `duration` in short slices, returning early on stop or a
    /// pause request.
    pub fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let epoch = self.gate.epoch();
        loop {
            let now = Instant::now();
            if now >= deadline || self.should_stop() || self.gate.epoch() != epoch {
                return;
            }
            thread::sleep((deadline - now).min(MAX_SLEEP_SLICE));
        }
    }

    /// Run `pass` every `period` until stopped.
    ///
    /// Deadlines advance by whole periods; a pass that overruns restarts
    /// the schedule from now instead of trying to catch up.
    pub fn run_paced(&self, period: Duration, mut pass: impl FnMut()) {
        let mut next = Instant::now();
        loop {
            match self.checkpoint() {
                Checkpoint::Stop => break,
                Checkpoint::Resumed => next = Instant::now(),
                Checkpoint::Run => {}
            }
            pass();
            next += period;
            let now = Instant::now();
            if next > now {
                self.sleep(next - now);
            } else {
                next = now;
            }
        }
    }
}

/// Marks the thread stopped however its body exits.
struct StoppedOnExit(Arc<ThreadControl>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0
            .state
            .store(ThreadState::Stopped as u8, Ordering::Release);
    }
}

/// Best-effort real-time request for the calling thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtRequest {
    /// `SCHED_FIFO` priority.
    pub priority: Option<i32>,
    /// CPU to pin to.
    pub cpu: Option<usize>,
}

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
fn rt_set_affinity(cpu: usize) -> Result<(), String> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| format!("CpuSet::set({cpu}) failed: {e}"))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| format!("sched_setaffinity failed: {e}"))
}

#[cfg(not(target_os = "linux"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), String> {
    Err("CPU affinity is only supported on Linux".to_string())
}

/// Switch the calling thread to `SCHED_FIFO` at `priority`.
#[cfg(target_os = "linux")]
fn rt_set_scheduler(priority: i32) -> Result<(), String> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 is the calling thread; `param` outlives the call.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), String> {
    Err("SCHED_FIFO is only supported on Linux".to_string())
}

/// Apply `request` to the calling thread, logging and ignoring failures.
pub fn apply_rt(name: &str, request: RtRequest) {
    if let Some(cpu) = request.cpu {
        match rt_set_affinity(cpu) {
            Ok(()) => debug!(thread = name, cpu, "pinned to CPU"),
            Err(e) => warn!(thread = name, "{e}; keeping default affinity"),
        }
    }
    if let Some(priority) = request.priority {
        match rt_set_scheduler(priority) {
            Ok(()) => debug!(thread = name, priority, "SCHED_FIFO enabled"),
            Err(e) => warn!(thread = name, "{e}; keeping default scheduling"),
        }
    }
}

struct SimThread {
    control: Arc<ThreadControl>,
    handle: Option<JoinHandle<()>>,
}

/// Set of running simulation threads sharing one pause gate.
pub struct ThreadSet {
    gate: Arc<PauseGate>,
    threads: Vec<SimThread>,
}

impl ThreadSet {
    /// Empty set bound to `gate`.
    pub fn new(gate: Arc<PauseGate>) -> Self {
        Self {
            gate,
            threads: Vec::new(),
        }
    }

    /// Spawn a named thread running `body`.
    ///
    /// # Errors
    /// `CoreError::ThreadSpawn` if the OS refuses the thread.
    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        role: ThreadRole,
        rt: RtRequest,
        body: impl FnOnce(ThreadCtl) + Send + 'static,
    ) -> CoreResult<()> {
        let name = name.into();
        let control = Arc::new(ThreadControl {
            name: name.clone(),
            role,
            state: AtomicU8::new(ThreadState::Created as u8),
            stop: AtomicBool::new(false),
            acked: AtomicU64::new(0),
        });
        let ctl = ThreadCtl {
            control: Arc::clone(&control),
            gate: Arc::clone(&self.gate),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _stopped = StoppedOnExit(Arc::clone(&ctl.control));
                apply_rt(ctl.name(), rt);
                ctl.set_state(ThreadState::Running);
                body(ctl);
            })
            .map_err(|source| CoreError::ThreadSpawn {
                name: name.clone(),
                source,
            })?;

        debug!(thread = %name, ?role, "thread spawned");
        self.threads.push(SimThread {
            control,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Number of threads in the set.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// True when no thread was spawned.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// State of the thread called `name`.
    pub fn state_of(&self, name: &str) -> Option<ThreadState> {
        self.threads
            .iter()
            .find(|t| t.control.name == name)
            .map(|t| ThreadState::from_u8(t.control.state.load(Ordering::Acquire)))
    }

    /// Pause every thread and wait until each one has acknowledged.
    pub fn pause(&self) {
        let epoch = self.gate.close();
        let poll = Duration::from_micros(PAUSE_POLL_US);
        loop {
            let waiting = self.threads.iter().any(|t| {
                let state = ThreadState::from_u8(t.control.state.load(Ordering::Acquire));
                state != ThreadState::Stopped && t.control.acked.load(Ordering::Acquire) != epoch
            });
            if !waiting {
                break;
            }
            thread::sleep(poll);
        }
        debug!(epoch, threads = self.threads.len(), "all threads paused");
    }

    /// Release paused threads.
    pub fn resume(&self) {
        self.gate.open();
    }

    fn join(thread: &mut SimThread, panicked: &mut Vec<String>) {
        if let Some(handle) = thread.handle.take() {
            if handle.join().is_err() {
                warn!(thread = %thread.control.name, "thread panicked");
                panicked.push(thread.control.name.clone());
            }
        }
    }

    /// Stop and join the update thread of `object`.
    pub fn stop_object(&mut self, object: ObjectId, wake: &WakeSignal) -> CoreResult<()> {
        let Some(pos) = self
            .threads
            .iter()
            .position(|t| t.control.role == ThreadRole::Object(object))
        else {
            return Ok(());
        };
        let mut thread = self.threads.remove(pos);
        thread.control.stop.store(true, Ordering::Release);
        wake.notify_all();

        let mut panicked = Vec::new();
        Self::join(&mut thread, &mut panicked);
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ThreadJoin(panicked))
        }
    }

    /// Stop every thread: everything but the clock first, the clock last.
    pub fn stop_all(&mut self, wake: &WakeSignal) -> CoreResult<()> {
        // Paused threads must see the stop flag; they poll it while idle.
        for t in &self.threads {
            if t.control.role != ThreadRole::Clock {
                t.control.stop.store(true, Ordering::Release);
            }
        }
        wake.notify_all();

        let mut panicked = Vec::new();
        for t in self
            .threads
            .iter_mut()
            .filter(|t| t.control.role != ThreadRole::Clock)
        {
            Self::join(t, &mut panicked);
        }

        for t in self
            .threads
            .iter_mut()
            .filter(|t| t.control.role == ThreadRole::Clock)
        {
            t.control.stop.store(true, Ordering::Release);
            Self::join(t, &mut panicked);
        }

        let count = self.threads.len();
        self.threads.clear();
        self.gate.open();
        info!(threads = count, "simulation threads stopped");

        if panicked.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ThreadJoin(panicked))
        }
    }
}

impl Drop for ThreadSet {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let wake = WakeSignal::new();
            let _ = self.stop_all(&wake);
        }
    }
}

// ─── Thread bodies ──────────────────────────────────────────────────

/// Clock thread: every `1 / timer_frequency` add the elapsed wall time to
/// the running time (pauses excluded), publish and wake waiters.
pub fn clock_loop(ctl: &ThreadCtl, clock: &VirtualClock, period: Duration) {
    let mut runtime_ns = clock.snapshot().runtime_ns;
    let mut last = Instant::now();
    let mut next = last;

    loop {
        match ctl.checkpoint() {
            Checkpoint::Stop => break,
            Checkpoint::Resumed => {
                last = Instant::now();
                next = last;
            }
            Checkpoint::Run => {}
        }

        next += period;
        let now = Instant::now();
        if next > now {
            ctl.sleep(next - now);
        } else {
            next = now;
        }
        if ctl.gate.is_paused() {
            // Time slept before the pause was noticed still counts.
            let now = Instant::now();
            runtime_ns += (now - last).as_nanos() as u64;
            last = now;
            clock.publish(runtime_ns);
            continue;
        }

        let start = Instant::now();
        runtime_ns += (start - last).as_nanos() as u64;
        last = start;
        clock.publish(runtime_ns);
        clock.record_loop(start.elapsed(), period);
    }
}

/// Timer driver: run the wheel once per clock publication.
pub fn timer_loop(ctl: &ThreadCtl, clock: &VirtualClock, timers: &TimerWheel) {
    let signal = clock.signal();
    let mut seen = signal.generation();
    loop {
        match ctl.checkpoint() {
            Checkpoint::Stop => break,
            Checkpoint::Resumed => seen = signal.generation(),
            Checkpoint::Run => {}
        }
        if let Some(generation) = signal.wait_timeout(seen, MAX_SLEEP_SLICE) {
            seen = generation;
            timers.run(clock.ticks());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickMask;
    use std::sync::atomic::AtomicUsize;

    fn set() -> ThreadSet {
        ThreadSet::new(Arc::new(PauseGate::new()))
    }

    #[test]
    fn gate_epochs() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        assert_eq!(gate.close(), 1);
        assert_eq!(gate.close(), 1);
        assert!(gate.is_paused());
        gate.open();
        gate.open();
        assert_eq!(gate.epoch(), 2);
    }

    #[test]
    fn pause_freezes_paced_threads() {
        let mut threads = set();
        let passes = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let passes = Arc::clone(&passes);
            threads
                .spawn(format!("worker-{i}"), ThreadRole::Worker, RtRequest::default(), move |ctl| {
                    ctl.run_paced(Duration::from_micros(200), || {
                        passes.fetch_add(1, Ordering::SeqCst);
                    });
                })
                .unwrap();
        }

        thread::sleep(Duration::from_millis(10));
        threads.pause();
        let frozen = passes.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(passes.load(Ordering::SeqCst), frozen);
        assert_eq!(threads.state_of("worker-0"), Some(ThreadState::Paused));

        threads.resume();
        thread::sleep(Duration::from_millis(10));
        assert!(passes.load(Ordering::SeqCst) > frozen);

        threads.stop_all(&WakeSignal::new()).unwrap();
        assert!(threads.is_empty());
    }

    #[test]
    fn stop_while_paused_joins() {
        let mut threads = set();
        threads
            .spawn("idle", ThreadRole::Worker, RtRequest::default(), |ctl| {
                ctl.run_paced(Duration::from_millis(1), || {});
            })
            .unwrap();
        threads.pause();
        threads.stop_all(&WakeSignal::new()).unwrap();
    }

    #[test]
    fn clock_is_stopped_last() {
        let mut threads = set();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for (name, role) in [("clock", ThreadRole::Clock), ("worker", ThreadRole::Worker)] {
            let order = Arc::clone(&order);
            threads
                .spawn(name, role, RtRequest::default(), move |ctl| {
                    while ctl.checkpoint() != Checkpoint::Stop {
                        thread::sleep(Duration::from_micros(100));
                    }
                    order.lock().push(ctl.name().to_string());
                })
                .unwrap();
        }
        threads.stop_all(&WakeSignal::new()).unwrap();
        assert_eq!(*order.lock(), vec!["worker", "clock"]);
    }

    #[test]
    fn panicking_thread_is_reported() {
        let mut threads = set();
        threads
            .spawn("bad", ThreadRole::Worker, RtRequest::default(), |_| panic!("boom"))
            .unwrap();
        thread::sleep(Duration::from_millis(5));
        threads.pause();
        match threads.stop_all(&WakeSignal::new()) {
            Err(CoreError::ThreadJoin(names)) => assert_eq!(names, vec!["bad"]),
            other => panic!("expected join error, got {other:?}"),
        }
    }

    #[test]
    fn clock_and_timer_threads_drive_the_wheel() {
        let clock = Arc::new(VirtualClock::new(TickMask::new(32).unwrap(), 1_000_000));
        let timers = Arc::new(TimerWheel::new(clock.mask()));
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            timers.register(1_000, Box::new(move |now: u64| {
                fired.fetch_add(1, Ordering::SeqCst);
                now + 1_000
            }));
        }

        let mut threads = set();
        {
            let clock = Arc::clone(&clock);
            threads
                .spawn("clock", ThreadRole::Clock, RtRequest::default(), move |ctl| {
                    clock_loop(&ctl, &clock, Duration::from_millis(1));
                })
                .unwrap();
        }
        {
            let clock = Arc::clone(&clock);
            let timers = Arc::clone(&timers);
            threads
                .spawn("timers", ThreadRole::Timers, RtRequest::default(), move |ctl| {
                    timer_loop(&ctl, &clock, &timers);
                })
                .unwrap();
        }

        thread::sleep(Duration::from_millis(50));
        threads.stop_all(clock.signal()).unwrap();
        assert!(clock.snapshot().runtime_ns > 0);
        assert!(fired.load(Ordering::SeqCst) > 0);
        assert!(clock.stats().loops > 0);
    }
}
