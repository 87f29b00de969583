//! In-memory host audio backend.
//!
//! Each opened channel is a bounded byte queue shared between the device-side
//! [`AudioChannel`] handle and a [`HostEnd`] that stands in for the host audio subsystem. The
//! host end is `Clone + Send` so a separate thread can produce microphone data or drain speaker
//! data while the device model runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{AudioBackend, AudioChannel, ChannelError, Direction, PcmFormat};

/// Default queue bound: one second of 24 kHz mono S16.
pub const DEFAULT_CAPACITY_BYTES: usize = 48_000;

/// Injected failures for exercising device error paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFaults {
    pub available: bool,
    pub pull: bool,
    pub push: bool,
    pub set_format: bool,
    pub resume: bool,
    /// Caps the bytes returned by a single pull; the rest stays queued.
    pub max_pull: Option<usize>,
    /// Bytes discarded from the queue at the start of every pull, as if the host had drained
    /// them after `available()` was sampled.
    pub drain_before_pull: usize,
}

#[derive(Debug)]
struct ChannelState {
    direction: Direction,
    format: PcmFormat,
    queue: VecDeque<u8>,
    capacity: usize,
    resumed: bool,
    open: bool,
    overrun_bytes: u64,
    faults: ChannelFaults,
}

impl ChannelState {
    /// Appends as much of `data` as fits; the excess is dropped and counted.
    fn enqueue(&mut self, data: &[u8]) -> usize {
        let free = self.capacity.saturating_sub(self.queue.len());
        let n = data.len().min(free);
        self.queue.extend(&data[..n]);
        let dropped = data.len() - n;
        if dropped != 0 {
            self.overrun_bytes = self.overrun_bytes.saturating_add(dropped as u64);
        }
        n
    }

    fn dequeue(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.queue.len());
        for (dst, src) in buf.iter_mut().zip(self.queue.drain(..n)) {
            *dst = src;
        }
        n
    }
}

type Shared = Arc<Mutex<ChannelState>>;

fn lock(state: &Shared) -> MutexGuard<'_, ChannelState> {
    // A panicking host thread must not take the device down with it.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device-side handle of an in-memory channel.
#[derive(Debug)]
pub struct MemoryChannel {
    direction: Direction,
    state: Shared,
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let mut st = lock(&self.state);
        st.open = false;
        st.resumed = false;
        st.queue.clear();
    }
}

impl AudioChannel for MemoryChannel {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn format(&self) -> PcmFormat {
        lock(&self.state).format
    }

    fn set_format(&mut self, format: PcmFormat) -> Result<(), ChannelError> {
        format.validate()?;
        let mut st = lock(&self.state);
        if st.faults.set_format {
            return Err(ChannelError::Io("set_format failed".into()));
        }
        st.format = format;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), ChannelError> {
        let mut st = lock(&self.state);
        if st.faults.resume {
            return Err(ChannelError::Io("resume failed".into()));
        }
        st.resumed = true;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), ChannelError> {
        lock(&self.state).queue.clear();
        Ok(())
    }

    fn available(&self) -> Result<usize, ChannelError> {
        let st = lock(&self.state);
        if st.faults.available {
            return Err(ChannelError::Io("available failed".into()));
        }
        Ok(st.queue.len())
    }

    fn pull(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let mut st = lock(&self.state);
        if st.faults.pull {
            return Err(ChannelError::Io("pull failed".into()));
        }
        let drained = st.faults.drain_before_pull.min(st.queue.len());
        st.queue.drain(..drained);
        let limit = st.faults.max_pull.unwrap_or(usize::MAX).min(buf.len());
        Ok(st.dequeue(&mut buf[..limit]))
    }

    fn push(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let mut st = lock(&self.state);
        if st.faults.push {
            return Err(ChannelError::Io("push failed".into()));
        }
        let accepted = st.enqueue(data);
        trace!(
            direction = %self.direction,
            accepted,
            dropped = data.len() - accepted,
            "memory channel push"
        );
        Ok(())
    }
}

/// Host-side view of an in-memory channel.
#[derive(Debug, Clone)]
pub struct HostEnd {
    state: Shared,
}

impl HostEnd {
    pub fn direction(&self) -> Direction {
        lock(&self.state).direction
    }

    pub fn format(&self) -> PcmFormat {
        lock(&self.state).format
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn is_resumed(&self) -> bool {
        lock(&self.state).resumed
    }

    pub fn buffered(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn overrun_bytes(&self) -> u64 {
        lock(&self.state).overrun_bytes
    }

    /// Host produces captured audio. Returns the number of bytes accepted; nothing is accepted
    /// once the device has closed the channel.
    pub fn produce(&self, data: &[u8]) -> usize {
        let mut st = lock(&self.state);
        if !st.open {
            return 0;
        }
        st.enqueue(data)
    }

    /// Host consumes up to `max` bytes of playback audio.
    pub fn consume(&self, max: usize) -> Vec<u8> {
        let mut st = lock(&self.state);
        let n = max.min(st.queue.len());
        st.queue.drain(..n).collect()
    }

    pub fn set_faults(&self, faults: ChannelFaults) {
        lock(&self.state).faults = faults;
    }
}

#[derive(Debug, Default)]
struct BackendState {
    hosts: HashMap<Direction, HostEnd>,
    open_counts: HashMap<Direction, u32>,
    fail_open: HashMap<Direction, bool>,
    faults: HashMap<Direction, ChannelFaults>,
}

/// Backend producing [`MemoryChannel`]s.
///
/// Clones share state, so a test or host thread can keep a clone after handing the backend to a
/// device and reach the host end of whichever channel was opened last.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    capacity: usize,
    state: Arc<Mutex<BackendState>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_BYTES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(BackendState::default())),
        }
    }

    fn backend_state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Host end of the most recently opened channel for `direction`.
    pub fn host(&self, direction: Direction) -> Option<HostEnd> {
        self.backend_state().hosts.get(&direction).cloned()
    }

    pub fn open_count(&self, direction: Direction) -> u32 {
        self.backend_state()
            .open_counts
            .get(&direction)
            .copied()
            .unwrap_or(0)
    }

    /// Make subsequent opens for `direction` fail (or succeed again).
    pub fn set_fail_open(&self, direction: Direction, fail: bool) {
        self.backend_state().fail_open.insert(direction, fail);
    }

    /// Faults installed on every channel opened for `direction` from now on.
    pub fn set_open_faults(&self, direction: Direction, faults: ChannelFaults) {
        self.backend_state().faults.insert(direction, faults);
    }
}

impl AudioBackend for MemoryBackend {
    fn open(
        &mut self,
        direction: Direction,
        format: PcmFormat,
    ) -> Result<Box<dyn AudioChannel>, ChannelError> {
        format.validate()?;
        let mut backend = self.backend_state();
        if backend.fail_open.get(&direction).copied().unwrap_or(false) {
            return Err(ChannelError::Unavailable(format!(
                "no default {direction} device"
            )));
        }

        let state = Arc::new(Mutex::new(ChannelState {
            direction,
            format,
            queue: VecDeque::with_capacity(self.capacity.min(DEFAULT_CAPACITY_BYTES)),
            capacity: self.capacity,
            resumed: false,
            open: true,
            overrun_bytes: 0,
            faults: backend.faults.get(&direction).copied().unwrap_or_default(),
        }));

        backend.hosts.insert(
            direction,
            HostEnd {
                state: Arc::clone(&state),
            },
        );
        *backend.open_counts.entry(direction).or_insert(0) += 1;

        Ok(Box::new(MemoryChannel { direction, state }))
    }
}
