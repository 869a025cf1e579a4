use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::frame::{Frame, Orientation};
use crate::fusion::{FusionEngine, FusionReport};

/// Keeps a live preview responsive while fusion passes run out of band.
///
/// At most one pass is in flight. `poll` never waits for inference: it starts
/// a pass when none is running and always hands back the most recent
/// completed report, so boxes persist across frames until replaced.
pub struct FrameScheduler {
    engine: Arc<FusionEngine>,
    runtime: Handle,
    state: Arc<Mutex<SchedulerState>>,
}

#[derive(Default)]
struct SchedulerState {
    next_seq: u64,
    in_flight: Option<u64>,
    latest: Option<(u64, Arc<FusionReport>)>,
    completed: u64,
    failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub busy: bool,
}

impl FrameScheduler {
    pub fn new(engine: Arc<FusionEngine>, runtime: Handle) -> Self {
        Self { engine, runtime, state: Arc::new(Mutex::new(SchedulerState::default())) }
    }

    pub fn poll(&self, frame: &Frame, orientation: Orientation) -> Option<Arc<FusionReport>> {
        let (slot, latest) = self.reserve();
        // the frame copy happens with the state unlocked
        if let Some(seq) = slot {
            self.dispatch(seq, frame.clone(), orientation);
        }
        latest
    }

    /// Claim the in-flight slot if it is free, and read the last report.
    fn reserve(&self) -> (Option<u64>, Option<Arc<FusionReport>>) {
        let mut st = lock(&self.state);
        let slot = st.in_flight.is_none().then(|| {
            let seq = st.next_seq;
            st.next_seq += 1;
            st.in_flight = Some(seq);
            seq
        });
        (slot, st.latest.as_ref().map(|(_, r)| r.clone()))
    }

    pub fn latest(&self) -> Option<Arc<FusionReport>> {
        lock(&self.state).latest.as_ref().map(|(_, r)| r.clone())
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    pub fn stats(&self) -> SchedulerStats {
        let st = lock(&self.state);
        SchedulerStats {
            started: st.next_seq,
            completed: st.completed,
            failed: st.failed,
            busy: st.in_flight.is_some(),
        }
    }

    fn dispatch(&self, seq: u64, frame: Frame, orientation: Orientation) {
        let engine = self.engine.clone();
        let state = self.state.clone();
        debug!("scheduler: pass {} started", seq);

        self.runtime.spawn_blocking(move || {
            let _slot = InFlight { state: state.clone(), seq };
            let outcome = engine.fuse(frame, orientation);

            let mut st = lock(&state);
            match outcome {
                Ok(pass) => {
                    st.completed += 1;
                    // last writer wins: never replace a newer pass's result
                    if st.latest.as_ref().map_or(true, |(s, _)| seq > *s) {
                        st.latest = Some((seq, Arc::new(pass.report)));
                    }
                    debug!("scheduler: pass {} done", seq);
                }
                Err(e) => {
                    st.failed += 1;
                    warn!("scheduler: pass {} failed, keeping previous result: {}", seq, e);
                }
            }
        });
    }
}

/// Frees the in-flight slot when the task ends, including by panic.
struct InFlight {
    state: Arc<Mutex<SchedulerState>>,
    seq: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut st = lock(&self.state);
        if st.in_flight == Some(self.seq) {
            st.in_flight = None;
        }
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
