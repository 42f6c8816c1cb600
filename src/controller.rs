//! The capture controller: a single-threaded command dispatcher that owns
//! the camera.
//!
//! All SDK calls originate here. Other threads observe the daemon through
//! state snapshots and drive it by posting commands; the dispatcher reads one
//! command per iteration, runs its handler, and releases the slot so
//! synchronous producers wake up. When the queue is idle it pumps the vendor
//! event loop instead.

use crate::command::Command;
use crate::queue::CommandQueue;
use crate::sdk::{CameraProp, CameraSdk, CameraSession, SdkError};
use crate::state::{SharedState, StateHandle};
use crate::tables::{self, BULB_PARAM, ISO_AUTO_PARAM};
use crate::timing::{self, LatencyRing, SleepGate};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Dequeue timeout; bounds how stale the event pump and the `running` check
/// can get while idle.
const DISPATCH_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
enum CaptureError {
    #[error(transparent)]
    Sdk(#[from] SdkError),
    /// The exposure or delay sleep was cancelled; the sequence stops and no
    /// follow-up is posted.
    #[error("sleep interrupted")]
    SleepInterrupted,
}

pub struct Controller<S: CameraSdk> {
    sdk: S,
    session: Option<S::Session>,
    /// Index of the accepted camera in the backend's last detection.
    camera_index: Option<usize>,
    state: StateHandle,
    queue: Arc<CommandQueue>,
    gate: Arc<SleepGate>,
    latency: LatencyRing,
}

impl<S: CameraSdk> Controller<S> {
    pub fn new(sdk: S, state: StateHandle, queue: Arc<CommandQueue>, gate: Arc<SleepGate>) -> Self {
        Self {
            sdk,
            session: None,
            camera_index: None,
            state,
            queue,
            gate,
            latency: LatencyRing::new(),
        }
    }

    /// Dispatch loop. Must run on the thread that owns the SDK (the main
    /// thread); returns once `running` is cleared, after releasing the
    /// camera.
    pub fn run(&mut self) {
        while self.state.snapshot().running {
            let Some((slot, command)) = self.queue.dequeue(DISPATCH_TICK) else {
                self.pump_events();
                continue;
            };
            tracing::debug!(%command, slot, "dispatching");
            self.dispatch(command);
            self.queue.release(slot);
        }

        // Only this thread may touch the SDK, so the signal handler defers
        // shutdown cleanup to here.
        self.disconnect();
        self.deinitialize();
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::NoOp => {}
            Command::Initialize => self.initialize(),
            Command::Deinitialize => self.deinitialize(),
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::InitialDelay => self.initial_delay(),
            Command::IntervalDelay => self.interval_delay(),
            Command::TakePicture => self.take_picture(),
            Command::StartShooting => self.start_shooting(),
            Command::StopShooting => self.stop_shooting(),
            Command::Terminate => self.terminate(),
        }
    }

    fn pump_events(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Err(error) = session.drain_events() {
                tracing::warn!(%error, "event pump failed");
            }
        }
    }

    fn initialize(&mut self) {
        if !self.state.snapshot().initialized {
            tracing::debug!("loading camera SDK");
            if let Err(error) = self.sdk.load() {
                tracing::error!(%error, "failed to load camera SDK");
                return;
            }
            self.state.update(|s| s.initialized = true);
        } else {
            tracing::debug!("SDK already loaded");
        }

        if let Err(error) = self.detect_camera() {
            tracing::error!(%error, "camera detection failed");
            self.deinitialize();
        }
    }

    fn detect_camera(&mut self) -> Result<(), SdkError> {
        let cameras = self.sdk.detect()?;
        if cameras.len() != 1 {
            return Err(SdkError::Enumeration(cameras.len()));
        }

        let camera = &cameras[0];
        tracing::info!(model = %camera.model, port = %camera.port, "detected camera");
        self.camera_index = Some(0);
        self.state.update(|s| s.description = camera.model.clone());
        Ok(())
    }

    fn deinitialize(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.close();
        }
        self.camera_index = None;
        if self.state.snapshot().initialized {
            self.sdk.unload();
        }
        self.state.update(|s| {
            s.initialized = false;
            s.connected = false;
            s.shooting = false;
            s.shutter_table.clear();
            s.iso_table.clear();
        });
    }

    fn connect(&mut self) {
        let snapshot = self.state.snapshot();
        if !snapshot.initialized {
            tracing::warn!(error = %SdkError::NotReady, "connect ignored");
            return;
        }
        if snapshot.connected {
            tracing::debug!("already connected");
            return;
        }

        tracing::info!(model = %snapshot.description, "connecting");
        if let Err(error) = self.open_session() {
            tracing::error!(%error, "connect failed");
            self.deinitialize();
        }
    }

    fn open_session(&mut self) -> Result<(), SdkError> {
        let index = self.camera_index.ok_or(SdkError::NotReady)?;
        let mut session = self.sdk.open(index)?;
        session.lock_ui()?;

        let shutter_table = tables::filter_shutter(&session.advertised(CameraProp::ShutterSpeed)?);
        let iso_table = tables::filter_iso(&session.advertised(CameraProp::Iso)?);
        tracing::debug!(
            shutter = shutter_table.len(),
            iso = iso_table.len(),
            "per-body property tables"
        );

        self.session = Some(session);
        self.state.update(|s| {
            s.shutter_table = shutter_table;
            s.iso_table = iso_table;
            s.connected = true;
        });
        self.apply_selection()
    }

    fn disconnect(&mut self) {
        if !self.state.snapshot().connected {
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        tracing::info!("disconnecting");
        if let Err(error) = session.unlock_ui() {
            tracing::warn!(%error, "UI unlock failed");
        }
        let closed = session.close();
        drop(session);

        self.state.update(|s| {
            s.connected = false;
            s.shooting = false;
            s.shutter_table.clear();
            s.iso_table.clear();
        });

        if let Err(error) = closed {
            tracing::error!(%error, "session close failed");
            self.deinitialize();
        }
    }

    /// Push the currently selected shutter speed and ISO to the body.
    /// Indices past the filtered tables write the Bulb / Auto sentinels.
    fn apply_selection(&mut self) -> Result<(), SdkError> {
        let snapshot = self.state.snapshot();
        let session = self.session.as_mut().ok_or(SdkError::NotReady)?;

        let shutter_param = snapshot
            .shutter_table
            .get(snapshot.exposure_index)
            .map_or(BULB_PARAM, |entry| entry.param);
        session.set_property(CameraProp::ShutterSpeed, shutter_param)?;

        let iso_param = snapshot
            .iso_table
            .get(snapshot.iso_index)
            .map_or(ISO_AUTO_PARAM, |entry| entry.param);
        session.set_property(CameraProp::Iso, iso_param)
    }

    fn initial_delay(&mut self) {
        let delay_us = self.state.snapshot().delay_us;
        self.delay_then_expose(delay_us);
    }

    fn interval_delay(&mut self) {
        let interval_us = self.state.snapshot().interval_us;
        self.delay_then_expose(interval_us);
    }

    fn delay_then_expose(&mut self, duration_us: i64) {
        if self.gate.sleep_us(duration_us) {
            self.queue.post(Command::TakePicture, false);
        } else {
            tracing::debug!("delay aborted");
            self.state.update(|s| s.shooting = false);
        }
    }

    fn take_picture(&mut self) {
        let snapshot = self.state.snapshot();
        if !snapshot.initialized || !snapshot.connected {
            tracing::warn!(error = %SdkError::NotReady, "take picture ignored");
            return;
        }

        if !snapshot.shooting {
            // single frame outside a sequence; a cancellation latched by a
            // past Stop must not truncate it
            self.gate.arm();
        }

        if let Err(error) = self.expose(&snapshot) {
            match error {
                CaptureError::SleepInterrupted => {
                    tracing::debug!("exposure aborted");
                    self.state.update(|s| s.shooting = false);
                }
                CaptureError::Sdk(SdkError::Busy) => {
                    // retriable at the SDK layer; here it only costs the
                    // sequence, not the session
                    tracing::warn!("camera busy, aborting sequence");
                    self.state.update(|s| s.shooting = false);
                }
                CaptureError::Sdk(error) => {
                    // the body may be gone; tear the session down so the
                    // next INITIALIZE starts clean
                    tracing::error!(%error, "exposure failed");
                    self.deinitialize();
                }
            }
            return;
        }

        let more_frames = self.state.update(|s| {
            if !s.shooting {
                return false;
            }
            s.frames_taken += 1;
            if s.frames_taken < s.frames {
                true
            } else {
                s.shooting = false;
                false
            }
        });

        if more_frames {
            self.queue.post(Command::IntervalDelay, false);
        } else if snapshot.shooting {
            tracing::info!("sequence finished");
        }
    }

    /// One exposure. Native selections press and release immediately and let
    /// the body's own timer hold the shutter. Bulb holds the button for
    /// `exposure_us`, shortened by the ring's running latency estimate; the
    /// measured overshoot of the completed frame feeds the ring back.
    fn expose(&mut self, snapshot: &SharedState) -> Result<(), CaptureError> {
        if !snapshot.bulb_selected() {
            let session = self.session.as_mut().ok_or(SdkError::NotReady)?;
            session.press_shutter()?;
            session.release_shutter()?;
            return Ok(());
        }

        let sleep_us = snapshot.exposure_us - self.latency.average_us();

        let session = self.session.as_mut().ok_or(SdkError::NotReady)?;
        let press_ts = timing::now_us();
        session.press_shutter()?;

        let completed = self.gate.sleep_us(sleep_us);

        let session = self.session.as_mut().ok_or(SdkError::NotReady)?;
        session.release_shutter()?;
        let release_ts = timing::now_us();

        if !completed {
            return Err(CaptureError::SleepInterrupted);
        }

        // the overshoot beyond the requested hold is the SDK call latency
        // this body exhibits; feed it back so the next hold is shortened
        let residual_us = (release_ts - press_ts) - sleep_us;
        self.latency.add_sample(residual_us);
        tracing::debug!(
            measured_us = release_ts - press_ts,
            residual_us,
            samples = self.latency.len(),
            "bulb frame"
        );
        Ok(())
    }

    fn start_shooting(&mut self) {
        let snapshot = self.state.snapshot();
        if !snapshot.connected {
            tracing::warn!(error = %SdkError::NotReady, "start ignored");
            return;
        }
        if snapshot.frames <= 0 {
            tracing::warn!("start ignored: no frames requested");
            return;
        }

        if let Err(error) = self.apply_selection() {
            tracing::error!(%error, "failed to apply exposure settings");
            self.deinitialize();
            return;
        }

        tracing::info!(
            frames = snapshot.frames,
            exposure_us = snapshot.exposure_us,
            delay_us = snapshot.delay_us,
            interval_us = snapshot.interval_us,
            bulb = snapshot.bulb_selected(),
            "starting sequence"
        );

        self.state.update(|s| {
            s.frames_taken = 0;
            s.shooting = true;
        });
        self.gate.arm();
        self.queue.post(Command::InitialDelay, false);
    }

    fn stop_shooting(&mut self) {
        // latch a cancellation for any delay command already queued behind
        // this one; START_SHOOTING re-arms the gate
        self.gate.cancel();
        self.state.update(|s| s.shooting = false);
    }

    fn terminate(&mut self) {
        tracing::info!("terminating");
        self.state.update(|s| s.running = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::{MockConfig, MockEvent, MockLog, MockSdk};
    use std::thread::JoinHandle;
    use std::time::Instant;

    struct Harness {
        state: StateHandle,
        queue: Arc<CommandQueue>,
        gate: Arc<SleepGate>,
        log: Arc<MockLog>,
        dispatcher: Option<JoinHandle<()>>,
    }

    fn spawn(config: MockConfig) -> Harness {
        let state = StateHandle::new();
        let queue = Arc::new(CommandQueue::new());
        let gate = Arc::new(SleepGate::new());
        let (sdk, log) = MockSdk::new(config);

        let mut controller =
            Controller::new(sdk, state.clone(), Arc::clone(&queue), Arc::clone(&gate));
        let dispatcher = std::thread::spawn(move || controller.run());

        Harness {
            state,
            queue,
            gate,
            log,
            dispatcher: Some(dispatcher),
        }
    }

    impl Harness {
        fn post_sync(&self, command: Command) {
            self.queue.post(command, true);
            self.assert_invariants();
        }

        fn assert_invariants(&self) {
            let snapshot = self.state.snapshot();
            assert!(!snapshot.connected || snapshot.initialized, "connected without initialized");
            assert!(!snapshot.shooting || snapshot.connected, "shooting without connected");
            if snapshot.shooting {
                assert!(snapshot.frames_taken <= snapshot.frames);
            }
        }

        fn wait_until(&self, what: &str, condition: impl Fn(&SharedState) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if condition(&self.state.snapshot()) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            panic!("timed out waiting for {what}");
        }

        fn connect(&self) {
            self.post_sync(Command::Initialize);
            self.post_sync(Command::Connect);
            assert!(self.state.snapshot().connected);
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.queue.post(Command::Terminate, false);
            self.gate.cancel();
            if let Some(dispatcher) = self.dispatcher.take() {
                dispatcher.join().expect("dispatcher panicked");
            }
        }
    }

    #[test]
    fn double_initialize_loads_sdk_once() {
        let harness = spawn(MockConfig::default());

        harness.post_sync(Command::Initialize);
        harness.post_sync(Command::Initialize);

        let snapshot = harness.state.snapshot();
        assert!(snapshot.initialized);
        assert_eq!(snapshot.description, "Canon EOS R6");
        assert_eq!(
            harness
                .log
                .load_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn initialize_rejects_zero_or_many_cameras() {
        for cameras in [vec![], vec!["EOS R6", "EOS R8"]] {
            let harness = spawn(MockConfig {
                cameras,
                ..MockConfig::default()
            });

            harness.post_sync(Command::Initialize);

            let snapshot = harness.state.snapshot();
            assert!(!snapshot.initialized);
            assert!(!snapshot.connected);
            // failed detection unloads so the next INITIALIZE starts clean
            assert_eq!(
                harness
                    .log
                    .unload_calls
                    .load(std::sync::atomic::Ordering::SeqCst),
                1
            );
        }
    }

    #[test]
    fn connect_requires_initialize_and_filters_tables() {
        let harness = spawn(MockConfig::default());

        harness.post_sync(Command::Connect);
        assert!(!harness.state.snapshot().connected);

        harness.post_sync(Command::Initialize);
        harness.post_sync(Command::Connect);

        let snapshot = harness.state.snapshot();
        assert!(snapshot.connected);
        let labels: Vec<_> = snapshot.shutter_table.iter().map(|e| e.label).collect();
        assert_eq!(labels, ["30\"", "0\"5", "1/60", "1/1000"]);
        let iso_labels: Vec<_> = snapshot.iso_table.iter().map(|e| e.label).collect();
        assert_eq!(iso_labels, ["100", "400", "1600"]);

        let events = harness.log.events();
        assert!(events.contains(&MockEvent::UiLocked));
        // current selection (index 0) applied on connect
        assert!(events.contains(&MockEvent::PropertySet(CameraProp::ShutterSpeed, 0x10)));
        assert!(events.contains(&MockEvent::PropertySet(CameraProp::Iso, 0x48)));
    }

    #[test]
    fn disconnect_unlocks_and_clears_tables() {
        let harness = spawn(MockConfig::default());
        harness.connect();

        harness.post_sync(Command::Disconnect);

        let snapshot = harness.state.snapshot();
        assert!(snapshot.initialized);
        assert!(!snapshot.connected);
        assert!(snapshot.shutter_table.is_empty());

        let events = harness.log.events();
        assert!(events.contains(&MockEvent::UiUnlocked));
        assert!(events.contains(&MockEvent::SessionClosed));
    }

    #[test]
    fn failed_connect_runs_deinitialize_path() {
        let harness = spawn(MockConfig {
            fail_open: true,
            ..MockConfig::default()
        });

        harness.post_sync(Command::Initialize);
        harness.post_sync(Command::Connect);

        let snapshot = harness.state.snapshot();
        assert!(!snapshot.initialized);
        assert!(!snapshot.connected);
    }

    #[test]
    fn take_picture_ignored_when_disconnected() {
        let harness = spawn(MockConfig::default());
        harness.post_sync(Command::Initialize);

        harness.post_sync(Command::TakePicture);

        assert_eq!(harness.log.press_count(), 0);
        assert!(!harness.state.snapshot().shooting);
    }

    #[test]
    fn native_sequence_takes_exact_frame_count() {
        let harness = spawn(MockConfig::default());
        harness.connect();

        harness.state.update(|s| {
            s.exposure_index = 2; // 1/60, native
            s.delay_us = 0;
            s.interval_us = 0;
            s.frames = 3;
        });

        let started = Instant::now();
        harness.post_sync(Command::StartShooting);
        harness.wait_until("sequence end", |s| !s.shooting);

        let snapshot = harness.state.snapshot();
        assert_eq!(snapshot.frames_taken, 3);
        assert_eq!(harness.log.exposures_us().len(), 3);
        // the body's own timer holds the shutter; the controller never sleeps
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn bulb_residual_correction_converges() {
        let harness = spawn(MockConfig {
            press_latency: Duration::from_millis(15),
            release_latency: Duration::from_millis(10),
            ..MockConfig::default()
        });
        harness.connect();

        let exposure_us = 120_000;
        harness.state.update(|s| {
            s.exposure_index = s.shutter_table.len(); // Bulb
            s.exposure_us = exposure_us;
            s.delay_us = 0;
            s.interval_us = 0;
            s.frames = 4;
        });

        harness.post_sync(Command::StartShooting);
        harness.wait_until("sequence end", |s| !s.shooting);

        let measured: Vec<i64> = harness
            .log
            .exposures_us()
            .iter()
            .map(|(press, release)| release - press)
            .collect();
        assert_eq!(measured.len(), 4);

        // first frame carries the full ~25ms call latency
        assert!(measured[0] >= exposure_us + 20_000, "frame 1: {measured:?}");
        // later frames sleep short by the learned latency
        for (index, duration) in measured.iter().enumerate().skip(1) {
            assert!(
                (duration - exposure_us).abs() < 20_000,
                "frame {}: {measured:?}",
                index + 1
            );
        }
    }

    #[test]
    fn stop_during_interval_halts_sequence() {
        let harness = spawn(MockConfig::default());
        harness.connect();

        harness.state.update(|s| {
            s.exposure_index = 2; // native
            s.delay_us = 0;
            s.interval_us = 2_000_000;
            s.frames = 10;
        });

        harness.post_sync(Command::StartShooting);
        harness.wait_until("first frame", |s| s.frames_taken >= 1);

        // what the HTTP stop handler does: clear the flag, cancel the sleep,
        // then post
        harness.state.update(|s| s.shooting = false);
        harness.gate.cancel();
        harness.queue.post(Command::StopShooting, false);

        harness.wait_until("stop", |s| !s.shooting);
        let frames_at_stop = harness.state.snapshot().frames_taken;

        std::thread::sleep(Duration::from_millis(300));
        let snapshot = harness.state.snapshot();
        assert!(!snapshot.shooting);
        assert_eq!(snapshot.frames_taken, frames_at_stop);
        assert_eq!(harness.log.exposures_us().len(), frames_at_stop as usize);
    }

    #[test]
    fn stop_cancels_in_progress_bulb_exposure() {
        let harness = spawn(MockConfig::default());
        harness.connect();

        harness.state.update(|s| {
            s.exposure_index = s.shutter_table.len();
            s.exposure_us = 5_000_000;
            s.delay_us = 0;
            s.frames = 3;
        });

        harness.post_sync(Command::StartShooting);
        harness.wait_until("shutter pressed", |_| harness.log.press_count() >= 1);

        harness.state.update(|s| s.shooting = false);
        harness.gate.cancel();
        harness.queue.post(Command::StopShooting, false);

        harness.wait_until("stop", |s| !s.shooting);
        // the button must not stay down on an aborted exposure
        let exposures = harness.log.exposures_us();
        assert_eq!(exposures.len(), 1);
        let (press, release) = exposures[0];
        assert!(release - press < 1_000_000);
        assert_eq!(harness.state.snapshot().frames_taken, 0);
    }

    #[test]
    fn sdk_failure_mid_sequence_tears_down_the_session() {
        let harness = spawn(MockConfig {
            press_gone: true,
            ..MockConfig::default()
        });
        harness.connect();

        harness.state.update(|s| {
            s.exposure_index = 2;
            s.delay_us = 0;
            s.interval_us = 0;
            s.frames = 3;
        });

        harness.post_sync(Command::StartShooting);
        harness.wait_until("teardown", |s| !s.initialized);

        let snapshot = harness.state.snapshot();
        assert!(!snapshot.connected);
        assert!(!snapshot.shooting);
        assert!(snapshot.shutter_table.is_empty());
        assert_eq!(
            harness
                .log
                .unload_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn busy_body_aborts_sequence_but_keeps_session() {
        let harness = spawn(MockConfig {
            press_busy: true,
            ..MockConfig::default()
        });
        harness.connect();

        harness.state.update(|s| {
            s.exposure_index = 2;
            s.delay_us = 0;
            s.frames = 3;
        });

        harness.post_sync(Command::StartShooting);
        harness.wait_until("abort", |s| !s.shooting);

        let snapshot = harness.state.snapshot();
        assert!(snapshot.initialized);
        assert!(snapshot.connected);
        assert_eq!(snapshot.frames_taken, 0);
    }

    #[test]
    fn start_with_zero_frames_is_a_no_op() {
        let harness = spawn(MockConfig::default());
        harness.connect();

        harness.state.update(|s| s.frames = 0);
        harness.post_sync(Command::StartShooting);

        assert!(!harness.state.snapshot().shooting);
        assert_eq!(harness.log.press_count(), 0);
    }

    #[test]
    fn start_while_disconnected_is_ignored() {
        let harness = spawn(MockConfig::default());
        harness.post_sync(Command::Initialize);

        harness.post_sync(Command::StartShooting);

        assert!(!harness.state.snapshot().shooting);
    }

    #[test]
    fn single_take_picture_does_not_count_frames() {
        let harness = spawn(MockConfig::default());
        harness.connect();

        harness.state.update(|s| s.exposure_index = 2);
        harness.post_sync(Command::TakePicture);

        let snapshot = harness.state.snapshot();
        assert_eq!(snapshot.frames_taken, 0);
        assert!(!snapshot.shooting);
        assert_eq!(harness.log.exposures_us().len(), 1);
    }

    #[test]
    fn terminate_stops_the_dispatcher() {
        let harness = spawn(MockConfig::default());
        harness.post_sync(Command::Initialize);
        // Drop posts Terminate and joins; reaching the end is the assertion.
        drop(harness);
    }
}
