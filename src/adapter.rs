use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::listeners::{ListenerHandle, Listeners};
use crate::radio::{Radio, ReaderFlags, TagCallback};
use crate::tag::{TAG_DETECTED_EVENT, TagDetected};
use crate::ui_thread::UiThread;

/// Reader-mode mask: the four tag technologies, without platform feedback sounds.
pub const READER_FLAGS: ReaderFlags = ReaderFlags::NFC_A
    .union(ReaderFlags::NFC_B)
    .union(ReaderFlags::NFC_F)
    .union(ReaderFlags::NFC_V)
    .union(ReaderFlags::NO_PLATFORM_SOUNDS);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("NFC is not supported on this device")]
    UnsupportedDevice,
    #[error("NFC is disabled in settings")]
    RadioDisabled,
    #[error("Failed to start NFC scan: {0}")]
    OperationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
}

fn lock(state: &Mutex<ScanState>) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exposes an NFC radio to the application: toggles reader mode and emits
/// every discovered tag as a [`TAG_DETECTED_EVENT`] to registered listeners.
pub struct NfcScanAdapter {
    radio: Option<Arc<dyn Radio>>,
    ui: UiThread,
    state: Arc<Mutex<ScanState>>,
    listeners: Arc<Listeners<TagDetected>>,
}

impl NfcScanAdapter {
    /// `radio` is `None` when the device has no NFC radio; the adapter still
    /// loads and reports [`ScanError::UnsupportedDevice`] on `start_scan`.
    pub fn load(radio: Option<Arc<dyn Radio>>, ui: UiThread) -> Self {
        if radio.is_none() {
            warn!("No NFC radio found; scanning will be unavailable");
        }
        NfcScanAdapter {
            radio,
            ui,
            state: Arc::new(Mutex::new(ScanState::Idle)),
            listeners: Arc::new(Listeners::new()),
        }
    }

    pub fn state(&self) -> ScanState {
        *lock(&self.state)
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == ScanState::Scanning
    }

    pub fn add_listener(
        &self,
        event: &str,
        listener: impl Fn(&TagDetected) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.listeners.add(event, listener)
    }

    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.listeners.remove(handle)
    }

    pub fn remove_all_listeners(&self, event: &str) {
        self.listeners.remove_all(event)
    }

    pub fn ui_tasks_submitted(&self) -> u64 {
        self.ui.submitted()
    }

    /// Enables reader mode on the UI thread. Starting while already scanning
    /// succeeds without touching the radio.
    pub async fn start_scan(&self) -> Result<(), ScanError> {
        let radio = self.radio.as_ref().ok_or(ScanError::UnsupportedDevice)?;
        if !radio.is_enabled() {
            return Err(ScanError::RadioDisabled);
        }

        let radio = Arc::clone(radio);
        let state = Arc::clone(&self.state);
        let listeners = Arc::clone(&self.listeners);
        self.ui
            .run(move || enable(radio.as_ref(), state, listeners))
            .await
            .map_err(|err| ScanError::OperationFailed(err.to_string()))?
    }

    /// Disables reader mode on the UI thread. Never fails; with no radio this
    /// is a no-op.
    pub async fn stop_scan(&self) {
        let Some(radio) = self.radio.as_ref() else {
            *lock(&self.state) = ScanState::Idle;
            return;
        };

        let radio = Arc::clone(radio);
        let state = Arc::clone(&self.state);
        let result = self
            .ui
            .run(move || {
                // Idle first so the radio thread stops emitting before we wait on it.
                *lock(&state) = ScanState::Idle;
                radio.disable_reader_mode()
            })
            .await;
        match result {
            Ok(Ok(())) => info!("NFC scan stopped"),
            Ok(Err(err)) => warn!("Disabling reader mode failed: {}", err),
            Err(err) => {
                warn!("Could not schedule reader mode shutdown: {}", err);
                *lock(&self.state) = ScanState::Idle;
            }
        }
    }
}

impl Drop for NfcScanAdapter {
    fn drop(&mut self) {
        let was = std::mem::replace(&mut *lock(&self.state), ScanState::Idle);
        let Some(radio) = self.radio.take() else {
            return;
        };
        if was != ScanState::Scanning {
            return;
        }
        // The UI thread drains this before exiting once `ui` is dropped.
        let submitted = self.ui.submit(move || {
            if let Err(err) = radio.disable_reader_mode() {
                warn!("Disabling reader mode on drop failed: {}", err);
            }
        });
        if let Err(err) = submitted {
            warn!("Could not schedule reader mode shutdown on drop: {}", err);
        }
    }
}

fn enable(
    radio: &dyn Radio,
    state: Arc<Mutex<ScanState>>,
    listeners: Arc<Listeners<TagDetected>>,
) -> Result<(), ScanError> {
    {
        let mut current = lock(&state);
        if *current == ScanState::Scanning {
            debug!("Reader mode already enabled");
            return Ok(());
        }
        *current = ScanState::Scanning;
    }

    let callback_state = Arc::clone(&state);
    let callback: TagCallback =
        Box::new(move |id: &[u8]| on_tag_discovered(&callback_state, &listeners, id));

    match radio.enable_reader_mode(READER_FLAGS, callback) {
        Ok(()) => {
            info!("NFC scan started");
            Ok(())
        }
        Err(err) => {
            *lock(&state) = ScanState::Idle;
            Err(ScanError::OperationFailed(err.to_string()))
        }
    }
}

fn on_tag_discovered(state: &Mutex<ScanState>, listeners: &Listeners<TagDetected>, id: &[u8]) {
    if *lock(state) != ScanState::Scanning {
        debug!("Ignoring tag reported while idle");
        return;
    }
    let event = TagDetected::now(id);
    info!("Tag detected: {}", event.tag_id);
    let delivered = listeners.notify(TAG_DETECTED_EVENT, &event);
    debug!("Delivered {} to {} listener(s)", TAG_DETECTED_EVENT, delivered);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::radio::simulated::SimulatedRadio;

    fn adapter_with(radio: Option<&SimulatedRadio>) -> NfcScanAdapter {
        let radio = radio.map(|r| Arc::new(r.clone()) as Arc<dyn Radio>);
        NfcScanAdapter::load(radio, UiThread::spawn().unwrap())
    }

    fn collect(adapter: &NfcScanAdapter) -> Arc<Mutex<Vec<TagDetected>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        adapter.add_listener(TAG_DETECTED_EVENT, move |event| {
            sink.lock().unwrap().push(event.clone())
        });
        seen
    }

    #[test]
    fn test_reader_flags() {
        for flag in [
            ReaderFlags::NFC_A,
            ReaderFlags::NFC_B,
            ReaderFlags::NFC_F,
            ReaderFlags::NFC_V,
            ReaderFlags::NO_PLATFORM_SOUNDS,
        ] {
            assert!(READER_FLAGS.contains(flag));
        }
    }

    #[tokio::test]
    async fn test_start_without_radio() {
        let adapter = adapter_with(None);
        assert_eq!(adapter.start_scan().await, Err(ScanError::UnsupportedDevice));
        assert_eq!(adapter.ui_tasks_submitted(), 0);
        assert_eq!(adapter.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_start_with_disabled_radio() {
        let radio = SimulatedRadio::new(false);
        let adapter = adapter_with(Some(&radio));
        assert_eq!(adapter.start_scan().await, Err(ScanError::RadioDisabled));
        assert_eq!(adapter.ui_tasks_submitted(), 0);
        assert_eq!(radio.enable_calls(), 0);
    }

    #[tokio::test]
    async fn test_radio_switched_off_after_load() {
        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));
        radio.set_enabled(false);
        assert_eq!(adapter.start_scan().await, Err(ScanError::RadioDisabled));

        radio.set_enabled(true);
        assert_eq!(adapter.start_scan().await, Ok(()));
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        adapter_with(None).stop_scan().await;

        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));
        adapter.stop_scan().await;
        assert!(!adapter.is_scanning());
    }

    #[tokio::test]
    async fn test_tag_detected_while_scanning() {
        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));
        let seen = collect(&adapter);

        assert_eq!(adapter.start_scan().await, Ok(()));
        assert!(adapter.is_scanning());
        assert_eq!(radio.last_flags(), Some(READER_FLAGS));

        assert!(radio.tap(&[0x04, 0x3A, 0xC2, 0x11]));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tag_id, "04:3A:C2:11");
        assert!(seen[0].timestamp > 0);
    }

    #[tokio::test]
    async fn test_no_events_after_stop() {
        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));
        let seen = collect(&adapter);

        adapter.start_scan().await.unwrap();
        adapter.stop_scan().await;
        assert!(!radio.tap(&[0x04, 0x3A]));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(adapter.state(), ScanState::Idle);
    }

    #[tokio::test]
    async fn test_enable_failure() {
        let radio = SimulatedRadio::new(true);
        radio.fail_next_enable("radio busy");
        let adapter = adapter_with(Some(&radio));

        let err = adapter.start_scan().await.unwrap_err();
        assert_eq!(err, ScanError::OperationFailed("radio busy".to_string()));
        assert_eq!(err.to_string(), "Failed to start NFC scan: radio busy");
        assert_eq!(adapter.state(), ScanState::Idle);

        assert_eq!(adapter.start_scan().await, Ok(()));
    }

    #[tokio::test]
    async fn test_overlapping_start_is_idempotent() {
        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));

        let (a, b) = tokio::join!(adapter.start_scan(), adapter.start_scan());
        assert_eq!((a, b), (Ok(()), Ok(())));
        assert_eq!(radio.enable_calls(), 1);

        adapter.stop_scan().await;
        adapter.start_scan().await.unwrap();
        assert_eq!(radio.enable_calls(), 2);
    }

    #[tokio::test]
    async fn test_drop_while_scanning_disables_reader_mode() {
        let radio = SimulatedRadio::scripted(true, vec![vec![0x04, 0x3A]], Duration::from_millis(5));
        let adapter = adapter_with(Some(&radio));
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        adapter.add_listener(TAG_DETECTED_EVENT, move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        adapter.start_scan().await.unwrap();
        while count.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(adapter);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while radio.is_reader_mode() {
            assert!(tokio::time::Instant::now() < deadline, "reader mode still enabled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let before = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_drop_while_idle_leaves_radio_alone() {
        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));
        adapter.start_scan().await.unwrap();
        adapter.stop_scan().await;
        let submitted = adapter.ui_tasks_submitted();
        assert_eq!(submitted, 2);
        drop(adapter);
        assert!(!radio.is_reader_mode());
        assert_eq!(radio.enable_calls(), 1);
    }

    #[tokio::test]
    async fn test_removed_listener_is_not_called() {
        let radio = SimulatedRadio::new(true);
        let adapter = adapter_with(Some(&radio));
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let handle = adapter.add_listener(TAG_DETECTED_EVENT, move |_| *sink.lock().unwrap() += 1);

        adapter.start_scan().await.unwrap();
        radio.tap(&[1]);
        assert!(adapter.remove_listener(&handle));
        radio.tap(&[2]);
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
