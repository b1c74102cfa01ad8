//! In-memory radio. Tags are "tapped" either by hand with [`SimulatedRadio::tap`]
//! or by a scripted field thread that cycles through a fixed list while reader
//! mode is enabled.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use super::{Radio, RadioError, ReaderFlags, TagCallback};

#[derive(Clone)]
pub struct SimulatedRadio {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    enabled: AtomicBool,
    callback: Mutex<Option<Arc<TagCallback>>>,
    fail_next_enable: Mutex<Option<String>>,
    enable_calls: AtomicUsize,
    last_flags: Mutex<Option<ReaderFlags>>,
    script: Vec<Vec<u8>>,
    interval: Duration,
    field: Mutex<Option<Field>>,
}

struct Field {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedRadio {
    pub fn new(enabled: bool) -> Self {
        SimulatedRadio {
            inner: Arc::new(Inner {
                enabled: AtomicBool::new(enabled),
                ..Default::default()
            }),
        }
    }

    /// A radio that taps `tags` in turn, one every `interval`, while reader
    /// mode is enabled.
    pub fn scripted(enabled: bool, tags: Vec<Vec<u8>>, interval: Duration) -> Self {
        SimulatedRadio {
            inner: Arc::new(Inner {
                enabled: AtomicBool::new(enabled),
                script: tags,
                interval,
                ..Default::default()
            }),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Makes the next `enable_reader_mode` call fail with `message`.
    pub fn fail_next_enable(&self, message: impl Into<String>) {
        *lock(&self.inner.fail_next_enable) = Some(message.into());
    }

    /// Presents a tag to the radio. Returns whether a callback received it.
    pub fn tap(&self, id: &[u8]) -> bool {
        self.inner.tap(id)
    }

    pub fn enable_calls(&self) -> usize {
        self.inner.enable_calls.load(Ordering::Acquire)
    }

    pub fn last_flags(&self) -> Option<ReaderFlags> {
        *lock(&self.inner.last_flags)
    }

    pub fn is_reader_mode(&self) -> bool {
        lock(&self.inner.callback).is_some()
    }

    fn start_field(&self) {
        if self.inner.script.is_empty() {
            return;
        }
        let (stop_tx, stop_rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("nfc-sim-field".to_string())
            .spawn(move || {
                for tag in inner.script.iter().cycle() {
                    match stop_rx.recv_timeout(inner.interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            inner.tap(tag);
                        }
                        _ => break,
                    }
                }
                debug!("Simulated field stopped");
            });
        match spawned {
            Ok(handle) => *lock(&self.inner.field) = Some(Field { stop_tx, handle }),
            Err(err) => warn!("Could not start simulated field: {}", err),
        }
    }

    fn stop_field(&self) {
        let field = lock(&self.inner.field).take();
        if let Some(field) = field {
            drop(field.stop_tx);
            if field.handle.join().is_err() {
                warn!("Simulated field thread panicked");
            }
        }
    }
}

impl Inner {
    fn tap(&self, id: &[u8]) -> bool {
        let callback = lock(&self.callback).clone();
        match callback {
            Some(callback) => {
                callback(id);
                true
            }
            None => false,
        }
    }
}

impl Radio for SimulatedRadio {
    fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    fn enable_reader_mode(&self, flags: ReaderFlags, callback: TagCallback) -> Result<(), RadioError> {
        self.inner.enable_calls.fetch_add(1, Ordering::AcqRel);
        if let Some(message) = lock(&self.inner.fail_next_enable).take() {
            return Err(RadioError::Backend(message));
        }
        self.stop_field();
        *lock(&self.inner.last_flags) = Some(flags);
        *lock(&self.inner.callback) = Some(Arc::new(callback));
        self.start_field();
        Ok(())
    }

    fn disable_reader_mode(&self) -> Result<(), RadioError> {
        self.stop_field();
        lock(&self.inner.callback).take();
        Ok(())
    }
}
