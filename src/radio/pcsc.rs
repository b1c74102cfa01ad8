//! PC/SC reader backend.
//!
//! Reader mode is a watcher thread blocked in `SCardGetStatusChange`. Whenever
//! a card arrives on a matching reader the UID is fetched with the PC/SC
//! `GET DATA` pseudo-APDU and handed to the callback.

use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use pcsc::{Context, Error, MAX_BUFFER_SIZE, Protocols, ReaderState, Scope, ShareMode, State};

use super::{Radio, RadioError, ReaderFlags, TagCallback, uid_from_response};

const GET_UID_APDU: &[u8] = &[0xFF, 0xCA, 0x00, 0x00, 0x00];

pub struct PcscRadio {
    ctx: Context,
    reader_filter: Option<String>,
    poll_interval: Duration,
    watcher: Mutex<Option<Watcher>>,
}

struct Watcher {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PcscRadio {
    pub fn new(reader_filter: Option<String>, poll_interval: Duration) -> Result<Self, RadioError> {
        let ctx = Context::establish(Scope::User)?;
        Ok(PcscRadio {
            ctx,
            reader_filter,
            poll_interval,
            watcher: Mutex::new(None),
        })
    }

    fn stop_watcher(&self) {
        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            watcher.stop.store(true, Ordering::Release);
            if let Err(err) = self.ctx.cancel() {
                debug!("Cancelling status wait failed: {}", err);
            }
            if watcher.handle.join().is_err() {
                warn!("PC/SC watcher thread panicked");
            }
        }
    }
}

fn matching_readers(ctx: &Context, filter: Option<&str>) -> Result<Vec<CString>, Error> {
    let readers = match ctx.list_readers_owned() {
        Ok(readers) => readers,
        Err(Error::NoReadersAvailable) => Vec::new(),
        Err(err) => return Err(err),
    };
    Ok(readers
        .into_iter()
        .filter(|name| filter.is_none_or(|f| name.to_string_lossy().contains(f)))
        .collect())
}

fn read_uid(ctx: &Context, reader: &CStr) -> Result<Vec<u8>, RadioError> {
    let card = ctx.connect(reader, ShareMode::Shared, Protocols::ANY)?;
    let mut buf = [0u8; MAX_BUFFER_SIZE];
    let response = card.transmit(GET_UID_APDU, &mut buf)?;
    uid_from_response(response)
}

fn watch(
    ctx: Context,
    filter: Option<String>,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
    callback: TagCallback,
) {
    let mut states: Vec<ReaderState> = Vec::new();

    while !stop.load(Ordering::Acquire) {
        let readers = match matching_readers(&ctx, filter.as_deref()) {
            Ok(readers) => readers,
            Err(err) => {
                warn!("Listing PC/SC readers failed: {}", err);
                std::thread::sleep(poll_interval);
                continue;
            }
        };

        states.retain(|state| readers.iter().any(|name| name.as_c_str() == state.name()));
        for name in readers {
            if !states.iter().any(|state| state.name() == name.as_c_str()) {
                debug!("Watching reader {:?}", name);
                states.push(ReaderState::new(name, State::UNAWARE));
            }
        }
        if states.is_empty() {
            std::thread::sleep(poll_interval);
            continue;
        }

        for state in &mut states {
            state.sync_current_state();
        }
        match ctx.get_status_change(poll_interval, &mut states) {
            Ok(()) => {}
            Err(Error::Timeout) => continue,
            Err(Error::Cancelled) => break,
            Err(err) => {
                warn!("Waiting for PC/SC status change failed: {}", err);
                std::thread::sleep(poll_interval);
                continue;
            }
        }

        for state in &states {
            let arrived = state.event_state().contains(State::PRESENT)
                && !state.current_state().contains(State::PRESENT);
            if !arrived {
                continue;
            }
            match read_uid(&ctx, state.name()) {
                Ok(uid) => callback(&uid),
                Err(err) => debug!("Could not read UID on {:?}: {}", state.name(), err),
            }
        }
    }
    debug!("PC/SC watcher stopped");
}

impl Radio for PcscRadio {
    fn is_enabled(&self) -> bool {
        matching_readers(&self.ctx, self.reader_filter.as_deref())
            .map(|readers| !readers.is_empty())
            .unwrap_or(false)
    }

    fn enable_reader_mode(&self, flags: ReaderFlags, callback: TagCallback) -> Result<(), RadioError> {
        self.stop_watcher();
        debug!("Enabling PC/SC reader mode with flags {:#x}", flags.bits());

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = self.ctx.clone();
        let filter = self.reader_filter.clone();
        let poll_interval = self.poll_interval;
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("nfc-pcsc".to_string())
            .spawn(move || watch(ctx, filter, poll_interval, thread_stop, callback))
            .map_err(|err| RadioError::Backend(err.to_string()))?;

        *lock(&self.watcher) = Some(Watcher { stop, handle });
        info!("PC/SC reader mode enabled");
        Ok(())
    }

    fn disable_reader_mode(&self) -> Result<(), RadioError> {
        self.stop_watcher();
        Ok(())
    }
}
