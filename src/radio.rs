use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{Backend, ReaderConfig};
use crate::tag::{format_tag_id, parse_tag_id};

#[cfg(feature = "pcsc")]
pub mod pcsc;
pub mod simulated;

/// Invoked by a radio with the raw identifier of every tag it discovers.
/// Called from the radio's own thread, never from the UI thread.
pub type TagCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Technology and behavior mask passed when enabling reader mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderFlags(u32);

impl ReaderFlags {
    pub const NFC_A: ReaderFlags = ReaderFlags(0x1);
    pub const NFC_B: ReaderFlags = ReaderFlags(0x2);
    pub const NFC_F: ReaderFlags = ReaderFlags(0x4);
    pub const NFC_V: ReaderFlags = ReaderFlags(0x8);
    pub const NO_PLATFORM_SOUNDS: ReaderFlags = ReaderFlags(0x100);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: ReaderFlags) -> ReaderFlags {
        ReaderFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: ReaderFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ReaderFlags {
    type Output = ReaderFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("{0}")]
    Backend(String),
    #[cfg(feature = "pcsc")]
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] ::pcsc::Error),
}

/// Platform NFC radio.
///
/// `enable_reader_mode` and `disable_reader_mode` are only ever called from the
/// adapter's UI thread; implementations deliver tags on a thread of their own.
pub trait Radio: Send + Sync {
    /// Whether the radio is switched on.
    fn is_enabled(&self) -> bool;

    /// Starts polling for tags, replacing any previously registered callback.
    fn enable_reader_mode(&self, flags: ReaderFlags, callback: TagCallback) -> Result<(), RadioError>;

    /// Stops polling and drops the registered callback. A no-op when not polling.
    fn disable_reader_mode(&self) -> Result<(), RadioError>;
}

/// Splits the `90 00` status word off a PC/SC `GET DATA` reply, leaving the UID.
pub fn uid_from_response(response: &[u8]) -> Result<Vec<u8>, RadioError> {
    match response {
        [uid @ .., 0x90, 0x00] => Ok(uid.to_vec()),
        other => Err(RadioError::Backend(format!(
            "unexpected GET DATA response {}",
            format_tag_id(other)
        ))),
    }
}

/// Acquires the radio selected by the reader configuration.
///
/// Returns `None` when no radio exists; callers treat that as an unsupported
/// device rather than an error.
pub fn default_radio(config: &ReaderConfig) -> Option<Arc<dyn Radio>> {
    match config.backend.unwrap_or_default() {
        Backend::Simulated => {
            let tags: Vec<Vec<u8>> = config
                .simulated_tags
                .iter()
                .flatten()
                .filter_map(|tag| match parse_tag_id(tag) {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        warn!("Skipping simulated tag: {}", err);
                        None
                    }
                })
                .collect();
            let interval = Duration::from_millis(config.poll_interval_ms.unwrap_or(2000));
            info!(
                "Using simulated radio with {} scripted tag(s) every {:?}",
                tags.len(),
                interval
            );
            let radio = simulated::SimulatedRadio::scripted(
                config.simulated_enabled.unwrap_or(true),
                tags,
                interval,
            );
            Some(Arc::new(radio))
        }
        Backend::Pcsc => pcsc_radio(config),
    }
}

#[cfg(feature = "pcsc")]
fn pcsc_radio(config: &ReaderConfig) -> Option<Arc<dyn Radio>> {
    let interval = Duration::from_millis(config.poll_interval_ms.unwrap_or(500));
    match pcsc::PcscRadio::new(config.name.clone(), interval) {
        Ok(radio) => Some(Arc::new(radio)),
        Err(err) => {
            warn!("No PC/SC radio available: {}", err);
            None
        }
    }
}

#[cfg(not(feature = "pcsc"))]
fn pcsc_radio(_config: &ReaderConfig) -> Option<Arc<dyn Radio>> {
    warn!("Built without the `pcsc` feature; no PC/SC radio available");
    None
}
