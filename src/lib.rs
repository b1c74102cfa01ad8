//! Exposes an NFC reader to an application: toggles a polling "reader mode" on
//! a radio and emits every discovered tag identifier as an `nfcTagDetected`
//! event to registered listeners.

pub mod adapter;
pub mod config;
pub mod listeners;
pub mod manager;
pub mod messages;
pub mod mqtt;
pub mod radio;
pub mod tag;
pub mod ui_thread;
