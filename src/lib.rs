//! Unattended lane access kiosk: plate recognition fused with an RFID
//! credential, checked against a persisted pairing store.

pub mod access;
pub mod auth;
pub mod cli;
pub mod conf;
pub mod confirm;
pub mod credential;
pub mod cv;
pub mod detection;
pub mod journal;
pub mod kiosk;
pub mod ocr;
pub mod pairing;
pub mod proc;
pub mod rfid;
pub mod schedule;
