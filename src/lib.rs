//! Optimistic state synchronizer for httpQ media player remotes.
//!
//! The authoritative player state lives in a remote process reachable
//! only through a lossy, stateless text protocol, polled once a second.
//! This crate keeps a local copy that reacts to user actions instantly,
//! without ever letting a stale poll overwrite a newer action or a dead
//! endpoint go unnoticed. See [`store`] for the reconciliation rules.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod events;
pub mod http;
pub mod protocol;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod track;

#[cfg(test)]
mod testing;
