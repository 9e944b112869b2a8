//! Digital signage viewer.
//!
//! Keeps a device's playlist mirrored in a local media cache and drives a
//! playback scheduler that cycles through it. The device state comes from
//! the admin API ([`remote`]) and is refreshed on push notifications
//! ([`realtime`]). [`sync`] turns fetched states into cache passes
//! ([`cache`]) and published states; [`player`] feeds those into the
//! [`scheduler`] and hands the result to a [`surface`].

pub mod assets;
pub mod cache;
pub mod clock;
pub mod config;
pub mod download;
pub mod error;
pub mod identity;
pub mod player;
pub mod realtime;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod surface;
pub mod sync;
