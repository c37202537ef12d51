//! # Audio Module
//!
//! Per-guild playback engine for Jukebox.
//!
//! ## Architecture
//!
//! ### [`player`] - Connection Registry
//! - One [`connection::Connection`] per guild, kept in a concurrent map
//! - Entry point for every command (join, add, play, pause, skip, stop...)
//! - Spawns drivers, waiters and the auto-leave watcher
//!
//! ### [`connection`] - Connection State
//! - Playlist and pending downloads ([`queue`])
//! - Epochs: a cancellation token plus a control channel that `stop`
//!   replaces instead of resetting, so stale senders never reach a new driver
//! - Driver ownership: at most one driver per epoch, released on drop
//!
//! ### [`driver`] - Playback Driver
//! - Streams the playlist head frame by frame into the voice transport
//! - The transport's bounded buffer paces sending to real time
//!
//! ### [`transport`] - Voice I/O
//! - Traits for the voice transport, listener presence and text notices
//! - Songbird/serenity implementations
//!
//! ## Audio Format
//!
//! - **Frames**: 20ms opus frames, 48kHz stereo, stored as [`frames`] files
//! - **Playback**: frames are passed to songbird untouched (DCA1 stream)

pub mod connection;
pub mod driver;
pub mod frames;
pub mod occupancy;
pub mod player;
pub mod queue;
pub mod transport;

#[cfg(test)]
pub mod testing;
