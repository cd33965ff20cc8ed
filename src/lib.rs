//! Stateless HLS relay: fetches playlists and segments on behalf of browser
//! players and rewrites playlist references so follow-up requests route back
//! through the relay.

pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod proxy;
pub mod server;
