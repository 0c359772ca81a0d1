//! Point-in-time descriptions of remote player state.
//!
//! A [`Snapshot`] is assembled fresh by every poll from several
//! independent protocol calls and is immutable once built; the store
//! merges it field by field and then drops it.

use std::{fmt, time::Duration};

use crate::track::Track;

/// Playback status as reported by `isplaying`.
///
/// The remote encodes this as 0 (stopped), 1 (playing) or 3 (paused).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    /// Maps the remote status code.
    ///
    /// Unknown codes degrade to stopped rather than failing the whole
    /// snapshot; the next poll corrects a transient garbage value.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Playing,
            3 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// Repeat mode as the UI understands it.
///
/// The remote only stores one bit; the `Track`/`Playlist` distinction is
/// client-side memory (see [`remote`](crate::remote)).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Playlist,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::Track => f.write_str("track"),
            Self::Playlist => f.write_str("playlist"),
        }
    }
}

/// Position within the playlist.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PlaylistCursor {
    pub position: u32,
    pub length: u32,
}

/// A fully-resolved description of remote player state.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub track: Option<Track>,
    pub status: PlaybackStatus,
    pub position: Duration,
    /// Volume on the remote's 0..=255 scale.
    pub volume: u8,
    pub playlist: PlaylistCursor,
    pub repeat: RepeatMode,
    pub shuffle: bool,
    pub connected: bool,
}

impl Snapshot {
    /// The synthetic snapshot applied when the connection is lost.
    ///
    /// Routed through the regular per-field merge, so an optimistic write
    /// fresher than the failing poll still wins.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            track: None,
            status: PlaybackStatus::Stopped,
            position: Duration::ZERO,
            volume: 0,
            playlist: PlaylistCursor::default(),
            repeat: RepeatMode::Off,
            shuffle: false,
            connected: false,
        }
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status == PlaybackStatus::Paused
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status == PlaybackStatus::Stopped
    }
}
