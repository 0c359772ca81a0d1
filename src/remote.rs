//! Client for the fixed vocabulary of httpQ player operations.
//!
//! Sequences codec and transport calls into higher-level operations,
//! tolerates per-call failure, and assembles a coherent [`Snapshot`] from
//! several independently-issued calls. Owns the consecutive-failure
//! counter: the call that brings it to [`Client::FAIL_STREAK_LIMIT`]
//! returns the distinguished [`Error::FailStreak`] so the store can
//! suspend polling instead of logging yet another transient error.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex, PoisonError,
    },
    time::Duration,
};

use thiserror::Error;

use crate::{
    config::Connection,
    http::{self, StatusCode, Transport},
    protocol::{self, Command, Param, Value},
    snapshot::{PlaybackStatus, PlaylistCursor, RepeatMode, Snapshot},
    track::{Id3Tags, Track},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("{command} transport error: {source}")]
    Transport { command: Command, source: http::Error },

    #[error("{command} returned HTTP status {status}")]
    Status { command: Command, status: StatusCode },

    #[error("{command} response invalid: {source}")]
    Protocol {
        command: Command,
        source: protocol::Error,
    },

    #[error("remote unreachable after {count} consecutive failures")]
    FailStreak { count: u32 },

    #[error("{command} returned unexpected value {value:?}")]
    Unexpected { command: Command, value: Value },
}

impl Error {
    /// Whether this is the fatal fail-streak error that suspends polling.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FailStreak { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Remote client over an injected [`Transport`].
///
/// The transport is boxed so tests can drive the client (and the store on
/// top of it) against an in-memory fake player.
pub struct Client {
    transport: Box<dyn Transport>,
    connection: Mutex<Connection>,

    /// Consecutive failed calls with no intervening success.
    fail_streak: AtomicU32,
    connected: AtomicBool,

    /// Which of track/playlist repeat was last explicitly requested.
    ///
    /// The remote only stores one repeat bit; this memory upgrades it to
    /// the three-value [`RepeatMode`] when a poll reports the bit ON.
    repeat_choice: Mutex<RepeatMode>,
}

impl Client {
    /// Consecutive failures that convert into [`Error::FailStreak`].
    pub const FAIL_STREAK_LIMIT: u32 = 5;

    /// Delimiter for the title list and tag responses.
    ///
    /// Not expected inside titles or tag values; a value containing it
    /// merely splits wrong for that one entry.
    const LIST_DELIMITER: &'static str = ";;";

    pub fn new<T>(transport: T, connection: Connection) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            transport: Box::new(transport),
            connection: Mutex::new(connection),
            fail_streak: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            // The remote's native repeat bit loops the whole playlist.
            repeat_choice: Mutex::new(RepeatMode::Playlist),
        }
    }

    /// Replaces the connection parameters.
    ///
    /// Connection state drops back to disconnected; the failure counter is
    /// deliberately kept. Only a successful call resets it.
    pub fn configure(&self, connection: Connection) {
        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = connection;
        self.connected.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn fail_streak(&self) -> u32 {
        self.fail_streak.load(Ordering::SeqCst)
    }

    /// Issues one protocol call and decodes the response.
    ///
    /// Any failure counts toward the fail streak; the call that reaches
    /// the limit returns [`Error::FailStreak`] instead of the underlying
    /// error. Any success resets the streak and marks the client
    /// connected.
    async fn call(&self, command: Command, params: &[(&str, Param)]) -> Result<Value> {
        let url = {
            let connection = self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            protocol::request_url(&connection, command, params)
        }
        .map_err(|source| self.failed(Error::Protocol { command, source }))?;

        let response = self
            .transport
            .get(url)
            .await
            .map_err(|source| self.failed(Error::Transport { command, source }))?;

        if !response.status.is_success() {
            return Err(self.failed(Error::Status {
                command,
                status: response.status,
            }));
        }

        let value = protocol::decode(command, &response.body)
            .map_err(|source| self.failed(Error::Protocol { command, source }))?;

        self.fail_streak.store(0, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        Ok(value)
    }

    fn failed(&self, error: Error) -> Error {
        let streak = self.fail_streak.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(false, Ordering::SeqCst);

        if streak >= Self::FAIL_STREAK_LIMIT {
            warn!("remote unreachable ({streak} consecutive failures): {error}");
            Error::FailStreak { count: streak }
        } else {
            debug!(
                "call failed ({streak}/{}): {error}",
                Self::FAIL_STREAK_LIMIT
            );
            error
        }
    }

    async fn number(&self, command: Command, params: &[(&str, Param)]) -> Result<i64> {
        match self.call(command, params).await? {
            Value::Number(value) => Ok(value),
            value => Err(Error::Unexpected { command, value }),
        }
    }

    async fn flag(&self, command: Command, params: &[(&str, Param)]) -> Result<bool> {
        match self.call(command, params).await? {
            Value::Flag(value) => Ok(value),
            value => Err(Error::Unexpected { command, value }),
        }
    }

    async fn text(&self, command: Command, params: &[(&str, Param)]) -> Result<String> {
        match self.call(command, params).await? {
            Value::Text(value) => Ok(value),
            value => Err(Error::Unexpected { command, value }),
        }
    }

    pub async fn play(&self) -> Result<bool> {
        self.flag(Command::Play, &[]).await
    }

    pub async fn pause(&self) -> Result<bool> {
        self.flag(Command::Pause, &[]).await
    }

    pub async fn stop(&self) -> Result<bool> {
        self.flag(Command::Stop, &[]).await
    }

    pub async fn next(&self) -> Result<bool> {
        self.flag(Command::Next, &[]).await
    }

    pub async fn prev(&self) -> Result<bool> {
        self.flag(Command::Prev, &[]).await
    }

    pub async fn set_volume(&self, volume: u8) -> Result<bool> {
        self.flag(Command::SetVolume, &[("level", Param::Int(volume.into()))])
            .await
    }

    pub async fn seek_to(&self, position: Duration) -> Result<bool> {
        let ms = i64::try_from(position.as_millis()).unwrap_or(i64::MAX);
        self.flag(Command::JumpToTime, &[("ms", Param::Int(ms))])
            .await
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<bool> {
        self.flag(Command::Shuffle, &[("enable", Param::Flag(shuffle))])
            .await
    }

    /// Sets the remote repeat bit and records the requested mode.
    ///
    /// The remote only understands on/off; the track/playlist choice is
    /// remembered locally and re-applied when polls report the bit ON.
    pub async fn set_repeat(&self, mode: RepeatMode) -> Result<bool> {
        if mode != RepeatMode::Off {
            *self
                .repeat_choice
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = mode;
        }

        self.flag(
            Command::Repeat,
            &[("enable", Param::Flag(mode != RepeatMode::Off))],
        )
        .await
    }

    pub async fn set_playlist_pos(&self, index: u32) -> Result<bool> {
        self.flag(
            Command::SetPlaylistPos,
            &[("index", Param::Int(index.into()))],
        )
        .await
    }

    /// Lightweight connectivity check used by explicit reconnection.
    ///
    /// A success resets the fail streak like any other call.
    pub async fn probe(&self) -> Result<i64> {
        self.number(Command::GetVersion, &[]).await
    }

    fn upgrade_repeat(&self, remote_on: bool) -> RepeatMode {
        if remote_on {
            *self
                .repeat_choice
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        } else {
            RepeatMode::Off
        }
    }

    /// Fetches a consolidated player snapshot.
    ///
    /// The underlying status calls have no ordering dependency and are
    /// issued concurrently; the first failure aborts the snapshot. Title
    /// and file are then resolved into a [`Track`] with the tag lookup
    /// pair.
    pub async fn player_state(&self) -> Result<Snapshot> {
        let (status, position_ms, length_secs, volume, list_pos, list_len, repeat_on, shuffle, title, file) =
            tokio::try_join!(
                self.number(Command::IsPlaying, &[]),
                self.number(Command::GetOutputTime, &[("frmt", Param::Int(0))]),
                self.number(Command::GetOutputTime, &[("frmt", Param::Int(1))]),
                self.number(Command::GetVolume, &[]),
                self.number(Command::GetListPos, &[]),
                self.number(Command::GetListLength, &[]),
                self.flag(Command::RepeatStatus, &[]),
                self.flag(Command::ShuffleStatus, &[]),
                self.text(Command::GetCurrentTitle, &[]),
                self.text(Command::GetPlaylistFile, &[]),
            )?;

        let playlist_index = u32::try_from(list_pos).unwrap_or(0);
        // The remote reports the current track length in whole seconds,
        // and -1 for position/length when nothing is loaded.
        let duration = Duration::from_secs(u64::try_from(length_secs).unwrap_or(0));
        let track = self
            .resolve_track(playlist_index, &file, &title, duration)
            .await?;

        Ok(Snapshot {
            track,
            status: PlaybackStatus::from_code(status),
            position: Duration::from_millis(u64::try_from(position_ms).unwrap_or(0)),
            volume: u8::try_from(volume.clamp(0, 255)).unwrap_or(u8::MAX),
            playlist: PlaylistCursor {
                position: playlist_index,
                length: u32::try_from(list_len).unwrap_or(0),
            },
            repeat: self.upgrade_repeat(repeat_on),
            shuffle,
            connected: true,
        })
    }

    async fn resolve_track(
        &self,
        index: u32,
        file: &str,
        title: &str,
        duration: Duration,
    ) -> Result<Option<Track>> {
        if title.is_empty() && file.is_empty() {
            return Ok(None);
        }

        let tags = if self.flag(Command::HasId3Tag, &[]).await? {
            let body = self
                .text(
                    Command::GetId3Tag,
                    &[
                        ("tags", Param::Text(Id3Tags::REQUESTED.to_owned())),
                        ("delim", Param::Text(Self::LIST_DELIMITER.to_owned())),
                    ],
                )
                .await?;
            Id3Tags::parse(&body, Self::LIST_DELIMITER)
        } else {
            None
        };

        Ok(Track::resolve(index, file, title, tags.as_ref(), duration))
    }

    /// Fetches the whole playlist as tracks.
    ///
    /// Per-item file resolution is sequential; this is not on the polling
    /// hot path. Durations of non-current entries are unknown to the
    /// remote and come back as zero.
    pub async fn playlist(&self) -> Result<Vec<Track>> {
        let length = self.number(Command::GetListLength, &[]).await?;
        let titles = self
            .text(
                Command::GetPlaylistTitleList,
                &[("delim", Param::Text(Self::LIST_DELIMITER.to_owned()))],
            )
            .await?;

        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let titles: Vec<&str> = titles.split(Self::LIST_DELIMITER).collect();
        let count = titles.len().min(usize::try_from(length).unwrap_or(0));

        let mut tracks = Vec::with_capacity(count);
        for (index, title) in titles.iter().take(count).enumerate() {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            let file = self
                .text(
                    Command::GetPlaylistFile,
                    &[("index", Param::Int(index.into()))],
                )
                .await?;
            if let Some(track) = Track::from_listing(index, &file, title) {
                tracks.push(track);
            }
        }

        Ok(tracks)
    }
}
