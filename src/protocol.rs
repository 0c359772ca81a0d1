//! Codec for the httpQ remote-control protocol.
//!
//! httpQ is a plain-text protocol: every operation is an HTTP GET to
//! `http://{host}:{port}/{command}?p={password}&{params}` and the response
//! body is a trimmed piece of text. Numbers are decimal ASCII, booleans are
//! the literals `0`/`1`, and an empty body is a valid "no data" response
//! for string-typed commands.
//!
//! This module is pure: it builds request URLs and decodes response bodies,
//! but performs no I/O and holds no state. The [`remote`](crate::remote)
//! client sequences these functions with the transport.

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::config::Connection;

/// Errors from building requests or decoding responses.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{command} returned non-numeric response {body:?}")]
    InvalidNumber { command: Command, body: String },

    #[error("{command} returned non-boolean response {body:?}")]
    InvalidFlag { command: Command, body: String },

    #[error("remote endpoint unavailable")]
    Unavailable,

    #[error("building request URL failed: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The fixed httpQ command vocabulary this client consumes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    GetVersion,
    Play,
    Pause,
    Stop,
    Next,
    Prev,
    IsPlaying,
    GetOutputTime,
    JumpToTime,
    GetCurrentTitle,
    GetVolume,
    SetVolume,
    GetListLength,
    GetListPos,
    SetPlaylistPos,
    GetPlaylistFile,
    GetPlaylistTitleList,
    Repeat,
    RepeatStatus,
    Shuffle,
    ShuffleStatus,
    GetId3Tag,
    HasId3Tag,
}

/// Shape of a command's response body.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseKind {
    /// Decimal ASCII integer.
    Number,
    /// Boolean encoded as the literal `0` or `1`.
    Flag,
    /// Arbitrary text; an empty body is valid.
    Text,
}

impl Command {
    /// The command name as it appears in the request path.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::GetVersion => "getversion",
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Next => "next",
            Self::Prev => "prev",
            Self::IsPlaying => "isplaying",
            Self::GetOutputTime => "getoutputtime",
            Self::JumpToTime => "jumptotime",
            Self::GetCurrentTitle => "getcurrenttitle",
            Self::GetVolume => "getvolume",
            Self::SetVolume => "setvolume",
            Self::GetListLength => "getlistlength",
            Self::GetListPos => "getlistpos",
            Self::SetPlaylistPos => "setplaylistpos",
            Self::GetPlaylistFile => "getplaylistfile",
            Self::GetPlaylistTitleList => "getplaylisttitlelist",
            Self::Repeat => "repeat",
            Self::RepeatStatus => "repeat_status",
            Self::Shuffle => "shuffle",
            Self::ShuffleStatus => "shuffle_status",
            Self::GetId3Tag => "getid3tag",
            Self::HasId3Tag => "hasid3tag",
        }
    }

    /// The declared response shape of this command.
    ///
    /// Mutating commands acknowledge with a success flag; status queries
    /// return numbers or flags; title, file and tag queries return text.
    #[must_use]
    pub fn response(self) -> ResponseKind {
        match self {
            Self::GetVersion
            | Self::IsPlaying
            | Self::GetOutputTime
            | Self::GetVolume
            | Self::GetListLength
            | Self::GetListPos => ResponseKind::Number,

            Self::Play
            | Self::Pause
            | Self::Stop
            | Self::Next
            | Self::Prev
            | Self::JumpToTime
            | Self::SetVolume
            | Self::SetPlaylistPos
            | Self::Repeat
            | Self::RepeatStatus
            | Self::Shuffle
            | Self::ShuffleStatus
            | Self::HasId3Tag => ResponseKind::Flag,

            Self::GetCurrentTitle
            | Self::GetPlaylistFile
            | Self::GetPlaylistTitleList
            | Self::GetId3Tag => ResponseKind::Text,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed request parameter value.
///
/// Integers are stringified as decimal, booleans as `0`/`1`. Absent
/// parameters are simply not passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Param {
    Int(i64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Flag(true) => f.write_str("1"),
            Self::Flag(false) => f.write_str("0"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// A decoded response value, typed per [`Command::response`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Number(i64),
    Flag(bool),
    Text(String),
}

impl Value {
    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Builds the request URL for `command` against `connection`.
///
/// The password always rides along as the `p` query parameter, before any
/// command-specific parameters.
///
/// # Errors
///
/// Will return `Err` if the host and port do not form a valid URL.
pub fn request_url(
    connection: &Connection,
    command: Command,
    params: &[(&str, Param)],
) -> Result<Url> {
    let base = format!(
        "http://{}:{}/{}",
        connection.host,
        connection.port,
        command.name()
    );
    let mut url = Url::parse(&base)?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("p", connection.password.as_str());
        for (name, value) in params {
            query.append_pair(name, &value.to_string());
        }
    }

    Ok(url)
}

/// Decodes a raw response body into a typed [`Value`].
///
/// The body is trimmed first. A `getversion` body of literal `"0"` means
/// the endpoint itself is unavailable (the httpQ plugin reports version 0
/// when it refuses to serve) and decodes to [`Error::Unavailable`] rather
/// than the number zero.
///
/// # Errors
///
/// Will return `Err` if a numeric or flag response does not parse.
pub fn decode(command: Command, body: &str) -> Result<Value> {
    let body = body.trim();

    match command.response() {
        ResponseKind::Number => {
            if command == Command::GetVersion && body == "0" {
                return Err(Error::Unavailable);
            }

            body.parse::<i64>()
                .map(Value::Number)
                .map_err(|_| Error::InvalidNumber {
                    command,
                    body: body.to_owned(),
                })
        }
        ResponseKind::Flag => match body {
            "0" => Ok(Value::Flag(false)),
            "1" => Ok(Value::Flag(true)),
            _ => Err(Error::InvalidFlag {
                command,
                body: body.to_owned(),
            }),
        },
        ResponseKind::Text => Ok(Value::Text(body.to_owned())),
    }
}
