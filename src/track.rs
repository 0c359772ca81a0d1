//! Track metadata resolution.
//!
//! The remote exposes the current track three ways, in decreasing order of
//! fidelity: ID3 tags, an `"Artist - Title"` formatted window title, and
//! the raw title string. [`Track::resolve`] merges them with metadata
//! winning over parsed values winning over the raw title.

use std::time::Duration;

/// An immutable description of one playlist entry.
///
/// The id is derived from the playlist index and file path, so it is only
/// stable within one loading of the playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    id: String,
    title: String,
    artist: String,
    album: Option<String>,
    year: Option<u32>,
    genre: Option<String>,
    track_number: Option<u32>,
    duration: Duration,
    file_path: String,
    playlist_index: u32,
}

/// One parsed `getid3tag` response.
///
/// Fields come back joined by a delimiter in a fixed order; empty segments
/// mean the file does not carry that tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Id3Tags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub track_number: Option<u32>,
}

impl Id3Tags {
    /// Tag names requested from the remote, in response order.
    pub const REQUESTED: &'static str = "title,artist,album,year,genre,track";

    /// Parses a delimiter-joined tag response.
    ///
    /// Returns `None` when the response is entirely empty, which the
    /// remote sends for untagged files.
    #[must_use]
    pub fn parse(body: &str, delimiter: &str) -> Option<Self> {
        if body.trim().is_empty() {
            return None;
        }

        let mut fields = body.split(delimiter).map(str::trim);
        let mut next = || {
            fields
                .next()
                .filter(|field| !field.is_empty())
                .map(str::to_owned)
        };

        let tags = Self {
            title: next(),
            artist: next(),
            album: next(),
            year: next().and_then(|year| year.parse().ok()),
            genre: next(),
            track_number: next().and_then(|number| number.parse().ok()),
        };

        if tags == Self::default() {
            None
        } else {
            Some(tags)
        }
    }
}

/// Splits an `"Artist - Title"` window title on the first `" - "`.
///
/// Both sides must be non-empty for the split to count; otherwise the
/// whole string is treated as a bare title.
#[must_use]
pub fn split_title(raw: &str) -> Option<(&str, &str)> {
    let (artist, title) = raw.split_once(" - ")?;
    let artist = artist.trim();
    let title = title.trim();

    if artist.is_empty() || title.is_empty() {
        None
    } else {
        Some((artist, title))
    }
}

impl Track {
    /// Resolves the current track from everything the remote offered.
    ///
    /// Returns `None` when both the title and the file path are empty,
    /// which means no track is loaded at all.
    #[must_use]
    pub fn resolve(
        playlist_index: u32,
        file_path: &str,
        raw_title: &str,
        tags: Option<&Id3Tags>,
        duration: Duration,
    ) -> Option<Self> {
        if raw_title.is_empty() && file_path.is_empty() {
            return None;
        }

        let parsed = split_title(raw_title);
        let tag = |field: fn(&Id3Tags) -> Option<&String>| {
            tags.and_then(field).map(String::as_str)
        };

        let title = tag(|t| t.title.as_ref())
            .or(parsed.map(|(_, title)| title))
            .unwrap_or(raw_title);
        let artist = tag(|t| t.artist.as_ref())
            .or(parsed.map(|(artist, _)| artist))
            .unwrap_or_default();

        Some(Self {
            id: format!("{playlist_index}:{file_path}"),
            title: title.to_owned(),
            artist: artist.to_owned(),
            album: tags.and_then(|t| t.album.clone()),
            year: tags.and_then(|t| t.year),
            genre: tags.and_then(|t| t.genre.clone()),
            track_number: tags.and_then(|t| t.track_number),
            duration,
            file_path: file_path.to_owned(),
            playlist_index,
        })
    }

    /// Builds a playlist entry from a title-list line.
    ///
    /// Only the current track's duration is known to the remote, so
    /// listing entries carry a zero duration.
    #[must_use]
    pub fn from_listing(playlist_index: u32, file_path: &str, raw_title: &str) -> Option<Self> {
        Self::resolve(playlist_index, file_path, raw_title, None, Duration::ZERO)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn artist(&self) -> &str {
        &self.artist
    }

    #[must_use]
    pub fn album(&self) -> Option<&str> {
        self.album.as_deref()
    }

    #[must_use]
    pub fn year(&self) -> Option<u32> {
        self.year
    }

    #[must_use]
    pub fn genre(&self) -> Option<&str> {
        self.genre.as_deref()
    }

    #[must_use]
    pub fn track_number(&self) -> Option<u32> {
        self.track_number
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    #[must_use]
    pub fn playlist_index(&self) -> u32 {
        self.playlist_index
    }
}
