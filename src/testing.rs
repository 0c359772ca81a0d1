//! In-memory fake player backing the unit tests.
//!
//! [`FakeTransport`] implements [`Transport`] over a mutable
//! [`FakePlayer`] model, so the remote client and the store can be driven
//! without a network. Mutating commands update the model the way a real
//! player would; tests can also inject failures, error statuses, garbage
//! bodies and response delays, and inspect the commands that were issued.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use async_trait::async_trait;
use url::Url;

use crate::http::{self, Response, StatusCode, Transport};

/// Mutable model of the remote player.
pub(crate) struct FakePlayer {
    pub status: i64,
    pub position_ms: i64,
    pub length_secs: i64,
    pub volume: i64,
    pub list_pos: i64,
    pub list_len: i64,
    pub repeat: bool,
    pub shuffle: bool,
    pub title: String,
    pub file: String,
    pub has_id3: bool,
    pub id3: String,
    pub version: i64,
    pub titles: Vec<String>,
    pub files: Vec<String>,
}

impl Default for FakePlayer {
    fn default() -> Self {
        Self {
            status: 0,
            position_ms: 0,
            length_secs: 0,
            volume: 160,
            list_pos: 0,
            list_len: 0,
            repeat: false,
            shuffle: false,
            title: String::new(),
            file: String::new(),
            has_id3: false,
            id3: String::new(),
            version: 204,
            titles: Vec::new(),
            files: Vec::new(),
        }
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_owned()
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

impl FakePlayer {
    fn respond(&mut self, url: &Url) -> String {
        let command = url.path().trim_start_matches('/');

        match command {
            "getversion" => self.version.to_string(),
            "play" => {
                self.status = 1;
                flag(true)
            }
            "pause" => {
                self.status = 3;
                flag(true)
            }
            "stop" => {
                self.status = 0;
                self.position_ms = 0;
                flag(true)
            }
            "next" => {
                self.list_pos = (self.list_pos + 1).min(self.list_len.saturating_sub(1));
                flag(true)
            }
            "prev" => {
                self.list_pos = (self.list_pos - 1).max(0);
                flag(true)
            }
            "isplaying" => self.status.to_string(),
            "getoutputtime" => match query_param(url, "frmt").as_deref() {
                Some("1") => self.length_secs.to_string(),
                _ => self.position_ms.to_string(),
            },
            "jumptotime" => {
                if let Some(ms) = query_param(url, "ms").and_then(|ms| ms.parse().ok()) {
                    self.position_ms = ms;
                }
                flag(true)
            }
            "getcurrenttitle" => self.title.clone(),
            "getvolume" => self.volume.to_string(),
            "setvolume" => {
                if let Some(level) = query_param(url, "level").and_then(|level| level.parse().ok())
                {
                    self.volume = level;
                }
                flag(true)
            }
            "getlistlength" => self.list_len.to_string(),
            "getlistpos" => self.list_pos.to_string(),
            "setplaylistpos" => {
                if let Some(index) = query_param(url, "index").and_then(|index| index.parse().ok())
                {
                    self.list_pos = index;
                }
                flag(true)
            }
            "getplaylistfile" => match query_param(url, "index") {
                Some(index) => index
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| self.files.get(index).cloned())
                    .unwrap_or_default(),
                None => self.file.clone(),
            },
            "getplaylisttitlelist" => {
                let delimiter = query_param(url, "delim").unwrap_or_default();
                self.titles.join(&delimiter)
            }
            "repeat" => {
                self.repeat = query_param(url, "enable").as_deref() == Some("1");
                flag(true)
            }
            "repeat_status" => flag(self.repeat),
            "shuffle" => {
                self.shuffle = query_param(url, "enable").as_deref() == Some("1");
                flag(true)
            }
            "shuffle_status" => flag(self.shuffle),
            "getid3tag" => self.id3.clone(),
            "hasid3tag" => flag(self.has_id3),
            _ => String::new(),
        }
    }
}

/// Transport over the fake player, with failure and delay injection.
#[derive(Clone)]
pub(crate) struct FakeTransport {
    player: Arc<Mutex<FakePlayer>>,
    fail: Arc<AtomicBool>,
    status: Arc<Mutex<StatusCode>>,
    body_override: Arc<Mutex<Option<String>>>,
    delay: Arc<Mutex<Duration>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            player: Arc::new(Mutex::new(FakePlayer::default())),
            fail: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(StatusCode::OK)),
            body_override: Arc::new(Mutex::new(None)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn player(&self) -> MutexGuard<'_, FakePlayer> {
        self.player.lock().unwrap()
    }

    /// Makes every request fail at the transport level.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: StatusCode) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_body_override(&self, body: Option<String>) {
        *self.body_override.lock().unwrap() = body;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// How many requests were issued for `command`.
    pub fn calls_to(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| *call == command)
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: Url) -> http::Result<Response> {
        self.calls
            .lock()
            .unwrap()
            .push(url.path().trim_start_matches('/').to_owned());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(http::Error::Connection("fake player offline".to_owned()));
        }

        let status = *self.status.lock().unwrap();
        let body = match self.body_override.lock().unwrap().clone() {
            Some(body) => body,
            None => self.player.lock().unwrap().respond(&url),
        };

        Ok(Response { status, body })
    }
}
