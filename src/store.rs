//! The reconciliation store: canonical in-process player state.
//!
//! User actions apply an *optimistic* patch immediately (so the UI feels
//! instantaneous) and issue the matching remote call in the background; a
//! recurring 1 s poll fetches a fresh [`Snapshot`] and merges it in with
//! per-field, timestamp-based conflict resolution. The rule that makes
//! this safe:
//!
//! * every optimistic write records `(instant, expected value)` per field
//!   in the pending map;
//! * a polled value for a field is applied unconditionally when no pending
//!   entry exists, or when the entry predates the poll's start (the poll
//!   observed the remote *after* the write was sent);
//! * a polled value that races a *fresher* write is applied only when it
//!   value-equals the expectation (confirmation), otherwise skipped for
//!   this tick — the stale poll must not erase the user's intent;
//! * entries older than the staleness ceiling are swept each tick so a
//!   lost confirmation cannot shadow remote truth forever.
//!
//! Fields merge independently: a volume drag still in flight is protected
//! while an unrelated track change from the same poll lands.
//!
//! Polling is `Active` from construction and becomes `Suspended` only when
//! a poll hits the fatal fail-streak error; an explicit [`Store::reconnect`]
//! resumes it. Superseded poll results (after a stop or reconfigure) are
//! discarded via a generation counter captured at tick start.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::broadcast,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Connection,
    events::Event,
    remote,
    snapshot::{PlaylistCursor, RepeatMode, Snapshot},
    track::Track,
};

/// The retained record of a fatal fail streak.
///
/// Inspectable through [`Store::last_failure`] until a reconnect succeeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("connection lost after {failures} consecutive failures")]
pub struct ConnectionLost {
    pub failures: u32,
}

/// State keys that can be optimistically written and polled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
enum Field {
    Track,
    Playing,
    Repeat,
    Shuffle,
    Volume,
    Position,
    Playlist,
    Connected,
}

/// A tagged single-field update.
///
/// Every mutation of [`State`] goes through one of these, applied by the
/// exhaustive [`State::apply`]; there is no way to smuggle an unknown key
/// into the state.
#[derive(Clone, Debug, PartialEq)]
enum Patch {
    Track(Option<Track>),
    Playing(bool),
    Repeat(RepeatMode),
    Shuffle(bool),
    Volume(u8),
    Position(Duration),
    Playlist(PlaylistCursor),
    Connected(bool),
}

impl Patch {
    fn field(&self) -> Field {
        match self {
            Self::Track(_) => Field::Track,
            Self::Playing(_) => Field::Playing,
            Self::Repeat(_) => Field::Repeat,
            Self::Shuffle(_) => Field::Shuffle,
            Self::Volume(_) => Field::Volume,
            Self::Position(_) => Field::Position,
            Self::Playlist(_) => Field::Playlist,
            Self::Connected(_) => Field::Connected,
        }
    }
}

/// One optimistic write awaiting confirmation.
#[derive(Clone, Debug)]
struct PendingWrite {
    at: Instant,
    expect: Patch,
}

/// The long-lived player state.
///
/// Playback position is never stored as a ticking number: it is derived on
/// demand from the raw position, its anchor instant and the playing flag,
/// so no per-frame timer exists anywhere.
#[derive(Clone, Debug)]
pub struct State {
    track: Option<Track>,
    playing: bool,
    repeat: RepeatMode,
    shuffle: bool,
    volume: u8,
    playlist: PlaylistCursor,
    connected: bool,
    raw_position: Duration,
    anchor: Instant,
}

impl State {
    fn new() -> Self {
        Self {
            track: None,
            playing: false,
            repeat: RepeatMode::Off,
            shuffle: false,
            volume: 0,
            playlist: PlaylistCursor::default(),
            connected: false,
            raw_position: Duration::ZERO,
            anchor: Instant::now(),
        }
    }

    /// Applies one patch; returns whether the value actually changed.
    ///
    /// An equal value is left untouched, so re-applying the same snapshot
    /// neither re-anchors the position nor spends a change notification.
    fn apply(&mut self, patch: &Patch) -> bool {
        match patch {
            Patch::Track(track) => {
                if self.track == *track {
                    return false;
                }
                self.track.clone_from(track);
            }
            Patch::Playing(playing) => {
                if self.playing == *playing {
                    return false;
                }
                // Re-anchor only when resuming; pausing keeps the raw
                // position until the next poll corrects it.
                if *playing {
                    self.anchor = Instant::now();
                }
                self.playing = *playing;
            }
            Patch::Repeat(repeat) => {
                if self.repeat == *repeat {
                    return false;
                }
                self.repeat = *repeat;
            }
            Patch::Shuffle(shuffle) => {
                if self.shuffle == *shuffle {
                    return false;
                }
                self.shuffle = *shuffle;
            }
            Patch::Volume(volume) => {
                if self.volume == *volume {
                    return false;
                }
                self.volume = *volume;
            }
            Patch::Position(position) => {
                if self.raw_position == *position {
                    return false;
                }
                self.raw_position = *position;
                self.anchor = Instant::now();
            }
            Patch::Playlist(playlist) => {
                if self.playlist == *playlist {
                    return false;
                }
                self.playlist = *playlist;
            }
            Patch::Connected(connected) => {
                if self.connected == *connected {
                    return false;
                }
                self.connected = *connected;
            }
        }

        true
    }

    #[must_use]
    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[must_use]
    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    #[must_use]
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    #[must_use]
    pub fn volume(&self) -> u8 {
        self.volume
    }

    #[must_use]
    pub fn playlist(&self) -> PlaylistCursor {
        self.playlist
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The effective playback position, derived at read time.
    #[must_use]
    pub fn position(&self) -> Duration {
        if self.playing {
            self.raw_position + self.anchor.elapsed()
        } else {
            self.raw_position
        }
    }
}

struct Inner {
    remote: remote::Client,
    state: Mutex<State>,
    pending: Mutex<HashMap<Field, PendingWrite>>,
    events: broadcast::Sender<Event>,

    /// Generation counter; bumped by stop/reconfigure so an in-flight
    /// tick from a superseded run discards its result.
    epoch: AtomicU64,
    polling: AtomicBool,
    seek_in_flight: AtomicBool,
    last_failure: Mutex<Option<ConnectionLost>>,
    poll_guard: Mutex<CancellationToken>,
}

/// Handle to the reconciliation store.
///
/// Cheap to clone; all clones share one state. Constructed explicitly with
/// an injected remote client and handed to the UI layer, which mutates
/// state only through the action methods.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Poll cadence while `Active`.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

    /// Staleness ceiling for unconfirmed optimistic writes.
    pub const PENDING_TTL: Duration = Duration::from_millis(5000);

    /// Buffered events per subscriber before it starts lagging.
    const EVENT_CAPACITY: usize = 64;

    #[must_use]
    pub fn new(remote: remote::Client) -> Self {
        let (events, _) = broadcast::channel(Self::EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                remote,
                state: Mutex::new(State::new()),
                pending: Mutex::new(HashMap::new()),
                events,
                epoch: AtomicU64::new(0),
                polling: AtomicBool::new(false),
                seek_in_flight: AtomicBool::new(false),
                last_failure: Mutex::new(None),
                poll_guard: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Subscribes to store events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// A clone of the current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The effective playback position right now.
    #[must_use]
    pub fn position(&self) -> Duration {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.polling.load(Ordering::SeqCst)
    }

    /// The fatal failure that suspended polling, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<ConnectionLost> {
        *self
            .inner
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the recurring poll; a no-op when already polling.
    pub fn start_polling(&self) {
        if self.inner.polling.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        {
            let mut guard = self
                .inner
                .poll_guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.cancel();
            *guard = token.clone();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticks = time::interval(Self::POLL_INTERVAL);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticks.tick() => {
                        if !inner.polling.load(Ordering::SeqCst) {
                            break;
                        }
                        inner.poll_tick().await;
                    }
                }
            }

            debug!("poll task exited");
        });
    }

    /// Stops the recurring poll and supersedes any tick in flight.
    pub fn stop_polling(&self) {
        self.inner.polling.store(false, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner
            .poll_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Probes the remote and resumes polling on success.
    ///
    /// The successful probe resets the fail streak as any call does; the
    /// recorded fatal failure is cleared and polling re-enters `Active`.
    pub async fn reconnect(&self) -> bool {
        match self.inner.remote.probe().await {
            Ok(version) => {
                info!("reconnected to remote (httpQ version {version})");
                *self
                    .inner
                    .last_failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                self.start_polling();
                drop(self.inner.events.send(Event::Connected));
                true
            }
            Err(error) => {
                warn!("reconnect probe failed: {error}");
                false
            }
        }
    }

    /// Replaces connection parameters and restarts polling `Active`.
    ///
    /// The running poll task is superseded, pending optimistic writes are
    /// dropped (they were against the old endpoint) and any recorded
    /// failure is cleared. The remote's failure counter is left to the
    /// remote client, which keeps it across reconfiguration.
    pub fn reconfigure(&self, connection: Connection) {
        info!("reconfiguring remote to {connection}");

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.remote.configure(connection);
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .inner
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        self.inner.polling.store(false, Ordering::SeqCst);
        self.start_polling();
    }

    /// Runs one user action through the uniform execution protocol:
    /// optimistic patches (with pending records and a synchronous change
    /// emission), then the awaited remote call, then on failure the error
    /// patches before the error is re-raised.
    async fn action<F>(
        &self,
        patches: &[Patch],
        error_patches: &[Patch],
        call: F,
    ) -> remote::Result<()>
    where
        F: Future<Output = remote::Result<bool>>,
    {
        self.inner.apply_optimistic(patches);

        match call.await {
            Ok(_) => Ok(()),
            Err(error) => {
                if !error_patches.is_empty() {
                    self.inner.apply_optimistic(error_patches);
                }
                Err(error)
            }
        }
    }

    /// Jumps to the previous playlist entry.
    ///
    /// No optimistic patch: the effect is only observable once the next
    /// poll reports the new track.
    pub async fn previous(&self) -> remote::Result<()> {
        self.action(&[], &[], self.inner.remote.prev()).await
    }

    /// Jumps to the next playlist entry. No optimistic patch, as above.
    pub async fn next(&self) -> remote::Result<()> {
        self.action(&[], &[], self.inner.remote.next()).await
    }

    pub async fn set_volume(&self, volume: u8) -> remote::Result<()> {
        self.action(
            &[Patch::Volume(volume)],
            &[],
            self.inner.remote.set_volume(volume),
        )
        .await
    }

    /// Starts or pauses playback.
    ///
    /// The only action with an error patch: a failed call flips the
    /// playing flag back to what it was.
    pub async fn set_playing(&self, playing: bool) -> remote::Result<()> {
        let prior = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_playing();

        let call = async {
            if playing {
                self.inner.remote.play().await
            } else {
                self.inner.remote.pause().await
            }
        };

        self.action(&[Patch::Playing(playing)], &[Patch::Playing(prior)], call)
            .await
    }

    pub async fn set_repeat(&self, mode: RepeatMode) -> remote::Result<()> {
        self.action(
            &[Patch::Repeat(mode)],
            &[],
            self.inner.remote.set_repeat(mode),
        )
        .await
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> remote::Result<()> {
        self.action(
            &[Patch::Shuffle(shuffle)],
            &[],
            self.inner.remote.set_shuffle(shuffle),
        )
        .await
    }

    /// Stops playback and rewinds.
    pub async fn stop(&self) -> remote::Result<()> {
        self.action(
            &[Patch::Playing(false), Patch::Position(Duration::ZERO)],
            &[],
            self.inner.remote.stop(),
        )
        .await
    }

    /// Seeks within the current track.
    ///
    /// At most one `jumptotime` call is in flight: a seek arriving while
    /// one is outstanding applies its optimistic patch and is treated as
    /// already succeeded at the network level, letting the next poll
    /// converge on remote truth instead of stacking redundant jumps.
    pub async fn seek(&self, position: Duration) -> remote::Result<()> {
        self.inner.apply_optimistic(&[Patch::Position(position)]);

        if self.inner.seek_in_flight.swap(true, Ordering::SeqCst) {
            trace!("seek already in flight, skipping remote call");
            return Ok(());
        }

        let result = self.inner.remote.seek_to(position).await;
        self.inner.seek_in_flight.store(false, Ordering::SeqCst);

        result.map(|_| ())
    }

    /// Fetches the playlist through the store's remote client.
    ///
    /// Read-only passthrough; playlist content is not reconciled state.
    pub async fn playlist(&self) -> remote::Result<Vec<Track>> {
        self.inner.remote.playlist().await
    }
}

impl Inner {
    /// One polling tick: sweep, fetch, merge.
    async fn poll_tick(&self) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let poll_started = Instant::now();

        self.sweep_pending(poll_started);

        match self.remote.player_state().await {
            Ok(snapshot) => {
                if self.superseded(epoch) {
                    debug!("discarding result of superseded poll tick");
                    return;
                }
                self.merge(&snapshot, poll_started);
            }
            Err(remote::Error::FailStreak { count }) => {
                if self.superseded(epoch) {
                    return;
                }
                self.suspend(count, poll_started);
            }
            Err(error) => warn!("poll failed, retrying next tick: {error}"),
        }
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch || !self.polling.load(Ordering::SeqCst)
    }

    /// Drops pending writes older than the staleness ceiling.
    fn sweep_pending(&self, now: Instant) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|field, write| {
                let expired = now.duration_since(write.at) >= Store::PENDING_TTL;
                if expired {
                    debug!("optimistic write to {field:?} expired unconfirmed");
                }
                !expired
            });
    }

    /// Enters `Suspended` after a fatal fail streak.
    ///
    /// The synthetic disconnected snapshot goes through the regular merge,
    /// so an optimistic write fresher than this poll still wins its field.
    fn suspend(&self, failures: u32, poll_started: Instant) {
        error!("suspending polling: connection lost after {failures} consecutive failures");

        self.polling.store(false, Ordering::SeqCst);
        self.poll_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ConnectionLost { failures });

        self.merge(&Snapshot::disconnected(), poll_started);
        drop(self.events.send(Event::Disconnected));
    }

    /// Applies optimistic patches, records them pending, and emits one
    /// change notification synchronously when anything changed.
    fn apply_optimistic(&self, patches: &[Patch]) {
        let now = Instant::now();
        let mut changed = false;

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

            for patch in patches {
                pending.insert(
                    patch.field(),
                    PendingWrite {
                        at: now,
                        expect: patch.clone(),
                    },
                );
                changed |= state.apply(patch);
            }
        }

        if changed {
            drop(self.events.send(Event::Changed));
        }
    }

    /// Merges one snapshot, field by field, against the pending map.
    fn merge(&self, snapshot: &Snapshot, poll_started: Instant) {
        let patches = [
            Patch::Track(snapshot.track.clone()),
            Patch::Playing(snapshot.is_playing()),
            Patch::Position(snapshot.position),
            Patch::Volume(snapshot.volume),
            Patch::Playlist(snapshot.playlist),
            Patch::Repeat(snapshot.repeat),
            Patch::Shuffle(snapshot.shuffle),
            Patch::Connected(snapshot.connected),
        ];

        let mut changed = false;

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

            for patch in patches {
                let field = patch.field();

                if let Some(write) = pending.get(&field) {
                    // A write made during or after this poll's start is
                    // fresher than what the poll observed: only a
                    // value-equal result may confirm and clear it.
                    if write.at >= poll_started && write.expect != patch {
                        trace!("{field:?}: optimistic write outranks polled value");
                        continue;
                    }
                    pending.remove(&field);
                }

                changed |= state.apply(&patch);
            }
        }

        if changed {
            drop(self.events.send(Event::Changed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Password,
        snapshot::PlaybackStatus,
        testing::FakeTransport,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    fn connection() -> Connection {
        Connection {
            host: "127.0.0.1".to_owned(),
            port: 4800,
            password: Password::new("pass").unwrap(),
        }
    }

    fn store() -> (Store, FakeTransport) {
        let fake = FakeTransport::new();
        let remote = remote::Client::new(fake.clone(), connection());
        (Store::new(remote), fake)
    }

    fn playing_snapshot() -> Snapshot {
        Snapshot {
            track: None,
            status: PlaybackStatus::Playing,
            position: Duration::from_millis(1000),
            volume: 80,
            playlist: PlaylistCursor {
                position: 0,
                length: 1,
            },
            repeat: RepeatMode::Off,
            shuffle: false,
            connected: true,
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_optimistic_write_survives_stale_poll() {
        let (store, _fake) = store();

        // A poll starts, then the user drags the volume slider.
        let poll_started = Instant::now();
        advance(Duration::from_millis(10)).await;
        store.inner.apply_optimistic(&[Patch::Volume(120)]);

        // The stale poll resolves with the pre-drag volume.
        let mut snapshot = playing_snapshot();
        snapshot.volume = 80;
        store.inner.merge(&snapshot, poll_started);

        assert_eq!(store.state().volume(), 120);
        // The field stays guarded until confirmed or superseded.
        assert!(store
            .inner
            .pending
            .lock()
            .unwrap()
            .contains_key(&Field::Volume));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_newer_than_write_supersedes_it() {
        let (store, _fake) = store();

        store.inner.apply_optimistic(&[Patch::Volume(120)]);
        advance(Duration::from_millis(10)).await;

        let mut snapshot = playing_snapshot();
        snapshot.volume = 80;
        store.inner.merge(&snapshot, Instant::now());

        assert_eq!(store.state().volume(), 80);
        assert!(store.inner.pending.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn value_equal_poll_confirms_and_clears_pending() {
        let (store, _fake) = store();

        let poll_started = Instant::now();
        advance(Duration::from_millis(10)).await;
        store
            .inner
            .apply_optimistic(&[Patch::Position(Duration::from_millis(45_000))]);

        let mut snapshot = playing_snapshot();
        snapshot.position = Duration::from_millis(45_000);
        store.inner.merge(&snapshot, poll_started);

        assert!(!store
            .inner
            .pending
            .lock()
            .unwrap()
            .contains_key(&Field::Position));
        assert_eq!(
            store.inner.state.lock().unwrap().raw_position,
            Duration::from_millis(45_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn merging_the_same_snapshot_twice_is_idempotent() {
        let (store, _fake) = store();
        let mut events = store.subscribe();
        let snapshot = playing_snapshot();

        store.inner.merge(&snapshot, Instant::now());
        assert_eq!(events.try_recv().unwrap(), Event::Changed);

        store.inner.merge(&snapshot, Instant::now());
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_pending_write_no_longer_blocks_polls() {
        let (store, _fake) = store();

        store.inner.apply_optimistic(&[Patch::Volume(120)]);
        let before_write = Instant::now() - Duration::from_millis(10);

        advance(Store::PENDING_TTL + Duration::from_millis(1)).await;
        store.inner.sweep_pending(Instant::now());
        assert!(store.inner.pending.lock().unwrap().is_empty());

        // Even a poll predating the expired write may now apply.
        let mut snapshot = playing_snapshot();
        snapshot.volume = 80;
        store.inner.merge(&snapshot, before_write);
        assert_eq!(store.state().volume(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn effective_position_advances_with_the_clock() {
        let (store, _fake) = store();
        store.inner.merge(&playing_snapshot(), Instant::now());

        let first = store.position();
        advance(Duration::from_millis(250)).await;
        let second = store.position();

        assert_eq!(second - first, Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn paused_position_does_not_advance() {
        let (store, _fake) = store();
        let mut snapshot = playing_snapshot();
        snapshot.status = PlaybackStatus::Paused;
        store.inner.merge(&snapshot, Instant::now());

        let first = store.position();
        advance(Duration::from_secs(3)).await;

        assert_eq!(store.position(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_re_anchors_the_position_timer() {
        let (store, fake) = store();
        let mut snapshot = playing_snapshot();
        snapshot.status = PlaybackStatus::Paused;
        snapshot.position = Duration::from_millis(5000);
        store.inner.merge(&snapshot, Instant::now());

        // Time spent paused must not count as playback.
        advance(Duration::from_secs(3)).await;
        store.set_playing(true).await.unwrap();
        assert!(fake.player().status == 1);

        advance(Duration::from_millis(100)).await;
        assert_eq!(store.position(), Duration::from_millis(5100));
    }

    #[tokio::test(start_paused = true)]
    async fn five_failed_polls_suspend_the_store() {
        let (store, fake) = store();
        store.inner.polling.store(true, Ordering::SeqCst);
        fake.set_fail(true);

        for _ in 0..4 {
            store.inner.poll_tick().await;
            assert!(store.is_polling());
            assert_eq!(store.last_failure(), None);
        }

        store.inner.poll_tick().await;

        assert!(!store.is_polling());
        assert_eq!(store.last_failure(), Some(ConnectionLost { failures: 5 }));
        assert!(!store.state().is_connected());
        assert_eq!(store.state().volume(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_at_streak_four_prevents_suspension() {
        let (store, fake) = store();
        store.inner.polling.store(true, Ordering::SeqCst);

        fake.set_fail(true);
        for _ in 0..4 {
            store.inner.poll_tick().await;
        }

        fake.set_fail(false);
        store.inner.poll_tick().await;

        fake.set_fail(true);
        for _ in 0..4 {
            store.inner.poll_tick().await;
        }

        assert!(store.is_polling());
        assert_eq!(store.last_failure(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn suspension_keeps_fresher_optimistic_writes() {
        let (store, _fake) = store();
        store.inner.merge(&playing_snapshot(), Instant::now());

        // The fatal poll started before this volume write.
        let poll_started = Instant::now();
        advance(Duration::from_millis(10)).await;
        store.inner.apply_optimistic(&[Patch::Volume(120)]);

        store.inner.suspend(5, poll_started);

        let state = store.state();
        assert!(!state.is_connected());
        assert!(!state.is_playing());
        assert_eq!(state.volume(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resumes_polling_and_clears_the_failure() {
        let (store, fake) = store();
        store.inner.polling.store(true, Ordering::SeqCst);

        fake.set_fail(true);
        for _ in 0..5 {
            store.inner.poll_tick().await;
        }
        assert!(!store.is_polling());

        fake.set_fail(false);
        assert!(store.reconnect().await);

        assert!(store.is_polling());
        assert_eq!(store.last_failure(), None);

        store.stop_polling();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_stays_suspended() {
        let (store, fake) = store();
        fake.set_fail(true);

        assert!(!store.reconnect().await);
        assert!(!store.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_repeat_off_forces_local_off() {
        let (store, fake) = store();

        store.set_repeat(RepeatMode::Track).await.unwrap();
        assert_eq!(store.state().repeat(), RepeatMode::Track);
        assert!(fake.player().repeat);

        // The player's repeat gets switched off out of band.
        fake.player().repeat = false;
        advance(Duration::from_millis(10)).await;
        store.inner.poll_tick().await;

        assert_eq!(store.state().repeat(), RepeatMode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_seek_lands_without_a_jump() {
        let (store, fake) = store();

        store.seek(Duration::from_millis(45_000)).await.unwrap();
        assert_eq!(fake.player().position_ms, 45_000);

        advance(Duration::from_millis(10)).await;
        store.inner.poll_tick().await;

        assert!(!store
            .inner
            .pending
            .lock()
            .unwrap()
            .contains_key(&Field::Position));
        assert_eq!(
            store.inner.state.lock().unwrap().raw_position,
            Duration::from_millis(45_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_seek_skips_the_network_call() {
        let (store, fake) = store();
        fake.set_delay(Duration::from_millis(100));

        let background = store.clone();
        let first =
            tokio::spawn(async move { background.seek(Duration::from_secs(10)).await });

        // Let the first seek reach the transport and park on its delay.
        advance(Duration::from_millis(1)).await;
        assert_eq!(fake.calls_to("jumptotime"), 1);

        store.seek(Duration::from_secs(20)).await.unwrap();
        assert_eq!(fake.calls_to("jumptotime"), 1);

        first.await.unwrap().unwrap();
        assert_eq!(fake.calls_to("jumptotime"), 1);

        // The newest optimistic target stays visible.
        assert_eq!(
            store.inner.state.lock().unwrap().raw_position,
            Duration::from_secs(20)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn action_emits_change_before_the_network_resolves() {
        let (store, fake) = store();
        let mut events = store.subscribe();
        fake.set_delay(Duration::from_millis(50));

        let background = store.clone();
        let action = tokio::spawn(async move { background.set_volume(120).await });

        advance(Duration::from_millis(1)).await;
        assert_eq!(events.try_recv().unwrap(), Event::Changed);
        assert_eq!(store.state().volume(), 120);

        action.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_play_rolls_back_and_reraises() {
        let (store, fake) = store();
        let mut events = store.subscribe();
        fake.set_fail(true);

        assert!(store.set_playing(true).await.is_err());

        assert!(!store.state().is_playing());
        // Optimistic emission plus rollback emission.
        assert_eq!(events.try_recv().unwrap(), Event::Changed);
        assert_eq!(events.try_recv().unwrap(), Event::Changed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_volume_keeps_the_optimistic_value() {
        let (store, fake) = store();
        fake.set_fail(true);

        assert!(store.set_volume(120).await.is_err());
        assert_eq!(store.state().volume(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_tick_discards_its_result() {
        let (store, fake) = store();
        store.inner.polling.store(true, Ordering::SeqCst);
        fake.player().volume = 200;
        fake.set_delay(Duration::from_millis(50));

        let background = store.clone();
        let tick = tokio::spawn(async move { background.inner.poll_tick().await });

        advance(Duration::from_millis(1)).await;
        store.stop_polling();
        tick.await.unwrap();

        // The fetched snapshot was not applied.
        assert_eq!(store.state().volume(), 0);
        assert!(!store.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_restarts_polling_and_drops_pending() {
        let (store, _fake) = store();
        store.inner.apply_optimistic(&[Patch::Volume(120)]);

        let epoch = store.inner.epoch.load(Ordering::SeqCst);
        store.reconfigure(Connection {
            host: "10.0.0.9".to_owned(),
            port: 4801,
            password: Password::new("other").unwrap(),
        });

        assert!(store.is_polling());
        assert!(store.inner.pending.lock().unwrap().is_empty());
        assert!(store.inner.superseded(epoch));

        store.stop_polling();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_action_rewinds_and_halts() {
        let (store, fake) = store();
        store.inner.merge(&playing_snapshot(), Instant::now());

        store.stop().await.unwrap();

        assert!(!store.state().is_playing());
        assert_eq!(store.position(), Duration::ZERO);
        assert_eq!(fake.player().status, 0);
    }
}
