//! Events emitted by the reconciliation store.
//!
//! Subscribers receive these through the broadcast channel returned by
//! [`Store::subscribe`](crate::store::Store::subscribe). They can be used
//! to:
//! * Re-render controls after any state change
//! * Surface a persistent connection-lost banner
//! * Offer a manual reconnect affordance
//!
//! # Example
//!
//! ```rust
//! use remamp::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Changed => println!("state changed, re-read the store"),
//!         Event::Disconnected => println!("connection lost, polling suspended"),
//!         Event::Connected => println!("reconnected, polling resumed"),
//!     }
//! }
//! ```

/// Events that can be emitted by the store.
///
/// The store coalesces a poll merge into at most one [`Changed`](Self::Changed)
/// per tick; user actions emit one per applied patch set. Receivers should
/// treat `Changed` as "re-read whatever you display" rather than a diff.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// One or more state fields changed.
    ///
    /// Emitted synchronously when an action applies its optimistic patch,
    /// and once per poll merge that altered any field.
    Changed,

    /// The connection was re-established.
    ///
    /// Emitted when an explicit reconnect probe succeeds and polling
    /// resumes.
    Connected,

    /// The connection was lost and polling is suspended.
    ///
    /// Emitted after a fail streak reaches the threshold. The store stays
    /// suspended until a reconnect succeeds; the UI is expected to show a
    /// disconnected state meanwhile.
    Disconnected,
}
