//! HTTP transport for the httpQ endpoint.
//!
//! This module provides the [`Transport`] seam the remote client talks
//! through, plus the production implementation wrapping `reqwest::Client`:
//! * One GET per call, no retry logic of its own
//! * Request rate limiting so a snapshot fan-out cannot flood the small
//!   embedded HTTP server inside the player
//! * Consistent timeouts and user agent
//!
//! # Rate Limiting
//!
//! A full player snapshot issues about a dozen calls at once, every
//! second. The limiter allows that burst but caps the sustained rate, so
//! a stuck caller cannot hammer the endpoint.

use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use thiserror::Error;
use url::Url;

pub use http::StatusCode;

use crate::config::Config;

/// Errors from issuing a single request.
#[derive(Error, Debug)]
pub enum Error {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A raw transport response: status line plus plain-text body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: String,
}

/// One HTTP GET, host-provided.
///
/// The remote client owns all sequencing, failure counting and decoding;
/// implementations of this trait only fetch. The fake player used in tests
/// implements this over an in-memory model.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: Url) -> Result<Response>;
}

/// Production transport with built-in rate limiting.
pub struct Client {
    inner: reqwest::Client,

    /// Rate limiter protecting the remote endpoint.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window for the request rate limit.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(2);

    /// Maximum calls per interval.
    ///
    /// One poll cycle issues roughly a dozen calls; 50 per two seconds
    /// leaves room for a burst of user actions on top of the poll.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 50;

    /// Duration to keep idle connections alive.
    ///
    /// The poll reuses its connection every second, so reconnection
    /// overhead is only paid after a stall.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// httpQ responses are tiny; a read that takes longer than this is a
    /// dead endpoint and should fail fast so the poll cadence recovers.
    const READ_TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates a new transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent)
            .build()?;

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            inner,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }
}

#[async_trait]
impl Transport for Client {
    async fn get(&self, url: Url) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        let response = self.inner.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(Response { status, body })
    }
}
