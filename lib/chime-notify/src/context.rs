// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Collaborator interfaces the engine is parameterized over.
//!
//! Everything the engine needs from the enclosing client — authentication
//! state, the shared option registry, presence, server time, and the
//! durable counter store — is injected through a [`Context`] at
//! construction time. There is no module-level state.
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Read-only view of the authentication state of the session.
pub trait AuthState: Send + Sync {
    /// Whether the session belongs to a bot. Bots have no notification UI,
    /// so the engine disables itself entirely for them.
    fn is_bot(&self) -> bool;
}

/// Read-only integer options shared with the rest of the client.
///
/// The registry owner is expected to invoke the engine's `on_*_changed`
/// methods whenever one of the mirrored options changes.
pub trait OptionRegistry: Send + Sync {
    /// Current value for `name`, or `default` when the option is unset.
    fn get_int(&self, name: &str, default: i64) -> i64;
}

/// Durable key-value entries backing the monotonic identifier counters.
///
/// Writes are fire-and-forget: implementations log failures rather than
/// surface them.
pub trait CounterStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Presence oracle for the local user across devices.
pub trait Presence: Send + Sync {
    fn my_status(&self) -> OnlineStatus;
}

/// Cached server unix time, in seconds.
pub trait ServerClock: Send + Sync {
    fn server_time(&self) -> f64;
}

/// Online state of the local user, as reported by the presence oracle.
#[derive(Clone, Copy, Debug, Default)]
pub struct OnlineStatus {
    /// This device is online.
    pub is_online_local: bool,
    /// Some other device of the same account is online.
    pub is_online_remote: bool,
    /// Server unix time this device was last online.
    pub was_online_local: f64,
    /// Server unix time any other device was last online.
    pub was_online_remote: f64,
}

/// Everything the engine consumes from the enclosing client.
#[derive(Clone)]
pub struct Context {
    pub auth: Arc<dyn AuthState>,
    pub options: Arc<dyn OptionRegistry>,
    pub counters: Arc<dyn CounterStore>,
    pub presence: Arc<dyn Presence>,
    pub clock: Arc<dyn ServerClock>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

/// A [`ServerClock`] reading the system wall clock.
///
/// Real clients keep a skew-corrected cache of the server time; using the
/// local clock is good enough when no such cache is available.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl ServerClock for SystemClock {
    fn server_time(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }
}
