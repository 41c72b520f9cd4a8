// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Aggregation, delay, and dispatch of message notifications.
//!
//! This crate implements the notification pipeline of a multi-dialog
//! messaging client: raw per-message events go in, grouped and batched
//! [`Update`]s come out, bounded by the account's notification limits and
//! timed by the user's presence on other devices.
//!
//! The [`Notifications`] engine is a synchronous state machine that can be
//! driven by hand (useful for testing and for embedding into an existing
//! event loop); [`Dispatcher`] wraps it in the usual setup, a task with a
//! command handle on one side and a stream of updates on the other.
pub mod context;
mod dispatcher;
mod manager;
pub mod storage;

pub use context::{Context, OnlineStatus};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use manager::{
    DialogId, DialogKind, EXTRA_GROUP_SIZE, GroupId, GroupUpdate, MIN_NOTIFICATION_DELAY_MS,
    NotificationContent, NotificationId, NotificationUpdate, Notifications, RenderedNotification,
    RequestError, Update,
};
