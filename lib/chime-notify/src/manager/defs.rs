// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::Instant;
use snafu::Snafu;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Floor applied to every computed dispatch delay, so that flush deadlines
/// never land in the past.
pub const MIN_NOTIFICATION_DELAY_MS: i32 = 1_000;

/// Extra per-group retention beyond the visible suffix. Doubles as the trim
/// hysteresis: a group is only trimmed once it exceeds its keep size by this
/// much, and then drops back down to the keep size.
pub const EXTRA_GROUP_SIZE: usize = 10;

pub(super) const DEFAULT_GROUP_COUNT_MAX: i64 = 10;
pub(super) const DEFAULT_GROUP_SIZE_MAX: i64 = 10;
pub(super) const DEFAULT_ONLINE_CLOUD_TIMEOUT_MS: i64 = 300_000;
pub(super) const DEFAULT_ONLINE_CLOUD_DELAY_MS: i64 = 30_000;
pub(super) const DEFAULT_DEFAULT_DELAY_MS: i64 = 1_500;

pub(super) const MIN_GROUP_COUNT_MAX: i64 = 0;
pub(super) const MAX_GROUP_COUNT_MAX: i64 = 25;
pub(super) const MIN_GROUP_SIZE_MAX: i64 = 1;
pub(super) const MAX_GROUP_SIZE_MAX: i64 = 25;

/// Identifier of a single notification.
///
/// Valid identifiers are strictly positive; the default zero value is the
/// "no notification" sentinel handed out to disabled sessions.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NotificationId(i32);

impl NotificationId {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

/// Identifier of a notification group. Same shape as [`NotificationId`],
/// disjoint namespace.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupId(i32);

impl GroupId {
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

/// The kind of dialog a notification group belongs to.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum DialogKind {
    #[default]
    User,
    Group,
    Channel,
    Secret,
}

/// Identifier of a dialog, tagged with its kind.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DialogId {
    pub kind: DialogKind,
    pub id: i64,
}

impl DialogId {
    pub const fn new(kind: DialogKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub const fn is_valid(self) -> bool {
        self.id != 0
    }
}

/// Content of a notification, supplied by the producer and owned by the
/// engine once accepted.
///
/// Rendering may fail, for example when the source message became
/// inaccessible between acceptance and dispatch; such notifications are
/// dropped from emitted batches without surfacing an error.
pub trait NotificationContent: fmt::Debug + Send + Sync {
    /// Whether dispatch may be deferred while another device of the same
    /// account is likely to be handling this notification already.
    fn can_be_delayed(&self) -> bool;

    /// Produce the wire-level payload shown by the UI, or `None` to drop
    /// this notification from the emitted batch.
    fn render(&self, dialog_id: DialogId) -> Option<String>;
}

/// A rendered notification as carried by [`Update`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedNotification {
    pub id: NotificationId,
    pub content: String,
}

/// A change to a notification group, addressed to the UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupUpdate {
    pub group_id: GroupId,
    pub dialog_id: DialogId,
    /// The dialog whose notification settings decide sound and silence for
    /// the added notifications. Invalid for pure seed additions.
    pub settings_dialog_id: DialogId,
    pub is_silent: bool,
    /// Notifications added to this group and still unseen, as known after
    /// applying this update.
    pub total_count: i32,
    pub added: Vec<RenderedNotification>,
    pub removed_ids: Vec<NotificationId>,
}

/// An in-place change to a single already-visible notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationUpdate {
    pub group_id: GroupId,
    pub notification: RenderedNotification,
}

/// Structured updates emitted towards the UI sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    Group(GroupUpdate),
    Notification(NotificationUpdate),
}

/// Errors reported back to callers of the user-facing removal operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum RequestError {
    /// A group identifier outside the valid range was supplied.
    #[snafu(display("notification group identifier is invalid"))]
    InvalidGroupId,
    /// A notification identifier outside the valid range was supplied.
    #[snafu(display("notification identifier is invalid"))]
    InvalidNotificationId,
    /// The dispatcher stopped before answering.
    #[snafu(display("notification dispatcher is gone"))]
    Dropped,
}

/// A notification already committed to a group's history.
#[derive(Debug)]
pub(super) struct Notification {
    pub(super) id: NotificationId,
    pub(super) content: Arc<dyn NotificationContent>,
}

/// A notification waiting for its group's flush deadline.
#[derive(Debug)]
pub(super) struct PendingNotification {
    pub(super) id: NotificationId,
    /// Server unix time the notified event happened at, in seconds.
    pub(super) date: i32,
    pub(super) settings_dialog_id: DialogId,
    pub(super) is_silent: bool,
    pub(super) content: Arc<dyn NotificationContent>,
}

/// Sort key ranking groups for visibility.
///
/// Orders by last notification date descending, then group id descending,
/// so the most recently updated group compares first. A zero date marks a
/// group that has never flushed; it sorts after every flushed group. The
/// default value is the empty sentinel key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct GroupKey {
    pub(super) group_id: GroupId,
    pub(super) dialog_id: DialogId,
    pub(super) last_notification_date: i32,
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .last_notification_date
            .cmp(&self.last_notification_date)
            .then_with(|| other.group_id.cmp(&self.group_id))
            .then_with(|| self.dialog_id.cmp(&other.dialog_id))
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// State of a single notification group.
#[derive(Debug, Default)]
pub(super) struct Group {
    /// Committed notifications in insertion order, oldest first.
    pub(super) notifications: Vec<Notification>,
    /// Notifications added to this group and still unseen by the user.
    pub(super) total_count: i32,
    /// Queued notifications awaiting the flush deadline.
    pub(super) pending: Vec<PendingNotification>,
    /// When the pending queue is due. `None` iff the queue is empty.
    pub(super) flush_deadline: Option<Instant>,
}
