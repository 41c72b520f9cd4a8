// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Aggregation and dispatch of notifications towards the UI.
//!
//! Incoming notifications are not shown immediately: each one lands in the
//! pending queue of its group and is held back for a delay that depends on
//! whether some other device of the account is likely to be handling it
//! already. When the earliest deadline of a group expires, the whole queue
//! is flushed at once: pending items are committed to the group history, the
//! group is re-ranked by its newest notification date, and the resulting
//! changes are emitted as [`Update`]s.
//!
//! Only the first `notification_group_count_max` groups under the key order
//! are visible to the UI, and only the last `notification_group_size_max`
//! notifications inside each. Flushing a group into the visible window
//! displaces the group occupying the last slot, which the UI is told about
//! as a removal update, followed by an addition seeding the entering group's
//! previously committed history.
mod defs;

use crate::context::Context;
pub use defs::{
    DialogId, DialogKind, EXTRA_GROUP_SIZE, GroupId, GroupUpdate, MIN_NOTIFICATION_DELAY_MS,
    NotificationContent, NotificationId, NotificationUpdate, RenderedNotification, RequestError,
    Update,
};
use defs::{
    DEFAULT_DEFAULT_DELAY_MS, DEFAULT_GROUP_COUNT_MAX, DEFAULT_GROUP_SIZE_MAX,
    DEFAULT_ONLINE_CLOUD_DELAY_MS, DEFAULT_ONLINE_CLOUD_TIMEOUT_MS, Group, GroupKey,
    MAX_GROUP_COUNT_MAX, MAX_GROUP_SIZE_MAX, MIN_GROUP_COUNT_MAX, MIN_GROUP_SIZE_MAX,
    Notification, PendingNotification,
};
use log::{debug, trace, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
#[cfg(test)]
pub(crate) use tests::Instant;
#[cfg(not(test))]
pub(crate) use web_time::Instant;

/// The notification aggregation engine.
///
/// All operations are synchronous and complete atomically with respect to
/// each other; the async [`Dispatcher`](crate::Dispatcher) owns an instance
/// and drives its flush deadlines. Everything the engine consumes from the
/// enclosing client comes through the injected [`Context`].
pub struct Notifications {
    context: Context,

    current_notification_id: i32,
    current_group_id: i32,

    max_group_count: usize,
    max_group_size: usize,
    keep_group_size: usize,
    online_cloud_timeout_ms: i32,
    notification_cloud_delay_ms: i32,
    notification_default_delay_ms: i32,

    groups: BTreeMap<GroupKey, Group>,
}

/// Creation, identifier allocation, and option mirroring.
impl Notifications {
    /// Create an engine, loading the identifier counters from the durable
    /// store and mirroring the current option values.
    ///
    /// Bot sessions have no notification UI; for them the engine disables
    /// itself and every operation becomes a no-op.
    pub fn new(context: Context) -> Self {
        let mut this = Self {
            context,
            current_notification_id: 0,
            current_group_id: 0,
            max_group_count: 0,
            max_group_size: 0,
            keep_group_size: 0,
            online_cloud_timeout_ms: 0,
            notification_cloud_delay_ms: 0,
            notification_default_delay_ms: 0,
            groups: BTreeMap::new(),
        };
        if this.is_disabled() {
            return this;
        }

        this.current_notification_id = this.load_counter("notification_id_current");
        this.current_group_id = this.load_counter("notification_group_id_current");

        this.on_group_count_max_changed();
        this.on_group_size_max_changed();
        this.on_online_cloud_timeout_changed();
        this.on_notification_cloud_delay_changed();
        this.on_notification_default_delay_changed();

        this
    }

    fn is_disabled(&self) -> bool {
        self.context.auth.is_bot()
    }

    fn load_counter(&self, key: &str) -> i32 {
        self.context
            .counters
            .get(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    /// Allocate the next notification identifier, persisting the counter.
    ///
    /// Identifiers stay within the positive `i32` range, wrapping back to 1
    /// past `0x7FFF_FFFF`. Returns the invalid sentinel for bot sessions.
    pub fn next_notification_id(&mut self) -> NotificationId {
        if self.is_disabled() {
            return NotificationId::default();
        }

        self.current_notification_id = self.current_notification_id % 0x7FFF_FFFF + 1;
        self.context.counters.set(
            "notification_id_current",
            &self.current_notification_id.to_string(),
        );
        NotificationId::new(self.current_notification_id)
    }

    /// Allocate the next group identifier, persisting the counter.
    pub fn next_group_id(&mut self) -> GroupId {
        if self.is_disabled() {
            return GroupId::default();
        }

        self.current_group_id = self.current_group_id % 0x7FFF_FFFF + 1;
        self.context
            .counters
            .set("notification_group_id_current", &self.current_group_id.to_string());
        GroupId::new(self.current_group_id)
    }

    /// Re-read `notification_group_count_max` from the option registry.
    pub fn on_group_count_max_changed(&mut self) {
        if self.is_disabled() {
            return;
        }

        let count = self.clamped_option(
            "notification_group_count_max",
            DEFAULT_GROUP_COUNT_MAX,
            MIN_GROUP_COUNT_MAX,
            MAX_GROUP_COUNT_MAX,
        ) as usize;
        if count == self.max_group_count {
            return;
        }

        debug!(
            "change max notification group count from {} to {}",
            self.max_group_count, count
        );
        // Groups already outside or inside the window keep their state; the
        // new bound applies from the next flush onwards.
        self.max_group_count = count;
    }

    /// Re-read `notification_group_size_max` and derive the retention size.
    pub fn on_group_size_max_changed(&mut self) {
        if self.is_disabled() {
            return;
        }

        let size = self.clamped_option(
            "notification_group_size_max",
            DEFAULT_GROUP_SIZE_MAX,
            MIN_GROUP_SIZE_MAX,
            MAX_GROUP_SIZE_MAX,
        ) as usize;
        if size == self.max_group_size {
            return;
        }

        debug!(
            "change max notification group size from {} to {}",
            self.max_group_size, size
        );
        self.max_group_size = size;
        self.keep_group_size = size + (EXTRA_GROUP_SIZE / 2).max(size.min(EXTRA_GROUP_SIZE));
    }

    /// Re-read `online_cloud_timeout_ms`.
    pub fn on_online_cloud_timeout_changed(&mut self) {
        self.online_cloud_timeout_ms = self
            .context
            .options
            .get_int("online_cloud_timeout_ms", DEFAULT_ONLINE_CLOUD_TIMEOUT_MS)
            as i32;
        debug!("set online_cloud_timeout_ms to {}", self.online_cloud_timeout_ms);
    }

    /// Re-read `notification_cloud_delay_ms`.
    pub fn on_notification_cloud_delay_changed(&mut self) {
        self.notification_cloud_delay_ms = self
            .context
            .options
            .get_int("notification_cloud_delay_ms", DEFAULT_ONLINE_CLOUD_DELAY_MS)
            as i32;
        debug!(
            "set notification_cloud_delay_ms to {}",
            self.notification_cloud_delay_ms
        );
    }

    /// Re-read `notification_default_delay_ms`.
    pub fn on_notification_default_delay_changed(&mut self) {
        self.notification_default_delay_ms = self
            .context
            .options
            .get_int("notification_default_delay_ms", DEFAULT_DEFAULT_DELAY_MS)
            as i32;
        debug!(
            "set notification_default_delay_ms to {}",
            self.notification_default_delay_ms
        );
    }

    fn clamped_option(&self, name: &str, default: i64, min: i64, max: i64) -> i64 {
        let value = self.context.options.get_int(name, default);
        let clamped = value.clamp(min, max);
        if clamped != value {
            warn!("{} = {} is out of range, using {}", name, value, clamped);
        }
        clamped
    }
}

/// Acceptance of new notifications and flush scheduling.
impl Notifications {
    /// Queue a notification for `group_id`, creating the group on first use.
    ///
    /// The notification is not shown immediately; it waits in the group's
    /// pending queue until the flush deadline computed from the delay policy
    /// expires. A queued notification never postpones an already-scheduled
    /// earlier flush, but an earlier deadline replaces a later one.
    ///
    /// This is the internal producer interface: all identifiers must be
    /// valid, or the call panics.
    #[allow(clippy::too_many_arguments)]
    pub fn add_notification(
        &mut self,
        group_id: GroupId,
        dialog_id: DialogId,
        date: i32,
        settings_dialog_id: DialogId,
        is_silent: bool,
        notification_id: NotificationId,
        content: Arc<dyn NotificationContent>,
    ) {
        if self.is_disabled() {
            return;
        }

        assert!(group_id.is_valid());
        assert!(dialog_id.is_valid());
        assert!(settings_dialog_id.is_valid());
        assert!(notification_id.is_valid());
        debug!(
            "add {:?} to {:?} in {:?} with settings from {:?}{}: {:?}",
            notification_id,
            group_id,
            dialog_id,
            settings_dialog_id,
            if is_silent { " silently" } else { "" },
            content
        );

        let key = match self.group_key(group_id) {
            Some(key) => key,
            None => {
                let key = GroupKey {
                    group_id,
                    dialog_id,
                    last_notification_date: 0,
                };
                self.groups.insert(key, Group::default());
                key
            }
        };

        let notification = PendingNotification {
            id: notification_id,
            date,
            settings_dialog_id,
            is_silent,
            content,
        };

        let delay_ms = self.notification_delay_ms(dialog_id, &notification);
        trace!("delay {:?} for {} milliseconds", notification_id, delay_ms);
        let flush_at = Instant::now() + Duration::from_millis(delay_ms as u64);

        let group = self
            .groups
            .get_mut(&key)
            .expect("group for key just looked up");
        if group
            .flush_deadline
            .is_none_or(|deadline| flush_at < deadline)
        {
            group.flush_deadline = Some(flush_at);
        }
        group.pending.push(notification);
    }

    /// Delay before `notification` may be dispatched, in milliseconds.
    ///
    /// Time already spent between the notified event and now is subtracted
    /// from the base delay, with one second of slack for clock skew; the
    /// result never goes below [`MIN_NOTIFICATION_DELAY_MS`].
    fn notification_delay_ms(
        &self,
        dialog_id: DialogId,
        notification: &PendingNotification,
    ) -> i32 {
        let delay_ms = self.base_delay_ms(dialog_id, notification);

        let server_time = self.context.clock.server_time();
        let passed_ms =
            (((server_time - notification.date as f64 - 1.0) * 1000.0) as i32).max(0);
        (delay_ms - passed_ms).max(MIN_NOTIFICATION_DELAY_MS)
    }

    fn base_delay_ms(&self, dialog_id: DialogId, notification: &PendingNotification) -> i32 {
        if dialog_id.kind == DialogKind::Secret {
            // Secret chats are device-local; no other device can be
            // handling the notification.
            return 0;
        }
        if !notification.content.can_be_delayed() {
            return 0;
        }

        let status = self.context.presence.my_status();
        if !status.is_online_local && status.is_online_remote {
            // Offline here, online elsewhere: the other client presumably
            // shows the notification already.
            return self.notification_cloud_delay_ms;
        }

        if !status.is_online_local
            && status.was_online_remote
                > status.was_online_local.max(
                    self.context.clock.server_time()
                        - self.online_cloud_timeout_ms as f64 * 1e-3,
                )
        {
            // Some other client was online after this one went offline, and
            // recently enough to still count.
            return self.notification_cloud_delay_ms;
        }

        if status.is_online_remote {
            return self.notification_default_delay_ms;
        }

        0
    }

    /// Earliest pending flush deadline across all groups, if any.
    pub fn next_flush_deadline(&self) -> Option<Instant> {
        self.groups
            .values()
            .filter_map(|group| group.flush_deadline)
            .min()
    }

    /// Flush every group whose deadline has expired, returning the updates
    /// to forward to the UI.
    pub fn flush_expired(&mut self) -> Vec<Update> {
        let now = Instant::now();
        let due: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|(_, group)| group.flush_deadline.is_some_and(|deadline| deadline <= now))
            .map(|(key, _)| key.group_id)
            .collect();

        let mut updates = Vec::new();
        for group_id in due {
            self.flush_group_into(group_id, &mut updates);
        }
        updates
    }

    /// Flush a group's pending queue immediately, ahead of its deadline.
    ///
    /// The group must exist and have pending notifications.
    pub fn flush_group(&mut self, group_id: GroupId) -> Vec<Update> {
        let mut updates = Vec::new();
        self.flush_group_into(group_id, &mut updates);
        updates
    }
}

/// The flush path.
impl Notifications {
    // TODO keep a group id index to avoid these scans once stores grow well
    // beyond the visible window
    fn group_key(&self, group_id: GroupId) -> Option<GroupKey> {
        self.groups
            .keys()
            .find(|key| key.group_id == group_id)
            .copied()
    }

    /// Key of the group occupying the last visible slot, or the empty
    /// sentinel when fewer than `max_group_count` groups exist.
    ///
    /// A key comparing before this one is, or would be once inserted,
    /// inside the visible window.
    fn last_visible_key(&self) -> GroupKey {
        let mut left = self.max_group_count;
        let mut iter = self.groups.keys();
        let mut key = iter.next();
        while key.is_some() && left > 1 {
            key = iter.next();
            left -= 1;
        }
        key.copied().unwrap_or_default()
    }

    fn flush_group_into(&mut self, group_id: GroupId, updates: &mut Vec<Update>) {
        let key = self.group_key(group_id).expect("flushed group to exist");
        let mut group = self
            .groups
            .remove(&key)
            .expect("group for key just looked up");

        assert!(!group.pending.is_empty());
        let mut final_key = key;
        for notification in &group.pending {
            if notification.date >= final_key.last_notification_date {
                final_key.last_notification_date = notification.date;
            }
        }
        assert!(final_key.last_notification_date != 0);

        debug!(
            "flush {} pending notifications in {:?} up to date {}",
            group.pending.len(),
            key,
            final_key.last_notification_date
        );

        let last_key = self.last_visible_key();
        let was_visible = key.last_notification_date != 0 && key < last_key;
        let is_visible = final_key < last_key;

        if !is_visible {
            assert!(!was_visible);
            trace!("no update in {:?} because of newer notification groups", key);
            // Still unseen by the user: the total keeps counting even when
            // no update is emitted.
            group.total_count += group.pending.len() as i32;
            for notification in group.pending.drain(..) {
                group.notifications.push(Notification {
                    id: notification.id,
                    content: notification.content,
                });
            }
        } else {
            if !was_visible {
                if last_key.last_notification_date != 0 {
                    // The displaced group has to leave first, or the UI
                    // would briefly show more groups than the window allows.
                    self.remove_group_update(last_key.group_id, updates);
                }
                self.add_group_update(&key, &group, updates);
            }

            // Split the queue into runs sharing the settings source and the
            // silence flag; each run becomes one update.
            let mut settings_dialog_id = DialogId::default();
            let mut is_silent = false;
            let mut batch = Vec::new();
            for notification in std::mem::take(&mut group.pending) {
                if settings_dialog_id != notification.settings_dialog_id
                    || is_silent != notification.is_silent
                {
                    self.flush_batch(&key, &mut group, &mut batch, updates);
                    settings_dialog_id = notification.settings_dialog_id;
                    is_silent = notification.is_silent;
                }
                batch.push(notification);
            }
            self.flush_batch(&key, &mut group, &mut batch, updates);
        }

        group.flush_deadline = None;
        group.pending.clear();
        if group.notifications.len() > self.keep_group_size + EXTRA_GROUP_SIZE {
            // Trim in batches: the threshold exceeds the target by
            // EXTRA_GROUP_SIZE so the prefix shift runs rarely.
            let excess = group.notifications.len() - self.keep_group_size;
            group.notifications.drain(..excess);
        }

        self.groups.insert(final_key, group);
    }

    /// Emit one update committing `batch` to `group`.
    ///
    /// Renders each queued notification, dropping unrenderable ones, caps
    /// the additions at the group size bound, and withdraws however many of
    /// the currently shown notifications no longer fit. Every committed
    /// notification counts towards the group total, even when the cap keeps
    /// it out of the additions vector.
    fn flush_batch(
        &self,
        key: &GroupKey,
        group: &mut Group,
        batch: &mut Vec<PendingNotification>,
        updates: &mut Vec<Update>,
    ) {
        if batch.is_empty() {
            return;
        }

        trace!(
            "flush {} notifications in {:?} with {} available of {} total",
            batch.len(),
            key,
            group.notifications.len(),
            group.total_count
        );

        let old_count = group.notifications.len();
        let shown_count = old_count.min(self.max_group_size);
        let settings_dialog_id = batch[0].settings_dialog_id;
        let is_silent = batch[0].is_silent;

        let mut added = Vec::with_capacity(batch.len());
        for notification in batch.drain(..) {
            match notification.content.render(key.dialog_id) {
                Some(content) => {
                    added.push(RenderedNotification {
                        id: notification.id,
                        content,
                    });
                    group.notifications.push(Notification {
                        id: notification.id,
                        content: notification.content,
                    });
                }
                None => trace!("drop unrenderable {:?}", notification.id),
            }
        }
        group.total_count += (group.notifications.len() - old_count) as i32;
        if added.len() > self.max_group_size {
            added.drain(..added.len() - self.max_group_size);
        }

        let mut removed_ids = Vec::new();
        if shown_count + added.len() > self.max_group_size {
            let removed_count = shown_count + added.len() - self.max_group_size;
            removed_ids.reserve(removed_count);
            for i in 0..removed_count {
                removed_ids.push(group.notifications[old_count - shown_count + i].id);
            }
        }

        if added.is_empty() {
            assert!(removed_ids.is_empty());
            return;
        }

        updates.push(Update::Group(GroupUpdate {
            group_id: key.group_id,
            dialog_id: key.dialog_id,
            settings_dialog_id,
            is_silent,
            total_count: group.total_count,
            added,
            removed_ids,
        }));
    }

    /// Withdraw the visible suffix of a group falling out of the window.
    fn remove_group_update(&self, group_id: GroupId, updates: &mut Vec<Update>) {
        assert!(group_id.is_valid());
        let key = self.group_key(group_id).expect("displaced group to exist");
        let group = &self.groups[&key];

        let total_size = group.notifications.len();
        let removed_size = total_size.min(self.max_group_size);
        let removed_ids: Vec<NotificationId> = group.notifications[total_size - removed_size..]
            .iter()
            .map(|notification| notification.id)
            .collect();

        if !removed_ids.is_empty() {
            updates.push(Update::Group(GroupUpdate {
                group_id,
                dialog_id: key.dialog_id,
                settings_dialog_id: key.dialog_id,
                is_silent: true,
                total_count: 0,
                added: Vec::new(),
                removed_ids,
            }));
        }
    }

    /// Seed the UI with the committed history of a group entering the
    /// window, before any pending notifications are applied on top.
    fn add_group_update(&self, key: &GroupKey, group: &Group, updates: &mut Vec<Update>) {
        let total_size = group.notifications.len();
        let added_size = total_size.min(self.max_group_size);
        let added: Vec<RenderedNotification> = group.notifications[total_size - added_size..]
            .iter()
            .filter_map(|notification| {
                notification
                    .content
                    .render(key.dialog_id)
                    .map(|content| RenderedNotification {
                        id: notification.id,
                        content,
                    })
            })
            .collect();

        if !added.is_empty() {
            updates.push(Update::Group(GroupUpdate {
                group_id: key.group_id,
                dialog_id: key.dialog_id,
                settings_dialog_id: DialogId::default(),
                is_silent: true,
                total_count: 0,
                added,
                removed_ids: Vec::new(),
            }));
        }
    }
}

/// Targeted edits and user-requested removals.
impl Notifications {
    /// Replace the content of an already-accepted notification.
    ///
    /// Emits an update only when the notification sits in the visible
    /// suffix of its group and still renders to something. The pending
    /// queue is scanned as well: the same identifier may be queued again
    /// behind an already-committed copy, and both must agree.
    pub fn edit_notification(
        &mut self,
        group_id: GroupId,
        notification_id: NotificationId,
        content: Arc<dyn NotificationContent>,
    ) -> Vec<Update> {
        if self.is_disabled() {
            return Vec::new();
        }

        assert!(notification_id.is_valid());
        debug!("edit {:?}: {:?}", notification_id, content);

        let mut updates = Vec::new();
        let Some(key) = self.group_key(group_id) else {
            return updates;
        };
        let max_group_size = self.max_group_size;
        let group = self
            .groups
            .get_mut(&key)
            .expect("group for key just looked up");

        let count = group.notifications.len();
        for (i, notification) in group.notifications.iter_mut().enumerate() {
            if notification.id != notification_id {
                continue;
            }
            notification.content = content.clone();
            if i + max_group_size >= count {
                if let Some(rendered) = notification.content.render(key.dialog_id) {
                    let update = NotificationUpdate {
                        group_id: key.group_id,
                        notification: RenderedNotification {
                            id: notification_id,
                            content: rendered,
                        },
                    };
                    trace!("send {:?}", update);
                    updates.push(Update::Notification(update));
                }
            }
        }
        for notification in &mut group.pending {
            if notification.id == notification_id {
                notification.content = content.clone();
            }
        }
        updates
    }

    /// Remove a single notification on behalf of the user.
    ///
    /// Invalid identifiers are reported back as [`RequestError`]s; removing
    /// an unknown notification is not an error. An update is emitted only
    /// when the removed notification was visible.
    pub fn remove_notification(
        &mut self,
        group_id: GroupId,
        notification_id: NotificationId,
    ) -> Result<Vec<Update>, RequestError> {
        if !group_id.is_valid() {
            return Err(RequestError::InvalidGroupId);
        }
        if !notification_id.is_valid() {
            return Err(RequestError::InvalidNotificationId);
        }
        if self.is_disabled() {
            return Ok(Vec::new());
        }

        debug!("remove {:?} from {:?}", notification_id, group_id);

        let mut updates = Vec::new();
        let Some(key) = self.group_key(group_id) else {
            return Ok(updates);
        };
        let max_group_size = self.max_group_size;
        let group = self
            .groups
            .get_mut(&key)
            .expect("group for key just looked up");
        let Some(position) = group
            .notifications
            .iter()
            .position(|notification| notification.id == notification_id)
        else {
            return Ok(updates);
        };

        let was_visible = position + max_group_size >= group.notifications.len();
        group.notifications.remove(position);
        if was_visible {
            group.total_count -= 1;
            updates.push(Update::Group(GroupUpdate {
                group_id,
                dialog_id: key.dialog_id,
                settings_dialog_id: key.dialog_id,
                is_silent: true,
                total_count: group.total_count,
                added: Vec::new(),
                removed_ids: vec![notification_id],
            }));
        }
        Ok(updates)
    }

    /// Remove every notification in a group up to `max_notification_id`,
    /// both committed and still pending.
    pub fn remove_notification_group(
        &mut self,
        group_id: GroupId,
        max_notification_id: NotificationId,
    ) -> Result<Vec<Update>, RequestError> {
        if !group_id.is_valid() {
            return Err(RequestError::InvalidGroupId);
        }
        if !max_notification_id.is_valid() {
            return Err(RequestError::InvalidNotificationId);
        }
        if self.is_disabled() {
            return Ok(Vec::new());
        }

        debug!("remove {:?} up to {:?}", group_id, max_notification_id);

        let mut updates = Vec::new();
        let Some(key) = self.group_key(group_id) else {
            return Ok(updates);
        };
        let max_group_size = self.max_group_size;
        let group = self
            .groups
            .get_mut(&key)
            .expect("group for key just looked up");

        let visible_from = group.notifications.len().saturating_sub(max_group_size);
        let removed_ids: Vec<NotificationId> = group.notifications[visible_from..]
            .iter()
            .map(|notification| notification.id)
            .filter(|&id| id <= max_notification_id)
            .collect();

        group
            .notifications
            .retain(|notification| notification.id > max_notification_id);
        group
            .pending
            .retain(|notification| notification.id > max_notification_id);
        if group.pending.is_empty() {
            group.flush_deadline = None;
        }

        if !removed_ids.is_empty() {
            group.total_count -= removed_ids.len() as i32;
            updates.push(Update::Group(GroupUpdate {
                group_id,
                dialog_id: key.dialog_id,
                settings_dialog_id: key.dialog_id,
                is_silent: true,
                total_count: group.total_count,
                added: Vec::new(),
                removed_ids,
            }));
        }
        Ok(updates)
    }
}
