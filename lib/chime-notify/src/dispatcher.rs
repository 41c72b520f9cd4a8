// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Async driving loop around [`Notifications`].
//!
//! The engine itself is synchronous; this module gives it the mailbox it is
//! meant to live behind. Commands arrive over an unbounded channel through
//! a cheap [`DispatcherHandle`], emitted [`Update`]s leave through another,
//! and in between commands the loop sleeps until the earliest pending flush
//! deadline. Each command runs to completion before the next one or a flush
//! is looked at, so operations never interleave.
use crate::manager::{
    DialogId, GroupId, Instant, NotificationContent, NotificationId, Notifications, RequestError,
    Update,
};
use futures_util::future::{Either, pending, select};
use log::debug;
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Request {
    Add {
        group_id: GroupId,
        dialog_id: DialogId,
        date: i32,
        settings_dialog_id: DialogId,
        is_silent: bool,
        notification_id: NotificationId,
        content: Arc<dyn NotificationContent>,
    },
    Edit {
        group_id: GroupId,
        notification_id: NotificationId,
        content: Arc<dyn NotificationContent>,
    },
    Remove {
        group_id: GroupId,
        notification_id: NotificationId,
        tx: oneshot::Sender<Result<(), RequestError>>,
    },
    RemoveGroup {
        group_id: GroupId,
        max_notification_id: NotificationId,
        tx: oneshot::Sender<Result<(), RequestError>>,
    },
    AllocateNotificationId(oneshot::Sender<NotificationId>),
    AllocateGroupId(oneshot::Sender<GroupId>),
    Quit,
}

/// Cheap cloneable handle used to feed the [`Dispatcher`] from anywhere.
#[derive(Clone)]
pub struct DispatcherHandle(mpsc::UnboundedSender<Request>);

/// Owns a [`Notifications`] engine and drives its flush deadlines.
pub struct Dispatcher {
    notifications: Notifications,
    request_rx: mpsc::UnboundedReceiver<Request>,
    updates_tx: mpsc::UnboundedSender<Update>,
}

impl DispatcherHandle {
    /// Queue a notification. Returns `false` if the dispatcher is gone.
    #[allow(clippy::too_many_arguments)]
    pub fn add_notification(
        &self,
        group_id: GroupId,
        dialog_id: DialogId,
        date: i32,
        settings_dialog_id: DialogId,
        is_silent: bool,
        notification_id: NotificationId,
        content: Arc<dyn NotificationContent>,
    ) -> bool {
        self.0
            .send(Request::Add {
                group_id,
                dialog_id,
                date,
                settings_dialog_id,
                is_silent,
                notification_id,
                content,
            })
            .is_ok()
    }

    /// Replace the content of an accepted notification. Returns `false` if
    /// the dispatcher is gone.
    pub fn edit_notification(
        &self,
        group_id: GroupId,
        notification_id: NotificationId,
        content: Arc<dyn NotificationContent>,
    ) -> bool {
        self.0
            .send(Request::Edit {
                group_id,
                notification_id,
                content,
            })
            .is_ok()
    }

    /// Remove a single notification on behalf of the user.
    pub async fn remove_notification(
        &self,
        group_id: GroupId,
        notification_id: NotificationId,
    ) -> Result<(), RequestError> {
        let (tx, rx) = oneshot::channel();
        self.0
            .send(Request::Remove {
                group_id,
                notification_id,
                tx,
            })
            .map_err(|_| RequestError::Dropped)?;
        rx.await.map_err(|_| RequestError::Dropped)?
    }

    /// Remove every notification in a group up to `max_notification_id`.
    pub async fn remove_notification_group(
        &self,
        group_id: GroupId,
        max_notification_id: NotificationId,
    ) -> Result<(), RequestError> {
        let (tx, rx) = oneshot::channel();
        self.0
            .send(Request::RemoveGroup {
                group_id,
                max_notification_id,
                tx,
            })
            .map_err(|_| RequestError::Dropped)?;
        rx.await.map_err(|_| RequestError::Dropped)?
    }

    /// Allocate the next notification identifier.
    ///
    /// Returns the invalid sentinel when the dispatcher is gone or the
    /// session is a bot session.
    pub async fn allocate_notification_id(&self) -> NotificationId {
        let (tx, rx) = oneshot::channel();
        let _ = self.0.send(Request::AllocateNotificationId(tx));
        rx.await.unwrap_or_default()
    }

    /// Allocate the next group identifier.
    pub async fn allocate_group_id(&self) -> GroupId {
        let (tx, rx) = oneshot::channel();
        let _ = self.0.send(Request::AllocateGroupId(tx));
        rx.await.unwrap_or_default()
    }

    /// Stop the dispatcher. Pending flushes are abandoned, not emitted.
    pub fn quit(&self) -> bool {
        self.0.send(Request::Quit).is_ok()
    }
}

impl Dispatcher {
    /// Wrap an engine, returning the dispatcher itself (to be
    /// [`run`](Self::run)), the command handle, and the stream of updates
    /// addressed to the UI.
    pub fn new(
        notifications: Notifications,
    ) -> (Self, DispatcherHandle, mpsc::UnboundedReceiver<Update>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        (
            Self {
                notifications,
                request_rx,
                updates_tx,
            },
            DispatcherHandle(request_tx),
            updates_rx,
        )
    }

    /// Run until every handle is dropped or [`DispatcherHandle::quit`] is
    /// called.
    pub async fn run(mut self) {
        loop {
            let deadline = self.notifications.next_flush_deadline();
            let request = {
                let request = pin!(self.request_rx.recv());
                let timeout = pin!(flush_timeout(deadline));
                match select(request, timeout).await {
                    Either::Left((request, _)) => request,
                    Either::Right(((), _)) => {
                        let updates = self.notifications.flush_expired();
                        forward(&self.updates_tx, updates);
                        continue;
                    }
                }
            };

            match request {
                None | Some(Request::Quit) => break,
                Some(Request::Add {
                    group_id,
                    dialog_id,
                    date,
                    settings_dialog_id,
                    is_silent,
                    notification_id,
                    content,
                }) => self.notifications.add_notification(
                    group_id,
                    dialog_id,
                    date,
                    settings_dialog_id,
                    is_silent,
                    notification_id,
                    content,
                ),
                Some(Request::Edit {
                    group_id,
                    notification_id,
                    content,
                }) => {
                    let updates =
                        self.notifications
                            .edit_notification(group_id, notification_id, content);
                    forward(&self.updates_tx, updates);
                }
                Some(Request::Remove {
                    group_id,
                    notification_id,
                    tx,
                }) => {
                    match self
                        .notifications
                        .remove_notification(group_id, notification_id)
                    {
                        Ok(updates) => {
                            let _ = tx.send(Ok(()));
                            forward(&self.updates_tx, updates);
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                        }
                    }
                }
                Some(Request::RemoveGroup {
                    group_id,
                    max_notification_id,
                    tx,
                }) => {
                    match self
                        .notifications
                        .remove_notification_group(group_id, max_notification_id)
                    {
                        Ok(updates) => {
                            let _ = tx.send(Ok(()));
                            forward(&self.updates_tx, updates);
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                        }
                    }
                }
                Some(Request::AllocateNotificationId(tx)) => {
                    let _ = tx.send(self.notifications.next_notification_id());
                }
                Some(Request::AllocateGroupId(tx)) => {
                    let _ = tx.send(self.notifications.next_group_id());
                }
            }
        }
        debug!("notification dispatcher stopped");
    }
}

fn forward(updates_tx: &mpsc::UnboundedSender<Update>, updates: Vec<Update>) {
    for update in updates {
        // The sink is fire-and-forget; a dropped receiver is not an error.
        let _ = updates_tx.send(update);
    }
}

async fn flush_timeout(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep(deadline.saturating_duration_since(Instant::now())).await
        }
        None => pending().await,
    }
}
