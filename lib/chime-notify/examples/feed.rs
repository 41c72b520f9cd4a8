// Copyright 2026 - developers of the `chime` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Feed a few notifications through the dispatcher and print the updates
//! a UI would receive.
//!
//! Run it as:
//!
//! ```sh
//! cargo run --example feed
//! ```

use chime_notify::context::{AuthState, OptionRegistry, Presence, SystemClock};
use chime_notify::storage::MemoryCounterStore;
use chime_notify::{
    Context, DialogId, DialogKind, Dispatcher, NotificationContent, Notifications, OnlineStatus,
};
use simple_logger::SimpleLogger;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

struct UserSession;

impl AuthState for UserSession {
    fn is_bot(&self) -> bool {
        false
    }
}

struct Defaults;

impl OptionRegistry for Defaults {
    fn get_int(&self, _name: &str, default: i64) -> i64 {
        default
    }
}

struct Alone;

impl Presence for Alone {
    fn my_status(&self) -> OnlineStatus {
        OnlineStatus::default()
    }
}

#[derive(Debug)]
struct Message(&'static str);

impl NotificationContent for Message {
    fn can_be_delayed(&self) -> bool {
        true
    }

    fn render(&self, _dialog_id: DialogId) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[tokio::main]
async fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .unwrap();

    let notifications = Notifications::new(Context {
        auth: Arc::new(UserSession),
        options: Arc::new(Defaults),
        counters: Arc::new(MemoryCounterStore::new()),
        presence: Arc::new(Alone),
        clock: Arc::new(SystemClock),
    });
    let (dispatcher, handle, mut updates) = Dispatcher::new(notifications);
    let task = tokio::spawn(dispatcher.run());

    let date = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time to run forwards")
        .as_secs() as i32;
    let group_id = handle.allocate_group_id().await;
    let dialog = DialogId::new(DialogKind::User, 10);
    for text in ["hello", "world"] {
        let notification_id = handle.allocate_notification_id().await;
        handle.add_notification(
            group_id,
            dialog,
            date,
            dialog,
            false,
            notification_id,
            Arc::new(Message(text)),
        );
    }

    println!("Waiting for the flush...");
    let update = updates.recv().await.expect("the dispatcher to be alive");
    println!("Got {update:#?}");

    handle.quit();
    task.await.expect("the dispatcher to stop cleanly");
}
