//! Mock notification sink for testing.

use std::sync::Mutex;

use crate::notify::Notifier;

/// Records every notification for assertions.
#[derive(Default)]
pub struct MockNotifier {
    notifications: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}
