use std::sync::Mutex;

use tokio::sync::watch;

use crate::worker::RequestId;

/// Latest-value cell for one derived view.
///
/// Subscribers see the most recent published value. A result is published
/// only if its request id is still the newest one issued for this view, so a
/// slow earlier computation cannot overwrite a later one.
pub(crate) struct ViewSlot<T> {
    sender: watch::Sender<T>,
    latest: Mutex<RequestId>,
}

impl<T: Clone> ViewSlot<T> {
    pub(crate) fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender,
            latest: Mutex::new(0),
        }
    }

    /// Records `request_id` as issued for this view.
    pub(crate) fn begin(&self, request_id: RequestId) {
        let mut latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *latest = (*latest).max(request_id);
    }

    /// Returns false and drops `value` if a newer request has been issued.
    pub(crate) fn publish(&self, request_id: RequestId, value: T) -> bool {
        let latest = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *latest != request_id {
            return false;
        }
        self.sender.send_replace(value);
        true
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}
