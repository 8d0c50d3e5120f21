//! The route from other threads onto the main thread.

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::webapp::AppContext;
use crate::error::Error;
use crate::error::Result;
use crate::page::PageObserver;

/// Work posted to run on the main thread during the app's next tick.
pub type Action = Box<dyn FnOnce(&mut AppContext) -> Result<()> + Send + 'static>;

pub(crate) enum AppEvent {
    Loaded,
    TitleChanged(String),
    LoadFailed(String),
    Action(Action),
}

/// Cloneable and usable from any thread. Actions posted after the app has closed are dropped.
#[derive(Clone)]
pub struct UpdateQueue {
    events: UnboundedSender<AppEvent>,
}

impl UpdateQueue {
    pub(crate) fn new() -> (Self, UnboundedReceiver<AppEvent>) {
        let (events, inbox) = mpsc::unbounded_channel();
        (Self { events }, inbox)
    }

    /// Returns false if the app is gone.
    pub fn post(
        &self,
        action: impl FnOnce(&mut AppContext) -> Result<()> + Send + 'static,
    ) -> bool {
        self.send(AppEvent::Action(Box::new(action)))
    }

    pub(crate) fn send(&self, event: AppEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

impl std::fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateQueue").field("closed", &self.events.is_closed()).finish()
    }
}

/// Turns page notifications, which arrive on the page thread, into queued events.
pub(crate) struct QueueObserver {
    pub queue: UpdateQueue,
}

impl PageObserver for QueueObserver {
    fn on_load(&self) {
        self.queue.send(AppEvent::Loaded);
    }

    fn on_title_change(&self, title: &str) {
        self.queue.send(AppEvent::TitleChanged(title.to_owned()));
    }

    fn on_load_error(&self, error: &Error) {
        debug!(%error, "page failed to load");
        self.queue.send(AppEvent::LoadFailed(error.to_string()));
    }
}
