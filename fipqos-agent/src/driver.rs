use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::{FipQosAgentExtension, PolicyPull, RateLimiterFactory, ResourceUpdate, ResourceUpdates};

/// Feeds pushed policy notifications to the extension.
///
/// Handlers run on the blocking thread pool since they shell out to `tc`. Notifications are
/// handled one at a time, in the order they were published. The driver completes when the
/// subscription ends.
pub struct NotificationDriver<P, F: RateLimiterFactory> {
    extension: Arc<FipQosAgentExtension<P, F>>,
    updates: ResourceUpdates,
    /// The handler of the current notification, if any.
    in_flight: Option<JoinHandle<()>>,
}

impl<P, F: RateLimiterFactory> fmt::Debug for NotificationDriver<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDriver")
            .field("updates", &self.updates)
            .field("in_flight", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}

impl<P, F> NotificationDriver<P, F>
where
    P: PolicyPull + 'static,
    F: RateLimiterFactory + 'static,
{
    pub fn new(extension: Arc<FipQosAgentExtension<P, F>>, updates: ResourceUpdates) -> Self {
        Self { extension, updates, in_flight: None }
    }

    fn on_update(&mut self, update: ResourceUpdate) {
        debug!(
            resource_type = %update.resource_type,
            event = %update.event,
            resources = update.resources.len(),
            "received notification"
        );

        let extension = Arc::clone(&self.extension);
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            extension.handle_notification(
                &update.context,
                update.resource_type,
                &update.resources,
                update.event,
            );
        }));
    }
}

impl<P, F> Future for NotificationDriver<P, F>
where
    P: PolicyPull + 'static,
    F: RateLimiterFactory + 'static,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            // Finish the current notification before taking the next one.
            if let Some(task) = this.in_flight.as_mut() {
                let result = futures::ready!(Pin::new(task).poll(cx));
                this.in_flight = None;

                if let Err(e) = result {
                    error!(err = ?e, "notification handler failed");
                }
            }

            match futures::ready!(this.updates.poll_next_unpin(cx)) {
                Some(update) => this.on_update(update),
                None => {
                    debug!("notification subscription closed");
                    return Poll::Ready(());
                }
            }
        }
    }
}
