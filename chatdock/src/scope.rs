//! Ownership of background tasks and subscriptions.
//!
//! A [`TaskScope`] collects the polling timers and feed listeners started
//! for one owner (the session, or presence tracking while the user is
//! online). Releasing the scope aborts every task and unsubscribes every
//! subscription; dropping it aborts the tasks even if `release` was never
//! awaited, so no timer outlives its owner.

use std::sync::Arc;

use tokio::task::JoinHandle;

use chatdock_proto::event::Topic;

use crate::bus::{BusError, ChangeHandler, EventBus, SubscriptionId, pump};

/// Background tasks and bus subscriptions owned by one activation.
#[derive(Debug)]
pub struct TaskScope {
    name: &'static str,
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<SubscriptionId>,
}

impl TaskScope {
    /// Creates an empty scope; `name` is used in log output.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Spawns a task owned by this scope.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    /// Subscribes to `topic` and spawns a listener feeding `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the bus refuses the subscription; nothing is
    /// added to the scope in that case.
    pub async fn listen<B, H>(
        &mut self,
        bus: &B,
        topic: Topic,
        handler: Arc<H>,
    ) -> Result<SubscriptionId, BusError>
    where
        B: EventBus,
        H: ChangeHandler,
    {
        let subscription = bus.subscribe(topic).await?;
        let id = subscription.id;
        self.subscriptions.push(id);
        self.spawn(pump(subscription, handler));
        tracing::debug!(scope = self.name, subscription = %id, %topic, "listening");
        Ok(id)
    }

    /// Number of tasks still owned by this scope.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Subscriptions owned by this scope.
    #[must_use]
    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    /// Aborts every task and releases every subscription.
    pub async fn release<B: EventBus>(mut self, bus: &B) {
        self.abort_tasks();
        for id in std::mem::take(&mut self.subscriptions) {
            bus.unsubscribe(id).await;
        }
        tracing::debug!(scope = self.name, "scope released");
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            tracing::debug!(scope = self.name, tasks = self.tasks.len(), "aborting scope tasks on drop");
        }
        self.abort_tasks();
    }
}
