//! Built-in triggers.

use async_trait::async_trait;
use cadence_core::{BuildCondition, IntegrationRequest, Trigger};
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Longest delay honoured as given, about 30 years. Longer ones are clamped
/// so the deadline stays representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(delay: Duration) -> Instant {
    Instant::now() + delay.min(FAR_FUTURE)
}

/// Fires once a fixed interval has passed since the last integration.
pub struct IntervalTrigger {
    name: String,
    interval: Duration,
    condition: BuildCondition,
    next_build: Mutex<Instant>,
}

impl IntervalTrigger {
    /// A trigger that fires on its first poll, then `interval` after each
    /// completed integration.
    pub fn new(interval: Duration) -> Self {
        Self {
            name: "interval".to_string(),
            interval,
            condition: BuildCondition::IfModificationExists,
            next_build: Mutex::new(Instant::now()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: BuildCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Delay the first fire by `delay` from now.
    pub fn with_initial_delay(self, delay: Duration) -> Self {
        *self.next_build.lock().unwrap_or_else(PoisonError::into_inner) = deadline_after(delay);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_build(&self) -> Instant {
        *self.next_build.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn fire(&self) -> Option<IntegrationRequest> {
        if Instant::now() < self.next_build() {
            return None;
        }
        debug!(trigger = %self.name, condition = %self.condition, "interval elapsed");
        Some(IntegrationRequest::new(self.condition, self.name.clone()))
    }

    fn integration_completed(&self) {
        *self.next_build.lock().unwrap_or_else(PoisonError::into_inner) =
            deadline_after(self.interval);
    }
}

/// Never fires. Projects using it build only when forced or requested.
#[derive(Debug, Default)]
pub struct ManualTrigger;

#[async_trait]
impl Trigger for ManualTrigger {
    async fn fire(&self) -> Option<IntegrationRequest> {
        None
    }

    fn integration_completed(&self) {}
}

/// Combines several triggers into one.
///
/// Every child is polled; the request with the strongest condition wins, the
/// earliest child winning ties. Completion is forwarded to all children.
#[derive(Default)]
pub struct MultipleTrigger {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl MultipleTrigger {
    pub fn new(triggers: Vec<Arc<dyn Trigger>>) -> Self {
        Self { triggers }
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

#[async_trait]
impl Trigger for MultipleTrigger {
    async fn fire(&self) -> Option<IntegrationRequest> {
        let fired = join_all(self.triggers.iter().map(|trigger| trigger.fire())).await;

        fired.into_iter().flatten().fold(None, |best, request| match best {
            Some(best) if best.condition() >= request.condition() => Some(best),
            _ => Some(request),
        })
    }

    fn integration_completed(&self) {
        for trigger in &self.triggers {
            trigger.integration_completed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        request: Option<IntegrationRequest>,
        completions: AtomicUsize,
    }

    impl Fixed {
        fn new(request: Option<IntegrationRequest>) -> Arc<Self> {
            Arc::new(Self {
                request,
                completions: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Trigger for Fixed {
        async fn fire(&self) -> Option<IntegrationRequest> {
            self.request.clone()
        }

        fn integration_completed(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_immediately_then_waits() {
        let trigger = IntervalTrigger::new(Duration::from_secs(60)).with_name("hourly-ish");

        let request = trigger.fire().await.unwrap();
        assert_eq!(request.condition(), BuildCondition::IfModificationExists);
        assert_eq!(request.source(), "hourly-ish");

        trigger.integration_completed();
        assert!(trigger.fire().await.is_none());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(trigger.fire().await.is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(trigger.fire().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_durations_do_not_overflow() {
        let trigger = IntervalTrigger::new(Duration::from_secs(u64::MAX))
            .with_initial_delay(Duration::MAX);
        assert!(trigger.fire().await.is_none());

        let trigger = IntervalTrigger::new(Duration::MAX);
        assert!(trigger.fire().await.is_some());
        trigger.integration_completed();
        assert!(trigger.next_build() > Instant::now());

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(trigger.fire().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_initial_delay() {
        let trigger = IntervalTrigger::new(Duration::from_secs(10))
            .with_condition(BuildCondition::ForceBuild)
            .with_initial_delay(Duration::from_secs(5));

        assert!(trigger.fire().await.is_none());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(
            trigger.fire().await.map(|r| r.condition()),
            Some(BuildCondition::ForceBuild)
        );
    }

    #[tokio::test]
    async fn test_manual_never_fires() {
        assert!(ManualTrigger.fire().await.is_none());
    }

    #[tokio::test]
    async fn test_multiple_picks_strongest_condition() {
        let weak = Fixed::new(Some(IntegrationRequest::new(
            BuildCondition::IfModificationExists,
            "weak",
        )));
        let silent = Fixed::new(None);
        let strong = Fixed::new(Some(IntegrationRequest::force_build("strong")));
        let tie = Fixed::new(Some(IntegrationRequest::force_build("tie")));
        let children: Vec<Arc<dyn Trigger>> =
            vec![weak.clone(), silent.clone(), strong.clone(), tie.clone()];
        let trigger = MultipleTrigger::new(children);

        let request = trigger.fire().await.unwrap();
        assert_eq!(request.source(), "strong");

        trigger.integration_completed();
        for child in [&weak, &silent, &strong, &tie] {
            assert_eq!(child.completions.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_multiple_with_nothing_fired() {
        let children: Vec<Arc<dyn Trigger>> = vec![Fixed::new(None), Arc::new(ManualTrigger)];
        let trigger = MultipleTrigger::new(children);
        assert!(trigger.fire().await.is_none());
        assert!(MultipleTrigger::default().fire().await.is_none());
    }
}
