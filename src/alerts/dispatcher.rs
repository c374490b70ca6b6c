use crate::alerts::Notifier;
use crate::error::AlertError;
use crate::events::AlertEvent;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default number of failed alerts kept for retry
pub const DEFAULT_RETRY_QUEUE_SIZE: usize = 100;

/// Message consumed by the dispatcher thread
#[derive(Debug, Clone)]
pub enum AlertMessage {
    Alert(AlertEvent),
    Shutdown,
}

/// Non-blocking handle for submitting alerts to the dispatcher thread
#[derive(Debug, Clone)]
pub struct AlertSender {
    sender: SyncSender<AlertMessage>,
}

impl AlertSender {
    /// Create a sender and the receiving end it feeds
    pub fn channel(capacity: usize) -> (Self, Receiver<AlertMessage>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (Self { sender }, receiver)
    }

    /// Submit an alert without waiting
    ///
    /// Ingestion never stalls on a slow notifier: a full channel hands the
    /// failure back immediately and the alert is not queued.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::QueueFull` when the channel has no room and
    /// `AlertError::QueueClosed` once the dispatcher thread is gone.
    pub fn try_send(&self, event: AlertEvent) -> Result<(), AlertError> {
        match self.sender.try_send(AlertMessage::Alert(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AlertError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(AlertError::QueueClosed),
        }
    }

    /// Ask the dispatcher thread to stop after draining what it already holds
    pub fn shutdown(&self) {
        // Blocking send so the shutdown is not lost behind a full channel
        if self.sender.send(AlertMessage::Shutdown).is_err() {
            debug!("Alert dispatcher already stopped");
        }
    }
}

/// Delivers alert events through a notifier, retrying failures
///
/// Alerts that fail delivery are kept in a bounded FIFO queue; when it is
/// full the oldest entry is dropped. `tick` retries the queue in order.
pub struct AlertDispatcher {
    notifier: Box<dyn Notifier>,
    retry_queue: VecDeque<AlertEvent>,
    max_queue_size: usize,
    delivered: usize,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("notifier", &self.notifier.name())
            .field("retry_queue", &self.retry_queue.len())
            .field("max_queue_size", &self.max_queue_size)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl AlertDispatcher {
    /// Create a dispatcher with the default retry queue size
    pub fn new(notifier: Box<dyn Notifier>) -> Self {
        Self::with_queue_size(notifier, DEFAULT_RETRY_QUEUE_SIZE)
    }

    /// Create a dispatcher with a configurable retry queue size
    ///
    /// # Arguments
    ///
    /// * `notifier` - Delivery channel for alerts
    /// * `max_queue_size` - Maximum number of failed alerts kept for retry
    pub fn with_queue_size(notifier: Box<dyn Notifier>, max_queue_size: usize) -> Self {
        Self {
            notifier,
            retry_queue: VecDeque::new(),
            max_queue_size,
            delivered: 0,
        }
    }

    /// Deliver an alert, queueing it for retry on failure
    ///
    /// Pending retries are attempted first so alerts leave in order.
    pub fn dispatch(&mut self, event: AlertEvent) {
        self.tick();

        if !self.retry_queue.is_empty() {
            self.queue_alert(event);
            return;
        }

        if let Err(e) = self.deliver(&event) {
            error!("Failed to deliver alert for {}: {}", event.metric, e);
            self.queue_alert(event);
        }
    }

    /// Retry queued alerts in order until one fails
    ///
    /// # Returns
    ///
    /// Number of queued alerts delivered
    pub fn tick(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.retry_queue.front() {
            if let Err(e) = self.notifier.deliver(event) {
                debug!("Retry through {} still failing: {}", self.notifier.name(), e);
                break;
            }
            self.delivered += 1;
            processed += 1;
            self.retry_queue.pop_front();
        }

        if processed > 0 {
            info!("Delivered {} queued alerts", processed);
        }
        processed
    }

    pub fn queued_count(&self) -> usize {
        self.retry_queue.len()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered
    }

    /// Run the dispatcher on its own thread
    ///
    /// # Arguments
    ///
    /// * `channel_capacity` - Alerts buffered between producers and the thread
    /// * `tick_interval` - How often queued alerts are retried while idle
    pub fn spawn(
        mut self,
        channel_capacity: usize,
        tick_interval: Duration,
    ) -> (AlertSender, JoinHandle<Self>) {
        let (sender, receiver) = AlertSender::channel(channel_capacity);

        let handle = thread::spawn(move || {
            info!("Alert dispatcher started ({})", self.notifier.name());

            loop {
                match receiver.recv_timeout(tick_interval) {
                    Ok(AlertMessage::Alert(event)) => self.dispatch(event),
                    Ok(AlertMessage::Shutdown) => {
                        info!("Alert dispatcher received shutdown signal");
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        self.tick();
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("Alert channel disconnected");
                        break;
                    }
                }
            }

            self.tick();
            if !self.retry_queue.is_empty() {
                warn!(
                    "Alert dispatcher stopping with {} undelivered alerts",
                    self.retry_queue.len()
                );
            }
            info!("Alert dispatcher stopped");
            self
        });

        (sender, handle)
    }

    fn deliver(&mut self, event: &AlertEvent) -> Result<(), AlertError> {
        self.notifier.deliver(event)?;
        self.delivered += 1;
        Ok(())
    }

    fn queue_alert(&mut self, event: AlertEvent) {
        if self.max_queue_size == 0 {
            warn!("Alert retry queue disabled, dropping alert for {}", event.metric);
            return;
        }
        if self.retry_queue.len() >= self.max_queue_size {
            if let Some(dropped) = self.retry_queue.pop_front() {
                warn!(
                    "Alert retry queue full, dropping oldest alert for {}",
                    dropped.metric
                );
            }
        }
        self.retry_queue.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{LogNotifier, MockNotifier};
    use crate::metrics::Metric;
    use chrono::Utc;
    use mockall::Sequence;

    fn create_test_event(metric: Metric, average: f64) -> AlertEvent {
        AlertEvent {
            metric,
            average,
            count: 3,
            timestamp: Utc::now(),
        }
    }

    fn mock_notifier() -> MockNotifier {
        let mut notifier = MockNotifier::new();
        notifier.expect_name().return_const("mock".to_string());
        notifier
    }

    #[test]
    fn test_successful_delivery() {
        let mut notifier = mock_notifier();
        notifier
            .expect_deliver()
            .withf(|event| event.metric == Metric::HeartRate)
            .times(1)
            .returning(|_| Ok(()));

        let mut dispatcher = AlertDispatcher::new(Box::new(notifier));
        dispatcher.dispatch(create_test_event(Metric::HeartRate, 160.0));

        assert_eq!(dispatcher.delivered_count(), 1);
        assert_eq!(dispatcher.queued_count(), 0);
    }

    #[test]
    fn test_failed_delivery_is_retried_on_tick() {
        let mut notifier = mock_notifier();
        let mut seq = Sequence::new();
        notifier
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AlertError::NotificationFailed("offline".to_string())));
        notifier
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut dispatcher = AlertDispatcher::new(Box::new(notifier));
        dispatcher.dispatch(create_test_event(Metric::Spo2, 90.0));
        assert_eq!(dispatcher.queued_count(), 1);
        assert_eq!(dispatcher.delivered_count(), 0);

        assert_eq!(dispatcher.tick(), 1);
        assert_eq!(dispatcher.queued_count(), 0);
        assert_eq!(dispatcher.delivered_count(), 1);
    }

    #[test]
    fn test_retry_queue_drops_oldest_when_full() {
        let mut notifier = mock_notifier();
        notifier
            .expect_deliver()
            .returning(|_| Err(AlertError::NotificationFailed("offline".to_string())));

        let mut dispatcher = AlertDispatcher::with_queue_size(Box::new(notifier), 2);
        dispatcher.dispatch(create_test_event(Metric::HeartRate, 150.0));
        dispatcher.dispatch(create_test_event(Metric::Spo2, 90.0));
        dispatcher.dispatch(create_test_event(Metric::Temperature, 39.0));

        assert_eq!(dispatcher.queued_count(), 2);
        let queued: Vec<Metric> = dispatcher.retry_queue.iter().map(|e| e.metric).collect();
        assert_eq!(queued, vec![Metric::Spo2, Metric::Temperature]);
    }

    #[test]
    fn test_new_alert_waits_behind_queued_alerts() {
        let mut notifier = mock_notifier();
        let mut seq = Sequence::new();
        notifier
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AlertError::NotificationFailed("offline".to_string())));
        notifier
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AlertError::NotificationFailed("still offline".to_string())));

        let mut dispatcher = AlertDispatcher::new(Box::new(notifier));
        dispatcher.dispatch(create_test_event(Metric::HeartRate, 150.0));
        dispatcher.dispatch(create_test_event(Metric::HeartRate, 155.0));

        assert_eq!(dispatcher.queued_count(), 2);
        assert_eq!(dispatcher.delivered_count(), 0);
    }

    #[test]
    fn test_spawned_dispatcher_delivers_and_stops() {
        let mut notifier = mock_notifier();
        notifier.expect_deliver().times(2).returning(|_| Ok(()));

        let dispatcher = AlertDispatcher::new(Box::new(notifier));
        let (sender, handle) = dispatcher.spawn(8, Duration::from_millis(10));

        sender
            .try_send(create_test_event(Metric::HeartRate, 160.0))
            .unwrap();
        sender
            .try_send(create_test_event(Metric::Temperature, 39.2))
            .unwrap();
        sender.shutdown();

        let dispatcher = handle.join().unwrap();
        assert_eq!(dispatcher.delivered_count(), 2);
    }

    #[test]
    fn test_full_channel_is_reported() {
        let (sender, receiver) = AlertSender::channel(1);

        sender
            .try_send(create_test_event(Metric::HeartRate, 160.0))
            .unwrap();
        assert!(matches!(
            sender.try_send(create_test_event(Metric::Spo2, 90.0)),
            Err(AlertError::QueueFull)
        ));

        match receiver.try_recv() {
            Ok(AlertMessage::Alert(event)) => assert_eq!(event.metric, Metric::HeartRate),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(sender
            .try_send(create_test_event(Metric::Spo2, 90.0))
            .is_ok());
    }

    #[test]
    fn test_send_after_stop_reports_closed_queue() {
        let dispatcher = AlertDispatcher::new(Box::new(LogNotifier));
        let (sender, handle) = dispatcher.spawn(1, Duration::from_millis(10));

        sender.shutdown();
        handle.join().unwrap();

        assert!(matches!(
            sender.try_send(create_test_event(Metric::Spo2, 80.0)),
            Err(AlertError::QueueClosed)
        ));
    }
}
