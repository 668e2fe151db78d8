//! Dispatch Registry Tests (spec.md §4.1 testable properties)

use async_trait::async_trait;
use hero_messaging::error::HeroMessagingError;
use hero_messaging::message::{Command, Event};
use hero_messaging::registry::{CommandHandler, EventHandler, Registry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct PlaceOrder {
    quantity: u32,
}

impl Command for PlaceOrder {
    type Response = u32;
}

struct PlaceOrderHandler {
    invocations: AtomicU32,
}

#[async_trait]
impl CommandHandler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, command: &PlaceOrder) -> Result<u32, HeroMessagingError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(command.quantity * 2)
    }
}

#[tokio::test]
async fn command_handler_is_invoked_exactly_once_per_send() {
    let registry = Registry::new();
    registry.register_command::<PlaceOrder>(PlaceOrderHandler { invocations: AtomicU32::new(0) });

    let response = registry.send_command(&PlaceOrder { quantity: 5 }, || Duration::ZERO).await.unwrap();
    assert_eq!(response, 10);

    let stats = registry.stats_for_type::<PlaceOrder>().unwrap();
    assert_eq!(stats.processed_count(), 1);
    assert_eq!(stats.failed_count(), 0);
}

#[tokio::test]
async fn sending_unregistered_command_fails_with_no_handler() {
    let registry = Registry::new();
    let result = registry.send_command(&PlaceOrder { quantity: 1 }, || Duration::ZERO).await;
    assert!(matches!(result, Err(HeroMessagingError::NoHandler(_))));
}

#[derive(Debug, Clone)]
struct OrderPlaced {
    id: u32,
}

impl Event for OrderPlaced {}

struct RecordingEventHandler {
    name: &'static str,
    order_log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

#[async_trait]
impl EventHandler<OrderPlaced> for RecordingEventHandler {
    async fn handle(&self, _event: &OrderPlaced) -> Result<(), HeroMessagingError> {
        self.order_log.lock().push(self.name);
        if self.fail {
            return Err(HeroMessagingError::HandlerFailed(self.name.to_string(), "simulated failure".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn event_handlers_fire_in_registration_order() {
    let registry = Registry::new();
    let order_log = Arc::new(Mutex::new(Vec::new()));

    registry.register_event::<OrderPlaced>(RecordingEventHandler { name: "first", order_log: order_log.clone(), fail: false });
    registry.register_event::<OrderPlaced>(RecordingEventHandler { name: "second", order_log: order_log.clone(), fail: false });
    registry.register_event::<OrderPlaced>(RecordingEventHandler { name: "third", order_log: order_log.clone(), fail: false });

    let result = registry.publish_event(&OrderPlaced { id: 1 }, || Duration::ZERO).await;

    assert!(result.success);
    assert_eq!(*order_log.lock(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn failing_event_handlers_do_not_prevent_the_rest_from_running_and_errors_are_aggregated() {
    let registry = Registry::new();
    let order_log = Arc::new(Mutex::new(Vec::new()));

    registry.register_event::<OrderPlaced>(RecordingEventHandler { name: "first", order_log: order_log.clone(), fail: true });
    registry.register_event::<OrderPlaced>(RecordingEventHandler { name: "second", order_log: order_log.clone(), fail: false });
    registry.register_event::<OrderPlaced>(RecordingEventHandler { name: "third", order_log: order_log.clone(), fail: true });

    let result = registry.publish_event(&OrderPlaced { id: 2 }, || Duration::ZERO).await;

    assert!(result.is_failure());
    assert_eq!(*order_log.lock(), vec!["first", "second", "third"], "all handlers must run despite earlier failures");
    let message = result.message.unwrap();
    assert!(message.contains('2'), "aggregated message should report both failures: {message}");
}
