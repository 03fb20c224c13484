//! Drives the subscription services the way a session would, against a small address space.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;

use opcua_subscriptions::{prelude::*, sync::RwLock};

/// Variables of type Double, keyed by node id
struct Variables {
    values: RwLock<HashMap<NodeId, Variant>>,
}

impl Variables {
    fn new(names: &[&str]) -> Arc<Self> {
        let values = names
            .iter()
            .map(|name| (NodeId::new(2, *name), Variant::Double(0f64)))
            .collect();
        Arc::new(Self {
            values: RwLock::new(values),
        })
    }

    fn read_one(&self, node_to_read: &ReadValueId) -> DataValue {
        let values = self.values.read();
        let Some(value) = values.get(&node_to_read.node_id) else {
            return DataValue::from_status(StatusCode::BadNodeIdUnknown);
        };
        match AttributeId::from_u32(node_to_read.attribute_id) {
            Ok(AttributeId::NodeClass) => DataValue::new_now(NodeClass::Variable as i32),
            Ok(AttributeId::DataType) => DataValue::new_now(NodeId::new(0, ids::DOUBLE)),
            Ok(AttributeId::MinimumSamplingInterval) => DataValue::new_now(0f64),
            Ok(AttributeId::Value) => DataValue::new_now(value.clone()),
            _ => DataValue::from_status(StatusCode::BadAttributeIdInvalid),
        }
    }
}

#[async_trait]
impl AddressSpace for Variables {
    async fn read(&self, nodes_to_read: &[ReadValueId]) -> Vec<DataValue> {
        nodes_to_read.iter().map(|n| self.read_one(n)).collect()
    }
}

fn limits() -> ServerLimits {
    ServerLimits {
        min_lifetime_ms: 0f64,
        ..Default::default()
    }
}

fn create_subscription(
    manager: &SubscriptionManager,
    max_keep_alive_count: u32,
    lifetime_count: u32,
) -> u32 {
    let request = CreateSubscriptionRequest {
        request_header: RequestHeader::new(1, 0),
        requested_publishing_interval: 100f64,
        requested_lifetime_count: lifetime_count,
        requested_max_keep_alive_count: max_keep_alive_count,
        max_notifications_per_publish: 0,
        publishing_enabled: true,
        priority: 0,
    };
    manager.create_subscription(&request).unwrap().subscription_id
}

fn publish_request(acks: Vec<SubscriptionAcknowledgement>) -> PublishRequest {
    PublishRequest {
        request_header: RequestHeader::new(10, 0),
        subscription_acknowledgements: Some(acks),
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn data_changes_are_published() {
    let address_space = Variables::new(&["temperature", "pressure"]);
    let server =
        SubscriptionServer::new(limits(), address_space, tokio::runtime::Handle::current()).unwrap();
    let manager = server.new_session();
    let subscription_id = create_subscription(&manager, 10, 30);

    let items_to_create = ["temperature", "pressure"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            MonitoredItemCreateRequest::new(
                ReadValueId::new(NodeId::new(2, *name), AttributeId::Value as u32),
                MonitoringMode::Reporting,
                MonitoringParameters {
                    client_handle: i as u32 + 1,
                    sampling_interval: 100f64,
                    filter: ExtensionObject::null(),
                    queue_size: 5,
                    discard_oldest: true,
                },
            )
        })
        .collect();
    let request = CreateMonitoredItemsRequest {
        request_header: RequestHeader::new(2, 0),
        subscription_id,
        timestamps_to_return: TimestampsToReturn::Neither,
        items_to_create: Some(items_to_create),
    };
    let results = manager
        .create_monitored_items(&request)
        .await
        .unwrap()
        .results
        .unwrap();
    assert!(results.iter().all(|r| r.status_code.is_good()));
    let handles: Vec<MonitoredItemHandle> = results
        .iter()
        .map(|r| MonitoredItemHandle {
            subscription_id,
            monitored_item_id: r.monitored_item_id,
        })
        .collect();

    // Initial values of both items
    let response = manager.publish(publish_request(vec![])).await.unwrap();
    assert_eq!(response.notification_message.data_changes().len(), 2);
    let first = response.notification_message.sequence_number;

    // Three samples on the first item
    for v in 1..=3 {
        server.notify_data_change([(DataValue::new_now(v as f64), vec![handles[0]])]);
    }
    let response = manager
        .publish(publish_request(vec![SubscriptionAcknowledgement {
            subscription_id,
            sequence_number: first,
        }]))
        .await
        .unwrap();
    let values: Vec<Option<Variant>> = response
        .notification_message
        .data_changes()
        .iter()
        .map(|n| {
            assert_eq!(n.client_handle, 1);
            n.value.value.clone()
        })
        .collect();
    assert_eq!(
        values,
        vec![
            Some(Variant::Double(1f64)),
            Some(Variant::Double(2f64)),
            Some(Variant::Double(3f64))
        ]
    );
    assert_eq!(
        response.available_sequence_numbers,
        Some(vec![response.notification_message.sequence_number])
    );

    // Nothing changes so keep alives follow
    let response = manager.publish(publish_request(vec![])).await.unwrap();
    assert!(response.notification_message.is_keep_alive());

    manager.delete_all(true).await;
    assert_eq!(server.subscription_count(), 0);
    assert_eq!(server.resources().monitored_item_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn subscription_expires_without_publish_requests() {
    let address_space = Variables::new(&["temperature"]);
    let server =
        SubscriptionServer::new(limits(), address_space, tokio::runtime::Handle::current()).unwrap();
    let manager = server.new_session();
    let subscription_id = create_subscription(&manager, 1, 3);
    assert_eq!(server.subscription_count(), 1);

    // Three publishing intervals go by without a request
    tokio::time::sleep(std::time::Duration::from_millis(1000)).await;
    let subscription = manager.get_subscription(subscription_id).unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Closing);
    drop(subscription);

    // The next request is answered with the status change and the subscription is gone
    let response = manager.publish(publish_request(vec![])).await.unwrap();
    assert_eq!(response.subscription_id, subscription_id);
    assert_eq!(
        response.notification_message.status_change_status(),
        Some(StatusCode::BadTimeout)
    );
    settle().await;
    assert_eq!(manager.subscription_count(), 0);
    assert_eq!(server.subscription_count(), 0);
    assert_eq!(server.resources().subscription_count(), 0);

    assert_eq!(
        manager.publish(publish_request(vec![])).await.unwrap_err(),
        StatusCode::BadNoSubscription
    );
}

#[tokio::test(start_paused = true)]
async fn sessions_publish_independently() {
    let address_space = Variables::new(&["temperature"]);
    let server =
        SubscriptionServer::new(limits(), address_space, tokio::runtime::Handle::current()).unwrap();
    let managers: Vec<SubscriptionManager> = (0..3).map(|_| server.new_session()).collect();
    let subscription_ids: Vec<u32> = managers
        .iter()
        .map(|m| create_subscription(m, 10, 30))
        .collect();
    assert_eq!(server.subscription_count(), 3);

    // Each session's request is answered by its own subscription
    let responses =
        futures::future::join_all(managers.iter().map(|m| m.publish(publish_request(vec![]))))
            .await;
    for (response, subscription_id) in responses.into_iter().zip(subscription_ids) {
        let response = response.unwrap();
        assert_eq!(response.subscription_id, subscription_id);
        assert!(response.notification_message.is_keep_alive());
    }

    for manager in &managers {
        manager.delete_all(true).await;
    }
    assert_eq!(server.subscription_count(), 0);
    assert_eq!(server.resources().subscription_count(), 0);
}
