use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    server::{
        address_space::{AddressSpace, MonitoringFilter},
        config::ServerLimits,
        subscription_server::SubscriptionServer,
        subscriptions::{
            CreateMonitoredItem, ModifyMonitoredItem, MonitoredItemRef, PendingPublish,
            PublishResult,
        },
    },
    sync::{Mutex, RwLock},
    types::*,
};

mod publish_queue;
mod resources;
mod state;

fn make_test_file(filename: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(filename);
    path
}

/// A node of the test address space
#[derive(Debug, Clone)]
pub struct TestNode {
    pub node_class: NodeClass,
    pub event_notifier: Option<EventNotifier>,
    pub data_type: NodeId,
    pub minimum_sampling_interval: Option<f64>,
    pub value: Variant,
}

impl TestNode {
    pub fn variable<V>(data_type: u32, value: V) -> TestNode
    where
        V: Into<Variant>,
    {
        TestNode {
            node_class: NodeClass::Variable,
            event_notifier: None,
            data_type: NodeId::new(0, data_type),
            minimum_sampling_interval: Some(0f64),
            value: value.into(),
        }
    }

    pub fn object(event_notifier: EventNotifier) -> TestNode {
        TestNode {
            node_class: NodeClass::Object,
            event_notifier: Some(event_notifier),
            data_type: NodeId::null(),
            minimum_sampling_interval: None,
            value: Variant::Empty,
        }
    }
}

/// An address space held in memory which records the calls made to it.
#[derive(Default)]
pub struct TestAddressSpace {
    nodes: RwLock<HashMap<NodeId, TestNode>>,
    /// Status returned by the provisioning hooks, if set
    pub provision_error: Mutex<Option<StatusCode>>,
    /// Sampling interval the provisioning hooks revise to, if set
    pub provision_sampling_interval: Mutex<Option<f64>>,
    pub reads: Mutex<usize>,
    pub created: Mutex<Vec<MonitoredItemRef>>,
    pub modified: Mutex<Vec<MonitoredItemRef>>,
    pub deleted: Mutex<Vec<MonitoredItemRef>>,
    pub events_created: Mutex<Vec<MonitoredItemRef>>,
    pub events_deleted: Mutex<Vec<MonitoredItemRef>>,
    pub mode_changes: Mutex<Vec<(MonitoringMode, Vec<MonitoredItemRef>)>>,
    /// Yield to other tasks inside reads and provisioning, if set
    pub yield_in_hooks: Mutex<bool>,
}

impl TestAddressSpace {
    pub fn new() -> Arc<Self> {
        let address_space = TestAddressSpace::default();
        address_space.add_node(
            var_node_id("v1"),
            TestNode::variable(ids::INT32, 30i32),
        );
        address_space.add_node(
            var_node_id("v2"),
            TestNode::variable(ids::DOUBLE, 100.5f64),
        );
        address_space.add_node(
            var_node_id("v3"),
            TestNode::variable(ids::STRING, "Hello world"),
        );
        let mut slow = TestNode::variable(ids::INT32, 5i32);
        slow.minimum_sampling_interval = Some(500f64);
        address_space.add_node(var_node_id("slow"), slow);
        address_space.add_node(
            event_source_id(),
            TestNode::object(EventNotifier::SUBSCRIBE_TO_EVENTS),
        );
        address_space.add_node(
            NodeId::new(1, "folder"),
            TestNode::object(EventNotifier::empty()),
        );
        Arc::new(address_space)
    }

    pub fn add_node(&self, node_id: NodeId, node: TestNode) {
        trace_write_lock!(self.nodes).insert(node_id, node);
    }

    fn read_attribute(&self, node_to_read: &ReadValueId) -> DataValue {
        let nodes = trace_read_lock!(self.nodes);
        let Some(node) = nodes.get(&node_to_read.node_id) else {
            return DataValue::from_status(StatusCode::BadNodeIdUnknown);
        };
        let Ok(attribute_id) = AttributeId::from_u32(node_to_read.attribute_id) else {
            return DataValue::from_status(StatusCode::BadAttributeIdInvalid);
        };
        match attribute_id {
            AttributeId::NodeClass => DataValue::new_now(node.node_class as i32),
            AttributeId::EventNotifier => match node.event_notifier {
                Some(notifier) => DataValue::new_now(notifier.bits()),
                None => DataValue::from_status(StatusCode::BadAttributeIdInvalid),
            },
            AttributeId::DataType if node.node_class == NodeClass::Variable => {
                DataValue::new_now(node.data_type.clone())
            }
            AttributeId::MinimumSamplingInterval => match node.minimum_sampling_interval {
                Some(v) => DataValue::new_now(v),
                None => DataValue::from_status(StatusCode::BadAttributeIdInvalid),
            },
            AttributeId::Value if node.node_class == NodeClass::Variable => {
                DataValue::new_now(node.value.clone())
            }
            _ => DataValue::from_status(StatusCode::BadAttributeIdInvalid),
        }
    }

    async fn maybe_yield(&self) {
        let yield_in_hooks = *trace_lock!(self.yield_in_hooks);
        if yield_in_hooks {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        }
    }

    fn provision(&self) -> Result<(), StatusCode> {
        match *trace_lock!(self.provision_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AddressSpace for TestAddressSpace {
    async fn read(&self, nodes_to_read: &[ReadValueId]) -> Vec<DataValue> {
        *trace_lock!(self.reads) += 1;
        self.maybe_yield().await;
        nodes_to_read
            .iter()
            .map(|n| self.read_attribute(n))
            .collect()
    }

    fn decode_filter(
        &self,
        filter: &ExtensionObject,
    ) -> Result<Option<MonitoringFilter>, StatusCode> {
        if filter.node_id.as_ns0_numeric() == Some(ids::EVENT_FILTER_ENCODING_DEFAULT_BINARY) {
            let ExtensionObjectEncoding::ByteString(body) = &filter.body else {
                return Err(StatusCode::BadEventFilterInvalid);
            };
            serde_json::from_slice(body)
                .map(|f| Some(MonitoringFilter::Event(f)))
                .map_err(|_| StatusCode::BadEventFilterInvalid)
        } else if filter.is_null() {
            Ok(None)
        } else {
            filter
                .decode_data_change_filter()
                .map(|f| Some(MonitoringFilter::DataChange(f)))
        }
    }

    async fn on_create_data_item(&self, item: &mut CreateMonitoredItem) -> Result<(), StatusCode> {
        self.maybe_yield().await;
        if let Some(sampling_interval) = *trace_lock!(self.provision_sampling_interval) {
            item.revise_sampling_interval(sampling_interval);
        }
        self.provision()
    }

    async fn on_modify_data_item(&self, item: &mut ModifyMonitoredItem) -> Result<(), StatusCode> {
        if let Some(sampling_interval) = *trace_lock!(self.provision_sampling_interval) {
            item.revise_sampling_interval(sampling_interval);
        }
        self.provision()
    }

    async fn on_create_event_item(
        &self,
        _item: &mut CreateMonitoredItem,
    ) -> Result<(), StatusCode> {
        self.provision()
    }

    async fn on_data_items_created(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        trace_lock!(self.created).extend_from_slice(items);
        Ok(())
    }

    async fn on_data_items_modified(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        trace_lock!(self.modified).extend_from_slice(items);
        Ok(())
    }

    async fn on_data_items_deleted(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        trace_lock!(self.deleted).extend_from_slice(items);
        Ok(())
    }

    async fn on_event_items_created(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        trace_lock!(self.events_created).extend_from_slice(items);
        Ok(())
    }

    async fn on_event_items_deleted(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        trace_lock!(self.events_deleted).extend_from_slice(items);
        Ok(())
    }

    async fn on_monitoring_mode_changed(
        &self,
        mode: MonitoringMode,
        items: &[MonitoredItemRef],
    ) -> Result<(), StatusCode> {
        trace_lock!(self.mode_changes).push((mode, items.to_vec()));
        Ok(())
    }
}

pub fn var_node_id(name: &str) -> NodeId {
    NodeId::new(1, name)
}

pub fn event_source_id() -> NodeId {
    NodeId::new(1, "events")
}

/// Limits which keep timings short and counts small for tests
pub fn test_limits() -> ServerLimits {
    ServerLimits {
        min_publishing_interval_ms: 100f64,
        min_sampling_interval_ms: 100f64,
        min_lifetime_ms: 0f64,
        ..Default::default()
    }
}

pub fn make_server(limits: ServerLimits) -> (Arc<SubscriptionServer>, Arc<TestAddressSpace>) {
    let address_space = TestAddressSpace::new();
    let server = SubscriptionServer::new(
        limits,
        address_space.clone(),
        tokio::runtime::Handle::current(),
    )
    .unwrap();
    (server, address_space)
}

/// A publish request which expires after `timeout_ms`, and the receiver of its response
pub fn pending_publish(
    request_handle: u32,
    timeout_ms: u64,
) -> (PendingPublish, oneshot::Receiver<PublishResult>) {
    let (response, receiver) = oneshot::channel();
    let received = Instant::now();
    let request = PublishRequest {
        request_header: RequestHeader::new(request_handle, timeout_ms as u32),
        subscription_acknowledgements: None,
    };
    (
        PendingPublish {
            response,
            request: Box::new(request),
            ack_results: None,
            received,
            deadline: received + std::time::Duration::from_millis(timeout_ms),
        },
        receiver,
    )
}

/// Lets spawned hand-offs run on the test runtime
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub fn item_create_request(
    node_id: NodeId,
    attribute_id: AttributeId,
    client_handle: u32,
    sampling_interval: f64,
    queue_size: u32,
) -> MonitoredItemCreateRequest {
    MonitoredItemCreateRequest::new(
        ReadValueId::new(node_id, attribute_id as u32),
        MonitoringMode::Reporting,
        MonitoringParameters {
            client_handle,
            sampling_interval,
            filter: ExtensionObject::null(),
            queue_size,
            discard_oldest: true,
        },
    )
}

/// Event filters travel as JSON in the test address space
pub fn event_filter_object(filter: &EventFilter) -> ExtensionObject {
    ExtensionObject {
        node_id: NodeId::new(0, ids::EVENT_FILTER_ENCODING_DEFAULT_BINARY),
        body: ExtensionObjectEncoding::ByteString(serde_json::to_vec(filter).unwrap()),
    }
}

pub fn event_filter() -> EventFilter {
    EventFilter {
        select_clauses: Some(vec![SimpleAttributeOperand::new(
            NodeId::new(0, ids::BASE_EVENT_TYPE),
            "Message",
            AttributeId::Value,
        )]),
    }
}
