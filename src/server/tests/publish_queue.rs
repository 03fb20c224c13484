use std::{sync::Arc, time::Duration};

use tokio::runtime::Handle;

use crate::{
    server::subscriptions::{PublishQueue, Subscription, SubscriptionParameters, SubscriptionState},
    types::StatusCode,
};

use super::{pending_publish, settle};

fn make_subscription(
    subscription_id: u32,
    priority: u8,
    publish_queue: &Arc<PublishQueue>,
) -> Arc<Subscription> {
    let parameters = SubscriptionParameters {
        publishing_interval: 100f64,
        max_keep_alive_count: 3,
        lifetime_count: 300,
        max_notifications_per_publish: 100,
        priority,
    };
    Subscription::new(
        subscription_id,
        1,
        parameters,
        true,
        10,
        publish_queue.clone(),
    )
}

#[tokio::test]
async fn park_requests() {
    let queue = PublishQueue::new(2, Handle::current());
    assert!(queue.is_empty());

    let (r1, mut rx1) = pending_publish(1, 10000);
    let (r2, mut rx2) = pending_publish(2, 10000);
    let (r3, mut rx3) = pending_publish(3, 10000);
    queue.add_request(r1);
    queue.add_request(r2);
    assert_eq!(queue.len(), 2);
    assert!(queue.is_not_empty());

    // Over capacity the oldest request is discarded
    queue.add_request(r3);
    assert_eq!(queue.len(), 2);
    assert_eq!(
        rx1.try_recv().unwrap(),
        Err(StatusCode::BadTooManyPublishRequests)
    );
    assert!(rx2.try_recv().is_err());
    assert!(rx3.try_recv().is_err());

    // Oldest first
    let next = queue.poll().unwrap();
    assert_eq!(next.request_handle(), 2);
    let next = queue.poll().unwrap();
    assert_eq!(next.request_handle(), 3);
    assert!(queue.poll().is_none());
}

#[tokio::test]
async fn expired_requests_time_out() {
    let queue = PublishQueue::new(10, Handle::current());
    let (expired, mut rx_expired) = pending_publish(1, 0);
    let (alive, _rx_alive) = pending_publish(2, 10000);
    queue.add_request(expired);
    queue.add_request(alive);

    let next = queue.poll().unwrap();
    assert_eq!(next.request_handle(), 2);
    assert_eq!(rx_expired.try_recv().unwrap(), Err(StatusCode::BadTimeout));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn fault_all() {
    let queue = PublishQueue::new(10, Handle::current());
    let (r1, mut rx1) = pending_publish(1, 10000);
    let (r2, mut rx2) = pending_publish(2, 10000);
    queue.add_request(r1);
    queue.add_request(r2);

    queue.fault_all(StatusCode::BadSessionClosed);
    assert!(queue.is_empty());
    assert_eq!(rx1.try_recv().unwrap(), Err(StatusCode::BadSessionClosed));
    assert_eq!(rx2.try_recv().unwrap(), Err(StatusCode::BadSessionClosed));
}

#[tokio::test(start_paused = true)]
async fn highest_priority_waiting_subscription_first() {
    let queue = Arc::new(PublishQueue::new(10, Handle::current()));
    let low = make_subscription(1, 1, &queue);
    let oldest_high = make_subscription(2, 5, &queue);
    let high = make_subscription(3, 5, &queue);

    // With no requests a tick makes each subscription late and puts it on the wait-list
    for s in [&low, &oldest_high, &high] {
        let _ = s.on_publishing_timer();
        assert_eq!(s.state(), SubscriptionState::Late);
        tokio::time::advance(Duration::from_millis(10)).await;
    }
    assert_eq!(queue.waiting_count(), 3);

    let mut answered_by = Vec::new();
    for handle in 1..=3 {
        let (request, mut rx) = pending_publish(handle, 10000);
        queue.add_request(request);
        settle().await;
        let response = rx.try_recv().unwrap().unwrap();
        assert!(response.notification_message.is_keep_alive());
        answered_by.push(response.subscription_id);
    }
    assert_eq!(answered_by, vec![2, 3, 1]);
    assert_eq!(queue.waiting_count(), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn waiting_subscription_takes_parked_request() {
    let queue = Arc::new(PublishQueue::new(10, Handle::current()));
    let s = make_subscription(1, 0, &queue);

    // Parked before the subscription is late
    let (request, mut rx) = pending_publish(1, 10000);
    queue.add_request(request);

    let _ = s.on_publishing_timer();
    settle().await;
    let response = rx.try_recv().unwrap().unwrap();
    assert_eq!(response.subscription_id, 1);
    assert!(response.notification_message.is_keep_alive());
    assert_eq!(queue.waiting_count(), 0);
}

#[tokio::test]
async fn removed_subscription_stops_waiting() {
    let queue = Arc::new(PublishQueue::new(10, Handle::current()));
    let s = make_subscription(1, 0, &queue);
    let _ = s.on_publishing_timer();
    assert_eq!(queue.waiting_count(), 1);
    queue.remove_subscription(1);
    assert_eq!(queue.waiting_count(), 0);

    // A dropped subscription is skipped and the request is parked
    let other = make_subscription(2, 0, &queue);
    let _ = other.on_publishing_timer();
    drop(other);
    let (request, _rx) = pending_publish(1, 10000);
    queue.add_request(request);
    assert_eq!(queue.len(), 1);
}
