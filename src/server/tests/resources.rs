use std::sync::{atomic::AtomicUsize, Arc};

use crate::{
    server::{
        config::ServerLimits,
        resources::{ResourceAccounting, SessionResources},
    },
    types::StatusCode,
};

use super::test_limits;

fn accounting(limits: ServerLimits) -> Arc<ResourceAccounting> {
    Arc::new(ResourceAccounting::new(&limits))
}

#[test]
fn subscription_item_slots() {
    let accounting = accounting(ServerLimits {
        max_monitored_items_per_sub: 2,
        ..test_limits()
    });
    let session = Arc::new(SessionResources::default());
    let items = Arc::new(AtomicUsize::new(0));
    let p1 = accounting
        .try_acquire_monitored_item(&session, &items)
        .unwrap();
    let _p2 = accounting
        .try_acquire_monitored_item(&session, &items)
        .unwrap();
    assert_eq!(
        accounting
            .try_acquire_monitored_item(&session, &items)
            .unwrap_err(),
        StatusCode::BadTooManyMonitoredItems
    );
    // A refusal leaves the other counters alone
    assert_eq!(accounting.monitored_item_count(), 2);
    assert_eq!(session.monitored_item_count(), 2);

    // Other subscriptions count separately
    let other_items = Arc::new(AtomicUsize::new(0));
    let _p3 = accounting
        .try_acquire_monitored_item(&session, &other_items)
        .unwrap();

    drop(p1);
    assert_eq!(items.load(std::sync::atomic::Ordering::Acquire), 1);
    let _p4 = accounting
        .try_acquire_monitored_item(&session, &items)
        .unwrap();
    assert_eq!(accounting.monitored_item_count(), 3);
}

#[test]
fn server_limit_gives_back_subscription_slot() {
    let accounting = accounting(ServerLimits {
        max_monitored_items: 1,
        ..test_limits()
    });
    let session = Arc::new(SessionResources::default());
    let items = Arc::new(AtomicUsize::new(0));
    let _p1 = accounting
        .try_acquire_monitored_item(&session, &items)
        .unwrap();
    assert!(accounting
        .try_acquire_monitored_item(&session, &items)
        .is_err());
    assert_eq!(items.load(std::sync::atomic::Ordering::Acquire), 1);
}

#[test]
fn move_session_slots() {
    let accounting = accounting(ServerLimits {
        max_subscriptions_per_session: 1,
        max_monitored_items_per_session: 2,
        ..test_limits()
    });
    let from = Arc::new(SessionResources::default());
    let to = Arc::new(SessionResources::default());
    let items = Arc::new(AtomicUsize::new(0));
    let mut subscription = accounting.try_acquire_subscription(&from).unwrap();
    let mut item = accounting
        .try_acquire_monitored_item(&from, &items)
        .unwrap();

    accounting.move_session_slots(&from, &to, 1, 1).unwrap();
    subscription.rebind_session(&to);
    item.rebind_session(&to);
    assert_eq!(from.subscription_count(), 0);
    assert_eq!(from.monitored_item_count(), 0);
    assert_eq!(to.subscription_count(), 1);
    assert_eq!(to.monitored_item_count(), 1);
    assert_eq!(accounting.subscription_count(), 1);

    // The session is full so nothing moves back the other way
    let _other = accounting.try_acquire_subscription(&from).unwrap();
    assert_eq!(
        accounting.move_session_slots(&to, &from, 1, 1).unwrap_err(),
        StatusCode::BadTooManySubscriptions
    );
    assert_eq!(to.subscription_count(), 1);
    assert_eq!(from.subscription_count(), 1);

    // Moving within a session changes nothing
    accounting.move_session_slots(&to, &to, 1, 1).unwrap();
    assert_eq!(to.monitored_item_count(), 1);

    drop(item);
    drop(subscription);
    assert_eq!(to.subscription_count(), 0);
    assert_eq!(to.monitored_item_count(), 0);
    assert_eq!(accounting.subscription_count(), 1);
}
