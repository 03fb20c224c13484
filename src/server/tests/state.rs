use crate::server::subscriptions::state::{
    transition, HandledState, StateAction, SubscriptionState, SubscriptionStateParams,
    TickReason, Transition,
};

// The tests below feed the state table a set of inputs and check the row that was matched, the
// next state and the actions to perform.

fn params() -> SubscriptionStateParams {
    SubscriptionStateParams {
        publishing_enabled: true,
        keep_alive_counter: 3,
        ..Default::default()
    }
}

#[test]
fn update_state_4() {
    // Publishing enabled, no more notifications, park the request
    let t = transition(
        SubscriptionState::Normal,
        TickReason::ReceivePublishRequest,
        &params(),
    );
    assert_eq!(t.handled, HandledState::Normal4);
    assert_eq!(t.next_state, SubscriptionState::Normal);
    assert_eq!(t.actions, &[StateAction::ParkRequest]);

    // Publishing disabled, more notifications are ignored
    let p = SubscriptionStateParams {
        publishing_enabled: false,
        more_notifications: true,
        ..params()
    };
    let t = transition(
        SubscriptionState::Normal,
        TickReason::ReceivePublishRequest,
        &p,
    );
    assert_eq!(t.handled, HandledState::Normal4);
}

#[test]
fn update_state_5() {
    let p = SubscriptionStateParams {
        more_notifications: true,
        ..params()
    };
    let t = transition(
        SubscriptionState::Normal,
        TickReason::ReceivePublishRequest,
        &p,
    );
    assert_eq!(t.handled, HandledState::Normal5);
    assert_eq!(t.next_state, SubscriptionState::Normal);
    assert_eq!(
        t.actions,
        &[
            StateAction::ResetLifetimeCounter,
            StateAction::ResetKeepAliveCounter,
            StateAction::SetMessageSent,
            StateAction::ReturnNotifications,
        ]
    );
    assert!(!t.pops_request());
}

#[test]
fn update_state_6() {
    let p = SubscriptionStateParams {
        publishing_req_queued: true,
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::Normal, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::IntervalElapsed6);
    assert_eq!(t.next_state, SubscriptionState::Normal);
    assert!(t.pops_request());
    assert_eq!(t.actions.last(), Some(&StateAction::ReturnNotifications));
}

#[test]
fn update_state_7() {
    // Request queued, nothing sent yet and nothing to send, the first keep alive goes out
    let p = SubscriptionStateParams {
        publishing_req_queued: true,
        ..params()
    };
    let t = transition(SubscriptionState::Normal, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::IntervalElapsed7);
    assert_eq!(t.next_state, SubscriptionState::Normal);
    assert!(t.pops_request());
    assert!(t.actions.contains(&StateAction::SetMessageSent));
    assert_eq!(t.actions.last(), Some(&StateAction::ReturnKeepAlive));

    // Same with publishing disabled but notifications available
    let p = SubscriptionStateParams {
        publishing_enabled: false,
        publishing_req_queued: true,
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::Normal, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::IntervalElapsed7);
}

#[test]
fn update_state_8() {
    // No request queued, no message sent yet
    let t = transition(
        SubscriptionState::Normal,
        TickReason::TickTimerFired,
        &params(),
    );
    assert_eq!(t.handled, HandledState::IntervalElapsed8);
    assert_eq!(t.next_state, SubscriptionState::Late);
    assert_eq!(t.actions, &[StateAction::RegisterWaiting]);

    // No request queued, notifications waiting
    let p = SubscriptionStateParams {
        message_sent: true,
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::Normal, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::IntervalElapsed8);
    assert_eq!(t.next_state, SubscriptionState::Late);
}

#[test]
fn update_state_9() {
    let p = SubscriptionStateParams {
        message_sent: true,
        ..params()
    };
    let t = transition(SubscriptionState::Normal, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::IntervalElapsed9);
    assert_eq!(t.next_state, SubscriptionState::KeepAlive);
    assert_eq!(t.actions, &[StateAction::ResetKeepAliveCounter]);

    // A message was sent, a queued request with publishing disabled
    let p = SubscriptionStateParams {
        publishing_enabled: false,
        message_sent: true,
        publishing_req_queued: true,
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::Normal, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::IntervalElapsed9);
}

#[test]
fn update_state_10() {
    let p = SubscriptionStateParams {
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::Late, TickReason::ReceivePublishRequest, &p);
    assert_eq!(t.handled, HandledState::Late10);
    assert_eq!(t.next_state, SubscriptionState::Normal);
    assert_eq!(t.actions.last(), Some(&StateAction::ReturnNotifications));

    let p = SubscriptionStateParams {
        more_notifications: true,
        ..params()
    };
    let t = transition(SubscriptionState::Late, TickReason::ReceivePublishRequest, &p);
    assert_eq!(t.handled, HandledState::Late10);
}

#[test]
fn update_state_11() {
    let t = transition(
        SubscriptionState::Late,
        TickReason::ReceivePublishRequest,
        &params(),
    );
    assert_eq!(t.handled, HandledState::Late11);
    assert_eq!(t.next_state, SubscriptionState::KeepAlive);
    assert_eq!(
        t.actions,
        &[
            StateAction::ResetLifetimeCounter,
            StateAction::ResetKeepAliveCounter,
            StateAction::SetMessageSent,
            StateAction::ReturnKeepAlive,
        ]
    );

    let p = SubscriptionStateParams {
        publishing_enabled: false,
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::Late, TickReason::ReceivePublishRequest, &p);
    assert_eq!(t.handled, HandledState::Late11);
}

#[test]
fn update_state_12() {
    let p = SubscriptionStateParams {
        notifications_available: true,
        publishing_req_queued: true,
        ..params()
    };
    let t = transition(SubscriptionState::Late, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::Late12);
    assert_eq!(t.next_state, SubscriptionState::Late);
    assert!(t.actions.is_empty());
}

#[test]
fn update_state_13() {
    let p = SubscriptionStateParams {
        notifications_available: true,
        ..params()
    };
    let t = transition(
        SubscriptionState::KeepAlive,
        TickReason::ReceivePublishRequest,
        &p,
    );
    assert_eq!(t.handled, HandledState::KeepAlive13);
    assert_eq!(t.next_state, SubscriptionState::KeepAlive);
    assert_eq!(t.actions, &[StateAction::ParkRequest]);
}

#[test]
fn update_state_14() {
    let p = SubscriptionStateParams {
        notifications_available: true,
        publishing_req_queued: true,
        ..params()
    };
    let t = transition(SubscriptionState::KeepAlive, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::KeepAlive14);
    assert_eq!(t.next_state, SubscriptionState::Normal);
    assert!(t.pops_request());
    assert_eq!(t.actions.last(), Some(&StateAction::ReturnNotifications));
}

#[test]
fn update_state_15() {
    let p = SubscriptionStateParams {
        publishing_req_queued: true,
        keep_alive_counter: 1,
        ..params()
    };
    let t = transition(SubscriptionState::KeepAlive, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::KeepAlive15);
    assert_eq!(t.next_state, SubscriptionState::KeepAlive);
    assert!(t.pops_request());
    assert!(!t.actions.contains(&StateAction::SetMessageSent));
    assert_eq!(t.actions.last(), Some(&StateAction::ReturnKeepAlive));
}

#[test]
fn update_state_16() {
    let p = SubscriptionStateParams {
        publishing_req_queued: true,
        keep_alive_counter: 2,
        ..params()
    };
    let t = transition(SubscriptionState::KeepAlive, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::KeepAlive16);
    assert_eq!(t.next_state, SubscriptionState::KeepAlive);
    assert_eq!(t.actions, &[StateAction::DecrementKeepAliveCounter]);

    let p = SubscriptionStateParams {
        publishing_enabled: false,
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::KeepAlive, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::KeepAlive16);
}

#[test]
fn update_state_17() {
    let p = SubscriptionStateParams {
        keep_alive_counter: 1,
        ..params()
    };
    let t = transition(SubscriptionState::KeepAlive, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::KeepAlive17);
    assert_eq!(t.next_state, SubscriptionState::Late);
    assert_eq!(t.actions, &[StateAction::RegisterWaiting]);

    let p = SubscriptionStateParams {
        notifications_available: true,
        ..params()
    };
    let t = transition(SubscriptionState::KeepAlive, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::KeepAlive17);
}

#[test]
fn update_state_closing_and_closed() {
    let t = transition(
        SubscriptionState::Closing,
        TickReason::ReceivePublishRequest,
        &params(),
    );
    assert_eq!(t.handled, HandledState::ClosingPublish);
    assert_eq!(t.next_state, SubscriptionState::Closed);
    assert_eq!(t.actions, &[StateAction::ReturnStatusChange]);

    // Closed is absorbing, whatever the inputs
    let p = SubscriptionStateParams {
        notifications_available: true,
        more_notifications: true,
        publishing_req_queued: true,
        message_sent: true,
        keep_alive_counter: 1,
        ..params()
    };
    for tick_reason in [TickReason::ReceivePublishRequest, TickReason::TickTimerFired] {
        let t = transition(SubscriptionState::Closed, tick_reason, &p);
        assert_eq!(t.next_state, SubscriptionState::Closed);
    }
    let t = transition(SubscriptionState::Closed, TickReason::TickTimerFired, &p);
    assert_eq!(t.handled, HandledState::None0);
    assert!(t.actions.is_empty());
}

#[test]
fn lifetime_expired() {
    let t = Transition::lifetime_expired();
    assert_eq!(t.handled, HandledState::Closed27);
    assert_eq!(t.next_state, SubscriptionState::Closing);
}
