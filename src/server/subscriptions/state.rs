//! The subscription state table from Part 4 5.13.1 as a pure function. The subscription feeds it
//! a snapshot of its flags and counters, and carries out the actions of the row that matched.

/// The states a subscription can be in. A subscription starts out in `Normal`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Closed,
    Closing,
    Normal,
    KeepAlive,
    Late,
}

/// What caused the state table to be evaluated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum TickReason {
    ReceivePublishRequest,
    TickTimerFired,
}

/// The inputs of the state table besides the current state.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct SubscriptionStateParams {
    pub publishing_enabled: bool,
    pub notifications_available: bool,
    pub more_notifications: bool,
    pub publishing_req_queued: bool,
    pub message_sent: bool,
    pub keep_alive_counter: u32,
}

/// The row of the state table that was matched, named after the row numbers in the standard.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum HandledState {
    None0,
    Normal4,
    Normal5,
    IntervalElapsed6,
    IntervalElapsed7,
    IntervalElapsed8,
    IntervalElapsed9,
    Late10,
    Late11,
    Late12,
    KeepAlive13,
    KeepAlive14,
    KeepAlive15,
    KeepAlive16,
    KeepAlive17,
    /// A publish request received while closing gets the status change
    ClosingPublish,
    /// A publish request received after closing is parked for the session to fault
    ClosedPublish,
    /// Lifetime counter ran out
    Closed27,
}

/// An action the subscription performs for a row, in the order given.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StateAction {
    /// Put the publish request back into the publish queue
    ParkRequest,
    /// Take the oldest request from the publish queue. Always the first action of a row.
    PopRequest,
    ResetLifetimeCounter,
    ResetKeepAliveCounter,
    DecrementKeepAliveCounter,
    SetMessageSent,
    ReturnNotifications,
    ReturnKeepAlive,
    ReturnStatusChange,
    /// Register on the publish queue wait-list for the next request
    RegisterWaiting,
}

/// The outcome of evaluating the state table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Transition {
    pub handled: HandledState,
    pub next_state: SubscriptionState,
    pub actions: &'static [StateAction],
}

impl Transition {
    fn new(
        handled: HandledState,
        next_state: SubscriptionState,
        actions: &'static [StateAction],
    ) -> Transition {
        Transition {
            handled,
            next_state,
            actions,
        }
    }

    /// Row 27. The lifetime counter reached zero, the subscription must close.
    pub fn lifetime_expired() -> Transition {
        Transition::new(HandledState::Closed27, SubscriptionState::Closing, &[])
    }

    /// Tests if the first action of the row takes a request from the publish queue.
    pub fn pops_request(&self) -> bool {
        self.actions.first() == Some(&StateAction::PopRequest)
    }
}

use self::StateAction::*;

const RESET_AND_NOTIFY: &[StateAction] = &[
    ResetLifetimeCounter,
    ResetKeepAliveCounter,
    SetMessageSent,
    ReturnNotifications,
];

const RESET_AND_KEEP_ALIVE: &[StateAction] = &[
    ResetLifetimeCounter,
    ResetKeepAliveCounter,
    SetMessageSent,
    ReturnKeepAlive,
];

const POP_RESET_AND_NOTIFY: &[StateAction] = &[
    PopRequest,
    ResetLifetimeCounter,
    ResetKeepAliveCounter,
    SetMessageSent,
    ReturnNotifications,
];

/// Evaluates the state transition table.
///
/// The layout follows the table in the standard row by row. Keep the redundant checks, it makes
/// the code easier to compare with the document.
pub(crate) fn transition(
    state: SubscriptionState,
    tick_reason: TickReason,
    p: &SubscriptionStateParams,
) -> Transition {
    use self::{HandledState as H, SubscriptionState as S, TickReason as T};

    match (state, tick_reason) {
        (S::Normal, T::ReceivePublishRequest)
            if !p.publishing_enabled || p.publishing_enabled && !p.more_notifications =>
        {
            Transition::new(H::Normal4, S::Normal, &[ParkRequest])
        }
        (S::Normal, T::ReceivePublishRequest)
            if p.publishing_enabled && p.more_notifications =>
        {
            Transition::new(H::Normal5, S::Normal, RESET_AND_NOTIFY)
        }
        (S::Normal, T::TickTimerFired)
            if p.publishing_req_queued && p.publishing_enabled && p.notifications_available =>
        {
            Transition::new(H::IntervalElapsed6, S::Normal, POP_RESET_AND_NOTIFY)
        }
        (S::Normal, T::TickTimerFired)
            if p.publishing_req_queued
                && !p.message_sent
                && (!p.publishing_enabled
                    || p.publishing_enabled && !p.notifications_available) =>
        {
            Transition::new(
                H::IntervalElapsed7,
                S::Normal,
                &[
                    PopRequest,
                    ResetLifetimeCounter,
                    ResetKeepAliveCounter,
                    SetMessageSent,
                    ReturnKeepAlive,
                ],
            )
        }
        (S::Normal, T::TickTimerFired)
            if !p.publishing_req_queued
                && (!p.message_sent || p.publishing_enabled && p.notifications_available) =>
        {
            Transition::new(H::IntervalElapsed8, S::Late, &[RegisterWaiting])
        }
        (S::Normal, T::TickTimerFired)
            if p.message_sent
                && (!p.publishing_enabled
                    || p.publishing_enabled && !p.notifications_available) =>
        {
            Transition::new(
                H::IntervalElapsed9,
                S::KeepAlive,
                &[ResetKeepAliveCounter],
            )
        }
        (S::Late, T::ReceivePublishRequest)
            if p.publishing_enabled && (p.notifications_available || p.more_notifications) =>
        {
            Transition::new(H::Late10, S::Normal, RESET_AND_NOTIFY)
        }
        (S::Late, T::ReceivePublishRequest)
            if !p.publishing_enabled
                || p.publishing_enabled && !p.notifications_available && !p.more_notifications =>
        {
            Transition::new(H::Late11, S::KeepAlive, RESET_AND_KEEP_ALIVE)
        }
        (S::Late, T::TickTimerFired) => Transition::new(H::Late12, S::Late, &[]),
        (S::KeepAlive, T::ReceivePublishRequest) => {
            Transition::new(H::KeepAlive13, S::KeepAlive, &[ParkRequest])
        }
        (S::KeepAlive, T::TickTimerFired)
            if p.publishing_enabled && p.notifications_available && p.publishing_req_queued =>
        {
            Transition::new(H::KeepAlive14, S::Normal, POP_RESET_AND_NOTIFY)
        }
        (S::KeepAlive, T::TickTimerFired)
            if p.publishing_req_queued
                && p.keep_alive_counter == 1
                && (!p.publishing_enabled
                    || p.publishing_enabled && !p.notifications_available) =>
        {
            Transition::new(
                H::KeepAlive15,
                S::KeepAlive,
                &[
                    PopRequest,
                    ResetLifetimeCounter,
                    ResetKeepAliveCounter,
                    ReturnKeepAlive,
                ],
            )
        }
        (S::KeepAlive, T::TickTimerFired)
            if p.keep_alive_counter > 1
                && (!p.publishing_enabled
                    || p.publishing_enabled && !p.notifications_available) =>
        {
            Transition::new(
                H::KeepAlive16,
                S::KeepAlive,
                &[DecrementKeepAliveCounter],
            )
        }
        (S::KeepAlive, T::TickTimerFired)
            if !p.publishing_req_queued
                && (p.keep_alive_counter == 1
                    || p.keep_alive_counter > 1
                        && p.publishing_enabled
                        && p.notifications_available) =>
        {
            Transition::new(H::KeepAlive17, S::Late, &[RegisterWaiting])
        }
        (S::Closing, T::ReceivePublishRequest) => Transition::new(
            H::ClosingPublish,
            S::Closed,
            &[ReturnStatusChange],
        ),
        (S::Closed, T::ReceivePublishRequest) => {
            Transition::new(H::ClosedPublish, S::Closed, &[ParkRequest])
        }
        _ => Transition::new(H::None0, state, &[]),
    }
}
