//! The lifecycle of a stub as a pure transition function.

/// States of a `Stub`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubState {
    Initial = 0,
    Launching = 1,
    Loading = 2,
    LoadSucceed = 3,
    LoadFailed = 4,
    LoadCanceled = 5,
    Destroyed = 6,
}

impl StubState {
    pub(crate) fn from_u8(v: u8) -> StubState {
        match v {
            0 => StubState::Initial,
            1 => StubState::Launching,
            2 => StubState::Loading,
            3 => StubState::LoadSucceed,
            4 => StubState::LoadFailed,
            5 => StubState::LoadCanceled,
            _ => StubState::Destroyed,
        }
    }

    /// Whether the stub has finished its current load.
    #[inline]
    pub fn is_finished(self) -> bool {
        match self {
            StubState::LoadSucceed | StubState::LoadFailed | StubState::LoadCanceled => true,
            _ => false,
        }
    }
}

/// Everything that can happen to a stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubEvent {
    Launch,
    Relaunch { force: bool },
    Load,
    Reload,
    Succeed,
    /// The current attempt failed, `retry` tells if attempts remain.
    Fail { retry: bool },
    Cancel,
    Destroy,
}

/// What has to be done after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Noop,
    /// Hands the stub to its controller.
    Submit,
    NotifySucceed,
    /// Starts another attempt.
    Reload,
    NotifyCanceled,
    /// Drops the references to consumer and controller.
    Release,
}

/// Returns the next state and the effect of `event` in `state`, or `None` if the
/// event is not allowed in `state`.
pub fn transition(state: StubState, event: StubEvent) -> Option<(StubState, Effect)> {
    use self::StubState::*;

    match (event, state) {
        (StubEvent::Destroy, Destroyed) => None,
        (StubEvent::Destroy, _) => Some((Destroyed, Effect::Release)),

        (StubEvent::Launch, Initial) => Some((Launching, Effect::Noop)),

        (StubEvent::Relaunch { .. }, LoadCanceled) => Some((Initial, Effect::Noop)),
        (StubEvent::Relaunch { force: true }, LoadSucceed)
        | (StubEvent::Relaunch { force: true }, LoadFailed) => Some((Initial, Effect::Noop)),

        (StubEvent::Load, Launching)
        | (StubEvent::Load, LoadSucceed)
        | (StubEvent::Load, LoadFailed)
        | (StubEvent::Load, LoadCanceled) => Some((Loading, Effect::Submit)),

        (StubEvent::Reload, Launching)
        | (StubEvent::Reload, LoadSucceed)
        | (StubEvent::Reload, LoadFailed)
        | (StubEvent::Reload, LoadCanceled) => Some((Loading, Effect::Submit)),

        (StubEvent::Succeed, Loading) => Some((LoadSucceed, Effect::NotifySucceed)),
        (StubEvent::Fail { retry: true }, Loading) => Some((LoadFailed, Effect::Reload)),
        (StubEvent::Fail { retry: false }, Loading) => Some((LoadCanceled, Effect::NotifyCanceled)),
        (StubEvent::Cancel, Loading) => Some((LoadCanceled, Effect::NotifyCanceled)),

        _ => None,
    }
}
