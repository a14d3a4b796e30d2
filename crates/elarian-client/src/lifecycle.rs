use elarian_protocol::Events;

/// Connection state transitions, in the order a healthy connect emits them:
/// `Pending`, `Connecting`, `Connected`. A transport failure emits `Error`
/// followed by `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Pending,
    Connecting,
    Connected,
    Error(String),
    Closed,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => Events::PENDING,
            Self::Connecting => Events::CONNECTING,
            Self::Connected => Events::CONNECTED,
            Self::Error(_) => Events::ERROR,
            Self::Closed => Events::CLOSED,
        }
    }
}
