/// The closed set of operations the dispatcher understands. Everything the
/// HTTP layer or a signal handler wants from the camera goes through one of
/// these; the dispatcher also posts follow-ups to itself to advance a
/// shooting sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NoOp,
    Initialize,
    Deinitialize,
    Connect,
    Disconnect,
    InitialDelay,
    IntervalDelay,
    TakePicture,
    StartShooting,
    StopShooting,
    Terminate,
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Self::NoOp => "NO_OP",
            Self::Initialize => "INITIALIZE",
            Self::Deinitialize => "DEINITIALIZE",
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::InitialDelay => "INITIAL_DELAY",
            Self::IntervalDelay => "INTERVAL_DELAY",
            Self::TakePicture => "TAKE_PICTURE",
            Self::StartShooting => "START_SHOOTING",
            Self::StopShooting => "STOP_SHOOTING",
            Self::Terminate => "TERMINATE",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
