use thiserror::Error;

/// Errors surfaced by the vendor SDK boundary. Handlers log these and fall
/// back to the documented failure path; nothing unwinds the dispatch loop.
#[derive(Debug, Error)]
pub enum SdkError {
    /// An operation needed the SDK loaded and/or a session open, and it
    /// wasn't.
    #[error("camera SDK not ready")]
    NotReady,
    /// Exactly one attached camera is required.
    #[error("expected exactly one camera, found {0}")]
    Enumeration(usize),
    /// Retriable at the SDK layer; the core only logs it and aborts any
    /// running sequence.
    #[error("camera is busy")]
    Busy,
    #[error("camera went away: {0}")]
    Gone(String),
    #[error("camera session error: {0}")]
    Session(String),
}

/// Properties the controller pushes to the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraProp {
    ShutterSpeed,
    Iso,
}

/// Description of a detected body.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub model: String,
    pub port: String,
}

/// The vendor SDK seen from the dispatcher. All methods block and must only
/// be called from the thread that owns the implementation.
pub trait CameraSdk {
    type Session: CameraSession;

    /// Load the SDK. Idempotent.
    fn load(&mut self) -> Result<(), SdkError>;

    fn unload(&mut self);

    /// Enumerate attached cameras. The backend keeps its own descriptors so
    /// a later [`CameraSdk::open`] can refer to them by index.
    fn detect(&mut self) -> Result<Vec<CameraInfo>, SdkError>;

    /// Open a session on the camera at `index` of the last detection.
    fn open(&mut self, index: usize) -> Result<Self::Session, SdkError>;
}

/// An open session on one body.
pub trait CameraSession {
    /// Keep the body's physical controls from interfering while the host
    /// drives it.
    fn lock_ui(&mut self) -> Result<(), SdkError>;

    fn unlock_ui(&mut self) -> Result<(), SdkError>;

    fn close(&mut self) -> Result<(), SdkError>;

    /// Parameter codes the body advertises as valid for `prop`, in the
    /// body's own order.
    fn advertised(&mut self, prop: CameraProp) -> Result<Vec<u32>, SdkError>;

    fn set_property(&mut self, prop: CameraProp, param: u32) -> Result<(), SdkError>;

    fn press_shutter(&mut self) -> Result<(), SdkError>;

    fn release_shutter(&mut self) -> Result<(), SdkError>;

    /// Drain pending vendor events. Called from the dispatcher whenever the
    /// command queue is idle.
    fn drain_events(&mut self) -> Result<(), SdkError>;
}
