use uuid::Uuid;

/// Progress of one in-flight card read.
///
/// Owned exclusively by the orchestrator for the duration of a single read.
/// The flags record which device resources must be released on the way out.
#[derive(Debug, Clone)]
pub struct CardSession {
    /// Identifier used only to correlate log lines of one read.
    pub session_id: Uuid,
    /// Set once the toolkit accepted `initialize`.
    pub device_initialized: bool,
    /// Set once `connect_card` succeeded.
    pub card_connected: bool,
    /// The reader chosen for this read, empty until resolved.
    pub selected_reader: String,
}

impl CardSession {
    /// Creates a session that has not touched the device yet.
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            device_initialized: false,
            card_connected: false,
            selected_reader: String::new(),
        }
    }
}

impl Default for CardSession {
    fn default() -> Self {
        Self::new()
    }
}
