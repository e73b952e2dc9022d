//! Error types for shared memory operations

use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment or module name rejected
    #[error("Invalid segment name \"{name}\": {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Segment already exists
    #[error("Shm segment \"{name}\" exists already")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Segment already has its writer attached
    #[error("Shm segment \"{name}\" already has a writer")]
    WriterAttached {
        /// Segment name
        name: String,
    },

    /// Segment not found
    #[error("Shm segment \"{name}\" not found")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Too many segments for one manager
    #[error("Unable to add \"{name}\". Max number of segments ({max}) exceeded")]
    ResourceExhausted {
        /// Segment that did not fit
        name: String,
        /// Segment limit
        max: usize,
    },

    /// Payload type id too long for the header
    #[error("Type id [{type_id}] exceeds max size of [{max}]")]
    TypeIdTooLong {
        /// Offending type id
        type_id: String,
        /// Maximum length
        max: usize,
    },

    /// Payload alignment above what the segment layout guarantees
    #[error("Type [{type_id}] requires alignment {align}, segments guarantee {max}")]
    UnsupportedAlignment {
        /// Payload type id
        type_id: String,
        /// Required alignment
        align: usize,
        /// Guaranteed alignment
        max: usize,
    },

    /// Header type id does not match the requested payload type
    #[error("Segment \"{name}\" holds type [{actual}], expected [{expected}]")]
    TypeMismatch {
        /// Segment name
        name: String,
        /// Requested type id
        expected: String,
        /// Type id found in the header
        actual: String,
    },

    /// Header schema version does not match the requested payload type
    #[error("Segment \"{name}\" has schema version {actual}, expected {expected}")]
    SchemaVersionMismatch {
        /// Segment name
        name: String,
        /// Requested schema version
        expected: u32,
        /// Schema version found in the header
        actual: u32,
    },

    /// Mapped size or header payload size does not fit the payload type
    #[error("Segment \"{name}\" has payload size {actual}, expected {expected}")]
    SizeMismatch {
        /// Segment name
        name: String,
        /// Size of the payload type
        expected: usize,
        /// Size found in the segment
        actual: usize,
    },

    /// Magic number missing, the file is not a segment
    #[error("Segment \"{name}\" has an invalid header")]
    InvalidHeader {
        /// Segment name
        name: String,
    },

    /// Futex was closed while waiting or posting
    #[error("Futex is closed")]
    Closed,

    /// Wait ran into its deadline
    #[error("Timeout after {elapsed_ms} ms")]
    Timeout {
        /// Time spent waiting
        elapsed_ms: u64,
    },

    /// Futex held a value outside its protocol
    #[error("Futex took unexpected value: {value}")]
    UnexpectedFutexValue {
        /// Raw value
        value: u32,
    },

    /// Thread could not be started or configured
    #[error("Thread setup failed: {reason}")]
    ThreadSetup {
        /// Failure description
        reason: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
