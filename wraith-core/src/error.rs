/// Error taxonomy shared by the frame codec, the SOCKS5 state machine,
/// and both session drivers. Every per-session error is one of these
/// variants; the caller that owns the socket is responsible for closing
/// it and logging, nothing here reaches across a session boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected socks version {0:#x}")]
    BadVersion(u8),

    #[error("unexpected socks command {0:#x}")]
    BadCommand(u8),

    #[error("command {0:#x} is not supported")]
    UnsupportedCommand(u8),

    #[error("unexpected address type {0:#x}")]
    BadAtyp(u8),

    #[error("message too short to contain a valid request")]
    ShortMessage,

    #[error("no acceptable socks5 auth method")]
    NoAcceptableMethods,

    #[error("frame length {0} exceeds buffer size {1}")]
    FrameTooLarge(usize, usize),

    #[error("frame length {0} shorter than the iv")]
    FrameTooShort(usize),

    #[error("ciphertext length {0} is not a whole number of blocks")]
    FrameMisaligned(usize),

    #[error("padding byte {0:#x} out of range")]
    PaddingInvalid(u8),

    #[error("plaintext length {0} exceeds the per-frame maximum of {1}")]
    PlaintextTooLarge(usize, usize),

    #[error("preshared key must be 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("username or password rejected")]
    Unauthorized,

    #[error("username {0:?} already registered")]
    DuplicateUser(String),

    #[error("dns resolution failed for {0:?}: {1}")]
    Resolve(String, std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
