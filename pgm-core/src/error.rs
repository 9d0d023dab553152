use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Crate-wide error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("would block")]
    WouldBlock,

    #[error("rate limited, retry after {0:?}")]
    RateLimited(std::time::Duration),

    #[error("no delivery ready, next timer in {0:?}")]
    TimerPending(std::time::Duration),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error("window reset")]
    Reset,

    #[error("session finished")]
    Fin,

    #[error("socket closed")]
    Eof,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("FEC decode requires exactly k valid packets")]
    FecInsufficient,

    #[error("FEC recovery matrix is singular")]
    FecSingular,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPacket(msg.into())
    }

    /// True for errors that leave a peer/session continuable, per propagation policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::WouldBlock
                | Error::RateLimited(_)
                | Error::TimerPending(_)
                | Error::Reset
                | Error::MalformedPacket(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
