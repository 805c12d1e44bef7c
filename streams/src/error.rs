use thiserror::Error;

/// Rejected producer or subject configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("emission period must be greater than zero")]
    ZeroPeriod,
    #[error("value range {start}..={end} is empty")]
    EmptyRange { start: i64, end: i64 },
}

/// Returned by [`crate::ReplaySubject::try_send`] when the value could not be sent.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SendError<T> {
    /// The subject already delivered its terminal signal. The value is handed back.
    #[error("subject has already completed")]
    Completed(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Completed(value) => value,
        }
    }
}
