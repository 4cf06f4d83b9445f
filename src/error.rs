use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not prepare artifact directories")]
    Storage,
    #[display("could not open the download counter")]
    Counter,
    #[display("statistics database error")]
    Stats,
    #[display("session error")]
    Session,
    #[display("could not write {}", _0.display())]
    Output(#[error(not(source))] std::path::PathBuf),
    #[display("could not read {}", _0.display())]
    Input(#[error(not(source))] std::path::PathBuf),
    #[display("could not install signal handler")]
    Signal,
}

impl ErrorKind {
    /// Returns `true` if running the command again might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Counter)
    }
}
