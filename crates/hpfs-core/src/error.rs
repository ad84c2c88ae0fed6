use thiserror::Error;

pub type HpfsResult<T> = Result<T, HpfsError>;

#[derive(Debug, Error)]
pub enum HpfsError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
