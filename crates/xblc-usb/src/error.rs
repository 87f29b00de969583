use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XblcError {
    #[error("sample rate index {index} is out of range")]
    SampleRateIndexOutOfRange { index: u8 },

    #[error("invalid communicator configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, XblcError>;
