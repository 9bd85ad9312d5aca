use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("No sensors detected during discovery")]
    NoSensorsDiscovered,

    #[error("Failed to start input command: {0}")]
    InputCommandFailed(String),

    #[error("Input command has no stdout")]
    InputCommandNoStdout,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
