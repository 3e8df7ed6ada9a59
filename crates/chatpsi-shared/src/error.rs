use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Access token is malformed")]
    Malformed,

    #[error("Access token has expired")]
    Expired,

    #[error("Access token signature is invalid")]
    BadSignature,

    #[error("Identity provider key is invalid")]
    InvalidKey,
}
