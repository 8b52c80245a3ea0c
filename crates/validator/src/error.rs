use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Manifest has not been loaded")]
    ManifestNotLoaded,

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    // MPEG-DASH errors
    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    DurationOutOfRange(#[from] chrono::OutOfRangeError),
}

pub type ValidatorResult<T> = Result<T, ValidatorError>;
