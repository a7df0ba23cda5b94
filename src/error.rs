use std::io;
use warp::http::StatusCode;

/// Everything a request can fail with. Each variant maps to one response.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "request carried no usable image")]
    MissingImage,
    #[fail(display = "request body exceeds {} bytes", _0)]
    PayloadTooLarge(u64),
    #[fail(display = "not an http(s) url: {:?}", _0)]
    InvalidUrl(String),
    #[fail(display = "download failed: {}", detail)]
    DownloadFailed { detail: String },
    #[fail(display = "alpr failed: {}", detail)]
    RecognitionFailed { detail: String },
    #[fail(display = "unable to write scratch file: {}", _0)]
    Scratch(#[cause] io::Error),
}

impl warp::reject::Reject for Error {}

impl Error {
    pub fn recognition<S: Into<String>>(detail: S) -> Error {
        Error::RecognitionFailed {
            detail: detail.into(),
        }
    }

    pub fn download<S: Into<String>>(detail: S) -> Error {
        Error::DownloadFailed {
            detail: detail.into(),
        }
    }

    /// Machine-readable code placed in the `error` field of the response.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingImage => "missing_image",
            Error::PayloadTooLarge(_) => "payload_too_large",
            Error::InvalidUrl(_) => "invalid_url",
            Error::DownloadFailed { .. } => "download_failed",
            Error::RecognitionFailed { .. } => "alpr_failed",
            Error::Scratch(_) => "scratch_failed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::MissingImage | Error::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Diagnostic text relayed to the client, if any.
    pub fn detail(&self) -> Option<String> {
        match self {
            Error::MissingImage | Error::PayloadTooLarge(_) | Error::InvalidUrl(_) => None,
            Error::DownloadFailed { detail } | Error::RecognitionFailed { detail } => {
                Some(detail.clone())
            }
            Error::Scratch(e) => Some(e.to_string()),
        }
    }
}
