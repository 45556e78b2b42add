use thiserror::Error;

/// Failures at the camera / decode boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecoderError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("Failed to read frame: {0}")]
    Frame(String),
}

/// Failures talking to the remote registration/attendance API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    /// Non-2xx response; `message` is the server's `error` field when it sent one.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("{0}")]
    NotFound(String),
    #[error("Invalid API url: {0}")]
    Url(#[from] url::ParseError),
}

/// Failures while rasterizing a layout or building the document.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Fonts failed to load: {0}")]
    Fonts(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to encode QR code: {0}")]
    Qr(String),
    #[error("PDF error: {0}")]
    Pdf(String),
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Conditions that keep a scanning session out of the `Scanning` state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("You do not have permission to view this page.")]
    NotAuthorized,
    #[error("Missing permission: {0}")]
    MissingPermission(&'static str),
    #[error("No active event today.")]
    NoActiveEvent,
    #[error("Failed to load events: {0}")]
    EventsUnavailable(String),
    #[error(transparent)]
    Camera(#[from] DecoderError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),
}
