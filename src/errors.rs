use thiserror::Error;

// typed errors so callers can match on the failing stage

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{context}, {source}")]
    Decode {
        context: &'static str,
        source: serde_json::Error,
    },

    #[error("invalid metric: {reason}")]
    MetricConstruction { reason: String },

    #[error("JSON flattener: got unexpected value {value} ({path})")]
    UnexpectedType { path: String, value: String },

    #[error("can not parse the line: {line}")]
    EmptyLine { line: String },
}

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("invalid server URL \"{url}\"")]
    InvalidUrl { url: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("unsupported HTTP method \"{method}\", expected GET or POST")]
    InvalidMethod { method: String },

    #[error("request to \"{url}\" failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("response from url \"{url}\" has status code {status}, expected 200 OK")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to convert field {field} to a number: {raw}")]
    FieldConversion { field: String, raw: String },

    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    #[error("collection task failed: {reason}")]
    Task { reason: String },
}
