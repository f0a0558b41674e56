use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("missing required setting: {key}")]
    Missing { key: String },
    #[display("invalid value for {key}")]
    Parse { key: String },
    #[display("failed to read rules file")]
    ReadFile,
    #[display("invalid config: {field}")]
    Validation { field: String },
}

/// Marketplace call failed. Recovered per rule by the monitor.
#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("request to {marketplace} failed")]
    Request { marketplace: String },
    #[display("{marketplace} answered with HTTP {status}")]
    Status { marketplace: String, status: u16 },
    #[display("{marketplace} returned error code {code}")]
    Api { marketplace: String, code: i64 },
    #[display("failed to parse response from {marketplace}")]
    ResponseParse { marketplace: String },
}

/// Messaging call failed. Recovered per listing by the monitor.
#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("request to {service} failed")]
    Request { service: String },
    #[display("{service} answered with HTTP {status}")]
    Status { service: String, status: u16 },
}
