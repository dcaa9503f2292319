//! Data models for trendsift.

mod keyword;
mod request;
mod trends;

pub use keyword::Keyword;
pub use request::{ClaimedRequest, NewRequest, RequestStatus};
pub use trends::{FetcherIdentity, GeoScope, StagedPayload};
