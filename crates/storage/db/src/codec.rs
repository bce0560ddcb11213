//! Column codecs shared by the repository impls.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use strato_provider::{ProviderError, ProviderResult};

pub(crate) fn ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn opt_ms(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(ms)
}

pub(crate) fn from_ms(millis: i64) -> ProviderResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| ProviderError::Backend(format!("timestamp out of range: {millis}")))
}

pub(crate) fn from_opt_ms(millis: Option<i64>) -> ProviderResult<Option<DateTime<Utc>>> {
    millis.map(from_ms).transpose()
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> ProviderResult<String> {
    serde_json::to_string(value).map_err(|err| ProviderError::Backend(err.to_string()))
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str) -> ProviderResult<T> {
    serde_json::from_str(raw).map_err(|err| ProviderError::Backend(err.to_string()))
}

pub(crate) fn parse_enum<T: FromStr>(raw: &str, what: &'static str) -> ProviderResult<T> {
    raw.parse().map_err(|_| ProviderError::Backend(format!("malformed {what}: {raw}")))
}
