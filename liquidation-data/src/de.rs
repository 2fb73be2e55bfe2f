use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, de::Error as _};
use std::{fmt::Display, str::FromStr, time::Duration};

/// Deserialize a `String` as the desired type, eg/ `"16578.50"` -> `16578.50_f64`.
pub fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let data: &str = Deserialize::deserialize(deserializer)?;
    data.parse::<T>().map_err(D::Error::custom)
}

/// Deserialize an `f64` sent either as a JSON number or as a numeric string.
///
/// Gate.io sends numbers for some contracts and strings for others on the same channel.
pub fn de_str_or_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Num(f64),
        Str(String),
    }

    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(value) => Ok(value),
        StrOrNum::Str(value) => value.parse::<f64>().map_err(D::Error::custom),
    }
}

/// Deserialize a `u64` milliseconds value as `DateTime<Utc>`.
pub fn de_u64_epoch_ms_as_datetime_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(|epoch_ms: u64| {
        datetime_utc_from_epoch_duration(Duration::from_millis(epoch_ms))
    })
}

/// Deserialize milliseconds sent either as a JSON number or a numeric string as `DateTime<Utc>`.
pub fn de_any_epoch_ms_as_datetime_utc<'de, D>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Num(u64),
        Str(String),
    }

    let epoch_ms = match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(value) => value,
        StrOrNum::Str(value) => value.parse::<u64>().map_err(D::Error::custom)?,
    };

    Ok(datetime_utc_from_epoch_duration(Duration::from_millis(
        epoch_ms,
    )))
}

/// Construct a `DateTime<Utc>` from the provided duration since the unix epoch.
pub fn datetime_utc_from_epoch_duration(duration: Duration) -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH + duration)
}
