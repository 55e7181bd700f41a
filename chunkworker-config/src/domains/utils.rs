//! Serde helpers shared by the configuration domains
//!
//! Durations are written as seconds. Whole seconds serialise as integers and
//! fractional values such as `0.25` are accepted.

use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Convert a number of seconds, rejecting negative and non-finite values
pub(crate) fn duration_from_secs(secs: f64) -> Result<Duration, String> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("{} is not a valid number of seconds", secs));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    if duration.subsec_nanos() == 0 {
        serializer.serialize_u64(duration.as_secs())
    } else {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

pub mod serde_duration {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_secs(duration, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        duration_from_secs(secs).map_err(D::Error::custom)
    }
}

pub mod serde_duration_option {
    use super::*;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serialize_secs(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(duration_from_secs)
            .transpose()
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "super::serde_duration")]
        ready: Duration,
        #[serde(with = "super::serde_duration_option", default)]
        job: Option<Duration>,
    }

    #[test]
    fn test_whole_and_fractional_seconds() {
        let parsed: Timeouts = serde_yaml::from_str("ready: 10\njob: 0.25\n").unwrap();
        assert_eq!(parsed.ready, Duration::from_secs(10));
        assert_eq!(parsed.job, Some(Duration::from_millis(250)));

        let yaml = serde_yaml::to_string(&parsed).unwrap();
        assert!(yaml.contains("ready: 10\n"));
        assert!(yaml.contains("job: 0.25"));
    }

    #[test]
    fn test_negative_seconds_rejected() {
        assert!(serde_yaml::from_str::<Timeouts>("ready: -1\n").is_err());

        let parsed: Timeouts = serde_yaml::from_str("ready: 1\n").unwrap();
        assert_eq!(parsed.job, None);
    }
}
