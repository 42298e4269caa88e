//! Structured measurement addresses (`"morphology.nucleus"`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::well::PlateBatch;

/// A `(category, channel)` address into a well's readouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeasurementKey {
    category: String,
    channel: String,
}

impl MeasurementKey {
    pub fn new(category: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            channel: channel.into(),
        }
    }

    /// Parse a fully-qualified `category.channel` address.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidKey {
            key: address.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = address.split('.');
        let (Some(category), Some(channel), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected exactly one `.` between category and channel"));
        };
        let (category, channel) = (category.trim(), channel.trim());
        if category.is_empty() || channel.is_empty() {
            return Err(invalid("category and channel must both be non-empty"));
        }
        Ok(Self::new(category, channel))
    }

    /// Resolve an address against the keys present in `batch`.
    ///
    /// Qualified addresses must exist in at least one well. A bare channel
    /// name is accepted when exactly one category carries it.
    pub fn resolve(address: &str, batch: &PlateBatch) -> Result<Self> {
        let keys = batch.keys();
        if address.contains('.') {
            let key = Self::parse(address)?;
            return if keys.contains(&key) {
                Ok(key)
            } else {
                Err(Error::MissingKey {
                    key: address.to_string(),
                })
            };
        }
        let mut matches: Vec<MeasurementKey> =
            keys.into_iter().filter(|k| k.channel == address).collect();
        match matches.len() {
            0 => Err(Error::MissingKey {
                key: address.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::AmbiguousKey {
                key: address.to_string(),
                candidates: matches.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.channel)
    }
}

impl TryFrom<String> for MeasurementKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MeasurementKey> for String {
    fn from(value: MeasurementKey) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::well::{PlateGeometry, morphology_readouts};

    #[test]
    fn test_parse_qualified() {
        let key = MeasurementKey::parse("morphology.nucleus").unwrap();
        assert_eq!(key.category(), "morphology");
        assert_eq!(key.channel(), "nucleus");
        assert_eq!(key.to_string(), "morphology.nucleus");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in ["nucleus", "a.b.c", ".nucleus", "morphology.", ""] {
            assert!(
                matches!(MeasurementKey::parse(bad), Err(Error::InvalidKey { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_bare_and_ambiguous() {
        let mut readouts = morphology_readouts(1.0);
        readouts.insert(
            "reader".to_string(),
            BTreeMap::from([("atp".to_string(), 1.0), ("nucleus".to_string(), 1.0)]),
        );
        let batch = PlateBatch::uniform("P", PlateGeometry::WELLS_96, &readouts);

        let atp = MeasurementKey::resolve("atp", &batch).unwrap();
        assert_eq!(atp.to_string(), "reader.atp");

        match MeasurementKey::resolve("nucleus", &batch) {
            Err(Error::AmbiguousKey { candidates, .. }) => {
                assert_eq!(candidates, vec!["morphology.nucleus", "reader.nucleus"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        assert!(matches!(
            MeasurementKey::resolve("morphology.golgi", &batch),
            Err(Error::MissingKey { .. })
        ));
        assert!(MeasurementKey::resolve("morphology.er", &batch).is_ok());
    }
}
