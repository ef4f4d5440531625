use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::fmt;

pub type EntityId = String;
pub type BatchNumber = u32;

/// Central Index Key, accepted as a JSON number or a (zero-padded) string.
pub fn deserialize_flexible_cik<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexibleCikVisitor;
    impl<'de> Visitor<'de> for FlexibleCikVisitor {
        type Value = u64;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("unsigned integer or string int")
        }
        #[inline]
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        #[inline]
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(v).map_err(|_| E::invalid_value(Unexpected::Signed(v), &self))
        }
        #[inline]
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            v.trim()
                .trim_start_matches("CIK")
                .parse::<u64>()
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &"string int"))
        }
    }
    deserializer.deserialize_any(FlexibleCikVisitor)
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<String> = Option::deserialize(deserializer)?;
    Ok(v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}
