use {
    serde::{
        Deserialize,
        Deserializer,
        Serialize,
        Serializer,
        de::{self, Visitor},
    },
    serde_with::{DeserializeAs, SerializeAs},
    std::fmt,
};

/// Serialize [`alloy_primitives::U256`] as a decimal string and deserialize
/// it from a decimal or a hex string prefixed with 0x.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct U256(alloy_primitives::U256);

impl From<alloy_primitives::U256> for U256 {
    fn from(value: alloy_primitives::U256) -> Self {
        Self(value)
    }
}

impl From<U256> for alloy_primitives::U256 {
    fn from(value: U256) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct U256Visitor;

        impl Visitor<'_> for U256Visitor {
            type Value = U256;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "a u256 encoded either as 0x hex prefixed or decimal encoded string"
                )
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let s = s.trim();
                let parsed = if let Some(hex) = s.strip_prefix("0x") {
                    alloy_primitives::U256::from_str_radix(hex, 16)
                } else {
                    alloy_primitives::U256::from_str_radix(s, 10)
                };
                parsed
                    .map(U256)
                    .map_err(|err| E::custom(format!("failed to decode {s:?} as u256: {err}")))
            }
        }

        deserializer.deserialize_str(U256Visitor)
    }
}

impl SerializeAs<alloy_primitives::U256> for U256 {
    fn serialize_as<S: Serializer>(
        source: &alloy_primitives::U256,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&source.to_string())
    }
}

impl<'de> DeserializeAs<'de, alloy_primitives::U256> for U256 {
    fn deserialize_as<D>(deserializer: D) -> Result<alloy_primitives::U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(U256::deserialize(deserializer)?.0)
    }
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        U256::serialize_as(&self.0, serializer)
    }
}
