//! Domain model module declarations.

use serde::{Deserialize, Deserializer};

pub mod account;
pub mod session;

/// Deserialize an optional string, mapping `""` to `None`.
///
/// Account files written by earlier tools store absent optional fields as
/// empty strings rather than omitting them.
pub(crate) fn empty_string_as_none<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
