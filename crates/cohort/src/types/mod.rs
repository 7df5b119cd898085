//! Criteria model types.
//!
//! This module holds the in-memory representation of a cohort definition:
//! a [`SearchRequest`] of include and exclude [`SearchGroup`]s, each holding
//! [`SearchGroupItem`]s of [`SearchParameter`]s and [`Modifier`]s.
//!
//! Every categorical field is a closed enum. The JSON form uses the
//! upper-case wire names (`"CONDITION"`, `"ICD9CM"`, `"BETWEEN"`) and parses
//! them case-insensitively so that `"Condition"` is accepted as well.

use thiserror::Error;

/// Declares a closed enum with a wire name per variant.
///
/// Generates `as_str`, `ALL`, `Display`, a case-insensitive `FromStr`, and
/// string-based serde impls. Extra literals after `|` are accepted aliases.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $wire:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Returns the wire name of this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::types::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($wire) $(|| s.eq_ignore_ascii_case($alias))* {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::types::UnknownVariant {
                    kind: stringify!($name),
                    value: s.to_string(),
                })
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

mod criteria;
mod request;

pub use criteria::{
    AttrName, CriteriaSubType, CriteriaType, DomainType, ItemType, ModifierType, Operator,
    Stratification, TemporalMention, TemporalTime,
};
pub use request::{
    Attribute, Modifier, SearchGroup, SearchGroupItem, SearchParameter, SearchRequest,
    TemporalRole,
};

/// A wire name that does not match any variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    /// The enum being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}
