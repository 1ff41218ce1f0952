use std::fmt;
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// A closed set of field names for one entity kind.
///
/// Implemented through [`entity_fields!`]. Field maps, selections and plans are
/// keyed by the enum, so a field the entity does not have cannot be selected.
/// Strings only appear at the storage boundary.
pub trait FieldKey:
    Copy
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Kind name stored in `records.kind`.
    const ENTITY: &'static str;

    /// Every field, in declaration order.
    fn all() -> &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse(name: &str) -> Result<Self, CoreError> {
        Self::all()
            .iter()
            .copied()
            .find(|f| f.as_str() == name)
            .ok_or_else(|| CoreError::UnknownField {
                entity: Self::ENTITY,
                field: name.to_string(),
            })
    }
}

/// Declares a field enum for an entity kind and implements [`FieldKey`],
/// `Display` and string-based serde for it.
#[macro_export]
macro_rules! entity_fields {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident in $entity:literal {
            $($variant:ident => $key:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::field::FieldKey for $name {
            const ENTITY: &'static str = $entity;

            fn all() -> &'static [Self] {
                &[$($name::$variant),+]
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $key),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::field::FieldKey::as_str(self))
            }
        }

        impl $crate::__serde::Serialize for $name {
            fn serialize<S: $crate::__serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str($crate::field::FieldKey::as_str(self))
            }
        }

        impl<'de> $crate::__serde::Deserialize<'de> for $name {
            fn deserialize<D: $crate::__serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let name = <String as $crate::__serde::Deserialize>::deserialize(deserializer)?;
                <$name as $crate::field::FieldKey>::parse(&name).map_err($crate::__serde::de::Error::custom)
            }
        }
    };
}

entity_fields! {
    /// Fields of an author record.
    pub enum AuthorField in "author" {
        Name => "name",
        Bio => "bio",
        Website => "website",
        Avatar => "avatar",
        Location => "location",
        Links => "links",
    }
}
