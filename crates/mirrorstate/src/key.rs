//! Config keys.
//!
//! A config key names one leaf of the flattened configuration tree
//! (`"editor.font_size"`). Keys are declared as enums so every lookup is
//! checked at compile time; the string form is only used at the storage
//! boundary.

use crate::error::{Error, Result};
use std::fmt::Debug;
use std::hash::Hash;

/// An enumerated config key.
pub trait StateKey: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Dotted storage name of this key.
    fn as_str(&self) -> &'static str;

    /// Every declared key, in declaration order.
    fn all() -> &'static [Self];

    /// Look up a key by its dotted storage name.
    fn parse(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|key| key.as_str() == name)
    }
}

/// Resolve `name` to a declared key, or fail with [`Error::UnknownKey`].
pub fn parse_key<K: StateKey>(name: &str) -> Result<K> {
    K::parse(name).ok_or_else(|| Error::UnknownKey(name.to_string()))
}

/// Declare a config key enum together with its [`StateKey`] impl.
///
/// ```
/// mirrorstate::state_keys! {
///     /// Keys of the editor settings tree.
///     pub enum EditorKey {
///         FontSize => "editor.font_size",
///         Theme => "editor.theme",
///     }
/// }
///
/// use mirrorstate::StateKey;
/// assert_eq!(EditorKey::Theme.as_str(), "editor.theme");
/// assert_eq!(EditorKey::parse("editor.font_size"), Some(EditorKey::FontSize));
/// ```
#[macro_export]
macro_rules! state_keys {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $key:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )+
        }

        impl $crate::StateKey for $name {
            fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $key,)+
                }
            }

            fn all() -> &'static [Self] {
                &[$(Self::$variant,)+]
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::StateKey::as_str(self))
            }
        }
    };
}
