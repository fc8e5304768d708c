//! Wire layouts of the IPv4 and TCP headers we craft, plus the textual
//! names of their enumerated codes.

use std::fmt;

/// An enumeration whose variants carry both a numeric wire code and a
/// short canonical name (e.g. `tcp` = 6, `af41` = 34).
pub trait Named: Copy + 'static {
    /// Human readable name of the enumeration, used in diagnostics.
    const KIND: &'static str;
    /// Every variant, in the order the names are listed to the user.
    const ALL: &'static [Self];

    fn code(self) -> u8;
    fn name(self) -> &'static str;
}

/// A textual entry that does not name any code of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("\"{given}\" is not a valid {kind}; valid entries (case-insensitive): {}", .valid.join(", "))]
pub struct UnknownName {
    pub kind: &'static str,
    pub given: String,
    pub valid: Vec<&'static str>,
}

/// Failure to decode a header out of a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("buffer too short: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

/// Case-insensitive name to variant lookup.
pub fn lookup<T: Named>(name: &str) -> Result<T, UnknownName> {
    T::ALL
        .iter()
        .copied()
        .find(|variant| variant.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| UnknownName {
            kind: T::KIND,
            given: name.to_string(),
            valid: T::ALL.iter().map(|v| v.name()).collect(),
        })
}

/// Inverse of [`lookup`]: the first name registered for `code`.
///
/// Several names may share a code (DSCP `df` and `cs0`); the first one
/// listed in [`Named::ALL`] wins.
pub fn name_of<T: Named>(code: u8) -> Option<&'static str> {
    T::ALL
        .iter()
        .find(|variant| variant.code() == code)
        .map(|variant| variant.name())
}

/// Generates a `Named` enumeration together with its `Display` impl.
macro_rules! named_codes {
    (
        $(#[$meta:meta])*
        $vis:vis enum $ty:ident : $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident = ($code:expr, $name:literal), )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $ty {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $crate::net::Named for $ty {
            const KIND: &'static str = $kind;
            const ALL: &'static [Self] = &[ $( $ty::$variant, )+ ];

            fn code(self) -> u8 {
                match self {
                    $( $ty::$variant => $code, )+
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $( $ty::$variant => $name, )+
                }
            }
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::net::Named::name(*self))
            }
        }
    };
}

pub mod ip;
pub mod tcp;

/// Writes `value` big-endian at `offset`.
#[inline(always)]
pub(crate) fn put_u16(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

#[inline(always)]
pub(crate) fn put_u32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline(always)]
pub(crate) fn get_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

#[inline(always)]
pub(crate) fn get_u32(buffer: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}

pub(crate) fn ensure_len(buffer: &[u8], needed: usize) -> Result<(), WireError> {
    if buffer.len() < needed {
        return Err(WireError::Truncated {
            needed,
            got: buffer.len(),
        });
    }
    Ok(())
}

/// Lists `T`'s names and codes, one per line (`--help`-style output).
pub struct Listing<T>(std::marker::PhantomData<T>);

impl<T: Named> Listing<T> {
    pub fn new() -> Self {
        Listing(std::marker::PhantomData)
    }
}

impl<T: Named> Default for Listing<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Named> fmt::Display for Listing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", T::KIND)?;
        for variant in T::ALL {
            writeln!(f, "  {:<14} {}", variant.name(), variant.code())?;
        }
        Ok(())
    }
}
