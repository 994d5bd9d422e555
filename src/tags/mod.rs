//! The static tag dictionary.
//!
//! The tables themselves are generated by `build.rs` from the JSON files next to this module.

use std::fmt::{Debug, Display, Formatter};

include!(concat!(env!("OUT_DIR"), "/ifd_data.rs"));

/// An enum indicating the context (and thus valid tags) of an IFD (normal/EXIF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfdType {
    #[default]
    Ifd,
    Exif,
}

impl IfdType {
    pub fn namespace(&self) -> &'static [IfdFieldDescriptor] {
        match self {
            IfdType::Ifd => &ifd::ALL,
            IfdType::Exif => &exif::ALL,
        }
    }

    pub fn combined_namespace() -> impl Iterator<Item = &'static IfdFieldDescriptor> {
        ifd::ALL.iter().chain(exif::ALL.iter())
    }
}

/// Looks up the meaning of a tag in the given namespace.
///
/// Unknown tags are not an error, they come back as [MaybeKnownIfdFieldDescriptor::Unknown].
pub fn describe(tag: u16, namespace: IfdType) -> MaybeKnownIfdFieldDescriptor {
    MaybeKnownIfdFieldDescriptor::from_number(tag, namespace)
}

/// A data structure describing one specific Field (2byte key) that can appear in an IFD.
///
/// Possible keys are defined in the TIFF, TIFF-EP, EXIF and DNG specifications.
#[derive(Debug, Copy, Clone, Eq)]
pub struct IfdFieldDescriptor {
    pub name: &'static str,
    pub tag: u16,
    pub dtype: &'static [IfdValueType],
    pub interpretation: IfdTypeInterpretation,
    pub count: IfdCount,
    /// One line summary; the longer text and references end up in the rustdoc of each tag.
    pub description: &'static str,
}

impl IfdFieldDescriptor {
    pub fn as_maybe(&self) -> MaybeKnownIfdFieldDescriptor {
        MaybeKnownIfdFieldDescriptor::Known(*self)
    }
}

impl PartialEq for IfdFieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl From<IfdFieldDescriptor> for MaybeKnownIfdFieldDescriptor {
    fn from(x: IfdFieldDescriptor) -> Self {
        MaybeKnownIfdFieldDescriptor::Known(x)
    }
}

/// The amount of values we expect for a given field.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum IfdCount {
    N,
    ConcreteValue(u32),
}

/// The high level interpretation of a field. (i.e. Enum variants, Bitfields, IFD-pointer, ...).
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum IfdTypeInterpretation {
    Default,

    Enumerated {
        values: &'static [(u32, &'static str)],
    },
    Bitflags {
        values: &'static [(u8, &'static str)],
    },

    CfaPattern,

    IfdOffset {
        ifd_type: IfdType,
    },

    /// Together with the matching `Lengths` field this points at image data blocks.
    Offsets {
        lengths: &'static IfdFieldDescriptor,
    },
    Lengths,

    /// Opaque payloads (XMP, maker notes) that are better extracted than printed.
    Blob,
}

/// Represents a 2-byte IFD key, that is either known or unknown
#[derive(Clone, Eq, Copy)]
pub enum MaybeKnownIfdFieldDescriptor {
    Known(IfdFieldDescriptor),
    Unknown(u16),
}

impl MaybeKnownIfdFieldDescriptor {
    pub fn from_number(tag: u16, ifd_kind: IfdType) -> Self {
        if let Some(description) = ifd_kind.namespace().iter().find(|x| x.tag == tag) {
            Self::Known(*description)
        } else {
            Self::Unknown(tag)
        }
    }

    pub fn from_name(name: &str, ifd_kind: IfdType) -> Option<Self> {
        ifd_kind
            .namespace()
            .iter()
            .find(|x| x.name == name)
            .map(|description| Self::Known(*description))
    }

    pub fn type_interpretation(&self) -> Option<&IfdTypeInterpretation> {
        match self {
            MaybeKnownIfdFieldDescriptor::Known(IfdFieldDescriptor { interpretation, .. }) => {
                Some(interpretation)
            }
            _ => None,
        }
    }

    pub fn known_value_type(&self) -> Option<&[IfdValueType]> {
        match self {
            MaybeKnownIfdFieldDescriptor::Known(known) => Some(known.dtype),
            MaybeKnownIfdFieldDescriptor::Unknown(_) => None,
        }
    }

    pub fn known_name(&self) -> Option<&str> {
        match self {
            Self::Known(descriptor) => Some(descriptor.name),
            Self::Unknown(_) => None,
        }
    }

    /// Whether an entry of this type and count matches what the dictionary expects.
    ///
    /// Unknown tags accept anything. ASCII strings are exempt from the count check
    /// since writers disagree on the trailing NUL.
    pub fn accepts(&self, value_type: IfdValueType, count: u32) -> bool {
        let MaybeKnownIfdFieldDescriptor::Known(known) = self else {
            return true;
        };
        let type_ok = known
            .dtype
            .iter()
            .any(|expected| expected.is_compatible_with(value_type));
        let count_ok = match known.count {
            IfdCount::N => true,
            IfdCount::ConcreteValue(_) if value_type == IfdValueType::Ascii => true,
            IfdCount::ConcreteValue(expected) => expected == count,
        };
        type_ok && count_ok
    }
}

impl From<MaybeKnownIfdFieldDescriptor> for u16 {
    fn from(value: MaybeKnownIfdFieldDescriptor) -> Self {
        match value {
            MaybeKnownIfdFieldDescriptor::Known(descriptor) => descriptor.tag,
            MaybeKnownIfdFieldDescriptor::Unknown(tag) => tag,
        }
    }
}

impl Display for MaybeKnownIfdFieldDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            MaybeKnownIfdFieldDescriptor::Known(tag) => std::fmt::Display::fmt(&tag.name, f),
            MaybeKnownIfdFieldDescriptor::Unknown(tag) => write!(f, "{:#06X}", tag),
        }
    }
}

impl Debug for MaybeKnownIfdFieldDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl PartialEq for MaybeKnownIfdFieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        u16::from(*self) == (*other).into()
    }
}

/// The data-type of an IFD value.
///
/// This does not include the fact that it is possible to have a list of every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfdValueType {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SignedByte,
    Undefined,
    SignedShort,
    SignedLong,
    SignedRational,
    Float,
    Double,
    Ifd,
    Long8,
    SignedLong8,
    Ifd8,
}

impl TryFrom<u16> for IfdValueType {
    /// The unrecognized type code.
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Ascii),
            3 => Ok(Self::Short),
            4 => Ok(Self::Long),
            5 => Ok(Self::Rational),
            6 => Ok(Self::SignedByte),
            7 => Ok(Self::Undefined),
            8 => Ok(Self::SignedShort),
            9 => Ok(Self::SignedLong),
            10 => Ok(Self::SignedRational),
            11 => Ok(Self::Float),
            12 => Ok(Self::Double),
            13 => Ok(Self::Ifd),
            16 => Ok(Self::Long8),
            17 => Ok(Self::SignedLong8),
            18 => Ok(Self::Ifd8),
            other => Err(other),
        }
    }
}

impl From<IfdValueType> for u16 {
    fn from(value: IfdValueType) -> Self {
        match value {
            IfdValueType::Byte => 1,
            IfdValueType::Ascii => 2,
            IfdValueType::Short => 3,
            IfdValueType::Long => 4,
            IfdValueType::Rational => 5,
            IfdValueType::SignedByte => 6,
            IfdValueType::Undefined => 7,
            IfdValueType::SignedShort => 8,
            IfdValueType::SignedLong => 9,
            IfdValueType::SignedRational => 10,
            IfdValueType::Float => 11,
            IfdValueType::Double => 12,
            IfdValueType::Ifd => 13,
            IfdValueType::Long8 => 16,
            IfdValueType::SignedLong8 => 17,
            IfdValueType::Ifd8 => 18,
        }
    }
}

impl IfdValueType {
    pub fn size(&self) -> usize {
        match self {
            IfdValueType::Byte => 1,
            IfdValueType::Ascii => 1,
            IfdValueType::Short => 2,
            IfdValueType::Long => 4,
            IfdValueType::Rational => 8,
            IfdValueType::SignedByte => 1,
            IfdValueType::Undefined => 1,
            IfdValueType::SignedShort => 2,
            IfdValueType::SignedLong => 4,
            IfdValueType::SignedRational => 8,
            IfdValueType::Float => 4,
            IfdValueType::Double => 8,
            IfdValueType::Ifd => 4,
            IfdValueType::Long8 => 8,
            IfdValueType::SignedLong8 => 8,
            IfdValueType::Ifd8 => 8,
        }
    }

    /// Writers freely mix up SHORT/LONG and LONG/IFD for offset-like values.
    fn is_compatible_with(&self, actual: IfdValueType) -> bool {
        use IfdValueType::*;
        *self == actual
            || matches!(
                (self, actual),
                (Long, Short) | (Long, Ifd) | (Ifd, Long) | (Long8, Long) | (Ifd8, Ifd)
            )
    }
}
