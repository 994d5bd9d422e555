use crate::tags::{IfdFieldDescriptor, IfdType, IfdValueType, MaybeKnownIfdFieldDescriptor};
use derivative::Derivative;
use std::fmt::{Debug, Display, Formatter};
use std::iter::{self, once};
use std::slice;
use std::sync::Arc;

/// One decoded Image File Directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub ifd_type: IfdType,
    pub path: IfdPath,
    /// Absolute offset the directory was read from, `0` for directories built in memory.
    pub offset: u32,
}

impl Ifd {
    pub fn new(ifd_type: IfdType, path: IfdPath) -> Self {
        Self {
            entries: Vec::new(),
            ifd_type,
            path,
            offset: 0,
        }
    }

    /// Appends the entry unless its tag is already present. Returns whether it was inserted.
    pub fn insert(&mut self, entry: IfdEntry) -> bool {
        if self.entries.iter().any(|e| e.tag == entry.tag) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Builder style insertion of a known tag.
    pub fn with(mut self, tag: IfdFieldDescriptor, value: IfdValue) -> Self {
        self.insert(IfdEntry::new(tag.as_maybe(), value));
        self
    }

    pub fn get(&self, tag: &IfdFieldDescriptor) -> Option<&IfdEntry> {
        self.get_by_number(tag.tag)
    }

    pub fn get_by_number(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| u16::from(e.tag) == tag)
    }

    pub fn get_value(&self, tag: &IfdFieldDescriptor) -> Option<&IfdValue> {
        self.get(tag).map(|entry| &entry.value)
    }

    pub fn contains(&self, tag: &IfdFieldDescriptor) -> bool {
        self.get(tag).is_some()
    }

    /// The first value of the tag as an unsigned integer.
    pub fn get_u32(&self, tag: &IfdFieldDescriptor) -> Option<u32> {
        self.get_value(tag)?.values().first()?.as_u32()
    }

    pub fn get_u32_list(&self, tag: &IfdFieldDescriptor) -> Option<Vec<u32>> {
        self.get_value(tag)?.values().iter().map(IfdValue::as_u32).collect()
    }

    pub fn get_u64_list(&self, tag: &IfdFieldDescriptor) -> Option<Vec<u64>> {
        self.get_value(tag)?.values().iter().map(IfdValue::as_u64).collect()
    }

    pub fn get_f64_list(&self, tag: &IfdFieldDescriptor) -> Option<Vec<f64>> {
        self.get_value(tag)?.values().iter().map(IfdValue::as_f64).collect()
    }

    pub fn get_u8_list(&self, tag: &IfdFieldDescriptor) -> Option<Vec<u8>> {
        self.get_value(tag)?
            .values()
            .iter()
            .map(|v| v.as_u32().and_then(|v| u8::try_from(v).ok()))
            .collect()
    }

    /// The directories this one points to, in entry order.
    pub fn children(&self) -> impl Iterator<Item = &Ifd> {
        self.entries.iter().flat_map(|entry| entry.value.ifds())
    }

    /// This directory and every nested one, children before their parent.
    pub fn post_order(&self) -> Vec<&Ifd> {
        let mut out = Vec::new();
        self.collect_post_order(&mut out);
        out
    }

    fn collect_post_order<'a>(&'a self, out: &mut Vec<&'a Ifd>) {
        for child in self.children() {
            child.collect_post_order(out);
        }
        out.push(self);
    }

    /// Every entry of this directory and of all nested directories, depth first.
    pub fn flat_entries<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a IfdPath, &'a IfdEntry)> + 'a> {
        Box::new(self.entries.iter().flat_map(move |entry| {
            once((&self.path, entry)).chain(entry.value.ifds().flat_map(|ifd| ifd.flat_entries()))
        }))
    }
}

/// Where in the directory tree an IFD was found, e.g. `IFD0.SubIFDs.1`.
#[derive(Clone, PartialEq, Default)]
pub struct IfdPath(Vec<IfdPathElement>);

impl IfdPath {
    /// The path of the `n`th directory in the top-level chain.
    pub fn root(n: u16) -> Self {
        Self(vec![IfdPathElement::Chain(n)])
    }

    pub fn chain_list_index(&self, n: u16) -> Self {
        self.chain(IfdPathElement::ListIndex(n))
    }

    pub fn chain_tag(&self, tag: MaybeKnownIfdFieldDescriptor) -> Self {
        self.chain(IfdPathElement::Tag(tag))
    }

    fn chain(&self, element: IfdPathElement) -> Self {
        Self(self.0.iter().cloned().chain(once(element)).collect())
    }

    pub fn parent(&self) -> Self {
        let mut new = self.0.clone();
        new.pop();
        Self(new)
    }

    pub fn depth(&self) -> usize {
        self.0
            .iter()
            .filter(|e| matches!(e, IfdPathElement::Tag(_)))
            .count()
    }

    pub fn string_with_separator(&self, separator: &str) -> String {
        self.0
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn as_slice(&self) -> &[IfdPathElement] {
        &self.0
    }
}

impl Debug for IfdPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.string_with_separator("."))
    }
}

impl Display for IfdPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.string_with_separator("."))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IfdPathElement {
    Chain(u16),
    Tag(MaybeKnownIfdFieldDescriptor),
    ListIndex(u16),
}

impl Display for IfdPathElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IfdPathElement::Chain(n) => write!(f, "IFD{n}"),
            IfdPathElement::Tag(tag) => write!(f, "{tag}"),
            IfdPathElement::ListIndex(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IfdEntry {
    pub tag: MaybeKnownIfdFieldDescriptor,
    pub value: IfdValue,
}

impl IfdEntry {
    pub fn new(tag: MaybeKnownIfdFieldDescriptor, value: IfdValue) -> Self {
        Self { tag, value }
    }
}

#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub enum IfdValue {
    Byte(u8),
    Ascii(String),
    Short(u16),
    Long(u32),
    Rational(u32, u32),
    SByte(i8),
    Undefined(u8),
    SShort(i16),
    SLong(i32),
    SRational(i32, i32),
    Float(f32),
    Double(f64),
    Long8(u64),
    SLong8(i64),

    List(Vec<IfdValue>),
    Ifd(Ifd),

    /// An entry whose type code is not known. The 4-byte value slot is kept as stored.
    Opaque {
        type_code: u16,
        count: u32,
        raw: [u8; 4],
    },

    /// Only consumed by the writer: the contents are placed somewhere in the file and
    /// the entry becomes a `Long` pointing at them. The matching length tag is up to the
    /// caller.
    Offsets(#[derivative(Debug = "ignore")] Arc<[u8]>),
}

impl IfdValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            IfdValue::Byte(x) => Some(*x as u32),
            IfdValue::Short(x) => Some(*x as u32),
            IfdValue::Long(x) => Some(*x),
            IfdValue::Undefined(x) => Some(*x as u32),
            IfdValue::SByte(x) => u32::try_from(*x).ok(),
            IfdValue::SShort(x) => u32::try_from(*x).ok(),
            IfdValue::SLong(x) => u32::try_from(*x).ok(),
            IfdValue::Long8(x) => u32::try_from(*x).ok(),
            IfdValue::SLong8(x) => u32::try_from(*x).ok(),
            IfdValue::Ifd(ifd) => Some(ifd.offset),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            IfdValue::Long8(x) => Some(*x),
            IfdValue::SLong8(x) => u64::try_from(*x).ok(),
            other => other.as_u32().map(u64::from),
        }
    }

    /// Any numeric value widened to `f64`; rationals with a zero denominator are `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IfdValue::Rational(_, 0) | IfdValue::SRational(_, 0) => None,
            IfdValue::Rational(n, d) => Some(*n as f64 / *d as f64),
            IfdValue::SRational(n, d) => Some(*n as f64 / *d as f64),
            IfdValue::Float(x) => Some(*x as f64),
            IfdValue::Double(x) => Some(*x),
            IfdValue::SByte(x) => Some(*x as f64),
            IfdValue::SShort(x) => Some(*x as f64),
            IfdValue::SLong(x) => Some(*x as f64),
            IfdValue::SLong8(x) => Some(*x as f64),
            IfdValue::Long8(x) => Some(*x as f64),
            other => other.as_u32().map(f64::from),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            IfdValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// The individual values: the list elements, or the value itself.
    pub fn values(&self) -> &[IfdValue] {
        match self {
            IfdValue::List(list) => list,
            other => slice::from_ref(other),
        }
    }

    /// Directories directly contained in this value.
    pub fn ifds<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Ifd> + 'a> {
        match self {
            IfdValue::Ifd(ifd) => Box::new(once(ifd)),
            IfdValue::List(list) => Box::new(list.iter().flat_map(|v| v.ifds())),
            _ => Box::new(iter::empty()),
        }
    }

    /// The TIFF type of this value, `None` for opaque entries of an unknown type.
    pub fn value_type(&self) -> Option<IfdValueType> {
        Some(match self {
            IfdValue::Byte(_) => IfdValueType::Byte,
            IfdValue::Ascii(_) => IfdValueType::Ascii,
            IfdValue::Short(_) => IfdValueType::Short,
            IfdValue::Long(_) => IfdValueType::Long,
            IfdValue::Rational(_, _) => IfdValueType::Rational,
            IfdValue::SByte(_) => IfdValueType::SignedByte,
            IfdValue::Undefined(_) => IfdValueType::Undefined,
            IfdValue::SShort(_) => IfdValueType::SignedShort,
            IfdValue::SLong(_) => IfdValueType::SignedLong,
            IfdValue::SRational(_, _) => IfdValueType::SignedRational,
            IfdValue::Float(_) => IfdValueType::Float,
            IfdValue::Double(_) => IfdValueType::Double,
            IfdValue::Long8(_) => IfdValueType::Long8,
            IfdValue::SLong8(_) => IfdValueType::SignedLong8,
            IfdValue::List(list) => return list.first().map_or(Some(IfdValueType::Byte), |v| v.value_type()),

            // both become a pointer to the actual data
            IfdValue::Ifd(_) => IfdValueType::Long,
            IfdValue::Offsets(_) => IfdValueType::Long,
            IfdValue::Opaque { .. } => return None,
        })
    }

    /// The numeric type code as stored in the entry.
    pub fn type_code(&self) -> u16 {
        match (self, self.value_type()) {
            (IfdValue::Opaque { type_code, .. }, _) => *type_code,
            (_, Some(value_type)) => value_type.into(),
            (_, None) => 7,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            IfdValue::List(list) => list.len() as u32,
            IfdValue::Ascii(str) => str.len() as u32 + 1,
            IfdValue::Opaque { count, .. } => *count,
            _ => 1,
        }
    }
}

impl Display for IfdValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IfdValue::Byte(x) | IfdValue::Undefined(x) => write!(f, "{x}"),
            IfdValue::Ascii(x) => write!(f, "{x:?}"),
            IfdValue::Short(x) => write!(f, "{x}"),
            IfdValue::Long(x) => write!(f, "{x}"),
            IfdValue::Rational(n, d) => write!(f, "{n}/{d}"),
            IfdValue::SByte(x) => write!(f, "{x}"),
            IfdValue::SShort(x) => write!(f, "{x}"),
            IfdValue::SLong(x) => write!(f, "{x}"),
            IfdValue::SRational(n, d) => write!(f, "{n}/{d}"),
            IfdValue::Float(x) => write!(f, "{x}"),
            IfdValue::Double(x) => write!(f, "{x}"),
            IfdValue::Long8(x) => write!(f, "{x}"),
            IfdValue::SLong8(x) => write!(f, "{x}"),
            IfdValue::List(list) if list.len() > 16 => {
                let head: Vec<_> = list[..16].iter().map(|v| v.to_string()).collect();
                write!(f, "[{}, ... ({} values)]", head.join(", "), list.len())
            }
            IfdValue::List(list) => {
                let all: Vec<_> = list.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", all.join(", "))
            }
            IfdValue::Ifd(ifd) => write!(f, "<IFD at {:#x}>", ifd.offset),
            IfdValue::Opaque {
                type_code, count, ..
            } => write!(f, "<{count} values of unknown type {type_code}>"),
            IfdValue::Offsets(data) => write!(f, "<{} bytes>", data.len()),
        }
    }
}
