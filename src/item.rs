//! Item identity, item typing, and the caller-supplied struct descriptor.

use bitflags::bitflags;

/// Dense integer tag naming a logical persisted item.
///
/// The real catalog (~180 values) is caller-defined; this crate only
/// needs the two sentinels the engine itself reasons about: `Custom` for
/// caller-defined members dispatched through closures, and `Max` as the
/// end-of-catalog marker used when iterating "every statically routed
/// item" (e.g. during `invoke_factory_reset`).
pub type ItemId = u32;

/// A caller-defined member, dispatched entirely through the four
/// `Custom` closures rather than the typed codec.
pub const ITEM_ID_CUSTOM: ItemId = ItemId::MAX - 1;
/// End-of-catalog marker: one past the largest statically routed item-id.
pub const ITEM_ID_MAX: ItemId = ItemId::MAX;

/// The closed set of codec variants a member may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// Inline `{u32 size; u8 data[size]}`, declared maximum size.
    BinaryArray,
    /// `{u32 size; *u8 data}`, caller-owned storage.
    BinaryPointer,
    /// Inline `{u32 offset; u32 size; u8 data[size]}`, partial writes.
    OffsetBinaryArray,
    /// `{u32 offset; u32 size; *u8 data}`, partial writes.
    OffsetBinaryPointer,
    /// NUL-terminated text up to a declared capacity.
    String,
    /// `{u32 size; u8 data[...]}` where the tail fills the declared
    /// member size.
    Raw,
}

bitflags! {
    /// Per-item capabilities, queried by the codec and the API layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ItemCapabilities: u32 {
        const READ_ONLY     = 0b0000_0001;
        const ENABLE_OFFSET = 0b0000_0010;
    }

    /// Global, engine-level capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const CANCELLABLE = 0b0000_0001;
    }
}

/// Request shape for `update_begin`: whether the shadow temp id starts
/// empty, or is pre-seeded with a copy of the live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Empty,
    Copy,
}

/// The caller-supplied typed value for a save, or the destination buffer
/// for a load. Kept as an enum (rather than raw pointers, which have no
/// useful meaning in safe Rust) mirroring the codec's closed dispatch set.
#[derive(Debug, Clone)]
pub enum Value {
    Binary(Vec<u8>),
    OffsetBinary { offset: u32, data: Vec<u8> },
    Text(String),
    Raw(Vec<u8>),
}

impl Value {
    /// Mirrors `is_data_empty`'s per-type `IS_EMPTY` test.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Binary(b) => b.is_empty(),
            Value::OffsetBinary { data, .. } => data.is_empty(),
            Value::Text(s) => s.is_empty(),
            Value::Raw(b) => b.is_empty(),
        }
    }
}

/// Mask predicate closure: "is this member in scope for this call?"
pub type MaskPredicate<'a> = dyn Fn() -> bool + 'a;

/// The four closures a `Custom` member provides in place of the typed
/// codec. Each receives the member's item-id and private data and
/// returns a status.
pub struct CustomOps<'a> {
    pub save: Box<dyn FnMut(ItemId) -> crate::error::Result<()> + 'a>,
    pub load: Box<dyn FnMut(ItemId) -> crate::error::Result<()> + 'a>,
    pub clear: Box<dyn FnMut(ItemId) -> crate::error::Result<()> + 'a>,
    pub cancel: Box<dyn FnMut(ItemId) -> crate::error::Result<()> + 'a>,
}

/// One entry in a [`StructInfo`].
pub struct MemberDescriptor<'a> {
    pub item_id: ItemId,
    pub item_type: ItemType,
    /// Byte offset within the caller's struct (informational; the Rust
    /// rendition addresses members by index rather than raw offset).
    pub offset: usize,
    /// Declared maximum size in bytes.
    pub max_size: usize,
    pub mask: Box<MaskPredicate<'a>>,
    pub custom: Option<CustomOps<'a>>,
}

impl<'a> MemberDescriptor<'a> {
    pub fn is_custom(&self) -> bool {
        self.item_id == ITEM_ID_CUSTOM
    }
}

/// Ordered sequence of member descriptors. Order fixes tie-breaks and
/// iteration order during commits and rollbacks (invariant 3).
pub struct StructInfo<'a> {
    pub members: Vec<MemberDescriptor<'a>>,
}

impl<'a> StructInfo<'a> {
    pub fn new(members: Vec<MemberDescriptor<'a>>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
