//! The typed codec: per-[`ItemType`] encode/decode rules.
//!
//! Split out from the storage adapter as free functions indexed by
//! `ItemType` (an explicit dispatch table) rather than a trait object, per
//! the design note on breaking the work-engine/codec cyclic reference.
//! Pure byte-shuffling only — no backend or memory-manager access, so it
//! is trivially unit-testable in isolation.

use crate::error::{Result, Status};
use crate::item::{ItemCapabilities, ItemType, Value};

/// What a `save` should physically do to the backend, after the codec has
/// applied type-specific validation and the empty-value/clear shortcut.
pub struct EncodedWrite {
    pub clear: bool,
    pub append: bool,
    pub offset: usize,
    pub bytes: Vec<u8>,
}

/// Encode `value` for `item_type`, enforcing each variant's size and
/// offset-capability rules. Does not decide the cancel-on-equal shortcut
/// (§4.5) — that requires comparing against the backup buffer, which only
/// the storage adapter has access to.
pub fn encode(
    item_type: ItemType,
    value: &Value,
    max_size: usize,
    capabilities: ItemCapabilities,
) -> Result<EncodedWrite> {
    match item_type {
        ItemType::BinaryArray | ItemType::BinaryPointer => {
            let Value::Binary(bytes) = value else {
                return Err(Status::InvalidArgument);
            };
            if bytes.len() > max_size {
                return Err(Status::OutOfRange);
            }
            if bytes.is_empty() {
                return Ok(EncodedWrite {
                    clear: true,
                    append: false,
                    offset: 0,
                    bytes: Vec::new(),
                });
            }
            Ok(EncodedWrite {
                clear: false,
                append: false,
                offset: 0,
                bytes: bytes.clone(),
            })
        }
        ItemType::OffsetBinaryArray | ItemType::OffsetBinaryPointer => {
            let Value::OffsetBinary { offset, data } = value else {
                return Err(Status::InvalidArgument);
            };
            if data.is_empty() {
                return Err(Status::InvalidArgument);
            }
            if *offset != 0 && !capabilities.contains(ItemCapabilities::ENABLE_OFFSET) {
                return Err(Status::InvalidArgument);
            }
            if *offset as usize + data.len() > max_size {
                return Err(Status::OutOfRange);
            }
            Ok(EncodedWrite {
                clear: false,
                append: true,
                offset: *offset as usize,
                bytes: data.clone(),
            })
        }
        ItemType::String => {
            let Value::Text(s) = value else {
                return Err(Status::InvalidArgument);
            };
            if s.len() >= max_size {
                // bounded strnlen reached max without finding a NUL slot
                return Err(Status::OutOfRange);
            }
            if s.is_empty() {
                return Ok(EncodedWrite {
                    clear: true,
                    append: false,
                    offset: 0,
                    bytes: Vec::new(),
                });
            }
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            Ok(EncodedWrite {
                clear: false,
                append: false,
                offset: 0,
                bytes,
            })
        }
        ItemType::Raw => {
            let Value::Raw(bytes) = value else {
                return Err(Status::InvalidArgument);
            };
            if bytes.len() > max_size {
                return Err(Status::OutOfRange);
            }
            if bytes.is_empty() {
                return Ok(EncodedWrite {
                    clear: true,
                    append: false,
                    offset: 0,
                    bytes: Vec::new(),
                });
            }
            Ok(EncodedWrite {
                clear: false,
                append: false,
                offset: 0,
                bytes: bytes.clone(),
            })
        }
    }
}

/// Decode the bytes actually read (`raw`, already clamped to
/// `written_size` by the storage adapter) back into a typed [`Value`].
pub fn decode(item_type: ItemType, max_size: usize, raw: &[u8]) -> Result<Value> {
    match item_type {
        ItemType::BinaryArray | ItemType::BinaryPointer => Ok(Value::Binary(raw.to_vec())),
        ItemType::OffsetBinaryArray | ItemType::OffsetBinaryPointer => {
            Ok(Value::OffsetBinary {
                offset: 0,
                data: raw.to_vec(),
            })
        }
        ItemType::String => {
            let limit = raw.len().min(max_size);
            let text = match raw[..limit].iter().position(|&b| b == 0) {
                Some(nul_at) => String::from_utf8_lossy(&raw[..nul_at]).into_owned(),
                None => String::from_utf8_lossy(&raw[..limit]).into_owned(),
            };
            Ok(Value::Text(text))
        }
        ItemType::Raw => Ok(Value::Raw(raw.to_vec())),
    }
}
