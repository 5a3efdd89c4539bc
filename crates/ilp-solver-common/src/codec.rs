//! Schema-less binary codec for the shared-memory transport.
//!
//! Values are written in declaration order without tags or names. Both sides
//! must agree on the layout, which is why every transported type declares its
//! field order exactly once through [`wire_layout!`](crate::wire_layout).
//!
//! # Layout
//!
//! | Item | Bytes |
//! |------|-------|
//! | scalar | native bytes of the value, padded to [`ALIGNMENT`] |
//! | array | `i32` element count (padded), then the elements (padded) |
//! | nested array | `i32` row count (padded), then each row as an array |
//!
//! Padding keeps every array start aligned to 8 bytes relative to the start of
//! the buffer, so a view decode over an aligned buffer can hand out `&[f64]`
//! slices that point straight into shared memory.
//!
//! Sizing uses two passes over the same code path: a simulating
//! [`Serializer`] only counts bytes, a real one writes them. Both report the
//! same [`position`](Serializer::position) for the same value.

use bytemuck::checked::CheckedCastError;
use bytemuck::{CheckedBitPattern, NoUninit, PodCastError};
use sha2::{Digest, Sha256};
use std::mem::size_of;
use std::ops::Deref;
use thiserror::Error;

/// Every item starts at a multiple of this many bytes.
pub const ALIGNMENT: usize = 8;

/// Size of the `[payload_len][checksum]` header of a sealed record.
pub const RECORD_HEADER_LEN: usize = 2 * size_of::<u64>();

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A read or write would go past the end of the buffer.
    #[error("Buffer overflow: {needed} bytes at offset {offset} exceed capacity {capacity}")]
    Overflow {
        offset: usize,
        needed: usize,
        capacity: usize,
    },

    /// The bytes do not form a valid value of the target type.
    #[error("Invalid bit pattern for {type_name}")]
    InvalidValue { type_name: &'static str },

    /// Array length is negative or does not fit the wire format.
    #[error("Invalid element count {0}")]
    InvalidCount(i64),

    /// A view was requested over a buffer that is not aligned for the element type.
    #[error("Buffer not aligned for a view of {type_name}")]
    Misaligned { type_name: &'static str },

    /// The sealed record was partially written or never written.
    #[error("Torn or missing record")]
    TornRecord,
}

/// Round `len` up to the next multiple of [`ALIGNMENT`].
pub const fn padded_len(len: usize) -> usize {
    len.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// Writes values into a byte buffer, or only counts bytes when simulating.
#[derive(Debug)]
pub struct Serializer<'a> {
    buf: Option<&'a mut [u8]>,
    pos: usize,
}

impl Serializer<'static> {
    /// A serializer without destination that only advances its position.
    pub fn simulate() -> Self {
        Self { buf: None, pos: 0 }
    }
}

impl<'a> Serializer<'a> {
    /// A serializer writing into `buf`, starting at offset 0.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf: Some(buf),
            pos: 0,
        }
    }

    /// Whether this serializer only counts bytes.
    pub fn is_simulation(&self) -> bool {
        self.buf.is_none()
    }

    /// Bytes written (or counted) so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Buffer size needed for everything written so far.
    pub fn required_bytes(&self) -> usize {
        self.pos
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = padded_len(bytes.len());
        if let Some(buf) = self.buf.as_deref_mut() {
            let end = self.pos + len;
            if end > buf.len() {
                return Err(CodecError::Overflow {
                    offset: self.pos,
                    needed: len,
                    capacity: buf.len(),
                });
            }
            let (data, padding) = buf[self.pos..end].split_at_mut(bytes.len());
            data.copy_from_slice(bytes);
            padding.fill(0);
        }
        self.pos += len;
        Ok(())
    }

    /// Write one plain value.
    pub fn write<T: NoUninit>(&mut self, value: &T) -> Result<(), CodecError> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    fn write_count(&mut self, count: usize) -> Result<(), CodecError> {
        let count = i32::try_from(count).map_err(|_| CodecError::InvalidCount(count as i64))?;
        self.write(&count)
    }

    /// Write a slice as count followed by the raw elements.
    pub fn write_array<T: NoUninit>(&mut self, values: &[T]) -> Result<(), CodecError> {
        self.write_count(values.len())?;
        self.write_bytes(bytemuck::cast_slice(values))
    }

    /// Write a slice of rows as row count followed by each row as an array.
    pub fn write_nested<T, R>(&mut self, rows: &[R]) -> Result<(), CodecError>
    where
        T: NoUninit,
        R: Deref<Target = [T]>,
    {
        self.write_count(rows.len())?;
        for row in rows {
            self.write_array(&**row)?;
        }
        Ok(())
    }
}

/// Reads values back from a byte buffer.
///
/// Owned reads (`read*`) copy and work on any buffer. View reads (`view*`)
/// borrow from the buffer and need it to be aligned for the element type.
#[derive(Debug, Clone)]
pub struct Deserializer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Minimum buffer size for everything read so far.
    pub fn required_bytes(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let padded = padded_len(len);
        let overflow = CodecError::Overflow {
            offset: self.pos,
            needed: padded,
            capacity: self.buf.len(),
        };
        let end = self.pos.checked_add(padded).ok_or_else(|| overflow.clone())?;
        if end > self.buf.len() {
            return Err(overflow);
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos = end;
        Ok(bytes)
    }

    /// Read one plain value, validating its bit pattern.
    pub fn read<T: CheckedBitPattern>(&mut self) -> Result<T, CodecError> {
        let bytes = self.take(size_of::<T>())?;
        bytemuck::checked::try_pod_read_unaligned(bytes).map_err(|e| cast_error::<T>(e))
    }

    fn read_count(&mut self) -> Result<usize, CodecError> {
        let count: i32 = self.read()?;
        usize::try_from(count).map_err(|_| CodecError::InvalidCount(count as i64))
    }

    fn take_elements<T>(&mut self) -> Result<&'a [u8], CodecError> {
        let count = self.read_count()?;
        let len = count
            .checked_mul(size_of::<T>())
            .ok_or(CodecError::InvalidCount(count as i64))?;
        self.take(len)
    }

    /// Read an array into an owned vector.
    pub fn read_array<T: CheckedBitPattern>(&mut self) -> Result<Vec<T>, CodecError> {
        let bytes = self.take_elements::<T>()?;
        if size_of::<T>() == 0 {
            return Ok(Vec::new());
        }
        bytes
            .chunks_exact(size_of::<T>())
            .map(|chunk| {
                bytemuck::checked::try_pod_read_unaligned(chunk).map_err(|e| cast_error::<T>(e))
            })
            .collect()
    }

    /// Borrow an array directly from the buffer.
    pub fn view_array<T: CheckedBitPattern>(&mut self) -> Result<&'a [T], CodecError> {
        let bytes = self.take_elements::<T>()?;
        bytemuck::checked::try_cast_slice(bytes).map_err(|e| cast_error::<T>(e))
    }

    /// Read an array of arrays into owned vectors.
    pub fn read_nested<T: CheckedBitPattern>(&mut self) -> Result<Vec<Vec<T>>, CodecError> {
        let rows = self.read_count()?;
        let mut out = Vec::with_capacity(rows.min(self.remaining()));
        for _ in 0..rows {
            out.push(self.read_array()?);
        }
        Ok(out)
    }

    /// Borrow each row of an array of arrays from the buffer.
    pub fn view_nested<T: CheckedBitPattern>(&mut self) -> Result<Vec<&'a [T]>, CodecError> {
        let rows = self.read_count()?;
        let mut out = Vec::with_capacity(rows.min(self.remaining()));
        for _ in 0..rows {
            out.push(self.view_array()?);
        }
        Ok(out)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn cast_error<T>(e: CheckedCastError) -> CodecError {
    let type_name = std::any::type_name::<T>();
    match e {
        CheckedCastError::InvalidBitPattern => CodecError::InvalidValue { type_name },
        CheckedCastError::PodCastError(PodCastError::TargetAlignmentGreaterAndInputNotAligned)
        | CheckedCastError::PodCastError(PodCastError::AlignmentMismatch) => {
            CodecError::Misaligned { type_name }
        }
        CheckedCastError::PodCastError(_) => CodecError::InvalidValue { type_name },
    }
}

/// Types with a wire layout.
pub trait Encode {
    fn encode(&self, ser: &mut Serializer<'_>) -> Result<(), CodecError>;
}

/// Owned decoding.
pub trait Decode: Sized {
    fn decode(de: &mut Deserializer<'_>) -> Result<Self, CodecError>;
}

/// Zero-copy decoding into a type borrowing from the buffer.
pub trait DecodeView<'a>: Sized {
    fn decode_view(de: &mut Deserializer<'a>) -> Result<Self, CodecError>;
}

/// Declare the wire layout of a type once.
///
/// Each field is tagged with its kind:
///
/// - `scalar`: a plain value (`i32`, `f64`, `bool`, fieldless `#[repr]` enums)
/// - `array`: `Vec<T>` in the owned type, `&'a [T]` in the view
/// - `nested`: `Vec<Vec<T>>` in the owned type, `Vec<&'a [T]>` in the view
/// - `record`: another type with a wire layout
///
/// `wire_layout!(Owned, View { .. })` implements [`Encode`] for both types,
/// [`Decode`] for the owned one and [`DecodeView`] for the view.
/// `wire_layout!(Owned { .. })` declares a type without a view flavor.
///
/// ```ignore
/// wire_layout!(SparseMatrix, SparseMatrixView {
///     values: nested,
///     indices: nested,
///     num_cols: scalar,
/// });
/// ```
#[macro_export]
macro_rules! wire_layout {
    (@encode $ser:ident, $value:expr, scalar) => { $ser.write(&$value)? };
    (@encode $ser:ident, $value:expr, array) => { $ser.write_array(&$value)? };
    (@encode $ser:ident, $value:expr, nested) => { $ser.write_nested(&$value)? };
    (@encode $ser:ident, $value:expr, record) => { $crate::codec::Encode::encode(&$value, $ser)? };

    (@decode $de:ident, scalar) => { $de.read()? };
    (@decode $de:ident, array) => { $de.read_array()? };
    (@decode $de:ident, nested) => { $de.read_nested()? };
    (@decode $de:ident, record) => { $crate::codec::Decode::decode($de)? };

    (@view $de:ident, scalar) => { $de.read()? };
    (@view $de:ident, array) => { $de.view_array()? };
    (@view $de:ident, nested) => { $de.view_nested()? };
    (@view $de:ident, record) => { $crate::codec::DecodeView::decode_view($de)? };

    ($owned:ident { $($field:ident: $kind:ident),* $(,)? }) => {
        impl $crate::codec::Encode for $owned {
            fn encode(&self, ser: &mut $crate::codec::Serializer<'_>) -> Result<(), $crate::codec::CodecError> {
                $( $crate::wire_layout!(@encode ser, self.$field, $kind); )*
                Ok(())
            }
        }

        impl $crate::codec::Decode for $owned {
            fn decode(de: &mut $crate::codec::Deserializer<'_>) -> Result<Self, $crate::codec::CodecError> {
                Ok(Self {
                    $( $field: $crate::wire_layout!(@decode de, $kind), )*
                })
            }
        }
    };

    ($owned:ident, $view:ident { $($field:ident: $kind:ident),* $(,)? }) => {
        $crate::wire_layout!($owned { $($field: $kind),* });

        impl $crate::codec::Encode for $view<'_> {
            fn encode(&self, ser: &mut $crate::codec::Serializer<'_>) -> Result<(), $crate::codec::CodecError> {
                $( $crate::wire_layout!(@encode ser, self.$field, $kind); )*
                Ok(())
            }
        }

        impl<'a> $crate::codec::DecodeView<'a> for $view<'a> {
            fn decode_view(de: &mut $crate::codec::Deserializer<'a>) -> Result<Self, $crate::codec::CodecError> {
                Ok(Self {
                    $( $field: $crate::wire_layout!(@view de, $kind), )*
                })
            }
        }
    };
}

/// Bytes needed to encode `value` (simulation pass).
pub fn encoded_len<T: Encode + ?Sized>(value: &T) -> Result<usize, CodecError> {
    let mut ser = Serializer::simulate();
    value.encode(&mut ser)?;
    Ok(ser.required_bytes())
}

/// Encode `value` at the start of `buf`, returning the bytes written.
pub fn encode_into<T: Encode + ?Sized>(value: &T, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut ser = Serializer::new(buf);
    value.encode(&mut ser)?;
    Ok(ser.position())
}

/// Decode an owned value from the start of `buf`.
pub fn decode<T: Decode>(buf: &[u8]) -> Result<T, CodecError> {
    T::decode(&mut Deserializer::new(buf))
}

/// Decode a view from the start of `buf`, also returning the bytes consumed.
pub fn decode_view<'a, T: DecodeView<'a>>(buf: &'a [u8]) -> Result<(T, usize), CodecError> {
    let mut de = Deserializer::new(buf);
    let value = T::decode_view(&mut de)?;
    Ok((value, de.position()))
}

/// Size of a sealed record holding `payload_len` bytes.
pub const fn sealed_len(payload_len: usize) -> usize {
    RECORD_HEADER_LEN + padded_len(payload_len)
}

fn checksum(payload: &[u8]) -> u64 {
    let digest = Sha256::digest(payload);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Write `value` into `region` as a sealed record.
///
/// The checksum is cleared before the payload is touched and written last, so
/// a writer killed halfway leaves a record that [`read_sealed`] rejects.
pub fn write_sealed<T: Encode + ?Sized>(region: &mut [u8], value: &T) -> Result<usize, CodecError> {
    if region.len() < RECORD_HEADER_LEN {
        return Err(CodecError::Overflow {
            offset: 0,
            needed: RECORD_HEADER_LEN,
            capacity: region.len(),
        });
    }
    let (header, payload) = region.split_at_mut(RECORD_HEADER_LEN);
    header[8..].fill(0);

    let len = encode_into(value, payload)?;
    let sum = checksum(&payload[..len]);
    header[..8].copy_from_slice(&(len as u64).to_le_bytes());
    header[8..].copy_from_slice(&sum.to_le_bytes());
    Ok(RECORD_HEADER_LEN + len)
}

/// Read a sealed record written by [`write_sealed`].
pub fn read_sealed<T: Decode>(region: &[u8]) -> Result<T, CodecError> {
    if region.len() < RECORD_HEADER_LEN {
        return Err(CodecError::TornRecord);
    }
    let (header, payload) = region.split_at(RECORD_HEADER_LEN);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[..8]);
    let mut sum_bytes = [0u8; 8];
    sum_bytes.copy_from_slice(&header[8..]);

    let len = usize::try_from(u64::from_le_bytes(len_bytes)).map_err(|_| CodecError::TornRecord)?;
    if len > payload.len() || checksum(&payload[..len]) != u64::from_le_bytes(sum_bytes) {
        return Err(CodecError::TornRecord);
    }
    decode(&payload[..len])
}

/// Heap buffer whose start is aligned to [`ALIGNMENT`].
///
/// `Vec<u8>` gives no alignment guarantee, which view decoding needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedBuffer {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuffer {
    /// A zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(size_of::<u64>())],
            len,
        }
    }

    /// Encode `value` into a buffer of exactly the simulated size.
    pub fn encode<T: Encode + ?Sized>(value: &T) -> Result<Self, CodecError> {
        let mut buf = Self::zeroed(encoded_len(value)?);
        encode_into(value, buf.as_mut_slice())?;
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}
