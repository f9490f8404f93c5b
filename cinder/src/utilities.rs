use std::io::{Cursor, Read};
use std::mem::size_of;

pub trait FromByteStream where Self: Sized {
	fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self>;
}

impl FromByteStream for u8 {
	#[inline]
	fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
		let mut byte = 0u8;
		stream.read_exact(std::slice::from_mut(&mut byte))?;
		Ok(byte)
	}
}

macro_rules! impl_from_le_byte_stream {
	($($ty: ty),*) => {$(
		impl crate::utilities::FromByteStream for $ty {
			#[inline]
			fn read(stream: &mut std::io::Cursor<&[u8]>) -> std::io::Result<Self> {
				let bytes = <[u8; size_of::<Self>()]>::read(stream)?;
				Ok(Self::from_le_bytes(bytes))
			}
		}
	)*};
}

impl_from_le_byte_stream!(u16, u32, u64, i8, i32, i64, f32, f64);

impl<const SIZE: usize> FromByteStream for [u8; SIZE] {
	#[inline]
	fn read(stream: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
		let mut bytes = [0u8; SIZE];
		stream.read_exact(&mut bytes)?;
		Ok(bytes)
	}
}

#[inline]
pub(crate) const fn round_to_multiple_of<const MULTIPLE: u32>(value: u32) -> u32 {
	((value + (MULTIPLE - 1)) / MULTIPLE) * MULTIPLE
}

#[inline]
pub(crate) fn put_u16(out: &mut Vec<u8>, value: u16) {
	out.extend_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
	out.extend_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_u64(out: &mut Vec<u8>, value: u64) {
	out.extend_from_slice(&value.to_le_bytes());
}
