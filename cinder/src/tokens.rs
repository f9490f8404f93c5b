//! The flat 32-bit token space of the image. Every reachable entity gets one
//! token; the kind lives in the high byte so inverse lookup can dispatch by
//! range, and the low 24 bits are a dense per-kind index.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use fxhash::FxHashMap;
use nohash_hasher::BuildNoHashHasher;
use paste::paste;

use crate::program::{FieldId, MethodId, TypeId};

macro_rules! define_image_tokens {
	($($id: ident = $discriminant: literal),* $(,)?) => {
		#[repr(u32)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
		pub enum ImageTokenKind {
			$($id = $discriminant),*
		}

		#[repr(transparent)]
		#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
		pub struct ImageToken(u32);

		impl ImageToken {
			pub(crate) fn new(kind: ImageTokenKind, index: usize) -> Self {
				debug_assert!(index <= 0x00FF_FFFF);
				Self(((kind as u32) << 24) | index as u32)
			}

			pub fn kind(&self) -> ImageTokenKind {
				let discriminant = (self.0 & 0xFF00_0000) >> 24;
				match discriminant {
					$($discriminant => ImageTokenKind::$id,)*
					_ => unreachable!(),
				}
			}

			pub fn index(&self) -> usize {
				(self.0 & 0x00FF_FFFF) as usize
			}

			pub fn raw(&self) -> u32 {
				self.0
			}
		}

		impl TryFrom<u32> for ImageToken {
			type Error = ();
			fn try_from(value: u32) -> Result<Self, Self::Error> {
				let discriminant = (value & 0xFF00_0000) >> 24;
				match discriminant {
					$($discriminant => Ok(Self(value)),)*
					_ => Err(()),
				}
			}
		}
	};
}

define_image_tokens! {
	Type = 0x01,
	Field = 0x02,
	Method = 0x03,
	String = 0x04,
	Blob = 0x05,
}

impl Debug for ImageToken {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "ImageToken::{:?}", self.kind())?;
		let mut dbg = f.debug_tuple("");
		dbg.field(&self.index());
		dbg.finish()
	}
}

impl nohash_hasher::IsEnabled for ImageToken {}

/// Identity an image type token was allocated against. Array types have no
/// source record of their own; they are synthesized per element type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeKey {
	Def(TypeId),
	Array(TypeId),
}

/// What a token resolves back to.
#[derive(Debug, Clone)]
pub enum TokenSource {
	Type(TypeKey),
	Field(FieldId),
	Method(MethodId),
	/// A generated method with no source record (the startup stub).
	SyntheticMethod,
	String(Arc<str>),
	/// Constant data registered for the given field.
	Blob(FieldId),
}

macro_rules! alloc_kind {
	($kind: ident, $key: ty, $map: ident, $keys: ident) => {
		paste! {
			#[doc = concat!("Token for the given ", stringify!($map), " key, allocated on first request.")]
			pub fn [<$kind:lower _token>](&mut self, key: $key) -> ImageToken {
				if let Some(token) = self.$map.get(&key) {
					return *token;
				}
				let token = ImageToken::new(ImageTokenKind::$kind, self.$keys.len());
				self.$map.insert(key.clone(), token);
				self.$keys.push(key);
				token
			}

			pub fn [<peek_ $kind:lower>](&self, key: &$key) -> Option<ImageToken> {
				self.$map.get(key).copied()
			}

			pub fn [<$kind:lower _count>](&self) -> usize {
				self.$keys.len()
			}
		}
	};
}

/// Hands out one token per entity, monotonically, and never reuses or
/// invalidates one for the life of the set. Single-threaded by contract;
/// the compile session holds the only reference. Cloning is how a frozen
/// kernel prefix gets shared: descriptors are never shared between sets.
#[derive(Debug, Default, Clone)]
pub struct TokenAllocator {
	types: FxHashMap<TypeKey, ImageToken>,
	type_keys: Vec<TypeKey>,
	fields: HashMap<FieldId, ImageToken, BuildNoHashHasher<FieldId>>,
	field_keys: Vec<FieldId>,
	methods: HashMap<MethodId, ImageToken, BuildNoHashHasher<MethodId>>,
	method_keys: Vec<Option<MethodId>>,
	strings: FxHashMap<Arc<str>, ImageToken>,
	string_keys: Vec<Arc<str>>,
	blobs: HashMap<FieldId, ImageToken, BuildNoHashHasher<FieldId>>,
	blob_keys: Vec<FieldId>,
}

impl TokenAllocator {
	pub fn new() -> Self {
		Self::default()
	}

	alloc_kind!(Type, TypeKey, types, type_keys);
	alloc_kind!(Field, FieldId, fields, field_keys);
	alloc_kind!(String, Arc<str>, strings, string_keys);
	alloc_kind!(Blob, FieldId, blobs, blob_keys);

	pub fn method_token(&mut self, key: MethodId) -> ImageToken {
		if let Some(token) = self.methods.get(&key) {
			return *token;
		}
		let token = ImageToken::new(ImageTokenKind::Method, self.method_keys.len());
		self.methods.insert(key, token);
		self.method_keys.push(Some(key));
		token
	}

	pub fn peek_method(&self, key: &MethodId) -> Option<ImageToken> {
		self.methods.get(key).copied()
	}

	pub fn method_count(&self) -> usize {
		self.method_keys.len()
	}

	/// A method token with no source record behind it.
	pub fn synthetic_method_token(&mut self) -> ImageToken {
		let token = ImageToken::new(ImageTokenKind::Method, self.method_keys.len());
		self.method_keys.push(None);
		token
	}

	/// Inverse resolution: the originating identity of any assigned token.
	pub fn lookup(&self, token: ImageToken) -> Option<TokenSource> {
		let index = token.index();
		match token.kind() {
			ImageTokenKind::Type => self.type_keys.get(index).map(|k| TokenSource::Type(*k)),
			ImageTokenKind::Field => self.field_keys.get(index).map(|k| TokenSource::Field(*k)),
			ImageTokenKind::Method => self.method_keys.get(index).map(|k| match k {
				Some(id) => TokenSource::Method(*id),
				None => TokenSource::SyntheticMethod,
			}),
			ImageTokenKind::String => self.string_keys.get(index).map(|k| TokenSource::String(k.clone())),
			ImageTokenKind::Blob => self.blob_keys.get(index).map(|k| TokenSource::Blob(*k)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn repeated_requests_return_the_same_token() {
		let mut alloc = TokenAllocator::new();
		let a = alloc.method_token(MethodId(7));
		let b = alloc.method_token(MethodId(7));
		assert_eq!(a, b);
		assert_eq!(alloc.method_count(), 1);
	}

	#[test]
	fn kinds_partition_the_space() {
		let mut alloc = TokenAllocator::new();
		let t = alloc.type_token(TypeKey::Def(TypeId(0)));
		let m = alloc.method_token(MethodId(0));
		let f = alloc.field_token(FieldId(0));
		assert_eq!(t.index(), 0);
		assert_eq!(m.index(), 0);
		assert_eq!(f.index(), 0);
		assert_ne!(t.raw(), m.raw());
		assert_ne!(m.raw(), f.raw());
		assert_eq!(t.kind(), ImageTokenKind::Type);
		assert_eq!(m.kind(), ImageTokenKind::Method);
	}

	#[test]
	fn lookup_round_trips_every_kind() {
		let mut alloc = TokenAllocator::new();
		let t = alloc.type_token(TypeKey::Array(TypeId(3)));
		let s = alloc.string_token(Arc::from("hello"));
		let b = alloc.blob_token(FieldId(9));
		assert!(matches!(alloc.lookup(t), Some(TokenSource::Type(TypeKey::Array(TypeId(3))))));
		assert!(matches!(alloc.lookup(s), Some(TokenSource::String(ref v)) if &**v == "hello"));
		assert!(matches!(alloc.lookup(b), Some(TokenSource::Blob(FieldId(9)))));
		let stub = alloc.synthetic_method_token();
		assert!(matches!(alloc.lookup(stub), Some(TokenSource::SyntheticMethod)));
	}

	#[test]
	fn arrays_and_definitions_never_collide() {
		let mut alloc = TokenAllocator::new();
		let def = alloc.type_token(TypeKey::Def(TypeId(5)));
		let arr = alloc.type_token(TypeKey::Array(TypeId(5)));
		assert_ne!(def, arr);
	}
}
