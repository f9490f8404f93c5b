//! Classification of every field, local and argument into the small closed
//! kind set the execution engine understands, and the instance/static size
//! arithmetic built on top of it. The device recomputes nothing; whatever is
//! decided here is what gets flashed.

use crate::program::{FieldId, Primitive, Program, TypeId, TypeShape, TypeSig};
use crate::utilities::round_to_multiple_of;

/// Pointer width of the target. The engine runs 32-bit cores only.
pub const POINTER_SIZE: u32 = 4;

/// The closed set of slot kinds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum SlotKind {
	UInt32 = 0,
	Int32 = 1,
	UInt64 = 2,
	Int64 = 3,
	Float32 = 4,
	Float64 = 5,
	Boolean = 6,
	/// Reference to a heap object.
	Object = 7,
	/// Reference to a variable: a managed pointer.
	ByRef = 8,
	ValueArray = 9,
	RefArray = 10,
	/// The by-reference wrapper value type, carried as a reference.
	Reference = 11,
	FnPointer = 12,
	/// A value type too large to fold into a scalar slot.
	LargeValue = 13,
	/// A virtual-dispatch member entry; never a storage slot.
	MethodSlot = 14,
}

/// A classified slot: kind plus explicit storage size in bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Slot {
	pub kind: SlotKind,
	pub size: u16,
}

impl Slot {
	pub const fn new(kind: SlotKind, size: u16) -> Self {
		Self { kind, size }
	}

	pub const fn is_reference(&self) -> bool {
		matches!(self.kind, SlotKind::Object | SlotKind::RefArray | SlotKind::ValueArray)
	}
}

pub struct LayoutEngine<'l> {
	program: &'l Program,
}

impl<'l> LayoutEngine<'l> {
	pub fn new(program: &'l Program) -> Self {
		Self { program }
	}

	/// Storage slot of a signature. Signed integers widen to signed-32 on
	/// the evaluation stack but keep their declared width here; open generic
	/// slots never survive to the device and classify as object width.
	pub fn classify(&self, sig: &TypeSig) -> Slot {
		match sig {
			TypeSig::Void => Slot::new(SlotKind::UInt32, 0),
			TypeSig::Boolean => Slot::new(SlotKind::Boolean, 1),
			TypeSig::Char => Slot::new(SlotKind::UInt32, 2),
			TypeSig::Int8 => Slot::new(SlotKind::Int32, 1),
			TypeSig::UInt8 => Slot::new(SlotKind::UInt32, 1),
			TypeSig::Int16 => Slot::new(SlotKind::Int32, 2),
			TypeSig::UInt16 => Slot::new(SlotKind::UInt32, 2),
			TypeSig::Int32 => Slot::new(SlotKind::Int32, 4),
			TypeSig::UInt32 => Slot::new(SlotKind::UInt32, 4),
			TypeSig::Int64 => Slot::new(SlotKind::Int64, 8),
			TypeSig::UInt64 => Slot::new(SlotKind::UInt64, 8),
			TypeSig::Float32 => Slot::new(SlotKind::Float32, 4),
			TypeSig::Float64 => Slot::new(SlotKind::Float64, 8),
			TypeSig::IntPtr => Slot::new(SlotKind::Int32, POINTER_SIZE as u16),
			TypeSig::UIntPtr => Slot::new(SlotKind::UInt32, POINTER_SIZE as u16),
			TypeSig::String | TypeSig::Object => Slot::new(SlotKind::Object, POINTER_SIZE as u16),
			TypeSig::ByRef(_) | TypeSig::Pointer(_) => Slot::new(SlotKind::ByRef, POINTER_SIZE as u16),
			TypeSig::FnPointer => Slot::new(SlotKind::FnPointer, POINTER_SIZE as u16),
			TypeSig::SzArray(element) => {
				let slot = self.classify(element);
				match slot.is_reference() {
					true => Slot::new(SlotKind::RefArray, POINTER_SIZE as u16),
					false => Slot::new(SlotKind::ValueArray, slot.size),
				}
			}
			TypeSig::Class(id) | TypeSig::Value(id) => self.classify_type(*id),
			TypeSig::TypeParam(_) | TypeSig::MethodParam(_) => {
				Slot::new(SlotKind::Object, POINTER_SIZE as u16)
			}
		}
	}

	fn classify_type(&self, id: TypeId) -> Slot {
		let rec = self.program.ty(id);
		if let TypeShape::Primitive(p) = rec.shape {
			return self.classify(&primitive_sig(p));
		}
		if let TypeShape::Array { element } = rec.shape {
			return self.classify(&TypeSig::array_of(class_or_value(self.program, element)));
		}
		if !rec.is_value_type() {
			return Slot::new(SlotKind::Object, POINTER_SIZE as u16);
		}
		if rec.is_enum() {
			return Slot::new(SlotKind::UInt32, 4);
		}

		let wk = &self.program.well_known;
		if Some(id) == wk.date_time || Some(id) == wk.time_span {
			return Slot::new(SlotKind::UInt64, 8);
		}
		if let Some(generic) = &rec.generic {
			if Some(generic.definition) == wk.byref_wrapper {
				return Slot::new(SlotKind::Reference, POINTER_SIZE as u16);
			}
			if Some(generic.definition) == wk.slice_template {
				return Slot::new(SlotKind::LargeValue, (POINTER_SIZE + 4) as u16);
			}
		}

		self.fold_value_type(id)
	}

	/// The scalar-folding rule for plain value types: small ones travel as
	/// integers, everything else as an opaque large value.
	fn fold_value_type(&self, id: TypeId) -> Slot {
		let rec = self.program.ty(id);
		let instance_fields: Vec<Slot> = rec
			.fields
			.iter()
			.filter(|f| !self.program.field(**f).is_static())
			.map(|f| self.classify(&self.program.field(*f).ty))
			.collect();

		let align = self.value_type_alignment(&instance_fields);
		let mut total: u32 = 0;
		for slot in &instance_fields {
			total = next_aligned(total, align) + slot.size as u32;
		}
		if let Some(declared) = rec.layout_size {
			total = total.max(declared).max(4);
		}

		match total {
			0..=4 => Slot::new(SlotKind::UInt32, 4),
			5..=8 => Slot::new(SlotKind::UInt64, 8),
			_ => Slot::new(SlotKind::LargeValue, round_to_multiple_of::<4>(total) as u16),
		}
	}

	/// Minimum field alignment inside a value type: 1 unless the type holds
	/// a reference field or more than one instance field.
	fn value_type_alignment(&self, instance_fields: &[Slot]) -> u32 {
		let has_reference = instance_fields.iter().any(|s| s.is_reference());
		match has_reference || instance_fields.len() > 1 {
			true => 4,
			false => 1,
		}
	}

	/// Contribution of one field to a class layout: small slots round to the
	/// pointer width, wide ones align to 8.
	fn class_field_contribution(&self, slot: Slot) -> u32 {
		match slot.size as u32 {
			0..=4 => 4,
			size => next_aligned(size, 8),
		}
	}

	/// Instance size: the type's own field contributions on top of its
	/// base's instance size. Value types report their folded storage size.
	pub fn instance_size(&self, id: TypeId) -> u32 {
		let rec = self.program.ty(id);
		if rec.is_value_type() {
			return self.classify_type(id).size as u32;
		}
		if let TypeShape::Array { element } = rec.shape {
			return self.classify(&class_or_value(self.program, element)).size as u32;
		}
		let own: u32 = rec
			.fields
			.iter()
			.filter(|f| !self.program.field(**f).is_static())
			.map(|f| self.class_field_contribution(self.classify(&self.program.field(*f).ty)))
			.sum();
		let base = rec.base.map(|b| self.instance_size(b)).unwrap_or(0);
		base + own
	}

	/// Static size is never inherited.
	pub fn static_size(&self, id: TypeId) -> u32 {
		self.program
			.ty(id)
			.fields
			.iter()
			.filter(|f| self.program.field(**f).is_static())
			.map(|f| self.class_field_contribution(self.classify(&self.program.field(*f).ty)))
			.sum()
	}

	/// Instance size of an array type synthesized for `element`: the element
	/// storage width, which is what the device sizes allocations by.
	pub fn array_instance_size(&self, element: TypeId) -> u32 {
		self.classify(&class_or_value(self.program, element)).size as u32
	}

	/// Declaration order with the two hard-coded carrier contracts applied:
	/// the string carrier stores its length ahead of the first character,
	/// and the exception carrier stores its message at slot zero.
	pub fn field_order(&self, id: TypeId) -> Vec<FieldId> {
		let rec = self.program.ty(id);
		let mut order: Vec<FieldId> = rec.fields.clone();
		let wk = &self.program.well_known;

		if Some(id) == wk.string {
			let length = order.iter().position(|f| self.program.field(*f).ty == TypeSig::Int32);
			let first_char = order.iter().position(|f| self.program.field(*f).ty == TypeSig::Char);
			if let (Some(length), Some(first_char)) = (length, first_char) {
				if length > first_char {
					order.swap(length, first_char);
				}
			}
		}
		if Some(id) == wk.exception {
			let message = order.iter().position(|f| {
				let field = self.program.field(*f);
				!field.is_static() && field.ty == TypeSig::String
			});
			if let Some(message) = message {
				let field = order.remove(message);
				order.insert(0, field);
			}
		}
		order
	}
}

const fn next_aligned(offset: u32, align: u32) -> u32 {
	((offset + (align - 1)) / align) * align
}

fn primitive_sig(p: Primitive) -> TypeSig {
	match p {
		Primitive::Void => TypeSig::Void,
		Primitive::Boolean => TypeSig::Boolean,
		Primitive::Char => TypeSig::Char,
		Primitive::Int8 => TypeSig::Int8,
		Primitive::UInt8 => TypeSig::UInt8,
		Primitive::Int16 => TypeSig::Int16,
		Primitive::UInt16 => TypeSig::UInt16,
		Primitive::Int32 => TypeSig::Int32,
		Primitive::UInt32 => TypeSig::UInt32,
		Primitive::Int64 => TypeSig::Int64,
		Primitive::UInt64 => TypeSig::UInt64,
		Primitive::Float32 => TypeSig::Float32,
		Primitive::Float64 => TypeSig::Float64,
		Primitive::IntPtr => TypeSig::IntPtr,
		Primitive::UIntPtr => TypeSig::UIntPtr,
	}
}

pub(crate) fn class_or_value(program: &Program, id: TypeId) -> TypeSig {
	match program.ty(id).is_value_type() {
		true => TypeSig::Value(id),
		false => TypeSig::Class(id),
	}
}
