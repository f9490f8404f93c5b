//! A hand-built platform library small enough to reason about: the carrier
//! types the pipeline treats specially, a few primitives, and helpers for
//! minting raw metadata tokens the way a front end would.
#![allow(dead_code)]

use cinder::program::{
	FieldAttributes, FieldId, FieldRec, MethodAttributes, MethodBody, MethodId, MethodRec,
	MethodSig, Primitive, Program, RawTarget, TypeAttributes, TypeId, TypeRec, TypeShape, TypeSig,
};

pub struct Fixture {
	pub program: Program,
	pub object: TypeId,
	pub value_type: TypeId,
	pub string: TypeId,
	pub exception: TypeId,
	pub array: TypeId,
	pub delegate: TypeId,
	pub int32: TypeId,
	pub uint8: TypeId,
	pub object_ctor: MethodId,
	pub object_equals: MethodId,
	pub string_cctor: MethodId,
	pub delegate_ctor_helper: MethodId,
	next_raw: u32,
}

pub fn ret_body() -> MethodBody {
	MethodBody { max_stack: 1, locals: vec![], code: vec![0x2A], handlers: vec![] }
}

pub fn body(max_stack: u16, code: Vec<u8>) -> MethodBody {
	MethodBody { max_stack, locals: vec![], code, handlers: vec![] }
}

impl Fixture {
	pub fn new() -> Self {
		let mut program = Program::new();

		let object = program.add_type(TypeRec::named("System", "Object"));
		let mut value_type_rec = TypeRec::named("System", "ValueType");
		value_type_rec.base = Some(object);
		let value_type = program.add_type(value_type_rec);

		let mut int32_rec = TypeRec::named("System", "Int32");
		int32_rec.base = Some(value_type);
		int32_rec.flags |= TypeAttributes::VALUE_TYPE | TypeAttributes::SEALED;
		int32_rec.shape = TypeShape::Primitive(Primitive::Int32);
		let int32 = program.add_type(int32_rec);

		let mut uint8_rec = TypeRec::named("System", "Byte");
		uint8_rec.base = Some(value_type);
		uint8_rec.flags |= TypeAttributes::VALUE_TYPE | TypeAttributes::SEALED;
		uint8_rec.shape = TypeShape::Primitive(Primitive::UInt8);
		let uint8 = program.add_type(uint8_rec);

		// The string carrier declares its character ahead of its length on
		// purpose; the layout engine must swap them back.
		let mut string_rec = TypeRec::named("System", "String");
		string_rec.base = Some(object);
		string_rec.flags |= TypeAttributes::SEALED;
		let string = program.add_type(string_rec);
		program.add_field(FieldRec::new(string, "m_firstChar", TypeSig::Char));
		program.add_field(FieldRec::new(string, "m_stringLength", TypeSig::Int32));
		let mut empty = FieldRec::new(string, "Empty", TypeSig::String);
		empty.flags |= FieldAttributes::STATIC | FieldAttributes::PUBLIC;
		program.add_field(empty);

		let mut exception_rec = TypeRec::named("System", "Exception");
		exception_rec.base = Some(object);
		let exception = program.add_type(exception_rec);
		program.add_field(FieldRec::new(exception, "_stackTrace", TypeSig::Object));
		program.add_field(FieldRec::new(exception, "_message", TypeSig::String));

		let mut array_rec = TypeRec::named("System", "Array");
		array_rec.base = Some(object);
		array_rec.flags |= TypeAttributes::ABSTRACT;
		let array = program.add_type(array_rec);

		let mut delegate_rec = TypeRec::named("System", "MulticastDelegate");
		delegate_rec.base = Some(object);
		delegate_rec.flags |= TypeAttributes::ABSTRACT;
		let delegate = program.add_type(delegate_rec);
		let target_field = program.add_field(FieldRec::new(delegate, "m_target", TypeSig::Object));
		let method_field =
			program.add_field(FieldRec::new(delegate, "m_functionPtr", TypeSig::IntPtr));

		let mut object_ctor = MethodRec::new(object, ".ctor", MethodSig::new(vec![], TypeSig::Void));
		object_ctor.flags |= MethodAttributes::PUBLIC
			| MethodAttributes::SPECIAL_NAME
			| MethodAttributes::RT_SPECIAL_NAME;
		object_ctor.body = Some(ret_body());
		let object_ctor = program.add_method(object_ctor);

		// Object equality returns false unless overridden; body is
		// `ldc.i4.0; ret`.
		let mut object_equals = MethodRec::new(
			object,
			"Equals",
			MethodSig::new(vec![TypeSig::Object], TypeSig::Boolean),
		);
		object_equals.flags |= MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL;
		object_equals.body = Some(body(1, vec![0x16, 0x2A]));
		let object_equals = program.add_method(object_equals);

		let mut string_cctor =
			MethodRec::new(string, ".cctor", MethodSig::new(vec![], TypeSig::Void));
		string_cctor.flags |= MethodAttributes::STATIC
			| MethodAttributes::SPECIAL_NAME
			| MethodAttributes::RT_SPECIAL_NAME;
		string_cctor.body = Some(ret_body());
		let string_cctor = program.add_method(string_cctor);

		// The canonical closed-static construction helper is a native hook.
		let mut helper = MethodRec::new(
			delegate,
			"CtorClosedStatic",
			MethodSig::new(vec![TypeSig::Object, TypeSig::Object, TypeSig::IntPtr], TypeSig::Void),
		);
		helper.flags |= MethodAttributes::STATIC;
		helper.native_selector = Some(17);
		let delegate_ctor_helper = program.add_method(helper);

		program.well_known.string = Some(string);
		program.well_known.exception = Some(exception);
		program.well_known.array = Some(array);
		program.well_known.multicast_delegate = Some(delegate);
		program.well_known.delegate_ctor_helper = Some(delegate_ctor_helper);
		program.well_known.delegate_target_field = Some(target_field);
		program.well_known.delegate_method_field = Some(method_field);

		Self {
			program,
			object,
			value_type,
			string,
			exception,
			array,
			delegate,
			int32,
			uint8,
			object_ctor,
			object_equals,
			string_cctor,
			delegate_ctor_helper,
			next_raw: 0x0600_0001,
		}
	}

	pub fn user_type(&mut self, name: &str) -> TypeId {
		let mut rec = TypeRec::named("User", name);
		rec.base = Some(self.object);
		self.program.add_type(rec)
	}

	pub fn static_method(
		&mut self,
		declaring: TypeId,
		name: &str,
		params: Vec<TypeSig>,
		ret: TypeSig,
		method_body: MethodBody,
	) -> MethodId {
		let mut rec = MethodRec::new(declaring, name, MethodSig::new(params, ret));
		rec.flags |= MethodAttributes::PUBLIC | MethodAttributes::STATIC;
		rec.body = Some(method_body);
		self.program.add_method(rec)
	}

	pub fn cctor(&mut self, declaring: TypeId, method_body: MethodBody) -> MethodId {
		let mut rec = MethodRec::new(declaring, ".cctor", MethodSig::new(vec![], TypeSig::Void));
		rec.flags |= MethodAttributes::STATIC
			| MethodAttributes::SPECIAL_NAME
			| MethodAttributes::RT_SPECIAL_NAME;
		rec.body = Some(method_body);
		self.program.add_method(rec)
	}

	fn mint(&mut self) -> u32 {
		let raw = self.next_raw;
		self.next_raw += 1;
		raw
	}

	pub fn raw_method(&mut self, method: MethodId) -> u32 {
		let raw = self.mint();
		self.program.map_raw(raw, RawTarget::Method(method));
		raw
	}

	pub fn raw_field(&mut self, field: FieldId) -> u32 {
		let raw = self.mint();
		self.program.map_raw(raw, RawTarget::Field(field));
		raw
	}

	pub fn raw_type(&mut self, ty: TypeId) -> u32 {
		let raw = self.mint();
		self.program.map_raw(raw, RawTarget::Type(ty));
		raw
	}

	pub fn raw_string(&mut self, value: &str) -> u32 {
		let raw = self.mint() | 0x7000_0000;
		self.program.map_raw_string(raw, value);
		raw
	}
}
