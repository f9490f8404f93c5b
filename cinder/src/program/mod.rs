//! Source-side program model: an arena of type, method and field records
//! keyed by plain integer ids, populated by whatever front end parses the
//! managed metadata tables. All cross-references are ids; nothing here owns a
//! back-reference.

mod signature;

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use nohash_hasher::BuildNoHashHasher;

pub use signature::{methods_match, MethodSig, TypeSig};

#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

#[repr(transparent)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl nohash_hasher::IsEnabled for TypeId {}
impl nohash_hasher::IsEnabled for MethodId {}
impl nohash_hasher::IsEnabled for FieldId {}

bitflags! {
	/// Source type attributes. The low bits mirror the metadata encoding;
	/// the high bits are synthesized by the front end from the base chain.
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct TypeAttributes: u32 {
		const PUBLIC = 0x0001;
		const INTERFACE = 0x0020;
		const ABSTRACT = 0x0080;
		const SEALED = 0x0100;
		const SPECIAL_NAME = 0x0400;
		const EXPLICIT_LAYOUT = 0x0010;

		const VALUE_TYPE = 0x0001_0000;
		const ENUM = 0x0002_0000;
	}
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MethodAttributes: u16 {
		const ACCESS_MASK = 0x0007;
		const PRIVATE = 0x0001;
		const PUBLIC = 0x0006;
		const STATIC = 0x0010;
		const FINAL = 0x0020;
		const VIRTUAL = 0x0040;
		const HIDE_BY_SIG = 0x0080;
		const NEW_SLOT = 0x0100;
		const ABSTRACT = 0x0400;
		const SPECIAL_NAME = 0x0800;
		const RT_SPECIAL_NAME = 0x1000;
	}
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct FieldAttributes: u16 {
		const PRIVATE = 0x0001;
		const PUBLIC = 0x0006;
		const STATIC = 0x0010;
		const INIT_ONLY = 0x0020;
		const LITERAL = 0x0040;
		const HAS_RVA = 0x0100;
	}
}

#[derive(Debug, Copy, Clone, Default)]
pub enum TypeShape {
	#[default]
	Class,
	Primitive(Primitive),
	/// Single-dimensional, zero-based array declared in the source metadata.
	Array { element: TypeId },
}

/// Built-in value kinds the runtime knows without a layout pass.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Primitive {
	Void,
	Boolean,
	Char,
	Int8,
	UInt8,
	Int16,
	UInt16,
	Int32,
	UInt32,
	Int64,
	UInt64,
	Float32,
	Float64,
	IntPtr,
	UIntPtr,
}

/// A generic type instantiation: the open definition plus its arguments.
#[derive(Debug, Clone)]
pub struct GenericInstance {
	pub definition: TypeId,
	pub args: Vec<TypeSig>,
}

/// One entry of a type's interface-to-implementation map. Explicit interface
/// implementations land here with names that differ from the declaration.
#[derive(Debug, Copy, Clone)]
pub struct InterfaceBinding {
	pub declaration: MethodId,
	pub implementation: MethodId,
}

#[derive(Debug, Clone)]
pub struct TypeRec {
	pub name: Arc<str>,
	pub namespace: Arc<str>,
	pub declaring: Option<TypeId>,
	pub base: Option<TypeId>,
	pub flags: TypeAttributes,
	pub shape: TypeShape,
	pub fields: Vec<FieldId>,
	pub methods: Vec<MethodId>,
	pub interfaces: Vec<TypeId>,
	pub interface_map: Vec<InterfaceBinding>,
	pub generic: Option<GenericInstance>,
	/// Declared layout size, when the metadata carries one.
	pub layout_size: Option<u32>,
	/// Types this type's initializer declares it depends on.
	pub init_dependencies: Vec<TypeId>,
}

impl TypeRec {
	pub fn named(namespace: &str, name: &str) -> Self {
		Self {
			name: Arc::from(name),
			namespace: Arc::from(namespace),
			declaring: None,
			base: None,
			flags: TypeAttributes::default(),
			shape: TypeShape::Class,
			fields: Vec::new(),
			methods: Vec::new(),
			interfaces: Vec::new(),
			interface_map: Vec::new(),
			generic: None,
			layout_size: None,
			init_dependencies: Vec::new(),
		}
	}

	pub fn is_interface(&self) -> bool {
		self.flags.contains(TypeAttributes::INTERFACE)
	}

	pub fn is_value_type(&self) -> bool {
		self.flags.contains(TypeAttributes::VALUE_TYPE)
	}

	pub fn is_enum(&self) -> bool {
		self.flags.contains(TypeAttributes::ENUM)
	}
}

/// One protected region of a method body.
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
	pub kind: HandlerKind,
	pub try_offset: u16,
	pub try_length: u16,
	pub handler_offset: u16,
	pub handler_length: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandlerKind {
	/// Catches the given exception type and everything derived from it.
	Catch(TypeId),
	/// Catches anything.
	CatchAll,
	Finally,
}

#[derive(Debug, Clone)]
pub struct MethodBody {
	pub max_stack: u16,
	pub locals: Vec<TypeSig>,
	pub code: Vec<u8>,
	pub handlers: Vec<ExceptionHandler>,
}

#[derive(Debug, Clone)]
pub struct MethodRec {
	pub declaring: TypeId,
	pub name: Arc<str>,
	pub signature: MethodSig,
	pub flags: MethodAttributes,
	pub body: Option<MethodBody>,
	/// Positive selector of a built-in device-side implementation. Methods
	/// carrying one upload no body.
	pub native_selector: Option<u32>,
	pub generic_params: u8,
	/// Complete argument context for resolving this body's generic
	/// references; populated by the front end for instantiated methods.
	pub generic_ctx: Option<GenericContext>,
}

impl MethodRec {
	pub fn new(declaring: TypeId, name: &str, signature: MethodSig) -> Self {
		Self {
			declaring,
			name: Arc::from(name),
			signature,
			flags: MethodAttributes::default(),
			body: None,
			native_selector: None,
			generic_params: 0,
			generic_ctx: None,
		}
	}

	pub fn is_static(&self) -> bool {
		self.flags.contains(MethodAttributes::STATIC)
	}

	pub fn is_virtual(&self) -> bool {
		self.flags.contains(MethodAttributes::VIRTUAL)
	}

	pub fn is_abstract(&self) -> bool {
		self.flags.contains(MethodAttributes::ABSTRACT)
	}

	pub fn is_private(&self) -> bool {
		self.flags & MethodAttributes::ACCESS_MASK == MethodAttributes::PRIVATE
	}

	pub fn is_ctor(&self) -> bool {
		self.flags.contains(MethodAttributes::RT_SPECIAL_NAME) && &*self.name == ".ctor"
	}

	pub fn is_cctor(&self) -> bool {
		self.flags.contains(MethodAttributes::RT_SPECIAL_NAME) && &*self.name == ".cctor"
	}

	pub fn is_operator(&self) -> bool {
		self.flags.contains(MethodAttributes::SPECIAL_NAME) && self.name.starts_with("op_")
	}

	pub fn returns_void(&self) -> bool {
		self.signature.ret.is_void()
	}
}

#[derive(Debug, Clone)]
pub struct FieldRec {
	pub declaring: TypeId,
	pub name: Arc<str>,
	pub ty: TypeSig,
	pub flags: FieldAttributes,
	/// Constant payload: enum literal bytes, or the mapped initializer data
	/// of a field with an RVA.
	pub constant: Option<Vec<u8>>,
}

impl FieldRec {
	pub fn new(declaring: TypeId, name: &str, ty: TypeSig) -> Self {
		Self {
			declaring,
			name: Arc::from(name),
			ty,
			flags: FieldAttributes::default(),
			constant: None,
		}
	}

	pub fn is_static(&self) -> bool {
		self.flags.contains(FieldAttributes::STATIC)
	}
}

/// Generic arguments in force while resolving one method body: the declaring
/// type's arguments plus the method's own.
#[derive(Debug, Clone, Default)]
pub struct GenericContext {
	pub type_args: Vec<TypeId>,
	pub method_args: Vec<TypeId>,
}

/// What a raw bytecode operand points at before image tokens exist.
#[derive(Debug, Copy, Clone)]
pub enum RawTarget {
	Type(TypeId),
	Method(MethodId),
	Field(FieldId),
	/// Generic parameter of the enclosing type; resolvable only in context.
	TypeParam(u32),
	/// Generic parameter of the enclosing method.
	MethodParam(u32),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SourceRef {
	Type(TypeId),
	Method(MethodId),
	Field(FieldId),
}

/// Ids of the platform types and members the pipeline treats specially.
/// Everything is optional; a program that never touches a feature never has
/// to provide its carrier.
#[derive(Debug, Clone, Default)]
pub struct WellKnown {
	/// The text-string carrier, which also owns the string-empty field.
	pub string: Option<TypeId>,
	pub exception: Option<TypeId>,
	pub array: Option<TypeId>,
	pub multicast_delegate: Option<TypeId>,
	/// Canonical closed-static construction helper on the delegate base.
	pub delegate_ctor_helper: Option<MethodId>,
	pub delegate_target_field: Option<FieldId>,
	pub delegate_method_field: Option<FieldId>,
	/// Open definition of the enumerable-of-T interface.
	pub enumerable_interface: Option<TypeId>,
	pub enumerable_get_enumerator: Option<MethodId>,
	/// Factory bound to every array type as its enumerator producer.
	pub array_enumerator_factory: Option<MethodId>,
	/// Open definition of the by-reference wrapper value type.
	pub byref_wrapper: Option<TypeId>,
	/// Open definition of the slice template.
	pub slice_template: Option<TypeId>,
	pub date_time: Option<TypeId>,
	pub time_span: Option<TypeId>,
}

#[derive(Debug, Default)]
pub struct Program {
	types: Vec<TypeRec>,
	methods: Vec<MethodRec>,
	fields: Vec<FieldRec>,
	raw_targets: HashMap<u32, RawTarget, BuildNoHashHasher<u32>>,
	raw_strings: HashMap<u32, Arc<str>, BuildNoHashHasher<u32>>,
	pub well_known: WellKnown,
}

impl Program {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_type(&mut self, rec: TypeRec) -> TypeId {
		let id = TypeId(self.types.len() as u32);
		self.types.push(rec);
		id
	}

	/// Adds a method and wires it into its declaring type's member list.
	pub fn add_method(&mut self, rec: MethodRec) -> MethodId {
		let id = MethodId(self.methods.len() as u32);
		self.types[rec.declaring.0 as usize].methods.push(id);
		self.methods.push(rec);
		id
	}

	pub fn add_field(&mut self, rec: FieldRec) -> FieldId {
		let id = FieldId(self.fields.len() as u32);
		self.types[rec.declaring.0 as usize].fields.push(id);
		self.fields.push(rec);
		id
	}

	/// Registers what a raw metadata token stands for.
	pub fn map_raw(&mut self, raw: u32, target: RawTarget) {
		self.raw_targets.insert(raw, target);
	}

	/// Registers the literal behind a raw user-string token.
	pub fn map_raw_string(&mut self, raw: u32, value: &str) {
		self.raw_strings.insert(raw, Arc::from(value));
	}

	pub fn ty(&self, id: TypeId) -> &TypeRec {
		&self.types[id.0 as usize]
	}

	pub fn ty_mut(&mut self, id: TypeId) -> &mut TypeRec {
		&mut self.types[id.0 as usize]
	}

	pub fn method_mut(&mut self, id: MethodId) -> &mut MethodRec {
		&mut self.methods[id.0 as usize]
	}

	pub fn field_mut(&mut self, id: FieldId) -> &mut FieldRec {
		&mut self.fields[id.0 as usize]
	}

	pub fn method(&self, id: MethodId) -> &MethodRec {
		&self.methods[id.0 as usize]
	}

	pub fn field(&self, id: FieldId) -> &FieldRec {
		&self.fields[id.0 as usize]
	}

	pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeRec)> {
		self.types.iter().enumerate().map(|(i, t)| (TypeId(i as u32), t))
	}

	pub fn methods_of(&self, id: TypeId) -> impl Iterator<Item = (MethodId, &MethodRec)> + '_ {
		self.ty(id).methods.iter().map(|m| (*m, self.method(*m)))
	}

	/// Resolves a raw bytecode operand under a generic context. Returns
	/// `None` when the value is not a token at all, or names a generic
	/// parameter the context cannot satisfy; linear bytecode scanning is
	/// allowed to over-read, so both cases are tolerated.
	pub fn resolve(&self, raw: u32, ctx: &GenericContext) -> Option<SourceRef> {
		match self.raw_targets.get(&raw)? {
			RawTarget::Type(id) => Some(SourceRef::Type(*id)),
			RawTarget::Method(id) => Some(SourceRef::Method(*id)),
			RawTarget::Field(id) => Some(SourceRef::Field(*id)),
			RawTarget::TypeParam(i) => ctx.type_args.get(*i as usize).copied().map(SourceRef::Type),
			RawTarget::MethodParam(i) => ctx.method_args.get(*i as usize).copied().map(SourceRef::Type),
		}
	}

	pub fn string_literal(&self, raw: u32) -> Option<&Arc<str>> {
		self.raw_strings.get(&raw)
	}

	/// `Namespace.Name`, nested types joined with `/`.
	pub fn full_name(&self, id: TypeId) -> String {
		let rec = self.ty(id);
		match rec.declaring {
			Some(outer) => format!("{}/{}", self.full_name(outer), rec.name),
			None if rec.namespace.is_empty() => rec.name.to_string(),
			None => format!("{}.{}", rec.namespace, rec.name),
		}
	}

	pub fn method_display(&self, id: MethodId) -> String {
		let rec = self.method(id);
		format!("{}::{}", self.full_name(rec.declaring), rec.name)
	}

	pub fn field_display(&self, id: FieldId) -> String {
		let rec = self.field(id);
		format!("{}::{}", self.full_name(rec.declaring), rec.name)
	}

	/// All source types with the given full name. More than one hit is
	/// normal: a handful of internal platform types are duplicated across
	/// the system assemblies.
	pub fn types_named<'l>(&'l self, full: &'l str) -> impl Iterator<Item = TypeId> + 'l {
		self.types().filter(move |(id, _)| self.full_name(*id) == full).map(|(id, _)| id)
	}

	/// Base chain of `id`, starting at its immediate base.
	pub fn base_chain(&self, id: TypeId) -> impl Iterator<Item = TypeId> + '_ {
		let mut current = self.ty(id).base;
		std::iter::from_fn(move || {
			let next = current?;
			current = self.ty(next).base;
			Some(next)
		})
	}

	pub fn is_subclass_of(&self, id: TypeId, base: TypeId) -> bool {
		self.base_chain(id).any(|t| t == base)
	}

	pub fn is_delegate(&self, id: TypeId) -> bool {
		match self.well_known.multicast_delegate {
			Some(base) => id == base || self.is_subclass_of(id, base),
			None => false,
		}
	}

	pub fn has_static_fields(&self, id: TypeId) -> bool {
		self.ty(id).fields.iter().any(|f| self.field(*f).is_static())
	}

	pub fn type_initializer(&self, id: TypeId) -> Option<MethodId> {
		self.ty(id).methods.iter().copied().find(|m| self.method(*m).is_cctor())
	}

	/// Generic context a method body resolves under.
	pub fn context_of(&self, id: MethodId) -> GenericContext {
		self.method(id).generic_ctx.clone().unwrap_or_default()
	}
}
