//! The execution set: everything the image will contain, keyed by token.
//! Mutated only during compile; after finalization the upload driver reads
//! it and nothing writes it again.

use std::fmt::Formatter;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;
use derivative::Derivative;
use fxhash::{FxHashSet, FxHasher};
use tracing::info;

use crate::dispatch;
use crate::errors::CompileError;
use crate::il;
use crate::layout::{LayoutEngine, Slot, SlotKind, POINTER_SIZE};
use crate::program::{FieldId, MethodId, Program, TypeId, TypeShape};
use crate::replacement::ReplacementRegistry;
use crate::sequencer::{self, SequencerOverrides};
use crate::settings::CompileSettings;
use crate::synth;
use crate::tokens::{ImageToken, ImageTokenKind, TokenAllocator, TypeKey};

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ImageTypeFlags: u8 {
		const VALUE_TYPE = 0x01;
		const ENUM = 0x02;
		const ARRAY = 0x04;
		const INTERFACE = 0x08;
	}
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ImageMethodFlags: u16 {
		const STATIC = 0x01;
		const VIRTUAL = 0x02;
		const ABSTRACT = 0x04;
		const CONSTRUCTOR = 0x08;
		const VOID_RETURN = 0x10;
		const SYNTHESIZED = 0x20;
	}
}

/// One entry of a type's ordered member list: fields first in layout order,
/// then constructors, then the methods that need a vtable slot.
#[derive(Debug, Clone)]
pub struct Member {
	pub token: ImageToken,
	pub slot: Slot,
	/// Tokens of the base/interface methods this member overrides.
	pub base_tokens: Vec<ImageToken>,
}

#[derive(Debug, Clone)]
pub struct TypeEntry {
	pub key: TypeKey,
	pub token: ImageToken,
	pub parent: Option<ImageToken>,
	pub instance_size: u32,
	pub static_size: u32,
	pub flags: ImageTypeFlags,
	pub members: Vec<Member>,
	pub interfaces: Vec<ImageToken>,
}

#[derive(Debug, Clone, Default)]
pub struct MethodRefs {
	pub methods: Vec<MethodId>,
	pub fields: Vec<FieldId>,
	pub types: Vec<TypeId>,
}

/// One rewritten exception-handling clause: the catch type already carries
/// its image token.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
	/// Token of the caught type; `None` for catch-all and finally.
	pub class_token: Option<ImageToken>,
	pub is_finally: bool,
	pub try_offset: u16,
	pub try_length: u16,
	pub handler_offset: u16,
	pub handler_length: u16,
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct MethodEntry {
	/// `None` for the startup stub, which has no source record.
	pub source: Option<MethodId>,
	pub token: ImageToken,
	pub flags: ImageMethodFlags,
	pub max_stack: u16,
	/// Zero means no native hook.
	pub native_selector: u32,
	pub arg_slots: Vec<Slot>,
	pub local_slots: Vec<Slot>,
	#[derivative(Debug(format_with = "debug_method_code"))]
	pub code: Vec<u8>,
	pub handlers: Vec<HandlerEntry>,
	pub refs: MethodRefs,
}

impl MethodEntry {
	pub fn has_body(&self) -> bool {
		!self.code.is_empty()
	}
}

#[derive(Debug, Clone)]
pub struct FieldEntry {
	pub source: FieldId,
	pub token: ImageToken,
	pub slot: Slot,
	pub is_static: bool,
	/// Token of the constant blob registered for this field, if any.
	pub constant: Option<ImageToken>,
}

#[derive(Debug, Clone)]
pub struct StringEntry {
	pub token: ImageToken,
	pub value: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct BlobEntry {
	pub token: ImageToken,
	/// The field whose initializer this payload is.
	pub field: ImageToken,
	pub bytes: Vec<u8>,
}

/// The boundary between a frozen kernel prefix and the user program:
/// allocation is monotonic, so per-kind counts pin down exactly which tokens
/// existed when the kernel was captured.
#[derive(Debug, Clone)]
pub struct Snapshot {
	type_count: usize,
	field_count: usize,
	method_count: usize,
	string_count: usize,
	blob_count: usize,
	pub special_types: Vec<ImageToken>,
	pub content_hash: u64,
}

impl Snapshot {
	pub fn contains(&self, token: ImageToken) -> bool {
		let count = match token.kind() {
			ImageTokenKind::Type => self.type_count,
			ImageTokenKind::Field => self.field_count,
			ImageTokenKind::Method => self.method_count,
			ImageTokenKind::String => self.string_count,
			ImageTokenKind::Blob => self.blob_count,
		};
		token.index() < count
	}
}

const DEFAULT_SUPPRESSIONS: &[&str] = &[
	"System.AppDomain",
	"System.Reflection.Emit.ILGenerator",
	"System.Runtime.Remoting.RemotingServices",
	"System.Runtime.Serialization.FormatterServices",
];

#[derive(Debug, Clone)]
pub struct ExecutionSet {
	pub(crate) tokens: TokenAllocator,
	pub types: Vec<TypeEntry>,
	pub methods: Vec<MethodEntry>,
	pub fields: Vec<FieldEntry>,
	pub strings: Vec<StringEntry>,
	pub blobs: Vec<BlobEntry>,
	/// Token of the synthesized startup stub; the image entry.
	pub entry: Option<ImageToken>,
	/// Token of the user's entry method.
	pub user_entry: Option<ImageToken>,
	/// Initializer call order baked into the startup stub.
	pub init_sequence: Vec<ImageToken>,
	/// Type tokens the device recognizes by position.
	pub special_types: Vec<ImageToken>,
	pub settings: CompileSettings,
	pub(crate) user_entry_method: Option<MethodId>,
	pub(crate) initializers: Vec<MethodId>,
	suppressed: FxHashSet<String>,
	kernel: Option<Snapshot>,
	finalized: bool,
}

impl ExecutionSet {
	pub fn new(settings: CompileSettings) -> Self {
		let mut suppressed: FxHashSet<String> =
			DEFAULT_SUPPRESSIONS.iter().map(|s| s.to_string()).collect();
		suppressed.extend(settings.additional_suppressions.iter().cloned());
		Self {
			tokens: TokenAllocator::new(),
			types: Vec::new(),
			methods: Vec::new(),
			fields: Vec::new(),
			strings: Vec::new(),
			blobs: Vec::new(),
			entry: None,
			user_entry: None,
			init_sequence: Vec::new(),
			special_types: Vec::new(),
			settings,
			user_entry_method: None,
			initializers: Vec::new(),
			suppressed,
			kernel: None,
			finalized: false,
		}
	}

	pub fn is_suppressed(&self, program: &Program, ty: TypeId) -> bool {
		self.suppressed.contains(&program.full_name(ty))
	}

	/// Folds a fully-replaced type onto its substitute; the original never
	/// appears in the image. A partial substitute keeps its own identity
	/// here on purpose: both sides of a partial pair are processed during
	/// the compile and collapse only at finalization, by assigned token.
	pub(crate) fn canonical_type_key(registry: &ReplacementRegistry, key: TypeKey) -> TypeKey {
		let fold = |id: TypeId| registry.replacement_of_type(id).unwrap_or(id);
		match key {
			TypeKey::Def(id) => TypeKey::Def(fold(id)),
			TypeKey::Array(element) => TypeKey::Array(fold(element)),
		}
	}

	/// Admits a type, allocating its token and a skeleton entry on first
	/// sight. Sizes, members and interfaces are filled in at finalization.
	pub(crate) fn declare_type(
		&mut self,
		program: &Program,
		registry: &ReplacementRegistry,
		key: TypeKey,
	) -> ImageToken {
		let key = Self::canonical_type_key(registry, key);
		if let Some(token) = self.tokens.peek_type(&key) {
			return token;
		}
		let token = self.tokens.type_token(key);
		let flags = match key {
			TypeKey::Array(_) => ImageTypeFlags::ARRAY,
			TypeKey::Def(id) => {
				let rec = program.ty(id);
				let mut flags = ImageTypeFlags::default();
				flags.set(ImageTypeFlags::VALUE_TYPE, rec.is_value_type());
				flags.set(ImageTypeFlags::ENUM, rec.is_enum());
				flags.set(ImageTypeFlags::INTERFACE, rec.is_interface());
				if matches!(rec.shape, TypeShape::Array { .. }) {
					flags |= ImageTypeFlags::ARRAY;
				}
				flags
			}
		};
		self.types.push(TypeEntry {
			key,
			token,
			parent: None,
			instance_size: 0,
			static_size: 0,
			flags,
			members: Vec::new(),
			interfaces: Vec::new(),
		});
		token
	}

	/// Admits a method as a declaration. The caller has already applied
	/// replacement; the body arrives later through `fill_method_body`.
	pub(crate) fn declare_method(
		&mut self,
		program: &Program,
		registry: &ReplacementRegistry,
		method: MethodId,
	) -> ImageToken {
		if let Some(token) = self.tokens.peek_method(&method) {
			return token;
		}
		let token = self.tokens.method_token(method);
		let rec = program.method(method);
		let layout = LayoutEngine::new(program);

		let mut flags = ImageMethodFlags::default();
		flags.set(ImageMethodFlags::STATIC, rec.is_static());
		flags.set(ImageMethodFlags::VIRTUAL, rec.is_virtual());
		flags.set(ImageMethodFlags::ABSTRACT, rec.is_abstract());
		flags.set(ImageMethodFlags::CONSTRUCTOR, rec.is_ctor() || rec.is_cctor());
		flags.set(ImageMethodFlags::VOID_RETURN, rec.returns_void());

		let mut arg_slots = Vec::with_capacity(rec.signature.params.len() + 1);
		if !rec.is_static() {
			let declaring = program.ty(rec.declaring);
			arg_slots.push(match declaring.is_value_type() {
				true => Slot::new(SlotKind::ByRef, POINTER_SIZE as u16),
				false => Slot::new(SlotKind::Object, POINTER_SIZE as u16),
			});
		}
		arg_slots.extend(rec.signature.params.iter().map(|p| layout.classify(p)));

		let local_slots = match &rec.body {
			Some(body) => body.locals.iter().map(|l| layout.classify(l)).collect(),
			None => Vec::new(),
		};

		self.methods.push(MethodEntry {
			source: Some(method),
			token,
			flags,
			max_stack: rec.body.as_ref().map(|b| b.max_stack).unwrap_or(8),
			native_selector: registry
				.native_selector(method)
				.or(rec.native_selector)
				.unwrap_or(0),
			arg_slots,
			local_slots,
			code: Vec::new(),
			handlers: Vec::new(),
			refs: MethodRefs::default(),
		});
		token
	}

	pub(crate) fn declare_field(&mut self, program: &Program, field: FieldId) -> ImageToken {
		if let Some(token) = self.tokens.peek_field(&field) {
			return token;
		}
		let token = self.tokens.field_token(field);
		let rec = program.field(field);
		let layout = LayoutEngine::new(program);
		self.fields.push(FieldEntry {
			source: field,
			token,
			slot: layout.classify(&rec.ty),
			is_static: rec.is_static(),
			constant: None,
		});
		token
	}

	pub(crate) fn intern_string(&mut self, value: &Arc<str>) -> ImageToken {
		if let Some(token) = self.tokens.peek_string(value) {
			return token;
		}
		let token = self.tokens.string_token(value.clone());
		self.strings.push(StringEntry { token, value: value.clone() });
		token
	}

	/// Registers `bytes` as the constant data backing `field`. The field
	/// entry must already exist; it gets linked to the blob token.
	pub(crate) fn register_blob(&mut self, field: FieldId, field_token: ImageToken, bytes: Vec<u8>) -> ImageToken {
		if let Some(token) = self.tokens.peek_blob(&field) {
			return token;
		}
		let token = self.tokens.blob_token(field);
		self.blobs.push(BlobEntry { token, field: field_token, bytes });
		self.fields[field_token.index()].constant = Some(token);
		token
	}

	pub(crate) fn fill_method_body(
		&mut self,
		token: ImageToken,
		code: Vec<u8>,
		refs: MethodRefs,
		handlers: Vec<HandlerEntry>,
	) {
		let entry = &mut self.methods[token.index()];
		entry.code = code;
		entry.refs = refs;
		entry.handlers = handlers;
	}

	pub fn method_entry(&self, token: ImageToken) -> &MethodEntry {
		&self.methods[token.index()]
	}

	pub(crate) fn method_entry_mut(&mut self, token: ImageToken) -> &mut MethodEntry {
		&mut self.methods[token.index()]
	}

	pub fn contains_method(&self, method: MethodId) -> bool {
		self.tokens.peek_method(&method).is_some()
	}

	pub fn contains_type(&self, key: TypeKey) -> bool {
		self.tokens.peek_type(&key).is_some()
	}

	pub fn method_token_of(&self, method: MethodId) -> Option<ImageToken> {
		self.tokens.peek_method(&method)
	}

	pub fn type_token_of(&self, key: TypeKey) -> Option<ImageToken> {
		self.tokens.peek_type(&key)
	}

	pub fn field_token_of(&self, field: FieldId) -> Option<ImageToken> {
		self.tokens.peek_field(&field)
	}

	pub fn lookup(&self, token: ImageToken) -> Option<crate::tokens::TokenSource> {
		self.tokens.lookup(token)
	}

	pub(crate) fn push_initializer(&mut self, method: MethodId) {
		if !self.initializers.contains(&method) {
			self.initializers.push(method);
		}
	}

	/// Runs the post-walk passes in their required order and freezes the
	/// set: dispatch resolution and member lists, initializer sequencing,
	/// partial-replacement de-duplication, startup-stub synthesis, and the
	/// device-memory estimate.
	#[tracing::instrument(skip_all)]
	pub fn finalize(
		&mut self,
		program: &Program,
		registry: &ReplacementRegistry,
		overrides: &SequencerOverrides,
	) -> Result<(), CompileError> {
		assert!(!self.finalized, "execution set already finalized");

		// A body-less concrete method that something actually invokes made
		// it in through an operand patch; its caller would fault on the
		// device, so it is fatal here. Delegate members are generated.
		for entry in &self.methods {
			if entry.has_body()
				|| entry.native_selector > 0
				|| entry.flags.contains(ImageMethodFlags::ABSTRACT)
			{
				continue;
			}
			let Some(source) = entry.source else { continue };
			if program.is_delegate(program.method(source).declaring) {
				continue;
			}
			return Err(CompileError::MissingImplementation(program.method_display(source)));
		}

		self.build_type_entries(program, registry);
		self.build_member_lists(program, registry);

		let ordered = sequencer::order_initializers(program, self, overrides);
		self.init_sequence = ordered
			.iter()
			.filter_map(|m| self.tokens.peek_method(m))
			.collect();

		self.merge_partial_duplicates(registry);
		self.collect_special_types(program, registry);

		let stub = synth::emit_startup_stub(program, self)?;
		self.entry = Some(stub);
		self.user_entry = self.user_entry_method.and_then(|m| self.tokens.peek_method(&m));

		self.finalized = true;
		info!(
			types = self.types.len(),
			methods = self.methods.len(),
			estimated_bytes = self.estimate_device_memory(),
			"execution set finalized"
		);
		Ok(())
	}

	/// Parent links, sizes and flags for every admitted type. Declaring a
	/// parent or interface mid-pass appends an entry; the loop keeps going
	/// until those are filled in too.
	fn build_type_entries(&mut self, program: &Program, registry: &ReplacementRegistry) {
		let layout = LayoutEngine::new(program);
		let has_arrays = self.types.iter().any(|e| matches!(e.key, TypeKey::Array(_)));
		let array_parent = program
			.well_known
			.array
			.filter(|_| has_arrays)
			.map(|a| self.declare_type(program, registry, TypeKey::Def(a)));
		let array_interface = program
			.well_known
			.enumerable_interface
			.filter(|_| has_arrays)
			.map(|i| self.declare_type(program, registry, TypeKey::Def(i)));

		let mut i = 0;
		while i < self.types.len() {
			let key = self.types[i].key;
			match key {
				TypeKey::Array(element) => {
					let entry = &mut self.types[i];
					entry.instance_size = layout.array_instance_size(element);
					entry.parent = array_parent;
					entry.interfaces = array_interface.into_iter().collect();
				}
				TypeKey::Def(id) => {
					let parent = program.ty(id).base.map(|b| {
						self.declare_type(program, registry, TypeKey::Def(b))
					});
					let unsuppressed: Vec<TypeId> = program
						.ty(id)
						.interfaces
						.iter()
						.copied()
						.filter(|i| !self.is_suppressed(program, *i))
						.collect();
					let interfaces = unsuppressed
						.into_iter()
						.map(|i| self.declare_type(program, registry, TypeKey::Def(i)))
						.collect();
					let entry = &mut self.types[i];
					entry.parent = parent;
					entry.instance_size = layout.instance_size(id);
					entry.static_size = layout.static_size(id);
					entry.interfaces = interfaces;
				}
			}
			i += 1;
		}
	}

	/// Fields first in stabilized order, then constructors, then the
	/// methods that need a vtable slot. A partial substitute still has its
	/// own entry at this point and collects its own members; the merge pass
	/// folds them onto the original afterwards.
	fn build_member_lists(&mut self, program: &Program, registry: &ReplacementRegistry) {
		for entry in &mut self.types {
			entry.members.clear();
		}

		let canonical_token = |set: &Self, id: TypeId| {
			let key = Self::canonical_type_key(registry, TypeKey::Def(id));
			set.tokens.peek_type(&key)
		};

		// Fields, in each type's stabilized order.
		let layout = LayoutEngine::new(program);
		let field_entries: Vec<(FieldId, ImageToken, Slot)> =
			self.fields.iter().map(|f| (f.source, f.token, f.slot)).collect();
		for i in 0..self.types.len() {
			let TypeKey::Def(id) = self.types[i].key else { continue };
			for field in layout.field_order(id) {
				if let Some(pos) = field_entries.iter().position(|(src, ..)| *src == field) {
					let (_, token, slot) = field_entries[pos];
					self.types[i].members.push(Member { token, slot, base_tokens: Vec::new() });
				}
			}
		}

		// Constructors and vtable methods.
		let method_info: Vec<(Option<MethodId>, ImageToken)> =
			self.methods.iter().map(|m| (m.source, m.token)).collect();
		for (source, token) in method_info {
			let Some(method) = source else { continue };
			let rec = program.method(method);
			let Some(target) = canonical_token(self, rec.declaring) else { continue };

			if rec.is_ctor() || rec.is_cctor() {
				self.types[target.index()].members.push(Member {
					token,
					slot: Slot::new(SlotKind::MethodSlot, 0),
					base_tokens: Vec::new(),
				});
				continue;
			}
			if rec.is_static() || rec.is_abstract() {
				continue;
			}
			let overridden = dispatch::overrides_of(program, self, rec.declaring, method);
			let base_tokens: Vec<ImageToken> = overridden
				.iter()
				.filter_map(|m| self.tokens.peek_method(m))
				.collect();
			if !base_tokens.is_empty() {
				self.types[target.index()].members.push(Member {
					token,
					slot: Slot::new(SlotKind::MethodSlot, 0),
					base_tokens,
				});
			}
		}

		// Every array type dispatches enumeration through the injected
		// factory, bound to the interface's producer by token.
		let wk = &program.well_known;
		if let Some(factory) = wk.array_enumerator_factory {
			if let Some(factory_token) = self.tokens.peek_method(&factory) {
				let base_tokens: Vec<ImageToken> = wk
					.enumerable_get_enumerator
					.and_then(|g| self.tokens.peek_method(&g))
					.into_iter()
					.collect();
				for entry in &mut self.types {
					if matches!(entry.key, TypeKey::Array(_)) {
						entry.members.push(Member {
							token: factory_token,
							slot: Slot::new(SlotKind::MethodSlot, 0),
							base_tokens: base_tokens.clone(),
						});
					}
				}
			}
		}
	}

	/// The compile intentionally processes both sides of a partially
	/// replaced pair; here they collapse, matched through the assigned
	/// tokens. The original keeps its entry and absorbs the substitute's
	/// members, and every reference to the substitute's type token is
	/// renumbered onto the original's. A substitute whose original never
	/// joined the set stands alone and is left as is.
	fn merge_partial_duplicates(&mut self, registry: &ReplacementRegistry) {
		let mut merges: Vec<(ImageToken, ImageToken)> = Vec::new();
		for entry in &self.types {
			let TypeKey::Def(id) = entry.key else { continue };
			let Some(original) = registry.original_of_partial(id) else { continue };
			if let Some(target) = self.tokens.peek_type(&TypeKey::Def(original)) {
				merges.push((entry.token, target));
			}
		}

		for (from, to) in merges {
			let at = self.types.iter().position(|e| e.token == from).unwrap();
			let members = std::mem::take(&mut self.types[at].members);
			self.types.remove(at);

			let target = self.types.iter_mut().find(|e| e.token == to).unwrap();
			for member in members {
				if !target.members.iter().any(|m| m.token == member.token) {
					target.members.push(member);
				}
			}
			// Keep fields ahead of constructor and vtable slots.
			target.members.sort_by_key(|m| m.slot.kind == SlotKind::MethodSlot);

			self.remap_type_token(from, to);
		}
	}

	/// Renumbers one type token everywhere it can appear: parent links,
	/// interface lists, handler catch types, and type-bearing bytecode
	/// operands.
	fn remap_type_token(&mut self, from: ImageToken, to: ImageToken) {
		for entry in &mut self.types {
			if entry.parent == Some(from) {
				entry.parent = Some(to);
			}
			for iface in &mut entry.interfaces {
				if *iface == from {
					*iface = to;
				}
			}
		}
		for entry in &mut self.methods {
			for handler in &mut entry.handlers {
				if handler.class_token == Some(from) {
					handler.class_token = Some(to);
				}
			}
			crate::rewriter::retarget_type_operands(&mut entry.code, from.raw(), to.raw());
		}
	}

	fn collect_special_types(&mut self, program: &Program, registry: &ReplacementRegistry) {
		let wk = &program.well_known;
		let mut special = Vec::new();
		for id in [wk.string, wk.exception, wk.array, wk.multicast_delegate].into_iter().flatten() {
			let key = Self::canonical_type_key(registry, TypeKey::Def(id));
			if let Some(token) = self.tokens.peek_type(&key) {
				special.push(token);
			}
		}
		self.special_types = special;
	}

	/// Rough bytes the device must hold: declarations plus payloads.
	pub fn estimate_device_memory(&self) -> u32 {
		let type_bytes: u32 = self
			.types
			.iter()
			.map(|t| 16 + 4 * (t.members.len() + t.interfaces.len()) as u32)
			.sum();
		let method_bytes: u32 = self
			.methods
			.iter()
			.map(|m| 16 + (m.code.len() + 2 * (m.arg_slots.len() + m.local_slots.len())) as u32)
			.sum();
		let string_bytes: u32 = self.strings.iter().map(|s| s.value.len() as u32 + 1).sum();
		let blob_bytes: u32 = self.blobs.iter().map(|b| b.bytes.len() as u32).sum();
		let static_bytes: u32 = self.types.iter().map(|t| t.static_size).sum();
		type_bytes + method_bytes + string_bytes + blob_bytes + static_bytes
	}

	/// Captures the current boundary: per-kind counts, the special-type
	/// list, and a content hash of everything assigned so far.
	pub fn snapshot(&self) -> Snapshot {
		Snapshot {
			type_count: self.tokens.type_count(),
			field_count: self.tokens.field_count(),
			method_count: self.tokens.method_count(),
			string_count: self.tokens.string_count(),
			blob_count: self.tokens.blob_count(),
			special_types: self.special_types.clone(),
			content_hash: self.content_hash(),
		}
	}

	/// Freezes the kernel prefix at the current boundary so later programs
	/// can reuse the flashed base image. The special-type list is gathered
	/// first; a kernel plainly carries the string, exception, array and
	/// delegate carriers, and the snapshot records them.
	pub fn freeze_kernel(&mut self, program: &Program, registry: &ReplacementRegistry) {
		self.collect_special_types(program, registry);
		self.kernel = Some(self.snapshot());
	}

	pub fn kernel(&self) -> Option<&Snapshot> {
		self.kernel.as_ref()
	}

	pub(crate) fn set_user_entry(&mut self, method: MethodId) {
		self.user_entry_method = Some(method);
	}

	fn content_hash(&self) -> u64 {
		let mut hasher = FxHasher::default();
		for entry in &self.types {
			entry.token.raw().hash(&mut hasher);
			entry.parent.map(|p| p.raw()).unwrap_or(0).hash(&mut hasher);
			entry.instance_size.hash(&mut hasher);
			entry.static_size.hash(&mut hasher);
			entry.flags.bits().hash(&mut hasher);
		}
		for entry in &self.methods {
			entry.token.raw().hash(&mut hasher);
			entry.flags.bits().hash(&mut hasher);
			entry.native_selector.hash(&mut hasher);
			entry.code.hash(&mut hasher);
		}
		for entry in &self.strings {
			entry.token.raw().hash(&mut hasher);
			entry.value.as_bytes().hash(&mut hasher);
		}
		for entry in &self.blobs {
			entry.token.raw().hash(&mut hasher);
			entry.bytes.hash(&mut hasher);
		}
		hasher.finish()
	}
}

fn debug_method_code(bytes: &Vec<u8>, fmt: &mut Formatter) -> Result<(), std::fmt::Error> {
	il::debug_code(bytes, fmt)
}
