//! Bodies for methods that have no source implementation: delegate
//! construction, delegate invocation, and the startup stub. Everything here
//! is emitted directly in image tokens and never passes through the
//! rewriter.

use tracing::{debug, warn};

use crate::errors::CompileError;
use crate::il::{Emitter, OpCode};
use crate::program::{MethodId, Program};
use crate::replacement::ReplacementRegistry;
use crate::set::{ExecutionSet, ImageMethodFlags, MethodEntry, MethodRefs};
use crate::tokens::{ImageToken, TypeKey};

/// Fills in the body of a source method that has none: the delegate
/// constructor and the delegate invocation thunk. Anything else logs and
/// leaves the declaration empty. Returns the references the walker must
/// chase.
pub(crate) fn synthesize_delegate_method(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	method: MethodId,
	token: ImageToken,
) -> Result<MethodRefs, CompileError> {
	let rec = program.method(method);
	if rec.is_ctor() {
		return delegate_ctor(program, registry, set, method, token);
	}
	if &*rec.name == "Invoke" {
		return delegate_invoke(program, registry, set, method, token);
	}
	warn!(method = %program.method_display(method), "no generator for body-less delegate member");
	Ok(MethodRefs::default())
}

/// `ldarg.0; ldarg.1; ldarg.2; call <closed-static helper>; ret` — the
/// helper does the actual target/function-pointer capture on the device.
fn delegate_ctor(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	method: MethodId,
	token: ImageToken,
) -> Result<MethodRefs, CompileError> {
	let Some(helper) = program.well_known.delegate_ctor_helper else {
		return Err(CompileError::MissingImplementation(program.method_display(method)));
	};
	let helper = registry.resolve_method(program, helper)?;
	let helper_token = set.declare_method(program, registry, helper);

	let mut emit = Emitter::new();
	emit.ldarg(0).ldarg(1).ldarg(2).op(OpCode::call).token(helper_token).op(OpCode::ret);

	let refs = MethodRefs { methods: vec![helper], ..Default::default() };
	set.fill_method_body(token, emit.finish(), refs.clone(), Vec::new());
	let entry = set.method_entry_mut(token);
	entry.flags |= ImageMethodFlags::SYNTHESIZED;
	entry.max_stack = 3;
	debug!(method = %program.method_display(method), "synthesized delegate constructor");
	Ok(refs)
}

/// Loads the captured target object, every user argument and the captured
/// method pointer, then dispatches indirectly. The engine reads the pointer
/// from the stack; the signature operand slot is left zero.
fn delegate_invoke(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	method: MethodId,
	token: ImageToken,
) -> Result<MethodRefs, CompileError> {
	let wk = &program.well_known;
	let (Some(target_field), Some(method_field)) = (wk.delegate_target_field, wk.delegate_method_field)
	else {
		return Err(CompileError::MissingImplementation(program.method_display(method)));
	};
	let target_token = set.declare_field(program, target_field);
	let method_token = set.declare_field(program, method_field);

	let rec = program.method(method);
	let mut emit = Emitter::new();
	emit.ldarg(0).op(OpCode::ldfld).token(target_token);
	for i in 0..rec.signature.params.len() {
		emit.ldarg((i + 1) as u16);
	}
	emit.ldarg(0).op(OpCode::ldfld).token(method_token);
	emit.op(OpCode::calli).u32(0);
	emit.op(OpCode::ret);

	let refs = MethodRefs {
		fields: vec![target_field, method_field],
		types: vec![program.field(target_field).declaring],
		..Default::default()
	};
	set.fill_method_body(token, emit.finish(), refs.clone(), Vec::new());
	let entry = set.method_entry_mut(token);
	entry.flags |= ImageMethodFlags::VIRTUAL | ImageMethodFlags::SYNTHESIZED;
	entry.max_stack = rec.signature.params.len() as u16 + 2;
	debug!(method = %program.method_display(method), "synthesized delegate invocation thunk");
	Ok(refs)
}

/// The unique image entry: one direct call per sequenced initializer, an
/// empty argument array when the user entry wants one, the user entry call,
/// a pop for any non-void result, and a return.
pub(crate) fn emit_startup_stub(
	program: &Program,
	set: &mut ExecutionSet,
) -> Result<ImageToken, CompileError> {
	let token = set.tokens.synthetic_method_token();
	let mut emit = Emitter::new();

	for initializer in set.init_sequence.clone() {
		emit.op(OpCode::call).token(initializer);
	}

	if let Some(user) = set.user_entry_method {
		let rec = program.method(user);
		let Some(user_token) = set.method_token_of(user) else {
			return Err(CompileError::MissingImplementation(program.method_display(user)));
		};
		if rec.signature.params.len() == 1 {
			let Some(string) = program.well_known.string else {
				return Err(CompileError::BadEntryPoint {
					method: program.method_display(user),
					reason: "takes an argument vector but the program has no string carrier",
				});
			};
			let Some(element) = set.tokens.peek_type(&TypeKey::Def(string)) else {
				return Err(CompileError::BadEntryPoint {
					method: program.method_display(user),
					reason: "takes an argument vector but the string carrier never joined the set",
				});
			};
			emit.op(OpCode::ldc_i4_0).op(OpCode::newarr).token(element);
		}
		emit.op(OpCode::call).token(user_token);
		if !rec.returns_void() {
			emit.op(OpCode::pop);
		}
	}
	emit.op(OpCode::ret);

	set.methods.push(MethodEntry {
		source: None,
		token,
		flags: ImageMethodFlags::STATIC
			| ImageMethodFlags::VOID_RETURN
			| ImageMethodFlags::SYNTHESIZED,
		max_stack: 2,
		native_selector: 0,
		arg_slots: Vec::new(),
		local_slots: Vec::new(),
		code: emit.finish(),
		handlers: Vec::new(),
		refs: MethodRefs::default(),
	});
	debug!(initializers = set.init_sequence.len(), "emitted startup stub");
	Ok(token)
}
