//! Linear bytecode rewriting: every token-bearing operand is decoded,
//! resolved against the source metadata, carried over any replacement, and
//! patched in place with its image token. The instruction stream itself is
//! never reordered or resized.

use std::io::Cursor;

use tracing::{debug, warn};

use crate::errors::{CompileError, MAX_BODY_SIZE};
use crate::il::{self, OpCode, OperandForm};
use crate::program::{FieldId, HandlerKind, MethodId, Program, SourceRef};
use crate::replacement::ReplacementRegistry;
use crate::set::{ExecutionSet, HandlerEntry, MethodRefs};
use crate::tokens::TypeKey;
use crate::utilities::FromByteStream;

pub(crate) struct Rewritten {
	pub code: Vec<u8>,
	pub refs: MethodRefs,
	pub handlers: Vec<HandlerEntry>,
}

/// Rewrites one method body. The returned reference lists drive the
/// dependency walk; the returned code is what the device will execute.
pub(crate) fn rewrite_body(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	method: MethodId,
) -> Result<Rewritten, CompileError> {
	let rec = program.method(method);
	let Some(body) = &rec.body else {
		return Err(CompileError::MissingImplementation(program.method_display(method)));
	};
	if body.code.len() > MAX_BODY_SIZE {
		return Err(CompileError::OversizedMethod {
			method: program.method_display(method),
			size: body.code.len(),
			limit: MAX_BODY_SIZE,
		});
	}

	let ctx = program.context_of(method);
	let mut code = body.code.clone();
	let mut refs = MethodRefs::default();
	let mut stream = Cursor::new(body.code.as_slice());
	let site = || program.method_display(method);

	loop {
		if stream.position() == body.code.len() as u64 {
			break;
		}
		let op = match il::read_op(&mut stream) {
			Ok(op) => op,
			Err(il::IlFault::UnexpectedEnd) => {
				return Err(CompileError::MalformedBody { site: site(), detail: "truncated instruction" })
			}
			Err(il::IlFault::UnknownOpcode(_)) => {
				return Err(CompileError::MalformedBody { site: site(), detail: "unknown opcode" })
			}
		};
		if !op.is_supported() {
			return Err(CompileError::UnsupportedOpcode { mnemonic: op.mnemonic(), site: site() });
		}

		let form = op.operand_form();
		if form == OperandForm::Switch {
			il::skip_switch_table(&mut stream)
				.map_err(|_| CompileError::MalformedBody { site: site(), detail: "truncated switch table" })?;
			continue;
		}
		if !form.is_token() {
			let skip = form.fixed_len() as u64;
			if stream.position() + skip > body.code.len() as u64 {
				return Err(CompileError::MalformedBody { site: site(), detail: "truncated operand" });
			}
			stream.set_position(stream.position() + skip);
			continue;
		}

		let operand_at = stream.position() as usize;
		let raw = u32::read(&mut stream)
			.map_err(|_| CompileError::MalformedBody { site: site(), detail: "truncated token operand" })?;

		let patched = match form {
			OperandForm::StringToken => {
				let Some(literal) = program.string_literal(raw) else {
					return Err(CompileError::UnresolvedReference { raw, site: site() });
				};
				set.intern_string(literal)
			}
			OperandForm::MethodToken => match program.resolve(raw, &ctx) {
				Some(SourceRef::Method(target)) => {
					patch_method(program, registry, set, &mut refs, target)?
				}
				_ => return Err(CompileError::UnresolvedReference { raw, site: site() }),
			},
			OperandForm::FieldToken => match program.resolve(raw, &ctx) {
				Some(SourceRef::Field(target)) => {
					patch_field(program, registry, set, &mut refs, target)
				}
				_ => return Err(CompileError::UnresolvedReference { raw, site: site() }),
			},
			OperandForm::TypeToken => match program.resolve(raw, &ctx) {
				Some(SourceRef::Type(target)) => match op {
					OpCode::newarr => {
						// The operand stays the element type; the array type
						// itself still joins the set for dispatch.
						set.declare_type(program, registry, TypeKey::Array(target));
						push_type_ref(&mut refs, target);
						set.declare_type(program, registry, TypeKey::Def(target))
					}
					_ => {
						push_type_ref(&mut refs, target);
						set.declare_type(program, registry, TypeKey::Def(target))
					}
				},
				_ => return Err(CompileError::UnresolvedReference { raw, site: site() }),
			},
			OperandForm::AnyToken => match program.resolve(raw, &ctx) {
				Some(SourceRef::Type(target)) => {
					push_type_ref(&mut refs, target);
					set.declare_type(program, registry, TypeKey::Def(target))
				}
				Some(SourceRef::Method(target)) => {
					patch_method(program, registry, set, &mut refs, target)?
				}
				Some(SourceRef::Field(target)) => {
					// An embedded static-array initializer: the payload is
					// registered as the constant data for the field's token.
					let token = patch_field(program, registry, set, &mut refs, target);
					let relocated = registry.resolve_field(program, target);
					match blob_init_payload(program, relocated) {
						Some(bytes) => {
							debug!(field = %program.field_display(relocated), len = bytes.len(), "registered initializer blob");
							set.register_blob(relocated, token, bytes);
						}
						None => warn!(
							field = %program.field_display(relocated),
							"field named by load-token carries no mapped initializer data"
						),
					}
					token
				}
				None => return Err(CompileError::UnresolvedReference { raw, site: site() }),
			},
			// `calli` is the only signature-bearing instruction and it is
			// already rejected above.
			OperandForm::Signature => {
				return Err(CompileError::UnsupportedOpcode { mnemonic: op.mnemonic(), site: site() })
			}
			_ => unreachable!(),
		};

		code[operand_at..operand_at + 4].copy_from_slice(&patched.raw().to_le_bytes());
	}

	// Exception-handling clauses carry their catch types as tokens too; a
	// caught type is as reachable as a newobj'd one.
	let mut handlers = Vec::with_capacity(body.handlers.len());
	for handler in &body.handlers {
		let class_token = match handler.kind {
			HandlerKind::Catch(ty) => {
				push_type_ref(&mut refs, ty);
				Some(set.declare_type(program, registry, TypeKey::Def(ty)))
			}
			HandlerKind::CatchAll | HandlerKind::Finally => None,
		};
		handlers.push(HandlerEntry {
			class_token,
			is_finally: handler.kind == HandlerKind::Finally,
			try_offset: handler.try_offset,
			try_length: handler.try_length,
			handler_offset: handler.handler_offset,
			handler_length: handler.handler_length,
		});
	}

	Ok(Rewritten { code, refs, handlers })
}

fn patch_method(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	refs: &mut MethodRefs,
	target: MethodId,
) -> Result<crate::tokens::ImageToken, CompileError> {
	let resolved = registry.resolve_method(program, target)?;
	if !refs.methods.contains(&resolved) {
		refs.methods.push(resolved);
	}
	Ok(set.declare_method(program, registry, resolved))
}

fn patch_field(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	refs: &mut MethodRefs,
	target: FieldId,
) -> crate::tokens::ImageToken {
	let relocated = registry.resolve_field(program, target);
	if !refs.fields.contains(&relocated) {
		refs.fields.push(relocated);
	}
	// Types made of nothing but fields never show up in any other operand;
	// the declaring type always joins the type-reference list.
	push_type_ref(refs, program.field(relocated).declaring);
	set.declare_field(program, relocated)
}

fn push_type_ref(refs: &mut MethodRefs, ty: crate::program::TypeId) {
	if !refs.types.contains(&ty) {
		refs.types.push(ty);
	}
}

/// Renumbers one type token in place across an already rewritten body. The
/// merge of a partially replaced pair retires the substitute's type token
/// after patching is done; any operand still carrying it moves onto the
/// original's. The code was validated during rewriting, so a decode fault
/// here just ends the walk.
pub(crate) fn retarget_type_operands(code: &mut [u8], from: u32, to: u32) {
	let snapshot = code.to_vec();
	let mut stream = Cursor::new(snapshot.as_slice());
	while stream.position() < snapshot.len() as u64 {
		let Ok(op) = il::read_op(&mut stream) else { return };
		let form = op.operand_form();
		if form == OperandForm::Switch {
			if il::skip_switch_table(&mut stream).is_err() {
				return;
			}
			continue;
		}
		let at = stream.position() as usize;
		let len = form.fixed_len();
		if at + len > snapshot.len() {
			return;
		}
		if matches!(form, OperandForm::TypeToken | OperandForm::AnyToken) {
			let raw = u32::from_le_bytes(snapshot[at..at + 4].try_into().unwrap());
			if raw == from {
				code[at..at + 4].copy_from_slice(&to.to_le_bytes());
			}
		}
		stream.set_position((at + len) as u64);
	}
}

/// Extracts the embedded payload of a static-array initializer field. The
/// implementation-details carrier encodes the byte length in its synthetic
/// type name (`...TypeSize=N`); the mapped data itself arrives through the
/// field record.
fn blob_init_payload(program: &Program, field: FieldId) -> Option<Vec<u8>> {
	let rec = program.field(field);
	let data = rec.constant.as_ref()?;
	let declared_len = rec
		.ty
		.type_id()
		.map(|id| program.ty(id).name.clone())
		.and_then(|name| name.rsplit('=').next().and_then(|n| n.parse::<usize>().ok()));
	match declared_len {
		Some(len) if len <= data.len() => Some(data[..len].to_vec()),
		_ => Some(data.clone()),
	}
}
