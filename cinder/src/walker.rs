//! Transitive reachability from the entry method. Admission is cycle-safe
//! (a method is walked at most once), replacement-aware, and followed by a
//! completion pass that picks up the virtual implementations no bytecode
//! names directly.

use fxhash::FxHashSet;
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::errors::{CompileError, MAX_WALKABLE_BODY_SIZE};
use crate::program::{MethodId, Program, TypeId};
use crate::replacement::ReplacementRegistry;
use crate::rewriter::rewrite_body;
use crate::set::ExecutionSet;
use crate::synth;
use crate::tokens::TypeKey;

pub(crate) struct Walker<'l> {
	program: &'l Program,
	registry: &'l ReplacementRegistry,
	set: &'l mut ExecutionSet,
	worklist: Vec<MethodId>,
	walked: FxHashSet<MethodId>,
}

/// Walks everything reachable from `entry`, then runs the completion pass
/// until the set stops growing.
#[tracing::instrument(skip_all)]
pub(crate) fn walk(
	program: &Program,
	registry: &ReplacementRegistry,
	set: &mut ExecutionSet,
	entry: MethodId,
) -> Result<(), CompileError> {
	let mut walker = Walker {
		program,
		registry,
		set,
		worklist: Vec::new(),
		walked: FxHashSet::default(),
	};

	// The startup stub constructs an empty argument array when the entry
	// wants one; its element type has to be in the set by then.
	if program.method(entry).signature.params.len() == 1 {
		if let Some(string) = program.well_known.string {
			walker.ensure_type(string);
			walker.set.declare_type(program, registry, TypeKey::Array(string));
		}
	}

	walker.admit(entry)?;
	walker.drain()?;

	loop {
		let first = walker.completion_pass()?;
		walker.drain()?;
		let second = walker.completion_pass()?;
		walker.drain()?;
		if !first && !second {
			break;
		}
	}

	info!(
		methods = walker.set.methods.len(),
		types = walker.set.types.len(),
		"reachability stabilized"
	);
	Ok(())
}

impl<'l> Walker<'l> {
	fn drain(&mut self) -> Result<(), CompileError> {
		while let Some(method) = self.worklist.pop() {
			self.admit(method)?;
		}
		Ok(())
	}

	/// Admits one method: declaration always, body only for concrete,
	/// non-native methods. Replacement of the declaring type and of the
	/// method itself applies before anything else.
	fn admit(&mut self, method: MethodId) -> Result<(), CompileError> {
		let program = self.program;
		let method = self.registry.resolve_method(program, method)?;
		if !self.walked.insert(method) {
			return Ok(());
		}
		let rec = program.method(method);

		if let Some(body) = &rec.body {
			if body.code.len() > MAX_WALKABLE_BODY_SIZE {
				return Err(CompileError::OversizedMethod {
					method: program.method_display(method),
					size: body.code.len(),
					limit: MAX_WALKABLE_BODY_SIZE,
				});
			}
		}

		let selector = self
			.registry
			.native_selector(method)
			.or(rec.native_selector)
			.unwrap_or(0);
		let declaring = rec.declaring;
		let is_delegate_member = rec.body.is_none() && program.is_delegate(declaring);

		// A concrete method with no bytecode and no native hook that is not
		// a delegate auto-generated member is not added at all; it only
		// becomes fatal if something actually invokes it.
		if rec.body.is_none() && selector == 0 && !rec.is_abstract() && !is_delegate_member {
			warn!(method = %program.method_display(method), "missing implementation; not added");
			return Ok(());
		}

		let token = self.set.declare_method(program, self.registry, method);
		debug!(method = %program.method_display(method), token = ?token, "admitted");

		// New-object needs to find the type from a constructor token, and
		// static-field references do not always surface in the bytecode
		// scan.
		if rec.is_ctor() || rec.is_cctor() || program.has_static_fields(declaring) {
			self.ensure_type(declaring);
		}

		if rec.is_abstract() || selector > 0 {
			return Ok(());
		}

		if is_delegate_member {
			self.ensure_type(declaring);
			let refs = synth::synthesize_delegate_method(program, self.registry, self.set, method, token)?;
			for ty in &refs.types {
				self.ensure_type(*ty);
			}
			self.worklist.extend(refs.methods.iter().copied());
			return Ok(());
		}

		let rewritten = rewrite_body(program, self.registry, self.set, method)?;
		for ty in &rewritten.refs.types {
			self.ensure_type(*ty);
		}
		self.worklist.extend(rewritten.refs.methods.iter().copied());
		self.set.fill_method_body(token, rewritten.code, rewritten.refs, rewritten.handlers);
		Ok(())
	}

	fn ensure_type(&mut self, ty: TypeId) {
		if self.set.is_suppressed(self.program, ty) {
			return;
		}
		self.set.declare_type(self.program, self.registry, TypeKey::Def(ty));
	}

	fn counts(&self) -> (usize, usize, usize) {
		(
			self.set.tokens.type_count(),
			self.set.tokens.method_count(),
			self.set.tokens.field_count(),
		)
	}

	/// One pass over the currently-known types in inheritance order:
	/// concrete overrides of set-resident methods, unsuppressed type
	/// initializers, and the array enumerator injection.
	fn completion_pass(&mut self) -> Result<bool, CompileError> {
		let program = self.program;
		let before = self.counts();

		let mut known: Vec<TypeId> = self
			.set
			.types
			.iter()
			.filter_map(|e| match e.key {
				TypeKey::Def(id) => Some(id),
				TypeKey::Array(_) => None,
			})
			.collect();
		// Interfaces first, then bases before derived; names break ties.
		known.sort_by_cached_key(|id| {
			(
				!program.ty(*id).is_interface(),
				program.base_chain(*id).count(),
				program.full_name(*id),
			)
		});

		for ty in known {
			for (method, rec) in program.methods_of(ty) {
				if rec.is_static() || rec.is_abstract() || self.set.contains_method(method) {
					continue;
				}
				// Virtual dispatch on an instance of this type reaches the
				// override even when no bytecode names it.
				if dispatch::overrides_into_set(program, self.set, ty, method) {
					self.admit(method)?;
				}
			}

			if !self.set.is_suppressed(program, ty) {
				if let Some(cctor) = program.type_initializer(ty) {
					let resolved = self.registry.resolve_method(program, cctor)?;
					self.admit(cctor)?;
					if self.set.contains_method(resolved) {
						self.set.push_initializer(resolved);
					}
				}
			}
		}

		// Arrays enumerate through an injected factory standing in as their
		// implementation of the enumerable interface.
		let has_arrays = self.set.types.iter().any(|e| matches!(e.key, TypeKey::Array(_)));
		if has_arrays {
			let wk = &program.well_known;
			if let Some(factory) = wk.array_enumerator_factory {
				self.admit(factory)?;
			}
			if let Some(getter) = wk.enumerable_get_enumerator {
				self.admit(getter)?;
			}
			if let Some(iface) = wk.enumerable_interface {
				self.ensure_type(iface);
			}
		}

		Ok(self.counts() != before)
	}
}
