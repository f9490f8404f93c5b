//! Pipeline orchestration: entry validation, the walk, and finalization.
//! One `Compiler` serves any number of compiles over the same program and
//! substitute library.

use tracing::info;

use crate::errors::CompileError;
use crate::program::{MethodId, Program, TypeSig};
use crate::replacement::{ReplacementRegistry, SubstituteDecl};
use crate::sequencer::SequencerOverrides;
use crate::set::ExecutionSet;
use crate::settings::CompileSettings;
use crate::walker;

pub struct Compiler<'l> {
	program: &'l Program,
	registry: ReplacementRegistry,
	settings: CompileSettings,
	overrides: SequencerOverrides,
}

impl<'l> Compiler<'l> {
	/// Builds the replacement registry from the substitute library's
	/// declarations and fails loudly on any substitute that targets
	/// nothing.
	pub fn new(
		program: &'l Program,
		substitutes: &[SubstituteDecl],
		settings: CompileSettings,
	) -> Result<Self, CompileError> {
		Ok(Self {
			program,
			registry: ReplacementRegistry::build(program, substitutes)?,
			settings,
			overrides: SequencerOverrides::default(),
		})
	}

	/// Replaces the curated initializer-ordering lists. They are
	/// program-dependent configuration, not constants.
	pub fn with_sequencer_overrides(mut self, overrides: SequencerOverrides) -> Self {
		self.overrides = overrides;
		self
	}

	pub fn registry(&self) -> &ReplacementRegistry {
		&self.registry
	}

	/// Compiles a whole program into a fresh set with no kernel boundary.
	pub fn compile(&self, entry: MethodId) -> Result<ExecutionSet, CompileError> {
		self.compile_into(ExecutionSet::new(self.settings.clone()), entry)
	}

	/// Walks the given platform roots and freezes the result as a kernel
	/// prefix. The returned set is not finalized; clone it and hand each
	/// clone to `compile_into` so several user programs can share the same
	/// flashed base image.
	#[tracing::instrument(skip_all)]
	pub fn compile_kernel(&self, roots: &[MethodId]) -> Result<ExecutionSet, CompileError> {
		let mut set = ExecutionSet::new(self.settings.clone());
		for root in roots {
			walker::walk(self.program, &self.registry, &mut set, *root)?;
		}
		set.freeze_kernel(self.program, &self.registry);
		info!(roots = roots.len(), "kernel prefix frozen");
		Ok(set)
	}

	/// Compiles the user program on top of `set` (fresh, or a kernel clone)
	/// and finalizes the image.
	#[tracing::instrument(skip_all)]
	pub fn compile_into(
		&self,
		mut set: ExecutionSet,
		entry: MethodId,
	) -> Result<ExecutionSet, CompileError> {
		self.validate_entry(entry)?;
		set.set_user_entry(entry);
		walker::walk(self.program, &self.registry, &mut set, entry)?;
		set.finalize(self.program, &self.registry, &self.overrides)?;
		Ok(set)
	}

	fn validate_entry(&self, entry: MethodId) -> Result<(), CompileError> {
		let rec = self.program.method(entry);
		let fail = |reason: &'static str| {
			Err(CompileError::BadEntryPoint {
				method: self.program.method_display(entry),
				reason,
			})
		};
		if !rec.is_static() {
			return fail("must be static");
		}
		if rec.generic_params > 0 {
			return fail("must not be generic");
		}
		if self.settings.launch_program_from_flash {
			let shape_ok = match rec.signature.params.as_slice() {
				[] => true,
				[TypeSig::SzArray(element)] => **element == TypeSig::String,
				_ => false,
			};
			if !shape_ok {
				return fail("flash launch needs no parameters or a single string array");
			}
		}
		Ok(())
	}
}
