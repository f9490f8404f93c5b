//! Mapping from platform types and methods to their microcontroller-friendly
//! substitutes. Populated once from a declarative table before compile start
//! and immutable afterwards; the walker and rewriter only query it.

use std::collections::HashMap;

use nohash_hasher::BuildNoHashHasher;
use tracing::debug;

use crate::errors::CompileError;
use crate::program::{methods_match, FieldId, MethodId, Program, TypeId};

/// How one annotated substitute member binds to the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NativeBinding {
	/// No native hook; the substitute's own bytecode is uploaded.
	ManagedBody,
	/// Positive selector of a built-in device implementation; no body.
	Selector(u32),
}

/// One declaration from the substitute library: a type standing in for the
/// named target, entirely or member-by-member.
#[derive(Debug, Clone)]
pub struct SubstituteDecl {
	pub substitute: TypeId,
	/// Full name of the platform type being replaced. Every source type with
	/// this name is covered; the interop shim that several system assemblies
	/// each carry a copy of resolves to all of them.
	pub target: String,
	pub replace_entire_type: bool,
	pub include_subclasses: bool,
	pub include_privates: bool,
	/// Annotated members, for partial replacement and native hooks.
	pub methods: Vec<(MethodId, NativeBinding)>,
}

#[derive(Debug, Default)]
pub struct ReplacementRegistry {
	/// Original type -> substitute, for entire-type replacement.
	whole_types: HashMap<TypeId, TypeId, BuildNoHashHasher<TypeId>>,
	/// Original type -> substitute, for member-by-member replacement.
	partial_types: HashMap<TypeId, TypeId, BuildNoHashHasher<TypeId>>,
	/// Substitute type -> the original it partially replaces.
	partial_originals: HashMap<TypeId, TypeId, BuildNoHashHasher<TypeId>>,
	/// Original method -> substitute method.
	methods: HashMap<MethodId, MethodId, BuildNoHashHasher<MethodId>>,
	/// Substitute method -> native selector from its annotation.
	selectors: HashMap<MethodId, u32, BuildNoHashHasher<MethodId>>,
}

impl ReplacementRegistry {
	pub fn empty() -> Self {
		Self::default()
	}

	/// Builds the registry from the declarative scan of the substitute
	/// library. A substitute member that matches nothing in its target is a
	/// bug in the substitute library and aborts the compile.
	pub fn build(program: &Program, decls: &[SubstituteDecl]) -> Result<Self, CompileError> {
		let mut registry = Self::default();
		for decl in decls {
			let targets: Vec<TypeId> = program.types_named(&decl.target).collect();
			if targets.is_empty() {
				return Err(CompileError::MissingReplacementTarget {
					substitute: program.full_name(decl.substitute),
					member: String::from("<type>"),
					target: decl.target.clone(),
				});
			}

			for target in targets {
				if target == decl.substitute {
					continue;
				}
				if decl.replace_entire_type {
					registry.whole_types.insert(target, decl.substitute);
					if decl.include_subclasses {
						for (id, _) in program.types() {
							if program.is_subclass_of(id, target) {
								registry.whole_types.insert(id, decl.substitute);
							}
						}
					}
				} else {
					registry.partial_types.insert(target, decl.substitute);
					registry.partial_originals.insert(decl.substitute, target);
				}

				for (substitute_method, binding) in &decl.methods {
					if let NativeBinding::Selector(selector) = binding {
						registry.selectors.insert(*substitute_method, *selector);
					}
					let found = program
						.methods_of(target)
						.filter(|(_, m)| decl.include_privates || !m.is_private())
						.find(|(_, m)| methods_match(program, program.method(*substitute_method), m));
					match found {
						Some((original, _)) => {
							debug!(
								original = %program.method_display(original),
								substitute = %program.method_display(*substitute_method),
								"installed method substitution"
							);
							registry.methods.insert(original, *substitute_method);
						}
						None => {
							return Err(CompileError::MissingReplacementTarget {
								substitute: program.full_name(decl.substitute),
								member: program.method(*substitute_method).name.to_string(),
								target: program.full_name(target),
							})
						}
					}
				}
			}
		}
		Ok(registry)
	}

	/// The substitute standing in for the whole of `ty`, if any.
	pub fn replacement_of_type(&self, ty: TypeId) -> Option<TypeId> {
		self.whole_types.get(&ty).copied()
	}

	/// The substitute contributing members to `ty`, if any.
	pub fn partial_substitute_of(&self, ty: TypeId) -> Option<TypeId> {
		self.partial_types.get(&ty).copied()
	}

	/// The original a partial substitute was declared against.
	pub fn original_of_partial(&self, substitute: TypeId) -> Option<TypeId> {
		self.partial_originals.get(&substitute).copied()
	}

	pub fn replacement_of_method(&self, method: MethodId) -> Option<MethodId> {
		self.methods.get(&method).copied()
	}

	pub fn native_selector(&self, method: MethodId) -> Option<u32> {
		self.selectors.get(&method).copied()
	}

	/// Carries a member reference over its declaring type's replacement:
	/// first the per-method map, then a signature match into the substitute
	/// of a fully-replaced declaring type. A call into a fully-replaced type
	/// with no counterpart is fatal.
	pub fn resolve_method(&self, program: &Program, method: MethodId) -> Result<MethodId, CompileError> {
		if let Some(substitute) = self.methods.get(&method) {
			return Ok(*substitute);
		}
		let declaring = program.method(method).declaring;
		let Some(substitute_type) = self.whole_types.get(&declaring) else {
			return Ok(method);
		};
		program
			.methods_of(*substitute_type)
			.find(|(_, m)| methods_match(program, program.method(method), m))
			.map(|(id, _)| id)
			.ok_or_else(|| CompileError::MissingReplacementTarget {
				substitute: program.full_name(*substitute_type),
				member: program.method(method).name.to_string(),
				target: program.full_name(declaring),
			})
	}

	/// Field relocation for a replaced declaring type: same-name lookup on
	/// the substitute, public or not. Several same-named fields pick the
	/// first in declaration order. Fields of untouched types pass through.
	pub fn resolve_field(&self, program: &Program, field: FieldId) -> FieldId {
		let declaring = program.field(field).declaring;
		let substitute = self
			.whole_types
			.get(&declaring)
			.or_else(|| self.partial_types.get(&declaring));
		let Some(substitute) = substitute else {
			return field;
		};
		let name = &program.field(field).name;
		program
			.ty(*substitute)
			.fields
			.iter()
			.copied()
			.find(|f| program.field(*f).name == *name)
			.unwrap_or(field)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::program::{MethodAttributes, MethodRec, MethodSig, TypeRec, TypeSig};

	fn method_named(program: &mut Program, ty: TypeId, name: &str, private: bool) -> MethodId {
		let mut rec = MethodRec::new(ty, name, MethodSig::new(vec![], TypeSig::Void));
		rec.flags |= match private {
			true => MethodAttributes::PRIVATE,
			false => MethodAttributes::PUBLIC,
		};
		rec.flags |= MethodAttributes::STATIC;
		program.add_method(rec)
	}

	#[test]
	fn private_targets_need_the_privates_switch() {
		let mut program = Program::new();
		let target = program.add_type(TypeRec::named("System", "Timer"));
		method_named(&mut program, target, "Arm", true);
		let substitute = program.add_type(TypeRec::named("Substitutes", "Timer"));
		let sub_arm = method_named(&mut program, substitute, "Arm", false);

		let mut decl = SubstituteDecl {
			substitute,
			target: String::from("System.Timer"),
			replace_entire_type: false,
			include_subclasses: false,
			include_privates: false,
			methods: vec![(sub_arm, NativeBinding::ManagedBody)],
		};
		assert!(matches!(
			ReplacementRegistry::build(&program, std::slice::from_ref(&decl)),
			Err(CompileError::MissingReplacementTarget { .. })
		));

		decl.include_privates = true;
		let registry = ReplacementRegistry::build(&program, &[decl]).unwrap();
		let original = program.ty(target).methods[0];
		assert_eq!(registry.replacement_of_method(original), Some(sub_arm));
	}

	#[test]
	fn subclasses_fold_into_an_entire_type_replacement() {
		let mut program = Program::new();
		let target = program.add_type(TypeRec::named("System", "Stream"));
		let mut derived_rec = TypeRec::named("System", "FileStream");
		derived_rec.base = Some(target);
		let derived = program.add_type(derived_rec);
		let substitute = program.add_type(TypeRec::named("Substitutes", "Stream"));

		let decl = SubstituteDecl {
			substitute,
			target: String::from("System.Stream"),
			replace_entire_type: true,
			include_subclasses: true,
			include_privates: false,
			methods: vec![],
		};
		let registry = ReplacementRegistry::build(&program, &[decl]).unwrap();
		assert_eq!(registry.replacement_of_type(target), Some(substitute));
		assert_eq!(registry.replacement_of_type(derived), Some(substitute));
	}

	#[test]
	fn native_selectors_land_in_the_registry() {
		let mut program = Program::new();
		let target = program.add_type(TypeRec::named("System", "Gpio"));
		method_named(&mut program, target, "Toggle", false);
		let substitute = program.add_type(TypeRec::named("Substitutes", "Gpio"));
		let sub_toggle = method_named(&mut program, substitute, "Toggle", false);

		let decl = SubstituteDecl {
			substitute,
			target: String::from("System.Gpio"),
			replace_entire_type: false,
			include_subclasses: false,
			include_privates: false,
			methods: vec![(sub_toggle, NativeBinding::Selector(33))],
		};
		let registry = ReplacementRegistry::build(&program, &[decl]).unwrap();
		assert_eq!(registry.native_selector(sub_toggle), Some(33));
	}
}
