//! Virtual-dispatch resolution: which base and interface methods a concrete
//! method stands in for. The interface-to-implementation map of a type is
//! authoritative; name matching is only the fallback for interfaces the map
//! does not mention.

use crate::program::{methods_match, MethodAttributes, MethodId, Program, TypeId};
use crate::set::ExecutionSet;

/// The methods `method` overrides, walking `declaring`'s base chain and
/// implemented interfaces. Static methods override nothing. Membership in
/// the execution set is the caller's concern; this list is the raw override
/// relation.
pub(crate) fn overrides_of(
	program: &Program,
	set: &ExecutionSet,
	declaring: TypeId,
	method: MethodId,
) -> Vec<MethodId> {
	let rec = program.method(method);
	if rec.is_static() {
		return Vec::new();
	}
	let mut overridden = Vec::new();

	// Base chain: name match, no new slot, target virtual or abstract,
	// neither side private. Operators sharing a name match unconditionally.
	if !rec.flags.contains(MethodAttributes::NEW_SLOT) && !rec.is_private() {
		for base in program.base_chain(declaring) {
			for (candidate, candidate_rec) in program.methods_of(base) {
				if candidate_rec.name != rec.name {
					continue;
				}
				if !candidate_rec.is_virtual() && !candidate_rec.is_abstract() {
					continue;
				}
				if candidate_rec.is_private() {
					continue;
				}
				let operators = rec.is_operator() && candidate_rec.is_operator();
				if operators || rec.signature.matches(&candidate_rec.signature, program) {
					overridden.push(candidate);
				}
			}
		}
	}

	// Interfaces, including the ones inherited through the base chain. A
	// suppressed interface contributes no override obligation.
	let mut interfaces: Vec<TypeId> = Vec::new();
	for ty in std::iter::once(declaring).chain(program.base_chain(declaring)) {
		for iface in &program.ty(ty).interfaces {
			if !interfaces.contains(iface) && !set.is_suppressed(program, *iface) {
				interfaces.push(*iface);
			}
		}
	}

	let map = &program.ty(declaring).interface_map;
	for iface in interfaces {
		for (decl, decl_rec) in program.methods_of(iface) {
			// The map wins outright: an explicit implementation links even
			// when the names differ, and its presence ends the search for
			// that interface method.
			if let Some(binding) = map.iter().find(|b| b.declaration == decl) {
				if binding.implementation == method {
					overridden.push(decl);
				}
				continue;
			}
			if decl_rec.name != rec.name {
				continue;
			}
			let operators = rec.is_operator() && decl_rec.is_operator();
			if operators || rec.signature.matches(&decl_rec.signature, program) {
				overridden.push(decl);
			}
		}
	}

	overridden
}

/// True when at least one method `method` overrides is already in the set;
/// the completion pass uses this to admit implementations that no bytecode
/// names directly.
pub(crate) fn overrides_into_set(
	program: &Program,
	set: &ExecutionSet,
	declaring: TypeId,
	method: MethodId,
) -> bool {
	overrides_of(program, set, declaring, method)
		.iter()
		.any(|m| set.contains_method(*m))
}
