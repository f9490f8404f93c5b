//! Ordering of type initializers for the startup stub. The comparator is a
//! heuristic over declared dependencies and observed calls; it is not proven
//! acyclic, which is why the curated front/back lists exist and are
//! configuration rather than constants.

use std::cmp::Ordering;

use tracing::debug;

use crate::program::{MethodId, Program, TypeId};
use crate::set::ExecutionSet;

/// The hand-curated ordering constraints applied after the heuristic sort.
/// Front entries are each pushed to index zero in list order, so the last
/// one wins the very first slot; back entries are appended in list order.
#[derive(Debug, Clone)]
pub struct SequencerOverrides {
	pub bring_to_front: Vec<String>,
	pub send_to_back: Vec<String>,
}

impl Default for SequencerOverrides {
	fn default() -> Self {
		Self {
			bring_to_front: [
				"System.Collections.HashHelpers",
				"System.Text.UTF8Encoding",
				"System.Text.Encoding",
				"System.Text.EncoderFallback",
				"System.Text.EncoderReplacementFallback",
				"System.Text.EncoderExceptionFallback",
				"System.Diagnostics.Tracing.EventSource",
				"System.Threading.CancellationTokenSource",
				"System.Globalization.CultureInfo",
				"System.Diagnostics.Stopwatch",
				"System.StringComparer",
				"System.DateTime",
				// The string-empty carrier must win the very first slot.
				"System.String",
			]
			.iter()
			.map(|s| s.to_string())
			.collect(),
			send_to_back: ["System.Globalization.DateTimeFormatInfo", "System.TimeZoneInfo"]
				.iter()
				.map(|s| s.to_string())
				.collect(),
		}
	}
}

/// Orders the collected initializers. Returns initializer method ids,
/// front-to-back in execution order.
pub(crate) fn order_initializers(
	program: &Program,
	set: &ExecutionSet,
	overrides: &SequencerOverrides,
) -> Vec<MethodId> {
	let records: Vec<(TypeId, MethodId)> = set
		.initializers
		.iter()
		.map(|m| (program.method(*m).declaring, *m))
		.collect();

	// The comparator is not a total order, so this is a hand-rolled stable
	// insertion sort rather than a library sort.
	let mut ordered: Vec<(TypeId, MethodId)> = Vec::with_capacity(records.len());
	for record in records {
		let mut at = ordered.len();
		while at > 0 && compare(program, set, ordered[at - 1], record) == Ordering::Greater {
			at -= 1;
		}
		ordered.insert(at, record);
	}

	for name in &overrides.bring_to_front {
		if let Some(pos) = ordered.iter().position(|(ty, _)| program.full_name(*ty) == *name) {
			let record = ordered.remove(pos);
			ordered.insert(0, record);
		}
	}
	for name in &overrides.send_to_back {
		if let Some(pos) = ordered.iter().position(|(ty, _)| program.full_name(*ty) == *name) {
			let record = ordered.remove(pos);
			ordered.push(record);
		}
	}

	debug!(count = ordered.len(), "initializer order settled");
	ordered.into_iter().map(|(_, m)| m).collect()
}

fn compare(
	program: &Program,
	set: &ExecutionSet,
	x: (TypeId, MethodId),
	y: (TypeId, MethodId),
) -> Ordering {
	if x.0 == y.0 {
		return Ordering::Equal;
	}
	if depends_on(program, set, x, y.0) {
		return Ordering::Greater;
	}
	if depends_on(program, set, y, x.0) {
		return Ordering::Less;
	}
	// Equality comparers are common leaf dependencies.
	let x_comparer = program.ty(x.0).name.contains("EqualityComparer");
	let y_comparer = program.ty(y.0).name.contains("EqualityComparer");
	match (x_comparer, y_comparer) {
		(true, false) => return Ordering::Less,
		(false, true) => return Ordering::Greater,
		_ => {}
	}
	let x_platform = program.ty(x.0).namespace.starts_with("System");
	let y_platform = program.ty(y.0).namespace.starts_with("System");
	match (x_platform, y_platform) {
		(true, false) => Ordering::Less,
		(false, true) => Ordering::Greater,
		_ => Ordering::Equal,
	}
}

/// `x` depends on `target` when its declared dependent-types list names it,
/// or its initializer calls any method declared on it.
fn depends_on(program: &Program, set: &ExecutionSet, x: (TypeId, MethodId), target: TypeId) -> bool {
	if program.ty(x.0).init_dependencies.contains(&target) {
		return true;
	}
	let Some(token) = set.method_token_of(x.1) else { return false };
	set.method_entry(token)
		.refs
		.methods
		.iter()
		.any(|m| program.method(*m).declaring == target)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::program::{MethodAttributes, MethodRec, MethodSig, TypeRec, TypeSig};
	use crate::replacement::ReplacementRegistry;
	use crate::settings::CompileSettings;

	fn cctor(program: &mut Program, ty: TypeId) -> MethodId {
		let mut rec = MethodRec::new(ty, ".cctor", MethodSig::new(vec![], TypeSig::Void));
		rec.flags |= MethodAttributes::STATIC
			| MethodAttributes::SPECIAL_NAME
			| MethodAttributes::RT_SPECIAL_NAME;
		rec.body = Some(crate::program::MethodBody {
			max_stack: 1,
			locals: vec![],
			code: vec![0x2A],
			handlers: vec![],
		});
		program.add_method(rec)
	}

	#[test]
	fn declared_dependencies_order_the_sequence() {
		let mut program = Program::new();
		let a = program.add_type(TypeRec::named("User", "A"));
		let b = program.add_type(TypeRec::named("User", "B"));
		program.ty_mut(a).init_dependencies.push(b);
		let ca = cctor(&mut program, a);
		let cb = cctor(&mut program, b);

		let registry = ReplacementRegistry::empty();
		let mut set = ExecutionSet::new(CompileSettings::default());
		for m in [ca, cb] {
			set.declare_method(&program, &registry, m);
			set.push_initializer(m);
		}
		let ordered = order_initializers(&program, &set, &SequencerOverrides::default());
		let pos_a = ordered.iter().position(|m| *m == ca).unwrap();
		let pos_b = ordered.iter().position(|m| *m == cb).unwrap();
		assert!(pos_b < pos_a, "dependency must initialize first");
	}

	#[test]
	fn the_string_carrier_wins_the_first_slot() {
		let mut program = Program::new();
		let date = program.add_type(TypeRec::named("System", "DateTime"));
		let string = program.add_type(TypeRec::named("System", "String"));
		let user = program.add_type(TypeRec::named("User", "Config"));
		program.well_known.string = Some(string);
		let cd = cctor(&mut program, date);
		let cs = cctor(&mut program, string);
		let cu = cctor(&mut program, user);

		let registry = ReplacementRegistry::empty();
		let mut set = ExecutionSet::new(CompileSettings::default());
		for m in [cu, cd, cs] {
			set.declare_method(&program, &registry, m);
			set.push_initializer(m);
		}
		let ordered = order_initializers(&program, &set, &SequencerOverrides::default());
		assert_eq!(ordered[0], cs);
		assert_eq!(*ordered.last().unwrap(), cu, "platform types precede user types");
	}

	#[test]
	fn back_overrides_append_after_everything() {
		let mut program = Program::new();
		let tz = program.add_type(TypeRec::named("System", "TimeZoneInfo"));
		let user = program.add_type(TypeRec::named("User", "Main"));
		let ctz = cctor(&mut program, tz);
		let cu = cctor(&mut program, user);

		let registry = ReplacementRegistry::empty();
		let mut set = ExecutionSet::new(CompileSettings::default());
		for m in [ctz, cu] {
			set.declare_method(&program, &registry, m);
			set.push_initializer(m);
		}
		let ordered = order_initializers(&program, &set, &SequencerOverrides::default());
		assert_eq!(*ordered.last().unwrap(), ctz);
	}
}
