use crate::program::{GenericContext, MethodRec, Program, TypeId};

/// Flattened form of the metadata type-signature blobs. Cross-references are
/// source type ids rather than coded indices, so signatures can be compared
/// without a heap in hand.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSig {
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
	String,
	Object,
	Class(TypeId),
	Value(TypeId),
	SzArray(Box<TypeSig>),
	ByRef(Box<TypeSig>),
	Pointer(Box<TypeSig>),
	FnPointer,
	/// Generic parameter of the declaring type, by position.
	TypeParam(u32),
	/// Generic parameter of the method, by position.
	MethodParam(u32),
}

impl TypeSig {
	pub fn is_void(&self) -> bool {
		matches!(self, TypeSig::Void)
	}

	/// The source type this signature points at, when it points at one.
	pub fn type_id(&self) -> Option<TypeId> {
		match self {
			TypeSig::Class(id) | TypeSig::Value(id) => Some(*id),
			_ => None,
		}
	}

	pub fn array_of(element: TypeSig) -> TypeSig {
		TypeSig::SzArray(Box::new(element))
	}

	/// Substitutes generic parameters from `ctx`. Signatures that mention a
	/// parameter the context cannot satisfy are returned unchanged; the
	/// resolver treats them as unresolvable.
	pub fn instantiate(&self, program: &Program, ctx: &GenericContext) -> TypeSig {
		let class_or_value = |id: TypeId| match program.ty(id).is_value_type() {
			true => TypeSig::Value(id),
			false => TypeSig::Class(id),
		};
		match self {
			TypeSig::TypeParam(i) => match ctx.type_args.get(*i as usize) {
				Some(id) => class_or_value(*id),
				None => self.clone(),
			},
			TypeSig::MethodParam(i) => match ctx.method_args.get(*i as usize) {
				Some(id) => class_or_value(*id),
				None => self.clone(),
			},
			TypeSig::SzArray(e) => TypeSig::SzArray(Box::new(e.instantiate(program, ctx))),
			TypeSig::ByRef(e) => TypeSig::ByRef(Box::new(e.instantiate(program, ctx))),
			TypeSig::Pointer(e) => TypeSig::Pointer(Box::new(e.instantiate(program, ctx))),
			other => other.clone(),
		}
	}

	/// Structural equality, with one escape hatch: two distinct type records
	/// match when their full names agree. Substitute assemblies re-declare
	/// internal platform types, and those re-declarations must compare equal
	/// to the originals they stand in for.
	pub fn matches(&self, other: &TypeSig, program: &Program) -> bool {
		match (self, other) {
			(TypeSig::Class(a), TypeSig::Class(b))
			| (TypeSig::Value(a), TypeSig::Value(b)) => {
				a == b || program.full_name(*a) == program.full_name(*b)
			}
			(TypeSig::SzArray(a), TypeSig::SzArray(b))
			| (TypeSig::ByRef(a), TypeSig::ByRef(b))
			| (TypeSig::Pointer(a), TypeSig::Pointer(b)) => a.matches(b, program),
			(a, b) => a == b,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
	pub params: Vec<TypeSig>,
	pub ret: TypeSig,
}

impl MethodSig {
	pub fn new(params: Vec<TypeSig>, ret: TypeSig) -> Self {
		Self { params, ret }
	}

	pub fn matches(&self, other: &MethodSig, program: &Program) -> bool {
		self.params.len() == other.params.len()
			&& self.ret.matches(&other.ret, program)
			&& self.params.iter().zip(&other.params).all(|(a, b)| a.matches(b, program))
	}
}

/// Member identity between two methods: equal names plus equal signatures,
/// except operators, which compare by name alone.
pub fn methods_match(program: &Program, a: &MethodRec, b: &MethodRec) -> bool {
	if a.name != b.name {
		return false;
	}
	if a.is_operator() && b.is_operator() {
		return true;
	}
	a.signature.matches(&b.signature, program)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::program::{MethodAttributes, TypeRec};

	#[test]
	fn re_declared_internal_types_compare_by_full_name() {
		let mut program = Program::new();
		// The same internal type, once from the platform assembly and once
		// re-declared by the substitute library.
		let original = program.add_type(TypeRec::named("System.Internal", "Handle"));
		let redeclared = program.add_type(TypeRec::named("System.Internal", "Handle"));
		let other = program.add_type(TypeRec::named("System.Internal", "Buffer"));

		assert!(TypeSig::Class(original).matches(&TypeSig::Class(redeclared), &program));
		assert!(!TypeSig::Class(original).matches(&TypeSig::Class(other), &program));
		assert!(TypeSig::array_of(TypeSig::Class(original))
			.matches(&TypeSig::array_of(TypeSig::Class(redeclared)), &program));
	}

	#[test]
	fn operator_identity_ignores_parameter_types() {
		let mut program = Program::new();
		let ty = program.add_type(TypeRec::named("User", "Fixed"));
		let mut a = MethodRec::new(ty, "op_Addition", MethodSig::new(vec![TypeSig::Int32], TypeSig::Int32));
		a.flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::STATIC;
		let mut b = MethodRec::new(ty, "op_Addition", MethodSig::new(vec![TypeSig::Int64], TypeSig::Int64));
		b.flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::STATIC;
		assert!(methods_match(&program, &a, &b));

		let plain_a = MethodRec::new(ty, "Add", MethodSig::new(vec![TypeSig::Int32], TypeSig::Int32));
		let plain_b = MethodRec::new(ty, "Add", MethodSig::new(vec![TypeSig::Int64], TypeSig::Int64));
		assert!(!methods_match(&program, &plain_a, &plain_b));
	}

	#[test]
	fn generic_parameters_instantiate_through_the_context() {
		let mut program = Program::new();
		let mut value = TypeRec::named("System", "Guid");
		value.flags |= crate::program::TypeAttributes::VALUE_TYPE;
		let value = program.add_type(value);
		let class = program.add_type(TypeRec::named("System", "Uri"));

		let ctx = GenericContext { type_args: vec![value, class], method_args: vec![] };
		assert_eq!(TypeSig::TypeParam(0).instantiate(&program, &ctx), TypeSig::Value(value));
		assert_eq!(TypeSig::TypeParam(1).instantiate(&program, &ctx), TypeSig::Class(class));
		// An unsatisfied parameter stays open.
		assert_eq!(TypeSig::TypeParam(5).instantiate(&program, &ctx), TypeSig::TypeParam(5));
	}
}
