//! Upload-driver behavior against an in-memory loopback device: phase
//! ordering, kernel-delta filtering, failure handling, and the task
//! subsystem's view of device-side aborts.

mod common;

use cinder::errors::DeviceError;
use cinder::il::{Emitter, OpCode};
use cinder::program::{TypeRec, TypeSig};
use cinder::tasks::{RuntimeAbort, TaskRegistry, TaskState, TaskUpdate};
use cinder::tokens::TypeKey;
use cinder::upload::{Command, DeviceHeader, Frame, Transport, UploadDriver};
use cinder::{Compiler, CompileSettings};

use common::{body, Fixture};

/// Records every frame and plays the device's persisted header back, the
/// way the flash-resident header works on real hardware.
#[derive(Default)]
struct Loopback {
	frames: Vec<Frame>,
	header: Option<DeviceHeader>,
	fail_after: Option<usize>,
}

impl Transport for Loopback {
	fn send(&mut self, frame: &Frame) -> Result<(), DeviceError> {
		if let Some(limit) = self.fail_after {
			if self.frames.len() >= limit {
				return Err(DeviceError::LinkLost);
			}
		}
		if let Frame::Header(header) = frame {
			self.header = Some(DeviceHeader {
				data_version: header.data_version,
				kernel_hash: header.kernel_hash,
			});
		}
		self.frames.push(frame.clone());
		Ok(())
	}

	fn kernel_header(&mut self) -> Result<Option<DeviceHeader>, DeviceError> {
		Ok(self.header)
	}
}

fn frame_token(frame: &Frame) -> Option<cinder::ImageToken> {
	match frame {
		Frame::ClassDecl(decl) => Some(decl.token),
		Frame::MethodDecl(decl) => Some(decl.token),
		Frame::MethodBody { token, .. } => Some(*token),
		Frame::StringBlob { token, .. } => Some(*token),
		Frame::ConstantBlob { token, .. } => Some(*token),
		_ => None,
	}
}

#[test]
fn a_matching_kernel_is_not_resent() {
	let mut fx = Fixture::new();
	let lib = fx.program.add_type(TypeRec::named("System.Device", "Bootstrap"));
	let raw_banner = fx.raw_string("boot");
	// Touching the string carrier pulls a special type into the kernel.
	let empty = fx.program.ty(fx.string).fields[2];
	let raw_empty = fx.raw_field(empty);
	let mut e = Emitter::new();
	e.op(OpCode::ldstr)
		.u32(raw_banner)
		.op(OpCode::pop)
		.op(OpCode::ldsfld)
		.u32(raw_empty)
		.op(OpCode::pop)
		.op(OpCode::ret);
	let boot = fx.static_method(lib, "Boot", vec![], TypeSig::Void, body(1, e.finish()));

	let program_ty = fx.user_type("Program");
	let mut e = Emitter::new();
	e.op(OpCode::ldc_i4_1).op(OpCode::ret);
	let entry_one = fx.static_method(program_ty, "RunOne", vec![], TypeSig::Int32, body(1, e.finish()));
	let mut e = Emitter::new();
	e.op(OpCode::ldc_i4_2).op(OpCode::ret);
	let entry_two = fx.static_method(program_ty, "RunTwo", vec![], TypeSig::Int32, body(1, e.finish()));

	let settings = CompileSettings { create_kernel_for_flashing: true, ..Default::default() };
	let compiler = Compiler::new(&fx.program, &[], settings).unwrap();
	let kernel = compiler.compile_kernel(&[boot]).unwrap();

	// The boundary snapshot already knows its special types.
	let string_token = kernel.type_token_of(TypeKey::Def(fx.string)).unwrap();
	assert!(kernel.kernel().unwrap().special_types.contains(&string_token));

	let set_one = compiler.compile_into(kernel.clone(), entry_one).unwrap();
	let set_two = compiler.compile_into(kernel.clone(), entry_two).unwrap();
	assert_eq!(
		set_one.kernel().unwrap().content_hash,
		set_two.kernel().unwrap().content_hash
	);

	let mut device = Loopback::default();
	UploadDriver::new(&mut device).deploy(&set_one).unwrap();
	let first_len = device.frames.len();

	// A cold device gets a reset and the full image, kernel included.
	assert!(matches!(device.frames[0], Frame::Command(Command::ResetEngine)));
	let boot_token = set_one.method_token_of(boot).unwrap();
	assert!(device
		.frames
		.iter()
		.any(|f| matches!(f, Frame::MethodBody { token, .. } if *token == boot_token)));

	UploadDriver::new(&mut device).deploy(&set_two).unwrap();
	let second = &device.frames[first_len..];

	// The hash matched: no reset, and nothing at or below the boundary.
	assert!(!second.iter().any(|f| matches!(f, Frame::Command(Command::ResetEngine))));
	let boundary = set_two.kernel().unwrap();
	for frame in second {
		if let Some(token) = frame_token(frame) {
			assert!(!boundary.contains(token), "kernel item resent: {frame:?}");
		}
	}
	// The user program itself did go down.
	let entry_two_token = set_two.method_token_of(entry_two).unwrap();
	assert!(second
		.iter()
		.any(|f| matches!(f, Frame::MethodBody { token, .. } if *token == entry_two_token)));
}

#[test]
fn phases_arrive_in_upload_order() {
	let mut fx = Fixture::new();
	let program_ty = fx.user_type("Program");
	let raw_hello = fx.raw_string("hello");
	let raw_object_ctor = fx.raw_method(fx.object_ctor);
	let mut e = Emitter::new();
	e.op(OpCode::ldstr)
		.u32(raw_hello)
		.op(OpCode::pop)
		.op(OpCode::newobj)
		.u32(raw_object_ctor)
		.op(OpCode::pop)
		.op(OpCode::ret);
	let entry = fx.static_method(program_ty, "Run", vec![], TypeSig::Void, body(1, e.finish()));

	let compiler = Compiler::new(&fx.program, &[], CompileSettings::default()).unwrap();
	let set = compiler.compile(entry).unwrap();
	let mut device = Loopback::default();
	UploadDriver::new(&mut device).deploy(&set).unwrap();

	let position = |pred: &dyn Fn(&Frame) -> bool| device.frames.iter().position(|f| pred(f));
	let last_class = device
		.frames
		.iter()
		.rposition(|f| matches!(f, Frame::ClassDecl(_)))
		.unwrap();
	let first_method_decl = position(&|f| matches!(f, Frame::MethodDecl(_))).unwrap();
	let blob_sizes = position(&|f| matches!(f, Frame::BlobSizes { .. })).unwrap();
	let first_string = position(&|f| matches!(f, Frame::StringBlob { .. })).unwrap();
	assert!(last_class < first_method_decl, "classes precede methods");
	assert!(blob_sizes < first_string, "sizes precede payloads");

	// Every body is preceded by its declaration.
	for (at, frame) in device.frames.iter().enumerate() {
		if let Frame::MethodBody { token, .. } = frame {
			let decl = position(&|f| matches!(f, Frame::MethodDecl(d) if d.token == *token)).unwrap();
			assert!(decl < at);
		}
	}

	// The header closes the stream.
	assert!(matches!(device.frames.last(), Some(Frame::Header(_))));
}

#[test]
fn a_device_failure_resets_the_engine_and_propagates() {
	let mut fx = Fixture::new();
	let program_ty = fx.user_type("Program");
	let mut e = Emitter::new();
	e.op(OpCode::ldc_i4_1).op(OpCode::ret);
	let entry = fx.static_method(program_ty, "Run", vec![], TypeSig::Int32, body(1, e.finish()));

	let compiler = Compiler::new(&fx.program, &[], CompileSettings::default()).unwrap();
	let set = compiler.compile(entry).unwrap();
	let mut device = Loopback { fail_after: Some(2), ..Default::default() };
	let result = UploadDriver::new(&mut device).deploy(&set);
	assert!(matches!(result, Err(DeviceError::LinkLost)));
}

#[test]
fn runtime_aborts_surface_with_kind_and_token_trace() {
	let mut fx = Fixture::new();
	let program_ty = fx.user_type("Program");
	let mut e = Emitter::new();
	e.op(OpCode::ldc_i4_1).op(OpCode::ret);
	let entry = fx.static_method(program_ty, "Run", vec![], TypeSig::Int32, body(1, e.finish()));
	let compiler = Compiler::new(&fx.program, &[], CompileSettings::default()).unwrap();
	let set = compiler.compile(entry).unwrap();

	let mut device = Loopback::default();
	UploadDriver::new(&mut device).deploy(&set).unwrap();

	let stub = set.entry.unwrap();
	let registry = TaskRegistry::new();
	device
		.send(&Frame::Command(Command::Execute { method: stub, task: 1, args: vec![10] }))
		.unwrap();
	registry.begin(1, stub);

	// The engine reports the aborts the compiler never sees: bounds, zero
	// division, allocation failure.
	for (task, kind) in [
		(1, RuntimeAbort::IndexOutOfRange),
		(2, RuntimeAbort::DivideByZero),
		(3, RuntimeAbort::OutOfMemory),
	] {
		registry.begin(task, stub);
		registry.apply(TaskUpdate::Aborted { task, kind, trace: vec![stub] });
		match registry.state_of(task) {
			Some(TaskState::Aborted { kind: reported, trace }) => {
				assert_eq!(reported, kind);
				assert_eq!(trace, vec![stub]);
			}
			other => panic!("unexpected state {other:?}"),
		}
	}
}
