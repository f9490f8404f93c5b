//! Streaming the finalized image to the device: classes, constants,
//! strings, method declarations and bodies, in token order, with periodic
//! flash commits so the device's RAM never fills before the image is
//! complete. The wire itself lives behind the `Transport` trait.

use bitflags::bitflags;
use tracing::{debug, info};

use crate::errors::DeviceError;
use crate::set::{ExecutionSet, Snapshot};
use crate::tokens::ImageToken;
use crate::utilities::{put_u16, put_u32, put_u64};

/// Version of the image data format, checked against the device header
/// before a kernel is reused.
pub const DATA_VERSION: u32 = 1;

/// Items between flash-commit points.
const FLASH_COMMIT_INTERVAL: usize = 100;

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct StartupFlags: u8 {
		const LAUNCH_FROM_FLASH = 0x01;
		const AUTO_RESTART = 0x02;
	}
}

#[derive(Debug, Clone)]
pub struct MemberDecl {
	pub token: ImageToken,
	pub kind: u8,
	pub size: u16,
	pub base_tokens: Vec<ImageToken>,
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
	pub token: ImageToken,
	pub parent: Option<ImageToken>,
	pub instance_size: u32,
	pub static_size: u32,
	pub flags: u8,
	pub members: Vec<MemberDecl>,
	pub interfaces: Vec<ImageToken>,
}

#[derive(Debug, Clone)]
pub struct HandlerDecl {
	/// Zero for catch-all and finally clauses.
	pub class_token: u32,
	pub is_finally: bool,
	pub try_offset: u16,
	pub try_length: u16,
	pub handler_offset: u16,
	pub handler_length: u16,
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
	pub token: ImageToken,
	pub flags: u16,
	pub max_stack: u16,
	pub arg_count: u16,
	pub native_selector: u32,
	pub args: Vec<(u8, u16)>,
	pub locals: Vec<(u8, u16)>,
	pub handlers: Vec<HandlerDecl>,
}

#[derive(Debug, Clone)]
pub struct ImageHeader {
	pub data_version: u32,
	pub kernel_hash: u64,
	pub startup: Option<ImageToken>,
	pub flags: StartupFlags,
}

/// The header persisted on the device, read back to decide whether the
/// flashed kernel is reusable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DeviceHeader {
	pub data_version: u32,
	pub kernel_hash: u64,
}

#[derive(Debug, Clone)]
pub enum Command {
	ResetEngine,
	ClearFlash,
	CopyToFlash,
	MarkReadOnly(ImageToken),
	KillTask(u32),
	Execute { method: ImageToken, task: u32, args: Vec<u32> },
	QueryCapabilities,
	SetDebugging(bool),
}

/// One transport frame. Every item of the image travels as exactly one of
/// these.
#[derive(Debug, Clone)]
pub enum Frame {
	ClassDecl(ClassDecl),
	SpecialTypes(Vec<ImageToken>),
	/// Total payload sizes, sent ahead of the blobs so the device can
	/// pre-allocate.
	BlobSizes { constants: u32, strings: u32 },
	ConstantBlob { token: ImageToken, field: ImageToken, bytes: Vec<u8> },
	StringBlob { token: ImageToken, bytes: Vec<u8> },
	MethodDecl(MethodDecl),
	MethodBody { token: ImageToken, code: Vec<u8> },
	Header(ImageHeader),
	Command(Command),
}

impl Frame {
	pub fn kind_name(&self) -> &'static str {
		match self {
			Frame::ClassDecl(_) => "class-declaration",
			Frame::SpecialTypes(_) => "special-types",
			Frame::BlobSizes { .. } => "blob-sizes",
			Frame::ConstantBlob { .. } => "constant-blob",
			Frame::StringBlob { .. } => "string-blob",
			Frame::MethodDecl(_) => "method-declaration",
			Frame::MethodBody { .. } => "method-body",
			Frame::Header(_) => "image-header",
			Frame::Command(_) => "command",
		}
	}

	/// Little-endian wire form: a one-byte frame tag, then the fields in
	/// declaration order. Variable-length runs are count-prefixed.
	pub fn encode(&self, out: &mut Vec<u8>) {
		match self {
			Frame::ClassDecl(decl) => {
				out.push(0x01);
				put_u32(out, decl.token.raw());
				put_u32(out, decl.parent.map(|p| p.raw()).unwrap_or(0));
				put_u32(out, decl.instance_size);
				put_u32(out, decl.static_size);
				out.push(decl.flags);
				put_u16(out, decl.members.len() as u16);
				for member in &decl.members {
					put_u32(out, member.token.raw());
					out.push(member.kind);
					put_u16(out, member.size);
					out.push(member.base_tokens.len() as u8);
					for base in &member.base_tokens {
						put_u32(out, base.raw());
					}
				}
				put_u16(out, decl.interfaces.len() as u16);
				for iface in &decl.interfaces {
					put_u32(out, iface.raw());
				}
			}
			Frame::SpecialTypes(tokens) => {
				out.push(0x02);
				put_u16(out, tokens.len() as u16);
				for token in tokens {
					put_u32(out, token.raw());
				}
			}
			Frame::BlobSizes { constants, strings } => {
				out.push(0x03);
				put_u32(out, *constants);
				put_u32(out, *strings);
			}
			Frame::ConstantBlob { token, field, bytes } => {
				out.push(0x04);
				put_u32(out, token.raw());
				put_u32(out, field.raw());
				put_u32(out, bytes.len() as u32);
				out.extend_from_slice(bytes);
			}
			Frame::StringBlob { token, bytes } => {
				out.push(0x05);
				put_u32(out, token.raw());
				put_u32(out, bytes.len() as u32);
				out.extend_from_slice(bytes);
			}
			Frame::MethodDecl(decl) => {
				out.push(0x06);
				put_u32(out, decl.token.raw());
				put_u16(out, decl.flags);
				put_u16(out, decl.max_stack);
				put_u16(out, decl.arg_count);
				put_u32(out, decl.native_selector);
				out.push(decl.args.len() as u8);
				for (kind, size) in &decl.args {
					out.push(*kind);
					put_u16(out, *size);
				}
				out.push(decl.locals.len() as u8);
				for (kind, size) in &decl.locals {
					out.push(*kind);
					put_u16(out, *size);
				}
				out.push(decl.handlers.len() as u8);
				for handler in &decl.handlers {
					put_u32(out, handler.class_token);
					out.push(handler.is_finally as u8);
					put_u16(out, handler.try_offset);
					put_u16(out, handler.try_length);
					put_u16(out, handler.handler_offset);
					put_u16(out, handler.handler_length);
				}
			}
			Frame::MethodBody { token, code } => {
				out.push(0x07);
				put_u32(out, token.raw());
				put_u32(out, code.len() as u32);
				out.extend_from_slice(code);
			}
			Frame::Header(header) => {
				out.push(0x08);
				put_u32(out, header.data_version);
				put_u64(out, header.kernel_hash);
				put_u32(out, header.startup.map(|t| t.raw()).unwrap_or(0));
				out.push(header.flags.bits());
			}
			Frame::Command(command) => {
				out.push(0x09);
				match command {
					Command::ResetEngine => out.push(0x01),
					Command::ClearFlash => out.push(0x02),
					Command::CopyToFlash => out.push(0x03),
					Command::MarkReadOnly(token) => {
						out.push(0x04);
						put_u32(out, token.raw());
					}
					Command::KillTask(task) => {
						out.push(0x05);
						put_u32(out, *task);
					}
					Command::Execute { method, task, args } => {
						out.push(0x06);
						put_u32(out, method.raw());
						put_u32(out, *task);
						out.push(args.len() as u8);
						for arg in args {
							put_u32(out, *arg);
						}
					}
					Command::QueryCapabilities => out.push(0x07),
					Command::SetDebugging(enabled) => {
						out.push(0x08);
						out.push(*enabled as u8);
					}
				}
			}
		}
	}
}

/// The wire. `send` blocks until the frame is accepted; `kernel_header`
/// reads back the persisted header, when the device has one.
pub trait Transport {
	fn send(&mut self, frame: &Frame) -> Result<(), DeviceError>;
	fn kernel_header(&mut self) -> Result<Option<DeviceHeader>, DeviceError>;
}

pub struct UploadDriver<'l, T: Transport> {
	transport: &'l mut T,
	sent_since_commit: usize,
	flash_enabled: bool,
}

impl<'l, T: Transport> UploadDriver<'l, T> {
	pub fn new(transport: &'l mut T) -> Self {
		Self { transport, sent_since_commit: 0, flash_enabled: false }
	}

	/// Streams the finalized set. When the set carries a kernel boundary
	/// and the device header already matches it, only the user delta goes
	/// over the wire. Any device failure resets the engine before it
	/// propagates, so no partial image survives.
	#[tracing::instrument(skip_all)]
	pub fn deploy(&mut self, set: &ExecutionSet) -> Result<(), DeviceError> {
		match self.deploy_inner(set) {
			Ok(()) => Ok(()),
			Err(error) => {
				let _ = self.transport.send(&Frame::Command(Command::ResetEngine));
				Err(error)
			}
		}
	}

	fn deploy_inner(&mut self, set: &ExecutionSet) -> Result<(), DeviceError> {
		self.flash_enabled =
			set.settings.create_kernel_for_flashing || set.settings.use_flash_for_program;
		let kernel = set.kernel().cloned();

		let kernel_reusable = match (&kernel, self.transport.kernel_header()?) {
			(Some(kernel), Some(header)) => {
				header.data_version == DATA_VERSION && header.kernel_hash == kernel.content_hash
			}
			_ => false,
		};

		if kernel_reusable {
			info!("on-device kernel matches; sending user delta only");
			self.send_slice(set, kernel.as_ref())?;
		} else {
			self.transport.send(&Frame::Command(Command::ResetEngine))?;
			if self.flash_enabled {
				self.transport.send(&Frame::Command(Command::ClearFlash))?;
			}
			if let Some(kernel) = &kernel {
				// Kernel prefix first, marked read-only on the device, then
				// the user program on top of it.
				self.send_prefix(set, kernel)?;
				self.send_slice(set, Some(kernel))?;
			} else {
				self.send_slice(set, None)?;
			}
		}

		self.transport.send(&Frame::Header(ImageHeader {
			data_version: DATA_VERSION,
			kernel_hash: kernel.map(|k| k.content_hash).unwrap_or(0),
			startup: set.entry,
			flags: startup_flags(set),
		}))?;
		if self.flash_enabled {
			self.transport.send(&Frame::Command(Command::CopyToFlash))?;
		}
		Ok(())
	}

	/// Everything at or below the kernel boundary, with each type marked
	/// read-only once it is down.
	fn send_prefix(&mut self, set: &ExecutionSet, kernel: &Snapshot) -> Result<(), DeviceError> {
		self.send_phases(set, |token| kernel.contains(token))?;
		for entry in &set.types {
			if kernel.contains(entry.token) {
				self.transport.send(&Frame::Command(Command::MarkReadOnly(entry.token)))?;
			}
		}
		Ok(())
	}

	/// Everything above `base` (or the whole set when `base` is `None`).
	fn send_slice(&mut self, set: &ExecutionSet, base: Option<&Snapshot>) -> Result<(), DeviceError> {
		self.send_phases(set, |token| base.map_or(true, |b| !b.contains(token)))
	}

	fn send_phases(
		&mut self,
		set: &ExecutionSet,
		wanted: impl Fn(ImageToken) -> bool,
	) -> Result<(), DeviceError> {
		// Phase 1: class declarations in token order.
		for entry in &set.types {
			if !wanted(entry.token) {
				continue;
			}
			self.push(&Frame::ClassDecl(ClassDecl {
				token: entry.token,
				parent: entry.parent,
				instance_size: entry.instance_size,
				static_size: entry.static_size,
				flags: entry.flags.bits(),
				members: entry
					.members
					.iter()
					.map(|m| MemberDecl {
						token: m.token,
						kind: m.slot.kind as u8,
						size: m.slot.size,
						base_tokens: m.base_tokens.clone(),
					})
					.collect(),
				interfaces: entry.interfaces.clone(),
			}))?;
		}

		// Phase 2: the special-type list, delta-filtered.
		let special: Vec<ImageToken> =
			set.special_types.iter().copied().filter(|t| wanted(*t)).collect();
		if !special.is_empty() {
			self.push(&Frame::SpecialTypes(special))?;
		}

		// Phases 3 and 4: constants, then strings behind the
		// pre-allocation pair.
		let constants: u32 = set
			.blobs
			.iter()
			.filter(|b| wanted(b.token))
			.map(|b| b.bytes.len() as u32)
			.sum();
		let strings: u32 = set
			.strings
			.iter()
			.filter(|s| wanted(s.token))
			.map(|s| s.value.len() as u32 + 1)
			.sum();
		self.push(&Frame::BlobSizes { constants, strings })?;
		for blob in &set.blobs {
			if wanted(blob.token) {
				self.push(&Frame::ConstantBlob {
					token: blob.token,
					field: blob.field,
					bytes: blob.bytes.clone(),
				})?;
			}
		}
		for entry in &set.strings {
			if wanted(entry.token) {
				self.push(&Frame::StringBlob {
					token: entry.token,
					bytes: entry.value.as_bytes().to_vec(),
				})?;
			}
		}

		// Phase 5: method declarations, then bodies.
		for entry in &set.methods {
			if !wanted(entry.token) {
				continue;
			}
			self.push(&Frame::MethodDecl(MethodDecl {
				token: entry.token,
				flags: entry.flags.bits(),
				max_stack: entry.max_stack,
				arg_count: entry.arg_slots.len() as u16,
				native_selector: entry.native_selector,
				args: entry.arg_slots.iter().map(|s| (s.kind as u8, s.size)).collect(),
				locals: entry.local_slots.iter().map(|s| (s.kind as u8, s.size)).collect(),
				handlers: entry
					.handlers
					.iter()
					.map(|h| HandlerDecl {
						class_token: h.class_token.map(|t| t.raw()).unwrap_or(0),
						is_finally: h.is_finally,
						try_offset: h.try_offset,
						try_length: h.try_length,
						handler_offset: h.handler_offset,
						handler_length: h.handler_length,
					})
					.collect(),
			}))?;
		}
		for entry in &set.methods {
			if wanted(entry.token) && entry.has_body() {
				self.push(&Frame::MethodBody { token: entry.token, code: entry.code.clone() })?;
			}
		}
		Ok(())
	}

	fn push(&mut self, frame: &Frame) -> Result<(), DeviceError> {
		self.transport.send(frame)?;
		self.sent_since_commit += 1;
		if self.flash_enabled && self.sent_since_commit >= FLASH_COMMIT_INTERVAL {
			debug!("flash commit point");
			self.transport.send(&Frame::Command(Command::CopyToFlash))?;
			self.sent_since_commit = 0;
		}
		Ok(())
	}
}

fn startup_flags(set: &ExecutionSet) -> StartupFlags {
	let mut flags = StartupFlags::default();
	flags.set(StartupFlags::LAUNCH_FROM_FLASH, set.settings.launch_program_from_flash);
	flags.set(StartupFlags::AUTO_RESTART, set.settings.auto_restart_program);
	flags
}
