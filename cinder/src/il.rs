//! The stack-machine instruction set, organized by immediate-operand form.
//! The rewriter never interprets instructions; it only needs to know how far
//! to advance and whether the operand is a metadata token to patch.

use std::fmt::{Debug, Formatter};
use std::io::Cursor;

use crate::tokens::ImageToken;
use crate::utilities::FromByteStream;

/// Immediate-operand form of an instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OperandForm {
	None,
	/// One-byte immediate: short constants, short branch targets, short
	/// variable indices.
	Byte,
	/// Two-byte immediate: full variable indices on the extended page.
	Word,
	/// Four-byte immediate: i4/r4 constants and long branch targets.
	Dword,
	/// Eight-byte immediate: i8/r8 constants.
	Qword,
	/// Four-byte user-string token.
	StringToken,
	/// Four-byte method token.
	MethodToken,
	/// Four-byte field token.
	FieldToken,
	/// Four-byte type token.
	TypeToken,
	/// Four-byte token of any kind: type, method or field.
	AnyToken,
	/// Four-byte stand-alone signature token.
	Signature,
	/// Count-prefixed jump table of four-byte targets.
	Switch,
}

impl OperandForm {
	/// Fixed byte length of the operand, for every form but `Switch`.
	pub const fn fixed_len(self) -> usize {
		match self {
			OperandForm::None => 0,
			OperandForm::Byte => 1,
			OperandForm::Word => 2,
			OperandForm::Dword => 4,
			OperandForm::Qword => 8,
			OperandForm::Switch => 0,
			_ => 4,
		}
	}

	pub const fn is_token(self) -> bool {
		matches!(
			self,
			OperandForm::StringToken
				| OperandForm::MethodToken
				| OperandForm::FieldToken
				| OperandForm::TypeToken
				| OperandForm::AnyToken
		)
	}
}

macro_rules! define_opcodes {
	(
		primary { $($p_ident: ident = $p_byte: literal / $p_form: ident),* $(,)? }
		extended { $($x_ident: ident = $x_byte: literal / $x_form: ident),* $(,)? }
	) => {
		/// Every instruction of the set, both pages. Extended-page opcodes
		/// are encoded behind the `0xFE` prefix sentinel.
		#[allow(non_camel_case_types)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
		pub enum OpCode {
			$($p_ident,)*
			$($x_ident,)*
		}

		impl OpCode {
			pub const fn decode_primary(byte: u8) -> Option<OpCode> {
				match byte {
					$($p_byte => Some(OpCode::$p_ident),)*
					_ => None,
				}
			}

			pub const fn decode_extended(byte: u8) -> Option<OpCode> {
				match byte {
					$($x_byte => Some(OpCode::$x_ident),)*
					_ => None,
				}
			}

			pub const fn operand_form(self) -> OperandForm {
				match self {
					$(OpCode::$p_ident => OperandForm::$p_form,)*
					$(OpCode::$x_ident => OperandForm::$x_form,)*
				}
			}

			/// (needs-prefix, opcode byte)
			pub const fn encoding(self) -> (bool, u8) {
				match self {
					$(OpCode::$p_ident => (false, $p_byte),)*
					$(OpCode::$x_ident => (true, $x_byte),)*
				}
			}

			pub const fn mnemonic(self) -> &'static str {
				match self {
					$(OpCode::$p_ident => stringify!($p_ident),)*
					$(OpCode::$x_ident => stringify!($x_ident),)*
				}
			}
		}
	};
}

define_opcodes! {
	primary {
		nop = 0x00 / None,
		dbg_break = 0x01 / None,
		ldarg_0 = 0x02 / None,
		ldarg_1 = 0x03 / None,
		ldarg_2 = 0x04 / None,
		ldarg_3 = 0x05 / None,
		ldloc_0 = 0x06 / None,
		ldloc_1 = 0x07 / None,
		ldloc_2 = 0x08 / None,
		ldloc_3 = 0x09 / None,
		stloc_0 = 0x0A / None,
		stloc_1 = 0x0B / None,
		stloc_2 = 0x0C / None,
		stloc_3 = 0x0D / None,
		ldarg_s = 0x0E / Byte,
		ldarga_s = 0x0F / Byte,
		starg_s = 0x10 / Byte,
		ldloc_s = 0x11 / Byte,
		ldloca_s = 0x12 / Byte,
		stloc_s = 0x13 / Byte,
		ldnull = 0x14 / None,
		ldc_i4_m1 = 0x15 / None,
		ldc_i4_0 = 0x16 / None,
		ldc_i4_1 = 0x17 / None,
		ldc_i4_2 = 0x18 / None,
		ldc_i4_3 = 0x19 / None,
		ldc_i4_4 = 0x1A / None,
		ldc_i4_5 = 0x1B / None,
		ldc_i4_6 = 0x1C / None,
		ldc_i4_7 = 0x1D / None,
		ldc_i4_8 = 0x1E / None,
		ldc_i4_s = 0x1F / Byte,
		ldc_i4 = 0x20 / Dword,
		ldc_i8 = 0x21 / Qword,
		ldc_r4 = 0x22 / Dword,
		ldc_r8 = 0x23 / Qword,
		dup = 0x25 / None,
		pop = 0x26 / None,
		jmp = 0x27 / MethodToken,
		call = 0x28 / MethodToken,
		calli = 0x29 / Signature,
		ret = 0x2A / None,
		br_s = 0x2B / Byte,
		brfalse_s = 0x2C / Byte,
		brtrue_s = 0x2D / Byte,
		beq_s = 0x2E / Byte,
		bge_s = 0x2F / Byte,
		bgt_s = 0x30 / Byte,
		ble_s = 0x31 / Byte,
		blt_s = 0x32 / Byte,
		bne_un_s = 0x33 / Byte,
		bge_un_s = 0x34 / Byte,
		bgt_un_s = 0x35 / Byte,
		ble_un_s = 0x36 / Byte,
		blt_un_s = 0x37 / Byte,
		br = 0x38 / Dword,
		brfalse = 0x39 / Dword,
		brtrue = 0x3A / Dword,
		beq = 0x3B / Dword,
		bge = 0x3C / Dword,
		bgt = 0x3D / Dword,
		ble = 0x3E / Dword,
		blt = 0x3F / Dword,
		bne_un = 0x40 / Dword,
		bge_un = 0x41 / Dword,
		bgt_un = 0x42 / Dword,
		ble_un = 0x43 / Dword,
		blt_un = 0x44 / Dword,
		switch = 0x45 / Switch,
		ldind_i1 = 0x46 / None,
		ldind_u1 = 0x47 / None,
		ldind_i2 = 0x48 / None,
		ldind_u2 = 0x49 / None,
		ldind_i4 = 0x4A / None,
		ldind_u4 = 0x4B / None,
		ldind_i8 = 0x4C / None,
		ldind_i = 0x4D / None,
		ldind_r4 = 0x4E / None,
		ldind_r8 = 0x4F / None,
		ldind_ref = 0x50 / None,
		stind_ref = 0x51 / None,
		stind_i1 = 0x52 / None,
		stind_i2 = 0x53 / None,
		stind_i4 = 0x54 / None,
		stind_i8 = 0x55 / None,
		stind_r4 = 0x56 / None,
		stind_r8 = 0x57 / None,
		add = 0x58 / None,
		sub = 0x59 / None,
		mul = 0x5A / None,
		div = 0x5B / None,
		div_un = 0x5C / None,
		rem = 0x5D / None,
		rem_un = 0x5E / None,
		and = 0x5F / None,
		or = 0x60 / None,
		xor = 0x61 / None,
		shl = 0x62 / None,
		shr = 0x63 / None,
		shr_un = 0x64 / None,
		neg = 0x65 / None,
		not = 0x66 / None,
		conv_i1 = 0x67 / None,
		conv_i2 = 0x68 / None,
		conv_i4 = 0x69 / None,
		conv_i8 = 0x6A / None,
		conv_r4 = 0x6B / None,
		conv_r8 = 0x6C / None,
		conv_u4 = 0x6D / None,
		conv_u8 = 0x6E / None,
		callvirt = 0x6F / MethodToken,
		cpobj = 0x70 / TypeToken,
		ldobj = 0x71 / TypeToken,
		ldstr = 0x72 / StringToken,
		newobj = 0x73 / MethodToken,
		castclass = 0x74 / AnyToken,
		isinst = 0x75 / TypeToken,
		conv_r_un = 0x76 / None,
		unbox = 0x79 / TypeToken,
		throw = 0x7A / None,
		ldfld = 0x7B / FieldToken,
		ldflda = 0x7C / FieldToken,
		stfld = 0x7D / FieldToken,
		ldsfld = 0x7E / FieldToken,
		ldsflda = 0x7F / FieldToken,
		stsfld = 0x80 / FieldToken,
		stobj = 0x81 / TypeToken,
		conv_ovf_i1_un = 0x82 / None,
		conv_ovf_i2_un = 0x83 / None,
		conv_ovf_i4_un = 0x84 / None,
		conv_ovf_i8_un = 0x85 / None,
		conv_ovf_u1_un = 0x86 / None,
		conv_ovf_u2_un = 0x87 / None,
		conv_ovf_u4_un = 0x88 / None,
		conv_ovf_u8_un = 0x89 / None,
		conv_ovf_i_un = 0x8A / None,
		conv_ovf_u_un = 0x8B / None,
		box_val = 0x8C / TypeToken,
		newarr = 0x8D / TypeToken,
		ldlen = 0x8E / None,
		ldelema = 0x8F / TypeToken,
		ldelem_i1 = 0x90 / None,
		ldelem_u1 = 0x91 / None,
		ldelem_i2 = 0x92 / None,
		ldelem_u2 = 0x93 / None,
		ldelem_i4 = 0x94 / None,
		ldelem_u4 = 0x95 / None,
		ldelem_i8 = 0x96 / None,
		ldelem_i = 0x97 / None,
		ldelem_r4 = 0x98 / None,
		ldelem_r8 = 0x99 / None,
		ldelem_ref = 0x9A / None,
		stelem_i = 0x9B / None,
		stelem_i1 = 0x9C / None,
		stelem_i2 = 0x9D / None,
		stelem_i4 = 0x9E / None,
		stelem_i8 = 0x9F / None,
		stelem_r4 = 0xA0 / None,
		stelem_r8 = 0xA1 / None,
		stelem_ref = 0xA2 / None,
		ldelem = 0xA3 / TypeToken,
		stelem = 0xA4 / TypeToken,
		unbox_any = 0xA5 / TypeToken,
		conv_ovf_i1 = 0xB3 / None,
		conv_ovf_u1 = 0xB4 / None,
		conv_ovf_i2 = 0xB5 / None,
		conv_ovf_u2 = 0xB6 / None,
		conv_ovf_i4 = 0xB7 / None,
		conv_ovf_u4 = 0xB8 / None,
		conv_ovf_i8 = 0xB9 / None,
		conv_ovf_u8 = 0xBA / None,
		refanyval = 0xC2 / TypeToken,
		ckfinite = 0xC3 / None,
		mkrefany = 0xC6 / TypeToken,
		ldtoken = 0xD0 / AnyToken,
		conv_u2 = 0xD1 / None,
		conv_u1 = 0xD2 / None,
		conv_i = 0xD3 / None,
		conv_ovf_i = 0xD4 / None,
		conv_ovf_u = 0xD5 / None,
		add_ovf = 0xD6 / None,
		add_ovf_un = 0xD7 / None,
		mul_ovf = 0xD8 / None,
		mul_ovf_un = 0xD9 / None,
		sub_ovf = 0xDA / None,
		sub_ovf_un = 0xDB / None,
		endfinally = 0xDC / None,
		leave = 0xDD / Dword,
		leave_s = 0xDE / Byte,
		stind_i = 0xDF / None,
		conv_u = 0xE0 / None,
	}
	extended {
		arglist = 0x00 / None,
		ceq = 0x01 / None,
		cgt = 0x02 / None,
		cgt_un = 0x03 / None,
		clt = 0x04 / None,
		clt_un = 0x05 / None,
		ldftn = 0x06 / MethodToken,
		ldvirtftn = 0x07 / MethodToken,
		ldarg = 0x09 / Word,
		ldarga = 0x0A / Word,
		starg = 0x0B / Word,
		ldloc = 0x0C / Word,
		ldloca = 0x0D / Word,
		stloc = 0x0E / Word,
		localloc = 0x0F / None,
		endfilter = 0x11 / None,
		unaligned = 0x12 / Byte,
		volatile = 0x13 / None,
		tail = 0x14 / None,
		initobj = 0x15 / TypeToken,
		constrained = 0x16 / TypeToken,
		cpblk = 0x17 / None,
		initblk = 0x18 / None,
		no_check = 0x19 / Byte,
		rethrow = 0x1A / None,
		size_of = 0x1C / TypeToken,
		refanytype = 0x1D / None,
		readonly = 0x1E / None,
	}
}

/// The extended-page prefix sentinel.
pub const EXTENDED_PREFIX: u8 = 0xFE;

impl OpCode {
	/// Instructions the execution engine has no counterpart for. The
	/// rewriter rejects these with a named error rather than coercing the
	/// operand into something the device would misread.
	pub const fn is_supported(self) -> bool {
		!matches!(
			self,
			OpCode::jmp
				| OpCode::calli
				| OpCode::arglist
				| OpCode::localloc
				| OpCode::cpblk
				| OpCode::initblk
				| OpCode::mkrefany
				| OpCode::refanyval
				| OpCode::refanytype
				| OpCode::tail
				| OpCode::unaligned
				| OpCode::no_check
		)
	}
}

#[derive(Debug)]
pub enum IlFault {
	/// The body ended in the middle of an instruction or operand.
	UnexpectedEnd,
	/// A byte that is no instruction on either page.
	UnknownOpcode(u16),
}

/// Decodes the opcode at the cursor, consuming the prefix byte for
/// extended-page instructions. The operand is left unread.
pub fn read_op(stream: &mut Cursor<&[u8]>) -> Result<OpCode, IlFault> {
	let byte = u8::read(stream).map_err(|_| IlFault::UnexpectedEnd)?;
	if byte == EXTENDED_PREFIX {
		let second = u8::read(stream).map_err(|_| IlFault::UnexpectedEnd)?;
		return OpCode::decode_extended(second)
			.ok_or(IlFault::UnknownOpcode(0xFE00 | second as u16));
	}
	OpCode::decode_primary(byte).ok_or(IlFault::UnknownOpcode(byte as u16))
}

/// Skips a count-prefixed switch target table.
pub fn skip_switch_table(stream: &mut Cursor<&[u8]>) -> Result<(), IlFault> {
	let count = u32::read(stream).map_err(|_| IlFault::UnexpectedEnd)?;
	let bytes = (count as u64).checked_mul(4).ok_or(IlFault::UnexpectedEnd)?;
	let end = stream.position().checked_add(bytes).ok_or(IlFault::UnexpectedEnd)?;
	if end > stream.get_ref().len() as u64 {
		return Err(IlFault::UnexpectedEnd);
	}
	stream.set_position(end);
	Ok(())
}

/// Straight-line emitter for synthesized bodies. Everything it writes is
/// already in image tokens, so emitted code never passes through the
/// rewriter.
#[derive(Default)]
pub struct Emitter {
	code: Vec<u8>,
}

impl Emitter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn op(&mut self, op: OpCode) -> &mut Self {
		let (prefixed, byte) = op.encoding();
		if prefixed {
			self.code.push(EXTENDED_PREFIX);
		}
		self.code.push(byte);
		self
	}

	pub fn token(&mut self, token: ImageToken) -> &mut Self {
		self.code.extend_from_slice(&token.raw().to_le_bytes());
		self
	}

	pub fn u32(&mut self, value: u32) -> &mut Self {
		self.code.extend_from_slice(&value.to_le_bytes());
		self
	}

	/// Loads argument `n` using the shortest encoding.
	pub fn ldarg(&mut self, n: u16) -> &mut Self {
		match n {
			0 => self.op(OpCode::ldarg_0),
			1 => self.op(OpCode::ldarg_1),
			2 => self.op(OpCode::ldarg_2),
			3 => self.op(OpCode::ldarg_3),
			4..=255 => {
				self.op(OpCode::ldarg_s);
				self.code.push(n as u8);
				self
			}
			_ => {
				self.op(OpCode::ldarg);
				self.code.extend_from_slice(&n.to_le_bytes());
				self
			}
		}
	}

	pub fn finish(self) -> Vec<u8> {
		self.code
	}
}

/// Formats rewritten bytecode as one mnemonic per line with hex operands,
/// for `Debug` dumps of image methods.
pub(crate) fn debug_code(bytes: &[u8], fmt: &mut Formatter) -> std::fmt::Result {
	let mut stream = Cursor::new(bytes);
	let mut dbg = fmt.debug_list();
	loop {
		let offset = stream.position();
		if offset == bytes.len() as u64 {
			break;
		}
		let Ok(op) = read_op(&mut stream) else {
			dbg.entry(&format_args!("IL_{offset:04X}\t??"));
			break;
		};
		let form = op.operand_form();
		let operand = match form {
			OperandForm::Switch => {
				if skip_switch_table(&mut stream).is_err() {
					break;
				}
				String::from("...")
			}
			_ => {
				let len = form.fixed_len();
				let start = stream.position() as usize;
				let Some(slice) = bytes.get(start..start + len) else { break };
				stream.set_position((start + len) as u64);
				slice.iter().rev().map(|b| format!("{b:02X}")).collect()
			}
		};
		match operand.is_empty() {
			true => dbg.entry(&format_args!("IL_{offset:04X}\t{}", op.mnemonic())),
			false => dbg.entry(&format_args!("IL_{offset:04X}\t{} 0x{operand}", op.mnemonic())),
		};
	}
	dbg.finish()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_token_form_is_four_bytes() {
		for form in [
			OperandForm::StringToken,
			OperandForm::MethodToken,
			OperandForm::FieldToken,
			OperandForm::TypeToken,
			OperandForm::AnyToken,
		] {
			assert!(form.is_token());
			assert_eq!(form.fixed_len(), 4);
		}
	}

	#[test]
	fn extended_page_round_trips_through_the_prefix() {
		let (prefixed, byte) = OpCode::ldftn.encoding();
		assert!(prefixed);
		let code = [EXTENDED_PREFIX, byte];
		let mut stream = Cursor::new(&code[..]);
		assert_eq!(read_op(&mut stream).unwrap(), OpCode::ldftn);
	}

	#[test]
	fn rejected_subset_is_marked_unsupported() {
		for op in [OpCode::jmp, OpCode::calli, OpCode::localloc, OpCode::tail, OpCode::cpblk] {
			assert!(!op.is_supported(), "{}", op.mnemonic());
		}
		assert!(OpCode::constrained.is_supported());
		assert!(OpCode::volatile.is_supported());
	}

	#[test]
	fn switch_table_skip_lands_past_the_targets() {
		let mut code = vec![OpCode::switch.encoding().1];
		code.extend_from_slice(&2u32.to_le_bytes());
		code.extend_from_slice(&5i32.to_le_bytes());
		code.extend_from_slice(&9i32.to_le_bytes());
		code.push(OpCode::ret.encoding().1);
		let mut stream = Cursor::new(&code[..]);
		assert_eq!(read_op(&mut stream).unwrap(), OpCode::switch);
		skip_switch_table(&mut stream).unwrap();
		assert_eq!(read_op(&mut stream).unwrap(), OpCode::ret);
	}
}
