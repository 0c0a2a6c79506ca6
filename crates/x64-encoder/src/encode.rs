//! Byte encoder: REX prefix computation, ModR/M packing, and the
//! per-opcode instruction layouts.
//!
//! Ported near-literally from the reference x86-64 backend this crate's
//! instruction set distills: each `encode_*` function here corresponds to
//! one opcode family there, including its quirks (8-bit-only arithmetic
//! immediates, no SIB support, 8-bit branch displacements only).

use alloc::vec::Vec;

use crate::inst::{EncodingError, MachineInst, Opcode, Operand};
use crate::regs::Reg;

/// An instruction's encoded bytes. x86-64 instructions are variable
/// length; 16 bytes comfortably bounds everything this encoder emits
/// (the longest case here, a `mov` with a 64-bit immediate, is 10).
#[derive(Debug, Clone, Copy)]
pub struct EncodedInst {
    bytes: [u8; 16],
    len: u8,
}

impl EncodedInst {
    fn empty() -> Self {
        Self { bytes: [0; 16], len: 0 }
    }

    fn push(&mut self, byte: u8) {
        self.bytes[self.len as usize] = byte;
        self.len += 1;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn emit_mod_rm(mod_: u8, reg: u8, rm: u8) -> u8 {
    ((mod_ & 0b11) << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

fn reg_operand(operand: Option<Operand>) -> Reg {
    match operand {
        Some(Operand::Reg(reg)) => reg,
        other => panic!("expected a register operand, got {other:?}"),
    }
}

fn encode_arith(inst: &MachineInst) -> Result<EncodedInst, EncodingError> {
    assert!(matches!(inst.operand_width, 16 | 32 | 64));
    let lhs = reg_operand(inst.operands[0]);
    let mut out = EncodedInst::empty();
    let mut rex: u8 = 0x40;
    if inst.operand_width == 16 {
        out.push(0x66);
    } else if inst.operand_width == 64 {
        rex |= 1 << 3; // REX.W
    }
    if lhs.is_extended() {
        rex |= 1 << 0; // REX.B
    }
    match inst.operands[1] {
        Some(Operand::BaseDisp { base, disp }) => {
            if rex & 1 != 0 {
                rex &= !1;
                rex |= 1 << 2; // REX.R
            }
            if base.is_extended() {
                rex |= 1 << 0; // REX.B
            }
            if rex != 0x40 {
                out.push(rex);
            }
            out.push(match inst.opcode {
                Opcode::Add => 0x03,
                Opcode::Sub => 0x2b,
                _ => 0x3b,
            });
            out.push(emit_mod_rm(0b01, lhs.low3(), base.low3()));
            out.push(disp as u8);
        }
        Some(Operand::Imm(imm)) => {
            let rhs = (imm & 0xff) as u8;
            if rhs > 0x7f {
                return Err(EncodingError::ImmediateOutOfRange { opcode: inst.opcode, value: imm });
            }
            if rex != 0x40 {
                out.push(rex);
            }
            out.push(0x83);
            let extension = match inst.opcode {
                Opcode::Cmp => 7,
                Opcode::Sub => 5,
                _ => 0,
            };
            out.push(emit_mod_rm(0b11, extension, lhs.low3()));
            out.push(rhs);
        }
        Some(Operand::Reg(rhs)) => {
            if rhs.is_extended() {
                rex |= 1 << 2; // REX.R
            }
            if rex != 0x40 {
                out.push(rex);
            }
            out.push(match inst.opcode {
                Opcode::Add => 0x01,
                Opcode::Sub => 0x29,
                _ => 0x39,
            });
            out.push(emit_mod_rm(0b11, rhs.low3(), lhs.low3()));
        }
        other => panic!("invalid arith rhs operand {other:?}"),
    }
    Ok(out)
}

fn encode_leave(_inst: &MachineInst) -> EncodedInst {
    let mut out = EncodedInst::empty();
    out.push(0xc9);
    out
}

fn encode_mov(inst: &MachineInst) -> EncodedInst {
    assert!(matches!(inst.operand_width, 16 | 32 | 64));
    let (mod_, mut dst) = match inst.operands[0] {
        Some(Operand::BaseDisp { base, .. }) => (0b01, base),
        Some(Operand::Reg(reg)) => (0b11, reg),
        other => panic!("invalid mov destination {other:?}"),
    };

    let mut out = EncodedInst::empty();
    let mut rex: u8 = 0x40;
    if inst.operand_width == 16 {
        out.push(0x66);
    } else if inst.operand_width == 64 {
        rex |= 1 << 3; // REX.W
    }
    if dst.is_extended() {
        rex |= 1 << 0; // REX.B
    }

    match inst.operands[1] {
        Some(Operand::BaseDisp { base, disp }) => {
            if rex & 1 != 0 {
                rex &= !1;
                rex |= 1 << 2; // REX.R
            }
            if base.is_extended() {
                rex |= 1 << 0; // REX.B
            }
            if rex != 0x40 {
                out.push(rex);
            }
            out.push(0x8b);
            out.push(emit_mod_rm(0b01, dst.low3(), base.low3()));
            out.push(disp as u8);
        }
        Some(Operand::Imm(imm)) => {
            let as_reg_immediate = matches!(inst.operands[0], Some(Operand::Reg(_)));
            let dst_low = dst.low3();
            if dst.is_extended() {
                dst = Reg::new(dst_low);
            }
            if rex != 0x40 {
                out.push(rex);
            }
            if as_reg_immediate {
                out.push(0xb8 + dst.num());
            } else {
                out.push(0xc7);
                out.push(emit_mod_rm(mod_, 0, dst.num()));
            }
            let width = inst.operand_width;
            out.push((imm & 0xff) as u8);
            out.push(((imm >> 8) & 0xff) as u8);
            if width >= 32 {
                out.push(((imm >> 16) & 0xff) as u8);
                out.push(((imm >> 24) & 0xff) as u8);
            }
            if width >= 64 {
                out.push(((imm >> 32) & 0xff) as u8);
                out.push(((imm >> 40) & 0xff) as u8);
                out.push(((imm >> 48) & 0xff) as u8);
                out.push(((imm >> 56) & 0xff) as u8);
            }
            return finish_mov_disp(out, inst);
        }
        Some(Operand::Reg(src)) => {
            if src.is_extended() {
                rex |= 1 << 2; // REX.R
            }
            if rex != 0x40 {
                out.push(rex);
            }
            out.push(0x89);
            out.push(emit_mod_rm(mod_, src.low3(), dst.low3()));
        }
        other => panic!("invalid mov source {other:?}"),
    }
    finish_mov_disp(out, inst)
}

fn finish_mov_disp(mut out: EncodedInst, inst: &MachineInst) -> EncodedInst {
    if let Some(Operand::BaseDisp { disp, .. }) = inst.operands[0] {
        out.push(disp as u8);
    }
    out
}

fn encode_pop(inst: &MachineInst) -> EncodedInst {
    assert_eq!(inst.operand_width, 64);
    let reg = reg_operand(inst.operands[0]);
    let mut out = EncodedInst::empty();
    if reg.is_extended() {
        out.push(0x41); // REX.B
    }
    out.push(0x58 + reg.low3());
    out
}

fn encode_push(inst: &MachineInst) -> EncodedInst {
    assert_eq!(inst.operand_width, 64);
    let reg = reg_operand(inst.operands[0]);
    let mut out = EncodedInst::empty();
    if reg.is_extended() {
        out.push(0x41); // REX.B
    }
    out.push(0x50 + reg.low3());
    out
}

fn encode_ret(_inst: &MachineInst) -> EncodedInst {
    let mut out = EncodedInst::empty();
    out.push(0xc3);
    out
}

fn off_operand(operand: Option<Operand>) -> i32 {
    match operand {
        Some(Operand::Off(off)) => off,
        other => panic!("expected a branch/call offset operand, got {other:?}"),
    }
}

fn encode_call(inst: &MachineInst) -> EncodedInst {
    let off = (off_operand(inst.operands[0]) as i64 & 0xffff_ffff) - 5;
    let off = off as u32;
    let mut out = EncodedInst::empty();
    out.push(0xe8);
    out.push((off & 0xff) as u8);
    out.push(((off >> 8) & 0xff) as u8);
    out.push(((off >> 16) & 0xff) as u8);
    out.push(((off >> 24) & 0xff) as u8);
    out
}

fn encode_short_branch(opcode_byte: u8, inst: &MachineInst) -> Result<EncodedInst, EncodingError> {
    let off = off_operand(inst.operands[0]);
    let displacement = off - 2;
    if !(i8::MIN as i32..=i8::MAX as i32).contains(&displacement) {
        return Err(EncodingError::BranchOutOfRange { opcode: inst.opcode, displacement });
    }
    let mut out = EncodedInst::empty();
    out.push(opcode_byte);
    out.push(displacement as u8);
    Ok(out)
}

fn encode_setcc(inst: &MachineInst) -> EncodedInst {
    assert_eq!(inst.operand_width, 8);
    let mut reg = reg_operand(inst.operands[0]);
    let mut out = EncodedInst::empty();
    if reg.num() >= 4 {
        out.push(if reg.is_extended() { 0x41 } else { 0x40 });
    }
    if reg.is_extended() {
        reg = Reg::new(reg.low3());
    }
    out.push(0x0f);
    out.push(match inst.opcode {
        Opcode::Sete => 0x94,
        Opcode::Setne => 0x95,
        Opcode::Setl => 0x9c,
        Opcode::Setg => 0x9f,
        Opcode::Setle => 0x9e,
        Opcode::Setge => 0x9d,
        other => panic!("{other:?} is not a setcc opcode"),
    });
    out.push(emit_mod_rm(0b11, 0, reg.num()));
    out
}

/// Encode one instruction. Panics if `inst`'s operands do not have the
/// *shape* its opcode expects (e.g. a register where a displacement was
/// required) -- the instruction selector is responsible for never producing
/// such a `MachineInst`. Returns `Err` for the data-dependent violations
/// named in §7: an immediate or branch displacement that does not fit.
pub fn encode(inst: &MachineInst) -> Result<EncodedInst, EncodingError> {
    match inst.opcode {
        Opcode::Add | Opcode::Sub | Opcode::Cmp => encode_arith(inst),
        Opcode::Leave => Ok(encode_leave(inst)),
        Opcode::Mov => Ok(encode_mov(inst)),
        Opcode::Pop => Ok(encode_pop(inst)),
        Opcode::Push => Ok(encode_push(inst)),
        Opcode::Ret => Ok(encode_ret(inst)),
        Opcode::Call => Ok(encode_call(inst)),
        Opcode::Je => encode_short_branch(0x74, inst),
        Opcode::Jmp => encode_short_branch(0xeb, inst),
        Opcode::Jne => encode_short_branch(0x75, inst),
        Opcode::Sete | Opcode::Setne | Opcode::Setl | Opcode::Setg | Opcode::Setle | Opcode::Setge => {
            Ok(encode_setcc(inst))
        }
    }
}

/// Encode a whole instruction stream into a flat byte buffer.
pub fn encode_all(insts: &[MachineInst]) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::new();
    for inst in insts {
        out.extend_from_slice(encode(inst)?.as_slice());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::MachineInst;

    #[test]
    fn mov_eax_imm32_then_ret_matches_expected_bytes() {
        let mov = MachineInst::new(Opcode::Mov, 32)
            .with_operand(0, Operand::Reg(Reg::RAX))
            .with_operand(1, Operand::Imm(42));
        let ret = MachineInst::new(Opcode::Ret, 64);
        let bytes = encode_all(&[mov, ret]).unwrap();
        assert_eq!(bytes, alloc::vec![0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3]);
    }

    #[test]
    fn add_reg_reg_64_sets_rex_w() {
        let add = MachineInst::new(Opcode::Add, 64)
            .with_operand(0, Operand::Reg(Reg::RDI))
            .with_operand(1, Operand::Reg(Reg::RSI));
        let bytes = encode(&add).unwrap();
        assert_eq!(bytes.as_slice(), &[0x48, 0x01, 0xf7]);
    }

    #[test]
    fn add_with_extended_register_sets_rex_b() {
        let add = MachineInst::new(Opcode::Add, 64)
            .with_operand(0, Operand::Reg(Reg::R8))
            .with_operand(1, Operand::Reg(Reg::RAX));
        let bytes = encode(&add).unwrap();
        assert_eq!(bytes.as_slice(), &[0x49, 0x01, 0xc0]);
    }

    #[test]
    fn call_rel32_subtracts_instruction_length() {
        let call = MachineInst::new(Opcode::Call, 64).with_operand(0, Operand::Off(10));
        let bytes = encode(&call).unwrap();
        assert_eq!(bytes.as_slice(), &[0xe8, 0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn je_short_subtracts_two() {
        let je = MachineInst::new(Opcode::Je, 64).with_operand(0, Operand::Off(7));
        let bytes = encode(&je).unwrap();
        assert_eq!(bytes.as_slice(), &[0x74, 0x05]);
    }

    #[test]
    fn setcc_on_low_register_needs_no_rex() {
        let sete = MachineInst::new(Opcode::Sete, 8).with_operand(0, Operand::Reg(Reg::RAX));
        let bytes = encode(&sete).unwrap();
        assert_eq!(bytes.as_slice(), &[0x0f, 0x94, 0xc0]);
    }

    #[test]
    fn setcc_on_byte_regs_4_to_7_needs_bare_rex() {
        let setl = MachineInst::new(Opcode::Setl, 8).with_operand(0, Operand::Reg(Reg::RSP));
        let bytes = encode(&setl).unwrap();
        assert_eq!(bytes.as_slice(), &[0x40, 0x0f, 0x9c, 0xc4]);
    }

    #[test]
    fn ret_is_a_single_byte() {
        let bytes = encode(&MachineInst::new(Opcode::Ret, 64)).unwrap();
        assert_eq!(bytes.as_slice(), &[0xc3]);
    }
}
