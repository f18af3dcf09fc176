//! VFP instruction decode and the pre-decoded instruction record.
//!
//! The host ARM core hands us a 32-bit word it has already identified as a
//! CP10/CP11 co-processor instruction. [`try_decode`] matches it against
//! the declarative pattern table and materialises an immutable
//! [`CachedInstr`] carrying the operand projection the dispatcher needs;
//! arithmetic (CDP) entries stay raw because the soft-float kernels
//! re-extract their own fields.

mod table;

/// Pre-decoded instruction cache keyed by basic-block index
pub mod cache;

pub use cache::InstrCache;

use table::DECODE_TABLE;

/// VFP opcode identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Vmla,
    Vmls,
    Vnmla,
    Vnmls,
    Vnmul,
    Vmul,
    Vadd,
    Vsub,
    Vdiv,
    Vmovi,
    Vmovr,
    Vabs,
    Vneg,
    Vsqrt,
    Vcmp,
    Vcmp2,
    Vcvtbds,
    Vcvtbff,
    Vcvtbfi,
    Vmovbrs,
    Vmsr,
    Vmovbrc,
    Vmrs,
    Vmovbcr,
    Vmovbrrss,
    Vmovbrrd,
    Vstr,
    Vpush,
    Vstm,
    Vpop,
    Vldr,
    Vldm,
}

/// Operand projection attached to a cached instruction, by opcode class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    /// CDP arithmetic: the kernel re-extracts everything from the raw word
    Arith {
        /// Double-precision operation (bit 8)
        dp: bool,
    },
    /// VMOV immediate
    MoveImm {
        single: bool,
        /// Destination in the selected view
        d: u8,
        /// Expanded immediate; for doubles this is the high word, the low
        /// word is zero
        imm: u32,
    },
    /// VMOV register to register
    MoveReg { single: bool, d: u8, m: u8 },
    /// VMOV between one ARM register and one single register
    CoreSingle {
        to_arm: bool,
        /// ARM register
        t: u8,
        /// Single-precision register
        n: u8,
    },
    /// VMRS/VMSR system register access
    Status {
        /// System register index (`reg` field)
        reg: u8,
        /// ARM register
        rt: u8,
    },
    /// VMOV between two ARM registers and one double register
    CorePairDouble { to_arm: bool, t: u8, t2: u8, m: u8 },
    /// Lane-indexed scalar moves, recognised but not implemented
    Lane,
    /// VLDR/VSTR
    TransferOne {
        single: bool,
        is_load: bool,
        /// ARM base register
        n: u8,
        /// Extension register in the selected view
        d: u8,
        imm32: u32,
        add: bool,
    },
    /// VLDM/VSTM and the normalised VPUSH/VPOP forms
    TransferMany {
        single: bool,
        is_load: bool,
        add: bool,
        wback: bool,
        d: u8,
        n: u8,
        imm32: u32,
        regs: u8,
    },
}

/// An immutable pre-decoded instruction, produced once per encountered
/// word and cached by basic-block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedInstr {
    /// Opcode identifier
    pub opcode: Opcode,
    /// Condition field, bits 31:28
    pub cond: u8,
    /// The raw instruction word
    pub raw: u32,
    /// Projected operands
    pub operands: Operands,
}

fn bits(word: u32, lo: u8, hi: u8) -> u32 {
    (word >> lo) & (u32::MAX >> (31 - (hi - lo)))
}

fn bit(word: u32, index: u8) -> u32 {
    (word >> index) & 1
}

/// Match a word against the table. Returns the winning opcode, resolving
/// overlapping rows in favour of the one constraining the most bits.
fn match_word(word: u32) -> Option<Opcode> {
    let mut best: Option<(Opcode, u32)> = None;
    for row in DECODE_TABLE {
        let included = row
            .include
            .iter()
            .all(|field| bits(word, field.lo, field.hi) == field.value);
        if !included {
            continue;
        }
        let excluded = row
            .exclude
            .iter()
            .any(|field| bits(word, field.lo, field.hi) == field.value);
        if excluded {
            continue;
        }
        let width: u32 = row
            .include
            .iter()
            .map(|field| (field.hi - field.lo + 1) as u32)
            .sum();
        match best {
            Some((_, best_width)) if best_width >= width => {}
            _ => best = Some((row.opcode, width)),
        }
    }
    best.map(|(opcode, _)| opcode)
}

/// Extension register index in the single view: `Vx:x` composition.
fn sreg(word: u32, vlo: u8, extra: u8) -> u8 {
    (bits(word, vlo, vlo + 3) << 1 | bit(word, extra)) as u8
}

/// Extension register index in the double view: `x:Vx` composition.
fn dreg(word: u32, vlo: u8, extra: u8) -> u8 {
    (bits(word, vlo, vlo + 3) | bit(word, extra) << 4) as u8
}

/// Expand the 8-bit VMOV immediate to the encoded constant (the high word
/// for doubles; their low word is zero).
fn expand_imm(word: u32, single: bool) -> u32 {
    let imm8 = bits(word, 16, 19) << 4 | bits(word, 0, 3);
    let sign = bit(imm8, 7) << 31;
    let not6 = (bit(imm8, 6) ^ 1) << 30;
    if single {
        sign | not6 | (if bit(imm8, 6) != 0 { 0x1F } else { 0 }) << 25 | bits(imm8, 0, 5) << 19
    } else {
        sign | not6 | (if bit(imm8, 6) != 0 { 0xFF } else { 0 }) << 22 | bits(imm8, 0, 5) << 16
    }
}

fn project(opcode: Opcode, word: u32) -> Operands {
    use Opcode::*;
    match opcode {
        Vmla | Vmls | Vnmla | Vnmls | Vnmul | Vmul | Vadd | Vsub | Vdiv | Vabs | Vneg | Vsqrt
        | Vcmp | Vcmp2 | Vcvtbds | Vcvtbff | Vcvtbfi => Operands::Arith {
            dp: bit(word, 8) != 0,
        },
        Vmovi => {
            let single = bit(word, 8) == 0;
            Operands::MoveImm {
                single,
                d: if single { sreg(word, 12, 22) } else { dreg(word, 12, 22) },
                imm: expand_imm(word, single),
            }
        }
        Vmovr => {
            let single = bit(word, 8) == 0;
            if single {
                Operands::MoveReg {
                    single,
                    d: sreg(word, 12, 22),
                    m: sreg(word, 0, 5),
                }
            } else {
                Operands::MoveReg {
                    single,
                    d: dreg(word, 12, 22),
                    m: dreg(word, 0, 5),
                }
            }
        }
        Vmovbrs => Operands::CoreSingle {
            to_arm: bit(word, 20) != 0,
            t: bits(word, 12, 15) as u8,
            n: sreg(word, 16, 7),
        },
        Vmsr | Vmrs => Operands::Status {
            reg: bits(word, 16, 19) as u8,
            rt: bits(word, 12, 15) as u8,
        },
        Vmovbrrd => Operands::CorePairDouble {
            to_arm: bit(word, 20) != 0,
            t: bits(word, 12, 15) as u8,
            t2: bits(word, 16, 19) as u8,
            m: dreg(word, 0, 5),
        },
        Vmovbrc | Vmovbcr | Vmovbrrss => Operands::Lane,
        Vstr | Vldr => {
            let single = bit(word, 8) == 0;
            Operands::TransferOne {
                single,
                is_load: opcode == Vldr,
                n: bits(word, 16, 19) as u8,
                d: if single { sreg(word, 12, 22) } else { dreg(word, 12, 22) },
                imm32: bits(word, 0, 7) << 2,
                add: bit(word, 23) != 0,
            }
        }
        Vstm | Vldm => {
            let single = bit(word, 8) == 0;
            Operands::TransferMany {
                single,
                is_load: opcode == Vldm,
                add: bit(word, 23) != 0,
                wback: bit(word, 21) != 0,
                d: if single { sreg(word, 12, 22) } else { dreg(word, 12, 22) },
                n: bits(word, 16, 19) as u8,
                imm32: bits(word, 0, 7) << 2,
                regs: transfer_regs(word, single),
            }
        }
        Vpush | Vpop => {
            let single = bit(word, 8) == 0;
            Operands::TransferMany {
                single,
                is_load: opcode == Vpop,
                // Pre-decrement push, post-increment pop, writeback always on
                add: opcode == Vpop,
                wback: true,
                d: if single { sreg(word, 12, 22) } else { dreg(word, 12, 22) },
                n: 13,
                imm32: bits(word, 0, 7) << 2,
                regs: transfer_regs(word, single),
            }
        }
    }
}

fn transfer_regs(word: u32, single: bool) -> u8 {
    if single {
        bits(word, 0, 7) as u8
    } else {
        if bit(word, 0) != 0 {
            // Deprecated FSTMX/FLDMX form; executed as the even transfer
            log::warn!(
                "deprecated FSTMX/FLDMX encoding {:#010x}, odd word ignored",
                word
            );
        }
        bits(word, 1, 7) as u8
    }
}

/// Decode a CP10/CP11 word. Returns `None` when it is not a VFP
/// instruction this emulator knows.
pub fn try_decode(word: u32) -> Option<CachedInstr> {
    let opcode = match_word(word)?;
    Some(CachedInstr {
        opcode,
        cond: bits(word, 28, 31) as u8,
        raw: word,
        operands: project(opcode, word),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0xEE000A81, Opcode::Vmla)]
    #[test_case(0xEE011B00, Opcode::Vmla)]
    #[test_case(0xEE000AC1, Opcode::Vmls)]
    #[test_case(0xEE111A00, Opcode::Vnmls)]
    #[test_case(0xEE111A40, Opcode::Vnmla)]
    #[test_case(0xEE211A00, Opcode::Vmul)]
    #[test_case(0xEE211A40, Opcode::Vnmul)]
    #[test_case(0xEE300A81, Opcode::Vadd)]
    #[test_case(0xEE300AC1, Opcode::Vsub)]
    #[test_case(0xEE800A01, Opcode::Vdiv)]
    #[test_case(0xEEB70A00, Opcode::Vmovi)]
    #[test_case(0xEEB00A41, Opcode::Vmovr)]
    #[test_case(0xEEB00AC1, Opcode::Vabs)]
    #[test_case(0xEEB10A41, Opcode::Vneg)]
    #[test_case(0xEEB10AC2, Opcode::Vsqrt)]
    #[test_case(0xEEB40A41, Opcode::Vcmp)]
    #[test_case(0xEEB50A40, Opcode::Vcmp2)]
    #[test_case(0xEEB70AC1, Opcode::Vcvtbds)]
    #[test_case(0xEEBA0ACB, Opcode::Vcvtbff)]
    #[test_case(0xEEB80A41, Opcode::Vcvtbfi)]
    #[test_case(0xEE001A10, Opcode::Vmovbrs)]
    #[test_case(0xEEE11A10, Opcode::Vmsr)]
    #[test_case(0xEEF11A10, Opcode::Vmrs)]
    #[test_case(0xEC410B10, Opcode::Vmovbrrd)]
    #[test_case(0xEC410A10, Opcode::Vmovbrrss)]
    #[test_case(0xEE001B10, Opcode::Vmovbrc)]
    #[test_case(0xEE101B10, Opcode::Vmovbcr)]
    #[test_case(0xED8D0A01, Opcode::Vstr)]
    #[test_case(0xED9D0A01, Opcode::Vldr)]
    #[test_case(0xED2D0A02, Opcode::Vpush)]
    #[test_case(0xECBD0A02, Opcode::Vpop)]
    #[test_case(0xEC830A02, Opcode::Vstm)]
    #[test_case(0xEC930A02, Opcode::Vldm)]
    fn test_decode_opcode(word: u32, expected: Opcode) {
        let instr = try_decode(word).expect("should decode");
        assert_eq!(instr.opcode, expected);
        assert_eq!(instr.raw, word);
    }

    #[test_case(0xE0800001; "integer add")]
    #[test_case(0xE5900000; "integer ldr")]
    #[test_case(0xEE100F10; "cp15 mrc")]
    fn test_decode_miss(word: u32) {
        assert!(try_decode(word).is_none());
    }

    #[test]
    fn test_decode_uniqueness_over_matching_words() {
        // Every word the table accepts yields exactly one opcode; spot-check
        // the overlapping transfer space where VPUSH/VSTR shadow VSTM.
        let instr = try_decode(0xED2D0A02).unwrap();
        assert_eq!(instr.opcode, Opcode::Vpush);
        let instr = try_decode(0xED8D0A01).unwrap();
        assert_eq!(instr.opcode, Opcode::Vstr);
        let instr = try_decode(0xEC830A02).unwrap();
        assert_eq!(instr.opcode, Opcode::Vstm);
    }

    #[test]
    fn test_project_vmla_keeps_raw() {
        let instr = try_decode(0xEE011B00).unwrap();
        assert_eq!(instr.operands, Operands::Arith { dp: true });
        let instr = try_decode(0xEE000A81).unwrap();
        assert_eq!(instr.operands, Operands::Arith { dp: false });
    }

    // VMOV.F32 S0, #1.0 -> imm8 = 0x70
    #[test]
    fn test_project_vmovi_single() {
        let instr = try_decode(0xEEB70A00).unwrap();
        match instr.operands {
            Operands::MoveImm { single, d, imm } => {
                assert!(single);
                assert_eq!(d, 0);
                assert_eq!(imm, 0x3F80_0000);
            }
            other => panic!("unexpected operands {:?}", other),
        }
    }

    // VMOV.F64 D1, #-2.0 -> imm8 = 0x80
    #[test]
    fn test_project_vmovi_double() {
        let instr = try_decode(0xEEB81B00).unwrap();
        match instr.operands {
            Operands::MoveImm { single, d, imm } => {
                assert!(!single);
                assert_eq!(d, 1);
                assert_eq!(imm, 0xC000_0000);
            }
            other => panic!("unexpected operands {:?}", other),
        }
    }

    /// Reference immediate expansion straight from the pseudo-code, used to
    /// cross-check the table-driven one for every imm8.
    fn expand_imm_reference(imm8: u32, single: bool) -> u32 {
        let sign = (imm8 >> 7) & 1;
        let b6 = (imm8 >> 6) & 1;
        let low = imm8 & 0x3F;
        if single {
            sign << 31 | (b6 ^ 1) << 30 | (if b6 != 0 { 0x1F } else { 0 }) << 25 | low << 19
        } else {
            sign << 31 | (b6 ^ 1) << 30 | (if b6 != 0 { 0xFF } else { 0 }) << 22 | low << 16
        }
    }

    #[test]
    fn test_vmovi_expansion_all_imm8() {
        for imm8 in 0u32..=0xFF {
            let word = 0xEEB00A00 | (imm8 >> 4) << 16 | (imm8 & 0xF);
            match try_decode(word).unwrap().operands {
                Operands::MoveImm { imm, .. } => {
                    assert_eq!(imm, expand_imm_reference(imm8, true), "imm8={:#04x}", imm8)
                }
                other => panic!("unexpected operands {:?}", other),
            }
            let word = 0xEEB00B00 | (imm8 >> 4) << 16 | (imm8 & 0xF);
            match try_decode(word).unwrap().operands {
                Operands::MoveImm { imm, .. } => {
                    assert_eq!(imm, expand_imm_reference(imm8, false), "imm8={:#04x}", imm8)
                }
                other => panic!("unexpected operands {:?}", other),
            }
        }
    }

    #[test]
    fn test_project_vmovbrs() {
        // VMOV S3, R2
        let instr = try_decode(0xEE012A90).unwrap();
        assert_eq!(instr.opcode, Opcode::Vmovbrs);
        assert_eq!(
            instr.operands,
            Operands::CoreSingle {
                to_arm: false,
                t: 2,
                n: 3,
            }
        );
    }

    #[test]
    fn test_project_vpush_normalised() {
        let instr = try_decode(0xED2D0A02).unwrap();
        assert_eq!(
            instr.operands,
            Operands::TransferMany {
                single: true,
                is_load: false,
                add: false,
                wback: true,
                d: 0,
                n: 13,
                imm32: 8,
                regs: 2,
            }
        );
    }

    #[test]
    fn test_project_vldr_pc_relative() {
        // VLDR S1, [PC, #-8]
        let instr = try_decode(0xED5F0A02).unwrap();
        assert_eq!(
            instr.operands,
            Operands::TransferOne {
                single: true,
                is_load: true,
                n: 15,
                d: 1,
                imm32: 8,
                add: false,
            }
        );
    }

    #[test]
    fn test_project_fstmx_flagged_but_accepted() {
        // FSTMIAX R0, {D0-D1}: double with odd imm8
        let instr = try_decode(0xEC800B05).unwrap();
        match instr.operands {
            Operands::TransferMany { single, regs, .. } => {
                assert!(!single);
                assert_eq!(regs, 2);
            }
            other => panic!("unexpected operands {:?}", other),
        }
    }

    #[test]
    fn test_cond_field_extracted() {
        // Condition NE on a VMRS
        let instr = try_decode(0x1EF11A10).unwrap();
        assert_eq!(instr.cond, 0x1);
    }
}
