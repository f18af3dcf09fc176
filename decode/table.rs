//! Declarative VFP decode table.
//!
//! Each opcode is described by a list of bit-field constraints and an
//! optional exclusion list, replacing the per-opcode decode scaffolding of
//! the interpreter this table was lifted from. A word matches a row when
//! every inclusion field holds and no exclusion field does; when several
//! rows match, the row constraining the most bits wins.

use super::Opcode;

/// One `(lo..=hi) == value` constraint on a 32-bit word.
#[derive(Debug, Clone, Copy)]
pub(super) struct FieldMatch {
    pub lo: u8,
    pub hi: u8,
    pub value: u32,
}

/// A decode table row.
pub(super) struct EncodingRow {
    pub opcode: Opcode,
    pub include: &'static [FieldMatch],
    pub exclude: &'static [FieldMatch],
}

const fn f(lo: u8, hi: u8, value: u32) -> FieldMatch {
    FieldMatch { lo, hi, value }
}

const fn row(
    opcode: Opcode,
    include: &'static [FieldMatch],
    exclude: &'static [FieldMatch],
) -> EncodingRow {
    EncodingRow {
        opcode,
        include,
        exclude,
    }
}

/// The VFP decode table. CDP arithmetic first, then register transfers,
/// then loads and stores; the more tightly constrained rows (VPUSH/VPOP,
/// VLDR/VSTR, MCRR/MRRC forms) shadow the loose VLDM/VSTM rows through the
/// constrained-bit count.
pub(super) static DECODE_TABLE: &[EncodingRow] = &[
    // cond 1110 0D00 Vn Vd 101x N0M0 Vm
    row(
        Opcode::Vmla,
        &[f(23, 27, 0x1C), f(20, 21, 0x0), f(9, 11, 0x5), f(6, 6, 0), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vmls,
        &[f(23, 27, 0x1C), f(20, 21, 0x0), f(9, 11, 0x5), f(6, 6, 1), f(4, 4, 0)],
        &[],
    ),
    // cond 1110 0D01 Vn Vd 101x N1M0 Vm
    row(
        Opcode::Vnmla,
        &[f(23, 27, 0x1C), f(20, 21, 0x1), f(9, 11, 0x5), f(6, 6, 1), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vnmls,
        &[f(23, 27, 0x1C), f(20, 21, 0x1), f(9, 11, 0x5), f(6, 6, 0), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vnmul,
        &[f(23, 27, 0x1C), f(20, 21, 0x2), f(9, 11, 0x5), f(6, 6, 1), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vmul,
        &[f(23, 27, 0x1C), f(20, 21, 0x2), f(9, 11, 0x5), f(6, 6, 0), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vadd,
        &[f(23, 27, 0x1C), f(20, 21, 0x3), f(9, 11, 0x5), f(6, 6, 0), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vsub,
        &[f(23, 27, 0x1C), f(20, 21, 0x3), f(9, 11, 0x5), f(6, 6, 1), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vdiv,
        &[f(23, 27, 0x1D), f(20, 21, 0x0), f(9, 11, 0x5), f(6, 6, 0), f(4, 4, 0)],
        &[],
    ),
    // cond 1110 1D11 imm4H Vd 101x 0000 imm4L
    row(
        Opcode::Vmovi,
        &[f(23, 27, 0x1D), f(20, 21, 0x3), f(9, 11, 0x5), f(4, 7, 0)],
        &[],
    ),
    // cond 1110 1D11 0000 Vd 101x 01M0 Vm
    row(
        Opcode::Vmovr,
        &[f(23, 27, 0x1D), f(16, 21, 0x30), f(9, 11, 0x5), f(6, 7, 1), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vabs,
        &[f(23, 27, 0x1D), f(16, 21, 0x30), f(9, 11, 0x5), f(6, 7, 3), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vneg,
        &[f(23, 27, 0x1D), f(16, 21, 0x31), f(9, 11, 0x5), f(6, 7, 1), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vsqrt,
        &[f(23, 27, 0x1D), f(16, 21, 0x31), f(9, 11, 0x5), f(6, 7, 3), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vcmp,
        &[f(23, 27, 0x1D), f(16, 21, 0x34), f(9, 11, 0x5), f(6, 6, 1), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vcmp2,
        &[f(23, 27, 0x1D), f(16, 21, 0x35), f(9, 11, 0x5), f(0, 6, 0x40)],
        &[],
    ),
    row(
        Opcode::Vcvtbds,
        &[f(23, 27, 0x1D), f(16, 21, 0x37), f(9, 11, 0x5), f(6, 7, 3), f(4, 4, 0)],
        &[],
    ),
    row(
        Opcode::Vcvtbff,
        &[f(23, 27, 0x1D), f(19, 21, 0x7), f(17, 17, 0x1), f(9, 11, 0x5), f(6, 6, 1)],
        &[f(4, 4, 1)],
    ),
    row(
        Opcode::Vcvtbfi,
        &[f(23, 27, 0x1D), f(19, 21, 0x7), f(9, 11, 0x5), f(6, 6, 1), f(4, 4, 0)],
        &[],
    ),
    // cond 1110 000o Vn Rt 1010 N001 0000
    row(
        Opcode::Vmovbrs,
        &[f(21, 27, 0x70), f(8, 11, 0xA), f(0, 6, 0x10)],
        &[],
    ),
    // cond 1110 1110 reg Rt 1010 0001 0000
    row(Opcode::Vmsr, &[f(20, 27, 0xEE), f(0, 11, 0xA10)], &[]),
    row(
        Opcode::Vmovbrc,
        &[f(23, 27, 0x1C), f(20, 20, 0x0), f(8, 11, 0xB), f(0, 4, 0x10)],
        &[],
    ),
    // cond 1110 1111 reg Rt 1010 0001 0000
    row(Opcode::Vmrs, &[f(20, 27, 0xEF), f(0, 11, 0xA10)], &[]),
    row(
        Opcode::Vmovbcr,
        &[f(24, 27, 0xE), f(20, 20, 0x1), f(8, 11, 0xB), f(0, 4, 0x10)],
        &[],
    ),
    // cond 1100 010o Rt2 Rt 101x 00M1 Vm
    row(
        Opcode::Vmovbrrss,
        &[f(21, 27, 0x62), f(8, 11, 0xA), f(4, 4, 1)],
        &[],
    ),
    row(
        Opcode::Vmovbrrd,
        &[f(21, 27, 0x62), f(6, 11, 0x2C), f(4, 4, 1)],
        &[],
    ),
    // cond 1101 UD00 Rn Vd 101x imm8
    row(Opcode::Vstr, &[f(24, 27, 0xD), f(20, 21, 0x0), f(9, 11, 0x5)], &[]),
    // cond 1101 0D10 1101 Vd 101x imm8
    row(
        Opcode::Vpush,
        &[f(23, 27, 0x1A), f(16, 21, 0x2D), f(9, 11, 0x5)],
        &[],
    ),
    row(Opcode::Vstm, &[f(25, 27, 0x6), f(20, 20, 0x0), f(9, 11, 0x5)], &[]),
    // cond 1100 1D11 1101 Vd 101x imm8
    row(
        Opcode::Vpop,
        &[f(23, 27, 0x19), f(16, 21, 0x3D), f(9, 11, 0x5)],
        &[],
    ),
    row(Opcode::Vldr, &[f(24, 27, 0xD), f(20, 21, 0x1), f(9, 11, 0x5)], &[]),
    row(Opcode::Vldm, &[f(25, 27, 0x6), f(20, 20, 0x1), f(9, 11, 0x5)], &[]),
];
