//! Single-precision soft-float kernel.
//!
//! Entry point for every CP10 data-processing instruction. The kernel
//! re-extracts register numbers and the opcode discriminator from the raw
//! word, reads its operands through the single-precision view of the
//! extension bank, and returns the exception flags the operation raised.
//! Reference: ARM DDI 0406C.d - Chapter A2.7 and the IEEE-754 behaviour
//! it mandates for VFPv2/VFPv3.

use super::{
    double, isqrt64, shift_right_jamming, vector_length, vector_stride, FpFlags, RoundingMode,
    FPSCR_DN, FPSCR_FZ,
};
use crate::regs::ExtRegBank;

const MANTISSA_BITS: u32 = 23;
/// Guard bits kept below the mantissa in the unpacked form
pub(super) const LOW_BITS: u32 = 32 - MANTISSA_BITS - 2;
const EXP_INF: i32 = 255;
const SIGN_BIT: u32 = 0x8000_0000;
/// Quiet bit of a NaN significand in unpacked position
pub(super) const SIGNIFICAND_QNAN: u32 = 1 << (MANTISSA_BITS - 1 + LOW_BITS);

/// Unpacked single-precision value. The significand carries the implicit
/// bit at bit 30 with `LOW_BITS` guard bits below the mantissa, so a value
/// is `significand * 2^(exponent - 157)`.
#[derive(Debug, Clone, Copy)]
pub(super) struct Fp32 {
    pub sign: bool,
    pub exponent: i32,
    pub significand: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Zero,
    Denormal,
    Number,
    Infinity,
    QNan,
    SNan,
}

impl Class {
    fn is_nan(self) -> bool {
        matches!(self, Class::QNan | Class::SNan)
    }
}

fn unpack(value: u32) -> Fp32 {
    let exponent = ((value >> MANTISSA_BITS) & 0xFF) as i32;
    let mut significand = (value << (32 - MANTISSA_BITS)) >> 2;
    if exponent != 0 && exponent != EXP_INF {
        significand |= 1 << 30;
    }
    Fp32 {
        sign: value & SIGN_BIT != 0,
        exponent,
        significand,
    }
}

pub(super) fn pack(fp: &Fp32) -> u32 {
    ((fp.sign as u32) << 31)
        .wrapping_add((fp.exponent as u32) << MANTISSA_BITS)
        .wrapping_add(fp.significand >> LOW_BITS)
}

fn class(fp: &Fp32) -> Class {
    if fp.exponent == EXP_INF {
        if fp.significand == 0 {
            Class::Infinity
        } else if fp.significand & SIGNIFICAND_QNAN != 0 {
            Class::QNan
        } else {
            Class::SNan
        }
    } else if fp.exponent == 0 {
        if fp.significand == 0 {
            Class::Zero
        } else {
            Class::Denormal
        }
    } else {
        Class::Number
    }
}

fn default_qnan() -> Fp32 {
    Fp32 {
        sign: false,
        exponent: EXP_INF,
        significand: SIGNIFICAND_QNAN,
    }
}

fn zero(sign: bool) -> Fp32 {
    Fp32 {
        sign,
        exponent: 0,
        significand: 0,
    }
}

fn infinity(sign: bool) -> Fp32 {
    Fp32 {
        sign,
        exponent: EXP_INF,
        significand: 0,
    }
}

/// Bring a denormal's leading fraction bit up to the implicit position.
fn normalise_denormal(fp: &mut Fp32) {
    let shift = fp.significand.leading_zeros() as i32 - 1;
    if shift > 0 {
        fp.exponent -= shift - 1;
        fp.significand <<= shift;
    }
}

/// Flush a denormal operand to zero when FPSCR.FZ is set.
fn squeeze(fp: &mut Fp32, kind: &mut Class, fpscr: u32) -> FpFlags {
    if *kind == Class::Denormal && fpscr & FPSCR_FZ != 0 {
        *fp = zero(fp.sign);
        *kind = Class::Zero;
        return FpFlags::IDC;
    }
    FpFlags::empty()
}

/// Pick the NaN an operation propagates and quieten it.
fn propagate_nan(vn: &Fp32, vm: Option<&Fp32>, fpscr: u32) -> (Fp32, FpFlags) {
    let tn = class(vn);
    let tm = vm.map(class);
    let mut nan = if fpscr & FPSCR_DN != 0 {
        default_qnan()
    } else if tn == Class::SNan || (tm != Some(Class::SNan) && tn == Class::QNan) {
        *vn
    } else {
        match vm {
            Some(v) => *v,
            None => *vn,
        }
    };
    nan.significand |= SIGNIFICAND_QNAN;
    let flags = if tn == Class::SNan || tm == Some(Class::SNan) {
        FpFlags::IOC
    } else {
        FpFlags::NAN
    };
    (nan, flags)
}

/// Normalise, round per the FPSCR mode and pack. Returns the packed result
/// and the input flags merged with anything rounding raised.
pub(super) fn normalise_round(mut fp: Fp32, fpscr: u32, mut flags: FpFlags) -> (u32, FpFlags) {
    // Infinities and propagated NaNs pass through unchanged
    if fp.exponent == EXP_INF && (fp.significand == 0 || !flags.is_empty()) {
        return (pack(&fp), flags);
    }

    if fp.significand == 0 {
        fp.exponent = 0;
        return (pack(&fp), flags);
    }

    let mut exponent = fp.exponent;
    let mut significand = fp.significand;

    // Normalise up to bit 31, leaving LOW_BITS + 1 bits below the final
    // mantissa position
    let shift = significand.leading_zeros();
    exponent -= shift as i32;
    significand <<= shift;

    // Flush-to-zero replaces gradual underflow entirely
    if fpscr & FPSCR_FZ != 0 && exponent < 0 {
        flags |= FpFlags::UFC;
        return (pack(&zero(fp.sign)), flags);
    }

    let mut underflow = exponent < 0;
    if underflow {
        significand = shift_right_jamming(significand, (-exponent) as u32);
        exponent = 0;
        if significand & ((1 << (LOW_BITS + 1)) - 1) == 0 {
            underflow = false;
        }
    }

    let mut incr: u32 = match RoundingMode::from_fpscr(fpscr) {
        RoundingMode::Nearest => {
            // Ties to even: back off one when the result LSB is clear
            let mut incr = 1 << LOW_BITS;
            if significand & (1 << (LOW_BITS + 1)) == 0 {
                incr -= 1;
            }
            incr
        }
        RoundingMode::Zero => 0,
        RoundingMode::PlusInf if !fp.sign => (1 << (LOW_BITS + 1)) - 1,
        RoundingMode::MinusInf if fp.sign => (1 << (LOW_BITS + 1)) - 1,
        _ => 0,
    };

    // The increment may carry out of the top bit
    if significand.wrapping_add(incr) < significand {
        exponent += 1;
        significand = (significand >> 1) | (significand & 1);
        incr >>= 1;
    }

    if significand & ((1 << (LOW_BITS + 1)) - 1) != 0 {
        flags |= FpFlags::IXC;
    }

    significand = significand.wrapping_add(incr);

    if exponent >= 254 {
        flags |= FpFlags::OFC | FpFlags::IXC;
        if incr == 0 {
            fp.exponent = 253;
            fp.significand = 0x7FFF_FFFF;
        } else {
            fp.exponent = EXP_INF;
            fp.significand = 0;
        }
    } else {
        if significand >> (LOW_BITS + 1) == 0 {
            exponent = 0;
        }
        if exponent != 0 || significand > 0x8000_0000 {
            underflow = false;
        }
        if underflow {
            flags |= FpFlags::UFC;
        }
        fp.exponent = exponent;
        fp.significand = significand >> 1;
    }

    (pack(&fp), flags)
}

/// Add two prepared operands. Subtraction is an add with `vm` negated.
fn add(vn: &Fp32, vm: &Fp32, fpscr: u32) -> (Fp32, FpFlags) {
    // Keep the larger-exponent operand in `n`; equal exponents keep their
    // order so NaN propagation prefers the original first operand
    let (vn, vm) = if vn.exponent < vm.exponent {
        (vm, vn)
    } else {
        (vn, vm)
    };

    if vn.exponent == EXP_INF {
        if vn.significand != 0 || (vm.exponent == EXP_INF && vm.significand != 0) {
            return propagate_nan(vn, Some(vm), fpscr);
        }
        if vm.exponent == EXP_INF && vm.sign != vn.sign {
            // infinity - infinity
            return (default_qnan(), FpFlags::IOC);
        }
        return (*vn, FpFlags::empty());
    }

    let mut vd = *vn;
    let exp_diff = (vn.exponent - vm.exponent) as u32;
    let m_sig = shift_right_jamming(vm.significand, exp_diff);

    if vn.sign != vm.sign {
        let (diff, borrow) = vn.significand.overflowing_sub(m_sig);
        if borrow {
            vd.sign = !vd.sign;
            vd.significand = diff.wrapping_neg();
        } else if diff == 0 {
            // Exact cancellation: +0, or -0 when rounding towards minus
            // infinity
            vd.sign = RoundingMode::from_fpscr(fpscr) == RoundingMode::MinusInf;
            vd.significand = 0;
        } else {
            vd.significand = diff;
        }
    } else {
        vd.significand = vn.significand + m_sig;
    }

    (vd, FpFlags::empty())
}

/// Multiply two prepared operands; the product keeps a jammed sticky bit
/// in place of the discarded low half.
fn multiply(vn: &Fp32, vm: &Fp32, fpscr: u32) -> (Fp32, FpFlags) {
    let (vn, vm) = if vn.exponent < vm.exponent {
        (vm, vn)
    } else {
        (vn, vm)
    };
    let sign = vn.sign != vm.sign;

    if vn.exponent == EXP_INF {
        if vn.significand != 0 || (vm.exponent == EXP_INF && vm.significand != 0) {
            return propagate_nan(vn, Some(vm), fpscr);
        }
        if vm.exponent == 0 && vm.significand == 0 {
            // infinity times zero
            return (default_qnan(), FpFlags::IOC);
        }
        return (infinity(sign), FpFlags::empty());
    }

    if vm.exponent == 0 && vm.significand == 0 {
        return (zero(sign), FpFlags::empty());
    }

    let product = vn.significand as u64 * vm.significand as u64;
    let vd = Fp32 {
        sign,
        exponent: vn.exponent + vm.exponent - 127 + 2,
        significand: shift_right_jamming(product, 32) as u32,
    };
    (vd, FpFlags::empty())
}

fn unpack_prepared(value: u32, fpscr: u32, flags: &mut FpFlags) -> Fp32 {
    let mut fp = unpack(value);
    let mut kind = class(&fp);
    *flags |= squeeze(&mut fp, &mut kind, fpscr);
    if kind == Class::Denormal {
        normalise_denormal(&mut fp);
    }
    fp
}

fn op_add(bank: &mut ExtRegBank, d: u32, n: u32, m: u32, fpscr: u32, negate_m: bool) -> FpFlags {
    let mut flags = FpFlags::empty();
    let vn = unpack_prepared(bank.read_s(n as usize), fpscr, &mut flags);
    let mut vm = unpack_prepared(m, fpscr, &mut flags);
    if negate_m {
        vm.sign = !vm.sign;
    }
    let (vd, add_flags) = add(&vn, &vm, fpscr);
    let (packed, flags) = normalise_round(vd, fpscr, flags | add_flags);
    bank.write_s(d as usize, packed);
    flags
}

fn op_mul(bank: &mut ExtRegBank, d: u32, n: u32, m: u32, fpscr: u32, negate: bool) -> FpFlags {
    let mut flags = FpFlags::empty();
    let vn = unpack_prepared(bank.read_s(n as usize), fpscr, &mut flags);
    let vm = unpack_prepared(m, fpscr, &mut flags);
    let (mut vd, mul_flags) = multiply(&vn, &vm, fpscr);
    if negate {
        vd.sign = !vd.sign;
    }
    let (packed, flags) = normalise_round(vd, fpscr, flags | mul_flags);
    bank.write_s(d as usize, packed);
    flags
}

/// The multiply-accumulate family. The product takes a full rounding of
/// its own before the accumulate add: VFPv2/VFPv3 chain two IEEE
/// operations rather than fusing them.
fn op_mac(
    bank: &mut ExtRegBank,
    d: u32,
    n: u32,
    m: u32,
    fpscr: u32,
    neg_mul: bool,
    neg_acc: bool,
) -> FpFlags {
    let mut flags = FpFlags::empty();
    let vn = unpack_prepared(bank.read_s(n as usize), fpscr, &mut flags);
    let vm = unpack_prepared(m, fpscr, &mut flags);

    let (mut product, mul_flags) = multiply(&vn, &vm, fpscr);
    if neg_mul {
        product.sign = !product.sign;
    }
    let (packed_product, flags) = normalise_round(product, fpscr, flags | mul_flags);

    let mut vp = unpack(packed_product);
    if class(&vp) == Class::Denormal {
        normalise_denormal(&mut vp);
    }

    let mut flags = flags;
    let mut acc = unpack_prepared(bank.read_s(d as usize), fpscr, &mut flags);
    if neg_acc {
        acc.sign = !acc.sign;
    }

    let (vd, add_flags) = add(&acc, &vp, fpscr);
    let (packed, flags) = normalise_round(vd, fpscr, flags | add_flags);
    bank.write_s(d as usize, packed);
    flags
}

fn op_div(bank: &mut ExtRegBank, d: u32, n: u32, m: u32, fpscr: u32) -> FpFlags {
    let mut vn = unpack(bank.read_s(n as usize));
    let mut vm = unpack(m);
    let mut tn = class(&vn);
    let mut tm = class(&vm);
    let mut flags = squeeze(&mut vn, &mut tn, fpscr);
    flags |= squeeze(&mut vm, &mut tm, fpscr);

    let sign = vn.sign != vm.sign;

    if tn.is_nan() || tm.is_nan() {
        let (nan, nan_flags) = if tn.is_nan() {
            propagate_nan(&vn, Some(&vm), fpscr)
        } else {
            propagate_nan(&vm, Some(&vn), fpscr)
        };
        bank.write_s(d as usize, pack(&nan));
        return flags | nan_flags;
    }

    if tn == tm && (tn == Class::Infinity || tn == Class::Zero) {
        // infinity / infinity, zero / zero
        bank.write_s(d as usize, pack(&default_qnan()));
        return flags | FpFlags::IOC;
    }

    if tn == Class::Infinity {
        bank.write_s(d as usize, pack(&infinity(sign)));
        return flags;
    }

    if tm == Class::Zero {
        bank.write_s(d as usize, pack(&infinity(sign)));
        return flags | FpFlags::DZC;
    }

    if tm == Class::Infinity || tn == Class::Zero {
        bank.write_s(d as usize, pack(&zero(sign)));
        return flags;
    }

    if tn == Class::Denormal {
        normalise_denormal(&mut vn);
    }
    if tm == Class::Denormal {
        normalise_denormal(&mut vm);
    }

    let mut vd = Fp32 {
        sign,
        exponent: vn.exponent - vm.exponent + 127 - 1,
        significand: 0,
    };
    let mut n_sig = vn.significand;
    let m_sig = vm.significand << 1;
    if m_sig <= 2 * n_sig {
        n_sig >>= 1;
        vd.exponent += 1;
    }
    vd.significand = (((n_sig as u64) << 32) / m_sig as u64) as u32;
    if vd.significand & 0x3F == 0 {
        // Quotient guard bits are clean; recover the sticky bit exactly
        vd.significand |=
            (m_sig as u64 * vd.significand as u64 != (n_sig as u64) << 32) as u32;
    }

    let (packed, flags) = normalise_round(vd, fpscr, flags);
    bank.write_s(d as usize, packed);
    flags
}

fn op_sqrt(bank: &mut ExtRegBank, d: u32, m: u32, fpscr: u32) -> FpFlags {
    let mut vm = unpack(m);
    let mut tm = class(&vm);
    let mut flags = squeeze(&mut vm, &mut tm, fpscr);

    if tm.is_nan() {
        let (nan, nan_flags) = propagate_nan(&vm, None, fpscr);
        bank.write_s(d as usize, pack(&nan));
        return flags | nan_flags;
    }

    if tm == Class::Zero {
        bank.write_s(d as usize, pack(&vm));
        return flags;
    }

    if vm.sign {
        // Square root of a negative number (minus zero already handled)
        bank.write_s(d as usize, pack(&default_qnan()));
        return flags | FpFlags::IOC;
    }

    if tm == Class::Infinity {
        bank.write_s(d as usize, pack(&vm));
        return flags;
    }

    if tm == Class::Denormal {
        normalise_denormal(&mut vm);
    }

    let unbiased = vm.exponent - 127;
    let scaled = (vm.significand as u64) << (30 + (unbiased & 1) as u32);
    let (root, rem) = isqrt64(scaled);
    let vd = Fp32 {
        sign: false,
        exponent: (unbiased >> 1) + 127,
        significand: root as u32 | (rem != 0) as u32,
    };
    let (packed, flags) = normalise_round(vd, fpscr, flags);
    bank.write_s(d as usize, packed);
    flags
}

fn is_nan_packed(value: u32) -> bool {
    value & 0x7F80_0000 == 0x7F80_0000 && value & 0x007F_FFFF != 0
}

fn is_quiet_packed(value: u32) -> bool {
    value & (1 << (MANTISSA_BITS - 1)) != 0
}

/// Compare two packed values and return the N/Z/C/V outcome: less sets N,
/// equal sets Z and C, greater sets C, unordered sets C and V. A
/// signalling NaN always raises IOC; a quiet NaN only for the E variants.
fn compare(d: u32, m: u32, signal_on_qnan: bool) -> FpFlags {
    let mut flags = FpFlags::empty();

    if is_nan_packed(m) {
        flags |= FpFlags::C | FpFlags::V;
        if signal_on_qnan || !is_quiet_packed(m) {
            flags |= FpFlags::IOC;
        }
    }
    if is_nan_packed(d) {
        flags |= FpFlags::C | FpFlags::V;
        if signal_on_qnan || !is_quiet_packed(d) {
            flags |= FpFlags::IOC;
        }
    }

    if flags.is_empty() {
        if d == m || (d | m) & !SIGN_BIT == 0 {
            flags |= FpFlags::Z | FpFlags::C;
        } else if (d ^ m) & SIGN_BIT != 0 {
            if d & SIGN_BIT != 0 {
                flags |= FpFlags::N;
            } else {
                flags |= FpFlags::C;
            }
        } else if (d & SIGN_BIT != 0) ^ ((d as i32) < (m as i32)) {
            flags |= FpFlags::N;
        } else if (d & SIGN_BIT != 0) ^ ((d as i32) > (m as i32)) {
            flags |= FpFlags::C;
        }
    }
    flags
}

fn op_cvt_to_double(bank: &mut ExtRegBank, dd: u32, m: u32, fpscr: u32) -> FpFlags {
    let mut vm = unpack(m);
    let mut tm = class(&vm);
    let mut flags = squeeze(&mut vm, &mut tm, fpscr);

    if tm == Class::SNan {
        flags |= FpFlags::IOC;
    }
    if tm == Class::Denormal {
        normalise_denormal(&mut vm);
    }

    let mut vd = double::Fp64 {
        sign: vm.sign,
        exponent: 0,
        significand: (vm.significand as u64) << 32,
    };

    if tm.is_nan() || tm == Class::Infinity {
        vd.exponent = 2047;
        if tm == Class::SNan {
            vd.significand |= double::SIGNIFICAND_QNAN;
        }
        bank.write_d(dd as usize, double::pack(&vd));
        return flags;
    }

    if tm == Class::Zero {
        vd.exponent = 0;
    } else {
        vd.exponent = vm.exponent + (1023 - 127);
    }

    let (packed, flags) = double::normalise_round(vd, fpscr, flags);
    bank.write_d(dd as usize, packed);
    flags
}

fn op_int_to_float(bank: &mut ExtRegBank, d: u32, m: u32, fpscr: u32, signed: bool) -> FpFlags {
    let (sign, magnitude) = if signed {
        let v = m as i32;
        (v < 0, v.unsigned_abs())
    } else {
        (false, m)
    };
    let vd = Fp32 {
        sign,
        exponent: 127 + 31 - 1,
        significand: magnitude,
    };
    let (packed, flags) = normalise_round(vd, fpscr, FpFlags::empty());
    bank.write_s(d as usize, packed);
    flags
}

/// Convert a float to a (possibly fixed-point scaled) integer. `vm` must
/// be classified before any exponent scaling; rounding follows `rmode`,
/// the result saturates to `width` bits and is sign/zero extended to 32.
fn float_to_int(
    vm: &Fp32,
    kind: Class,
    rmode: RoundingMode,
    width: u32,
    signed: bool,
) -> (u32, FpFlags) {
    if kind.is_nan() {
        return (0, FpFlags::IOC);
    }

    let saturated = |negative: bool| -> u32 {
        if signed {
            if negative {
                (-(1i64 << (width - 1)) as i32) as u32
            } else {
                ((1u64 << (width - 1)) - 1) as u32
            }
        } else if negative {
            0
        } else {
            (((1u128 << width) - 1) & 0xFFFF_FFFF) as u32
        }
    };

    // Magnitude can never fit once the exponent clears 2^32
    if vm.exponent >= 127 + 32 {
        return (saturated(vm.sign), FpFlags::IOC);
    }

    let (magnitude, inexact) = if vm.exponent >= 127 - 1 {
        // 0.5 <= |value| < 2^32: split into integer part and fraction at
        // the binary point
        let wide = (vm.significand as u64) << 1;
        let shift = (127 + 31 - vm.exponent) as u32;
        let (mut magnitude, fraction, half) = if shift == 0 {
            (wide, 0u64, 0u64)
        } else {
            (
                wide >> shift,
                wide & ((1u64 << shift) - 1),
                1u64 << (shift - 1),
            )
        };
        let round_up = match rmode {
            RoundingMode::Nearest => {
                fraction > half || (fraction == half && magnitude & 1 != 0)
            }
            RoundingMode::Zero => false,
            RoundingMode::PlusInf => !vm.sign && fraction != 0,
            RoundingMode::MinusInf => vm.sign && fraction != 0,
        };
        if round_up {
            magnitude += 1;
        }
        (magnitude, fraction != 0)
    } else {
        // |value| < 0.5 rounds to zero or just past it
        let nonzero = vm.significand != 0;
        let magnitude = match rmode {
            RoundingMode::PlusInf if nonzero && !vm.sign => 1,
            RoundingMode::MinusInf if nonzero && vm.sign => 1,
            _ => 0,
        };
        (magnitude as u64, nonzero)
    };

    encode_int(magnitude, inexact, vm.sign, width, signed, saturated)
}

fn encode_int(
    magnitude: u64,
    inexact: bool,
    sign: bool,
    width: u32,
    signed: bool,
    saturated: impl Fn(bool) -> u32,
) -> (u32, FpFlags) {
    let inexact_flags = if inexact {
        FpFlags::IXC
    } else {
        FpFlags::empty()
    };
    if signed {
        let limit = 1u64 << (width - 1);
        if !sign && magnitude >= limit {
            return (saturated(false), FpFlags::IOC);
        }
        if sign && magnitude > limit {
            return (saturated(true), FpFlags::IOC);
        }
        let value = if sign {
            (magnitude as i64).wrapping_neg()
        } else {
            magnitude as i64
        };
        ((value as i32) as u32, inexact_flags)
    } else {
        if sign && magnitude != 0 {
            return (0, FpFlags::IOC);
        }
        let limit = (1u128 << width) - 1;
        if magnitude as u128 > limit {
            return (saturated(false), FpFlags::IOC);
        }
        (magnitude as u32, inexact_flags)
    }
}

fn op_float_to_int(
    bank: &mut ExtRegBank,
    d: u32,
    m: u32,
    fpscr: u32,
    signed: bool,
    round_zero: bool,
) -> FpFlags {
    let vm = unpack(m);
    let kind = class(&vm);
    let mut flags = FpFlags::empty();
    if kind == Class::Denormal {
        flags |= FpFlags::IDC;
    }
    let rmode = if round_zero {
        RoundingMode::Zero
    } else {
        RoundingMode::from_fpscr(fpscr)
    };
    let (value, conv_flags) = float_to_int(&vm, kind, rmode, 32, signed);
    bank.write_s(d as usize, value);
    flags | conv_flags
}

/// Fraction bit count of a fixed-point conversion: `size - imm4:i`.
fn fixed_fraction_bits(inst: u32, halfword: bool) -> i32 {
    let size: i32 = if halfword { 16 } else { 32 };
    let imm = ((inst & 0xF) << 1 | (inst >> 5) & 1) as i32;
    let fbits = size - imm;
    if fbits < 0 {
        log::debug!("fixed-point conversion {:#010x} with oversized imm", inst);
        return 0;
    }
    fbits
}

fn op_fixed_to_float(
    bank: &mut ExtRegBank,
    d: u32,
    inst: u32,
    fpscr: u32,
    signed: bool,
    halfword: bool,
) -> FpFlags {
    let fbits = fixed_fraction_bits(inst, halfword);
    let raw = bank.read_s(d as usize);
    let value = if halfword {
        if signed {
            (raw as u16 as i16 as i32) as u32
        } else {
            raw as u16 as u32
        }
    } else {
        raw
    };
    let (sign, magnitude) = if signed {
        let v = value as i32;
        (v < 0, v.unsigned_abs())
    } else {
        (false, value)
    };
    let vd = Fp32 {
        sign,
        exponent: 127 + 31 - 1 - fbits,
        significand: magnitude,
    };
    let (packed, flags) = normalise_round(vd, fpscr, FpFlags::empty());
    bank.write_s(d as usize, packed);
    flags
}

fn op_float_to_fixed(
    bank: &mut ExtRegBank,
    d: u32,
    inst: u32,
    _fpscr: u32,
    signed: bool,
    halfword: bool,
) -> FpFlags {
    let fbits = fixed_fraction_bits(inst, halfword);
    let mut vm = unpack(bank.read_s(d as usize));
    let kind = class(&vm);
    let mut flags = FpFlags::empty();
    if kind == Class::Denormal {
        flags |= FpFlags::IDC;
    }
    // Scaling by 2^fbits is an exponent shift; fixed-point conversion
    // always rounds towards zero
    vm.exponent += fbits;
    let width = if halfword { 16 } else { 32 };
    let (value, conv_flags) = float_to_int(&vm, kind, RoundingMode::Zero, width, signed);
    bank.write_s(d as usize, value);
    flags | conv_flags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Mac { neg_mul: bool, neg_acc: bool },
    Mul { negate: bool },
    Add,
    Sub,
    Div,
    Cpy,
    Abs,
    Neg,
    Sqrt,
    Cmp { signal: bool, zero: bool },
    CvtToDouble,
    IntToFloat { signed: bool },
    FloatToInt { signed: bool, round_zero: bool },
    FixedToFloat { signed: bool, halfword: bool },
    FloatToFixed { signed: bool, halfword: bool },
}

impl Op {
    /// Scalar operations never iterate under FPSCR.LEN
    fn is_scalar(self) -> bool {
        matches!(
            self,
            Op::Cmp { .. }
                | Op::CvtToDouble
                | Op::IntToFloat { .. }
                | Op::FloatToInt { .. }
                | Op::FixedToFloat { .. }
                | Op::FloatToFixed { .. }
        )
    }
}

/// Opcode discriminator: bits 23, 21:20 and 6.
fn decode_op(inst: u32) -> Option<Op> {
    match inst & 0x00B0_0040 {
        0x0000_0000 => Some(Op::Mac {
            neg_mul: false,
            neg_acc: false,
        }),
        0x0000_0040 => Some(Op::Mac {
            neg_mul: true,
            neg_acc: false,
        }),
        0x0010_0000 => Some(Op::Mac {
            neg_mul: false,
            neg_acc: true,
        }),
        0x0010_0040 => Some(Op::Mac {
            neg_mul: true,
            neg_acc: true,
        }),
        0x0020_0000 => Some(Op::Mul { negate: false }),
        0x0020_0040 => Some(Op::Mul { negate: true }),
        0x0030_0000 => Some(Op::Add),
        0x0030_0040 => Some(Op::Sub),
        0x0080_0000 => Some(Op::Div),
        0x00B0_0040 => decode_ext(inst),
        _ => None,
    }
}

/// Extension opcode index: Vn field and the N bit.
fn decode_ext(inst: u32) -> Option<Op> {
    match (inst & 0x000F_0000) >> 15 | (inst >> 7) & 1 {
        0x00 => Some(Op::Cpy),
        0x01 => Some(Op::Abs),
        0x02 => Some(Op::Neg),
        0x03 => Some(Op::Sqrt),
        0x08 => Some(Op::Cmp {
            signal: false,
            zero: false,
        }),
        0x09 => Some(Op::Cmp {
            signal: true,
            zero: false,
        }),
        0x0A => Some(Op::Cmp {
            signal: false,
            zero: true,
        }),
        0x0B => Some(Op::Cmp {
            signal: true,
            zero: true,
        }),
        0x0F => Some(Op::CvtToDouble),
        0x10 => Some(Op::IntToFloat { signed: false }),
        0x11 => Some(Op::IntToFloat { signed: true }),
        0x14 => Some(Op::FixedToFloat {
            signed: true,
            halfword: true,
        }),
        0x15 => Some(Op::FixedToFloat {
            signed: true,
            halfword: false,
        }),
        0x16 => Some(Op::FixedToFloat {
            signed: false,
            halfword: true,
        }),
        0x17 => Some(Op::FixedToFloat {
            signed: false,
            halfword: false,
        }),
        0x18 => Some(Op::FloatToInt {
            signed: false,
            round_zero: false,
        }),
        0x19 => Some(Op::FloatToInt {
            signed: false,
            round_zero: true,
        }),
        0x1A => Some(Op::FloatToInt {
            signed: true,
            round_zero: false,
        }),
        0x1B => Some(Op::FloatToInt {
            signed: true,
            round_zero: true,
        }),
        0x1C => Some(Op::FloatToFixed {
            signed: true,
            halfword: true,
        }),
        0x1D => Some(Op::FloatToFixed {
            signed: true,
            halfword: false,
        }),
        0x1E => Some(Op::FloatToFixed {
            signed: false,
            halfword: true,
        }),
        0x1F => Some(Op::FloatToFixed {
            signed: false,
            halfword: false,
        }),
        _ => None,
    }
}

fn sd_of(inst: u32) -> u32 {
    (inst >> 11) & 0x1E | (inst >> 22) & 1
}

fn sn_of(inst: u32) -> u32 {
    (inst >> 15) & 0x1E | (inst >> 7) & 1
}

fn sm_of(inst: u32) -> u32 {
    (inst << 1) & 0x1E | (inst >> 5) & 1
}

fn dd_of(inst: u32) -> u32 {
    (inst >> 12) & 0xF | (inst >> 18) & 0x10
}

/// True when every double-view register this encoding references lies in
/// `D0..D15`; the `D` bit reaching into a nonexistent bank makes the
/// instruction unpredictable.
pub fn operands_in_range(inst: u32) -> bool {
    match decode_op(inst) {
        Some(Op::CvtToDouble) => dd_of(inst) <= 15,
        _ => true,
    }
}

fn exec(bank: &mut ExtRegBank, op: Op, d: u32, n: u32, m_idx: u32, inst: u32, fpscr: u32) -> FpFlags {
    let m = bank.read_s(m_idx as usize);
    match op {
        Op::Mac { neg_mul, neg_acc } => op_mac(bank, d, n, m, fpscr, neg_mul, neg_acc),
        Op::Mul { negate } => op_mul(bank, d, n, m, fpscr, negate),
        Op::Add => op_add(bank, d, n, m, fpscr, false),
        Op::Sub => op_add(bank, d, n, m, fpscr, true),
        Op::Div => op_div(bank, d, n, m, fpscr),
        Op::Cpy => {
            bank.write_s(d as usize, m);
            FpFlags::empty()
        }
        Op::Abs => {
            bank.write_s(d as usize, m & !SIGN_BIT);
            FpFlags::empty()
        }
        Op::Neg => {
            bank.write_s(d as usize, m ^ SIGN_BIT);
            FpFlags::empty()
        }
        Op::Sqrt => op_sqrt(bank, d, m, fpscr),
        Op::Cmp { signal, zero } => {
            compare(bank.read_s(d as usize), if zero { 0 } else { m }, signal)
        }
        Op::CvtToDouble => op_cvt_to_double(bank, d, m, fpscr),
        Op::IntToFloat { signed } => op_int_to_float(bank, d, m, fpscr, signed),
        Op::FloatToInt { signed, round_zero } => {
            op_float_to_int(bank, d, m, fpscr, signed, round_zero)
        }
        Op::FixedToFloat { signed, halfword } => {
            op_fixed_to_float(bank, d, inst, fpscr, signed, halfword)
        }
        Op::FloatToFixed { signed, halfword } => {
            op_float_to_fixed(bank, d, inst, fpscr, signed, halfword)
        }
    }
}

/// Execute a single-precision CDP instruction against the register bank.
/// Returns the merged exception flags, including the compare condition
/// outcome for VCMP.
pub fn cpdo(bank: &mut ExtRegBank, inst: u32, fpscr: u32) -> FpFlags {
    let op = match decode_op(inst) {
        Some(op) => op,
        None => {
            log::debug!("unhandled single-precision CDP word {:#010x}", inst);
            return FpFlags::empty();
        }
    };

    let dest = if op == Op::CvtToDouble {
        dd_of(inst)
    } else {
        sd_of(inst)
    };
    let mut d = dest;
    let mut n = sn_of(inst);
    let mut m = sm_of(inst);

    // Destinations in bank zero always behave as scalars
    let len = if op.is_scalar() || dest & 0x18 == 0 {
        0
    } else {
        vector_length(fpscr)
    };
    let stride = vector_stride(fpscr);

    let mut flags = FpFlags::empty();
    for i in 0..=len {
        flags |= exec(bank, op, d, n, m, inst, fpscr);
        if i == len {
            break;
        }
        d = (d & 0x18) | ((d + stride) & 0x7);
        n = (n & 0x18) | ((n + stride) & 0x7);
        if m & 0x18 != 0 {
            m = (m & 0x18) | ((m + stride) & 0x7);
        }
    }
    flags
}
