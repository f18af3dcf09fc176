//! Double-precision soft-float kernel.
//!
//! Mirror of the single-precision kernel over the `D` register view, with
//! `u128` intermediates where the single kernel uses `u64`. Entry point
//! for every CP11 data-processing instruction.

use super::{
    isqrt128, shift_right_jamming, single, vector_length, vector_stride, FpFlags, RoundingMode,
    FPSCR_DN, FPSCR_FZ,
};
use crate::regs::ExtRegBank;

const MANTISSA_BITS: u32 = 52;
/// Guard bits kept below the mantissa in the unpacked form
const LOW_BITS: u32 = 64 - MANTISSA_BITS - 2;
const EXP_INF: i32 = 2047;
const SIGN_BIT: u64 = 0x8000_0000_0000_0000;
/// Quiet bit of a NaN significand in unpacked position
pub(super) const SIGNIFICAND_QNAN: u64 = 1 << (MANTISSA_BITS - 1 + LOW_BITS);

/// Unpacked double-precision value: implicit bit at bit 62, `LOW_BITS`
/// guard bits, value `significand * 2^(exponent - 1085)`.
#[derive(Debug, Clone, Copy)]
pub(super) struct Fp64 {
    pub sign: bool,
    pub exponent: i32,
    pub significand: u64,
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

fn unpack(value: u64) -> Fp64 {
    let exponent = ((value >> MANTISSA_BITS) & 0x7FF) as i32;
    let mut significand = (value << (64 - MANTISSA_BITS)) >> 2;
    if exponent != 0 && exponent != EXP_INF {
        significand |= 1 << 62;
    }
    Fp64 {
        sign: value & SIGN_BIT != 0,
        exponent,
        significand,
    }
}

pub(super) fn pack(fp: &Fp64) -> u64 {
    ((fp.sign as u64) << 63)
        .wrapping_add((fp.exponent as u64) << MANTISSA_BITS)
        .wrapping_add(fp.significand >> LOW_BITS)
}

fn class(fp: &Fp64) -> Class {
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

fn default_qnan() -> Fp64 {
    Fp64 {
        sign: false,
        exponent: EXP_INF,
        significand: SIGNIFICAND_QNAN,
    }
}

fn zero(sign: bool) -> Fp64 {
    Fp64 {
        sign,
        exponent: 0,
        significand: 0,
    }
}

fn infinity(sign: bool) -> Fp64 {
    Fp64 {
        sign,
        exponent: EXP_INF,
        significand: 0,
    }
}

fn normalise_denormal(fp: &mut Fp64) {
    let shift = fp.significand.leading_zeros() as i32 - 1;
    if shift > 0 {
        fp.exponent -= shift - 1;
        fp.significand <<= shift;
    }
}

fn squeeze(fp: &mut Fp64, kind: &mut Class, fpscr: u32) -> FpFlags {
    if *kind == Class::Denormal && fpscr & FPSCR_FZ != 0 {
        *fp = zero(fp.sign);
        *kind = Class::Zero;
        return FpFlags::IDC;
    }
    FpFlags::empty()
}

fn propagate_nan(vn: &Fp64, vm: Option<&Fp64>, fpscr: u32) -> (Fp64, FpFlags) {
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

/// Normalise, round per the FPSCR mode and pack.
pub(super) fn normalise_round(mut fp: Fp64, fpscr: u32, mut flags: FpFlags) -> (u64, FpFlags) {
    if fp.exponent == EXP_INF && (fp.significand == 0 || !flags.is_empty()) {
        return (pack(&fp), flags);
    }

    if fp.significand == 0 {
        fp.exponent = 0;
        return (pack(&fp), flags);
    }

    let mut exponent = fp.exponent;
    let mut significand = fp.significand;

    let shift = significand.leading_zeros();
    exponent -= shift as i32;
    significand <<= shift;

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

    let mut incr: u64 = match RoundingMode::from_fpscr(fpscr) {
        RoundingMode::Nearest => {
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

    if significand.wrapping_add(incr) < significand {
        exponent += 1;
        significand = (significand >> 1) | (significand & 1);
        incr >>= 1;
    }

    if significand & ((1 << (LOW_BITS + 1)) - 1) != 0 {
        flags |= FpFlags::IXC;
    }

    significand = significand.wrapping_add(incr);

    if exponent >= 2046 {
        flags |= FpFlags::OFC | FpFlags::IXC;
        if incr == 0 {
            fp.exponent = 2045;
            fp.significand = 0x7FFF_FFFF_FFFF_FFFF;
        } else {
            fp.exponent = EXP_INF;
            fp.significand = 0;
        }
    } else {
        if significand >> (LOW_BITS + 1) == 0 {
            exponent = 0;
        }
        if exponent != 0 || significand > 0x8000_0000_0000_0000 {
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

fn add(vn: &Fp64, vm: &Fp64, fpscr: u32) -> (Fp64, FpFlags) {
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

fn multiply(vn: &Fp64, vm: &Fp64, fpscr: u32) -> (Fp64, FpFlags) {
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
            return (default_qnan(), FpFlags::IOC);
        }
        return (infinity(sign), FpFlags::empty());
    }

    if vm.exponent == 0 && vm.significand == 0 {
        return (zero(sign), FpFlags::empty());
    }

    let product = vn.significand as u128 * vm.significand as u128;
    let vd = Fp64 {
        sign,
        exponent: vn.exponent + vm.exponent - 1023 + 2,
        significand: shift_right_jamming(product, 64) as u64,
    };
    (vd, FpFlags::empty())
}

fn unpack_prepared(value: u64, fpscr: u32, flags: &mut FpFlags) -> Fp64 {
    let mut fp = unpack(value);
    let mut kind = class(&fp);
    *flags |= squeeze(&mut fp, &mut kind, fpscr);
    if kind == Class::Denormal {
        normalise_denormal(&mut fp);
    }
    fp
}

fn op_add(bank: &mut ExtRegBank, d: u32, n: u32, m: u64, fpscr: u32, negate_m: bool) -> FpFlags {
    let mut flags = FpFlags::empty();
    let vn = unpack_prepared(bank.read_d(n as usize), fpscr, &mut flags);
    let mut vm = unpack_prepared(m, fpscr, &mut flags);
    if negate_m {
        vm.sign = !vm.sign;
    }
    let (vd, add_flags) = add(&vn, &vm, fpscr);
    let (packed, flags) = normalise_round(vd, fpscr, flags | add_flags);
    bank.write_d(d as usize, packed);
    flags
}

fn op_mul(bank: &mut ExtRegBank, d: u32, n: u32, m: u64, fpscr: u32, negate: bool) -> FpFlags {
    let mut flags = FpFlags::empty();
    let vn = unpack_prepared(bank.read_d(n as usize), fpscr, &mut flags);
    let vm = unpack_prepared(m, fpscr, &mut flags);
    let (mut vd, mul_flags) = multiply(&vn, &vm, fpscr);
    if negate {
        vd.sign = !vd.sign;
    }
    let (packed, flags) = normalise_round(vd, fpscr, flags | mul_flags);
    bank.write_d(d as usize, packed);
    flags
}

/// Multiply-accumulate with the product rounded to register format before
/// the accumulate add (chained VFPv2/VFPv3 semantics).
fn op_mac(
    bank: &mut ExtRegBank,
    d: u32,
    n: u32,
    m: u64,
    fpscr: u32,
    neg_mul: bool,
    neg_acc: bool,
) -> FpFlags {
    let mut flags = FpFlags::empty();
    let vn = unpack_prepared(bank.read_d(n as usize), fpscr, &mut flags);
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
    let mut acc = unpack_prepared(bank.read_d(d as usize), fpscr, &mut flags);
    if neg_acc {
        acc.sign = !acc.sign;
    }

    let (vd, add_flags) = add(&acc, &vp, fpscr);
    let (packed, flags) = normalise_round(vd, fpscr, flags | add_flags);
    bank.write_d(d as usize, packed);
    flags
}

fn op_div(bank: &mut ExtRegBank, d: u32, n: u32, m: u64, fpscr: u32) -> FpFlags {
    let mut vn = unpack(bank.read_d(n as usize));
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
        bank.write_d(d as usize, pack(&nan));
        return flags | nan_flags;
    }

    if tn == tm && (tn == Class::Infinity || tn == Class::Zero) {
        bank.write_d(d as usize, pack(&default_qnan()));
        return flags | FpFlags::IOC;
    }

    if tn == Class::Infinity {
        bank.write_d(d as usize, pack(&infinity(sign)));
        return flags;
    }

    if tm == Class::Zero {
        bank.write_d(d as usize, pack(&infinity(sign)));
        return flags | FpFlags::DZC;
    }

    if tm == Class::Infinity || tn == Class::Zero {
        bank.write_d(d as usize, pack(&zero(sign)));
        return flags;
    }

    if tn == Class::Denormal {
        normalise_denormal(&mut vn);
    }
    if tm == Class::Denormal {
        normalise_denormal(&mut vm);
    }

    let mut vd = Fp64 {
        sign,
        exponent: vn.exponent - vm.exponent + 1023 - 1,
        significand: 0,
    };
    let mut n_sig = vn.significand;
    let m_sig = vm.significand << 1;
    if m_sig <= 2 * n_sig {
        n_sig >>= 1;
        vd.exponent += 1;
    }
    vd.significand = (((n_sig as u128) << 64) / m_sig as u128) as u64;
    if vd.significand & 0x3F == 0 {
        vd.significand |=
            (m_sig as u128 * vd.significand as u128 != (n_sig as u128) << 64) as u64;
    }

    let (packed, flags) = normalise_round(vd, fpscr, flags);
    bank.write_d(d as usize, packed);
    flags
}

fn op_sqrt(bank: &mut ExtRegBank, d: u32, m: u64, fpscr: u32) -> FpFlags {
    let mut vm = unpack(m);
    let mut tm = class(&vm);
    let mut flags = squeeze(&mut vm, &mut tm, fpscr);

    if tm.is_nan() {
        let (nan, nan_flags) = propagate_nan(&vm, None, fpscr);
        bank.write_d(d as usize, pack(&nan));
        return flags | nan_flags;
    }

    if tm == Class::Zero {
        bank.write_d(d as usize, pack(&vm));
        return flags;
    }

    if vm.sign {
        bank.write_d(d as usize, pack(&default_qnan()));
        return flags | FpFlags::IOC;
    }

    if tm == Class::Infinity {
        bank.write_d(d as usize, pack(&vm));
        return flags;
    }

    if tm == Class::Denormal {
        normalise_denormal(&mut vm);
    }

    let unbiased = vm.exponent - 1023;
    let scaled = (vm.significand as u128) << (62 + (unbiased & 1) as u32);
    let (root, rem) = isqrt128(scaled);
    let vd = Fp64 {
        sign: false,
        exponent: (unbiased >> 1) + 1023,
        significand: root as u64 | (rem != 0) as u64,
    };
    let (packed, flags) = normalise_round(vd, fpscr, flags);
    bank.write_d(d as usize, packed);
    flags
}

fn is_nan_packed(value: u64) -> bool {
    value & 0x7FF0_0000_0000_0000 == 0x7FF0_0000_0000_0000
        && value & 0x000F_FFFF_FFFF_FFFF != 0
}

fn is_quiet_packed(value: u64) -> bool {
    value & (1 << (MANTISSA_BITS - 1)) != 0
}

fn compare(d: u64, m: u64, signal_on_qnan: bool) -> FpFlags {
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
        } else if (d & SIGN_BIT != 0) ^ ((d as i64) < (m as i64)) {
            flags |= FpFlags::N;
        } else if (d & SIGN_BIT != 0) ^ ((d as i64) > (m as i64)) {
            flags |= FpFlags::C;
        }
    }
    flags
}

fn op_cvt_to_single(bank: &mut ExtRegBank, sd: u32, m: u64, fpscr: u32) -> FpFlags {
    let mut vm = unpack(m);
    let mut tm = class(&vm);
    let mut flags = squeeze(&mut vm, &mut tm, fpscr);

    if tm == Class::SNan {
        flags |= FpFlags::IOC;
    }
    if tm == Class::Denormal {
        normalise_denormal(&mut vm);
    }

    let mut vd = single::Fp32 {
        sign: vm.sign,
        exponent: 0,
        significand: shift_right_jamming(vm.significand, 32) as u32,
    };

    if tm.is_nan() || tm == Class::Infinity {
        vd.exponent = 255;
        if tm == Class::SNan {
            vd.significand |= single::SIGNIFICAND_QNAN;
        }
        bank.write_s(sd as usize, single::pack(&vd));
        return flags;
    }

    if tm == Class::Zero {
        vd.exponent = 0;
    } else {
        vd.exponent = vm.exponent - 1023 + 127;
    }

    let (packed, flags) = single::normalise_round(vd, fpscr, flags);
    bank.write_s(sd as usize, packed);
    flags
}

fn op_int_to_float(bank: &mut ExtRegBank, d: u32, m: u32, fpscr: u32, signed: bool) -> FpFlags {
    let (sign, magnitude) = if signed {
        let v = m as i32;
        (v < 0, v.unsigned_abs())
    } else {
        (false, m)
    };
    let vd = Fp64 {
        sign,
        exponent: 1023 + 63 - 1,
        significand: magnitude as u64,
    };
    let (packed, flags) = normalise_round(vd, fpscr, FpFlags::empty());
    bank.write_d(d as usize, packed);
    flags
}

/// Convert a double to a (possibly fixed-point scaled) integer.
fn float_to_int(
    vm: &Fp64,
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

    if vm.exponent >= 1023 + 32 {
        return (saturated(vm.sign), FpFlags::IOC);
    }

    let (magnitude, inexact) = if vm.exponent >= 1023 - 1 {
        let wide = vm.significand << 1;
        let shift = (1023 + 63 - vm.exponent) as u32;
        let (mut magnitude, fraction, half) = if shift == 0 {
            (wide, 0u64, 0u64)
        } else if shift >= 64 {
            (0u64, wide, 1u64 << 63)
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
    sd: u32,
    m: u64,
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
    bank.write_s(sd as usize, value);
    flags | conv_flags
}

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
    let raw = bank.read_d(d as usize) as u32;
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
    let vd = Fp64 {
        sign,
        exponent: 1023 + 63 - 1 - fbits,
        significand: magnitude as u64,
    };
    let (packed, flags) = normalise_round(vd, fpscr, FpFlags::empty());
    bank.write_d(d as usize, packed);
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
    let mut vm = unpack(bank.read_d(d as usize));
    let kind = class(&vm);
    let mut flags = FpFlags::empty();
    if kind == Class::Denormal {
        flags |= FpFlags::IDC;
    }
    vm.exponent += fbits;
    let width = if halfword { 16 } else { 32 };
    let (value, conv_flags) = float_to_int(&vm, kind, RoundingMode::Zero, width, signed);
    // Results extend through the low word of the destination
    let extended = if signed {
        (value as i32 as i64) as u64
    } else {
        value as u64
    };
    bank.write_d(d as usize, extended);
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
    CvtToSingle,
    IntToFloat { signed: bool },
    FloatToInt { signed: bool, round_zero: bool },
    FixedToFloat { signed: bool, halfword: bool },
    FloatToFixed { signed: bool, halfword: bool },
}

impl Op {
    fn is_scalar(self) -> bool {
        matches!(
            self,
            Op::Cmp { .. }
                | Op::CvtToSingle
                | Op::IntToFloat { .. }
                | Op::FloatToInt { .. }
                | Op::FixedToFloat { .. }
                | Op::FloatToFixed { .. }
        )
    }
}

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
        0x0F => Some(Op::CvtToSingle),
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

fn dd_of(inst: u32) -> u32 {
    (inst >> 12) & 0xF | (inst >> 18) & 0x10
}

fn dn_of(inst: u32) -> u32 {
    (inst >> 16) & 0xF | (inst >> 3) & 0x10
}

fn dm_of(inst: u32) -> u32 {
    inst & 0xF | (inst >> 1) & 0x10
}

fn sd_of(inst: u32) -> u32 {
    (inst >> 11) & 0x1E | (inst >> 22) & 1
}

fn sm_of(inst: u32) -> u32 {
    (inst << 1) & 0x1E | (inst >> 5) & 1
}

/// True when every double-view register this encoding references lies in
/// `D0..D15`.
pub fn operands_in_range(inst: u32) -> bool {
    let op = match decode_op(inst) {
        Some(op) => op,
        None => return true,
    };
    match op {
        Op::Mac { .. } | Op::Mul { .. } | Op::Add | Op::Sub | Op::Div => {
            dd_of(inst) <= 15 && dn_of(inst) <= 15 && dm_of(inst) <= 15
        }
        Op::Cpy | Op::Abs | Op::Neg | Op::Sqrt => dd_of(inst) <= 15 && dm_of(inst) <= 15,
        Op::Cmp { zero: false, .. } => dd_of(inst) <= 15 && dm_of(inst) <= 15,
        Op::Cmp { zero: true, .. } => dd_of(inst) <= 15,
        Op::CvtToSingle | Op::FloatToInt { .. } => dm_of(inst) <= 15,
        Op::IntToFloat { .. } => dd_of(inst) <= 15,
        Op::FixedToFloat { .. } | Op::FloatToFixed { .. } => dd_of(inst) <= 15,
    }
}

fn exec(bank: &mut ExtRegBank, op: Op, d: u32, n: u32, m_idx: u32, inst: u32, fpscr: u32) -> FpFlags {
    match op {
        Op::Mac { neg_mul, neg_acc } => {
            let m = bank.read_d(m_idx as usize);
            op_mac(bank, d, n, m, fpscr, neg_mul, neg_acc)
        }
        Op::Mul { negate } => {
            let m = bank.read_d(m_idx as usize);
            op_mul(bank, d, n, m, fpscr, negate)
        }
        Op::Add => {
            let m = bank.read_d(m_idx as usize);
            op_add(bank, d, n, m, fpscr, false)
        }
        Op::Sub => {
            let m = bank.read_d(m_idx as usize);
            op_add(bank, d, n, m, fpscr, true)
        }
        Op::Div => {
            let m = bank.read_d(m_idx as usize);
            op_div(bank, d, n, m, fpscr)
        }
        Op::Cpy => {
            let m = bank.read_d(m_idx as usize);
            bank.write_d(d as usize, m);
            FpFlags::empty()
        }
        Op::Abs => {
            let m = bank.read_d(m_idx as usize);
            bank.write_d(d as usize, m & !SIGN_BIT);
            FpFlags::empty()
        }
        Op::Neg => {
            let m = bank.read_d(m_idx as usize);
            bank.write_d(d as usize, m ^ SIGN_BIT);
            FpFlags::empty()
        }
        Op::Sqrt => {
            let m = bank.read_d(m_idx as usize);
            op_sqrt(bank, d, m, fpscr)
        }
        Op::Cmp { signal, zero } => {
            let m = if zero { 0 } else { bank.read_d(m_idx as usize) };
            compare(bank.read_d(d as usize), m, signal)
        }
        Op::CvtToSingle => {
            let m = bank.read_d(m_idx as usize);
            op_cvt_to_single(bank, d, m, fpscr)
        }
        Op::IntToFloat { signed } => {
            let m = bank.read_s(sm_of(inst) as usize);
            op_int_to_float(bank, d, m, fpscr, signed)
        }
        Op::FloatToInt { signed, round_zero } => {
            let m = bank.read_d(m_idx as usize);
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

/// Execute a double-precision CDP instruction against the register bank.
pub fn cpdo(bank: &mut ExtRegBank, inst: u32, fpscr: u32) -> FpFlags {
    let op = match decode_op(inst) {
        Some(op) => op,
        None => {
            log::debug!("unhandled double-precision CDP word {:#010x}", inst);
            return FpFlags::empty();
        }
    };

    // Conversions to single and to integer write through the single view
    let dest = match op {
        Op::CvtToSingle | Op::FloatToInt { .. } => sd_of(inst),
        _ => dd_of(inst),
    };
    let mut d = dest;
    let mut n = dn_of(inst);
    let mut m = dm_of(inst);

    let len = if op.is_scalar() || dest & 0xC == 0 {
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
        d = (d & 0xC) | ((d + stride) & 0x3);
        n = (n & 0xC) | ((n + stride) & 0x3);
        if m & 0xC != 0 {
            m = (m & 0xC) | ((m + stride) & 0x3);
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn run(inst: u32, fpscr: u32, init: &[(usize, u64)]) -> (ExtRegBank, FpFlags) {
        let mut bank = ExtRegBank::new();
        for &(index, value) in init {
            bank.write_d(index, value);
        }
        let flags = cpdo(&mut bank, inst, fpscr);
        (bank, flags)
    }

    // VADD.F64 D0, D1, D2
    const VADD_D0_D1_D2: u32 = 0xEE310B02;
    // VMUL.F64 D0, D1, D2
    const VMUL_D0_D1_D2: u32 = 0xEE210B02;
    // VDIV.F64 D0, D1, D2
    const VDIV_D0_D1_D2: u32 = 0xEE810B02;
    // VMLA.F64 D1, D0, D0
    const VMLA_D1_D0_D0: u32 = 0xEE011B00;
    // VSQRT.F64 D0, D1
    const VSQRT_D0_D1: u32 = 0xEEB10BC1;
    // VCMP.F64 D0, D1
    const VCMP_D0_D1: u32 = 0xEEB40B41;

    const ONE: u64 = 0x3FF0_0000_0000_0000;
    const TWO: u64 = 0x4000_0000_0000_0000;
    const THREE: u64 = 0x4008_0000_0000_0000;
    const INF: u64 = 0x7FF0_0000_0000_0000;
    const QNAN: u64 = 0x7FF8_0000_0000_0000;

    #[test]
    fn test_add_exact() {
        let (bank, flags) = run(VADD_D0_D1_D2, 0, &[(1, ONE), (2, TWO)]);
        assert_eq!(bank.read_d(0), THREE);
        assert_eq!(flags, FpFlags::empty());
    }

    #[test]
    fn test_add_inexact() {
        // 2^53 + 1
        let (bank, flags) = run(VADD_D0_D1_D2, 0, &[(1, 0x4340_0000_0000_0000), (2, ONE)]);
        assert_eq!(bank.read_d(0), 0x4340_0000_0000_0000);
        assert_eq!(flags, FpFlags::IXC);
    }

    #[test]
    fn test_mul_exact() {
        let (bank, flags) = run(VMUL_D0_D1_D2, 0, &[(1, TWO), (2, THREE)]);
        assert_eq!(bank.read_d(0), 0x4018_0000_0000_0000); // 6.0
        assert_eq!(flags, FpFlags::empty());
    }

    #[test]
    fn test_mla_scenario() {
        // D1 = 2.5 + 1.5 * 1.5 = 4.75
        let (bank, flags) = run(
            VMLA_D1_D0_D0,
            0,
            &[(0, 0x3FF8_0000_0000_0000), (1, 0x4004_0000_0000_0000)],
        );
        assert_eq!(bank.read_d(1), 0x4013_0000_0000_0000);
        assert_eq!(flags, FpFlags::empty());
    }

    #[test]
    fn test_div_inexact() {
        let (bank, flags) = run(VDIV_D0_D1_D2, 0, &[(1, ONE), (2, THREE)]);
        assert_eq!(bank.read_d(0), 0x3FD5_5555_5555_5555); // 1/3
        assert_eq!(flags, FpFlags::IXC);
    }

    #[test]
    fn test_div_by_zero() {
        let (bank, flags) = run(VDIV_D0_D1_D2, 0, &[(1, ONE), (2, 0)]);
        assert_eq!(bank.read_d(0), INF);
        assert_eq!(flags, FpFlags::DZC);
    }

    #[test]
    fn test_sqrt_exact() {
        let (bank, flags) = run(VSQRT_D0_D1, 0, &[(1, 0x4022_0000_0000_0000)]); // 9.0
        assert_eq!(bank.read_d(0), THREE);
        assert_eq!(flags, FpFlags::empty());
    }

    #[test]
    fn test_sqrt_two_inexact() {
        let (bank, flags) = run(VSQRT_D0_D1, 0, &[(1, TWO)]);
        // sqrt(2) = 0x3FF6A09E667F3BCD round-to-nearest
        assert_eq!(bank.read_d(0), 0x3FF6_A09E_667F_3BCD);
        assert_eq!(flags, FpFlags::IXC);
    }

    #[test]
    fn test_sqrt_negative_invalid() {
        let (bank, flags) = run(VSQRT_D0_D1, 0, &[(1, ONE | SIGN_BIT)]);
        assert_eq!(bank.read_d(0), QNAN);
        assert_eq!(flags, FpFlags::IOC);
    }

    #[test_case(ONE, TWO, FpFlags::N; "less")]
    #[test_case(TWO, ONE, FpFlags::C; "greater")]
    #[test_case(TWO, TWO, FpFlags::Z.union(FpFlags::C); "equal")]
    fn test_compare_ordering(d: u64, m: u64, expected: FpFlags) {
        let (_, flags) = run(VCMP_D0_D1, 0, &[(0, d), (1, m)]);
        assert_eq!(flags, expected);
    }

    #[test]
    fn test_compare_nan_unordered() {
        let (_, flags) = run(VCMP_D0_D1, 0, &[(0, QNAN), (1, ONE)]);
        assert_eq!(flags, FpFlags::C | FpFlags::V);
    }

    #[test]
    fn test_cvt_double_to_single() {
        // VCVT.F32.F64 S0, D1
        let mut bank = ExtRegBank::new();
        bank.write_d(1, 0x3FF8_0000_0000_0000); // 1.5
        let flags = cpdo(&mut bank, 0xEEB70BC1, 0);
        assert_eq!(bank.read_s(0), 0x3FC0_0000);
        assert_eq!(flags, FpFlags::empty());
    }

    #[test]
    fn test_cvt_double_to_single_inexact() {
        let mut bank = ExtRegBank::new();
        // 1 + 2^-28 does not fit a single
        bank.write_d(1, 0x3FF0_0000_0100_0000);
        let flags = cpdo(&mut bank, 0xEEB70BC1, 0);
        assert_eq!(bank.read_s(0), 0x3F80_0000);
        assert_eq!(flags, FpFlags::IXC);
    }

    #[test]
    fn test_int_to_double_is_exact() {
        // VCVT.F64.S32 D0, S2 of -7
        let mut bank = ExtRegBank::new();
        bank.write_s(2, (-7i32) as u32);
        let flags = cpdo(&mut bank, 0xEEB80BC1, 0);
        assert_eq!(bank.read_d(0), 0xC01C_0000_0000_0000);
        assert_eq!(flags, FpFlags::empty());

        // Every i32 is exactly representable
        bank.write_s(2, i32::MAX as u32);
        let flags = cpdo(&mut bank, 0xEEB80BC1, 0);
        assert_eq!(bank.read_d(0), 0x41DF_FFFF_FFC0_0000);
        assert_eq!(flags, FpFlags::empty());
    }

    #[test]
    fn test_double_to_int_round_nearest() {
        // VCVT.S32.F64 (non-Z) of 2.5 under round-to-nearest: ties to even
        let mut bank = ExtRegBank::new();
        bank.write_d(1, 0x4004_0000_0000_0000);
        let flags = cpdo(&mut bank, 0xEEBD0B41, 0);
        assert_eq!(bank.read_s(0), 2);
        assert_eq!(flags, FpFlags::IXC);
    }

    #[test]
    fn test_double_to_int_saturates() {
        let mut bank = ExtRegBank::new();
        bank.write_d(1, 0x41F0_0000_0000_0000); // 2^32
        let flags = cpdo(&mut bank, 0xEEBD0BC1, 0);
        assert_eq!(bank.read_s(0), 0x7FFF_FFFF);
        assert_eq!(flags, FpFlags::IOC);
    }

    #[test]
    fn test_operands_in_range() {
        assert!(operands_in_range(VADD_D0_D1_D2));
        // Same encoding with the D bit set writes D16
        assert!(!operands_in_range(VADD_D0_D1_D2 | 1 << 22));
        // VCMP with the M bit set reads D17
        assert!(!operands_in_range(VCMP_D0_D1 | 1 << 5));
    }
}
