//! VFP load/store unit.
//!
//! Address computation and byte-ordered transfer for VLDR/VSTR and the
//! multi-register VLDM/VSTM family (VPUSH/VPOP arrive here already
//! normalised to VSTM/VLDM form by the decoder). Every word is validated
//! through the MMU before the access; on a fault the instruction aborts
//! with the base register untouched, leaving any words already
//! transferred in place.

use super::iface::{ArmCore, DataBus, MemFault};
use crate::regs::ExtRegBank;

fn load_word<B: DataBus>(bus: &mut B, vaddr: u32) -> Result<u32, MemFault> {
    let paddr = bus.check_access(vaddr, true)?;
    Ok(bus.read32(vaddr, paddr))
}

fn store_word<B: DataBus>(bus: &mut B, vaddr: u32, value: u32) -> Result<(), MemFault> {
    let paddr = bus.check_access(vaddr, false)?;
    bus.write32(vaddr, paddr, value);
    Ok(())
}

/// VLDR / VSTR. The base reads as the aligned PC plus 8 when `n` is R15.
#[allow(clippy::too_many_arguments)]
pub(super) fn transfer_one<C: ArmCore, B: DataBus>(
    ext: &mut ExtRegBank,
    core: &C,
    bus: &mut B,
    single: bool,
    is_load: bool,
    n: u8,
    d: u8,
    imm32: u32,
    add: bool,
) -> Result<(), MemFault> {
    let base = if n == 15 {
        (core.gpr_read(15) & !3).wrapping_add(8)
    } else {
        core.gpr_read(n as usize)
    };
    let addr = if add {
        base.wrapping_add(imm32)
    } else {
        base.wrapping_sub(imm32)
    };

    let d = d as usize;
    if single {
        if is_load {
            let value = load_word(bus, addr)?;
            log::trace!("vldr s{} <= [{:#010x}] = {:#010x}", d, addr, value);
            ext.write_s(d, value);
        } else {
            let value = ext.read_s(d);
            log::trace!("vstr [{:#010x}] <= s{} = {:#010x}", addr, d, value);
            store_word(bus, addr, value)?;
        }
    } else if is_load {
        // Low word first, matching the register alias order
        let low = load_word(bus, addr)?;
        let high = load_word(bus, addr.wrapping_add(4))?;
        log::trace!("vldr d{} <= [{:#010x}] = {:#010x}:{:#010x}", d, addr, high, low);
        ext.write_s(d * 2, low);
        ext.write_s(d * 2 + 1, high);
    } else {
        store_word(bus, addr, ext.read_s(d * 2))?;
        store_word(bus, addr.wrapping_add(4), ext.read_s(d * 2 + 1))?;
        log::trace!("vstr [{:#010x}] <= d{}", addr, d);
    }
    Ok(())
}

/// VLDM / VSTM / VPUSH / VPOP. Transfers run in ascending register and
/// address order regardless of the add bit, which only selects the start
/// address; writeback is deferred until every transfer has succeeded.
#[allow(clippy::too_many_arguments)]
pub(super) fn transfer_many<C: ArmCore, B: DataBus>(
    ext: &mut ExtRegBank,
    core: &mut C,
    bus: &mut B,
    single: bool,
    is_load: bool,
    add: bool,
    wback: bool,
    d: u8,
    n: u8,
    imm32: u32,
    regs: u8,
) -> Result<(), MemFault> {
    let base = core.gpr_read(n as usize);
    let mut addr = if add { base } else { base.wrapping_sub(imm32) };

    for i in 0..regs as usize {
        if single {
            let reg = d as usize + i;
            if is_load {
                let value = load_word(bus, addr)?;
                log::trace!("vldm s{} <= [{:#010x}] = {:#010x}", reg, addr, value);
                ext.write_s(reg, value);
            } else {
                let value = ext.read_s(reg);
                log::trace!("vstm [{:#010x}] <= s{} = {:#010x}", addr, reg, value);
                store_word(bus, addr, value)?;
            }
            addr = addr.wrapping_add(4);
        } else {
            let low = (d as usize + i) * 2;
            if is_load {
                let lo = load_word(bus, addr)?;
                let hi = load_word(bus, addr.wrapping_add(4))?;
                log::trace!("vldm d{} <= [{:#010x}]", d as usize + i, addr);
                ext.write_s(low, lo);
                ext.write_s(low + 1, hi);
            } else {
                store_word(bus, addr, ext.read_s(low))?;
                store_word(bus, addr.wrapping_add(4), ext.read_s(low + 1))?;
                log::trace!("vstm [{:#010x}] <= d{}", addr, d as usize + i);
            }
            addr = addr.wrapping_add(8);
        }
    }

    if wback {
        let updated = if add {
            base.wrapping_add(imm32)
        } else {
            base.wrapping_sub(imm32)
        };
        log::trace!("writeback r{} <= {:#010x}", n, updated);
        core.gpr_write(n as usize, updated);
    }
    Ok(())
}
