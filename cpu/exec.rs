//! VFP instruction dispatcher.
//!
//! Drives one pre-decoded instruction through condition and enable
//! checks, routes it to the soft-float kernels, the register-transfer
//! handlers or the load/store unit, then folds the returned exception
//! flags into FPSCR and decides whether a trap is taken.

use super::iface::{ArmCore, DataBus, MemFault};
use super::{ldst, Vfp};
use crate::decode::{self, CachedInstr, Opcode, Operands};
use crate::regs::SysReg;
use crate::softfloat::{double, single, FpFlags};

/// Outcome of executing one VFP instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Instruction completed (or its condition failed); PC has advanced
    Completed,
    /// Undefined-instruction exception: unit disabled, privilege
    /// violation or unpredictable encoding. No state changed.
    Undefined,
    /// A transfer faulted; base writeback was suppressed and the PC still
    /// points at the instruction
    DataAbort(MemFault),
    /// An exception bit with its trap enable set was raised; the PC still
    /// points at the instruction
    VfpTrap,
}

impl Vfp {
    /// Decode a CP10/CP11 word into a cacheable instruction record.
    pub fn try_decode(&self, word: u32) -> Option<CachedInstr> {
        decode::try_decode(word)
    }

    /// Execute one pre-decoded instruction.
    pub fn execute<C: ArmCore, B: DataBus>(
        &mut self,
        core: &mut C,
        bus: &mut B,
        instr: &CachedInstr,
    ) -> StepResult {
        let pc_next = core.gpr_read(15).wrapping_add(core.inst_size());

        // 1. Condition check: a failed condition only advances the PC
        if instr.cond != 0xE && !core.cond_passed(instr.cond) {
            core.gpr_write(15, pc_next);
            return StepResult::Completed;
        }

        // 2. Enable check. FPSID/FPEXC/MVFRn stay accessible with the
        // unit disabled, but only from a privileged mode.
        if let Operands::Status { reg, .. } = instr.operands {
            match SysReg::from_index(reg) {
                Some(sysreg) if sysreg.privileged_only() => {
                    if !core.is_privileged() {
                        return StepResult::Undefined;
                    }
                }
                _ => {
                    if !self.fpexc.en() {
                        return StepResult::Undefined;
                    }
                }
            }
        } else if !self.fpexc.en() {
            return StepResult::Undefined;
        }

        // 3. Dispatch by opcode class
        match instr.operands {
            Operands::Arith { dp } => {
                let in_range = if dp {
                    double::operands_in_range(instr.raw)
                } else {
                    single::operands_in_range(instr.raw)
                };
                if !in_range {
                    log::warn!(
                        "unpredictable register selection in {:#010x}",
                        instr.raw
                    );
                    return StepResult::Undefined;
                }
                let flags = if dp {
                    double::cpdo(&mut self.ext, instr.raw, self.fpscr.raw())
                } else {
                    single::cpdo(&mut self.ext, instr.raw, self.fpscr.raw())
                };
                self.retire(core, pc_next, flags)
            }

            Operands::MoveImm { single, d, imm } => {
                if !single && d > 15 {
                    return StepResult::Undefined;
                }
                if single {
                    self.ext.write_s(d as usize, imm);
                } else {
                    // The expanded immediate is the high word
                    self.ext.write_d(d as usize, (imm as u64) << 32);
                }
                self.complete(core, pc_next)
            }

            Operands::MoveReg { single, d, m } => {
                if !single && (d > 15 || m > 15) {
                    return StepResult::Undefined;
                }
                if single {
                    let value = self.ext.read_s(m as usize);
                    self.ext.write_s(d as usize, value);
                } else {
                    let value = self.ext.read_d(m as usize);
                    self.ext.write_d(d as usize, value);
                }
                self.complete(core, pc_next)
            }

            Operands::CoreSingle { to_arm, t, n } => {
                if to_arm {
                    core.gpr_write(t as usize, self.ext.read_s(n as usize));
                } else {
                    self.ext.write_s(n as usize, core.gpr_read(t as usize));
                }
                self.complete(core, pc_next)
            }

            Operands::Status { reg, rt } => {
                self.status_access(core, instr.opcode, reg, rt);
                self.complete(core, pc_next)
            }

            Operands::CorePairDouble { to_arm, t, t2, m } => {
                if m > 15 {
                    return StepResult::Undefined;
                }
                let low = m as usize * 2;
                if to_arm {
                    core.gpr_write(t as usize, self.ext.read_s(low));
                    core.gpr_write(t2 as usize, self.ext.read_s(low + 1));
                } else {
                    let lo = core.gpr_read(t as usize);
                    let hi = core.gpr_read(t2 as usize);
                    self.ext.write_s(low, lo);
                    self.ext.write_s(low + 1, hi);
                }
                self.complete(core, pc_next)
            }

            Operands::Lane => {
                // Lane-indexed scalar moves need kernel support that does
                // not exist; terminate loudly instead of corrupting guest
                // state.
                panic!(
                    "unimplemented VFP lane transfer {:?} ({:#010x})",
                    instr.opcode, instr.raw
                );
            }

            Operands::TransferOne {
                single,
                is_load,
                n,
                d,
                imm32,
                add,
            } => {
                if !single && d > 15 {
                    return StepResult::Undefined;
                }
                match ldst::transfer_one(
                    &mut self.ext,
                    core,
                    bus,
                    single,
                    is_load,
                    n,
                    d,
                    imm32,
                    add,
                ) {
                    Ok(()) => self.complete(core, pc_next),
                    Err(fault) => StepResult::DataAbort(fault),
                }
            }

            Operands::TransferMany {
                single,
                is_load,
                add,
                wback,
                d,
                n,
                imm32,
                regs,
            } => {
                let past_end = if single {
                    d as u32 + regs as u32 > 32
                } else {
                    d > 15 || d as u32 + regs as u32 > 16
                };
                if past_end {
                    return StepResult::Undefined;
                }
                if regs == 0 {
                    log::warn!("multi-register transfer {:#010x} with no registers", instr.raw);
                }
                match ldst::transfer_many(
                    &mut self.ext,
                    core,
                    bus,
                    single,
                    is_load,
                    add,
                    wback,
                    d,
                    n,
                    imm32,
                    regs,
                ) {
                    Ok(()) => self.complete(core, pc_next),
                    Err(fault) => StepResult::DataAbort(fault),
                }
            }
        }
    }

    /// VMRS / VMSR.
    fn status_access<C: ArmCore>(&mut self, core: &mut C, opcode: Opcode, reg: u8, rt: u8) {
        let sysreg = SysReg::from_index(reg);
        if opcode == Opcode::Vmrs {
            match sysreg {
                Some(SysReg::Fpscr) if rt == 15 => {
                    // VMRS APSR_nzcv, FPSCR
                    let fpscr = self.fpscr;
                    core.set_flags(fpscr.n(), fpscr.z(), fpscr.c(), fpscr.v());
                    log::trace!("vmrs flags <= fpscr[{:#010x}]", fpscr.raw());
                }
                Some(sysreg) => {
                    core.gpr_write(rt as usize, self.read_sysreg(sysreg));
                }
                None => {
                    log::debug!("vmrs from subarchitecture-defined register {}", reg);
                }
            }
        } else {
            match sysreg {
                Some(sysreg) => {
                    self.write_sysreg(sysreg, core.gpr_read(rt as usize));
                }
                None => {
                    log::debug!("vmsr to subarchitecture-defined register {}", reg);
                }
            }
        }
    }

    /// Merge kernel flags into FPSCR; raise a trap when a newly set
    /// exception bit has its enable set.
    fn retire<C: ArmCore>(&mut self, core: &mut C, pc_next: u32, flags: FpFlags) -> StepResult {
        if self.fpscr.apply(flags) {
            log::debug!("vfp trap raised, fpscr = {:#010x}", self.fpscr.raw());
            return StepResult::VfpTrap;
        }
        core.gpr_write(15, pc_next);
        StepResult::Completed
    }

    fn complete<C: ArmCore>(&self, core: &mut C, pc_next: u32) -> StepResult {
        core.gpr_write(15, pc_next);
        StepResult::Completed
    }
}
