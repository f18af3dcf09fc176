//! End-to-end tests.
//!
//! Drives the full decode/dispatch/execute pipeline against mock ARM core
//! and bus collaborators: the documented behaviour scenarios, the
//! cross-module invariants (register aliasing, sticky status bits,
//! condition skip, fault atomicity) and the trap plumbing.

use std::collections::HashMap;

use crate::cpu::{ArmCore, DataBus, MemFault, StepResult, Vfp};
use crate::decode::InstrCache;
use crate::softfloat::FpFlags;

#[derive(Debug, Default)]
struct TestCore {
    regs: [u32; 16],
    n: bool,
    z: bool,
    c: bool,
    v: bool,
    user_mode: bool,
    thumb: bool,
}

impl ArmCore for TestCore {
    fn cond_passed(&self, cond: u8) -> bool {
        match cond {
            0x0 => self.z,
            0x1 => !self.z,
            0x2 => self.c,
            0x3 => !self.c,
            0x4 => self.n,
            0x5 => !self.n,
            0x6 => self.v,
            0x7 => !self.v,
            0x8 => self.c && !self.z,
            0x9 => !self.c || self.z,
            0xA => self.n == self.v,
            0xB => self.n != self.v,
            0xC => !self.z && self.n == self.v,
            0xD => self.z || self.n != self.v,
            _ => true,
        }
    }

    fn inst_size(&self) -> u32 {
        if self.thumb {
            2
        } else {
            4
        }
    }

    fn gpr_read(&self, reg: usize) -> u32 {
        self.regs[reg]
    }

    fn gpr_write(&mut self, reg: usize, value: u32) {
        self.regs[reg] = value;
    }

    fn set_flags(&mut self, n: bool, z: bool, c: bool, v: bool) {
        self.n = n;
        self.z = z;
        self.c = c;
        self.v = v;
    }

    fn is_privileged(&self) -> bool {
        !self.user_mode
    }
}

#[derive(Debug, Default)]
struct TestBus {
    mem: HashMap<u32, u32>,
    fault_at: Option<u32>,
}

impl DataBus for TestBus {
    fn check_access(&mut self, vaddr: u32, is_load: bool) -> Result<u32, MemFault> {
        if self.fault_at == Some(vaddr) {
            return Err(MemFault { vaddr, is_load });
        }
        Ok(vaddr)
    }

    fn read32(&mut self, vaddr: u32, _paddr: u32) -> u32 {
        self.mem.get(&vaddr).copied().unwrap_or(0)
    }

    fn write32(&mut self, vaddr: u32, _paddr: u32, value: u32) {
        self.mem.insert(vaddr, value);
    }
}

fn step(vfp: &mut Vfp, core: &mut TestCore, bus: &mut TestBus, word: u32) -> StepResult {
    let instr = vfp.try_decode(word).expect("word should decode");
    vfp.execute(core, bus, &instr)
}

#[test]
fn test_scenario_vmla_single() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(0, 0x3F80_0000); // 1.0
    vfp.ext_mut().write_s(1, 0x4000_0000); // 2.0
    vfp.ext_mut().write_s(2, 0x4040_0000); // 3.0

    // VMLA.F32 S0, S1, S2
    let result = step(&mut vfp, &mut core, &mut bus, 0xEE000A81);
    assert_eq!(result, StepResult::Completed);
    assert_eq!(vfp.ext().read_s(0), 0x40E0_0000); // 7.0
    assert_eq!(vfp.fpscr().raw(), 0);
    assert_eq!(core.regs[15], 4);
}

#[test]
fn test_scenario_vmla_double() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_d(0, 0x3FF8_0000_0000_0000); // 1.5
    vfp.ext_mut().write_d(1, 0x4004_0000_0000_0000); // 2.5

    // VMLA.F64 D1, D0, D0: 2.5 + 1.5 * 1.5 = 4.75
    let result = step(&mut vfp, &mut core, &mut bus, 0xEE011B00);
    assert_eq!(result, StepResult::Completed);
    assert_eq!(vfp.ext().read_d(1), 0x4013_0000_0000_0000);
    assert!(!vfp.fpscr().cumulative().contains(FpFlags::IXC));
}

#[test]
fn test_scenario_vcmp_signalling_nan() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(0, 0x7F80_0001); // signalling NaN

    // VCMP.F32 S1, S0
    let result = step(&mut vfp, &mut core, &mut bus, 0xEEF40A40);
    assert_eq!(result, StepResult::Completed);
    let fpscr = vfp.fpscr();
    assert!(!fpscr.n());
    assert!(!fpscr.z());
    assert!(fpscr.c());
    assert!(fpscr.v());
    assert!(fpscr.cumulative().contains(FpFlags::IOC));
}

#[test]
fn test_scenario_disabled_unit_raises_undefined() {
    let mut vfp = Vfp::default();
    let mut fpexc = vfp.fpexc();
    fpexc.set_en(false);
    vfp.write_sysreg(crate::regs::SysReg::Fpexc, fpexc.raw());

    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(1, 0x4000_0000);

    let before = vfp.snapshot();
    let result = step(&mut vfp, &mut core, &mut bus, 0xEE000A81);
    assert_eq!(result, StepResult::Undefined);
    assert_eq!(vfp.snapshot(), before);
    // The PC was not advanced
    assert_eq!(core.regs[15], 0);
}

#[test]
fn test_scenario_vpush() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[13] = 0x1000;
    vfp.ext_mut().write_s(0, 0x1111_1111);
    vfp.ext_mut().write_s(1, 0x2222_2222);

    // VPUSH {S0, S1}
    let result = step(&mut vfp, &mut core, &mut bus, 0xED2D0A02);
    assert_eq!(result, StepResult::Completed);
    assert_eq!(bus.mem.get(&0xFF8), Some(&0x1111_1111));
    assert_eq!(bus.mem.get(&0xFFC), Some(&0x2222_2222));
    assert_eq!(core.regs[13], 0xFF8);
}

#[test]
fn test_scenario_vsqrt_pi() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(4, 0x4049_0FDB);

    // VSQRT.F32 S0, S4
    let result = step(&mut vfp, &mut core, &mut bus, 0xEEB10AC2);
    assert_eq!(result, StepResult::Completed);
    assert_eq!(vfp.ext().read_s(0), 0x3FE2_DFC5);
    assert_eq!(vfp.fpscr().cumulative(), FpFlags::IXC);
}

#[test]
fn test_condition_skip_changes_only_pc() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(1, 0x3F80_0000);
    vfp.ext_mut().write_s(2, 0x3F80_0000);
    core.z = false; // EQ fails

    let before = vfp.snapshot();
    // VADDEQ.F32 S0, S1, S2
    let result = step(&mut vfp, &mut core, &mut bus, 0x0E300A81);
    assert_eq!(result, StepResult::Completed);
    assert_eq!(vfp.snapshot(), before);
    assert_eq!(core.regs[15], 4);

    // With Z set the add happens
    core.z = true;
    core.regs[15] = 0;
    step(&mut vfp, &mut core, &mut bus, 0x0E300A81);
    assert_eq!(vfp.ext().read_s(0), 0x4000_0000);
}

#[test]
fn test_thumb_pc_advance() {
    let mut vfp = Vfp::default();
    let mut core = TestCore {
        thumb: true,
        ..TestCore::default()
    };
    let mut bus = TestBus::default();
    step(&mut vfp, &mut core, &mut bus, 0xEE000A81);
    assert_eq!(core.regs[15], 2);
}

#[test]
fn test_sticky_cumulative_bits() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(1, 0x3F80_0000);

    // VDIV.F32 S0, S1, S2 with S2 = 0 raises DZC
    step(&mut vfp, &mut core, &mut bus, 0xEE800A81);
    assert!(vfp.fpscr().cumulative().contains(FpFlags::DZC));

    // A clean operation leaves it set
    vfp.ext_mut().write_s(2, 0x3F80_0000);
    step(&mut vfp, &mut core, &mut bus, 0xEE300A81);
    assert!(vfp.fpscr().cumulative().contains(FpFlags::DZC));
}

#[test]
fn test_trap_enable_raises_vfp_trap() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    // IXE: inexact trap enable, bit 12
    vfp.write_sysreg(crate::regs::SysReg::Fpscr, 1 << 12);
    vfp.ext_mut().write_s(1, 0x3F80_0000); // 1.0
    vfp.ext_mut().write_s(2, 0x4040_0000); // 3.0

    // VDIV.F32 S0, S1, S2 is inexact
    let result = step(&mut vfp, &mut core, &mut bus, 0xEE800A81);
    assert_eq!(result, StepResult::VfpTrap);
    // Sticky bit is set regardless, the PC stays on the instruction
    assert!(vfp.fpscr().cumulative().contains(FpFlags::IXC));
    assert_eq!(core.regs[15], 0);
}

#[test]
fn test_vldr_vstr_roundtrip() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[2] = 0x2000;
    vfp.ext_mut().write_s(1, 0xCAFE_F00D);

    // VSTR S1, [R2, #8]
    step(&mut vfp, &mut core, &mut bus, 0xEDC2_0A02);
    assert_eq!(bus.mem.get(&0x2008), Some(&0xCAFE_F00D));

    // VLDR S3, [R2, #8]
    step(&mut vfp, &mut core, &mut bus, 0xEDD2_1A02);
    assert_eq!(vfp.ext().read_s(3), 0xCAFE_F00D);
}

#[test]
fn test_vldr_pc_relative() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[15] = 0x8002; // unaligned PC is masked
    bus.mem.insert(0x8010, 0x1234_5678);

    // VLDR S0, [PC, #8]: base = (0x8002 & !3) + 8 = 0x8008
    step(&mut vfp, &mut core, &mut bus, 0xED9F_0A02);
    assert_eq!(vfp.ext().read_s(0), 0x1234_5678);
}

#[test]
fn test_vldm_vstm_symmetry_double() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[3] = 0x3000;
    vfp.ext_mut().write_d(1, 0x1122_3344_5566_7788);
    vfp.ext_mut().write_d(2, 0x99AA_BBCC_DDEE_FF00);

    // VSTMIA R3, {D1, D2}
    step(&mut vfp, &mut core, &mut bus, 0xEC83_1B04);
    // Low word of D1 lands at the base address
    assert_eq!(bus.mem.get(&0x3000), Some(&0x5566_7788));
    assert_eq!(bus.mem.get(&0x3004), Some(&0x1122_3344));

    vfp.ext_mut().write_d(1, 0);
    vfp.ext_mut().write_d(2, 0);

    // VLDMIA R3, {D1, D2}
    step(&mut vfp, &mut core, &mut bus, 0xEC93_1B04);
    assert_eq!(vfp.ext().read_d(1), 0x1122_3344_5566_7788);
    assert_eq!(vfp.ext().read_d(2), 0x99AA_BBCC_DDEE_FF00);
}

#[test]
fn test_vstm_writeback() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[3] = 0x3000;

    // VSTMIA R3!, {S0-S2}
    step(&mut vfp, &mut core, &mut bus, 0xECA3_0A03);
    assert_eq!(core.regs[3], 0x300C);
}

#[test]
fn test_data_abort_suppresses_writeback() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[13] = 0x1000;
    bus.fault_at = Some(0xFFC);
    vfp.ext_mut().write_s(0, 0xAAAA_AAAA);
    vfp.ext_mut().write_s(1, 0xBBBB_BBBB);

    // VPUSH {S0, S1}: the second word faults
    let result = step(&mut vfp, &mut core, &mut bus, 0xED2D0A02);
    assert_eq!(
        result,
        StepResult::DataAbort(MemFault {
            vaddr: 0xFFC,
            is_load: false,
        })
    );
    // The first transfer stays visible, the base register and PC do not
    // move
    assert_eq!(bus.mem.get(&0xFF8), Some(&0xAAAA_AAAA));
    assert_eq!(core.regs[13], 0x1000);
    assert_eq!(core.regs[15], 0);
}

#[test]
fn test_vpop_restores_pushed_values() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[13] = 0x1000;
    vfp.ext_mut().write_s(0, 0x0BAD_CAFE);
    vfp.ext_mut().write_s(1, 0xFEED_FACE);

    step(&mut vfp, &mut core, &mut bus, 0xED2D0A02); // VPUSH {S0, S1}
    vfp.ext_mut().write_s(0, 0);
    vfp.ext_mut().write_s(1, 0);
    step(&mut vfp, &mut core, &mut bus, 0xECBD0A02); // VPOP {S0, S1}

    assert_eq!(vfp.ext().read_s(0), 0x0BAD_CAFE);
    assert_eq!(vfp.ext().read_s(1), 0xFEED_FACE);
    assert_eq!(core.regs[13], 0x1000);
}

#[test]
fn test_vmov_immediate_double_clears_low_word() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_d(1, 0xFFFF_FFFF_FFFF_FFFF);

    // VMOV.F64 D1, #-2.0
    step(&mut vfp, &mut core, &mut bus, 0xEEB81B00);
    assert_eq!(vfp.ext().read_d(1), 0xC000_0000_0000_0000);
}

#[test]
fn test_vmov_between_core_and_single() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[2] = 0x4100_0000;

    // VMOV S3, R2
    step(&mut vfp, &mut core, &mut bus, 0xEE012A90);
    assert_eq!(vfp.ext().read_s(3), 0x4100_0000);

    // VMOV R4, S3
    step(&mut vfp, &mut core, &mut bus, 0xEE114A90);
    assert_eq!(core.regs[4], 0x4100_0000);
}

#[test]
fn test_vmov_pair_double_roundtrip() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[1] = 0xDDDD_0000;
    core.regs[4] = 0x0000_EEEE;

    // VMOV D0, R1, R4
    step(&mut vfp, &mut core, &mut bus, 0xEC44_1B10);
    assert_eq!(vfp.ext().read_d(0), 0x0000_EEEE_DDDD_0000);

    // VMOV R5, R6, D0
    step(&mut vfp, &mut core, &mut bus, 0xEC56_5B10);
    assert_eq!(core.regs[5], 0xDDDD_0000);
    assert_eq!(core.regs[6], 0x0000_EEEE);
}

#[test]
fn test_vmrs_vmsr_fpscr() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    core.regs[1] = 0x0360_001F;

    // VMSR FPSCR, R1
    step(&mut vfp, &mut core, &mut bus, 0xEEE1_1A10);
    assert_eq!(vfp.fpscr().raw(), 0x0360_001F);

    // VMRS R2, FPSCR
    step(&mut vfp, &mut core, &mut bus, 0xEEF1_2A10);
    assert_eq!(core.regs[2], 0x0360_001F);
}

#[test]
fn test_vmrs_apsr_nzcv() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    vfp.ext_mut().write_s(0, 0x3F80_0000);
    vfp.ext_mut().write_s(1, 0x4000_0000);

    // VCMP.F32 S0, S1 then VMRS APSR_nzcv, FPSCR
    step(&mut vfp, &mut core, &mut bus, 0xEEB40A60);
    step(&mut vfp, &mut core, &mut bus, 0xEEF1_FA10);
    assert!(core.n);
    assert!(!core.z);
    assert!(!core.c);
    assert!(!core.v);
}

#[test]
fn test_fpsid_requires_privilege_but_not_enable() {
    let mut vfp = Vfp::default();
    let mut fpexc = vfp.fpexc();
    fpexc.set_en(false);
    vfp.write_sysreg(crate::regs::SysReg::Fpexc, fpexc.raw());

    let mut core = TestCore::default();
    let mut bus = TestBus::default();

    // Privileged VMRS R2, FPSID succeeds with the unit disabled
    let result = step(&mut vfp, &mut core, &mut bus, 0xEEF0_2A10);
    assert_eq!(result, StepResult::Completed);
    assert_eq!(core.regs[2], 0x4101_20B4);

    // User-mode access raises Undefined even when enabled
    let mut fpexc = vfp.fpexc();
    fpexc.set_en(true);
    vfp.write_sysreg(crate::regs::SysReg::Fpexc, fpexc.raw());
    core.user_mode = true;
    let result = step(&mut vfp, &mut core, &mut bus, 0xEEF0_2A10);
    assert_eq!(result, StepResult::Undefined);

    // FPSCR stays accessible from user mode
    let result = step(&mut vfp, &mut core, &mut bus, 0xEEF1_2A10);
    assert_eq!(result, StepResult::Completed);
}

#[test]
fn test_unpredictable_double_selection_undefined() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();

    // VADD.F64 with the D bit set would write D16
    let before = vfp.snapshot();
    let result = step(&mut vfp, &mut core, &mut bus, 0xEE310B02 | 1 << 22);
    assert_eq!(result, StepResult::Undefined);
    assert_eq!(vfp.snapshot(), before);

    // VLDM running past D15 is rejected before any transfer
    core.regs[3] = 0x3000;
    let result = step(&mut vfp, &mut core, &mut bus, 0xEC93_EB06);
    assert_eq!(result, StepResult::Undefined);
}

#[test]
#[should_panic(expected = "unimplemented VFP lane transfer")]
fn test_lane_moves_terminate() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    // VMOV.32 D0[0], R1
    step(&mut vfp, &mut core, &mut bus, 0xEE00_1B10);
}

#[test]
fn test_pipeline_through_instruction_cache() {
    let mut vfp = Vfp::default();
    let mut core = TestCore::default();
    let mut bus = TestBus::default();
    let mut cache = InstrCache::new();

    let block = [0xEE000A81u32, 0xEEB10AC2];
    for (index, word) in block.iter().enumerate() {
        let instr = vfp.try_decode(*word).expect("block words decode");
        cache.insert(index, instr);
    }

    vfp.ext_mut().write_s(0, 0x3F80_0000);
    vfp.ext_mut().write_s(1, 0x4000_0000);
    vfp.ext_mut().write_s(2, 0x4040_0000);
    vfp.ext_mut().write_s(4, 0x4110_0000); // 9.0

    for index in 0..block.len() {
        let instr = *cache.get(index).expect("cached");
        assert_eq!(vfp.execute(&mut core, &mut bus, &instr), StepResult::Completed);
    }

    assert_eq!(vfp.ext().read_s(0), 0x4040_0000); // sqrt(9.0) overwrote 7.0
    assert_eq!(core.regs[15], 8);

    cache.flush();
    assert!(cache.get(0).is_none());
}
