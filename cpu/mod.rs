//! The VFP co-processor unit.
//!
//! [`Vfp`] owns the extension register bank and the FPSCR/FPEXC/FPSID
//! system registers of one simulated core; the dispatcher in [`exec`]
//! drives it against the pre-decoded instruction stream. A multi-core
//! simulator instantiates one `Vfp` per core.

/// Collaborator traits towards the ARM core and the MMU
pub mod iface;

/// Dispatcher / execution engine
pub mod exec;

/// Load/store unit
mod ldst;

pub use exec::StepResult;
pub use iface::{ArmCore, DataBus, MemFault};

use crate::regs::{ExtRegBank, Fpexc, Fpscr, SysReg, VfpSnapshot};

/// Identification constants of the emulated implementation.
#[derive(Debug, Clone, Copy)]
pub struct VfpConfig {
    /// FPSID value, read-only identification
    pub fpsid: u32,
    /// MVFR0 value, read-only feature register
    pub mvfr0: u32,
    /// MVFR1 value, read-only feature register
    pub mvfr1: u32,
}

impl Default for VfpConfig {
    fn default() -> Self {
        // A VFP11-style implementer/revision with VFPv3-D16 features
        Self {
            fpsid: 0x4101_20B4,
            mvfr0: 0x1011_0221,
            mvfr1: 0x0000_0011,
        }
    }
}

/// VFP co-processor state for one simulated CPU.
#[derive(Debug)]
pub struct Vfp {
    pub(crate) ext: ExtRegBank,
    pub(crate) fpscr: Fpscr,
    pub(crate) fpexc: Fpexc,
    config: VfpConfig,
}

impl Default for Vfp {
    fn default() -> Self {
        Self::new(VfpConfig::default())
    }
}

impl Vfp {
    /// Create a unit in its reset state. The unit starts enabled so
    /// bare-metal guests work without a boot stub; clear FPEXC.EN through
    /// [`Vfp::write_sysreg`] to model a disabled-at-reset core.
    pub fn new(config: VfpConfig) -> Self {
        Self {
            ext: ExtRegBank::new(),
            fpscr: Fpscr::default(),
            fpexc: Fpexc::default(),
            config,
        }
    }

    /// Extension register bank
    pub fn ext(&self) -> &ExtRegBank {
        &self.ext
    }

    /// Mutable extension register bank, for simulator setup
    pub fn ext_mut(&mut self) -> &mut ExtRegBank {
        &mut self.ext
    }

    /// FPSCR
    pub fn fpscr(&self) -> Fpscr {
        self.fpscr
    }

    /// FPEXC
    pub fn fpexc(&self) -> Fpexc {
        self.fpexc
    }

    /// Read a system register (MRC / VMRS path)
    pub fn read_sysreg(&self, reg: SysReg) -> u32 {
        match reg {
            SysReg::Fpsid => self.config.fpsid,
            SysReg::Fpscr => self.fpscr.raw(),
            SysReg::Mvfr1 => self.config.mvfr1,
            SysReg::Mvfr0 => self.config.mvfr0,
            SysReg::Fpexc => self.fpexc.raw(),
        }
    }

    /// Write a system register (MCR / VMSR path). Writes to the read-only
    /// identification registers are ignored.
    pub fn write_sysreg(&mut self, reg: SysReg, value: u32) {
        match reg {
            SysReg::Fpscr => self.fpscr.set_raw(value),
            SysReg::Fpexc => self.fpexc.set_raw(value),
            SysReg::Fpsid | SysReg::Mvfr0 | SysReg::Mvfr1 => {
                log::debug!("ignoring write {:#010x} to read-only {:?}", value, reg);
            }
        }
    }

    /// Capture the observable state for a simulator save-state.
    pub fn snapshot(&self) -> VfpSnapshot {
        VfpSnapshot {
            ext: *self.ext.words(),
            fpscr: self.fpscr.raw(),
            fpexc: self.fpexc.raw(),
            fpsid: self.config.fpsid,
        }
    }

    /// Restore a previously captured save-state.
    pub fn restore(&mut self, snapshot: &VfpSnapshot) {
        self.ext.load_words(&snapshot.ext);
        self.fpscr.set_raw(snapshot.fpscr);
        self.fpexc.set_raw(snapshot.fpexc);
        self.config.fpsid = snapshot.fpsid;
    }

    /// Dump the unit state for debugging
    pub fn dump(&self) {
        log::info!("VFP system registers:");
        log::info!("  FPSID = {:#010x}", self.config.fpsid);
        log::info!("  FPSCR = {:#010x}", self.fpscr.raw());
        log::info!("  FPEXC = {:#010x}", self.fpexc.raw());
        for i in 0..16 {
            log::info!("  D{:02} = {:#018x}", i, self.ext.read_d(i));
        }
    }
}
