use std::{cell::RefCell, collections::HashMap};

use vmi_arch_amd64::{Amd64, Cr3, Registers};
use vmi_core::{
    Asid, Breakpoint, BreakpointKind, Va, VcpuId, VmiDebug, VmiDriver, VmiError, VmiInfo,
    VmiVcpu,
};

use super::BreakpointManager;

///////////////////////////////////////////////////////////////////////////////
// Mock Driver
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Installed {
    va: Va,
    length: u64,
    kind: BreakpointKind,
}

struct MockDriver {
    registers: RefCell<Vec<Registers>>,
    installed: RefCell<HashMap<VcpuId, Vec<Installed>>>,
    fail_remove_all: Option<VcpuId>,
}

impl MockDriver {
    fn new(vcpus: u16) -> Self {
        Self {
            registers: RefCell::new(vec![Registers::default(); vcpus as usize]),
            installed: RefCell::new(HashMap::new()),
            fail_remove_all: None,
        }
    }

    fn set_cr3(&self, vcpu: VcpuId, cr3: u64) {
        self.registers.borrow_mut()[vcpu.index()].cr3 = Cr3(cr3);
    }

    fn installed(&self, vcpu: VcpuId) -> Vec<Va> {
        let mut result = self
            .installed
            .borrow()
            .get(&vcpu)
            .map(|installed| installed.iter().map(|entry| entry.va).collect::<Vec<_>>())
            .unwrap_or_default();

        result.sort();
        result
    }

    fn total_installed(&self) -> usize {
        self.installed.borrow().values().map(Vec::len).sum()
    }
}

impl VmiDriver for MockDriver {
    type Architecture = Amd64;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        Ok(VmiInfo {
            vcpus: self.registers.borrow().len() as u16,
        })
    }
}

impl VmiVcpu for MockDriver {
    fn synchronize(&self, _vcpu: VcpuId) -> Result<(), VmiError> {
        Ok(())
    }

    fn registers(&self, vcpu: VcpuId) -> Result<Registers, VmiError> {
        self.registers
            .borrow()
            .get(vcpu.index())
            .copied()
            .ok_or(VmiError::VcpuNotFound(vcpu))
    }

    fn set_registers(&self, vcpu: VcpuId, registers: Registers) -> Result<(), VmiError> {
        self.registers.borrow_mut()[vcpu.index()] = registers;
        Ok(())
    }

    fn set_single_step(&self, _vcpu: VcpuId, _enable: bool) -> Result<(), VmiError> {
        Ok(())
    }

    fn flush_translation_cache(&self, _vcpu: VcpuId) -> Result<(), VmiError> {
        Ok(())
    }
}

impl VmiDebug for MockDriver {
    fn insert_breakpoint(
        &self,
        vcpu: VcpuId,
        va: Va,
        length: u64,
        kind: BreakpointKind,
    ) -> Result<(), VmiError> {
        let mut installed = self.installed.borrow_mut();
        let installed = installed.entry(vcpu).or_default();
        assert!(
            !installed.iter().any(|entry| entry.va == va),
            "duplicate hardware breakpoint at {va}"
        );
        installed.push(Installed { va, length, kind });
        Ok(())
    }

    fn remove_breakpoint(
        &self,
        vcpu: VcpuId,
        va: Va,
        length: u64,
        kind: BreakpointKind,
    ) -> Result<(), VmiError> {
        let mut installed = self.installed.borrow_mut();
        let installed = installed.entry(vcpu).or_default();
        let entry = Installed { va, length, kind };
        let index = installed
            .iter()
            .position(|candidate| *candidate == entry)
            .ok_or(VmiError::Other("breakpoint not installed"))?;
        installed.remove(index);
        Ok(())
    }

    fn remove_all_breakpoints(&self, vcpu: VcpuId) -> Result<(), VmiError> {
        self.installed.borrow_mut().remove(&vcpu);

        if self.fail_remove_all == Some(vcpu) {
            return Err(VmiError::Other("remove all failed"));
        }

        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////
// Tests
///////////////////////////////////////////////////////////////////////////////

const VCPU0: VcpuId = VcpuId(0);
const VCPU1: VcpuId = VcpuId(1);
const ASID_A: Asid = Asid(0x1000);
const ASID_B: Asid = Asid(0x2000);

fn software(asid: Asid, va: u64) -> Breakpoint {
    Breakpoint::new(asid, Va(va), 1, BreakpointKind::Software)
}

#[test]
fn insert_replaces_breakpoint_at_same_key() {
    let mut bpm = BreakpointManager::new();

    assert_eq!(bpm.insert(software(ASID_A, 0x4010)).unwrap(), None);

    let watchpoint = Breakpoint::new(ASID_A, Va(0x4010), 8, BreakpointKind::WatchpointWrite);
    assert_eq!(
        bpm.insert(watchpoint).unwrap(),
        Some(software(ASID_A, 0x4010))
    );

    assert_eq!(bpm.len(), 1);
    assert_eq!(bpm.get(ASID_A, Va(0x4010)), Some(&watchpoint));
}

#[test]
fn remove_cascades_empty_address_space() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(ASID_A, 0x4020)).unwrap();
    assert!(bpm.has_any(ASID_A));

    bpm.remove(&driver, ASID_A, Va(0x4010)).unwrap();
    assert!(bpm.has_any(ASID_A));

    bpm.remove(&driver, ASID_A, Va(0x4020)).unwrap();
    assert!(!bpm.has_any(ASID_A));
    assert!(bpm.is_empty());
    assert_eq!(bpm.asids().count(), 0);
}

#[test]
fn remove_of_missing_breakpoint_is_noop() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    assert_eq!(bpm.remove(&driver, ASID_A, Va(0x4010)).unwrap(), None);

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    assert_eq!(bpm.remove(&driver, ASID_B, Va(0x4010)).unwrap(), None);
    assert_eq!(bpm.remove(&driver, ASID_A, Va(0x4020)).unwrap(), None);
    assert_eq!(bpm.len(), 1);
}

#[test]
fn scoped_breakpoint_takes_precedence_over_global() {
    let mut bpm = BreakpointManager::new();

    let scoped = software(ASID_A, 0x4010);
    let global = software(Asid::GLOBAL, 0x4010);
    bpm.insert(scoped).unwrap();
    bpm.insert(global).unwrap();

    assert_eq!(
        bpm.lookup(ASID_A, Va(0x4010), BreakpointKind::Software),
        Some(&scoped)
    );
    assert_eq!(
        bpm.lookup(ASID_B, Va(0x4010), BreakpointKind::Software),
        Some(&global)
    );
}

#[test]
fn removing_scoped_breakpoint_falls_back_to_global() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    let global = software(Asid::GLOBAL, 0x4010);
    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(global).unwrap();

    bpm.remove(&driver, ASID_A, Va(0x4010)).unwrap();
    assert_eq!(
        bpm.lookup(ASID_A, Va(0x4010), BreakpointKind::Software),
        Some(&global)
    );
}

#[test]
fn kind_mismatch_is_a_miss() {
    let mut bpm = BreakpointManager::new();

    bpm.insert(Breakpoint::new(
        ASID_A,
        Va(0x4010),
        4,
        BreakpointKind::WatchpointRead,
    ))
    .unwrap();

    assert_eq!(
        bpm.lookup(ASID_A, Va(0x4010), BreakpointKind::WatchpointWrite),
        None
    );
    assert_eq!(
        bpm.lookup(ASID_A, Va(0x4010), BreakpointKind::Software),
        None
    );
}

#[test]
fn kind_mismatch_in_scope_still_consults_global() {
    let mut bpm = BreakpointManager::new();

    let global = Breakpoint::new(Asid::GLOBAL, Va(0x4010), 4, BreakpointKind::WatchpointWrite);
    bpm.insert(Breakpoint::new(
        ASID_A,
        Va(0x4010),
        4,
        BreakpointKind::WatchpointRead,
    ))
    .unwrap();
    bpm.insert(global).unwrap();

    assert_eq!(
        bpm.lookup(ASID_A, Va(0x4010), BreakpointKind::WatchpointWrite),
        Some(&global)
    );
}

#[test]
fn install_active_pushes_scoped_and_global_breakpoints() {
    let driver = MockDriver::new(2);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(ASID_B, 0x5010)).unwrap();
    bpm.insert(software(Asid::GLOBAL, 0x6010)).unwrap();

    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();

    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010), Va(0x6010)]);
    assert!(driver.installed(VCPU1).is_empty());
}

#[test]
fn install_active_is_idempotent() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();

    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();

    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010)]);
    assert_eq!(bpm.installed(VCPU0).count(), 1);
}

#[test]
fn scoped_breakpoint_shadows_global_in_hardware() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    let scoped = Breakpoint::new(ASID_A, Va(0x4010), 8, BreakpointKind::WatchpointWrite);
    let global = software(Asid::GLOBAL, 0x4010);
    bpm.insert(scoped).unwrap();
    bpm.insert(global).unwrap();

    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    assert!(bpm.is_installed(VCPU0, &scoped));
    assert!(!bpm.is_installed(VCPU0, &global));

    bpm.install_active(&driver, VCPU0, ASID_B).unwrap();
    assert!(!bpm.is_installed(VCPU0, &scoped));
    assert!(bpm.is_installed(VCPU0, &global));
    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010)]);
}

#[test]
fn refresh_swaps_address_space_breakpoints() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(ASID_B, 0x5010)).unwrap();
    bpm.insert(software(Asid::GLOBAL, 0x6010)).unwrap();

    bpm.refresh(&driver, VCPU0, ASID_B, ASID_A).unwrap();
    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010), Va(0x6010)]);

    bpm.refresh(&driver, VCPU0, ASID_A, ASID_B).unwrap();
    assert_eq!(driver.installed(VCPU0), vec![Va(0x5010), Va(0x6010)]);
}

#[test]
fn uninstall_active_pulls_scoped_and_global_breakpoints() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(Asid::GLOBAL, 0x6010)).unwrap();

    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    bpm.uninstall_active(&driver, VCPU0, ASID_A).unwrap();

    assert!(driver.installed(VCPU0).is_empty());
    assert!(!bpm.has_active());
    assert_eq!(bpm.len(), 2);
}

#[test]
fn remove_pulls_breakpoint_from_every_vcpu() {
    let driver = MockDriver::new(2);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    bpm.install_active(&driver, VCPU1, ASID_A).unwrap();
    assert_eq!(driver.total_installed(), 2);

    bpm.remove(&driver, ASID_A, Va(0x4010)).unwrap();
    assert_eq!(driver.total_installed(), 0);
    assert!(!bpm.has_active());
}

#[test]
fn removing_scoped_breakpoint_reinstalls_shadowed_global() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    let global = software(Asid::GLOBAL, 0x4010);
    bpm.insert(Breakpoint::new(
        ASID_A,
        Va(0x4010),
        8,
        BreakpointKind::WatchpointAccess,
    ))
    .unwrap();
    bpm.insert(global).unwrap();

    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    bpm.remove(&driver, ASID_A, Va(0x4010)).unwrap();

    assert!(bpm.is_installed(VCPU0, &global));
    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010)]);
}

#[test]
fn install_all_follows_each_vcpu_address_space() {
    let driver = MockDriver::new(2);
    let mut bpm = BreakpointManager::new();

    driver.set_cr3(VCPU0, ASID_A.0);
    driver.set_cr3(VCPU1, ASID_B.0);

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(ASID_B, 0x5010)).unwrap();

    bpm.install_all(&driver).unwrap();

    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010)]);
    assert_eq!(driver.installed(VCPU1), vec![Va(0x5010)]);
}

#[test]
fn remove_all_active_clears_every_vcpu() {
    let driver = MockDriver::new(2);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(Asid::GLOBAL, 0x6010)).unwrap();
    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    bpm.install_active(&driver, VCPU1, ASID_B).unwrap();

    bpm.remove_all_active(&driver).unwrap();

    assert_eq!(driver.total_installed(), 0);
    assert!(!bpm.has_active());
    assert_eq!(bpm.len(), 2);

    // The ledger was emptied, so installing again must not collide.
    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    assert_eq!(driver.installed(VCPU0), vec![Va(0x4010), Va(0x6010)]);
}

#[test]
fn remove_all_active_reports_first_error_but_clears_all() {
    let mut driver = MockDriver::new(2);
    driver.fail_remove_all = Some(VCPU0);

    let mut bpm = BreakpointManager::new();
    bpm.insert(software(Asid::GLOBAL, 0x6010)).unwrap();
    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();
    bpm.install_active(&driver, VCPU1, ASID_A).unwrap();

    assert!(bpm.remove_all_active(&driver).is_err());
    assert_eq!(driver.total_installed(), 0);
    assert!(!bpm.has_active());
}

#[test]
fn clear_unregisters_everything() {
    let driver = MockDriver::new(1);
    let mut bpm = BreakpointManager::new();

    bpm.insert(software(ASID_A, 0x4010)).unwrap();
    bpm.insert(software(ASID_B, 0x5010)).unwrap();
    bpm.install_active(&driver, VCPU0, ASID_A).unwrap();

    bpm.clear(&driver).unwrap();

    assert!(bpm.is_empty());
    assert!(!bpm.has_active());
    assert_eq!(driver.total_installed(), 0);
}
