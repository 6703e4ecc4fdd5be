#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
};

use kvm_vmi::{
    Asid, BreakpointKind, Feature, LbrInfo, Notification, Va, VcpuId, VmiDebug, VmiDriver,
    VmiError, VmiFeatures, VmiInfo, VmiOptions, VmiSession, VmiVcpu,
    arch::amd64::{Amd64, Cr3, Registers},
};

pub type Session = VmiSession<MockHypervisor, mpsc::Sender<Notification>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Creates an initialized session over `vcpus` mock vCPUs, all executing in
/// address space `0x1000`.
pub fn session(vcpus: u16) -> (Session, mpsc::Receiver<Notification>) {
    session_with(vcpus, VmiOptions::default())
}

pub fn session_with(
    vcpus: u16,
    options: VmiOptions,
) -> (Session, mpsc::Receiver<Notification>) {
    init_tracing();

    let driver = MockHypervisor::new(vcpus);
    for vcpu in 0..vcpus {
        driver.set_cr3(VcpuId(vcpu), 0x1000);
    }

    let (tx, rx) = mpsc::channel();
    let session = VmiSession::new(driver, tx).with_options(options);
    session.initialize();
    (session, rx)
}

///////////////////////////////////////////////////////////////////////////////
// Mock Hypervisor
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    pub va: Va,
    pub length: u64,
    pub kind: BreakpointKind,
}

/// Mock hypervisor shared by the control thread and the vCPU threads.
pub struct MockHypervisor {
    registers: Mutex<Vec<Registers>>,
    installed: Mutex<HashMap<VcpuId, Vec<Installed>>>,
    single_step: Mutex<HashMap<VcpuId, bool>>,
    features: Mutex<Vec<Feature>>,
    flushed: Mutex<Vec<VcpuId>>,
    lbr: Mutex<LbrInfo>,

    fail_features: AtomicBool,
    fail_single_step: AtomicBool,
    fail_registers: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

impl MockHypervisor {
    pub fn new(vcpus: u16) -> Self {
        Self {
            registers: Mutex::new(vec![Registers::default(); usize::from(vcpus)]),
            installed: Mutex::new(HashMap::new()),
            single_step: Mutex::new(HashMap::new()),
            features: Mutex::new(Vec::new()),
            flushed: Mutex::new(Vec::new()),
            lbr: Mutex::new(LbrInfo::default()),
            fail_features: AtomicBool::new(false),
            fail_single_step: AtomicBool::new(false),
            fail_registers: AtomicBool::new(false),
        }
    }

    pub fn fail_features(&self, fail: bool) {
        self.fail_features.store(fail, Ordering::SeqCst);
    }

    pub fn fail_single_step(&self, fail: bool) {
        self.fail_single_step.store(fail, Ordering::SeqCst);
    }

    pub fn fail_registers(&self, fail: bool) {
        self.fail_registers.store(fail, Ordering::SeqCst);
    }

    pub fn set_cr3(&self, vcpu: VcpuId, cr3: u64) {
        lock(&self.registers)[vcpu.index()].cr3 = Cr3(cr3);
    }

    pub fn set_rip(&self, vcpu: VcpuId, rip: u64) {
        lock(&self.registers)[vcpu.index()].rip = rip;
    }

    pub fn set_lbr(&self, lbr: LbrInfo) {
        *lock(&self.lbr) = lbr;
    }

    /// Returns the addresses installed on `vcpu`, sorted.
    pub fn installed(&self, vcpu: VcpuId) -> Vec<Va> {
        let mut result = lock(&self.installed)
            .get(&vcpu)
            .map(|installed| installed.iter().map(|entry| entry.va).collect::<Vec<_>>())
            .unwrap_or_default();

        result.sort();
        result
    }

    pub fn installed_entries(&self, vcpu: VcpuId) -> Vec<Installed> {
        lock(&self.installed)
            .get(&vcpu)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_installed(&self) -> usize {
        lock(&self.installed).values().map(Vec::len).sum()
    }

    pub fn is_single_stepping(&self, vcpu: VcpuId) -> bool {
        lock(&self.single_step)
            .get(&vcpu)
            .copied()
            .unwrap_or(false)
    }

    pub fn features(&self) -> Vec<Feature> {
        lock(&self.features).clone()
    }

    pub fn last_feature(&self) -> Option<Feature> {
        lock(&self.features).last().copied()
    }

    pub fn flushed(&self) -> Vec<VcpuId> {
        lock(&self.flushed).clone()
    }
}

impl VmiDriver for MockHypervisor {
    type Architecture = Amd64;

    fn info(&self) -> Result<VmiInfo, VmiError> {
        let vcpus = u16::try_from(lock(&self.registers).len())
            .map_err(|_| VmiError::Other("too many vCPUs"))?;
        Ok(VmiInfo { vcpus })
    }
}

impl VmiVcpu for MockHypervisor {
    fn synchronize(&self, vcpu: VcpuId) -> Result<(), VmiError> {
        if vcpu.index() >= lock(&self.registers).len() {
            return Err(VmiError::VcpuNotFound(vcpu));
        }

        Ok(())
    }

    fn registers(&self, vcpu: VcpuId) -> Result<Registers, VmiError> {
        if self.fail_registers.load(Ordering::SeqCst) {
            return Err(VmiError::Other("registers unavailable"));
        }

        lock(&self.registers)
            .get(vcpu.index())
            .copied()
            .ok_or(VmiError::VcpuNotFound(vcpu))
    }

    fn set_registers(&self, vcpu: VcpuId, registers: Registers) -> Result<(), VmiError> {
        lock(&self.registers)[vcpu.index()] = registers;
        Ok(())
    }

    fn set_single_step(&self, vcpu: VcpuId, enable: bool) -> Result<(), VmiError> {
        if self.fail_single_step.load(Ordering::SeqCst) {
            return Err(VmiError::Other("single-step unavailable"));
        }

        lock(&self.single_step).insert(vcpu, enable);
        Ok(())
    }

    fn flush_translation_cache(&self, vcpu: VcpuId) -> Result<(), VmiError> {
        lock(&self.flushed).push(vcpu);
        Ok(())
    }
}

impl VmiDebug for MockHypervisor {
    fn insert_breakpoint(
        &self,
        vcpu: VcpuId,
        va: Va,
        length: u64,
        kind: BreakpointKind,
    ) -> Result<(), VmiError> {
        let mut installed = lock(&self.installed);
        let installed = installed.entry(vcpu).or_default();
        assert!(
            !installed.iter().any(|entry| entry.va == va),
            "duplicate hardware breakpoint at {va} on vCPU {vcpu}"
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
        let mut installed = lock(&self.installed);
        let installed = installed.entry(vcpu).or_default();

        match installed.iter().position(|entry| *entry == Installed { va, length, kind }) {
            Some(index) => {
                installed.remove(index);
                Ok(())
            }
            None => Err(VmiError::Other("breakpoint not installed")),
        }
    }

    fn remove_all_breakpoints(&self, vcpu: VcpuId) -> Result<(), VmiError> {
        lock(&self.installed).remove(&vcpu);
        Ok(())
    }
}

impl VmiFeatures for MockHypervisor {
    fn update_feature(&self, feature: Feature) -> Result<(), VmiError> {
        if self.fail_features.load(Ordering::SeqCst) {
            return Err(VmiError::Other("feature update rejected"));
        }

        lock(&self.features).push(feature);
        Ok(())
    }

    fn last_branch_record(&self, vcpu: VcpuId) -> Result<LbrInfo, VmiError> {
        self.synchronize(vcpu)?;
        Ok(lock(&self.lbr).clone())
    }
}

pub fn task_switch_trap(asid: u64, trap_in: bool, trap_out: bool) -> Feature {
    Feature::TaskSwitch {
        enable: true,
        asid: Asid(asid),
        trap_in,
        trap_out,
    }
}

pub fn task_switch_disabled(asid: u64) -> Feature {
    Feature::TaskSwitch {
        enable: false,
        asid: Asid(asid),
        trap_in: false,
        trap_out: false,
    }
}
