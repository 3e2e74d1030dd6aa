use std::sync::Arc;

use hvx_core::{CachePolicy, Gpa, HvError, Hpa, MmuFlags, PAGE_SIZE};
use hvx_hypervisor::{GuestPacket, Port, TrapKind};
use hvx_vm::{Pmm, Vmo};
use parking_lot::Mutex;

use crate::{El2State, GICV_ADDRESS, GICV_SIZE, Guest, mock::MockEl2};

///////////////////////////////////////////////////////////////////////////////
// Test Helpers
///////////////////////////////////////////////////////////////////////////////

const GICV_PADDR: Hpa = Hpa(0x0801_0000);

fn setup(hardware: MockEl2) -> (Arc<MockEl2>, Arc<Pmm>, Arc<El2State>) {
    let hardware = Arc::new(hardware);
    let pmm = Pmm::new();
    let state = El2State::new(hardware.clone(), Arc::clone(&pmm));
    (hardware, pmm, state)
}

fn gicv2() -> MockEl2 {
    let mut hardware = MockEl2::default();
    hardware.gicv = Ok(Some(GICV_PADDR));
    hardware
}

///////////////////////////////////////////////////////////////////////////////
// Mock Port
///////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
struct RecordingPort {
    packets: Mutex<Vec<GuestPacket>>,
}

impl Port for RecordingPort {
    fn queue(&self, packet: GuestPacket) -> Result<(), HvError> {
        self.packets.lock().push(packet);
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////
// Tests
///////////////////////////////////////////////////////////////////////////////

#[test]
fn create_requires_el2() {
    let mut hardware = MockEl2::default();
    hardware.boot_el = 1;
    let (_hardware, pmm, state) = setup(hardware);

    assert_eq!(Guest::create(&state).err(), Some(HvError::NotSupported));
    assert_eq!(pmm.allocated_pages(), 0);
}

#[test]
fn create_gicv3() -> Result<(), HvError> {
    let (_hardware, _pmm, state) = setup(MockEl2::default());
    let guest = Guest::create(&state)?;

    assert_eq!(guest.vmid(), 1);
    assert!(!guest.gpas().is_mapped(GICV_ADDRESS));
    Ok(())
}

#[test]
fn create_maps_gicv() -> Result<(), HvError> {
    let (_hardware, _pmm, state) = setup(gicv2());
    let guest = Guest::create(&state)?;

    for offset in [0, PAGE_SIZE] {
        let translation = guest
            .gpas()
            .translate(GICV_ADDRESS + offset)
            .ok_or(HvError::NotFound)?;

        assert_eq!(translation.paddr, GICV_PADDR + offset);
        assert_eq!(translation.flags, MmuFlags::RW);
        assert_eq!(translation.cache_policy, CachePolicy::UncachedDevice);
    }

    assert!(!guest.gpas().is_mapped(GICV_ADDRESS + GICV_SIZE));
    Ok(())
}

#[test]
fn create_propagates_gic_errors() {
    let mut hardware = MockEl2::default();
    hardware.gicv = Err(HvError::BadState);
    let (_hardware, pmm, state) = setup(hardware);

    assert_eq!(Guest::create(&state).err(), Some(HvError::BadState));
    assert_eq!(pmm.allocated_pages(), 0);

    // The VMID went back to the pool.
    assert!(state.alloc_vmid().is_ok_and(|vmid| vmid.val() == 1));
}

#[test]
fn guests_get_distinct_vmids() -> Result<(), HvError> {
    let (_hardware, pmm, state) = setup(gicv2());

    let first = Guest::create(&state)?;
    let second = Guest::create(&state)?;
    assert_eq!((first.vmid(), second.vmid()), (1, 2));

    drop(first);
    let third = Guest::create(&state)?;
    assert_eq!(third.vmid(), 1);

    drop(second);
    drop(third);
    assert_eq!(pmm.allocated_pages(), 0);
    Ok(())
}

#[test]
fn recycled_vmid_starts_with_clean_tlb() -> Result<(), HvError> {
    let (hardware, pmm, state) = setup(MockEl2::default());

    let guest = Guest::create(&state)?;
    let vmo = Vmo::create(&pmm, PAGE_SIZE)?;
    guest
        .gpas()
        .root_vmar()
        .create_vm_mapping(0x4000_0000, PAGE_SIZE, &vmo, 0, MmuFlags::RWX, "ram")?;
    guest.gpas().page_fault(Gpa(0x4000_0000))?;

    let vmid = guest.vmid();
    assert!(hardware.invalidations().is_empty());
    drop(guest);
    assert_eq!(hardware.invalidations(), [vmid]);

    let next = Guest::create(&state)?;
    assert_eq!(next.vmid(), vmid);
    assert_eq!(hardware.invalidations(), [vmid]);
    Ok(())
}

#[test]
fn set_trap_validates_arguments() -> Result<(), HvError> {
    let (_hardware, _pmm, state) = setup(MockEl2::default());
    let guest = Guest::create(&state)?;
    let port: Arc<dyn Port> = Arc::new(RecordingPort::default());

    assert_eq!(
        guest.set_trap(TrapKind::Io, 0x60, 1, None, 0),
        Err(HvError::NotSupported)
    );
    assert_eq!(
        guest.set_trap(TrapKind::Mem, 0, PAGE_SIZE, Some(port), 0),
        Err(HvError::InvalidArgs)
    );
    assert_eq!(
        guest.set_trap(TrapKind::Bell, 0, PAGE_SIZE, None, 0),
        Err(HvError::InvalidArgs)
    );
    assert_eq!(
        guest.set_trap(TrapKind::Mem, 0, 0x800, None, 0),
        Err(HvError::InvalidArgs)
    );
    assert_eq!(
        guest.set_trap(TrapKind::Mem, 0, 0, None, 0),
        Err(HvError::InvalidArgs)
    );
    Ok(())
}

#[test]
fn set_trap_unmaps_and_invalidates() -> Result<(), HvError> {
    let (hardware, pmm, state) = setup(MockEl2::default());
    let guest = Guest::create(&state)?;
    let gpas = guest.gpas();

    let vmo = Vmo::create(&pmm, 2 * PAGE_SIZE)?;
    gpas.root_vmar()
        .create_vm_mapping(0x10_0000, 2 * PAGE_SIZE, &vmo, 0, MmuFlags::RWX, "ram")?;
    gpas.page_fault(Gpa(0x10_0000))?;
    gpas.page_fault(Gpa(0x10_1000))?;
    assert!(hardware.invalidations().is_empty());

    let port = Arc::new(RecordingPort::default());
    guest.set_trap(
        TrapKind::Bell,
        0x10_1000,
        PAGE_SIZE,
        Some(port.clone() as Arc<dyn Port>),
        7,
    )?;

    assert!(gpas.is_mapped(Gpa(0x10_0000)));
    assert!(!gpas.is_mapped(Gpa(0x10_1000)));
    assert_eq!(hardware.invalidations(), [guest.vmid()]);

    guest
        .traps()
        .find_trap(TrapKind::Bell, 0x10_1008)?
        .queue(0x10_1008)?;
    assert_eq!(port.packets.lock().len(), 1);

    // Protecting the remaining page flushes it as well.
    gpas.protect(Gpa(0x10_0000), PAGE_SIZE, MmuFlags::READ)?;
    assert_eq!(hardware.invalidations(), [1, 1]);
    Ok(())
}
