use std::sync::Arc;

use hvx_core::{CachePolicy, Gpa, HvError, Hpa, MmuFlags, PAGE_SIZE};
use hvx_vm::{PageTable, Pmm, VmarFlags, Vmo, test_util::TestFormat};

use crate::GuestPhysicalAddressSpace;

type Gpas = GuestPhysicalAddressSpace<PageTable<TestFormat>>;

///////////////////////////////////////////////////////////////////////////////
// Test Helpers
///////////////////////////////////////////////////////////////////////////////

const GUEST_SIZE: u64 = 1 << 36;
const GICV_GPA: Gpa = Gpa(0x8_0000_1000);
const GICV_HPA: Hpa = Hpa(0x2c02_0000);
const GICV_SIZE: u64 = 0x2000;

fn create_gpas(pmm: &Arc<Pmm>) -> Result<Gpas, HvError> {
    Gpas::create(PageTable::new(pmm)?, GUEST_SIZE)
}

/// Maps `size` bytes of a fresh paged object at `addr` of the root region.
fn map_memory(
    pmm: &Arc<Pmm>,
    gpas: &Gpas,
    addr: u64,
    size: u64,
    flags: MmuFlags,
) -> Result<Arc<Vmo>, HvError> {
    let vmo = Vmo::create(pmm, size)?;
    gpas.root_vmar()
        .create_vm_mapping(addr, size, &vmo, 0, flags, "guest memory")?;
    Ok(vmo)
}

/// Maps a single page with `policy` and faults it in.
fn fault_with_policy(policy: CachePolicy) -> Result<CachePolicy, HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    let vmo = Vmo::create(&pmm, PAGE_SIZE)?;
    vmo.set_mapping_cache_policy(policy)?;
    gpas.root_vmar()
        .create_vm_mapping(0, PAGE_SIZE, &vmo, 0, MmuFlags::RW, "device memory")?;

    gpas.page_fault(Gpa(0))?;

    gpas.translate(Gpa(0))
        .map(|translation| translation.cache_policy)
        .ok_or(HvError::NotFound)
}

///////////////////////////////////////////////////////////////////////////////
// Tests
///////////////////////////////////////////////////////////////////////////////

#[test]
fn create() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    assert_eq!(gpas.size(), GUEST_SIZE);
    assert_eq!(gpas.root_vmar().base(), 0);
    assert_eq!(gpas.root_vmar().size(), GUEST_SIZE);
    assert_eq!(gpas.table_phys(), gpas.with_arch_aspace(|mmu| mmu.root()));

    assert_eq!(
        Gpas::create(PageTable::new(&pmm)?, 0).err(),
        Some(HvError::InvalidArgs)
    );
    Ok(())
}

#[test]
fn unmap_range_single_mapping() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    map_memory(&pmm, &gpas, 0, PAGE_SIZE, MmuFlags::RWX)?;
    gpas.page_fault(Gpa(0))?;
    assert!(gpas.is_mapped(Gpa(0)));

    gpas.unmap_range(Gpa(0), PAGE_SIZE)?;
    assert!(!gpas.is_mapped(Gpa(0)));
    assert_eq!(gpas.translate(Gpa(0)), None);

    // Unmapping twice is fine.
    gpas.unmap_range(Gpa(0), PAGE_SIZE)?;
    Ok(())
}

#[test]
fn unmap_range_outside_of_mapping() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    map_memory(&pmm, &gpas, 0, PAGE_SIZE, MmuFlags::RWX)?;

    gpas.unmap_range(Gpa(PAGE_SIZE * 8), PAGE_SIZE)?;
    assert!(gpas.is_mapped(Gpa(0)));
    Ok(())
}

#[test]
fn unmap_range_multiple_mappings() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    map_memory(&pmm, &gpas, 0, PAGE_SIZE * 2, MmuFlags::RWX)?;
    map_memory(&pmm, &gpas, PAGE_SIZE * 3, PAGE_SIZE * 2, MmuFlags::RWX)?;

    // Cut the tail of the first mapping and the head of the second.
    gpas.unmap_range(Gpa(PAGE_SIZE), PAGE_SIZE * 3)?;

    assert!(gpas.is_mapped(Gpa(0)));
    assert!(!gpas.is_mapped(Gpa(PAGE_SIZE)));
    assert!(!gpas.is_mapped(Gpa(PAGE_SIZE * 2)));
    assert!(!gpas.is_mapped(Gpa(PAGE_SIZE * 3)));
    assert!(gpas.is_mapped(Gpa(PAGE_SIZE * 4)));

    gpas.page_fault(Gpa(PAGE_SIZE * 4))?;
    assert_eq!(gpas.page_fault(Gpa(PAGE_SIZE)), Err(HvError::NotFound));
    Ok(())
}

#[test]
fn unmap_range_sub_region() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;
    let root = gpas.root_vmar();

    let sub = root.create_sub_vmar(PAGE_SIZE, PAGE_SIZE * 4, VmarFlags::CAN_MAP_RWX, "sub")?;
    let vmo = Vmo::create(&pmm, PAGE_SIZE * 2)?;
    sub.create_vm_mapping(PAGE_SIZE, PAGE_SIZE * 2, &vmo, 0, MmuFlags::RW, "sub memory")?;
    assert!(gpas.is_mapped(Gpa(PAGE_SIZE * 2)));

    gpas.unmap_range(Gpa(0), PAGE_SIZE * 8)?;

    assert!(!gpas.is_mapped(Gpa(PAGE_SIZE * 2)));
    assert!(!gpas.is_mapped(Gpa(PAGE_SIZE * 3)));

    // The emptied sub-region stays attached and usable.
    assert!(sub.has_parent());
    sub.create_vm_mapping(0, PAGE_SIZE, &vmo, 0, MmuFlags::READ, "again")?;
    assert!(gpas.is_mapped(Gpa(PAGE_SIZE)));
    Ok(())
}

#[test]
fn unmap_range_rejects_bad_ranges() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    assert_eq!(gpas.unmap_range(Gpa(0x10), PAGE_SIZE), Err(HvError::InvalidArgs));
    assert_eq!(gpas.unmap_range(Gpa(0), 0), Err(HvError::InvalidArgs));
    assert_eq!(
        gpas.unmap_range(Gpa(GUEST_SIZE), PAGE_SIZE),
        Err(HvError::InvalidArgs)
    );
    Ok(())
}

#[test]
fn page_fault_with_permissions() -> Result<(), HvError> {
    for flags in [MmuFlags::RWX, MmuFlags::READ, MmuFlags::RW, MmuFlags::RX] {
        let pmm = Pmm::new();
        let gpas = create_gpas(&pmm)?;
        let vmo = map_memory(&pmm, &gpas, 0, PAGE_SIZE * 4, flags)?;

        gpas.page_fault(Gpa(PAGE_SIZE * 2 + 0x10))?;

        let translation = gpas
            .translate(Gpa(PAGE_SIZE * 2 + 0x10))
            .ok_or(HvError::NotFound)?;
        assert_eq!(translation.flags, flags, "flags {flags}");
        assert_eq!(translation.cache_policy, CachePolicy::Cached);
        assert_eq!(translation.paddr.0 & (PAGE_SIZE - 1), 0x10);
        assert_eq!(vmo.committed_pages(), 1);

        // Faulting again on a present page is a no-op.
        gpas.page_fault(Gpa(PAGE_SIZE * 2))?;
        assert_eq!(vmo.committed_pages(), 1);
    }
    Ok(())
}

#[test]
fn page_fault_unmapped() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    assert_eq!(gpas.page_fault(Gpa(0x1000)), Err(HvError::NotFound));
    Ok(())
}

#[test]
fn map_interrupt_controller() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    gpas.map_interrupt_controller(GICV_GPA, GICV_HPA, GICV_SIZE)?;

    for page in 0..GICV_SIZE / PAGE_SIZE {
        let gpa = GICV_GPA + page * PAGE_SIZE;
        let translation = gpas.translate(gpa).ok_or(HvError::NotFound)?;

        assert!(gpas.is_mapped(gpa));
        assert_eq!(translation.paddr, GICV_HPA + page * PAGE_SIZE);
        assert_eq!(translation.flags, MmuFlags::RW);
        assert_eq!(translation.cache_policy, CachePolicy::UncachedDevice);
    }

    // The window is already taken.
    assert_eq!(
        gpas.map_interrupt_controller(GICV_GPA, GICV_HPA, GICV_SIZE),
        Err(HvError::AlreadyExists)
    );
    assert_eq!(
        gpas.map_interrupt_controller(Gpa(0), GICV_HPA, 0x10),
        Err(HvError::InvalidArgs)
    );
    Ok(())
}

#[test]
fn map_interrupt_controller_failure_leaves_no_mapping() -> Result<(), HvError> {
    // Room for the root table and one more: populating needs three.
    let pmm = Pmm::with_limit(2);
    let gpas = create_gpas(&pmm)?;

    assert_eq!(
        gpas.map_interrupt_controller(GICV_GPA, GICV_HPA, GICV_SIZE),
        Err(HvError::NoMemory)
    );
    assert!(!gpas.is_mapped(GICV_GPA));
    assert_eq!(gpas.translate(GICV_GPA), None);
    Ok(())
}

#[test]
fn uncached() -> Result<(), HvError> {
    assert_eq!(fault_with_policy(CachePolicy::Uncached)?, CachePolicy::Uncached);
    Ok(())
}

#[test]
fn uncached_device() -> Result<(), HvError> {
    assert_eq!(
        fault_with_policy(CachePolicy::UncachedDevice)?,
        CachePolicy::UncachedDevice
    );
    Ok(())
}

#[test]
fn write_combining() -> Result<(), HvError> {
    assert_eq!(
        fault_with_policy(CachePolicy::WriteCombining)?,
        CachePolicy::WriteCombining
    );
    Ok(())
}

#[test]
fn protect_write() -> Result<(), HvError> {
    let pmm = Pmm::new();
    let gpas = create_gpas(&pmm)?;

    map_memory(&pmm, &gpas, 0, PAGE_SIZE * 2, MmuFlags::RW)?;
    gpas.page_fault(Gpa(0))?;
    gpas.page_fault(Gpa(PAGE_SIZE))?;

    gpas.protect(Gpa(PAGE_SIZE), PAGE_SIZE, MmuFlags::READ)?;

    let flags = |gpa| gpas.translate(gpa).map(|translation| translation.flags);
    assert_eq!(flags(Gpa(0)), Some(MmuFlags::RW));
    assert_eq!(flags(Gpa(PAGE_SIZE)), Some(MmuFlags::READ));

    assert_eq!(
        gpas.protect(Gpa(PAGE_SIZE * 4), PAGE_SIZE, MmuFlags::READ),
        Err(HvError::NotFound)
    );
    Ok(())
}
