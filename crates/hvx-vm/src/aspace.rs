use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use hvx_core::{Hex, HvError, MmuFlags, PAGE_SIZE, is_page_aligned, page_align_down};
use parking_lot::Mutex;

use crate::{ArchMmu, Translation, Vmo};

bitflags::bitflags! {
    /// Capabilities of an address region.
    ///
    /// A region may only contain sub-regions with a subset of its
    /// capabilities, and mappings whose permissions it allows.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VmarFlags: u32 {
        /// Readable mappings may be created.
        const CAN_MAP_READ = 1 << 0;

        /// Writable mappings may be created.
        const CAN_MAP_WRITE = 1 << 1;

        /// Executable mappings may be created.
        const CAN_MAP_EXECUTE = 1 << 2;

        /// Any mapping may be created.
        const CAN_MAP_RWX = Self::CAN_MAP_READ.bits()
            | Self::CAN_MAP_WRITE.bits()
            | Self::CAN_MAP_EXECUTE.bits();
    }
}

impl VmarFlags {
    /// Checks whether mappings with `flags` may be created in the region.
    pub fn allows(self, flags: MmuFlags) -> bool {
        let required = [
            (MmuFlags::READ, Self::CAN_MAP_READ),
            (MmuFlags::WRITE, Self::CAN_MAP_WRITE),
            (MmuFlags::EXECUTE, Self::CAN_MAP_EXECUTE),
        ];

        required
            .into_iter()
            .all(|(permission, capability)| !flags.contains(permission) || self.contains(capability))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(u64);

struct Region {
    base: u64,
    size: u64,
    flags: VmarFlags,
    parent: Option<NodeId>,
    children: BTreeMap<u64, NodeId>,
    name: Box<str>,
}

struct Mapping {
    base: u64,
    size: u64,
    parent: NodeId,
    vmo: Arc<Vmo>,
    vmo_offset: u64,
    flags: MmuFlags,
    name: Box<str>,
}

enum Node {
    Region(Region),
    Mapping(Mapping),
}

impl Node {
    fn base(&self) -> u64 {
        match self {
            Node::Region(region) => region.base,
            Node::Mapping(mapping) => mapping.base,
        }
    }

    fn end(&self) -> u64 {
        match self {
            Node::Region(region) => region.base + region.size,
            Node::Mapping(mapping) => mapping.base + mapping.size,
        }
    }
}

fn page_count(len: u64) -> usize {
    (len / PAGE_SIZE) as usize
}

/// An address space: a tree of regions and mappings, plus the page tables
/// that realize the mappings.
///
/// All operations on the tree and the tables are serialized by a single lock.
pub struct VmAspace<M>
where
    M: ArchMmu,
{
    name: Box<str>,
    base: u64,
    size: u64,
    root: NodeId,
    inner: Mutex<AspaceInner<M>>,
}

struct AspaceInner<M> {
    mmu: M,
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
}

impl<M> VmAspace<M>
where
    M: ArchMmu,
{
    /// Creates an address space covering `[base, base + size)` backed by
    /// `mmu`.
    pub fn create(mmu: M, base: u64, size: u64, name: &str) -> Result<Arc<Self>, HvError> {
        if size == 0 || !is_page_aligned(base) || !is_page_aligned(size) {
            return Err(HvError::InvalidArgs);
        }

        if base.checked_add(size).is_none() {
            return Err(HvError::OutOfRange);
        }

        let root = NodeId(0);
        let region = Region {
            base,
            size,
            flags: VmarFlags::CAN_MAP_RWX,
            parent: None,
            children: BTreeMap::new(),
            name: "root".into(),
        };

        tracing::debug!(name, base = %Hex(base), size = %Hex(size), "created address space");

        Ok(Arc::new(Self {
            name: name.into(),
            base,
            size,
            root,
            inner: Mutex::new(AspaceInner {
                mmu,
                nodes: HashMap::from([(root, Node::Region(region))]),
                next_id: 1,
            }),
        }))
    }

    /// Returns the name of the address space.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the region spanning the whole address space.
    pub fn root_vmar(self: &Arc<Self>) -> Vmar<M> {
        Vmar {
            aspace: Arc::clone(self),
            id: self.root,
            base: self.base,
            size: self.size,
            flags: VmarFlags::CAN_MAP_RWX,
        }
    }

    /// Returns the base address of the address space.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the size of the address space in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Runs `f` with the page tables of the address space.
    pub fn with_mmu<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.inner.lock().mmu)
    }

    /// Runs `f` with the page tables of the address space, mutably.
    ///
    /// Changes made through `f` bypass the region tree.
    pub fn with_mmu_mut<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.inner.lock().mmu)
    }

    /// Checks whether a mapping covers `addr`.
    ///
    /// This looks at the region tree only; the page backing `addr` need not
    /// be committed or present in the page tables.
    pub fn is_mapped(&self, addr: u64) -> bool {
        self.inner.lock().find_mapping(self.root, addr).is_some()
    }

    /// Returns the translation currently installed for `addr`.
    pub fn query(&self, addr: u64) -> Option<Translation> {
        self.inner.lock().mmu.query(page_align_down(addr)).map(|translation| Translation {
            paddr: translation.paddr + (addr & (PAGE_SIZE - 1)),
            ..translation
        })
    }

    /// Resolves a fault at `addr` by committing the backing page and
    /// installing its translation.
    ///
    /// Succeeds without changes when a translation is already present, which
    /// happens when several faults on the same page race.
    pub fn page_fault(&self, addr: u64) -> Result<(), HvError> {
        self.inner.lock().page_fault(self.root, addr)
    }
}

impl<M> AspaceInner<M>
where
    M: ArchMmu,
{
    fn alloc_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn region(&self, id: NodeId) -> Result<&Region, HvError> {
        match self.nodes.get(&id) {
            Some(Node::Region(region)) => Ok(region),
            _ => Err(HvError::BadState),
        }
    }

    fn region_mut(&mut self, id: NodeId) -> Result<&mut Region, HvError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Region(region)) => Ok(region),
            _ => Err(HvError::BadState),
        }
    }

    fn mapping(&self, id: NodeId) -> Result<&Mapping, HvError> {
        match self.nodes.get(&id) {
            Some(Node::Mapping(mapping)) => Ok(mapping),
            _ => Err(HvError::BadState),
        }
    }

    fn mapping_mut(&mut self, id: NodeId) -> Result<&mut Mapping, HvError> {
        match self.nodes.get_mut(&id) {
            Some(Node::Mapping(mapping)) => Ok(mapping),
            _ => Err(HvError::BadState),
        }
    }

    /// Returns the direct child of `region` containing `addr`.
    fn child_containing(&self, region: &Region, addr: u64) -> Option<NodeId> {
        let (_, &id) = region.children.range(..=addr).next_back()?;
        (self.nodes.get(&id)?.end() > addr).then_some(id)
    }

    /// Returns the mapping containing `addr`, descending through sub-regions.
    fn find_mapping(&self, mut region: NodeId, addr: u64) -> Option<NodeId> {
        loop {
            let id = self.child_containing(self.region(region).ok()?, addr)?;

            match self.nodes.get(&id)? {
                Node::Region(_) => region = id,
                Node::Mapping(_) => return Some(id),
            }
        }
    }

    fn check_vacant(&self, region: &Region, base: u64, size: u64) -> Result<(), HvError> {
        // Children are sorted and disjoint, so only the last child starting
        // before the end of the range can reach into it.
        if let Some((_, id)) = region.children.range(..base + size).next_back()
            && self.nodes.get(id).is_some_and(|node| node.end() > base)
        {
            return Err(HvError::AlreadyExists);
        }

        Ok(())
    }

    /// Validates a region-relative range and returns its absolute base.
    fn check_child_range(region: &Region, offset: u64, size: u64) -> Result<u64, HvError> {
        if size == 0 || !is_page_aligned(offset) || !is_page_aligned(size) {
            return Err(HvError::InvalidArgs);
        }

        match offset.checked_add(size) {
            Some(end) if end <= region.size => Ok(region.base + offset),
            _ => Err(HvError::InvalidArgs),
        }
    }

    /// Validates an absolute range and returns its end.
    fn check_range(region: &Region, base: u64, len: u64) -> Result<u64, HvError> {
        if len == 0 || !is_page_aligned(base) || !is_page_aligned(len) {
            return Err(HvError::InvalidArgs);
        }

        match base.checked_add(len) {
            Some(end) if base >= region.base && end <= region.base + region.size => Ok(end),
            _ => Err(HvError::InvalidArgs),
        }
    }

    fn insert(&mut self, parent: NodeId, node: Node) -> Result<NodeId, HvError> {
        let base = node.base();
        let id = self.alloc_id();

        self.region_mut(parent)?.children.insert(base, id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn create_region(
        &mut self,
        parent: NodeId,
        offset: u64,
        size: u64,
        flags: VmarFlags,
        name: &str,
    ) -> Result<NodeId, HvError> {
        let region = self.region(parent)?;
        let base = Self::check_child_range(region, offset, size)?;

        if !region.flags.contains(flags) {
            return Err(HvError::AccessDenied);
        }

        self.check_vacant(region, base, size)?;

        tracing::debug!(name, base = %Hex(base), size = %Hex(size), "created region");

        self.insert(
            parent,
            Node::Region(Region {
                base,
                size,
                flags,
                parent: Some(parent),
                children: BTreeMap::new(),
                name: name.into(),
            }),
        )
    }

    #[expect(clippy::too_many_arguments)]
    fn create_mapping(
        &mut self,
        parent: NodeId,
        offset: u64,
        size: u64,
        vmo: &Arc<Vmo>,
        vmo_offset: u64,
        flags: MmuFlags,
        name: &str,
    ) -> Result<NodeId, HvError> {
        let region = self.region(parent)?;
        let base = Self::check_child_range(region, offset, size)?;

        if !is_page_aligned(vmo_offset) {
            return Err(HvError::InvalidArgs);
        }

        match vmo_offset.checked_add(size) {
            Some(end) if end <= vmo.size() => {}
            _ => return Err(HvError::OutOfRange),
        }

        if !region.flags.allows(flags) {
            return Err(HvError::AccessDenied);
        }

        self.check_vacant(region, base, size)?;

        tracing::debug!(name, base = %Hex(base), size = %Hex(size), %flags, "created mapping");

        vmo.add_mapping();
        self.insert(
            parent,
            Node::Mapping(Mapping {
                base,
                size,
                parent,
                vmo: Arc::clone(vmo),
                vmo_offset,
                flags,
                name: name.into(),
            }),
        )
    }

    fn remove_mapping(&mut self, id: NodeId) -> Result<(), HvError> {
        let (parent, base) = {
            let mapping = self.mapping(id)?;
            (mapping.parent, mapping.base)
        };

        if let Some(Node::Mapping(mapping)) = self.nodes.remove(&id) {
            mapping.vmo.remove_mapping();
        }

        self.region_mut(parent)?.children.remove(&base);
        Ok(())
    }

    /// Splits a mapping at `at`, returning the id of the upper half. The
    /// original id keeps the lower half.
    fn split_mapping(&mut self, id: NodeId, at: u64) -> Result<NodeId, HvError> {
        let mapping = self.mapping_mut(id)?;
        let offset = at - mapping.base;

        let tail = Mapping {
            base: at,
            size: mapping.size - offset,
            parent: mapping.parent,
            vmo: Arc::clone(&mapping.vmo),
            vmo_offset: mapping.vmo_offset + offset,
            flags: mapping.flags,
            name: mapping.name.clone(),
        };

        mapping.size = offset;
        tail.vmo.add_mapping();

        let parent = tail.parent;
        self.insert(parent, Node::Mapping(tail))
    }

    /// Moves the start of a mapping up to `base`, dropping the pages below.
    fn rebase_mapping(&mut self, id: NodeId, base: u64) -> Result<(), HvError> {
        let mapping = self.mapping_mut(id)?;
        let old_base = mapping.base;
        let delta = base - old_base;

        mapping.base = base;
        mapping.size -= delta;
        mapping.vmo_offset += delta;

        let parent = mapping.parent;
        let children = &mut self.region_mut(parent)?.children;
        children.remove(&old_base);
        children.insert(base, id);
        Ok(())
    }

    fn unmap_mapping(&mut self, id: NodeId, lo: u64, hi: u64) -> Result<(), HvError> {
        let (base, end) = {
            let mapping = self.mapping(id)?;
            (mapping.base, mapping.base + mapping.size)
        };

        self.mmu.unmap(lo, page_count(hi - lo))?;

        match (lo == base, hi == end) {
            (true, true) => self.remove_mapping(id),
            (true, false) => self.rebase_mapping(id, hi),
            (false, true) => {
                self.mapping_mut(id)?.size = lo - base;
                Ok(())
            }
            (false, false) => {
                self.split_mapping(id, hi)?;
                self.mapping_mut(id)?.size = lo - base;
                Ok(())
            }
        }
    }

    /// Removes every mapping in `[base, end)` below `region`.
    ///
    /// Sub-regions are descended into but never removed.
    fn unmap_in(&mut self, region: NodeId, base: u64, end: u64) -> Result<(), HvError> {
        let targets: Vec<NodeId> = self
            .region(region)?
            .children
            .range(..end)
            .rev()
            .map(|(_, &id)| id)
            .take_while(|id| self.nodes.get(id).is_some_and(|node| node.end() > base))
            .collect();

        for id in targets {
            let (lo, hi, is_region) = match self.nodes.get(&id) {
                Some(node) => (
                    base.max(node.base()),
                    end.min(node.end()),
                    matches!(node, Node::Region(_)),
                ),
                None => continue,
            };

            if is_region {
                self.unmap_in(id, lo, hi)?;
            }
            else {
                self.unmap_mapping(id, lo, hi)?;
            }
        }

        Ok(())
    }

    fn protect_in(
        &mut self,
        region: NodeId,
        base: u64,
        end: u64,
        flags: MmuFlags,
    ) -> Result<(), HvError> {
        // Validate the whole range first so a failure leaves nothing changed.
        let mut cursor = base;
        while cursor < end {
            let id = self.find_mapping(region, cursor).ok_or(HvError::NotFound)?;
            let mapping = self.mapping(id)?;

            if !self.region(mapping.parent)?.flags.allows(flags) {
                return Err(HvError::AccessDenied);
            }

            cursor = mapping.base + mapping.size;
        }

        let mut cursor = base;
        while cursor < end {
            let mut id = self.find_mapping(region, cursor).ok_or(HvError::NotFound)?;

            if self.mapping(id)?.base < cursor {
                id = self.split_mapping(id, cursor)?;
            }

            let mapping_end = {
                let mapping = self.mapping(id)?;
                mapping.base + mapping.size
            };

            if mapping_end > end {
                self.split_mapping(id, end)?;
            }

            let hi = mapping_end.min(end);
            self.mapping_mut(id)?.flags = flags;
            self.mmu.protect(cursor, page_count(hi - cursor), flags)?;
            cursor = hi;
        }

        Ok(())
    }

    fn map_range(&mut self, id: NodeId, offset: u64, len: u64, commit: bool) -> Result<(), HvError> {
        let mapping = self.mapping(id)?;

        if !is_page_aligned(offset) || !is_page_aligned(len) {
            return Err(HvError::InvalidArgs);
        }

        let end = match offset.checked_add(len) {
            Some(end) if end <= mapping.size => end,
            _ => return Err(HvError::OutOfRange),
        };

        if mapping.flags.is_empty() {
            return Ok(());
        }

        let base = mapping.base;
        let vmo = Arc::clone(&mapping.vmo);
        let vmo_offset = mapping.vmo_offset;
        let flags = mapping.flags;
        let cache_policy = vmo.cache_policy();

        for page_offset in (offset..end).step_by(PAGE_SIZE as usize) {
            let vaddr = base + page_offset;
            if self.mmu.query(vaddr).is_some() {
                continue;
            }

            if let Some(paddr) = vmo.get_page(vmo_offset + page_offset, commit)? {
                self.mmu.map(vaddr, &[paddr], flags, cache_policy)?;
            }
        }

        Ok(())
    }

    fn page_fault(&mut self, root: NodeId, addr: u64) -> Result<(), HvError> {
        let id = self.find_mapping(root, addr).ok_or(HvError::NotFound)?;

        let page = page_align_down(addr);
        if self.mmu.query(page).is_some() {
            return Ok(());
        }

        let mapping = self.mapping(id)?;
        if mapping.flags.is_empty() {
            return Err(HvError::AccessDenied);
        }

        let vmo = Arc::clone(&mapping.vmo);
        let offset = mapping.vmo_offset + (page - mapping.base);
        let flags = mapping.flags;

        let paddr = vmo.get_page(offset, true)?.ok_or(HvError::NoMemory)?;
        tracing::trace!(addr = %Hex(addr), %paddr, %flags, "resolved page fault");

        self.mmu.map(page, &[paddr], flags, vmo.cache_policy())
    }

    fn destroy_mapping(&mut self, id: NodeId) -> Result<(), HvError> {
        let (base, size) = {
            let mapping = self.mapping(id)?;
            (mapping.base, mapping.size)
        };

        self.mmu.unmap(base, page_count(size))?;
        self.remove_mapping(id)
    }

    fn destroy_region(&mut self, id: NodeId) -> Result<(), HvError> {
        let (children, parent, base) = {
            let region = self.region(id)?;
            let children: Vec<NodeId> = region.children.values().copied().collect();
            (children, region.parent, region.base)
        };

        for child in children {
            match self.nodes.get(&child) {
                Some(Node::Region(_)) => self.destroy_region(child)?,
                Some(Node::Mapping(_)) => self.destroy_mapping(child)?,
                None => {}
            }
        }

        if let Some(Node::Region(region)) = self.nodes.remove(&id) {
            tracing::debug!(name = &*region.name, base = %Hex(base), "destroyed region");
        }

        if let Some(parent) = parent {
            self.region_mut(parent)?.children.remove(&base);
        }

        Ok(())
    }
}

impl<M> Drop for AspaceInner<M> {
    fn drop(&mut self) {
        for node in self.nodes.values() {
            if let Node::Mapping(mapping) = node {
                mapping.vmo.remove_mapping();
            }
        }
    }
}

/// A handle to a region of an address space.
///
/// Regions partition the space hierarchically; a region may contain
/// sub-regions and mappings, which never overlap each other.
pub struct Vmar<M>
where
    M: ArchMmu,
{
    aspace: Arc<VmAspace<M>>,
    id: NodeId,
    base: u64,
    size: u64,
    flags: VmarFlags,
}

impl<M> Clone for Vmar<M>
where
    M: ArchMmu,
{
    fn clone(&self) -> Self {
        Self {
            aspace: Arc::clone(&self.aspace),
            id: self.id,
            base: self.base,
            size: self.size,
            flags: self.flags,
        }
    }
}

impl<M> Vmar<M>
where
    M: ArchMmu,
{
    /// Returns the address space the region belongs to.
    pub fn aspace(&self) -> &Arc<VmAspace<M>> {
        &self.aspace
    }

    /// Returns the absolute base address of the region.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the capabilities of the region.
    pub fn flags(&self) -> VmarFlags {
        self.flags
    }

    /// Checks whether the region is still attached to a parent region.
    ///
    /// Always `false` for the root region and for destroyed regions.
    pub fn has_parent(&self) -> bool {
        matches!(
            self.aspace.inner.lock().nodes.get(&self.id),
            Some(Node::Region(Region {
                parent: Some(_),
                ..
            }))
        )
    }

    /// Checks whether the region has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.aspace.inner.lock().region(self.id).is_err()
    }

    /// Creates a sub-region at `offset` bytes into this region.
    pub fn create_sub_vmar(
        &self,
        offset: u64,
        size: u64,
        flags: VmarFlags,
        name: &str,
    ) -> Result<Vmar<M>, HvError> {
        let id = self
            .aspace
            .inner
            .lock()
            .create_region(self.id, offset, size, flags, name)?;

        Ok(Vmar {
            aspace: Arc::clone(&self.aspace),
            id,
            base: self.base + offset,
            size,
            flags,
        })
    }

    /// Maps `size` bytes of `vmo`, starting at `vmo_offset`, at `offset`
    /// bytes into this region.
    ///
    /// Nothing is written to the page tables; pages are installed on fault or
    /// by [`VmMapping::map_range`].
    pub fn create_vm_mapping(
        &self,
        offset: u64,
        size: u64,
        vmo: &Arc<Vmo>,
        vmo_offset: u64,
        flags: MmuFlags,
        name: &str,
    ) -> Result<VmMapping<M>, HvError> {
        let id = self.aspace.inner.lock().create_mapping(
            self.id, offset, size, vmo, vmo_offset, flags, name,
        )?;

        Ok(VmMapping {
            aspace: Arc::clone(&self.aspace),
            id,
        })
    }

    /// Unmaps `[base, base + len)`, given in absolute addresses.
    ///
    /// Mappings partially covered by the range are split; sub-regions are
    /// descended into but stay in place even when left empty. Parts of the
    /// range without mappings are skipped, so unmapping an empty range
    /// succeeds.
    pub fn unmap(&self, base: u64, len: u64) -> Result<(), HvError> {
        let mut inner = self.aspace.inner.lock();

        let end = AspaceInner::<M>::check_range(inner.region(self.id)?, base, len)?;
        inner.unmap_in(self.id, base, end)?;

        tracing::debug!(base = %Hex(base), len = %Hex(len), "unmapped range");
        Ok(())
    }

    /// Changes the permissions of `[base, base + len)`, given in absolute
    /// addresses.
    ///
    /// The range must be entirely covered by mappings.
    pub fn protect(&self, base: u64, len: u64, flags: MmuFlags) -> Result<(), HvError> {
        let mut inner = self.aspace.inner.lock();

        let end = AspaceInner::<M>::check_range(inner.region(self.id)?, base, len)?;
        inner.protect_in(self.id, base, end, flags)
    }

    /// Destroys the region together with every sub-region and mapping in it.
    ///
    /// The root region cannot be destroyed.
    pub fn destroy(&self) -> Result<(), HvError> {
        let mut inner = self.aspace.inner.lock();

        if inner.region(self.id)?.parent.is_none() {
            return Err(HvError::BadState);
        }

        inner.destroy_region(self.id)
    }
}

/// A handle to a mapping of a [`Vmo`] in an address space.
///
/// When a mapping is split by a partial unmap or protect, the handle keeps
/// referring to the lowest piece.
pub struct VmMapping<M>
where
    M: ArchMmu,
{
    aspace: Arc<VmAspace<M>>,
    id: NodeId,
}

impl<M> Clone for VmMapping<M>
where
    M: ArchMmu,
{
    fn clone(&self) -> Self {
        Self {
            aspace: Arc::clone(&self.aspace),
            id: self.id,
        }
    }
}

impl<M> VmMapping<M>
where
    M: ArchMmu,
{
    /// Returns the base address and size of the mapping, or `None` once it
    /// has been unmapped.
    pub fn range(&self) -> Option<(u64, u64)> {
        let inner = self.aspace.inner.lock();
        let mapping = inner.mapping(self.id).ok()?;
        Some((mapping.base, mapping.size))
    }

    /// Returns the permissions of the mapping.
    pub fn flags(&self) -> Option<MmuFlags> {
        let inner = self.aspace.inner.lock();
        inner.mapping(self.id).ok().map(|mapping| mapping.flags)
    }

    /// Checks whether the mapping has been removed.
    pub fn is_destroyed(&self) -> bool {
        self.aspace.inner.lock().mapping(self.id).is_err()
    }

    /// Installs translations for `[offset, offset + len)` of the mapping.
    ///
    /// With `commit`, missing pages are allocated; otherwise only pages the
    /// object already holds are mapped.
    pub fn map_range(&self, offset: u64, len: u64, commit: bool) -> Result<(), HvError> {
        self.aspace
            .inner
            .lock()
            .map_range(self.id, offset, len, commit)
    }

    /// Removes the mapping and its translations.
    pub fn destroy(&self) -> Result<(), HvError> {
        self.aspace.inner.lock().destroy_mapping(self.id)
    }
}
