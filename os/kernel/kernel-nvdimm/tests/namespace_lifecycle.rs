use kernel_nvdimm::{
    BusConfig, BusState, DimmId, LabelArea, LabelId, LabelIoError, Mapping, MemoryLabelArea,
    NamespaceDescriptor, NvdimmBus, NvdimmError, RegionDescriptor, RegionId,
};
use kernel_nvdimm_label::{LabelAreaGeometry, NamespaceIndex, Uuid};
use std::thread;

const CONFIG_SIZE: usize = 128 * 1024;
const MAPPING: u64 = 16 << 20;
const COOKIE: u64 = 0x5a5a_0000_1234_abcd;
const MIB: u64 = 1 << 20;

type State = BusState<MemoryLabelArea>;

fn pmem0() -> NamespaceDescriptor {
    NamespaceDescriptor::pmem(Uuid::from_u128(0xfeed), "pmem0")
}

fn pmem_region(state: &mut State, dimms: [DimmId; 2]) -> RegionId {
    let mappings = dimms.map(|dimm| Mapping::new(dimm, 0, MAPPING)).to_vec();
    state
        .add_region(RegionDescriptor::pmem(COOKIE, mappings))
        .unwrap()
}

fn two_way() -> (State, RegionId, [DimmId; 2]) {
    let mut state = State::new(BusConfig::DEFAULT);
    let dimms = [
        state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap(),
        state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap(),
    ];
    let region = pmem_region(&mut state, dimms);
    (state, region, dimms)
}

/// Detach every region and DIMM, handing back the raw label areas.
fn take_media(mut state: State, region: RegionId, dimms: [DimmId; 2]) -> [MemoryLabelArea; 2] {
    state.remove_region(region).unwrap();
    dimms.map(|dimm| state.remove_dimm(dimm).unwrap())
}

fn reattach(media: [MemoryLabelArea; 2]) -> (State, RegionId, [DimmId; 2]) {
    let mut state = State::new(BusConfig::DEFAULT);
    let dimms = media.map(|io| state.add_dimm(io).unwrap());
    let region = pmem_region(&mut state, dimms);
    (state, region, dimms)
}

#[test]
fn create_places_one_extent_per_dimm() {
    let (mut state, region, dimms) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();

    let listed = state.list_namespaces(region).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].descriptor, pmem0());
    assert_eq!(listed[0].size, 4 * MIB);
    for (position, (extent, dimm)) in listed[0].extents.iter().zip(dimms).enumerate() {
        assert_eq!(extent.dimm, dimm);
        assert_eq!(usize::from(extent.position), position);
        assert_eq!(extent.dpa, MAPPING - 2 * MIB);
        assert_eq!(extent.len, 2 * MIB);
        assert!(extent.slot.is_some());
    }

    for (position, dimm) in dimms.iter().enumerate() {
        let area = state.dimm(*dimm).unwrap().area();
        let labels: Vec<_> = area.active_labels().collect();
        assert_eq!(labels.len(), 1);
        assert_eq!(usize::from(labels[0].position), position);
        assert_eq!(labels[0].nlabel, 2);
        assert_eq!(labels[0].isetcookie, COOKIE);
        assert!(!labels[0].flags.updating());
        assert_eq!(area.count_free(), 1015);
    }
}

#[test]
fn resize_moves_extent_start_only() {
    let (mut state, region, dimms) = two_way();
    let ns = pmem0();
    state.create_or_resize(region, &ns, 4 * MIB).unwrap();
    state.create_or_resize(region, &ns, 8 * MIB).unwrap();
    let listed = state.list_namespaces(region).unwrap();
    assert!(listed[0].extents.iter().all(|e| e.dpa == MAPPING - 4 * MIB));

    state.create_or_resize(region, &ns, 2 * MIB).unwrap();
    let listed = state.list_namespaces(region).unwrap();
    assert_eq!(listed[0].size, 2 * MIB);
    assert!(listed[0].extents.iter().all(|e| e.dpa == MAPPING - MIB));
    for dimm in dimms {
        assert_eq!(state.per_dimm_allocated(dimm, &ns.label_id()), Ok(MIB));
    }
    assert_eq!(state.region_available(region), Ok(2 * (MAPPING - MIB)));
}

#[test]
fn shrink_to_zero_releases_everything() {
    let (mut state, region, dimms) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    state.create_or_resize(region, &pmem0(), 0).unwrap();

    assert!(state.list_namespaces(region).unwrap().is_empty());
    for dimm in dimms {
        assert_eq!(state.per_dimm_allocated(dimm, &pmem0().label_id()), Ok(0));
        let area = state.dimm(dimm).unwrap().area();
        assert_eq!(area.count_free(), 1016);
        assert_eq!(area.active_labels().count(), 0);
    }
    assert_eq!(state.region_available(region), Ok(2 * MAPPING));
}

#[test]
fn oversized_request_changes_nothing() {
    let (mut state, region, dimms) = two_way();
    assert_eq!(
        state.create_or_resize(region, &pmem0(), 2 * MAPPING + 0x2000),
        Err(NvdimmError::NoSpace {
            requested: 2 * MAPPING + 0x2000,
            available: 2 * MAPPING,
        })
    );
    for dimm in dimms {
        assert_eq!(state.dimm(dimm).unwrap().io().writes(), 0);
    }
}

#[test]
fn misaligned_sizes_are_rejected() {
    let (mut state, region, _) = two_way();
    for size in [3 * 0x1000, 2 * 512] {
        assert!(matches!(
            state.create_or_resize(region, &pmem0(), size),
            Err(NvdimmError::Invalid(_))
        ));
    }
}

#[test]
fn region_hosts_a_single_pmem_namespace() {
    let (mut state, region, _) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    let other = NamespaceDescriptor::pmem(Uuid::from_u128(0xbeef), "pmem1");
    assert!(matches!(
        state.create_or_resize(region, &other, 4 * MIB),
        Err(NvdimmError::Busy(_))
    ));
    let blk = NamespaceDescriptor::blk(Uuid::from_u128(0xb1), "blk0", 512);
    assert!(matches!(
        state.create_or_resize(region, &blk, 0x1000),
        Err(NvdimmError::Invalid(_))
    ));
}

#[test]
fn mapped_and_allocated_dimms_are_busy() {
    let (mut state, region, dimms) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    assert!(matches!(state.remove_dimm(dimms[0]), Err(NvdimmError::Busy(_))));
    assert!(matches!(state.format_dimm(dimms[0]), Err(NvdimmError::Busy(_))));
}

#[test]
fn delete_releases_namespace() {
    let (mut state, region, dimms) = two_way();
    let id = pmem0().label_id();
    assert_eq!(state.delete(region, &id), Err(NvdimmError::NoDevice));
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    state.delete(region, &id).unwrap();
    assert!(state.list_namespaces(region).unwrap().is_empty());
    for dimm in dimms {
        assert_eq!(state.per_dimm_allocated(dimm, &id), Ok(0));
    }
}

#[test]
fn reattached_dimms_rediscover_namespace() {
    let (mut state, region, dimms) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    let media = take_media(state, region, dimms);

    let (mut state, region, _) = reattach(media);
    assert!(state.list_namespaces(region).unwrap().is_empty());
    assert_eq!(state.scan_region(region), Ok(1));
    let listed = state.list_namespaces(region).unwrap();
    assert_eq!(listed[0].descriptor, pmem0());
    assert_eq!(listed[0].size, 4 * MIB);
}

#[test]
fn missing_position_fails_scan() {
    let (mut state, region, dimms) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    let [first, _] = take_media(state, region, dimms);

    let (mut state, region, _) = reattach([first, MemoryLabelArea::new(CONFIG_SIZE)]);
    let err = state.scan_region(region).unwrap_err();
    assert_eq!(err.errno(), -22);
    assert!(state.list_namespaces(region).unwrap().is_empty());
}

#[test]
fn empty_region_scans_nothing() {
    let (mut state, region, _) = two_way();
    assert_eq!(state.scan_region(region), Ok(0));
}

#[test]
fn corrupt_index_falls_back_and_recovers() {
    let mut state = State::new(BusConfig::DEFAULT);
    let dimm = state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap();
    state.format_dimm(dimm).unwrap();
    // Flip a byte of index 0's checksum.
    state.dimm_io_mut(dimm).unwrap().as_bytes_mut()[64] ^= 0xff;
    let io = state.remove_dimm(dimm).unwrap();

    let dimm = state.add_dimm(io).unwrap();
    assert_eq!(state.dimm(dimm).unwrap().area().current(), Some(1));

    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    let blk = NamespaceDescriptor::blk(Uuid::from_u128(0xb1), "blk0", 512);
    state.create_or_resize(region, &blk, 0x1000).unwrap();

    let io = state.dimm(dimm).unwrap().io();
    let geometry = LabelAreaGeometry::new(CONFIG_SIZE as u64).unwrap();
    let size = geometry.index_size() as usize;
    for which in 0..2 {
        let offset = geometry.index_offset(which) as usize;
        let bytes = &io.as_bytes()[offset..offset + size];
        assert!(NamespaceIndex::parse(bytes, &geometry, which).is_ok());
    }
    assert_eq!(LabelArea::probe(io).unwrap().current(), Some(0));
}

#[test]
fn failed_write_leaves_media_unchanged() {
    let (mut state, region, dimms) = two_way();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    let before = state.dimm(dimms[0]).unwrap().io().as_bytes().to_vec();

    state.dimm_io_mut(dimms[0]).unwrap().fail_after(0);
    assert_eq!(
        state.create_or_resize(region, &pmem0(), 8 * MIB),
        Err(NvdimmError::Io(LabelIoError::Device(5)))
    );
    assert_eq!(state.dimm(dimms[0]).unwrap().io().as_bytes(), &before[..]);
    assert_eq!(state.list_namespaces(region).unwrap()[0].size, 4 * MIB);
    assert_eq!(state.per_dimm_allocated(dimms[0], &pmem0().label_id()), Ok(2 * MIB));
}

#[test]
fn failure_on_later_dimm_is_partial() {
    let (mut state, region, dimms) = two_way();
    state.dimm_io_mut(dimms[1]).unwrap().fail_after(0);
    let err = state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap_err();
    assert_eq!(
        err,
        NvdimmError::Partial {
            dimm: dimms[1],
            source: Box::new(NvdimmError::Io(LabelIoError::Device(5))),
        }
    );
    assert_eq!(err.errno(), -5);

    let id = pmem0().label_id();
    assert_eq!(state.per_dimm_allocated(dimms[0], &id), Ok(2 * MIB));
    assert_eq!(state.per_dimm_allocated(dimms[1], &id), Ok(0));
    let first = state.dimm(dimms[0]).unwrap().area();
    assert!(first.active_labels().all(|label| label.flags.updating()));

    state.dimm_io_mut(dimms[1]).unwrap().clear_failure();
    state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
    let first = state.dimm(dimms[0]).unwrap().area();
    assert!(first.active_labels().all(|label| !label.flags.updating()));
    assert_eq!(state.list_namespaces(region).unwrap()[0].size, 4 * MIB);
}

#[test]
fn interrupted_clearing_pass_is_rediscovered() {
    // Formatting, one label and one commit per DIMM make up the first pass;
    // the clearing pass on the first DIMM then fails at its label or commit.
    for completed in [4, 5] {
        let (mut state, region, dimms) = two_way();
        state.dimm_io_mut(dimms[0]).unwrap().fail_after(completed);
        let err = state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap_err();
        assert!(matches!(err, NvdimmError::Partial { dimm, .. } if dimm == dimms[0]));
        state.dimm_io_mut(dimms[0]).unwrap().clear_failure();
        let media = take_media(state, region, dimms);

        let (mut state, region, dimms) = reattach(media);
        assert_eq!(state.scan_region(region), Ok(1));
        let listed = state.list_namespaces(region).unwrap();
        assert_eq!(listed[0].descriptor, pmem0());
        assert_eq!(listed[0].size, 4 * MIB);
        let updating = |state: &State, expected: bool| {
            dimms.iter().all(|&dimm| {
                let area = state.dimm(dimm).unwrap().area();
                area.active_labels().all(|label| label.flags.updating() == expected)
            })
        };
        assert!(updating(&state, true));

        state.create_or_resize(region, &pmem0(), 4 * MIB).unwrap();
        assert!(updating(&state, false));
    }
}

#[test]
fn blk_growth_in_place_rewrites_only_the_grown_extent() {
    let mut state = State::new(BusConfig::DEFAULT);
    let dimm = state.add_dimm(MemoryLabelArea::new(1024)).unwrap();
    assert_eq!(state.dimm(dimm).unwrap().area().geometry().nslot(), 4);
    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    let a = NamespaceDescriptor::blk(Uuid::from_u128(0xa), "blk-a", 512);
    let b = NamespaceDescriptor::blk(Uuid::from_u128(0xb), "blk-b", 512);
    state.create_or_resize(region, &a, 0x1000).unwrap();
    state.create_or_resize(region, &b, 0x1000).unwrap();
    state.create_or_resize(region, &a, 0x2000).unwrap();
    assert_eq!(state.dimm(dimm).unwrap().area().count_free(), 1);

    // The trailing extent grows upward; the leading one keeps its label.
    state.create_or_resize(region, &a, 0x3000).unwrap();
    let listed = state.list_namespaces(region).unwrap();
    let grown = listed.iter().find(|ns| ns.descriptor.uuid == a.uuid).unwrap();
    let spans: Vec<_> = grown.extents.iter().map(|e| (e.dpa, e.len)).collect();
    assert_eq!(spans, vec![(0, 0x1000), (0x2000, 0x2000)]);
    assert_eq!(state.dimm(dimm).unwrap().area().count_free(), 1);

    state.remove_region(region).unwrap();
    let io = state.remove_dimm(dimm).unwrap();
    let mut state = State::new(BusConfig::DEFAULT);
    let dimm = state.add_dimm(io).unwrap();
    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    assert_eq!(state.scan_region(region), Ok(2));
    assert_eq!(state.list_namespaces(region).unwrap(), listed);
}

#[test]
fn blk_namespaces_fragment_and_rescan() {
    let mut state = State::new(BusConfig::DEFAULT);
    let dimm = state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap();
    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    let a = NamespaceDescriptor::blk(Uuid::from_u128(0xa), "blk-a", 0);
    let b = NamespaceDescriptor::blk(Uuid::from_u128(0xb), "blk-b", 4096);

    state.create_or_resize(region, &a, 0x2000).unwrap();
    state.create_or_resize(region, &b, 0x1000).unwrap();
    state.create_or_resize(region, &a, 0x4000).unwrap();

    let listed = state.list_namespaces(region).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].descriptor.lbasize, 512);
    assert_eq!(listed[0].size, 0x4000);
    let spans: Vec<_> = listed[0].extents.iter().map(|e| (e.position, e.dpa, e.len)).collect();
    assert_eq!(spans, vec![(0, 0, 0x2000), (1, 0x3000, 0x2000)]);
    assert_eq!(state.region_available(region), Ok(MIB - 0x5000));

    state.remove_region(region).unwrap();
    let io = state.remove_dimm(dimm).unwrap();
    let mut state = State::new(BusConfig::DEFAULT);
    let dimm = state.add_dimm(io).unwrap();
    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    assert_eq!(state.scan_region(region), Ok(2));
    let rescanned = state.list_namespaces(region).unwrap();
    assert_eq!(rescanned, listed);
}

#[test]
fn blk_shrink_trims_highest_extent() {
    let mut state = State::new(BusConfig::DEFAULT);
    let dimm = state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap();
    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    let a = NamespaceDescriptor::blk(Uuid::from_u128(0xa), "blk-a", 512);
    let b = NamespaceDescriptor::blk(Uuid::from_u128(0xb), "blk-b", 512);
    state.create_or_resize(region, &a, 0x1000).unwrap();
    state.create_or_resize(region, &b, 0x1000).unwrap();
    state.create_or_resize(region, &a, 0x3000).unwrap();
    state.create_or_resize(region, &a, 0x1800).unwrap_err();
    state.create_or_resize(region, &a, 0x1000).unwrap();

    let listed = state.list_namespaces(region).unwrap();
    assert_eq!(listed[0].extents.len(), 1);
    assert_eq!(listed[0].extents[0].dpa, 0);

    state.create_or_resize(region, &a, 0).unwrap();
    assert_eq!(state.list_namespaces(region).unwrap().len(), 1);
    assert_eq!(state.per_dimm_allocated(dimm, &LabelId::blk(a.uuid)), Ok(0));
}

#[test]
fn auto_format_can_be_disabled() {
    let mut state = State::new(BusConfig::DEFAULT.with_auto_format(false));
    let dimm = state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap();
    let region = state
        .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
        .unwrap();
    let a = NamespaceDescriptor::blk(Uuid::from_u128(0xa), "blk-a", 512);
    assert_eq!(
        state.create_or_resize(region, &a, 0x1000),
        Err(NvdimmError::Unformatted(dimm))
    );
    assert_eq!(state.per_dimm_allocated(dimm, &a.label_id()), Ok(0));
}

#[test]
fn threads_serialize_on_the_bus_lock() {
    let bus = NvdimmBus::new(BusConfig::DEFAULT);
    let regions: Vec<RegionId> = {
        let mut state = bus.lock();
        (0..2)
            .map(|_| {
                let dimm = state.add_dimm(MemoryLabelArea::new(CONFIG_SIZE)).unwrap();
                state
                    .add_region(RegionDescriptor::blk(Mapping::new(dimm, 0, MIB)))
                    .unwrap()
            })
            .collect()
    };

    thread::scope(|s| {
        for (t, &region) in (0u128..).zip(&regions) {
            let bus = &bus;
            s.spawn(move || {
                for i in 0..8u128 {
                    let uuid = Uuid::from_u128((t << 8) | i);
                    let ns = NamespaceDescriptor::blk(uuid, "blk", 512);
                    bus.lock().create_or_resize(region, &ns, 0x1000).unwrap();
                }
            });
        }
    });

    let state = bus.lock();
    for region in regions {
        assert_eq!(state.list_namespaces(region).unwrap().len(), 8);
        assert_eq!(state.region_available(region), Ok(MIB - 8 * 0x1000));
    }
}
