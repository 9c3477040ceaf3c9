use super::*;
use crate::sources::VecSource;


const MAX: usize = 1 << 24;

fn heap() -> RawHeap<VecSource> {
    RawHeap::with_source(VecSource::with_max(MAX)).unwrap()
}

fn heap_with(config: HeapConfig) -> RawHeap<VecSource> {
    RawHeap::with_config(VecSource::with_max(MAX), config).unwrap()
}

fn free_sizes(heap: &RawHeap<VecSource>) -> Vec<usize> {
    heap.free_regions().map(|region| region.size).collect()
}

fn free_offsets(heap: &RawHeap<VecSource>) -> Vec<usize> {
    heap.free_regions().map(|region| region.offset).collect()
}

/// Regions must tile the space between the sentinels exactly.
fn assert_tiled(heap: &RawHeap<VecSource>) {
    let total: usize = heap.regions().map(|region| region.size).sum();
    assert_eq!(total + 32, heap.heap_size());
    heap.verify().unwrap();
}

#[test]
fn test_bootstrap_1() {
    let heap = heap();
    assert_eq!(heap.heap_size(), 32);
    assert_eq!(heap.regions().count(), 0);
    assert_eq!(heap.free_regions().count(), 0);
    heap.verify().unwrap();
}

#[test]
fn test_allocate_1() {
    let mut heap = heap();
    let ptr = heap.allocate(24).unwrap().unwrap();
    // One page claimed, a 48 byte region carved out of its bottom.
    assert_eq!(ptr.offset(), 32);
    assert_eq!(heap.heap_size(), 32 + 4096);
    assert_eq!(free_sizes(&heap), vec![4096 - 48]);
    let regions: Vec<_> = heap.regions().collect();
    assert_eq!(
        regions[0],
        RegionInfo { offset: 24, size: 48, requested: 24, allocated: true }
    );
    assert_eq!(
        regions[1],
        RegionInfo { offset: 72, size: 4048, requested: 0, allocated: false }
    );
    assert_tiled(&heap);
}

#[test]
fn test_allocate_2() {
    // Requests up to one double word all take the minimum region.
    let mut heap = heap();
    for size in 1..=16 {
        let ptr = heap.allocate(size).unwrap().unwrap();
        assert_eq!(ptr.offset() % 16, 0);
        assert!(heap.payload(ptr).unwrap().len() >= size);
    }
    let sizes: Vec<_> = heap.regions().filter(|r| r.allocated).map(|r| r.size).collect();
    assert_eq!(sizes, vec![32; 16]);
    assert_tiled(&heap);
}

#[test]
fn test_allocate_3() {
    // An adjusted request just under a page still fits the first growth.
    let mut heap = heap();
    let ptr = heap.allocate(3980).unwrap().unwrap();
    assert_eq!(ptr.offset(), 32);
    assert_eq!(heap.heap_size(), 32 + 4096);
    assert_eq!(free_sizes(&heap), vec![96]);
    assert_tiled(&heap);
}

#[test]
fn test_allocate_4() {
    // Requests past a page grow by whole pages at once.
    let mut heap = heap();
    let ptr = heap.allocate(5000).unwrap().unwrap();
    assert_eq!(ptr.offset(), 32);
    assert_eq!(heap.heap_size(), 32 + 8192);
    assert_eq!(free_sizes(&heap), vec![8192 - 5024]);
    assert_tiled(&heap);
}

#[test]
fn test_allocate_5() {
    let mut heap = heap();
    assert_eq!(heap.allocate(0).unwrap(), None);
    assert_eq!(heap.heap_size(), 32);
}

#[test]
fn test_allocate_6() {
    let mut heap = heap();
    assert_eq!(
        heap.allocate(MAX_REQUEST + 1),
        Err(HeapError::TooLarge { requested: MAX_REQUEST + 1, ceiling: MAX_REQUEST })
    );
    let mut small = heap_with(HeapConfig { ceiling: 1 << 16, ..HeapConfig::default() });
    assert_eq!(
        small.allocate((1 << 16) + 1),
        Err(HeapError::TooLarge { requested: (1 << 16) + 1, ceiling: 1 << 16 })
    );
    assert!(small.allocate(1 << 16).unwrap().is_some());
}

#[test]
fn test_allocate_7() {
    // A source too small for even one page: the error reports the growth
    // amount and the heap stays usable, if empty handed.
    let mut heap = RawHeap::with_source(VecSource::with_max(64)).unwrap();
    assert_eq!(heap.allocate(1), Err(HeapError::Exhausted(4096)));
    assert_eq!(heap.heap_size(), 32);
    assert_eq!(heap.free_regions().count(), 0);
    heap.verify().unwrap();
}

#[test]
fn test_absorb_1() {
    // A leftover of exactly one minimum region is absorbed, not split.
    let mut heap = heap();
    let ptr = heap.allocate(4048).unwrap().unwrap();
    let regions: Vec<_> = heap.regions().collect();
    assert_eq!(regions.len(), 1);
    assert_eq!(
        regions[0],
        RegionInfo { offset: 24, size: 4096, requested: 4048, allocated: true }
    );
    assert_eq!(heap.free_regions().count(), 0);
    assert_eq!(heap.payload(ptr).unwrap().len(), 4096 - 16);
    assert_tiled(&heap);
}

#[test]
fn test_absorb_2() {
    // One double word more and the leftover stands on its own.
    let mut heap = heap();
    heap.allocate(4032).unwrap().unwrap();
    assert_eq!(free_sizes(&heap), vec![48]);
    assert_tiled(&heap);
}

#[test]
fn test_free_1() {
    // Freeing between two free neighbors fuses all three into one region.
    let mut heap = heap();
    let a = heap.allocate(100).unwrap().unwrap();
    let b = heap.allocate(100).unwrap().unwrap();
    let c = heap.allocate(100).unwrap().unwrap();
    heap.free(a).unwrap();
    heap.free(c).unwrap();
    assert_eq!(heap.free_regions().count(), 2);
    assert_tiled(&heap);
    heap.free(b).unwrap();
    assert_eq!(free_sizes(&heap), vec![4096]);
    assert_eq!(free_offsets(&heap), vec![24]);
    assert_tiled(&heap);
}

#[test]
fn test_free_2() {
    let mut heap = heap();
    let ptr = heap.allocate(100).unwrap().unwrap();
    heap.free(ptr).unwrap();
    // Double free: the offset now names a free region.
    assert_eq!(heap.free(ptr), Err(HeapError::BadPointer(32)));
    // Out of bounds and mid-payload offsets.
    assert_eq!(heap.free(HeapPtr(0)), Err(HeapError::BadPointer(0)));
    assert_eq!(heap.free(HeapPtr(48)), Err(HeapError::BadPointer(48)));
    let size = heap.heap_size();
    assert_eq!(heap.free(HeapPtr(size)), Err(HeapError::BadPointer(size)));
    heap.verify().unwrap();
}

#[test]
fn test_free_3() {
    // Freeing the only allocation returns the arena to one free region,
    // and the region absorbs the sentinel-adjacent edges correctly.
    let mut heap = heap();
    let ptr = heap.allocate(1000).unwrap().unwrap();
    heap.free(ptr).unwrap();
    assert_eq!(free_sizes(&heap), vec![4096]);
    assert_tiled(&heap);
}

#[test]
fn test_reallocate_1() {
    // Growing moves the allocation and carries the payload along.
    let mut heap = heap();
    let a = heap.allocate(32).unwrap().unwrap();
    let pattern: Vec<u8> = (0..32).map(|i| i as u8 ^ 0xA5).collect();
    heap.payload_mut(a).unwrap().copy_from_slice(&pattern);
    // Pin a second allocation behind `a` so it cannot grow in place.
    let pin = heap.allocate(32).unwrap().unwrap();
    let moved = heap.reallocate(a, 200).unwrap().unwrap();
    assert_ne!(moved.offset(), a.offset());
    assert_eq!(moved.offset(), 128);
    assert_eq!(&heap.payload(moved).unwrap()[..32], &pattern[..]);
    // The old region went back to the free list.
    assert_eq!(free_sizes(&heap), vec![48, 3776]);
    assert_eq!(heap.free(a), Err(HeapError::BadPointer(32)));
    heap.free(pin).unwrap();
    heap.free(moved).unwrap();
    assert_eq!(free_sizes(&heap), vec![4096]);
    assert_tiled(&heap);
}

#[test]
fn test_reallocate_2() {
    // Shrinking stays in place and frees the tail.
    let mut heap = heap();
    let ptr = heap.allocate(200).unwrap().unwrap();
    let same = heap.reallocate(ptr, 50).unwrap().unwrap();
    assert_eq!(same, ptr);
    // 50 rounds to an 80 byte region; the 144 byte tail merges with the
    // page leftover.
    assert_eq!(heap.payload(ptr).unwrap().len(), 64);
    assert_eq!(free_sizes(&heap), vec![4016]);
    let regions: Vec<_> = heap.regions().collect();
    assert_eq!(
        regions[0],
        RegionInfo { offset: 24, size: 80, requested: 50, allocated: true }
    );
    assert_tiled(&heap);
}

#[test]
fn test_reallocate_3() {
    // A tail too small to stand alone stays absorbed; only the recorded
    // request changes.
    let mut heap = heap();
    let ptr = heap.allocate(100).unwrap().unwrap();
    let same = heap.reallocate(ptr, 90).unwrap().unwrap();
    assert_eq!(same, ptr);
    let region = heap.regions().next().unwrap();
    assert_eq!(region.size, 128);
    assert_eq!(region.requested, 90);
    assert_eq!(free_sizes(&heap), vec![3968]);
    assert_tiled(&heap);
}

#[test]
fn test_reallocate_4() {
    // Zero size is a no-op that keeps the allocation alive.
    let mut heap = heap();
    let ptr = heap.allocate(100).unwrap().unwrap();
    heap.payload_mut(ptr).unwrap()[0] = 42;
    assert_eq!(heap.reallocate(ptr, 0).unwrap(), None);
    assert_eq!(heap.payload(ptr).unwrap()[0], 42);
    heap.free(ptr).unwrap();
    assert_tiled(&heap);
}

#[test]
fn test_reallocate_5() {
    // Shrinking preserves the surviving prefix.
    let mut heap = heap();
    let ptr = heap.allocate(64).unwrap().unwrap();
    for (i, byte) in heap.payload_mut(ptr).unwrap().iter_mut().enumerate() {
        *byte = i as u8;
    }
    let same = heap.reallocate(ptr, 40).unwrap().unwrap();
    for (i, &byte) in heap.payload(same).unwrap().iter().take(40).enumerate() {
        assert_eq!(byte, i as u8);
    }
    assert_tiled(&heap);
}

#[test]
fn test_reallocate_6() {
    // A failed growth leaves the original allocation intact.
    let mut heap = RawHeap::with_source(VecSource::with_max(32 + 4096)).unwrap();
    let ptr = heap.allocate(100).unwrap().unwrap();
    heap.payload_mut(ptr).unwrap().fill(7);
    assert_eq!(heap.reallocate(ptr, 8000), Err(HeapError::Exhausted(8192)));
    assert!(heap.payload(ptr).unwrap().iter().all(|&byte| byte == 7));
    heap.free(ptr).unwrap();
    heap.verify().unwrap();
}

#[test]
fn test_zero_allocate_1() {
    let mut heap = heap();
    assert_eq!(
        heap.zero_allocate(usize::MAX, 2),
        Err(HeapError::Overflow { count: usize::MAX, size: 2 })
    );
    assert_eq!(heap.zero_allocate(0, 16).unwrap(), None);
    assert_eq!(heap.zero_allocate(16, 0).unwrap(), None);
    assert_eq!(heap.heap_size(), 32);
}

#[test]
fn test_zero_allocate_2() {
    // Recycled regions are dirty; the whole payload must come back zeroed.
    let mut heap = heap();
    let dirty = heap.allocate(64).unwrap().unwrap();
    heap.payload_mut(dirty).unwrap().fill(0xFF);
    heap.free(dirty).unwrap();
    let ptr = heap.zero_allocate(4, 16).unwrap().unwrap();
    assert_eq!(ptr.offset(), dirty.offset());
    assert!(heap.payload(ptr).unwrap().iter().all(|&byte| byte == 0));
    assert_tiled(&heap);
}

#[test]
fn test_first_fit_1() {
    let mut heap = heap();
    let a = heap.allocate(100).unwrap().unwrap();
    let _b = heap.allocate(100).unwrap().unwrap();
    let c = heap.allocate(100).unwrap().unwrap();
    let _d = heap.allocate(100).unwrap().unwrap();
    heap.free(a).unwrap();
    heap.free(c).unwrap();
    // First fit always starts at the head, which LIFO insertion just moved
    // to the most recently freed region.
    assert_eq!(heap.allocate(100).unwrap().unwrap(), c);
    assert_eq!(heap.allocate(100).unwrap().unwrap(), a);
    assert_tiled(&heap);
}

#[test]
fn test_next_fit_1() {
    let config = HeapConfig { placement: Placement::NextFit, ..HeapConfig::default() };
    let mut heap = heap_with(config);
    // Four 1024 byte regions tile the page exactly, emptying the list.
    let a = heap.allocate(1008).unwrap().unwrap();
    let _b = heap.allocate(1008).unwrap().unwrap();
    let c = heap.allocate(1008).unwrap().unwrap();
    let _d = heap.allocate(1008).unwrap().unwrap();
    assert_eq!(heap.free_regions().count(), 0);
    heap.free(a).unwrap();
    heap.free(c).unwrap();
    // The cursor stayed on `a`, the first region to re-enter the empty
    // list, so next fit serves `a` first and then rotates on to `c`.
    assert_eq!(heap.allocate(1008).unwrap().unwrap(), a);
    assert_eq!(heap.allocate(1008).unwrap().unwrap(), c);
    assert_tiled(&heap);
}

#[test]
fn test_next_fit_2() {
    // Consuming the last free region must leave the cursor in a state
    // that survives the next growth.
    let config = HeapConfig { placement: Placement::NextFit, ..HeapConfig::default() };
    let mut heap = heap_with(config);
    let big = heap.allocate(4080).unwrap().unwrap();
    assert_eq!(heap.free_regions().count(), 0);
    let more = heap.allocate(100).unwrap().unwrap();
    assert_eq!(heap.heap_size(), 32 + 8192);
    heap.free(big).unwrap();
    heap.free(more).unwrap();
    assert_eq!(free_sizes(&heap), vec![8192]);
    assert_tiled(&heap);
}

#[test]
fn test_address_ordered_1() {
    let config = HeapConfig { insertion: Insertion::AddressOrdered, ..HeapConfig::default() };
    let mut heap = heap_with(config);
    let a = heap.allocate(100).unwrap().unwrap();
    let b = heap.allocate(100).unwrap().unwrap();
    let c = heap.allocate(100).unwrap().unwrap();
    let d = heap.allocate(100).unwrap().unwrap();
    heap.free(c).unwrap();
    heap.free(a).unwrap();
    heap.free(d).unwrap();
    // Whatever the free order, the list reads in ascending offsets.
    let offsets = free_offsets(&heap);
    let mut sorted = offsets.clone();
    sorted.sort_unstable();
    assert_eq!(offsets, sorted);
    assert_tiled(&heap);
    heap.free(b).unwrap();
    assert_eq!(free_sizes(&heap), vec![4096]);
}

#[test]
fn test_set_insertion_1() {
    let mut heap = heap();
    let a = heap.allocate(100).unwrap().unwrap();
    let _b = heap.allocate(100).unwrap().unwrap();
    let c = heap.allocate(100).unwrap().unwrap();
    let _d = heap.allocate(100).unwrap().unwrap();
    heap.free(a).unwrap();
    heap.free(c).unwrap();
    // LIFO put the younger free regions first; the page's tail leftover
    // sits at the back.
    assert_eq!(free_offsets(&heap), vec![c.offset() - 8, a.offset() - 8, 536]);
    heap.set_insertion(Insertion::AddressOrdered);
    assert_eq!(heap.insertion(), Insertion::AddressOrdered);
    let offsets = free_offsets(&heap);
    let mut sorted = offsets.clone();
    sorted.sort_unstable();
    assert_eq!(offsets, sorted);
    heap.verify().unwrap();
}

#[test]
fn test_growth_merge_1() {
    // Growth merges the fresh pages with a free region already at the top.
    let mut heap = heap();
    let first = heap.allocate(3000).unwrap().unwrap();
    let second = heap.allocate(3000).unwrap().unwrap();
    assert_eq!(first.offset(), 32);
    assert_eq!(second.offset(), 3056);
    assert_eq!(heap.heap_size(), 32 + 8192);
    assert_eq!(free_sizes(&heap), vec![8192 - 2 * 3024]);
    assert_tiled(&heap);
}

#[test]
fn test_payload_1() {
    let mut heap = heap();
    let ptr = heap.allocate(100).unwrap().unwrap();
    assert_eq!(heap.payload(ptr).unwrap().len(), 112);
    heap.payload_mut(ptr).unwrap().fill(0x3C);
    assert!(heap.payload(ptr).unwrap().iter().all(|&byte| byte == 0x3C));
    assert_eq!(heap.payload(HeapPtr(0)), Err(HeapError::BadPointer(0)));
    assert_eq!(heap.payload(HeapPtr(40)), Err(HeapError::BadPointer(40)));
    heap.free(ptr).unwrap();
    assert_eq!(heap.payload(ptr), Err(HeapError::BadPointer(32)));
}

#[test]
fn test_verify_1() {
    // A poked header no longer matches its footer.
    let mut heap = heap();
    let ptr = heap.allocate(100).unwrap().unwrap();
    heap.arena.put_tag(24, Tag::allocated(99, 128));
    assert_eq!(heap.verify(), Err(HeapError::Corrupted(24)));
    assert_eq!(heap.free(ptr), Err(HeapError::Corrupted(24)));
    assert_eq!(heap.payload(ptr), Err(HeapError::Corrupted(24)));
}

#[test]
fn test_verify_2() {
    // A word with reserved bits set is not a tag at all.
    let mut heap = heap();
    let _ = heap.allocate(100).unwrap().unwrap();
    heap.arena.put_word(24, 128 | 0x2);
    assert_eq!(heap.verify(), Err(HeapError::Corrupted(24)));
}

#[test]
fn test_conservation_1() {
    // A deterministic churn: regions must tile the arena after every step.
    let mut heap = heap();
    let mut live = Vec::new();
    for round in 0usize..200 {
        let size = 1 + (round * 37) % 900;
        let ptr = heap.allocate(size).unwrap().unwrap();
        live.push(ptr);
        if round % 3 == 0 {
            let victim = live.swap_remove((round * 7) % live.len());
            heap.free(victim).unwrap();
        }
        assert_tiled(&heap);
    }
    for ptr in live {
        heap.free(ptr).unwrap();
    }
    assert_eq!(heap.free_regions().count(), 1);
    assert_tiled(&heap);
}

#[test]
fn test_traced_walkthrough_1() {
    // Exercises the span and event plumbing end to end under the custom
    // formatter.
    format::init();
    let mut heap = heap();
    let a = heap.allocate(100).unwrap().unwrap();
    let b = heap.zero_allocate(8, 32).unwrap().unwrap();
    let a = heap.reallocate(a, 300).unwrap().unwrap();
    heap.free(b).unwrap();
    heap.free(a).unwrap();
    assert_eq!(heap.allocate(0).unwrap(), None);
    assert!(heap.allocate(MAX_REQUEST + 1).is_err());
    heap.verify().unwrap();
}
