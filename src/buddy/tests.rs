use super::*;

// 1 MiB arena split into 19 levels, matching the reference scenario: a
// min bucket of 2 bytes, comfortably smaller than any real request (the
// min class only needs to exceed the 2-word prefix when a request is
// actually routed to the smallest class, which none of these tests do).
const MEMORY_SIZE: usize = 1 << 20;
const NUM_LEVELS: usize = 19;
const MIN_BUCKET_SIZE: usize = MEMORY_SIZE >> NUM_LEVELS;

fn new_buffers() -> (std::vec::Vec<u8>, std::vec::Vec<u8>) {
    let num_bits = (1usize << (NUM_LEVELS + 1)) - 1;
    (
        std::vec![0u8; MEMORY_SIZE],
        std::vec![0u8; Bitmap::bytes_for(num_bits)],
    )
}

fn new_alloc(arena: &mut [u8], bitmap_buf: &mut [u8]) -> BuddyAllocator<'_> {
    BuddyAllocator::init(arena, bitmap_buf, NUM_LEVELS, MIN_BUCKET_SIZE).unwrap()
}

fn bitmap_is_all_zero(alloc: &BuddyAllocator) -> bool {
    (0..alloc.bitmap.num_bits()).all(|i| !alloc.bitmap.get(i))
}

#[test]
fn tree_index_math() {
    assert_eq!(first_idx_of_level(0), 0);
    assert_eq!(first_idx_of_level(1), 1);
    assert_eq!(first_idx_of_level(2), 3);
    assert_eq!(level_of(0), 0);
    assert_eq!(level_of(1), 1);
    assert_eq!(level_of(2), 1);
    assert_eq!(level_of(3), 2);
    assert_eq!(level_of(6), 2);
    assert_eq!(offset_in_level(3), 0);
    assert_eq!(offset_in_level(6), 3);
    assert_eq!(parent_of(1), 0);
    assert_eq!(parent_of(2), 0);
    assert_eq!(parent_of(3), 1);
    assert_eq!(parent_of(4), 1);
    assert_eq!(buddy_of(1), 2);
    assert_eq!(buddy_of(2), 1);
    assert_eq!(buddy_of(3), 4);
    assert_eq!(buddy_of(4), 3);
    assert_eq!(buddy_of(0), 0);
}

#[test]
fn init_rejects_bad_config() {
    let mut arena = std::vec![0u8; MEMORY_SIZE];
    let num_bits = (1usize << (NUM_LEVELS + 1)) - 1;
    let mut bitmap_buf = std::vec![0u8; Bitmap::bytes_for(num_bits)];

    assert_eq!(
        BuddyAllocator::init(&mut [], &mut bitmap_buf, NUM_LEVELS, MIN_BUCKET_SIZE).err(),
        Some(BuddyError::InvalidArgument)
    );
    assert_eq!(
        BuddyAllocator::init(&mut arena, &mut [], NUM_LEVELS, MIN_BUCKET_SIZE).err(),
        Some(BuddyError::InvalidArgument)
    );
    assert_eq!(
        BuddyAllocator::init(&mut arena, &mut bitmap_buf, 0, MIN_BUCKET_SIZE).err(),
        Some(BuddyError::ConfigInconsistent)
    );
    assert_eq!(
        BuddyAllocator::init(&mut arena, &mut bitmap_buf, MAX_LEVELS, MIN_BUCKET_SIZE).err(),
        Some(BuddyError::ConfigInconsistent)
    );
    assert_eq!(
        BuddyAllocator::init(&mut arena, &mut bitmap_buf, NUM_LEVELS, MIN_BUCKET_SIZE + 1).err(),
        Some(BuddyError::ConfigInconsistent)
    );

    let mut odd_arena = std::vec![0u8; 3 * (1 << 18)];
    assert_eq!(
        BuddyAllocator::init(&mut odd_arena, &mut bitmap_buf, NUM_LEVELS, MIN_BUCKET_SIZE).err(),
        Some(BuddyError::ConfigInconsistent)
    );

    let mut tiny_bitmap = std::vec![0u8; 1];
    assert!(matches!(
        BuddyAllocator::init(&mut arena, &mut tiny_bitmap, NUM_LEVELS, MIN_BUCKET_SIZE),
        Err(BuddyError::BitmapTooSmall { .. })
    ));
}

#[test]
fn small_allocations_are_disjoint_and_free_restores_bitmap() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);

    let p1 = alloc.malloc(100).unwrap();
    let p2 = alloc.malloc(200).unwrap();
    let p3 = alloc.malloc(300).unwrap();

    assert!(!p1.is_null() && !p2.is_null() && !p3.is_null());
    assert_ne!(p1, p2);
    assert_ne!(p2, p3);
    assert_ne!(p1, p3);

    alloc.free(p1).unwrap();
    alloc.free(p2).unwrap();
    alloc.free(p3).unwrap();

    assert!(bitmap_is_all_zero(&alloc), "bitmap must be all zero once every allocation is freed");
}

#[test]
fn zero_and_negative_sized_requests_are_rejected() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);
    assert_eq!(alloc.malloc(0), Err(BuddyError::InvalidSize));
}

#[test]
fn request_spanning_the_whole_arena_is_served_at_level_zero() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let arena_base = arena.as_mut_ptr() as usize;
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);

    let overhead = 2 * size_of::<usize>();
    let p = alloc.malloc(MEMORY_SIZE - overhead).unwrap();
    assert_eq!(p as usize, arena_base + overhead);

    // whole arena now occupied: the next allocation of any size must fail.
    assert_eq!(alloc.malloc(1), Err(BuddyError::OutOfMemory));

    alloc.free(p).unwrap();
    assert!(bitmap_is_all_zero(&alloc));
}

#[test]
fn exhaustion_then_subsequent_alloc_fails_but_live_pointers_still_valid() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let base = arena.as_mut_ptr() as usize;
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);

    let overhead = 2 * size_of::<usize>();
    let half = MEMORY_SIZE / 2 - overhead;

    let p1 = alloc.malloc(half).unwrap();
    let p2 = alloc.malloc(half).unwrap();
    assert!(!p1.is_null() && !p2.is_null());
    assert_ne!(p1, p2);

    assert_eq!(alloc.malloc(half), Err(BuddyError::OutOfMemory));

    // both earlier allocations remain valid (distinct, in-bounds) addresses.
    let end = base + MEMORY_SIZE;
    assert!((p1 as usize) >= base && (p1 as usize) < end);
    assert!((p2 as usize) >= base && (p2 as usize) < end);

    alloc.free(p1).unwrap();
    alloc.free(p2).unwrap();
    assert!(bitmap_is_all_zero(&alloc));
}

#[test]
fn sibling_leaves_merge_back_to_zero_on_free() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);

    let overhead = 2 * size_of::<usize>();
    let leaf_payload = MIN_BUCKET_SIZE.saturating_sub(overhead).max(1);

    let p1 = alloc.malloc(leaf_payload).unwrap();
    let p2 = alloc.malloc(leaf_payload).unwrap();

    alloc.free(p1).unwrap();
    alloc.free(p2).unwrap();

    assert!(bitmap_is_all_zero(&alloc), "freeing both buddy leaves must merge all the way to the root");
}

#[test]
fn double_free_is_detected_and_state_is_unchanged() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);

    let p = alloc.malloc(100).unwrap();
    alloc.free(p).unwrap();

    let snapshot: std::vec::Vec<bool> = (0..alloc.bitmap.num_bits()).map(|i| alloc.bitmap.get(i)).collect();

    assert_eq!(alloc.free(p), Err(BuddyError::DoubleFree));

    let after: std::vec::Vec<bool> = (0..alloc.bitmap.num_bits()).map(|i| alloc.bitmap.get(i)).collect();
    assert_eq!(snapshot, after, "a rejected double free must not mutate the bitmap");
}

#[test]
fn every_allocated_block_is_aligned_to_its_class_size() {
    let (mut arena, mut bitmap_buf) = new_buffers();
    let arena_base = arena.as_mut_ptr() as usize;
    let mut alloc = new_alloc(&mut arena, &mut bitmap_buf);

    let sizes = [10usize, 50, 500, 5000, 50_000];
    let mut ptrs = std::vec::Vec::new();
    for &size in &sizes {
        let p = alloc.malloc(size).unwrap();
        ptrs.push((p, size));
    }

    for (p, size) in &ptrs {
        let overhead = 2 * size_of::<usize>();
        let padded = size + overhead;
        let ratio = MEMORY_SIZE / padded;
        let level = (floor_log2(ratio) as usize).min(NUM_LEVELS);
        let class_size = MEMORY_SIZE >> level;
        let rel_offset = *p as usize - overhead - arena_base;
        assert_eq!(rel_offset % class_size, 0, "block must start on a class-size boundary");
    }

    for (p, _) in ptrs {
        alloc.free(p).unwrap();
    }
}
