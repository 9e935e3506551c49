//! Property tests for the launch-layout invariants: kernarg packing, grid
//! coverage, and device-id round trips

use proptest::prelude::*;

use kernelforge::device::{DeviceId, PlatformTag};
use kernelforge::launch::{ceil_div, grid_blocks, kernarg_align, kernarg_offsets};

proptest! {
    #[test]
    fn kernarg_offsets_respect_alignment_and_order(
        sizes in prop::collection::vec(1u32..=32, 0..16)
    ) {
        let (offsets, total) = kernarg_offsets(&sizes);
        prop_assert_eq!(offsets.len(), sizes.len());

        let mut previous_end = 0usize;
        for (offset, &size) in offsets.iter().zip(&sizes) {
            let align = kernarg_align(size as usize);
            prop_assert_eq!(offset % align, 0);
            prop_assert!(*offset >= previous_end);
            previous_end = offset + size as usize;
        }
        prop_assert_eq!(total, previous_end);
    }

    #[test]
    fn kernarg_slots_never_overlap(
        sizes in prop::collection::vec(1u32..=16, 2..12)
    ) {
        let (offsets, _) = kernarg_offsets(&sizes);
        for i in 1..offsets.len() {
            prop_assert!(offsets[i] >= offsets[i - 1] + sizes[i - 1] as usize);
        }
    }

    #[test]
    fn computed_grid_covers_the_problem(
        problem in prop::array::uniform3(1u32..=100_000),
        block in prop::array::uniform3(1u32..=1024),
    ) {
        let blocks = grid_blocks(problem, block);
        for axis in 0..3 {
            let covered = blocks[axis] as u64 * block[axis] as u64;
            prop_assert!(covered >= problem[axis] as u64);
            // and not a whole extra workgroup beyond what is needed
            prop_assert!(covered - (problem[axis] as u64) < block[axis] as u64);
        }
    }

    #[test]
    fn device_id_round_trips(tag_raw in 0u32..4, index in 0usize..(1 << 20)) {
        let tag = PlatformTag::from_raw(tag_raw).unwrap();
        let id = DeviceId::new(tag, index);
        prop_assert_eq!(DeviceId::decode(id.encode()).unwrap(), id);
    }
}

#[test]
fn grid_not_multiple_of_block_is_rounded_up() {
    assert_eq!(grid_blocks([1000, 1, 1], [32, 1, 1]), [32, 1, 1]);
}

#[test]
fn ceil_div_edges() {
    assert_eq!(ceil_div(0, 32), 0);
    assert_eq!(ceil_div(1, 32), 1);
    assert_eq!(ceil_div(32, 32), 1);
    assert_eq!(ceil_div(33, 32), 2);
    assert_eq!(ceil_div(5, 0), 0);
}

#[test]
fn spec_example_layout() {
    // i32, i64, i8, 16-byte struct
    let (offsets, total) = kernarg_offsets(&[4, 8, 1, 16]);
    assert_eq!(offsets, vec![0, 8, 16, 24]);
    assert_eq!(total, 40);
}
