use batch_ngin::{
    config::AtlasConfig,
    data_structures::atlas::{AtlasPacker, INITIAL_RESOLUTION, PADDING, Placement},
};

/// Deterministic pseudo random sizes, so failures are reproducible.
fn sizes(count: usize, max: u32) -> Vec<(u32, u32)> {
    let mut state: u32 = 0x2545_f491;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state % max + 1
    };
    (0..count).map(|_| (next(), next())).collect()
}

#[test]
fn first_rectangle_goes_to_the_padded_corner() {
    let mut packer = AtlasPacker::new();
    assert_eq!(packer.resolution(), INITIAL_RESOLUTION);

    let placement = packer.insert_rectangle(10, 10);

    assert_eq!(
        placement,
        Placement {
            x: PADDING,
            y: PADDING,
            resized: false
        }
    );
    assert_eq!(packer.resolution(), 128);
    assert_eq!(packer.shelves().len(), 1);
    assert_eq!(packer.shelves()[0].height, 15);
}

#[test]
fn wide_rectangles_open_new_shelves() {
    let mut packer = AtlasPacker::new();
    packer.insert_rectangle(10, 10);

    let second = packer.insert_rectangle(120, 10);
    let third = packer.insert_rectangle(120, 10);

    assert_eq!((second.x, second.y, second.resized), (2, 17, false));
    assert_eq!((third.x, third.y, third.resized), (2, 32, false));
    let tops: Vec<u32> = packer.shelves().iter().map(|s| s.top).collect();
    assert_eq!(tops, vec![0, 15, 30]);
    assert_eq!(packer.resolution(), 128);
}

#[test]
fn neighbours_on_a_shelf_are_separated_by_both_paddings() {
    let mut packer = AtlasPacker::new();
    let first = packer.insert_rectangle(10, 10);
    let second = packer.insert_rectangle(10, 10);

    assert_eq!(second.y, first.y);
    assert_eq!(second.x, first.x + 10 + 2 * PADDING);
    assert_eq!(packer.shelves().len(), 1);
}

#[test]
fn much_shorter_rectangles_do_not_share_a_tall_shelf() {
    let mut packer = AtlasPacker::new();
    packer.insert_rectangle(10, 40);
    let small = packer.insert_rectangle(10, 4);

    assert_eq!(packer.shelves().len(), 2);
    assert_eq!(small.y, packer.shelves()[1].top + PADDING);
}

#[test]
fn oversized_rectangle_grows_the_atlas() {
    let mut packer = AtlasPacker::new();

    let placement = packer.insert_rectangle(120, 120);

    assert!(placement.resized);
    assert_eq!((placement.x, placement.y), (2, 2));
    assert_eq!(packer.resolution(), 256);
}

#[test]
fn growth_may_double_several_times_in_one_insertion() {
    let mut packer = AtlasPacker::new();

    let placement = packer.insert_rectangle(500, 1);

    assert!(placement.resized);
    assert_eq!(packer.resolution(), 512);
}

#[test]
fn growth_keeps_earlier_placements() {
    let mut packer = AtlasPacker::new();
    let first = packer.insert_rectangle(30, 30);
    let shelves_before = packer.shelves().to_vec();

    let big = packer.insert_rectangle(200, 200);

    assert!(big.resized);
    assert_eq!(&packer.shelves()[..1], &shelves_before[..]);
    // A later rectangle of the first's height still reuses the first shelf.
    let next = packer.insert_rectangle(30, 30);
    assert_eq!(next.y, first.y);
    assert_eq!(next.x, first.x + 30 + 2 * PADDING);
}

#[test]
fn resolution_only_ever_doubles() {
    let mut packer = AtlasPacker::with_config(AtlasConfig {
        initial_resolution: 32,
        padding: 1,
    });
    let mut resolution = packer.resolution();

    for (w, h) in sizes(200, 40) {
        let placement = packer.insert_rectangle(w, h);
        let now = packer.resolution();
        if placement.resized {
            assert!(now > resolution);
            assert!(now.is_power_of_two());
            assert_eq!(now % resolution, 0);
        } else {
            assert_eq!(now, resolution);
        }
        resolution = now;
    }
}

#[test]
fn padded_placements_never_overlap() {
    let mut packer = AtlasPacker::new();
    let padding = packer.padding();

    // (left, top, right, bottom) of every padded placement, exclusive on the far side.
    let mut placed: Vec<(u32, u32, u32, u32)> = Vec::new();
    for (w, h) in sizes(300, 48) {
        let p = packer.insert_rectangle(w, h);
        placed.push((
            p.x - padding,
            p.y - padding,
            p.x + w + padding,
            p.y + h + padding,
        ));
    }

    let resolution = packer.resolution();
    for (i, a) in placed.iter().enumerate() {
        assert!(a.2 <= resolution && a.3 <= resolution, "{a:?} outside {resolution}");
        for b in &placed[i + 1..] {
            let disjoint = a.2 <= b.0 || b.2 <= a.0 || a.3 <= b.1 || b.3 <= a.1;
            assert!(disjoint, "{a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn zero_padding_packs_edge_to_edge() {
    let mut packer = AtlasPacker::with_config(AtlasConfig {
        initial_resolution: 16,
        padding: 0,
    });

    let a = packer.insert_rectangle(8, 8);
    let b = packer.insert_rectangle(8, 8);

    assert_eq!((a.x, a.y), (0, 0));
    assert_eq!((b.x, b.y), (8, 0));
    assert!(!b.resized);
}

#[test]
fn impossibly_large_rectangle_still_yields_a_growing_placement() {
    let mut packer = AtlasPacker::new();
    let placement = packer.insert_rectangle(u32::MAX - 1, 1);

    assert_eq!(
        placement,
        Placement {
            x: PADDING,
            y: PADDING,
            resized: true
        }
    );
    assert!(packer.resolution() >= u32::MAX - 1);

    // The saturated shelf is full, later rectangles go onto a new one.
    let shelf_height = packer.shelves()[0].height;
    let next = packer.insert_rectangle(10, 1);
    assert_eq!(packer.shelves().len(), 2);
    assert_eq!(
        next,
        Placement {
            x: PADDING,
            y: shelf_height + PADDING,
            resized: false
        }
    );
}
