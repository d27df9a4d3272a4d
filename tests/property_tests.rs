//! Property-based tests for the coreset/scoring components.
//!
//! Invariants that should hold regardless of input:
//! - selection is deterministic and free of duplicates
//! - every selected center is a bank index; the covering radius bounds all
//!   bank-to-coreset distances
//! - index round-trips are exact; search distances are squared L2
//! - the reweighting factor stays in [0, 1) for valid neighborhoods
//! - moving a query farther from every stored point raises its score

use proptest::prelude::*;

use patchfind::coreset::select_coreset;
use patchfind::scorer::reweighting_factor;
use patchfind::{distance, FlatL2Index};

prop_compose! {
    fn arb_vector(dim: usize)(vec in prop::collection::vec(-10.0f32..10.0, dim)) -> Vec<f32> {
        vec
    }
}

prop_compose! {
    fn arb_bank(dim: usize)(bank in prop::collection::vec(arb_vector(dim), 5..40)) -> Vec<Vec<f32>> {
        bank
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn coreset_selection_is_deterministic(bank in arb_bank(4)) {
        let k = (bank.len() / 2).max(1);
        let a = select_coreset(&bank, k, 0).unwrap();
        let b = select_coreset(&bank, k, 0).unwrap();
        prop_assert_eq!(a.indices, b.indices);
    }

    #[test]
    fn coreset_has_no_duplicates_and_valid_indices(bank in arb_bank(4)) {
        let k = (bank.len() / 3).max(1);
        let sel = select_coreset(&bank, k, 0).unwrap();
        prop_assert_eq!(sel.indices.len(), k);
        let mut sorted = sel.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), k, "duplicate selections");
        prop_assert!(sel.indices.iter().all(|&i| i < bank.len()));
    }

    #[test]
    fn duplicate_heavy_bank_selects_distinct_indices(
        point in arb_vector(4),
        copies in 3usize..20,
        k in 2usize..8,
    ) {
        // A bank made of one repeated vector: every unselected candidate is
        // at distance 0 from the selected set, yet the selection must still
        // be k distinct indices.
        let bank = vec![point; copies];
        let k = k.min(copies);
        let sel = select_coreset(&bank, k, copies / 2).unwrap();
        prop_assert_eq!(sel.indices.len(), k);
        let mut sorted = sel.indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), k, "duplicate selections");
        prop_assert_eq!(sel.covering_radius, 0.0);
    }

    #[test]
    fn covering_radius_bounds_every_bank_point(bank in arb_bank(3)) {
        let k = (bank.len() / 2).max(1);
        let sel = select_coreset(&bank, k, 0).unwrap();
        for p in &bank {
            let d = sel
                .indices
                .iter()
                .map(|&i| distance::l2_distance(p, &bank[i]))
                .fold(f32::INFINITY, f32::min);
            prop_assert!(d <= sel.covering_radius + 1e-4,
                "point at distance {} exceeds radius {}", d, sel.covering_radius);
        }
    }

    #[test]
    fn index_reconstruct_is_exact(vectors in prop::collection::vec(arb_vector(8), 1..30)) {
        let mut index = FlatL2Index::new(8).unwrap();
        for v in &vectors {
            index.add(v).unwrap();
        }
        for (i, v) in vectors.iter().enumerate() {
            prop_assert_eq!(index.reconstruct(i as u32).unwrap(), v.as_slice());
        }
    }

    #[test]
    fn search_distance_is_squared_l2_of_the_reported_id(
        vectors in prop::collection::vec(arb_vector(6), 2..25),
        query in arb_vector(6),
    ) {
        let mut index = FlatL2Index::new(6).unwrap();
        for v in &vectors {
            index.add(v).unwrap();
        }
        let hits = index.search(&query, 3).unwrap();
        prop_assert!(!hits.is_empty());
        // Ascending order and consistency with a direct computation.
        for window in hits.windows(2) {
            prop_assert!(window[0].1 <= window[1].1);
        }
        for (id, d2) in hits {
            let direct = distance::l2_distance_squared(&query, &vectors[id as usize]);
            prop_assert!((d2 - direct).abs() <= 1e-4 * (1.0 + direct));
        }
    }

    #[test]
    fn reweighting_stays_in_unit_interval(
        max_dist in 0.1f32..10.0,
        offsets in prop::collection::vec(0.0f32..5.0, 1..12),
    ) {
        // Valid neighborhoods: the nearest member sits exactly at max_dist,
        // everything else at or beyond it.
        let mut distances = vec![max_dist];
        distances.extend(offsets.iter().map(|o| max_dist + o));
        let w = reweighting_factor(&distances, max_dist);
        prop_assert!((0.0..1.0).contains(&w), "w = {}", w);
    }

    #[test]
    fn reweighting_grows_as_neighbors_move_away(
        max_dist in 0.1f32..5.0,
        gap in 0.1f32..3.0,
    ) {
        let near = [max_dist, max_dist + gap, max_dist + gap];
        let far = [max_dist, max_dist + 2.0 * gap, max_dist + 2.0 * gap];
        let w_near = reweighting_factor(&near, max_dist);
        let w_far = reweighting_factor(&far, max_dist);
        prop_assert!(w_far >= w_near);
    }

    #[test]
    fn score_increases_as_query_leaves_the_coreset(
        vectors in prop::collection::vec(arb_vector(4), 2..20),
    ) {
        let mut index = FlatL2Index::new(4).unwrap();
        for v in &vectors {
            index.add(v).unwrap();
        }
        // All stored points fit in the ball |v| <= 20; push the query out
        // along a fixed ray far beyond it, then twice as far.
        let near: Vec<f32> = vec![50.0; 4];
        let far: Vec<f32> = vec![100.0; 4];
        let d_near = index.search(&near, 1).unwrap()[0].1;
        let d_far = index.search(&far, 1).unwrap()[0].1;
        prop_assert!(d_far > d_near);
    }
}
