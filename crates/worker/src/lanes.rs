//! Weighted queue lane ordering.
//!
//! Each dequeue attempt visits every lane, but the visiting order is drawn
//! at random with probability proportional to the lane weights. A lane with
//! twice the weight is tried first twice as often, and no lane starves.

use std::collections::BTreeMap;

use rand::Rng;

/// Draw a visiting order for `weights`. Lanes with non-positive weight are
/// visited last, in name order.
pub fn ordered<R: Rng>(weights: &BTreeMap<String, i32>, rng: &mut R) -> Vec<String> {
    let mut remaining: Vec<(&String, u32)> = weights
        .iter()
        .filter(|(_, w)| **w > 0)
        .map(|(q, w)| (q, w.unsigned_abs()))
        .collect();
    let mut order = Vec::with_capacity(weights.len());

    while !remaining.is_empty() {
        let total: u32 = remaining.iter().map(|(_, w)| w).sum();
        let mut pick = rng.random_range(0..total);
        let index = remaining
            .iter()
            .position(|(_, w)| {
                if pick < *w {
                    true
                } else {
                    pick -= w;
                    false
                }
            })
            .unwrap_or(remaining.len() - 1);
        order.push(remaining.remove(index).0.clone());
    }

    order.extend(
        weights
            .iter()
            .filter(|(_, w)| **w <= 0)
            .map(|(q, _)| q.clone()),
    );
    order
}
