use crate::types::{Bundle, Price};

// === EXCESS DEMAND ===

/// Aggregate demand of the chosen bundles minus capacity, per item.
pub fn excess_demand<'a>(
    bundles: impl IntoIterator<Item = &'a Bundle>,
    capacities: &[f64],
) -> Vec<f64> {
    let mut demand = vec![0.0; capacities.len()];
    for bundle in bundles {
        for j in bundle.taken() {
            if let Some(d) = demand.get_mut(j) {
                *d += 1.0;
            }
        }
    }
    demand
        .iter()
        .zip(capacities)
        .map(|(d, cap)| d - cap)
        .collect()
}

/// Clip excess demand: priced items keep their signed excess, free items are
/// floored at zero so that slack on an unpriced item is not an error.
pub fn clip_excess_demand(excess: &[f64], prices: &[Price]) -> Vec<f64> {
    excess
        .iter()
        .zip(prices)
        .map(|(&z, &p)| if p > 0.0 { z } else { z.max(0.0) })
        .collect()
}

/// Euclidean norm of the clipped excess demand.
pub fn clearing_error(clipped: &[f64]) -> f64 {
    clipped.iter().map(|z| z * z).sum::<f64>().sqrt()
}

/// Tâtonnement step: `p += delta * z̃`, coordinatewise.
///
/// Clipping keeps free items from going negative, but a priced item with
/// excess supply can overshoot below zero; those are floored at zero.
pub fn update_prices(prices: &mut [Price], clipped: &[f64], delta: f64) {
    for (p, z) in prices.iter_mut().zip(clipped) {
        *p = (*p + delta * z).max(0.0);
    }
}
