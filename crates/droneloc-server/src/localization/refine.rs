//! Bounded Nelder–Mead refinement around the best grid point.

use droneloc_core::geometry::Vec3;

use super::grid::{ErrorModel, GridFix};

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;
/// Stop once the simplex errors span less than this.
const TOLERANCE: f64 = 1e-12;

/// Axis-aligned box the simplex is projected into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBox {
    /// Lower corner.
    pub min: Vec3,
    /// Upper corner.
    pub max: Vec3,
}

impl SearchBox {
    /// The cell of half-width `step` around `center`, intersected with
    /// `[outer_min, outer_max]`.
    #[must_use]
    pub fn cell(center: Vec3, step: f64, outer_min: Vec3, outer_max: Vec3) -> Self {
        let half = Vec3::new(step, step, step);
        Self {
            min: (center - half).clamp(&outer_min, &outer_max),
            max: (center + half).clamp(&outer_min, &outer_max),
        }
    }

    fn project(&self, p: Vec3) -> Vec3 {
        p.clamp(&self.min, &self.max)
    }
}

/// Minimise `model` starting from `start`, never leaving `bounds`.
///
/// The result is never worse than `start`.
#[must_use]
pub fn nelder_mead(model: &ErrorModel<'_>, start: GridFix, bounds: &SearchBox, step: f64, max_iterations: usize) -> GridFix {
    let eval = |p: Vec3| -> (Vec3, f64) {
        let e = model.error(&p);
        (p, if e.is_finite() { e } else { f64::INFINITY })
    };

    let origin = bounds.project(start.point);
    let mut simplex: Vec<(Vec3, f64)> = Vec::with_capacity(4);
    simplex.push(eval(origin));
    for axis in 0..3 {
        let mut offset = 0.5 * step;
        // Step inward when the start sits on the upper face.
        if origin.axis(axis) + offset > bounds.max.axis(axis) {
            offset = -offset;
        }
        let vertex = bounds.project(origin.with_axis(axis, origin.axis(axis) + offset));
        simplex.push(eval(vertex));
    }

    for _ in 0..max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let (best, worst) = (simplex[0].1, simplex[3].1);
        if (worst - best).abs() < TOLERANCE {
            break;
        }

        let centroid = (simplex[0].0 + simplex[1].0 + simplex[2].0) * (1.0 / 3.0);
        let toward = |coef: f64| bounds.project(centroid + (simplex[3].0 - centroid) * coef);

        let reflected = eval(toward(-REFLECT));
        if reflected.1 < simplex[0].1 {
            let expanded = eval(toward(-EXPAND));
            simplex[3] = if expanded.1 < reflected.1 { expanded } else { reflected };
            continue;
        }
        if reflected.1 < simplex[2].1 {
            simplex[3] = reflected;
            continue;
        }

        let contracted = if reflected.1 < simplex[3].1 {
            eval(toward(-CONTRACT))
        } else {
            eval(toward(CONTRACT))
        };
        if contracted.1 < simplex[3].1.min(reflected.1) {
            simplex[3] = contracted;
            continue;
        }

        let anchor = simplex[0].0;
        for vertex in simplex.iter_mut().skip(1) {
            *vertex = eval(bounds.project(anchor + (vertex.0 - anchor) * SHRINK));
        }
    }

    let (point, error) = simplex
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((start.point, start.error));
    if error <= start.error {
        GridFix { point, error }
    } else {
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::localization::grid::{coarse_search, predicted_intensity, Observation};
    use droneloc_core::config::GridBounds;

    fn observations(target: Vec3) -> Vec<Observation> {
        let nodes = [
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(20.0, 0.0, 1.0),
            Vec3::new(0.0, 20.0, 1.0),
        ];
        let raw: Vec<f64> = nodes.iter().map(|n| predicted_intensity(&target, n, 0.5)).collect();
        let total: f64 = raw.iter().sum();
        nodes
            .iter()
            .zip(raw)
            .map(|(n, p)| Observation {
                node_id: 1,
                position: *n,
                share: p / total,
                direction: (target - *n).normalized(),
            })
            .collect()
    }

    #[test]
    fn refines_off_grid_target() {
        let target = Vec3::new(10.4, 9.7, 5.3);
        let obs = observations(target);
        let model = ErrorModel::new(&obs, 0.5, 0.3);
        let bounds = GridBounds::default();
        let coarse = coarse_search(&model, &bounds, 1.0);
        let cell = SearchBox::cell(coarse.point, 1.0, bounds.min(), bounds.max());
        let fine = nelder_mead(&model, coarse, &cell, 1.0, 500);

        assert!(fine.error <= coarse.error);
        assert!(fine.point.distance(&target) < coarse.point.distance(&target));
        assert!(fine.point.distance(&target) < 0.1, "refined to {:?}", fine.point);
    }

    #[test]
    fn stays_inside_cell() {
        // Target well outside the cell: the optimum lands on the boundary.
        let obs = observations(Vec3::new(15.0, 15.0, 10.0));
        let model = ErrorModel::new(&obs, 0.5, 0.3);
        let start_point = Vec3::new(5.0, 5.0, 5.0);
        let start = GridFix { point: start_point, error: model.error(&start_point) };
        let cell = SearchBox::cell(start_point, 1.0, Vec3::new(-5.0, -5.0, 0.0), Vec3::new(25.0, 25.0, 25.0));
        let fine = nelder_mead(&model, start, &cell, 1.0, 500);
        for axis in 0..3 {
            assert!(fine.point.axis(axis) >= cell.min.axis(axis) - 1e-12);
            assert!(fine.point.axis(axis) <= cell.max.axis(axis) + 1e-12);
        }
        assert!(fine.error <= start.error);
    }

    #[test]
    fn zero_iterations_returns_start() {
        let obs = observations(Vec3::new(10.0, 10.0, 5.0));
        let model = ErrorModel::new(&obs, 0.5, 0.3);
        let p = Vec3::new(10.0, 10.0, 5.0);
        let start = GridFix { point: p, error: model.error(&p) };
        let cell = SearchBox::cell(p, 1.0, Vec3::new(-5.0, -5.0, 0.0), Vec3::new(25.0, 25.0, 25.0));
        let out = nelder_mead(&model, start, &cell, 1.0, 0);
        assert!(out.error <= start.error);
    }
}
