use std::collections::{BTreeMap, HashMap};

use foundation::ConfigurationError;
use foundation::math::Vec2;

use crate::markers::MarkerState;

/// Proximity clustering over render positions.
///
/// Markers are grouped by single linkage: two markers within `radius`
/// (Euclidean, inclusive) share a cluster, and so does anything transitively
/// linked to them. Groups of one are not clusters.
///
/// Ordering contract:
/// - Cluster ids depend only on the sorted member ids, so repeated calls with
///   unchanged membership return identical ids.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ClusterPolicy {
    radius: f64,
}

impl ClusterPolicy {
    pub fn new(radius: f64) -> Result<Self, ConfigurationError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(ConfigurationError::InvalidClusterRadius(radius));
        }
        Ok(Self { radius })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Returns `id -> cluster id` for every marker that has a neighbour.
    pub fn cluster(&self, markers: &[MarkerState]) -> BTreeMap<String, String> {
        self.assign(markers)
    }

    pub fn assign<'a>(
        &self,
        markers: impl IntoIterator<Item = &'a MarkerState>,
    ) -> BTreeMap<String, String> {
        let mut points: Vec<(&str, Vec2)> = markers
            .into_iter()
            .map(|m| (m.id.as_str(), m.render_position))
            .collect();
        points.sort_by(|a, b| a.0.cmp(b.0));
        points.dedup_by(|a, b| a.0 == b.0);

        let mut sets = DisjointSets::new(points.len());
        let grid = Grid::build(&points, self.radius);
        let r2 = self.radius * self.radius;

        for (i, (_, p)) in points.iter().enumerate() {
            for j in grid.neighbours(*p) {
                if j > i && p.distance_squared(points[j].1) <= r2 {
                    sets.union(i, j);
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..points.len() {
            groups.entry(sets.find(i)).or_default().push(i);
        }

        let mut out = BTreeMap::new();
        for members in groups.values().filter(|m| m.len() > 1) {
            let ids: Vec<&str> = members.iter().map(|&i| points[i].0).collect();
            let cluster_id = cluster_id_for(&ids);
            for id in ids {
                out.insert(id.to_string(), cluster_id.clone());
            }
        }
        out
    }
}

/// Groups `markers` within `radius` of each other.
///
/// An invalid radius yields no clusters.
pub fn cluster(markers: &[MarkerState], radius: f64) -> BTreeMap<String, String> {
    match ClusterPolicy::new(radius) {
        Ok(policy) => policy.cluster(markers),
        Err(_) => BTreeMap::new(),
    }
}

/// Deterministic cluster id from member ids (already sorted).
fn cluster_id_for(sorted_ids: &[&str]) -> String {
    let joined = sorted_ids.join("\n");
    let hash = blake3::hash(joined.as_bytes()).to_hex();
    format!("cluster-{}", &hash.as_str()[..16])
}

/// Uniform grid with cell size equal to the radius, so every neighbour within
/// the radius lives in the 3x3 block around a point's cell.
struct Grid {
    cell: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl Grid {
    fn build(points: &[(&str, Vec2)], cell: f64) -> Self {
        let mut grid = Self {
            cell,
            buckets: HashMap::new(),
        };
        for (i, (_, p)) in points.iter().enumerate() {
            let key = grid.key(*p);
            grid.buckets.entry(key).or_default().push(i);
        }
        grid
    }

    /// Cell coordinates saturate for positions far outside `i64` cells; such
    /// points share edge buckets and the distance check still separates them.
    fn key(&self, p: Vec2) -> (i64, i64) {
        (
            (p.x / self.cell).floor() as i64,
            (p.y / self.cell).floor() as i64,
        )
    }

    fn neighbours(&self, p: Vec2) -> impl Iterator<Item = usize> + '_ {
        let (cx, cy) = self.key(p);
        (-1..=1)
            .flat_map(move |dx: i64| {
                (-1..=1).map(move |dy: i64| (cx.saturating_add(dx), cy.saturating_add(dy)))
            })
            .filter_map(move |k| self.buckets.get(&k))
            .flatten()
            .copied()
    }
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Keeps the smaller index as root so roots are stable across runs.
    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }
}
