use std::{cmp::Ordering, collections::BinaryHeap};

use ndarray::{ArrayView1, ArrayView2};

/// Static k-d tree over selected rows of a feature matrix. Rows are referenced by index, never
/// copied; each node splits at the median of the axis with the widest spread.
#[derive(Debug, Clone)]
pub struct KdTree<'a> {
    data: ArrayView2<'a, f64>,
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct KdNode {
    row: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Heap entry ordered by distance, then row index.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    row: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.row.cmp(&other.row))
    }
}

impl<'a> KdTree<'a> {
    /// Indexes `rows` of `data`.
    #[must_use]
    pub fn build(data: ArrayView2<'a, f64>, mut rows: Vec<usize>) -> Self {
        let mut tree = Self {
            data,
            nodes: Vec::with_capacity(rows.len()),
            root: None,
        };
        tree.root = tree.split(&mut rows);
        tree
    }

    /// The `k` indexed rows closest (Euclidean) to row `query` of the same matrix, nearest
    /// first. `query` itself is never returned; equal distances order by lower row index.
    #[must_use]
    pub fn nearest(&self, query: usize, k: usize) -> Vec<usize> {
        if k == 0 {
            return Vec::new();
        }
        let mut best = BinaryHeap::with_capacity(k + 1);
        self.search(self.root, self.data.row(query), query, k, &mut best);
        best.into_sorted_vec()
            .into_iter()
            .map(|candidate| candidate.row)
            .collect()
    }

    fn split(&mut self, rows: &mut [usize]) -> Option<usize> {
        if rows.is_empty() {
            return None;
        }
        let axis = self.widest_axis(rows);
        let mid = rows.len() / 2;
        rows.select_nth_unstable_by(mid, |&a, &b| {
            self.coordinate(a, axis)
                .total_cmp(&self.coordinate(b, axis))
                .then(a.cmp(&b))
        });
        let node = self.nodes.len();
        self.nodes.push(KdNode {
            row: rows[mid],
            axis,
            left: None,
            right: None,
        });
        let (lower, upper) = rows.split_at_mut(mid);
        let left = self.split(lower);
        let right = self.split(&mut upper[1..]);
        self.nodes[node].left = left;
        self.nodes[node].right = right;
        Some(node)
    }

    fn widest_axis(&self, rows: &[usize]) -> usize {
        let mut widest = (0, f64::NEG_INFINITY);
        for axis in 0..self.data.ncols() {
            let (low, high) = rows
                .iter()
                .map(|&row| self.coordinate(row, axis))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
                    (lo.min(value), hi.max(value))
                });
            if high - low > widest.1 {
                widest = (axis, high - low);
            }
        }
        widest.0
    }

    fn coordinate(&self, row: usize, axis: usize) -> f64 {
        self.data.get((row, axis)).copied().unwrap_or(0.0)
    }

    fn search(
        &self,
        node: Option<usize>,
        point: ArrayView1<'_, f64>,
        exclude: usize,
        k: usize,
        best: &mut BinaryHeap<Candidate>,
    ) {
        let Some(node) = node.map(|idx| self.nodes[idx]) else {
            return;
        };
        if node.row != exclude {
            let candidate = Candidate {
                distance: squared_distance(point, self.data.row(node.row)),
                row: node.row,
            };
            if best.len() < k {
                best.push(candidate);
            } else if best.peek().is_some_and(|worst| candidate < *worst) {
                best.pop();
                best.push(candidate);
            }
        }
        let offset =
            point.get(node.axis).copied().unwrap_or(0.0) - self.coordinate(node.row, node.axis);
        let (near, far) = if offset <= 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        self.search(near, point, exclude, k, best);
        let reach = best.peek().map_or(f64::INFINITY, |worst| worst.distance);
        if best.len() < k || offset * offset <= reach {
            self.search(far, point, exclude, k, best);
        }
    }
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use rand::Rng;
    use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

    fn linear_scan(data: ArrayView2<'_, f64>, query: usize, rows: &[usize], k: usize) -> Vec<usize> {
        let origin = data.row(query);
        let mut scored: Vec<Candidate> = rows
            .iter()
            .filter(|&&row| row != query)
            .map(|&row| Candidate {
                distance: squared_distance(origin, data.row(row)),
                row,
            })
            .collect();
        scored.sort();
        scored.into_iter().take(k).map(|c| c.row).collect()
    }

    #[test]
    fn matches_linear_scan_with_duplicate_coordinates() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        // Small integer grid so distances tie often.
        let data = Array2::from_shape_fn((400, 3), |_| f64::from(rng.gen_range(0_u8..5)));
        let rows: Vec<usize> = (0..400).filter(|row| row % 3 != 0).collect();
        let tree = KdTree::build(data.view(), rows.clone());
        assert_eq!(tree.nodes.len(), rows.len());
        for query in (0..400).step_by(7) {
            for k in [1, 3, 5, 12] {
                assert_eq!(
                    tree.nearest(query, k),
                    linear_scan(data.view(), query, &rows, k),
                    "query {query}, k {k}"
                );
            }
        }
    }

    #[test]
    fn matches_linear_scan_on_continuous_data() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let data = Array2::from_shape_fn((1000, 6), |_| rng.gen_range(-50.0..50.0));
        let rows: Vec<usize> = (0..1000).collect();
        let tree = KdTree::build(data.view(), rows.clone());
        for query in (0..1000).step_by(13) {
            assert_eq!(tree.nearest(query, 3), linear_scan(data.view(), query, &rows, 3));
        }
    }

    #[test]
    fn excludes_query_and_caps_at_indexed_rows() {
        let data = array![[0.0, 0.0], [1.0, 0.0], [0.0, 2.0], [5.0, 5.0]];
        let tree = KdTree::build(data.view(), vec![0, 1, 2]);
        assert_eq!(tree.nearest(0, 10), vec![1, 2]);
        assert_eq!(tree.nearest(3, 2), vec![2, 1]);
        assert!(tree.nearest(1, 0).is_empty());
        assert!(KdTree::build(data.view(), Vec::new()).nearest(0, 3).is_empty());
    }
}
