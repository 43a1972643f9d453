use std::collections::BTreeMap;

/// Immutable keypoint connectivity graph used for drawing skeletons.
///
/// Maps a keypoint index to the indices it connects to. Each edge is
/// listed once, from its lower-index endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct SkeletonSchema {
    edges: BTreeMap<usize, Vec<usize>>,
}

impl SkeletonSchema {
    pub fn new(edges: BTreeMap<usize, Vec<usize>>) -> Self {
        Self { edges }
    }

    /// The 17-keypoint COCO person skeleton.
    pub fn coco17() -> Self {
        let table: [(usize, &[usize]); 17] = [
            (0, &[1, 2]),
            (1, &[3]),
            (2, &[4]),
            (3, &[]),
            (4, &[]),
            (5, &[6, 7, 11]),
            (6, &[8, 12]),
            (7, &[9]),
            (8, &[10]),
            (9, &[]),
            (10, &[]),
            (11, &[12, 13]),
            (12, &[14]),
            (13, &[15]),
            (14, &[16]),
            (15, &[]),
            (16, &[]),
        ];
        Self::new(
            table
                .iter()
                .map(|(from, to)| (*from, to.to_vec()))
                .collect(),
        )
    }

    /// Indices connected to `index`; empty for unknown indices.
    pub fn neighbours(&self, index: usize) -> &[usize] {
        self.edges.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates every `(from, to)` edge.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges
            .keys()
            .flat_map(|&from| self.neighbours(from).iter().map(move |&to| (from, to)))
    }
}

impl Default for SkeletonSchema {
    fn default() -> Self {
        Self::coco17()
    }
}
