use std::collections::{BTreeMap, BTreeSet};

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::physics::unknowns::UnknownQuantityHandler;

/// Placement of each solved unknown in the global vector.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLayout {
    order: Vec<usize>,
    offsets: BTreeMap<usize, (usize, usize)>,
    size: usize,
}

impl BlockLayout {
    /// Unknowns are laid out contiguously in the order given.
    pub fn new(ids: &[usize], unknowns: &UnknownQuantityHandler) -> Self {
        let mut offsets = BTreeMap::new();
        let mut size = 0;
        for &id in ids {
            let n = unknowns.get(id).size();
            offsets.insert(id, (size, n));
            size += n;
        }
        Self {
            order: ids.to_vec(),
            offsets,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn ids(&self) -> &[usize] {
        &self.order
    }

    pub fn contains(&self, id: usize) -> bool {
        self.offsets.contains_key(&id)
    }

    pub fn offset(&self, id: usize) -> Option<usize> {
        self.offsets.get(&id).map(|&(o, _)| o)
    }

    pub fn range(&self, id: usize) -> Option<std::ops::Range<usize>> {
        self.offsets.get(&id).map(|&(o, n)| o..o + n)
    }

    /// Whether the layout still describes the given unknowns.
    pub fn matches(&self, ids: &[usize], unknowns: &UnknownQuantityHandler) -> bool {
        self.order == ids && ids.iter().all(|&id| self.offsets[&id].1 == unknowns.get(id).size())
    }

    /// Current values of every laid-out unknown, concatenated.
    pub fn gather(&self, unknowns: &UnknownQuantityHandler) -> DVector<f64> {
        let mut x = DVector::zeros(self.size);
        for &id in &self.order {
            if let Some(range) = self.range(id) {
                x.as_mut_slice()[range].copy_from_slice(unknowns.values(id));
            }
        }
        x
    }

    pub fn scatter(&self, x: &DVector<f64>, unknowns: &mut UnknownQuantityHandler) {
        assert_eq!(x.len(), self.size, "solution vector does not match block layout");
        for &id in &self.order {
            if let Some(range) = self.range(id) {
                unknowns.store(id, &x.as_slice()[range]);
            }
        }
    }
}

/// Square sparse matrix assembled from per-unknown blocks.
///
/// Entries are accumulated as triplets, duplicates summed on export. A
/// matrix handed to terms is always freshly zeroed by `reset`.
pub struct BlockMatrix {
    coo: CooMatrix<f64>,
    blocks: BTreeSet<(usize, usize)>,
}

impl BlockMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            coo: CooMatrix::new(n, n),
            blocks: BTreeSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.coo.nrows()
    }

    /// Drop every entry; resize when the layout changed.
    pub fn reset(&mut self, n: usize) {
        if n == self.size() {
            self.coo.clear_triplets();
        } else {
            self.coo = CooMatrix::new(n, n);
        }
        self.blocks.clear();
    }

    pub fn block(&mut self, row_offset: usize, col_offset: usize, nrows: usize, ncols: usize) -> BlockView<'_> {
        assert!(
            row_offset + nrows <= self.size() && col_offset + ncols <= self.size(),
            "block ({row_offset}, {col_offset}) of size {nrows}x{ncols} exceeds matrix of size {}",
            self.size()
        );
        BlockView {
            coo: &mut self.coo,
            row_offset,
            col_offset,
            nrows,
            ncols,
        }
    }

    /// Record that the (row unknown, column unknown) block holds entries.
    pub fn mark_block(&mut self, row_id: usize, col_id: usize) {
        self.blocks.insert((row_id, col_id));
    }

    pub fn nonzero_blocks(&self) -> &BTreeSet<(usize, usize)> {
        &self.blocks
    }

    /// Number of stored triplets before duplicates are merged.
    pub fn triplet_count(&self) -> usize {
        self.coo.nnz()
    }

    pub fn to_csr(&self) -> CsrMatrix<f64> {
        CsrMatrix::from(&self.coo)
    }
}

/// Window into a `BlockMatrix`; indices are local to the block.
pub struct BlockView<'a> {
    coo: &'a mut CooMatrix<f64>,
    row_offset: usize,
    col_offset: usize,
    nrows: usize,
    ncols: usize,
}

impl BlockView<'_> {
    /// Add `value` to entry (i, j), accumulating onto anything already there.
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        assert!(
            i < self.nrows && j < self.ncols,
            "entry ({i}, {j}) outside block of size {}x{}",
            self.nrows,
            self.ncols
        );
        self.coo.push(self.row_offset + i, self.col_offset + j, value);
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }
}
