//! Arena union-find with union-by-size
//!
//! Parents and sizes live in flat index arrays, so the merge graph never
//! materializes edges or node references. Deterministic: on equal size the
//! lower root index wins, so identical union sequences yield identical roots.

/// Disjoint-set forest over `0..len`
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    /// Create `len` singleton sets
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    /// Find the root of `x`, compressing the path
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Union the sets containing `a` and `b`; returns true if they were
    /// previously disjoint
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        // Union by size; lower index wins ties for determinism
        let (big, small) = if self.size[ra] > self.size[rb] {
            (ra, rb)
        } else if self.size[rb] > self.size[ra] {
            (rb, ra)
        } else if ra < rb {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }

    /// Whether `a` and `b` are in the same set
    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// Size of the set containing `x`
    pub fn set_size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// True for an empty forest
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}
