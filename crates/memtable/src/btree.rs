//! B-tree of order `b` stored in an arena.
//!
//! Nodes live in a `Vec` and refer to each other by index, children downward
//! and a parent index upward. A node holds at most `b - 1` records; inserting
//! the `b`-th splits it around the median, which moves into the parent. A
//! split of the root grows a new root.

use record::Record;

#[derive(Debug, Clone)]
struct Node {
    records: Vec<Record>,
    /// Empty for leaves, otherwise `records.len() + 1` entries.
    children: Vec<usize>,
    parent: Option<usize>,
}

impl Node {
    fn leaf(parent: Option<usize>) -> Self {
        Self {
            records: Vec::new(),
            children: Vec::new(),
            parent,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn search(&self, key: &str) -> Result<usize, usize> {
        self.records.binary_search_by(|r| r.key.as_str().cmp(key))
    }
}

#[derive(Debug, Clone)]
pub struct BTree {
    nodes: Vec<Node>,
    root: usize,
    order: usize,
    len: usize,
}

impl BTree {
    /// Creates an empty tree. Orders below 3 are raised to 3.
    pub fn new(order: usize) -> Self {
        Self {
            nodes: vec![Node::leaf(None)],
            root: 0,
            order: order.max(3),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels from root to leaves.
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut idx = self.root;
        while let Some(&child) = self.nodes[idx].children.first() {
            idx = child;
            height += 1;
        }
        height
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        let mut idx = self.root;
        loop {
            let node = &self.nodes[idx];
            match node.search(key) {
                Ok(pos) => return Some(&node.records[pos]),
                Err(_) if node.is_leaf() => return None,
                Err(pos) => idx = node.children[pos],
            }
        }
    }

    /// Inserts `record`, replacing any record with the same key in place.
    /// Returns the replaced record.
    pub fn insert(&mut self, record: Record) -> Option<Record> {
        let mut idx = self.root;
        loop {
            let node = &mut self.nodes[idx];
            match node.search(&record.key) {
                Ok(pos) => return Some(std::mem::replace(&mut node.records[pos], record)),
                Err(pos) if node.is_leaf() => {
                    node.records.insert(pos, record);
                    self.len += 1;
                    self.split_upward(idx);
                    return None;
                }
                Err(pos) => idx = node.children[pos],
            }
        }
    }

    /// Splits `idx` while it overflows, walking up through parent links.
    fn split_upward(&mut self, mut idx: usize) {
        while self.nodes[idx].records.len() >= self.order {
            let mid = self.nodes[idx].records.len() / 2;
            let node = &mut self.nodes[idx];
            let mut right_records = node.records.split_off(mid);
            let median = right_records.remove(0);
            let right_children = if node.is_leaf() {
                Vec::new()
            } else {
                node.children.split_off(mid + 1)
            };
            let parent = node.parent;

            let right = self.nodes.len();
            for &child in &right_children {
                self.nodes[child].parent = Some(right);
            }
            self.nodes.push(Node {
                records: right_records,
                children: right_children,
                parent,
            });

            match parent {
                Some(p) => {
                    let pos = self.nodes[p]
                        .children
                        .iter()
                        .position(|&c| c == idx)
                        .unwrap_or(self.nodes[p].children.len() - 1);
                    self.nodes[p].records.insert(pos, median);
                    self.nodes[p].children.insert(pos + 1, right);
                    idx = p;
                }
                None => {
                    let root = self.nodes.len();
                    self.nodes.push(Node {
                        records: vec![median],
                        children: vec![idx, right],
                        parent: None,
                    });
                    self.nodes[idx].parent = Some(root);
                    self.nodes[right].parent = Some(root);
                    self.root = root;
                    return;
                }
            }
        }
    }

    /// Records in key order.
    pub fn sorted(&self) -> Vec<&Record> {
        let mut out = Vec::with_capacity(self.len);
        self.collect(self.root, &mut out);
        out
    }

    fn collect<'a>(&'a self, idx: usize, out: &mut Vec<&'a Record>) {
        let node = &self.nodes[idx];
        if node.is_leaf() {
            out.extend(node.records.iter());
            return;
        }
        for (i, record) in node.records.iter().enumerate() {
            self.collect(node.children[i], out);
            out.push(record);
        }
        if let Some(&last) = node.children.last() {
            self.collect(last, out);
        }
    }

    /// Checks ordering, fill and parent-link invariants. Test helper.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        fn walk(tree: &BTree, idx: usize, parent: Option<usize>, depth: usize, leaf_depth: &mut Option<usize>) {
            let node = &tree.nodes[idx];
            assert_eq!(node.parent, parent, "parent link of node {}", idx);
            assert!(node.records.len() < tree.order, "node {} overflows", idx);
            assert!(node.records.windows(2).all(|w| w[0].key < w[1].key));
            if node.is_leaf() {
                match *leaf_depth {
                    Some(d) => assert_eq!(d, depth, "leaves at different depths"),
                    None => *leaf_depth = Some(depth),
                }
            } else {
                assert_eq!(node.children.len(), node.records.len() + 1);
                for &child in &node.children {
                    walk(tree, child, Some(idx), depth + 1, leaf_depth);
                }
            }
        }
        let mut leaf_depth = None;
        walk(self, self.root, None, 0, &mut leaf_depth);
        let keys: Vec<&str> = self.sorted().iter().map(|r| r.key.as_str()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys.len(), self.len);
    }
}
