//! Arena-backed token trie.

use std::collections::HashMap;

/// One trie node; children index into the owning arena.
#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: HashMap<u32, usize>,
    terminal: bool,
}

/// Prefix trie over token-id sequences, stored as an index arena so the
/// runtime can hold plain `usize` cursors into an immutable structure.
#[derive(Debug, Clone)]
pub struct TokenTrie {
    nodes: Vec<TrieNode>,
}

/// Index of the root node.
pub const ROOT: usize = 0;

impl TokenTrie {
    /// Create a trie containing only the root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
        }
    }

    /// Insert one token sequence, marking its last node terminal.
    pub fn insert(&mut self, sequence: &[u32]) {
        let mut node = ROOT;
        for &token in sequence {
            node = match self.nodes[node].children.get(&token) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(token, child);
                    child
                }
            };
        }
        self.nodes[node].terminal = true;
    }

    /// Child of `node` along `token`, if present.
    #[must_use]
    pub fn child(&self, node: usize, token: u32) -> Option<usize> {
        self.nodes[node].children.get(&token).copied()
    }

    /// Outgoing edge labels of `node`.
    pub fn edges(&self, node: usize) -> impl Iterator<Item = u32> + '_ {
        self.nodes[node].children.keys().copied()
    }

    /// Whether `node` ends an inserted sequence.
    #[must_use]
    pub fn is_terminal(&self, node: usize) -> bool {
        self.nodes[node].terminal
    }

    /// Whether `node` has no outgoing edges.
    #[must_use]
    pub fn is_leaf(&self, node: usize) -> bool {
        self.nodes[node].children.is_empty()
    }
}

impl Default for TokenTrie {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_prefixes_share_nodes() {
        let mut trie = TokenTrie::new();
        trie.insert(&[1, 2, 3]);
        trie.insert(&[1, 2, 4]);

        let a = trie.child(ROOT, 1).unwrap();
        let b = trie.child(a, 2).unwrap();
        let edges: Vec<u32> = {
            let mut e: Vec<u32> = trie.edges(b).collect();
            e.sort_unstable();
            e
        };
        assert_eq!(edges, vec![3, 4]);
        assert!(trie.is_terminal(trie.child(b, 3).unwrap()));
        assert!(!trie.is_terminal(b));
    }

    #[test]
    fn terminal_mid_path_marks_prefix_sequence() {
        let mut trie = TokenTrie::new();
        trie.insert(&[1]);
        trie.insert(&[1, 2]);
        let a = trie.child(ROOT, 1).unwrap();
        assert!(trie.is_terminal(a));
        assert!(!trie.is_leaf(a));
    }
}
