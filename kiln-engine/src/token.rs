//! Flat token graph: candidates with parent links and atomic use counters.
//!
//! Every candidate token records two parents: the `left` parent is the
//! candidate minus its final code point, the `right` parent is the candidate
//! minus its first code point. Single-code-point candidates (roots) have no
//! parents and are permanently enabled. Use counters start at the candidate's
//! occurrence count and are decremented whenever a longer enabled descendant
//! routes occurrences through them.
//!
//! Scoring follows the left chain only; the right chain is still maintained
//! on every apply step so its accounting stays correct.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::lock;

/// Log2 of the shared mutex pool size. Tokens map onto slots by index, so
/// arbitrary graph walks stay safe without a mutex per token.
const MUTEX_LOG_COUNT: u32 = 20;

/// Which parent chain to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug)]
struct Branch {
    parent: Option<u32>,
    uses: AtomicU64,
}

impl Branch {
    fn new(uses: u64) -> Self {
        Self {
            parent: None,
            uses: AtomicU64::new(uses),
        }
    }
}

/// One candidate token. Created by trie flattening or cache loading, then
/// mutated only by the selector.
#[derive(Debug)]
pub struct Token {
    chr: char,
    left: Branch,
    right: Branch,
    enabled: AtomicBool,
}

impl Token {
    pub(crate) fn new(chr: char, uses: u64) -> Self {
        Self {
            chr,
            left: Branch::new(uses),
            right: Branch::new(uses),
            enabled: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_parents(&mut self, left: Option<u32>, right: Option<u32>) {
        self.left.parent = left;
        self.right.parent = right;
    }

    /// Final code point of this token's string.
    pub fn chr(&self) -> char {
        self.chr
    }

    /// Token minus its final code point, `None` for roots.
    pub fn left_parent(&self) -> Option<u32> {
        self.left.parent
    }

    /// Token minus its first code point, `None` for roots.
    pub fn right_parent(&self) -> Option<u32> {
        self.right.parent
    }

    pub fn left_uses(&self) -> u64 {
        self.left.uses.load(Ordering::Relaxed)
    }

    pub fn right_uses(&self) -> u64 {
        self.right.uses.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_root(&self) -> bool {
        self.left.parent.is_none()
    }

    fn branch(&self, side: Side) -> &Branch {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

struct MutexPool {
    slots: Vec<Mutex<()>>,
    mask: usize,
}

impl MutexPool {
    fn new(token_count: usize) -> Self {
        let size = token_count
            .next_power_of_two()
            .clamp(1, 1 << MUTEX_LOG_COUNT);
        Self {
            slots: (0..size).map(|_| Mutex::new(())).collect(),
            mask: size - 1,
        }
    }

    fn lock(&self, index: u32) -> MutexGuard<'_, ()> {
        lock(&self.slots[index as usize & self.mask])
    }
}

/// The token array plus its lock pool. Indices are stable for the lifetime
/// of the graph; nothing is ever moved or deleted.
pub struct TokenGraph {
    tokens: Vec<Token>,
    locks: MutexPool,
}

impl TokenGraph {
    /// Wrap a flat token array. Roots are enabled here and stay enabled.
    pub fn new(tokens: Vec<Token>) -> Self {
        for token in &tokens {
            if token.is_root() {
                token.enabled.store(true, Ordering::Release);
            }
        }
        let locks = MutexPool::new(tokens.len());
        Self { tokens, locks }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: u32) -> &Token {
        &self.tokens[index as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    /// Reconstruct the token's string by collecting final code points along
    /// the left-parent chain.
    pub fn name(&self, index: u32) -> String {
        let mut chrs = Vec::new();
        let mut cur = Some(index);
        while let Some(i) = cur {
            let token = &self.tokens[i as usize];
            chrs.push(token.chr);
            cur = token.left.parent;
        }
        chrs.into_iter().rev().collect()
    }

    /// Length of the token's string in code points.
    pub fn token_len(&self, index: u32) -> usize {
        let mut len = 1;
        let mut cur = self.tokens[index as usize].left.parent;
        while let Some(i) = cur {
            len += 1;
            cur = self.tokens[i as usize].left.parent;
        }
        len
    }

    /// Utility delta of toggling `index`, without mutating anything: the
    /// number of left-parent hops to the nearest enabled ancestor times the
    /// occurrences routed through that chain. Reads may be stale under
    /// concurrency; the selector tolerates that.
    pub fn simulate(&self, index: u32) -> u64 {
        self.simulate_branch(index, Side::Left)
    }

    /// Chain-walk utility for one side.
    pub fn simulate_branch(&self, index: u32, side: Side) -> u64 {
        let branch = self.tokens[index as usize].branch(side);
        let mut delta_len: u64 = 1;
        let mut cur = branch.parent;
        while let Some(i) = cur {
            let node = &self.tokens[i as usize];
            if node.enabled.load(Ordering::Acquire) {
                break;
            }
            delta_len += 1;
            cur = node.branch(side).parent;
        }
        delta_len * branch.uses.load(Ordering::Relaxed)
    }

    /// Toggle `index` and propagate the use-count adjustment up both parent
    /// chains, holding each visited node's mutex in walk order. Returns the
    /// left-chain delta (`hops * saved_uses`), the quantity that feeds
    /// `raw_score`.
    pub fn apply(&self, index: u32, enable: bool) -> u64 {
        let (saved_left, saved_right) = {
            let _guard = self.locks.lock(index);
            let token = &self.tokens[index as usize];
            token.enabled.store(enable, Ordering::Release);
            (
                token.left.uses.load(Ordering::Relaxed),
                token.right.uses.load(Ordering::Relaxed),
            )
        };
        let delta = self.apply_branch(index, Side::Left, enable, saved_left);
        self.apply_branch(index, Side::Right, enable, saved_right);
        delta
    }

    fn apply_branch(&self, index: u32, side: Side, enable: bool, saved_uses: u64) -> u64 {
        let mut delta_len: u64 = 1;
        let mut cur = self.tokens[index as usize].branch(side).parent;
        while let Some(i) = cur {
            let _guard = self.locks.lock(i);
            let node = &self.tokens[i as usize];
            let branch = node.branch(side);
            if enable {
                branch.uses.fetch_sub(saved_uses, Ordering::AcqRel);
            } else {
                branch.uses.fetch_add(saved_uses, Ordering::AcqRel);
            }
            if node.enabled.load(Ordering::Acquire) {
                break;
            }
            delta_len += 1;
            cur = branch.parent;
        }
        delta_len * saved_uses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::Trie;

    fn sweep_graph(texts: &[&str], max_len: usize) -> TokenGraph {
        let mut trie = Trie::new();
        for text in texts {
            let cps: Vec<char> = text.chars().collect();
            for i in 0..cps.len() {
                let end = i.saturating_add(max_len).min(cps.len());
                trie.add_str(&cps[i..end]);
            }
        }
        TokenGraph::new(trie.build_tokens())
    }

    fn index_of(graph: &TokenGraph, name: &str) -> u32 {
        (0..graph.len() as u32)
            .find(|&i| graph.name(i) == name)
            .unwrap_or_else(|| panic!("token {name:?} not in graph"))
    }

    #[test]
    fn names_and_lengths() {
        let graph = sweep_graph(&["abc"], 3);
        let abc = index_of(&graph, "abc");
        assert_eq!(graph.token_len(abc), 3);
        assert_eq!(graph.get(abc).chr(), 'c');
        assert_eq!(graph.token_len(index_of(&graph, "b")), 1);
    }

    #[test]
    fn roots_start_enabled() {
        let graph = sweep_graph(&["ab"], 2);
        for i in 0..graph.len() as u32 {
            let token = graph.get(i);
            assert_eq!(token.is_enabled(), token.is_root());
        }
    }

    #[test]
    fn simulate_counts_hops_to_enabled_ancestor() {
        let graph = sweep_graph(&["abc"], 3);
        let abc = index_of(&graph, "abc");
        // Only roots enabled: abc -> ab -> a, two hops plus itself.
        assert_eq!(graph.simulate(abc), 3 * graph.get(abc).left_uses());
        // Enabling ab shortens the chain to one hop.
        graph.apply(index_of(&graph, "ab"), true);
        assert_eq!(graph.simulate(abc), graph.get(abc).left_uses());
    }

    #[test]
    fn apply_adjusts_uses_up_both_chains() {
        let graph = sweep_graph(&["abc"], 3);
        let abc = index_of(&graph, "abc");
        let (ab, bc) = (index_of(&graph, "ab"), index_of(&graph, "bc"));
        let (a, c) = (index_of(&graph, "a"), index_of(&graph, "c"));
        let before_ab = graph.get(ab).left_uses();
        let before_bc = graph.get(bc).right_uses();
        let before_a = graph.get(a).left_uses();
        let before_c = graph.get(c).right_uses();

        let uses = graph.get(abc).left_uses();
        let delta = graph.apply(abc, true);
        assert_eq!(delta, 2 * uses); // ab then a, both hops scored
        assert_eq!(graph.get(ab).left_uses(), before_ab - uses);
        assert_eq!(graph.get(a).left_uses(), before_a - uses);
        assert_eq!(graph.get(bc).right_uses(), before_bc - uses);
        assert_eq!(graph.get(c).right_uses(), before_c - uses);

        // Disabling restores every counter.
        let undo = graph.apply(abc, false);
        assert_eq!(undo, delta);
        assert_eq!(graph.get(ab).left_uses(), before_ab);
        assert_eq!(graph.get(a).left_uses(), before_a);
        assert_eq!(graph.get(bc).right_uses(), before_bc);
        assert_eq!(graph.get(c).right_uses(), before_c);
    }

    #[test]
    fn apply_stops_at_first_enabled_ancestor() {
        let graph = sweep_graph(&["abcd"], 4);
        let ab = index_of(&graph, "ab");
        let abcd = index_of(&graph, "abcd");
        let a = index_of(&graph, "a");
        graph.apply(ab, true);
        let a_before = graph.get(a).left_uses();
        let uses = graph.get(abcd).left_uses();
        let delta = graph.apply(abcd, true);
        // Chain abcd -> abc -> ab stops at the enabled ab: two scored hops.
        assert_eq!(delta, 2 * uses);
        // The root behind ab is untouched on the left side.
        assert_eq!(graph.get(a).left_uses(), a_before);
    }

    #[test]
    fn routed_uses_conserve_initial_counts() {
        let graph = sweep_graph(&["abcabc"], 3);
        let initial: Vec<u64> = (0..graph.len() as u32)
            .map(|i| graph.get(i).left_uses())
            .collect();
        for name in ["abc", "ab"] {
            graph.apply(index_of(&graph, name), true);
        }
        // Routed uses of an enabled candidate: its own current uses plus the
        // routed uses of enabled candidates whose chains terminate at it.
        let routed = |index: u32| -> u64 {
            fn go(graph: &TokenGraph, index: u32) -> u64 {
                let mut total = graph.get(index).left_uses();
                for c in 0..graph.len() as u32 {
                    let token = graph.get(c);
                    if c == index || !token.is_enabled() || token.is_root() {
                        continue;
                    }
                    // Find c's first enabled ancestor on the left chain.
                    let mut cur = token.left_parent();
                    while let Some(i) = cur {
                        if graph.get(i).is_enabled() {
                            break;
                        }
                        cur = graph.get(i).left_parent();
                    }
                    if cur == Some(index) {
                        total += go(graph, c);
                    }
                }
                total
            }
            go(&graph, index)
        };
        for u in 0..graph.len() as u32 {
            let mut expect = graph.get(u).left_uses();
            for c in 0..graph.len() as u32 {
                let token = graph.get(c);
                if c == u || !token.is_enabled() || token.is_root() {
                    continue;
                }
                // Does u sit on c's truncated left chain?
                let mut cur = token.left_parent();
                let mut crosses = false;
                while let Some(i) = cur {
                    if i == u {
                        crosses = true;
                    }
                    if graph.get(i).is_enabled() {
                        break;
                    }
                    cur = graph.get(i).left_parent();
                }
                if crosses {
                    expect += routed(c);
                }
            }
            assert_eq!(expect, initial[u as usize], "token {}", graph.name(u));
        }
    }
}
