//! Segmentation lattice.
//!
//! A per-sentence DAG of candidate pieces over unicode positions, with the
//! four queries unigram segmentation needs: Viterbi best path, A* n-best
//! enumeration, temperature sampling, and forward-backward marginals.
//!
//! Nodes live in an index-addressed arena owned by the lattice; every
//! cross-reference (`prev`, adjacency lists, hypothesis chains) is an index
//! into that arena, and [`Lattice::set_sentence`] resets the arena without
//! releasing its capacity so one lattice can be reused across a corpus.

use rand::{Rng, RngCore};
use std::collections::BinaryHeap;

use crate::error::{Error, Result};

/// Nodes preallocated per lattice.
const PREALLOCATED_NODES: usize = 1024;

/// A* agenda bounds: above `MAX_AGENDA_SIZE` entries the agenda is cut back
/// to the best `min(MIN_AGENDA_SIZE, 10 * nbest_size)` hypotheses.
const MAX_AGENDA_SIZE: usize = 100_000;
const MIN_AGENDA_SIZE: usize = 512;

/// One candidate piece occurrence.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unicode position in the sentence
    pub pos: u32,
    /// Unicode length (0 for the sentinels)
    pub length: u32,
    /// Byte span of the piece within the sentence
    pub byte_begin: u32,
    pub byte_end: u32,
    /// Dense creation-order id, usable as an index into side arrays
    pub node_id: u32,
    /// Vocabulary id, -1 for BOS/EOS and training-time unknowns
    pub id: i32,
    /// Log probability of the piece
    pub score: f32,
    /// Best score from BOS to this node, filled by Viterbi
    pub backtrace_score: f32,
    /// Best predecessor, filled by Viterbi
    pub prev: Option<u32>,
}

/// Search space over one sentence.
#[derive(Debug)]
pub struct Lattice {
    sentence: String,
    /// Byte offset of each unicode position; the last entry is the total
    /// byte length sentinel
    surface: Vec<usize>,
    nodes: Vec<Node>,
    begin_nodes: Vec<Vec<u32>>,
    end_nodes: Vec<Vec<u32>>,
}

/// `log(exp(x) + exp(y))`; with `init` the accumulator `x` is ignored so a
/// running reduction can start from the first operand. Differences beyond
/// 50 collapse to the larger value to keep `exp` in range.
pub(crate) fn log_sum_exp(x: f64, y: f64, init: bool) -> f64 {
    if init {
        return y;
    }
    let (vmin, vmax) = if x < y { (x, y) } else { (y, x) };
    const MINUS_LOG_EPSILON: f64 = 50.0;
    if vmax > vmin + MINUS_LOG_EPSILON {
        vmax
    } else {
        vmax + ((vmin - vmax).exp() + 1.0).ln()
    }
}

impl Default for Lattice {
    fn default() -> Self {
        Self::new()
    }
}

impl Lattice {
    pub fn new() -> Self {
        Lattice {
            sentence: String::new(),
            surface: Vec::new(),
            nodes: Vec::with_capacity(PREALLOCATED_NODES),
            begin_nodes: Vec::new(),
            end_nodes: Vec::new(),
        }
    }

    /// Unicode length of the sentence.
    pub fn size(&self) -> usize {
        self.surface.len().saturating_sub(1)
    }

    /// Byte length of the sentence.
    pub fn utf8_size(&self) -> usize {
        self.sentence.len()
    }

    pub fn sentence(&self) -> &str {
        &self.sentence
    }

    /// Suffix of the sentence starting at unicode position `pos`.
    pub fn surface(&self, pos: usize) -> &str {
        &self.sentence[self.surface[pos]..]
    }

    /// Byte offset of unicode position `pos`.
    pub fn surface_offset(&self, pos: usize) -> usize {
        self.surface[pos]
    }

    pub fn bos_node(&self) -> u32 {
        self.end_nodes[0][0]
    }

    pub fn eos_node(&self) -> u32 {
        self.begin_nodes[self.size()][0]
    }

    pub fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: u32) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    /// Piece text of a node.
    pub fn piece(&self, id: u32) -> &str {
        let node = &self.nodes[id as usize];
        &self.sentence[node.byte_begin as usize..node.byte_end as usize]
    }

    pub fn begin_nodes(&self, pos: usize) -> &[u32] {
        &self.begin_nodes[pos]
    }

    pub fn end_nodes(&self, pos: usize) -> &[u32] {
        &self.end_nodes[pos]
    }

    /// Resets the lattice for reuse; arena and adjacency list capacity is
    /// retained.
    pub fn clear(&mut self) {
        self.sentence.clear();
        self.surface.clear();
        self.nodes.clear();
        for list in &mut self.begin_nodes {
            list.clear();
        }
        for list in &mut self.end_nodes {
            list.clear();
        }
    }

    /// Installs a new sentence, resetting the arena and inserting the BOS
    /// and EOS sentinels.
    pub fn set_sentence(&mut self, sentence: &str) {
        self.clear();
        self.sentence.push_str(sentence);
        for (offset, _) in sentence.char_indices() {
            self.surface.push(offset);
        }
        self.surface.push(sentence.len());

        let len = self.size();
        if self.begin_nodes.len() < len + 1 {
            self.begin_nodes.resize_with(len + 1, Vec::new);
            self.end_nodes.resize_with(len + 1, Vec::new);
        }

        let bos = self.new_node();
        self.nodes[bos as usize].pos = 0;
        self.end_nodes[0].push(bos);

        let eos = self.new_node();
        self.nodes[eos as usize].pos = len as u32;
        self.begin_nodes[len].push(eos);
    }

    /// Inserts a node spanning unicode `[pos, pos + length)` and registers
    /// it in the adjacency lists. The caller must set `id` and `score`.
    pub fn insert(&mut self, pos: usize, length: usize) -> u32 {
        let id = self.new_node();
        let byte_begin = self.surface[pos];
        let byte_end = self.surface[pos + length];
        {
            let node = &mut self.nodes[id as usize];
            node.pos = pos as u32;
            node.length = length as u32;
            node.byte_begin = byte_begin as u32;
            node.byte_end = byte_end as u32;
        }
        self.begin_nodes[pos].push(id);
        self.end_nodes[pos + length].push(id);
        id
    }

    fn new_node(&mut self) -> u32 {
        let node_id = self.nodes.len() as u32;
        self.nodes.push(Node {
            pos: 0,
            length: 0,
            byte_begin: 0,
            byte_end: 0,
            node_id,
            id: -1,
            score: 0.0,
            backtrace_score: 0.0,
            prev: None,
        });
        node_id
    }

    /// Left-to-right best-path search. All candidate nodes must be
    /// populated beforehand. Ties keep the first predecessor encountered.
    pub fn viterbi(&mut self) -> Result<Vec<u32>> {
        let len = self.size();
        for pos in 0..=len {
            for i in 0..self.begin_nodes[pos].len() {
                let rnode = self.begin_nodes[pos][i];
                self.nodes[rnode as usize].prev = None;
                let rscore = self.nodes[rnode as usize].score;
                let mut best_score = 0.0f32;
                let mut best_node: Option<u32> = None;
                for j in 0..self.end_nodes[pos].len() {
                    let lnode = self.end_nodes[pos][j];
                    let score = self.nodes[lnode as usize].backtrace_score + rscore;
                    if best_node.is_none() || score > best_score {
                        best_node = Some(lnode);
                        best_score = score;
                    }
                }
                let Some(best) = best_node else {
                    return Err(Error::internal(format!(
                        "failed to find the best path in viterbi: {}",
                        self.sentence
                    )));
                };
                let node = &mut self.nodes[rnode as usize];
                node.prev = Some(best);
                node.backtrace_score = best_score;
            }
        }

        let mut results = Vec::new();
        let eos = self.begin_nodes[len][0];
        let mut cursor = self.nodes[eos as usize].prev;
        while let Some(id) = cursor {
            let node = &self.nodes[id as usize];
            if node.prev.is_none() {
                break; // reached BOS
            }
            results.push(id);
            cursor = node.prev;
        }
        results.reverse();
        Ok(results)
    }

    /// A* enumeration of the `nbest_size` best paths, searching backwards
    /// from EOS with the Viterbi forward score as the exact heuristic.
    pub fn nbest(&mut self, nbest_size: usize) -> Result<Vec<Vec<u32>>> {
        if nbest_size == 0 {
            return Ok(Vec::new());
        }
        if nbest_size == 1 {
            return Ok(vec![self.viterbi()?]);
        }

        // fills backtrace_score, which serves as h(x)
        self.viterbi()?;

        #[derive(Clone, Copy)]
        struct Hypothesis {
            node: u32,
            next: Option<u32>,
            fx: f32,
            gx: f32,
        }

        struct Entry {
            fx: f32,
            hyp: u32,
        }
        impl PartialEq for Entry {
            fn eq(&self, other: &Self) -> bool {
                self.cmp(other) == std::cmp::Ordering::Equal
            }
        }
        impl Eq for Entry {}
        impl PartialOrd for Entry {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for Entry {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.fx
                    .total_cmp(&other.fx)
                    .then_with(|| other.hyp.cmp(&self.hyp))
            }
        }

        let bos = self.bos_node();
        let eos = self.eos_node();

        let mut hypotheses: Vec<Hypothesis> = Vec::with_capacity(MIN_AGENDA_SIZE);
        let mut agenda: BinaryHeap<Entry> = BinaryHeap::new();
        let mut results: Vec<Vec<u32>> = Vec::new();

        let eos_score = self.nodes[eos as usize].score;
        hypotheses.push(Hypothesis {
            node: eos,
            next: None,
            fx: eos_score,
            gx: eos_score,
        });
        agenda.push(Entry { fx: eos_score, hyp: 0 });

        while let Some(top) = agenda.pop() {
            let hyp = hypotheses[top.hyp as usize];

            if hyp.node == bos {
                let mut path = Vec::new();
                let mut cursor = hyp.next;
                while let Some(h) = cursor {
                    let next_hyp = hypotheses[h as usize];
                    if next_hyp.next.is_none() {
                        break; // EOS hypothesis
                    }
                    path.push(next_hyp.node);
                    cursor = next_hyp.next;
                }
                results.push(path);
                if results.len() == nbest_size {
                    break;
                }
                continue;
            }

            let pos = self.nodes[hyp.node as usize].pos as usize;
            for j in 0..self.end_nodes[pos].len() {
                let lnode = self.end_nodes[pos][j];
                let lhs = &self.nodes[lnode as usize];
                let candidate = Hypothesis {
                    node: lnode,
                    next: Some(top.hyp),
                    gx: lhs.score + hyp.gx,
                    fx: lhs.backtrace_score + hyp.gx,
                };
                let id = hypotheses.len() as u32;
                hypotheses.push(candidate);
                agenda.push(Entry {
                    fx: candidate.fx,
                    hyp: id,
                });
            }

            // Long or repetitive inputs can blow the agenda up; keep only
            // the best hypotheses when it does.
            if agenda.len() >= MAX_AGENDA_SIZE {
                let keep = MIN_AGENDA_SIZE.min(nbest_size * 10);
                let mut kept = Vec::with_capacity(keep);
                for _ in 0..keep {
                    if let Some(entry) = agenda.pop() {
                        kept.push(entry);
                    }
                }
                agenda = BinaryHeap::from(kept);
            }
        }

        Ok(results)
    }

    /// Samples one path in proportion to `exp(θ · path score)`.
    pub fn sample(&mut self, theta: f32, rng: &mut dyn RngCore) -> Vec<u32> {
        let len = self.size();
        if len == 0 {
            return Vec::new();
        }

        let mut alpha = vec![0.0f64; self.nodes.len()];
        for pos in 0..=len {
            for i in 0..self.begin_nodes[pos].len() {
                let rnode = self.begin_nodes[pos][i] as usize;
                for j in 0..self.end_nodes[pos].len() {
                    let lnode = self.end_nodes[pos][j] as usize;
                    alpha[rnode] = log_sum_exp(
                        alpha[rnode],
                        f64::from(theta) * f64::from(self.nodes[lnode].score) + alpha[lnode],
                        j == 0,
                    );
                }
            }
        }

        let bos = self.bos_node();
        let eos = self.eos_node();
        let mut results = Vec::new();
        let mut probs: Vec<f64> = Vec::new();
        let mut z = alpha[eos as usize];
        let mut node = eos;
        loop {
            let pos = self.nodes[node as usize].pos as usize;
            probs.clear();
            for &lnode in &self.end_nodes[pos] {
                let score = f64::from(theta) * f64::from(self.nodes[lnode as usize].score);
                probs.push((alpha[lnode as usize] + score - z).exp());
            }
            let total: f64 = probs.iter().sum();
            let mut draw = rng.gen::<f64>() * total;
            let mut chosen = self.end_nodes[pos].len() - 1;
            for (k, &p) in probs.iter().enumerate() {
                draw -= p;
                if draw <= 0.0 {
                    chosen = k;
                    break;
                }
            }
            node = self.end_nodes[pos][chosen];
            if node == bos {
                break;
            }
            z = alpha[node as usize];
            results.push(node);
        }

        results.reverse();
        results
    }

    /// Forward-backward pass. Adds `freq` times each node's marginal
    /// probability into `expected` at the node's vocabulary id, and returns
    /// `freq` times the sentence log likelihood.
    pub fn populate_marginal(&self, freq: f64, expected: &mut [f64]) -> f64 {
        let len = self.size();
        let n = self.nodes.len();
        let mut alpha = vec![0.0f64; n];
        let mut beta = vec![0.0f64; n];

        for pos in 0..=len {
            for &rnode in &self.begin_nodes[pos] {
                for (j, &lnode) in self.end_nodes[pos].iter().enumerate() {
                    alpha[rnode as usize] = log_sum_exp(
                        alpha[rnode as usize],
                        f64::from(self.nodes[lnode as usize].score) + alpha[lnode as usize],
                        j == 0,
                    );
                }
            }
        }
        for pos in (0..=len).rev() {
            for &lnode in &self.end_nodes[pos] {
                for (j, &rnode) in self.begin_nodes[pos].iter().enumerate() {
                    beta[lnode as usize] = log_sum_exp(
                        beta[lnode as usize],
                        f64::from(self.nodes[rnode as usize].score) + beta[rnode as usize],
                        j == 0,
                    );
                }
            }
        }

        let z = alpha[self.begin_nodes[len][0] as usize];
        for pos in 0..len {
            for &node_id in &self.begin_nodes[pos] {
                let node = &self.nodes[node_id as usize];
                if node.id >= 0 {
                    let idx = node.id as usize;
                    expected[idx] += freq
                        * (alpha[node_id as usize] + f64::from(node.score) + beta[node_id as usize]
                            - z)
                            .exp();
                }
            }
        }

        freq * z
    }
}
