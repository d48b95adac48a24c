//! Molecular graph

use crate::element;

/// Bond multiplicity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Quadruple,
    Aromatic,
}

impl BondOrder {
    /// Valence contribution, counting aromatic bonds as one
    pub fn valence(self) -> u8 {
        match self {
            BondOrder::Single | BondOrder::Aromatic => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
        }
    }

    /// Small integer code used in hashes and canonical invariants
    pub fn code(self) -> u8 {
        match self {
            BondOrder::Single => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
            BondOrder::Quadruple => 4,
            BondOrder::Aromatic => 5,
        }
    }
}

/// Tetrahedral parity, as `@` / `@@` would read it when the neighbors are
/// listed in incidence order followed by the implicit hydrogen (or lone pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chirality {
    /// `@`
    Anticlockwise,
    /// `@@`
    Clockwise,
}

impl Chirality {
    pub fn inverted(self) -> Self {
        match self {
            Chirality::Anticlockwise => Chirality::Clockwise,
            Chirality::Clockwise => Chirality::Anticlockwise,
        }
    }

    /// Same parity under an odd permutation of the neighbor list is the inverse
    pub fn permuted(self, odd: bool) -> Self {
        if odd { self.inverted() } else { self }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Chirality::Anticlockwise => "@",
            Chirality::Clockwise => "@@",
        }
    }
}

/// Double-bond configuration relative to one reference neighbor per end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CisTrans {
    /// Neighbor of `Bond::a`
    pub a_neighbor: usize,
    /// Neighbor of `Bond::b`
    pub b_neighbor: usize,
    /// Reference neighbors on the same side
    pub cis: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub atomic_number: u8,
    pub isotope: Option<u16>,
    pub charge: i8,
    /// Total attached hydrogens (implicit and bracket)
    pub hydrogens: u8,
    pub aromatic: bool,
    /// Written in brackets in the source
    pub bracket: bool,
    pub chirality: Option<Chirality>,
}

impl Atom {
    pub fn new(atomic_number: u8) -> Self {
        Self {
            atomic_number,
            isotope: None,
            charge: 0,
            hydrogens: 0,
            aromatic: false,
            bracket: false,
            chirality: None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        element::symbol(self.atomic_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
    /// Only meaningful on double bonds
    pub stereo: Option<CisTrans>,
}

impl Bond {
    /// The endpoint that is not `atom`
    pub fn other(&self, atom: usize) -> usize {
        if self.a == atom {
            self.b
        } else {
            self.a
        }
    }
}

/// Atoms, bonds and per-atom incidence lists
#[derive(Debug, Clone, Default)]
pub struct Molecule {
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
    /// Bond indices incident to each atom, in insertion order
    adjacency: Vec<Vec<usize>>,
}

impl Molecule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.adjacency.push(Vec::new());
        self.atoms.len() - 1
    }

    pub fn add_bond(&mut self, a: usize, b: usize, order: BondOrder) -> usize {
        let idx = self.bonds.len();
        self.bonds.push(Bond {
            a,
            b,
            order,
            stereo: None,
        });
        self.adjacency[a].push(idx);
        self.adjacency[b].push(idx);
        idx
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Incident bond indices
    pub fn bonds_of(&self, atom: usize) -> &[usize] {
        &self.adjacency[atom]
    }

    /// `(neighbor, bond index)` pairs
    pub fn neighbors(&self, atom: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.adjacency[atom]
            .iter()
            .map(move |&b| (self.bonds[b].other(atom), b))
    }

    pub fn bond_between(&self, a: usize, b: usize) -> Option<usize> {
        self.adjacency[a]
            .iter()
            .copied()
            .find(|&i| self.bonds[i].other(a) == b)
    }

    /// Heavy-atom degree
    pub fn degree(&self, atom: usize) -> usize {
        self.adjacency[atom].len()
    }

    /// Sum of bond valences, aromatic bonds counting one
    pub fn bond_valence(&self, atom: usize) -> u8 {
        self.adjacency[atom]
            .iter()
            .map(|&b| self.bonds[b].order.valence())
            .sum()
    }

    /// Flags bonds that lie on at least one cycle (non-bridges)
    pub fn ring_bonds(&self) -> Vec<bool> {
        let n = self.atoms.len();
        let mut disc = vec![usize::MAX; n];
        let mut low = vec![0usize; n];
        let mut is_ring = vec![true; self.bonds.len()];
        let mut timer = 0;

        // Iterative DFS: (atom, parent bond, next adjacency position)
        for root in 0..n {
            if disc[root] != usize::MAX {
                continue;
            }
            let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(root, None, 0)];
            disc[root] = timer;
            low[root] = timer;
            timer += 1;

            while let Some(&mut (v, parent, ref mut pos)) = stack.last_mut() {
                if *pos < self.adjacency[v].len() {
                    let b = self.adjacency[v][*pos];
                    *pos += 1;
                    if Some(b) == parent {
                        continue;
                    }
                    let w = self.bonds[b].other(v);
                    if disc[w] == usize::MAX {
                        disc[w] = timer;
                        low[w] = timer;
                        timer += 1;
                        stack.push((w, Some(b), 0));
                    } else {
                        low[v] = low[v].min(disc[w]);
                    }
                } else {
                    stack.pop();
                    if let (Some(b), Some(&(u, _, _))) = (parent, stack.last()) {
                        low[u] = low[u].min(low[v]);
                        if low[v] > disc[u] {
                            is_ring[b] = false;
                        }
                    }
                }
            }
        }
        is_ring
    }

    /// Atoms touching at least one ring bond
    pub fn ring_atoms(&self) -> Vec<bool> {
        let ring_bonds = self.ring_bonds();
        (0..self.atoms.len())
            .map(|a| self.adjacency[a].iter().any(|&b| ring_bonds[b]))
            .collect()
    }

    /// Connected components as sorted atom lists
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.atoms.len()];
        let mut out = Vec::new();
        for start in 0..self.atoms.len() {
            if seen[start] {
                continue;
            }
            let mut comp = Vec::new();
            let mut stack = vec![start];
            seen[start] = true;
            while let Some(v) = stack.pop() {
                comp.push(v);
                for (w, _) in self.neighbors(v) {
                    if !seen[w] {
                        seen[w] = true;
                        stack.push(w);
                    }
                }
            }
            comp.sort_unstable();
            out.push(comp);
        }
        out
    }

    /// Simple cycles of length `3..=max_len`, each as an ordered atom ring
    pub fn cycles(&self, max_len: usize) -> Vec<Vec<usize>> {
        let ring_bonds = self.ring_bonds();
        let mut out = Vec::new();
        let mut path = Vec::new();
        let mut on_path = vec![false; self.atoms.len()];

        for start in 0..self.atoms.len() {
            path.push(start);
            on_path[start] = true;
            self.extend_cycles(start, start, max_len, &ring_bonds, &mut path, &mut on_path, &mut out);
            on_path[start] = false;
            path.pop();
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn extend_cycles(
        &self,
        start: usize,
        v: usize,
        max_len: usize,
        ring_bonds: &[bool],
        path: &mut Vec<usize>,
        on_path: &mut [bool],
        out: &mut Vec<Vec<usize>>,
    ) {
        for (w, b) in self.neighbors(v) {
            if !ring_bonds[b] {
                continue;
            }
            if w == start && path.len() >= 3 {
                // Each cycle is found in both directions; keep one
                if path[1] < path[path.len() - 1] {
                    out.push(path.clone());
                }
            } else if w > start && !on_path[w] && path.len() < max_len {
                path.push(w);
                on_path[w] = true;
                self.extend_cycles(start, w, max_len, ring_bonds, path, on_path, out);
                on_path[w] = false;
                path.pop();
            }
        }
    }
}
