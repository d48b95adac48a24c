//! Bit fingerprints and Tanimoto similarity
//!
//! Three fingerprint families are provided:
//! - [`morgan`]: circular environments (radius 2, 2048 bits)
//! - [`path`]: linear paths of 1..=7 bonds (2048 bits)
//! - [`structural_keys`]: a fixed dictionary of substructure keys

use std::collections::HashSet;

use xxhash_rust::xxh64::xxh64;

use crate::element;
use crate::mol::{BondOrder, Molecule};

pub const MORGAN_RADIUS: usize = 2;
pub const MORGAN_BITS: usize = 2048;
pub const PATH_MAX_BONDS: usize = 7;
pub const PATH_BITS: usize = 2048;
/// Upper bound on enumerated paths per molecule
const MAX_PATHS: usize = 200_000;
const SEED: u64 = 0x1d_a7a5;

/// Fixed-length bit vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    words: Vec<u64>,
    nbits: usize,
}

impl Fingerprint {
    pub fn new(nbits: usize) -> Self {
        Self {
            words: vec![0; nbits.div_ceil(64)],
            nbits,
        }
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    pub fn set(&mut self, bit: usize) {
        let bit = bit % self.nbits;
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    pub fn get(&self, bit: usize) -> bool {
        bit < self.nbits && self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// `|a ∩ b| / |a ∪ b|`; two empty fingerprints are identical (1.0)
    pub fn tanimoto(&self, other: &Fingerprint) -> f64 {
        let (mut both, mut either) = (0u32, 0u32);
        for (a, b) in self.words.iter().zip(&other.words) {
            both += (a & b).count_ones();
            either += (a | b).count_ones();
        }
        if either == 0 {
            1.0
        } else {
            both as f64 / either as f64
        }
    }
}

fn hash_words(words: &[u64]) -> u64 {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    xxh64(&bytes, SEED)
}

/// Circular (ECFP-like) fingerprint
pub fn morgan(mol: &Molecule, radius: usize, nbits: usize) -> Fingerprint {
    let ring_atoms = mol.ring_atoms();
    let mut ids: Vec<u64> = (0..mol.num_atoms())
        .map(|a| {
            let atom = &mol.atoms[a];
            hash_words(&[
                atom.atomic_number as u64,
                mol.degree(a) as u64,
                atom.hydrogens as u64,
                atom.charge as i64 as u64,
                atom.isotope.unwrap_or(0) as u64,
                ring_atoms[a] as u64,
            ])
        })
        .collect();

    let mut fp = Fingerprint::new(nbits);
    for &id in &ids {
        fp.set((id % nbits as u64) as usize);
    }
    for iteration in 1..=radius {
        ids = (0..mol.num_atoms())
            .map(|a| {
                let mut env: Vec<(u64, u64)> = mol
                    .neighbors(a)
                    .map(|(nbr, b)| (mol.bonds[b].order.code() as u64, ids[nbr]))
                    .collect();
                env.sort_unstable();
                let mut words = vec![iteration as u64, ids[a]];
                words.extend(env.into_iter().flat_map(|(b, id)| [b, id]));
                hash_words(&words)
            })
            .collect();
        for &id in &ids {
            fp.set((id % nbits as u64) as usize);
        }
    }
    fp
}

fn atom_label(mol: &Molecule, atom: usize) -> u64 {
    let a = &mol.atoms[atom];
    ((a.atomic_number as u64) << 1) | a.aromatic as u64
}

/// Linear-path (RDKit topological style) fingerprint
pub fn path(mol: &Molecule, max_bonds: usize, nbits: usize) -> Fingerprint {
    let mut fp = Fingerprint::new(nbits);
    let mut seen = HashSet::new();
    let mut budget = MAX_PATHS;
    let mut on_path = vec![false; mol.num_atoms()];

    for start in 0..mol.num_atoms() {
        let mut atoms = vec![start];
        let mut bonds = Vec::new();
        on_path[start] = true;
        walk(mol, max_bonds, &mut atoms, &mut bonds, &mut on_path, &mut seen, &mut budget);
        on_path[start] = false;
    }
    for hash in seen {
        fp.set((hash % nbits as u64) as usize);
    }
    fp
}

fn walk(
    mol: &Molecule,
    max_bonds: usize,
    atoms: &mut Vec<usize>,
    bonds: &mut Vec<usize>,
    on_path: &mut [bool],
    seen: &mut HashSet<u64>,
    budget: &mut usize,
) {
    let Some(&last) = atoms.last() else {
        return;
    };
    for (nbr, b) in mol.neighbors(last) {
        if on_path[nbr] || *budget == 0 {
            continue;
        }
        atoms.push(nbr);
        bonds.push(b);
        on_path[nbr] = true;
        *budget -= 1;

        seen.insert(path_hash(mol, atoms, bonds));
        if bonds.len() < max_bonds {
            walk(mol, max_bonds, atoms, bonds, on_path, seen, budget);
        }

        on_path[nbr] = false;
        bonds.pop();
        atoms.pop();
    }
}

/// Direction-independent hash of an atom/bond path
fn path_hash(mol: &Molecule, atoms: &[usize], bonds: &[usize]) -> u64 {
    let forward: Vec<u64> = atoms
        .iter()
        .zip(bonds.iter().map(Some).chain([None]))
        .flat_map(|(&a, b)| {
            let label = atom_label(mol, a);
            match b {
                Some(&b) => vec![label, 100 + mol.bonds[b].order.code() as u64],
                None => vec![label],
            }
        })
        .collect();
    let backward: Vec<u64> = forward.iter().rev().copied().collect();
    hash_words(forward.min(backward).as_slice())
}

struct KeyContext<'a> {
    mol: &'a Molecule,
    ring_sizes: Vec<usize>,
    ring_count: Vec<usize>,
}

impl KeyContext<'_> {
    fn any_atom(&self, f: impl Fn(usize) -> bool) -> bool {
        (0..self.mol.num_atoms()).any(f)
    }

    fn z(&self, a: usize) -> u8 {
        self.mol.atoms[a].atomic_number
    }

    fn any_bond(&self, order: BondOrder, z1: u8, z2: u8) -> bool {
        self.mol.bonds.iter().any(|b| {
            let (a, c) = (self.z(b.a), self.z(b.b));
            b.order == order && ((a, c) == (z1, z2) || (a, c) == (z2, z1))
        })
    }

    fn count_bonded(&self, a: usize, order: BondOrder, z: u8) -> usize {
        self.mol
            .neighbors(a)
            .filter(|&(n, b)| self.mol.bonds[b].order == order && self.z(n) == z)
            .count()
    }

    fn is_halogen(&self, a: usize) -> bool {
        matches!(
            self.z(a),
            element::FLUORINE | element::CHLORINE | element::BROMINE | element::IODINE
        )
    }
}

type KeyFn = fn(&KeyContext) -> bool;

/// Substructure keys, one bit each, in this order
const KEYS: &[(&str, KeyFn)] = &[
    ("nitrogen", |c| c.any_atom(|a| c.z(a) == element::NITROGEN)),
    ("oxygen", |c| c.any_atom(|a| c.z(a) == element::OXYGEN)),
    ("sulfur", |c| c.any_atom(|a| c.z(a) == element::SULFUR)),
    ("phosphorus", |c| c.any_atom(|a| c.z(a) == element::PHOSPHORUS)),
    ("fluorine", |c| c.any_atom(|a| c.z(a) == element::FLUORINE)),
    ("chlorine", |c| c.any_atom(|a| c.z(a) == element::CHLORINE)),
    ("bromine", |c| c.any_atom(|a| c.z(a) == element::BROMINE)),
    ("iodine", |c| c.any_atom(|a| c.z(a) == element::IODINE)),
    ("halogen", |c| c.any_atom(|a| c.is_halogen(a))),
    ("uncommon element", |c| {
        c.any_atom(|a| !matches!(c.z(a), 1 | 6 | 7 | 8 | 9 | 15 | 16 | 17 | 35 | 53))
    }),
    ("charged atom", |c| c.any_atom(|a| c.mol.atoms[a].charge != 0)),
    ("isotope", |c| c.any_atom(|a| c.mol.atoms[a].isotope.is_some())),
    ("aromatic atom", |c| c.any_atom(|a| c.mol.atoms[a].aromatic)),
    ("aromatic nitrogen", |c| {
        c.any_atom(|a| c.mol.atoms[a].aromatic && c.z(a) == element::NITROGEN)
    }),
    ("aromatic oxygen or sulfur", |c| {
        c.any_atom(|a| c.mol.atoms[a].aromatic && matches!(c.z(a), element::OXYGEN | element::SULFUR))
    }),
    ("three-membered ring", |c| c.ring_sizes.contains(&3)),
    ("four-membered ring", |c| c.ring_sizes.contains(&4)),
    ("five-membered ring", |c| c.ring_sizes.contains(&5)),
    ("six-membered ring", |c| c.ring_sizes.contains(&6)),
    ("seven- or eight-membered ring", |c| c.ring_sizes.iter().any(|&s| s >= 7)),
    ("more than one ring", |c| c.ring_sizes.len() > 1),
    ("fused ring atom", |c| c.ring_count.iter().any(|&n| n > 1)),
    ("carbonyl", |c| c.any_bond(BondOrder::Double, element::CARBON, element::OXYGEN)),
    ("imine", |c| c.any_bond(BondOrder::Double, element::CARBON, element::NITROGEN)),
    ("nitrile", |c| c.any_bond(BondOrder::Triple, element::CARBON, element::NITROGEN)),
    ("alkyne", |c| c.any_bond(BondOrder::Triple, element::CARBON, element::CARBON)),
    ("alkene", |c| c.any_bond(BondOrder::Double, element::CARBON, element::CARBON)),
    ("nitrogen-oxygen double bond", |c| {
        c.any_bond(BondOrder::Double, element::NITROGEN, element::OXYGEN)
    }),
    ("sulfur-oxygen double bond", |c| {
        c.any_bond(BondOrder::Double, element::SULFUR, element::OXYGEN)
    }),
    ("hydroxyl", |c| {
        c.any_atom(|a| c.z(a) == element::OXYGEN && c.mol.atoms[a].hydrogens == 1 && c.mol.degree(a) == 1)
    }),
    ("primary amine", |c| {
        c.any_atom(|a| c.z(a) == element::NITROGEN && c.mol.atoms[a].hydrogens == 2 && !c.mol.atoms[a].aromatic)
    }),
    ("secondary nitrogen", |c| {
        c.any_atom(|a| c.z(a) == element::NITROGEN && c.mol.atoms[a].hydrogens == 1)
    }),
    ("carboxyl", |c| {
        c.any_atom(|a| {
            c.z(a) == element::CARBON
                && c.count_bonded(a, BondOrder::Double, element::OXYGEN) == 1
                && c.mol.neighbors(a).any(|(n, b)| {
                    c.mol.bonds[b].order == BondOrder::Single
                        && c.z(n) == element::OXYGEN
                        && c.mol.atoms[n].hydrogens == 1
                })
        })
    }),
    ("amide", |c| {
        c.any_atom(|a| {
            c.z(a) == element::CARBON
                && c.count_bonded(a, BondOrder::Double, element::OXYGEN) == 1
                && c.count_bonded(a, BondOrder::Single, element::NITROGEN) >= 1
        })
    }),
    ("ether or ester oxygen", |c| {
        c.any_atom(|a| {
            c.z(a) == element::OXYGEN
                && !c.mol.atoms[a].aromatic
                && c.count_bonded(a, BondOrder::Single, element::CARBON) == 2
        })
    }),
    ("methyl", |c| {
        c.any_atom(|a| c.z(a) == element::CARBON && c.mol.atoms[a].hydrogens == 3)
    }),
    ("quaternary carbon", |c| {
        c.any_atom(|a| c.z(a) == element::CARBON && c.mol.degree(a) == 4)
    }),
    ("aromatic halide", |c| {
        c.any_atom(|a| c.is_halogen(a) && c.mol.neighbors(a).any(|(n, _)| c.mol.atoms[n].aromatic))
    }),
    ("more than ten heavy atoms", |c| {
        (0..c.mol.num_atoms()).filter(|&a| c.z(a) != element::HYDROGEN).count() > 10
    }),
    ("several fragments", |c| c.mol.components().len() > 1),
];

/// Number of bits in [`structural_keys`]
pub fn num_structural_keys() -> usize {
    KEYS.len()
}

/// Name of each structural key bit
pub fn structural_key_names() -> impl Iterator<Item = &'static str> {
    KEYS.iter().map(|(name, _)| *name)
}

/// Dictionary-based substructure keys (MACCS-style)
pub fn structural_keys(mol: &Molecule) -> Fingerprint {
    let cycles = mol.cycles(8);
    let mut ring_count = vec![0; mol.num_atoms()];
    for cycle in &cycles {
        for &a in cycle {
            ring_count[a] += 1;
        }
    }
    let ctx = KeyContext {
        mol,
        ring_sizes: cycles.iter().map(|c| c.len()).collect(),
        ring_count,
    };

    let mut fp = Fingerprint::new(KEYS.len());
    for (bit, (_, key)) in KEYS.iter().enumerate() {
        if key(&ctx) {
            fp.set(bit);
        }
    }
    fp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_smiles;

    fn mol(smiles: &str) -> Molecule {
        from_smiles(smiles).unwrap()
    }

    #[test]
    fn test_tanimoto_bounds() {
        let a = morgan(&mol("c1ccccc1O"), MORGAN_RADIUS, MORGAN_BITS);
        let b = morgan(&mol("c1ccccc1N"), MORGAN_RADIUS, MORGAN_BITS);
        assert_eq!(a.tanimoto(&a), 1.0);
        let sim = a.tanimoto(&b);
        assert!(sim > 0.0 && sim < 1.0);

        let empty = Fingerprint::new(64);
        assert_eq!(empty.tanimoto(&Fingerprint::new(64)), 1.0);
    }

    #[test]
    fn test_fingerprints_ignore_input_form() {
        let a = mol("C1=CC=CC=C1C(=O)O");
        let b = mol("OC(=O)c1ccccc1");
        assert_eq!(morgan(&a, 2, 2048), morgan(&b, 2, 2048));
        assert_eq!(path(&a, 7, 2048), path(&b, 7, 2048));
        assert_eq!(structural_keys(&a), structural_keys(&b));
    }

    #[test]
    fn test_path_fingerprint_grows_with_size() {
        let small = path(&mol("CC"), PATH_MAX_BONDS, PATH_BITS);
        let large = path(&mol("CCCCCCCCC"), PATH_MAX_BONDS, PATH_BITS);
        assert_eq!(small.count_ones(), 1);
        assert!(large.count_ones() > small.count_ones());
    }

    #[test]
    fn test_structural_keys() {
        let fp = structural_keys(&mol("OC(=O)c1ccccc1"));
        let names: Vec<&str> = structural_key_names().collect();
        let on = |name: &str| fp.get(names.iter().position(|n| *n == name).unwrap());
        assert!(on("carboxyl"));
        assert!(on("six-membered ring"));
        assert!(on("aromatic atom"));
        assert!(!on("nitrogen"));
        assert_eq!(fp.nbits(), num_structural_keys());
    }
}
