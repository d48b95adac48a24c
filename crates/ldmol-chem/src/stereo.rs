//! Tetrahedral and double-bond stereo
//!
//! Marks are stored relative to the molecule's own neighbor order (see
//! [`Chirality`] and [`crate::mol::CisTrans`]), compared through canonical ranks, and
//! dropped where the graph makes them meaningless.

use crate::canon::symmetry_classes;
use crate::element;
use crate::mol::{BondOrder, Chirality, Molecule};

/// Whether reordering `from` into `to` takes an odd number of swaps
///
/// `None` when the two lists are not permutations of each other.
pub fn odd_permutation<T: PartialEq>(from: &[T], to: &[T]) -> Option<bool> {
    if from.len() != to.len() {
        return None;
    }
    let mut positions = Vec::with_capacity(to.len());
    for item in to {
        positions.push(from.iter().position(|f| f == item)?);
    }
    let mut inversions = 0usize;
    for i in 0..positions.len() {
        for j in i + 1..positions.len() {
            if positions[i] == positions[j] {
                return None;
            }
            if positions[i] > positions[j] {
                inversions += 1;
            }
        }
    }
    Some(inversions % 2 == 1)
}

/// Neighbors a chirality mark refers to, `None` standing for the implicit
/// hydrogen or lone pair of a three-connected center
pub fn stereo_neighbors(mol: &Molecule, atom: usize) -> Vec<Option<usize>> {
    let mut out: Vec<Option<usize>> = mol.neighbors(atom).map(|(n, _)| Some(n)).collect();
    if out.len() == 3 {
        out.push(None);
    }
    out
}

/// Tetrahedral by connectivity: four substituents counting one hydrogen, or
/// three plus a lone pair on S, Se and P
fn tetrahedral_shape(mol: &Molecule, atom: usize) -> bool {
    let a = &mol.atoms[atom];
    match (mol.degree(atom), a.hydrogens) {
        (4, 0) | (3, 1) => true,
        (3, 0) => matches!(a.atomic_number, element::SULFUR | element::PHOSPHORUS | 34),
        _ => false,
    }
}

/// Sort `items` by rank; `None` if two share a rank
fn rank_order(items: &[Option<usize>], ranks: &[u32]) -> Option<Vec<Option<usize>>> {
    let mut sorted = items.to_vec();
    sorted.sort_by_key(|n| n.map(|i| ranks[i]));
    let distinct = sorted
        .windows(2)
        .all(|w| w[0].map(|i| ranks[i]) != w[1].map(|i| ranks[i]));
    distinct.then_some(sorted)
}

/// Chirality seen from rank-ordered neighbors: 0 unknown, 1 `@`, 2 `@@`
pub(crate) fn chirality_code(mol: &Molecule, atom: usize, ranks: &[u32]) -> u8 {
    let Some(chirality) = mol.atoms[atom].chirality else {
        return 0;
    };
    let neighbors = stereo_neighbors(mol, atom);
    let Some(sorted) = rank_order(&neighbors, ranks) else {
        return 0;
    };
    match odd_permutation(&neighbors, &sorted).map(|odd| chirality.permuted(odd)) {
        Some(Chirality::Anticlockwise) => 1,
        Some(Chirality::Clockwise) => 2,
        None => 0,
    }
}

/// Highest-ranked neighbor of `end` other than `other`, if it is unique
fn top_neighbor(mol: &Molecule, end: usize, other: usize, ranks: &[u32]) -> Option<usize> {
    let mut side: Vec<usize> = mol.neighbors(end).map(|(n, _)| n).filter(|&n| n != other).collect();
    side.sort_by_key(|&n| std::cmp::Reverse(ranks[n]));
    match side.as_slice() {
        [only] => Some(*only),
        [first, second] if ranks[*first] != ranks[*second] => Some(*first),
        _ => None,
    }
}

/// Double-bond configuration between the top-ranked neighbors: 0 unknown,
/// 1 trans, 2 cis
pub(crate) fn cis_trans_code(mol: &Molecule, bond: usize, ranks: &[u32]) -> u8 {
    let b = &mol.bonds[bond];
    let Some(stereo) = b.stereo else {
        return 0;
    };
    let (Some(top_a), Some(top_b)) = (
        top_neighbor(mol, b.a, b.b, ranks),
        top_neighbor(mol, b.b, b.a, ranks),
    ) else {
        return 0;
    };
    let cis = stereo.cis ^ (top_a != stereo.a_neighbor) ^ (top_b != stereo.b_neighbor);
    1 + u8::from(cis)
}

fn keeps_chirality(mol: &Molecule, atom: usize, ranks: &[u32]) -> bool {
    tetrahedral_shape(mol, atom) && rank_order(&stereo_neighbors(mol, atom), ranks).is_some()
}

fn keeps_cis_trans(mol: &Molecule, bond: usize, small_ring: &[bool], ranks: &[u32]) -> bool {
    let b = &mol.bonds[bond];
    let Some(stereo) = b.stereo else {
        return false;
    };
    let sides_ok = [(b.a, b.b, stereo.a_neighbor), (b.b, b.a, stereo.b_neighbor)]
        .into_iter()
        .all(|(end, other, reference)| {
            let degree = mol.degree(end);
            (2..=3).contains(&degree)
                && mol.bond_between(end, reference).is_some()
                && reference != other
                && top_neighbor(mol, end, other, ranks).is_some()
        });
    b.order == BondOrder::Double && !small_ring[bond] && sides_ok
}

/// Bonds on a ring of fewer than eight atoms
fn small_ring_bonds(mol: &Molecule) -> Vec<bool> {
    let mut out = vec![false; mol.bonds.len()];
    for cycle in mol.cycles(7) {
        for (i, &a) in cycle.iter().enumerate() {
            let b = cycle[(i + 1) % cycle.len()];
            if let Some(bond) = mol.bond_between(a, b) {
                out[bond] = true;
            }
        }
    }
    out
}

/// Drop chirality on atoms that are not stereocenters and cis/trans marks
/// on double bonds that cannot carry them
///
/// Repeats until stable, since removing one mark can merge symmetry classes.
pub fn clean(mol: &mut Molecule) {
    let has_marks = |mol: &Molecule| {
        mol.atoms.iter().any(|a| a.chirality.is_some()) || mol.bonds.iter().any(|b| b.stereo.is_some())
    };
    if !has_marks(mol) {
        return;
    }
    let small_ring = small_ring_bonds(mol);
    loop {
        let ranks = symmetry_classes(mol);
        let drop_atoms: Vec<usize> = (0..mol.num_atoms())
            .filter(|&a| mol.atoms[a].chirality.is_some() && !keeps_chirality(mol, a, &ranks))
            .collect();
        let drop_bonds: Vec<usize> = (0..mol.bonds.len())
            .filter(|&b| mol.bonds[b].stereo.is_some() && !keeps_cis_trans(mol, b, &small_ring, &ranks))
            .collect();
        if drop_atoms.is_empty() && drop_bonds.is_empty() {
            return;
        }
        for a in drop_atoms {
            mol.atoms[a].chirality = None;
        }
        for b in drop_bonds {
            mol.bonds[b].stereo = None;
        }
    }
}
