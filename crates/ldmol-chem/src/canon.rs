//! Canonical atom ranking
//!
//! Iterative neighborhood refinement of atom invariants, with ties broken
//! one class at a time until every atom has a distinct rank. Stereo marks
//! enter the refinement once the neighbors they refer to are told apart.

use crate::mol::Molecule;
use crate::stereo::{chirality_code, cis_trans_code};

/// Dense ranks `0..k` for a list of sortable keys, equal keys sharing a rank
fn dense_ranks<K: Ord + Clone>(keys: &[K]) -> Vec<u32> {
    let mut sorted: Vec<K> = keys.to_vec();
    sorted.sort();
    sorted.dedup();
    keys.iter()
        .map(|k| sorted.binary_search(k).map(|r| r as u32).unwrap_or(0))
        .collect()
}

fn class_count(ranks: &[u32]) -> usize {
    let mut seen: Vec<u32> = ranks.to_vec();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// Per-atom `(chirality, cis/trans)` codes under the current ranks
fn stereo_codes(mol: &Molecule, ranks: &[u32]) -> Vec<(u8, u8)> {
    let mut codes: Vec<(u8, u8)> = (0..mol.num_atoms())
        .map(|a| (chirality_code(mol, a, ranks), 0))
        .collect();
    for (i, bond) in mol.bonds.iter().enumerate() {
        if bond.stereo.is_some() {
            let code = cis_trans_code(mol, i, ranks);
            codes[bond.a].1 = code;
            codes[bond.b].1 = code;
        }
    }
    codes
}

/// Refine ranks by sorted `(neighbor rank, bond code)` lists until stable
fn refine(mol: &Molecule, mut ranks: Vec<u32>) -> Vec<u32> {
    let mut classes = class_count(&ranks);
    loop {
        let stereo = stereo_codes(mol, &ranks);
        let keys: Vec<(u32, Vec<(u32, u8)>, (u8, u8))> = (0..mol.num_atoms())
            .map(|a| {
                let mut env: Vec<(u32, u8)> = mol
                    .neighbors(a)
                    .map(|(nbr, b)| (ranks[nbr], mol.bonds[b].order.code()))
                    .collect();
                env.sort_unstable();
                (ranks[a], env, stereo[a])
            })
            .collect();
        let next = dense_ranks(&keys);
        let next_classes = class_count(&next);
        if next_classes == classes {
            return next;
        }
        ranks = next;
        classes = next_classes;
    }
}

/// Ranks after refinement alone: atoms share a rank when nothing in the
/// graph or its stereo marks tells them apart
pub fn symmetry_classes(mol: &Molecule) -> Vec<u32> {
    if mol.is_empty() {
        return Vec::new();
    }
    let ring_atoms = mol.ring_atoms();
    let invariants: Vec<_> = (0..mol.num_atoms())
        .map(|a| {
            let atom = &mol.atoms[a];
            (
                mol.degree(a),
                atom.atomic_number,
                atom.isotope.unwrap_or(0),
                atom.charge,
                atom.hydrogens,
                atom.aromatic,
                ring_atoms[a],
            )
        })
        .collect();
    refine(mol, dense_ranks(&invariants))
}

/// Canonical rank of every atom; all ranks are distinct
pub fn canonical_ranks(mol: &Molecule) -> Vec<u32> {
    let n = mol.num_atoms();
    let mut ranks = symmetry_classes(mol);
    while class_count(&ranks) < n {
        // Lowest rank shared by more than one atom
        let mut counts = vec![0usize; n];
        for &r in &ranks {
            counts[r as usize] += 1;
        }
        let Some(tied) = (0..n).find(|&r| counts[r] > 1) else {
            break;
        };
        let chosen = (0..n).find(|&a| ranks[a] as usize == tied).unwrap_or(0);
        let keys: Vec<(u32, bool)> = (0..n).map(|a| (ranks[a], a != chosen)).collect();
        ranks = refine(mol, dense_ranks(&keys));
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_smiles;
    use crate::valence::assign_hydrogens;

    fn ranks(smiles: &str) -> Vec<u32> {
        let mut mol = parse_smiles(smiles).unwrap();
        assign_hydrogens(&mut mol).unwrap();
        canonical_ranks(&mol)
    }

    #[test]
    fn test_ranks_are_a_permutation() {
        for smiles in ["CCO", "c1ccccc1", "CC(C)(C)C", "C1CC2CCC1C2", "O.O"] {
            let mut r = ranks(smiles);
            r.sort_unstable();
            assert_eq!(r, (0..r.len() as u32).collect::<Vec<_>>(), "{}", smiles);
        }
    }

    #[test]
    fn test_enantiomers_share_symmetry_classes() {
        let l = crate::from_smiles("N[C@@H](C)C(=O)O").unwrap();
        let d = crate::from_smiles("N[C@H](C)C(=O)O").unwrap();
        assert_eq!(symmetry_classes(&l), symmetry_classes(&d));
        assert_eq!(class_count(&symmetry_classes(&l)), 6);
    }

    #[test]
    fn test_ranks_follow_invariants_not_input_order() {
        // Same atoms, reversed input order
        let a = ranks("CCO");
        let b = ranks("OCC");
        assert_eq!(a[2], b[0]);
        assert_eq!(a[1], b[1]);
        assert_eq!(a[0], b[2]);
    }
}
