//! Hückel aromaticity perception on a Kekulé structure
//!
//! Rings of up to [`MAX_RING`] atoms are tested alone, then pairs of rings
//! sharing one bond are tested as a fused system. Electron counts depend
//! only on ring membership of double bonds, so every Kekulé form of the
//! same molecule perceives the same aromatic set.

use std::collections::BTreeSet;

use crate::element;
use crate::mol::{BondOrder, Molecule};

/// Largest single ring considered
pub const MAX_RING: usize = 8;

/// Pi electrons an atom donates to any ring it belongs to, or `None` when
/// the atom cannot be part of an aromatic ring
fn electron_contribution(mol: &Molecule, atom: usize, ring_bonds: &[bool]) -> Option<u8> {
    let a = &mol.atoms[atom];
    if mol.degree(atom) + a.hydrogens as usize > 3 {
        return None;
    }

    let mut ring_double = 0;
    let mut exo_double = None;
    for (nbr, b) in mol.neighbors(atom) {
        match mol.bonds[b].order {
            BondOrder::Double if ring_bonds[b] => ring_double += 1,
            BondOrder::Double => exo_double = Some(nbr),
            BondOrder::Triple | BondOrder::Quadruple => return None,
            _ => {}
        }
    }

    match (ring_double, exo_double) {
        (1, None) => Some(1),
        (0, Some(nbr)) => {
            let z = mol.atoms[nbr].atomic_number;
            matches!(z, element::NITROGEN | element::OXYGEN | element::SULFUR).then_some(0)
        }
        (0, None) => {
            if element::has_lone_pair(a.atomic_number, a.charge) {
                Some(2)
            } else if matches!((a.atomic_number, a.charge), (element::BORON, 0) | (element::CARBON, 1)) {
                Some(0)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn ring_electrons<'a>(contributions: &[Option<u8>], atoms: impl IntoIterator<Item = &'a usize>) -> u32 {
    atoms
        .into_iter()
        .map(|&a| contributions[a].unwrap_or(0) as u32)
        .sum()
}

fn is_huckel(electrons: u32) -> bool {
    electrons >= 2 && (electrons - 2) % 4 == 0
}

/// Ring bond indices walking around an ordered atom cycle
fn cycle_bonds(mol: &Molecule, cycle: &[usize]) -> Vec<usize> {
    (0..cycle.len())
        .filter_map(|i| mol.bond_between(cycle[i], cycle[(i + 1) % cycle.len()]))
        .collect()
}

/// Mark aromatic atoms and bonds, clearing any previous marks
pub fn perceive(mol: &mut Molecule) {
    for atom in mol.atoms.iter_mut() {
        atom.aromatic = false;
    }

    let ring_bonds = mol.ring_bonds();
    let contributions: Vec<Option<u8>> = (0..mol.num_atoms())
        .map(|a| electron_contribution(mol, a, &ring_bonds))
        .collect();

    let rings: Vec<(Vec<usize>, BTreeSet<usize>)> = mol
        .cycles(MAX_RING)
        .into_iter()
        .filter(|c| c.iter().all(|&a| contributions[a].is_some()))
        .map(|c| {
            let bonds = cycle_bonds(mol, &c).into_iter().collect();
            (c, bonds)
        })
        .collect();

    let mut aromatic_atoms = BTreeSet::new();
    let mut aromatic_bonds = BTreeSet::new();
    let mut is_aromatic = vec![false; rings.len()];

    for (i, (atoms, bonds)) in rings.iter().enumerate() {
        if is_huckel(ring_electrons(&contributions, atoms)) {
            is_aromatic[i] = true;
            aromatic_atoms.extend(atoms.iter().copied());
            aromatic_bonds.extend(bonds.iter().copied());
        }
    }

    for i in 0..rings.len() {
        for j in i + 1..rings.len() {
            if is_aromatic[i] && is_aromatic[j] {
                continue;
            }
            let (atoms_i, bonds_i) = &rings[i];
            let (atoms_j, bonds_j) = &rings[j];
            if bonds_i.intersection(bonds_j).count() != 1 {
                continue;
            }
            let union: BTreeSet<usize> = atoms_i.iter().chain(atoms_j).copied().collect();
            if is_huckel(ring_electrons(&contributions, &union)) {
                aromatic_atoms.extend(union);
                aromatic_bonds.extend(bonds_i.iter().chain(bonds_j).copied());
            }
        }
    }

    for &a in &aromatic_atoms {
        mol.atoms[a].aromatic = true;
    }
    for &b in &aromatic_bonds {
        mol.bonds[b].order = BondOrder::Aromatic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_smiles;
    use crate::valence::assign_hydrogens;

    fn perceived(smiles: &str) -> Molecule {
        let mut mol = parse_smiles(smiles).unwrap();
        assign_hydrogens(&mut mol).unwrap();
        perceive(&mut mol);
        mol
    }

    fn aromatic_count(mol: &Molecule) -> usize {
        mol.atoms.iter().filter(|a| a.aromatic).count()
    }

    #[test]
    fn test_kekule_benzene_is_aromatic() {
        let mol = perceived("C1=CC=CC=C1");
        assert_eq!(aromatic_count(&mol), 6);
        assert!(mol.bonds.iter().all(|b| b.order == BondOrder::Aromatic));
    }

    #[test]
    fn test_heteroaromatics() {
        assert_eq!(aromatic_count(&perceived("C1=CNC=C1")), 5);
        assert_eq!(aromatic_count(&perceived("C1=COC=C1")), 5);
        assert_eq!(aromatic_count(&perceived("O=C1C=CNC=C1")), 6);
    }

    #[test]
    fn test_non_aromatic_rings() {
        assert_eq!(aromatic_count(&perceived("C1=CCC=C1")), 0);
        assert_eq!(aromatic_count(&perceived("C1=CC=CC=CC=C1")), 0);
        assert_eq!(aromatic_count(&perceived("C1CCCCC1")), 0);
        assert_eq!(aromatic_count(&perceived("O=C1C=CC(=O)C=C1")), 0);
    }

    #[test]
    fn test_fused_systems() {
        // Naphthalene drawn with the shared bond single
        assert_eq!(aromatic_count(&perceived("C1=CC2=CC=CC=C2C=C1")), 10);
        // Azulene is only aromatic as a fused pair
        assert_eq!(aromatic_count(&perceived("C1=CC2=CC=CC=CC2=C1")), 10);
    }
}
