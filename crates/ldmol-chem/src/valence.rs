//! Hydrogen assignment and valence checks
//!
//! Aromatic atoms count each aromatic bond as one and are asked for one
//! extra pi electron when their lowest fitting valence leaves room for it.

use crate::ChemError;
use crate::element;
use crate::mol::{Atom, BondOrder, CisTrans, Molecule};
use crate::stereo::{odd_permutation, stereo_neighbors};

/// Fold plain `[H]` atoms into the hydrogen count of their heavy neighbor
///
/// Isotopic, charged, and hydrogen-bonded hydrogens stay as atoms. Stereo
/// marks are carried over to the folded graph.
pub fn merge_explicit_hydrogens(mol: &Molecule) -> Molecule {
    let removable: Vec<bool> = (0..mol.num_atoms())
        .map(|i| {
            let atom = &mol.atoms[i];
            atom.atomic_number == element::HYDROGEN
                && atom.isotope.is_none()
                && atom.charge == 0
                && atom.hydrogens == 0
                && mol.degree(i) == 1
                && mol.neighbors(i).all(|(n, b)| {
                    mol.atoms[n].atomic_number != element::HYDROGEN
                        && mol.bonds[b].order == BondOrder::Single
                })
        })
        .collect();
    if !removable.iter().any(|&r| r) {
        return mol.clone();
    }

    let mut out = Molecule::new();
    let mut remap = vec![usize::MAX; mol.num_atoms()];
    for (i, atom) in mol.atoms.iter().enumerate() {
        if !removable[i] {
            remap[i] = out.add_atom(atom.clone());
        }
    }
    for (i, _) in mol.atoms.iter().enumerate().filter(|(i, _)| removable[*i]) {
        if let Some((parent, _)) = mol.neighbors(i).next() {
            let parent = &mut out.atoms[remap[parent]];
            parent.hydrogens = parent.hydrogens.saturating_add(1);
        }
    }
    for bond in &mol.bonds {
        if !removable[bond.a] && !removable[bond.b] {
            let idx = out.add_bond(remap[bond.a], remap[bond.b], bond.order);
            out.bonds[idx].stereo = bond.stereo.and_then(|stereo| {
                let (a, a_flip) = kept_reference(mol, &removable, bond.a, bond.b, stereo.a_neighbor)?;
                let (b, b_flip) = kept_reference(mol, &removable, bond.b, bond.a, stereo.b_neighbor)?;
                Some(CisTrans {
                    a_neighbor: remap[a],
                    b_neighbor: remap[b],
                    cis: stereo.cis ^ a_flip ^ b_flip,
                })
            });
        }
    }

    // Folded hydrogens move to the implicit slot at the end of the order
    for (i, atom) in mol.atoms.iter().enumerate() {
        let Some(chirality) = atom.chirality.filter(|_| !removable[i]) else {
            continue;
        };
        let before: Vec<Option<usize>> = stereo_neighbors(mol, i)
            .into_iter()
            .map(|n| n.filter(|&n| !removable[n]).map(|n| remap[n]))
            .collect();
        let after = stereo_neighbors(&out, remap[i]);
        out.atoms[remap[i]].chirality = odd_permutation(&before, &after).map(|odd| chirality.permuted(odd));
    }
    out
}

/// Reference neighbor of a double-bond end that survives hydrogen folding,
/// and whether it replaced the original one
fn kept_reference(
    mol: &Molecule,
    removable: &[bool],
    end: usize,
    other: usize,
    reference: usize,
) -> Option<(usize, bool)> {
    if !removable[reference] {
        return Some((reference, false));
    }
    mol.neighbors(end)
        .map(|(n, _)| n)
        .find(|&n| n != other && n != reference && !removable[n])
        .map(|n| (n, true))
}

/// Demote aromatic marks that do not sit on a ring
///
/// Aromatic bonds outside rings become single; an aromatic atom outside
/// every ring is an error.
pub fn check_aromatic_rings(mol: &mut Molecule) -> Result<(), ChemError> {
    let ring_bonds = mol.ring_bonds();
    for (bond, in_ring) in mol.bonds.iter_mut().zip(&ring_bonds) {
        if bond.order == BondOrder::Aromatic && !in_ring {
            bond.order = BondOrder::Single;
        }
    }
    let ring_atoms = mol.ring_atoms();
    if let Some(atom) = (0..mol.num_atoms()).find(|&i| mol.atoms[i].aromatic && !ring_atoms[i]) {
        return Err(ChemError::NonRingAromatic { atom });
    }
    Ok(())
}

/// Smallest allowed valence that holds `used`, if any
fn fitting_valence(allowed: &[u8], used: u8) -> Option<u8> {
    allowed.iter().copied().find(|&v| v >= used)
}

/// Implicit hydrogens an unbracketed atom would receive at this position
///
/// `None` when no allowed valence holds the explicit bonds, which means the
/// atom can only be written in brackets.
pub fn default_hydrogens(mol: &Molecule, atom: usize) -> Option<u8> {
    let a = &mol.atoms[atom];
    if a.atomic_number == 0 {
        return Some(0);
    }
    let allowed = element::allowed_valences(a.atomic_number, 0)?;
    let used = mol.bond_valence(atom);
    let v = fitting_valence(allowed, used)?;
    let free = v - used;
    Some(if a.aromatic && free >= 1 { free - 1 } else { free })
}

/// Assign implicit hydrogens and check every atom's valence
///
/// Returns, per atom, whether it must receive a double bond when the
/// aromatic system is kekulized.
pub fn assign_hydrogens(mol: &mut Molecule) -> Result<Vec<bool>, ChemError> {
    let mut needs_pi = vec![false; mol.num_atoms()];
    for i in 0..mol.num_atoms() {
        let Atom {
            atomic_number: z,
            charge,
            hydrogens,
            aromatic,
            bracket,
            ..
        } = mol.atoms[i];
        if z == 0 {
            continue;
        }
        let used = mol.bond_valence(i).saturating_add(hydrogens);
        let allowed = if bracket {
            element::allowed_valences(z, charge)
        } else {
            element::allowed_valences(z, 0)
        };
        let Some(allowed) = allowed else {
            continue;
        };
        let v = fitting_valence(allowed, used).ok_or_else(|| ChemError::Valence {
            atom: i,
            symbol: element::symbol(z).to_string(),
            valence: used,
        })?;

        let free = v - used;
        let pi = aromatic && free >= 1;
        needs_pi[i] = pi;
        if !bracket {
            mol.atoms[i].hydrogens = hydrogens + free - u8::from(pi);
        }
    }
    Ok(needs_pi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_smiles;

    fn prepared(smiles: &str) -> (Molecule, Vec<bool>) {
        let mut mol = merge_explicit_hydrogens(&parse_smiles(smiles).unwrap());
        check_aromatic_rings(&mut mol).unwrap();
        let pi = assign_hydrogens(&mut mol).unwrap();
        (mol, pi)
    }

    #[test]
    fn test_implicit_hydrogens() {
        let (mol, _) = prepared("CC(=O)N");
        let h: Vec<u8> = mol.atoms.iter().map(|a| a.hydrogens).collect();
        assert_eq!(h, vec![3, 0, 0, 2]);
    }

    #[test]
    fn test_aromatic_pi_needs() {
        let (mol, pi) = prepared("c1cc[nH]c1");
        assert_eq!(pi, vec![true, true, true, false, true]);
        assert_eq!(mol.atoms[0].hydrogens, 1);

        let (mol, pi) = prepared("n1ccccc1");
        assert!(pi.iter().all(|&p| p));
        assert_eq!(mol.atoms[0].hydrogens, 0);

        let (_, pi) = prepared("c1ccoc1");
        assert!(!pi[3]);
    }

    #[test]
    fn test_explicit_hydrogen_merges() {
        let (mol, _) = prepared("[H]C([H])([H])[H]");
        assert_eq!(mol.num_atoms(), 1);
        assert_eq!(mol.atoms[0].hydrogens, 4);

        let (mol, _) = prepared("[2H]C");
        assert_eq!(mol.num_atoms(), 2);
        assert_eq!(mol.atoms[1].hydrogens, 3);
    }

    #[test]
    fn test_valence_errors() {
        for bad in ["C(C)(C)(C)(C)C", "O=O=O", "[NH4]", "FC=F"] {
            let mut mol = parse_smiles(bad).unwrap();
            assert!(assign_hydrogens(&mut mol).is_err(), "{} should fail", bad);
        }
        let mut ok = parse_smiles("[NH4+]").unwrap();
        assert!(assign_hydrogens(&mut ok).is_ok());
    }

    #[test]
    fn test_non_ring_aromatic_atom() {
        let mut mol = parse_smiles("cc").unwrap();
        assert!(matches!(
            check_aromatic_rings(&mut mol),
            Err(ChemError::NonRingAromatic { .. })
        ));
    }
}
