//! Kekulé assignment for aromatic bonds
//!
//! Every atom that needs a pi electron must end up with exactly one double
//! bond among its aromatic bonds; all other aromatic bonds become single.

use crate::ChemError;
use crate::mol::{BondOrder, Molecule};

/// Replace aromatic bonds with an alternating single/double pattern
///
/// Clears the aromatic flag on atoms; aromaticity is perceived again
/// afterwards from the Kekulé form.
pub fn kekulize(mol: &mut Molecule, needs_pi: &[bool]) -> Result<(), ChemError> {
    let n = mol.num_atoms();
    // Candidate bonds: aromatic, both ends still needing a double bond
    let candidates: Vec<Vec<(usize, usize)>> = (0..n)
        .map(|a| {
            if !needs_pi[a] {
                return Vec::new();
            }
            mol.neighbors(a)
                .filter(|&(nbr, b)| needs_pi[nbr] && mol.bonds[b].order == BondOrder::Aromatic)
                .collect()
        })
        .collect();

    let mut mate = vec![None; n];
    if !assign(&candidates, needs_pi, &mut mate) {
        return Err(ChemError::Kekulize);
    }

    for bond in mol.bonds.iter_mut() {
        if bond.order == BondOrder::Aromatic {
            bond.order = match mate[bond.a] {
                Some(b) if b == bond.b => BondOrder::Double,
                _ => BondOrder::Single,
            };
        }
    }
    for atom in mol.atoms.iter_mut() {
        atom.aromatic = false;
    }
    Ok(())
}

/// Backtracking perfect matching over the atoms that need a pi bond
///
/// Always branches on the unmatched atom with the fewest free partners.
fn assign(candidates: &[Vec<(usize, usize)>], needs_pi: &[bool], mate: &mut [Option<usize>]) -> bool {
    let free_partners = |a: usize, mate: &[Option<usize>]| {
        candidates[a].iter().filter(|&&(nbr, _)| mate[nbr].is_none()).count()
    };

    let next = (0..mate.len())
        .filter(|&a| needs_pi[a] && mate[a].is_none())
        .min_by_key(|&a| (free_partners(a, mate), a));
    let Some(atom) = next else {
        return true;
    };

    let partners: Vec<usize> = candidates[atom]
        .iter()
        .map(|&(nbr, _)| nbr)
        .filter(|&nbr| mate[nbr].is_none())
        .collect();
    for nbr in partners {
        mate[atom] = Some(nbr);
        mate[nbr] = Some(atom);
        if assign(candidates, needs_pi, mate) {
            return true;
        }
        mate[atom] = None;
        mate[nbr] = None;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_smiles;
    use crate::valence::assign_hydrogens;

    fn kekule(smiles: &str) -> Result<Molecule, ChemError> {
        let mut mol = parse_smiles(smiles)?;
        let pi = assign_hydrogens(&mut mol)?;
        kekulize(&mut mol, &pi)?;
        Ok(mol)
    }

    fn count(mol: &Molecule, order: BondOrder) -> usize {
        mol.bonds.iter().filter(|b| b.order == order).count()
    }

    #[test]
    fn test_benzene() {
        let mol = kekule("c1ccccc1").unwrap();
        assert_eq!(count(&mol, BondOrder::Double), 3);
        assert_eq!(count(&mol, BondOrder::Aromatic), 0);
        for a in 0..6 {
            let doubles = mol
                .neighbors(a)
                .filter(|&(_, b)| mol.bonds[b].order == BondOrder::Double)
                .count();
            assert_eq!(doubles, 1);
        }
    }

    #[test]
    fn test_fused_and_heteroaromatic() {
        assert_eq!(count(&kekule("c1ccc2ccccc2c1").unwrap(), BondOrder::Double), 5);
        assert_eq!(count(&kekule("c1cc[nH]c1").unwrap(), BondOrder::Double), 2);
        assert_eq!(count(&kekule("c1ccoc1").unwrap(), BondOrder::Double), 2);
    }

    #[test]
    fn test_impossible_kekule_structure() {
        // Pyrrole nitrogen without its hydrogen leaves five pi atoms
        assert!(matches!(kekule("c1ccnc1"), Err(ChemError::Kekulize)));
    }
}
