//! SMILES writer driven by canonical ranks
//!
//! Chirality is re-expressed against the order neighbors are written in, and
//! `/` / `\` marks are placed around stereo double bonds once the spanning
//! tree is known.

use std::fmt::Write;

use crate::canon::canonical_ranks;
use crate::element;
use crate::mol::{BondOrder, Chirality, Molecule};
use crate::stereo::{odd_permutation, stereo_neighbors};
use crate::valence::default_hydrogens;

/// Spanning tree of one component, children and ring closures in rank order
struct Traversal {
    order: Vec<usize>,
    children: Vec<Vec<(usize, usize)>>,
    /// Ring-closure bonds opened at each atom: `(bond, far atom)`
    openings: Vec<Vec<(usize, usize)>>,
    /// Ring-closure bonds closed at each atom
    closings: Vec<Vec<usize>>,
}

fn traverse(mol: &Molecule, ranks: &[u32], root: usize, visited: &mut [bool]) -> Traversal {
    let n = mol.num_atoms();
    let mut t = Traversal {
        order: Vec::new(),
        children: vec![Vec::new(); n],
        openings: vec![Vec::new(); n],
        closings: vec![Vec::new(); n],
    };
    let mut bond_used = vec![false; mol.bonds.len()];

    let sorted_neighbors = |a: usize| {
        let mut nbrs: Vec<(usize, usize)> = mol.neighbors(a).collect();
        nbrs.sort_by_key(|&(nbr, _)| ranks[nbr]);
        nbrs
    };

    // (atom, sorted neighbors, next position)
    let mut stack = vec![(root, sorted_neighbors(root), 0usize)];
    visited[root] = true;
    t.order.push(root);

    while let Some((v, nbrs, pos)) = stack.last_mut() {
        let v = *v;
        let Some(&(w, b)) = nbrs.get(*pos) else {
            stack.pop();
            continue;
        };
        *pos += 1;
        if bond_used[b] {
            continue;
        }
        bond_used[b] = true;
        if visited[w] {
            // Back edge to an ancestor: opened there, closed here
            t.openings[w].push((b, v));
            t.closings[v].push(b);
        } else {
            visited[w] = true;
            t.children[v].push((w, b));
            t.order.push(w);
            stack.push((w, sorted_neighbors(w), 0));
        }
    }
    t
}

fn bond_symbol(mol: &Molecule, bond: usize) -> &'static str {
    let b = &mol.bonds[bond];
    match b.order {
        BondOrder::Aromatic => "",
        BondOrder::Single if mol.atoms[b.a].aromatic && mol.atoms[b.b].aromatic => "-",
        BondOrder::Single => "",
        BondOrder::Double => "=",
        BondOrder::Triple => "#",
        BondOrder::Quadruple => "$",
    }
}

fn atom_text(mol: &Molecule, atom: usize, chirality: Option<Chirality>) -> String {
    let a = &mol.atoms[atom];
    let symbol = if a.aromatic {
        a.symbol().to_ascii_lowercase()
    } else {
        a.symbol().to_string()
    };

    let organic = a.atomic_number == 0 || element::is_organic_subset(a.atomic_number);
    let plain = organic
        && chirality.is_none()
        && a.charge == 0
        && a.isotope.is_none()
        && default_hydrogens(mol, atom) == Some(a.hydrogens);
    if plain {
        return symbol;
    }

    let mut out = String::from("[");
    if let Some(isotope) = a.isotope {
        let _ = write!(out, "{}", isotope);
    }
    out.push_str(&symbol);
    if let Some(chirality) = chirality {
        out.push_str(chirality.symbol());
    }
    match a.hydrogens {
        0 => {}
        1 => out.push('H'),
        h => {
            let _ = write!(out, "H{}", h);
        }
    }
    match a.charge {
        0 => {}
        1 => out.push('+'),
        -1 => out.push('-'),
        c if c > 0 => {
            let _ = write!(out, "+{}", c);
        }
        c => {
            let _ = write!(out, "-{}", -c);
        }
    }
    out.push(']');
    out
}

fn ring_label(digit: usize) -> String {
    if digit < 10 {
        digit.to_string()
    } else {
        format!("%{}", digit)
    }
}

/// `/` (true) or `\` for the bonds that carry double-bond stereo, read in
/// the direction they are written
fn bond_directions(mol: &Molecule, t: &Traversal) -> Vec<Option<bool>> {
    let mut dirs = vec![None; mol.bonds.len()];
    if mol.bonds.iter().all(|b| b.stereo.is_none()) {
        return dirs;
    }
    let mut position = vec![usize::MAX; mol.num_atoms()];
    for (i, &a) in t.order.iter().enumerate() {
        position[a] = i;
    }
    // Atom each bond symbol is written after
    let mut written_from = vec![usize::MAX; mol.bonds.len()];
    for (v, children) in t.children.iter().enumerate() {
        for &(_, b) in children {
            written_from[b] = v;
        }
    }
    for (w, openings) in t.openings.iter().enumerate() {
        for &(b, _) in openings {
            written_from[b] = w;
        }
    }
    // A mark read from the neighbor towards the double-bond end
    let towards = |nbr: usize, bond: usize, up: bool| if written_from[bond] == nbr { up } else { !up };

    let mut doubles: Vec<usize> = (0..mol.bonds.len())
        .filter(|&b| mol.bonds[b].stereo.is_some() && position[mol.bonds[b].a] != usize::MAX)
        .collect();
    doubles.sort_by_key(|&b| position[mol.bonds[b].a].min(position[mol.bonds[b].b]));

    for double in doubles {
        let bond = mol.bonds[double];
        let Some(stereo) = bond.stereo else {
            continue;
        };
        let (first, second) = if position[bond.a] < position[bond.b] {
            (bond.a, bond.b)
        } else {
            (bond.b, bond.a)
        };
        let reference = |end: usize| if end == bond.a { stereo.a_neighbor } else { stereo.b_neighbor };
        // Reuse a bond marked for an earlier double bond, else the earliest neighbor
        let side = |end: usize, other: usize, dirs: &[Option<bool>]| {
            mol.neighbors(end)
                .filter(|&(n, _)| n != other)
                .min_by_key(|&(n, b)| (dirs[b].is_none(), position[n]))
        };
        let (Some((x, x_bond)), Some((y, y_bond))) = (side(first, second, &dirs), side(second, first, &dirs)) else {
            continue;
        };
        let cis = stereo.cis ^ (x != reference(first)) ^ (y != reference(second));

        let x_up = match dirs[x_bond] {
            Some(up) => towards(x, x_bond, up),
            None => {
                dirs[x_bond] = Some(towards(x, x_bond, true));
                true
            }
        };
        if dirs[y_bond].is_none() {
            dirs[y_bond] = Some(towards(y, y_bond, if cis { x_up } else { !x_up }));
        }
    }
    dirs
}

struct Emitter<'a> {
    mol: &'a Molecule,
    traversal: &'a Traversal,
    directions: Vec<Option<bool>>,
    /// Digit held by each open ring-closure bond
    open_digits: Vec<Option<usize>>,
    digit_in_use: Vec<bool>,
    out: String,
}

impl Emitter<'_> {
    fn take_digit(&mut self) -> usize {
        let digit = (1..self.digit_in_use.len())
            .find(|&d| !self.digit_in_use[d])
            .unwrap_or_else(|| {
                self.digit_in_use.push(false);
                self.digit_in_use.len() - 1
            });
        self.digit_in_use[digit] = true;
        digit
    }

    fn bond_text(&self, bond: usize) -> &'static str {
        match self.directions[bond] {
            Some(true) => "/",
            Some(false) => "\\",
            None => bond_symbol(self.mol, bond),
        }
    }

    /// Stored chirality re-read in the order neighbors appear in the output
    fn written_chirality(
        &self,
        atom: usize,
        parent: Option<usize>,
        closings: &[(usize, usize)],
    ) -> Option<Chirality> {
        let chirality = self.mol.atoms[atom].chirality?;
        let reference = stereo_neighbors(self.mol, atom);
        let mut written: Vec<Option<usize>> = Vec::with_capacity(reference.len());
        written.extend(parent.map(Some));
        if reference.contains(&None) {
            written.push(None);
        }
        written.extend(closings.iter().map(|&(_, b)| Some(self.mol.bonds[b].other(atom))));
        written.extend(self.traversal.openings[atom].iter().map(|&(_, far)| Some(far)));
        written.extend(self.traversal.children[atom].iter().map(|&(child, _)| Some(child)));
        odd_permutation(&reference, &written).map(|odd| chirality.permuted(odd))
    }

    fn emit(&mut self, atom: usize, parent: Option<usize>) {
        let mut closings: Vec<(usize, usize)> = self.traversal.closings[atom]
            .iter()
            .filter_map(|&b| self.open_digits[b].map(|d| (d, b)))
            .collect();
        closings.sort_unstable();

        let chirality = self.written_chirality(atom, parent, &closings);
        self.out.push_str(&atom_text(self.mol, atom, chirality));

        for (digit, bond) in closings {
            self.out.push_str(&ring_label(digit));
            self.digit_in_use[digit] = false;
            self.open_digits[bond] = None;
        }

        for &(bond, _) in &self.traversal.openings[atom] {
            let digit = self.take_digit();
            self.open_digits[bond] = Some(digit);
            self.out.push_str(self.bond_text(bond));
            self.out.push_str(&ring_label(digit));
        }

        let children = &self.traversal.children[atom];
        for (i, &(child, bond)) in children.iter().enumerate() {
            let branch = i + 1 < children.len();
            if branch {
                self.out.push('(');
            }
            self.out.push_str(self.bond_text(bond));
            self.emit(child, Some(atom));
            if branch {
                self.out.push(')');
            }
        }
    }
}

/// Canonical SMILES for an already normalized molecule
pub fn write_smiles(mol: &Molecule) -> String {
    let ranks = canonical_ranks(mol);
    let mut components = mol.components();
    components.sort_by_key(|c| c.iter().map(|&a| ranks[a]).min());

    let mut visited = vec![false; mol.num_atoms()];
    let mut parts = Vec::with_capacity(components.len());
    for component in components {
        let Some(&root) = component.iter().min_by_key(|&&a| ranks[a]) else {
            continue;
        };
        let mut traversal = traverse(mol, &ranks, root, &mut visited);
        for openings in traversal.openings.iter_mut() {
            openings.sort_by_key(|&(_, far)| ranks[far]);
        }
        let mut emitter = Emitter {
            mol,
            traversal: &traversal,
            directions: bond_directions(mol, &traversal),
            open_digits: vec![None; mol.bonds.len()],
            digit_in_use: vec![false; 10],
            out: String::new(),
        };
        emitter.emit(root, None);
        parts.push(emitter.out);
    }
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_smiles;
    use crate::valence::assign_hydrogens;

    fn written(smiles: &str) -> String {
        let mut mol = parse_smiles(smiles).unwrap();
        assign_hydrogens(&mut mol).unwrap();
        write_smiles(&mol)
    }

    #[test]
    fn test_simple_chains() {
        assert_eq!(written("OCC"), written("CCO"));
        assert_eq!(written("C"), "C");
        assert_eq!(written("C#N"), written("N#C"));
    }

    #[test]
    fn test_bracket_atoms() {
        assert_eq!(written("[NH4+]"), "[NH4+]");
        assert_eq!(written("[O-]C"), written("C[O-]"));
        assert_eq!(written("[13CH4]"), "[13CH4]");
        assert_eq!(written("[Fe+2]"), "[Fe+2]");
        assert_eq!(written("[Na+].[Cl-]"), written("[Cl-].[Na+]"));
    }

    #[test]
    fn test_ring_closure_digits() {
        let s = written("C1CCCCC1");
        assert_eq!(s, "C1CCCCC1");
        assert!(written("C1CC2CCC1C2").contains('2'));
    }

    #[test]
    fn test_stereo_is_written() {
        let l = crate::canonicalize("N[C@@H](C)C(=O)O").unwrap();
        let d = crate::canonicalize("N[C@H](C)C(=O)O").unwrap();
        assert!(l.contains('@'), "{}", l);
        assert_ne!(l, d);
        assert_eq!(l.replace("@@", "@"), d.replace("@@", "@"));

        let trans = crate::canonicalize("F/C=C/F").unwrap();
        assert_eq!(trans, "F/C=C/F");
        assert_ne!(crate::canonicalize("F/C=C\\F").unwrap(), trans);
    }

    #[test]
    fn test_ring_label() {
        assert_eq!(ring_label(3), "3");
        assert_eq!(ring_label(12), "%12");
    }
}
