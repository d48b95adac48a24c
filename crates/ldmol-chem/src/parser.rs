//! SMILES reader
//!
//! Produces the raw graph exactly as written: implicit hydrogens are not yet
//! assigned. Tetrahedral `@`/`@@` marks and `/` and `\` bond directions are
//! resolved into [`Chirality`] and [`CisTrans`] against the graph once the
//! whole string is read; other chirality classes are ignored.

use std::collections::HashMap;

use crate::ChemError;
use crate::element;
use crate::mol::{Atom, BondOrder, Chirality, CisTrans, Molecule};
use crate::stereo::{odd_permutation, stereo_neighbors};

/// Bond symbol as written; `None` on an [`Pending`] means no symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Order(BondOrder),
    /// `/` (true) or `\`: a single bond with directional stereo
    Directional(bool),
}

impl Written {
    fn order(self) -> BondOrder {
        match self {
            Written::Order(o) => o,
            Written::Directional(_) => BondOrder::Single,
        }
    }

    fn up(self) -> Option<bool> {
        match self {
            Written::Order(_) => None,
            Written::Directional(up) => Some(up),
        }
    }
}

struct OpenRing {
    atom: usize,
    bond: Option<Written>,
    pos: usize,
    /// Index of the placeholder in the opening atom's neighbor order
    slot: usize,
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    mol: Molecule,
    prev: Option<usize>,
    branches: Vec<Option<usize>>,
    pending: Option<Written>,
    rings: HashMap<u16, OpenRing>,
    /// Neighbors of each atom in written order; `None` marks a ring bond
    /// that is still open
    written_order: Vec<Vec<Option<usize>>>,
    /// Whether each atom follows a bond from an earlier atom
    has_from: Vec<bool>,
    /// Per bond: `/` (true) or `\` read from `Bond::a` towards `Bond::b`
    directions: Vec<Option<bool>>,
}

/// Parse SMILES into a raw [`Molecule`]
pub fn parse_smiles(smiles: &str) -> Result<Molecule, ChemError> {
    let smiles = smiles.trim();
    if smiles.is_empty() {
        return Err(ChemError::Empty);
    }
    let mut parser = Parser {
        src: smiles.as_bytes(),
        pos: 0,
        mol: Molecule::new(),
        prev: None,
        branches: Vec::new(),
        pending: None,
        rings: HashMap::new(),
        written_order: Vec::new(),
        has_from: Vec::new(),
        directions: Vec::new(),
    };
    parser.run()?;
    parser.resolve_chirality();
    parser.resolve_cis_trans();
    Ok(parser.mol)
}

impl<'a> Parser<'a> {
    fn err(&self, message: impl Into<String>) -> ChemError {
        ChemError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn run(&mut self) -> Result<(), ChemError> {
        while let Some(c) = self.peek() {
            match c {
                b'(' => {
                    if self.prev.is_none() || self.pending.is_some() {
                        return Err(self.err("branch must follow an atom"));
                    }
                    if self.pos > 0 && self.src[self.pos - 1] == b'(' {
                        return Err(self.err("branch must follow an atom"));
                    }
                    self.branches.push(self.prev);
                    self.pos += 1;
                    if self.peek() == Some(b')') {
                        return Err(self.err("empty branch"));
                    }
                }
                b')' => {
                    if self.pending.is_some() {
                        return Err(self.err("bond before ')'"));
                    }
                    self.prev = self
                        .branches
                        .pop()
                        .ok_or_else(|| self.err("unbalanced ')'"))?;
                    self.pos += 1;
                }
                b'.' => {
                    if self.pending.is_some() {
                        return Err(self.err("bond before '.'"));
                    }
                    self.prev = None;
                    self.pos += 1;
                }
                b'-' | b'=' | b'#' | b'$' | b':' | b'/' | b'\\' => {
                    if self.pending.is_some() {
                        return Err(self.err("two consecutive bond symbols"));
                    }
                    if self.prev.is_none() {
                        return Err(self.err("bond without a preceding atom"));
                    }
                    self.pending = Some(match c {
                        b'-' => Written::Order(BondOrder::Single),
                        b'=' => Written::Order(BondOrder::Double),
                        b'#' => Written::Order(BondOrder::Triple),
                        b'$' => Written::Order(BondOrder::Quadruple),
                        b':' => Written::Order(BondOrder::Aromatic),
                        b'/' => Written::Directional(true),
                        _ => Written::Directional(false),
                    });
                    self.pos += 1;
                }
                b'0'..=b'9' | b'%' => self.ring_closure()?,
                b'[' => {
                    let atom = self.bracket_atom()?;
                    self.attach(atom)?;
                }
                _ => {
                    let atom = self.organic_atom()?;
                    self.attach(atom)?;
                }
            }
        }

        if !self.branches.is_empty() {
            return Err(self.err("unclosed branch"));
        }
        if self.pending.is_some() {
            return Err(self.err("dangling bond at end of input"));
        }
        if let Some(open) = self.rings.values().min_by_key(|r| r.pos) {
            return Err(ChemError::Parse {
                position: open.pos,
                message: "unclosed ring bond".to_string(),
            });
        }
        Ok(())
    }

    fn implicit_order(&self, a: usize, b: usize) -> BondOrder {
        if self.mol.atoms[a].aromatic && self.mol.atoms[b].aromatic {
            BondOrder::Aromatic
        } else {
            BondOrder::Single
        }
    }

    fn bond(&mut self, a: usize, b: usize, order: BondOrder, up: Option<bool>) {
        self.mol.add_bond(a, b, order);
        self.directions.push(up);
    }

    fn attach(&mut self, atom: Atom) -> Result<(), ChemError> {
        let idx = self.mol.add_atom(atom);
        self.written_order.push(Vec::new());
        self.has_from.push(self.prev.is_some());
        if let Some(prev) = self.prev {
            let (order, up) = match self.pending.take() {
                Some(w) => (w.order(), w.up()),
                None => (self.implicit_order(prev, idx), None),
            };
            self.bond(prev, idx, order, up);
            self.written_order[prev].push(Some(idx));
            self.written_order[idx].push(Some(prev));
        } else if self.pending.is_some() {
            return Err(self.err("bond without a preceding atom"));
        }
        self.prev = Some(idx);
        Ok(())
    }

    fn ring_closure(&mut self) -> Result<(), ChemError> {
        let start = self.pos;
        let number: u16 = if self.peek() == Some(b'%') {
            let (d1, d2) = (self.peek_at(1), self.peek_at(2));
            match (d1, d2) {
                (Some(a @ b'0'..=b'9'), Some(b @ b'0'..=b'9')) => {
                    self.pos += 3;
                    ((a - b'0') * 10 + (b - b'0')) as u16
                }
                _ => return Err(self.err("'%' must be followed by two digits")),
            }
        } else {
            let d = self.peek().unwrap_or(b'0') - b'0';
            self.pos += 1;
            d as u16
        };

        let atom = self
            .prev
            .ok_or_else(|| self.err("ring bond without a preceding atom"))?;
        let bond = self.pending.take();

        match self.rings.remove(&number) {
            Some(open) => {
                if open.atom == atom {
                    return Err(self.err("ring bond to self"));
                }
                if self.mol.bond_between(open.atom, atom).is_some() {
                    return Err(self.err("duplicate bond"));
                }
                let order = match (open.bond, bond) {
                    (Some(a), Some(b)) if a.order() != b.order() => {
                        return Err(self.err("conflicting ring bond symbols"));
                    }
                    (Some(w), _) | (None, Some(w)) => w.order(),
                    (None, None) => self.implicit_order(open.atom, atom),
                };
                // A mark at the closing digit reads from the closing atom
                let up = open.bond.and_then(Written::up).or(bond.and_then(Written::up).map(|up| !up));
                self.bond(open.atom, atom, order, up);
                self.written_order[open.atom][open.slot] = Some(atom);
                self.written_order[atom].push(Some(open.atom));
            }
            None => {
                self.written_order[atom].push(None);
                let slot = self.written_order[atom].len() - 1;
                self.rings.insert(
                    number,
                    OpenRing {
                        atom,
                        bond,
                        pos: start,
                        slot,
                    },
                );
            }
        }
        Ok(())
    }

    /// Re-express each `@`/`@@` against incidence order
    ///
    /// A bracket hydrogen, or the lone pair of a three-connected center,
    /// sits right after the atom it is approached from.
    fn resolve_chirality(&mut self) {
        for atom in 0..self.mol.num_atoms() {
            let Some(written) = self.mol.atoms[atom].chirality else {
                continue;
            };
            let mut order = self.written_order[atom].clone();
            let reference = stereo_neighbors(&self.mol, atom);
            if reference.len() > order.len() {
                let at = usize::from(self.has_from[atom]).min(order.len());
                order.insert(at, None);
            }
            self.mol.atoms[atom].chirality = odd_permutation(&order, &reference).map(|odd| written.permuted(odd));
        }
    }

    /// Turn `/` and `\` around each double bond into a cis/trans flag
    fn resolve_cis_trans(&mut self) {
        for bond in 0..self.mol.bonds.len() {
            let b = self.mol.bonds[bond];
            if b.order != BondOrder::Double {
                continue;
            }
            if let (Some((x, x_up)), Some((y, y_up))) = (self.marked_side(b.a, bond), self.marked_side(b.b, bond)) {
                self.mol.bonds[bond].stereo = Some(CisTrans {
                    a_neighbor: x,
                    b_neighbor: y,
                    cis: x_up == y_up,
                });
            }
        }
    }

    /// First neighbor of `end` joined by a marked bond, with the mark read
    /// from that neighbor towards `end`
    fn marked_side(&self, end: usize, double: usize) -> Option<(usize, bool)> {
        self.mol.neighbors(end).find_map(|(nbr, bond)| {
            if bond == double {
                return None;
            }
            let up = self.directions[bond]?;
            Some((nbr, if self.mol.bonds[bond].a == nbr { up } else { !up }))
        })
    }

    fn organic_atom(&mut self) -> Result<Atom, ChemError> {
        let c = self.peek().ok_or_else(|| self.err("unexpected end"))?;
        let next = self.peek_at(1);
        let (z, aromatic, len) = match (c, next) {
            (b'C', Some(b'l')) => (element::CHLORINE, false, 2),
            (b'B', Some(b'r')) => (element::BROMINE, false, 2),
            (b'B', _) => (element::BORON, false, 1),
            (b'C', _) => (element::CARBON, false, 1),
            (b'N', _) => (element::NITROGEN, false, 1),
            (b'O', _) => (element::OXYGEN, false, 1),
            (b'P', _) => (element::PHOSPHORUS, false, 1),
            (b'S', _) => (element::SULFUR, false, 1),
            (b'F', _) => (element::FLUORINE, false, 1),
            (b'I', _) => (element::IODINE, false, 1),
            (b'b', _) => (element::BORON, true, 1),
            (b'c', _) => (element::CARBON, true, 1),
            (b'n', _) => (element::NITROGEN, true, 1),
            (b'o', _) => (element::OXYGEN, true, 1),
            (b'p', _) => (element::PHOSPHORUS, true, 1),
            (b's', _) => (element::SULFUR, true, 1),
            (b'*', _) => (0, false, 1),
            _ => return Err(self.err(format!("unexpected character '{}'", c as char))),
        };
        self.pos += len;
        let mut atom = Atom::new(z);
        atom.aromatic = aromatic;
        Ok(atom)
    }

    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    fn bracket_atom(&mut self) -> Result<Atom, ChemError> {
        self.pos += 1; // '['

        let isotope = self.number();
        let (z, aromatic) = self.bracket_symbol()?;
        let mut atom = Atom::new(z);
        atom.bracket = true;
        atom.aromatic = aromatic;
        atom.isotope = match isotope {
            Some(i) => Some(u16::try_from(i).map_err(|_| self.err("isotope out of range"))?),
            None => None,
        };

        // Chirality: @, @@, @TH1, @AL2, @SP3, @TB12, @OH25
        if self.peek() == Some(b'@') {
            self.pos += 1;
            if self.peek() == Some(b'@') {
                self.pos += 1;
                atom.chirality = Some(Chirality::Clockwise);
            } else if matches!(self.peek(), Some(b'A'..=b'Z'))
                && matches!(self.peek_at(1), Some(b'A'..=b'Z'))
            {
                let tetrahedral = &self.src[self.pos..self.pos + 2] == b"TH";
                self.pos += 2;
                atom.chirality = match self.number() {
                    Some(1) if tetrahedral => Some(Chirality::Anticlockwise),
                    Some(2) if tetrahedral => Some(Chirality::Clockwise),
                    Some(_) => None,
                    None => return Err(self.err("chirality class needs a number")),
                };
            } else {
                atom.chirality = Some(Chirality::Anticlockwise);
            }
        }

        if self.peek() == Some(b'H') {
            self.pos += 1;
            let count = self.number().unwrap_or(1);
            atom.hydrogens = u8::try_from(count).map_err(|_| self.err("hydrogen count out of range"))?;
        }

        atom.charge = self.charge()?;

        if self.peek() == Some(b':') {
            self.pos += 1;
            if self.number().is_none() {
                return Err(self.err("atom class needs a number"));
            }
        }

        if self.peek() != Some(b']') {
            return Err(self.err("expected ']'"));
        }
        self.pos += 1;
        Ok(atom)
    }

    fn bracket_symbol(&mut self) -> Result<(u8, bool), ChemError> {
        let rest = &self.src[self.pos..];
        for (text, z) in [(&b"se"[..], 34u8), (b"as", 33), (b"te", 52)] {
            if rest.starts_with(text) {
                self.pos += 2;
                return Ok((z, true));
            }
        }
        match rest.first() {
            Some(b'*') => {
                self.pos += 1;
                return Ok((0, false));
            }
            Some(&c @ (b'b' | b'c' | b'n' | b'o' | b'p' | b's')) => {
                self.pos += 1;
                let z = element::atomic_number(&(c.to_ascii_uppercase() as char).to_string())
                    .ok_or_else(|| self.err("unknown aromatic element"))?;
                return Ok((z, true));
            }
            _ => {}
        }

        let first = match rest.first() {
            Some(c) if c.is_ascii_uppercase() => *c as char,
            _ => return Err(self.err("expected element symbol")),
        };
        if let Some(second) = rest.get(1).filter(|c| c.is_ascii_lowercase()) {
            let two = format!("{}{}", first, *second as char);
            if let Some(z) = element::atomic_number(&two) {
                self.pos += 2;
                return Ok((z, false));
            }
        }
        let z = element::atomic_number(&first.to_string())
            .ok_or_else(|| self.err(format!("unknown element '{}'", first)))?;
        self.pos += 1;
        Ok((z, false))
    }

    fn charge(&mut self) -> Result<i8, ChemError> {
        let sign: i32 = match self.peek() {
            Some(b'+') => 1,
            Some(b'-') => -1,
            _ => return Ok(0),
        };
        let symbol = self.src[self.pos];
        self.pos += 1;
        let magnitude = match self.number() {
            Some(n) => n as i32,
            None => {
                let mut n = 1;
                while self.peek() == Some(symbol) {
                    self.pos += 1;
                    n += 1;
                }
                n
            }
        };
        i8::try_from(sign * magnitude).map_err(|_| self.err("charge out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ethanol() {
        let mol = parse_smiles("CCO").unwrap();
        assert_eq!(mol.num_atoms(), 3);
        assert_eq!(mol.bonds.len(), 2);
        assert_eq!(mol.atoms[2].atomic_number, element::OXYGEN);
    }

    #[test]
    fn test_parse_branches_and_rings() {
        let mol = parse_smiles("CC(=O)Oc1ccccc1C(=O)O").unwrap();
        assert_eq!(mol.num_atoms(), 13);
        assert_eq!(mol.bonds.len(), 13);
        let aromatic = mol.bonds.iter().filter(|b| b.order == BondOrder::Aromatic).count();
        assert_eq!(aromatic, 6);
    }

    #[test]
    fn test_parse_bracket_atom() {
        let mol = parse_smiles("[13CH3-:2]").unwrap();
        let atom = &mol.atoms[0];
        assert_eq!(atom.isotope, Some(13));
        assert_eq!(atom.hydrogens, 3);
        assert_eq!(atom.charge, -1);
        assert!(atom.bracket);

        let mol = parse_smiles("[Fe++]").unwrap();
        assert_eq!(mol.atoms[0].charge, 2);
        let mol = parse_smiles("[se]1cccc1").unwrap();
        assert!(mol.atoms[0].aromatic);
        assert_eq!(mol.atoms[0].atomic_number, 34);
    }

    #[test]
    fn test_parse_stereo_marks() {
        let mol = parse_smiles("F/C=C/F").unwrap();
        assert_eq!(mol.bonds[0].order, BondOrder::Single);
        assert_eq!(
            mol.bonds[1].stereo,
            Some(CisTrans {
                a_neighbor: 0,
                b_neighbor: 3,
                cis: false
            })
        );
        let mol = parse_smiles("C(\\F)=C/F").unwrap();
        assert_eq!(mol.bonds[1].stereo.map(|s| s.cis), Some(false));
        let mol = parse_smiles("F/C=C\\F").unwrap();
        assert_eq!(mol.bonds[1].stereo.map(|s| s.cis), Some(true));

        let mol = parse_smiles("N[C@@H](C)C(=O)O").unwrap();
        assert_eq!(mol.atoms[1].hydrogens, 1);
        assert_eq!(mol.atoms[1].chirality, Some(Chirality::Clockwise));
        assert!(parse_smiles("[C@SP1](F)(Cl)(Br)I").unwrap().atoms[0].chirality.is_none());
    }

    #[test]
    fn test_chirality_follows_written_order() {
        // L-alanine drawn three ways
        let expected = parse_smiles("N[C@@H](C)C(=O)O").unwrap().atoms[1].chirality;
        let a = parse_smiles("C[C@H](N)C(=O)O").unwrap();
        let b = parse_smiles("C[C@@H](C(=O)O)N").unwrap();
        // Incidence orders differ, so compare against one neighbor list
        for (mol, center) in [(a, 1), (b, 1)] {
            let by_element: Vec<u8> = stereo_neighbors(&mol, center)
                .iter()
                .map(|n| n.map_or(1, |i| mol.atoms[i].atomic_number + 10 * mol.degree(i) as u8))
                .collect();
            let reference = [element::NITROGEN + 10, element::CARBON + 10, element::CARBON + 30, 1];
            let odd = odd_permutation(&by_element[..], &reference[..]).unwrap();
            assert_eq!(mol.atoms[center].chirality.map(|c| c.permuted(odd)), expected);
        }
    }

    #[test]
    fn test_ring_bond_holds_its_written_place() {
        // The ring digit comes before the branch in the written order
        let a = parse_smiles("[C@H]1(F)CCC1").unwrap();
        let b = parse_smiles("[C@@H](F)1CCC1").unwrap();
        assert_eq!(a.atoms[0].chirality, b.atoms[0].chirality);
    }

    #[test]
    fn test_parse_percent_ring() {
        let mol = parse_smiles("C%10CCCCC%10").unwrap();
        assert_eq!(mol.bonds.len(), 6);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "C(", "C)", "C1CC", "C==C", "[Xx]", "Q", "XYZ-invalid", "C((C))", "[C", "1CC"] {
            assert!(parse_smiles(bad).is_err(), "{:?} should fail", bad);
        }
    }
}
