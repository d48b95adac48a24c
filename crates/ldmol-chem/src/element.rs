//! Periodic table data needed for SMILES handling

/// Element symbols indexed by atomic number (0 is the `*` wildcard)
const SYMBOLS: [&str; 119] = [
    "*", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge",
    "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd",
    "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd",
    "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg",
    "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm",
    "Bk", "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn",
    "Nh", "Fl", "Mc", "Lv", "Ts", "Og",
];

pub const HYDROGEN: u8 = 1;
pub const BORON: u8 = 5;
pub const CARBON: u8 = 6;
pub const NITROGEN: u8 = 7;
pub const OXYGEN: u8 = 8;
pub const FLUORINE: u8 = 9;
pub const PHOSPHORUS: u8 = 15;
pub const SULFUR: u8 = 16;
pub const CHLORINE: u8 = 17;
pub const BROMINE: u8 = 35;
pub const IODINE: u8 = 53;

/// Symbol for an atomic number
pub fn symbol(atomic_number: u8) -> &'static str {
    SYMBOLS.get(atomic_number as usize).copied().unwrap_or("*")
}

/// Atomic number for a capitalized symbol (`"Cl"`, `"Se"`)
pub fn atomic_number(symbol: &str) -> Option<u8> {
    SYMBOLS
        .iter()
        .position(|s| *s == symbol)
        .filter(|&z| z > 0)
        .map(|z| z as u8)
}

/// Elements writable without brackets
pub fn is_organic_subset(z: u8) -> bool {
    matches!(z, 5 | 6 | 7 | 8 | 9 | 15 | 16 | 17 | 35 | 53)
}

/// Elements that may carry a lowercase aromatic symbol
pub fn can_be_aromatic(z: u8) -> bool {
    matches!(z, 5 | 6 | 7 | 8 | 15 | 16 | 33 | 34 | 52)
}

/// Normal valences for a neutral main-group element, lowest first
fn neutral_valences(z: u8) -> Option<&'static [u8]> {
    let v: &'static [u8] = match z {
        1 | 3 | 9 | 11 | 17 | 19 | 35 | 37 | 55 => &[1],
        4 | 8 | 12 | 20 | 38 | 56 => &[2],
        5 | 13 | 31 | 49 => &[3],
        6 | 14 | 32 => &[4],
        7 => &[3],
        15 | 33 | 51 => &[3, 5, 7],
        16 | 34 | 52 => &[2, 4, 6],
        50 => &[2, 4],
        53 => &[1, 3, 5],
        2 | 10 | 18 | 36 | 54 => &[0],
        _ => return None,
    };
    Some(v)
}

/// Allowed valences for an element with a formal charge
///
/// Charged main-group atoms take the valences of their isoelectronic
/// neighbor (`N+` behaves like `C`, `O-` like `F`). `None` means the element
/// is not valence-checked (transition metals, wildcard, large charges).
pub fn allowed_valences(z: u8, charge: i8) -> Option<&'static [u8]> {
    if z == 0 || charge.abs() > 3 {
        return None;
    }
    let shifted = z as i16 - charge as i16;
    if shifted <= 0 {
        return None;
    }
    let base = neutral_valences(z)?;
    if charge == 0 {
        return Some(base);
    }
    neutral_valences(shifted as u8)
}

/// Whether a neutral or charged atom keeps a lone pair it can donate to an
/// aromatic ring when it carries no double bond
pub fn has_lone_pair(z: u8, charge: i8) -> bool {
    match (z, charge) {
        (NITROGEN, 0) | (PHOSPHORUS, 0) | (33, 0) => true,
        (OXYGEN, 0) | (SULFUR, 0) | (34, 0) | (52, 0) => true,
        (CARBON, -1) | (NITROGEN, -1) => true,
        (OXYGEN, 1) | (SULFUR, 1) | (34, 1) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(atomic_number("C"), Some(6));
        assert_eq!(atomic_number("Cl"), Some(17));
        assert_eq!(atomic_number("Og"), Some(118));
        assert_eq!(atomic_number("Xx"), None);
        assert_eq!(atomic_number("*"), None);
        assert_eq!(symbol(35), "Br");
    }

    #[test]
    fn test_charged_valences() {
        assert_eq!(allowed_valences(NITROGEN, 1), Some(&[4u8][..]));
        assert_eq!(allowed_valences(OXYGEN, -1), Some(&[1u8][..]));
        assert_eq!(allowed_valences(CARBON, -1), Some(&[3u8][..]));
        assert_eq!(allowed_valences(SULFUR, 0), Some(&[2u8, 4, 6][..]));
        assert_eq!(allowed_valences(26, 2), None);
    }
}
