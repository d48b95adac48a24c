//! SMILES handling for generated molecules
//!
//! Parsing, sanitization (hydrogens, valence, kekulization, aromaticity),
//! canonical SMILES output and bit fingerprints. Tetrahedral centers and
//! double-bond configurations are kept, so enantiomers stay distinct.
//!
//! ```ignore
//! let a = ldmol_chem::canonicalize("C1=CC=CC=C1")?;
//! let b = ldmol_chem::canonicalize("c1ccccc1")?;
//! assert_eq!(a, b);
//! ```

pub mod aromaticity;
pub mod canon;
pub mod element;
pub mod fingerprint;
pub mod kekulize;
pub mod mol;
pub mod parser;
pub mod stereo;
pub mod valence;
pub mod writer;

use thiserror::Error;

pub use fingerprint::{Fingerprint, morgan, path, structural_keys};
pub use mol::{Atom, Bond, BondOrder, Chirality, CisTrans, Molecule};
pub use parser::parse_smiles;
pub use writer::write_smiles;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChemError {
    #[error("empty SMILES")]
    Empty,
    #[error("SMILES syntax error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("atom {atom} ({symbol}) has invalid valence {valence}")]
    Valence {
        atom: usize,
        symbol: String,
        valence: u8,
    },
    #[error("aromatic atom {atom} is not in a ring")]
    NonRingAromatic { atom: usize },
    #[error("cannot kekulize aromatic system")]
    Kekulize,
}

/// Parse and sanitize a SMILES string
///
/// The result has explicit hydrogen counts on every atom and aromaticity
/// perceived from its Kekulé form, independent of how the input was drawn.
/// Stereo marks that the graph cannot support are removed.
pub fn from_smiles(smiles: &str) -> Result<Molecule, ChemError> {
    let raw = parse_smiles(smiles)?;
    if raw.is_empty() {
        return Err(ChemError::Empty);
    }
    let mut mol = valence::merge_explicit_hydrogens(&raw);
    valence::check_aromatic_rings(&mut mol)?;
    let needs_pi = valence::assign_hydrogens(&mut mol)?;
    kekulize::kekulize(&mut mol, &needs_pi)?;
    aromaticity::perceive(&mut mol);
    stereo::clean(&mut mol);
    Ok(mol)
}

/// Canonical SMILES, or an error for strings that are not valid molecules
pub fn canonicalize(smiles: &str) -> Result<String, ChemError> {
    Ok(write_smiles(&from_smiles(smiles)?))
}

pub fn is_valid(smiles: &str) -> bool {
    from_smiles(smiles).is_ok()
}
