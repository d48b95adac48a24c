//! Weight Loading
//!
//! Memory-mapped safetensors access, scoped helpers that build burn layers
//! from HuggingFace/PyTorch weight names, and an f32 safetensors writer.
//!
//! ```ignore
//! use ldmol_convert::{SafeTensorFile, WeightScope};
//!
//! let file = SafeTensorFile::open("model.safetensors")?;
//! let root = WeightScope::root(&file);
//! let proj = root.linear::<B>("x_embedder", 64, 768, true, &device)?;
//! ```

pub mod loader;
pub mod weights;
pub mod writer;

pub use loader::{LoadError, SafeTensorFile};
pub use weights::WeightScope;
pub use writer::SafeTensorWriter;
