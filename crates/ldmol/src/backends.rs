//! Compute backends
//!
//! Enable one via feature flags:
//!
//! - `ndarray`: CPU (default)
//! - `wgpu`: WebGPU (Vulkan/Metal/DX12)
//! - `cuda`: native CUDA
//!
//! ```ignore
//! use ldmol::backends::{DefaultBackend, default_device};
//!
//! let device = default_device();
//! let pipeline = ldmol::Text2Mol::<DefaultBackend, _, _, _>::load(&config, &device)?;
//! ```

#[cfg(feature = "ndarray")]
pub use burn_ndarray::{NdArray, NdArrayDevice};

#[cfg(feature = "wgpu")]
pub use burn_wgpu::{Wgpu, WgpuDevice};

#[cfg(feature = "cuda")]
pub use burn_cuda::{Cuda, CudaDevice};

#[cfg(feature = "ndarray")]
pub type DefaultBackend = NdArray<f32>;

#[cfg(all(feature = "wgpu", not(feature = "ndarray")))]
pub type DefaultBackend = Wgpu<f32>;

#[cfg(all(feature = "cuda", not(any(feature = "ndarray", feature = "wgpu"))))]
pub type DefaultBackend = Cuda<f32>;

#[cfg(feature = "ndarray")]
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}

#[cfg(all(feature = "wgpu", not(feature = "ndarray")))]
pub fn default_device() -> WgpuDevice {
    WgpuDevice::default()
}

#[cfg(all(feature = "cuda", not(any(feature = "ndarray", feature = "wgpu"))))]
pub fn default_device() -> CudaDevice {
    CudaDevice::default()
}
