mod arity;
mod config;
mod constants;
pub mod debug;
mod frame;
mod host;
mod intrinsics;
pub mod model;
mod tagged;

pub use arity::*;
pub use config::{Bridge, BridgeConfig};
pub use constants::{ConstantHandle, ConstantPool};
pub use frame::{FrameCreateInfo, build_synthetic_frame, read_realpath};
pub use host::*;
pub use intrinsics::*;
pub use tagged::*;
