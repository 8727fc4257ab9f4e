//! semiring-jit: specialization cache and JIT pipeline for semiring
//! sparse kernels
//!
//! A sparse operation (matrix multiply over a semiring, element-wise ops,
//! apply, reduce, select, build) is described by its operators, types and
//! operand formats. The crate turns that description into a compact
//! identity, looks the identity up in a process-wide kernel table and, on a
//! miss, generates C source for it, compiles it into a shared library in an
//! on-disk cache, loads it and returns its entry point. Libraries survive
//! across runs and are revalidated against the current user definitions
//! before reuse.
//!
//! # Architecture
//!
//! - **object**: types, operators, monoids and semirings as the JIT sees them
//! - **encoding**: per-family bit layouts and problem encoders
//! - **identity**: hashing and kernel names
//! - **cache**: the open-addressing kernel table
//! - **validator**: definition checks against a kernel's query report
//! - **codegen**: macro emission and source rendering
//! - **backend**: compiler and dynamic library seams
//! - **pipeline**: build state machine for one request
//! - **prejit**: kernels linked into the process ahead of time
//! - **paths** / **config**: cache directory and toolchain settings
//! - **context**: [`JitContext`], the public API
//!
//! # Feature Flags
//!
//! - `jit` (default): allow loading and compiling; without it the control
//!   level is clamped to `RUN`
//!
//! # Example
//!
//! ```no_run
//! use semiring_jit::encoding::{Format, MxmMethod, MxmProblem, Operand};
//! use semiring_jit::object::{JitMonoid, JitOp, JitSemiring, JitType, Opcode, TypeCode};
//! use semiring_jit::{JitConfig, JitContext};
//!
//! let fp64 = JitType::builtin(TypeCode::Fp64);
//! let plus_times = JitSemiring::new(
//!     JitMonoid::builtin(JitOp::binary(Opcode::Plus, &fp64)),
//!     JitOp::binary(Opcode::Times, &fp64),
//! );
//! let spec = MxmProblem {
//!     method: MxmMethod::Saxpy,
//!     semiring: &plus_times,
//!     flipxy: false,
//!     c: Operand::new(&fp64, Format::Sparse),
//!     a: Operand::new(&fp64, Format::Sparse),
//!     b: Operand::new(&fp64, Format::Full),
//!     mask: None,
//! }
//! .encode();
//!
//! let jit = JitContext::new(JitConfig::from_env());
//! match jit.load_kernel(&spec)? {
//!     Some(kernel) => println!("specialized kernel at {:p}", kernel.entry().as_ptr()),
//!     None => println!("falling back to the generic kernel"),
//! }
//! # Ok::<(), semiring_jit::JitError>(())
//! ```

pub mod backend;
pub mod cache;
pub mod codegen;
pub mod config;
pub mod context;
pub mod control;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod object;
pub mod paths;
pub mod pipeline;
pub mod prejit;
pub mod validator;

pub use backend::{KernelFn, QueryFn, Toolchain};
pub use cache::KernelHandle;
pub use config::JitConfig;
pub use context::{JitContext, JitStats};
pub use control::ControlLevel;
pub use encoding::{KernelFamily, KernelKind, Specialization};
pub use error::{JitError, Result};
pub use identity::{KernelIdentity, KernelName};
pub use prejit::PreJitKernel;
