//! # gs-core
//!
//! Core value, codec, schema and identity primitives for the stateful-object
//! streaming runtime. Every other `gs-*` crate builds on the types defined
//! here: the self-describing [`StateValue`], the three-envelope [`codec`],
//! the [`state_variable`] slot/schema machinery, and the [`identity`]
//! helpers used to derive or generate primary keys.
//!
//! ## Example
//!
//! ```rust
//! use gs_core::value::StateValue;
//! use gs_core::codec;
//!
//! let v = StateValue::Str("Ada".into());
//! let bytes = codec::encode(&v).unwrap();
//! assert_eq!(codec::decode(&bytes).unwrap(), v);
//! ```

pub mod codec;
pub mod error;
pub mod identity;
pub mod state_variable;
pub mod value;

pub use error::CodecError;
pub use value::StateValue;
