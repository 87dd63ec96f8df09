//! Wire protocol for the query-frontend dispatcher.
//!
//! Generated protobuf/tonic code is vendored under `src/gen/` so downstream
//! crates build without protoc.

mod gen;

pub use gen::dispatch;
