// @generated
// This file wires up buf-generated protobuf code
// Note: The prost files already include!() the tonic files automatically

pub mod dispatch {
    include!("dispatch.v1.rs");
    // dispatch.v1.tonic.rs is auto-included by dispatch.v1.rs
}
