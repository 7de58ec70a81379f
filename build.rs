//! Generates the leader and member gRPC services.
//!
//! Message types are plain prost structs in `src/proto.rs`, so the services are
//! described here with `tonic_build::manual` and no `.proto` compiler is needed.

use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let leader = Service::builder()
        .name("LeaderService")
        .package("hatokuse")
        .method(unary(
            "register_member",
            "RegisterMember",
            "RegisterRequest",
            "RegisterResponse",
        ))
        .method(unary(
            "unregister_member",
            "UnregisterMember",
            "UnregisterRequest",
            "UnregisterResponse",
        ))
        .method(unary(
            "heartbeat",
            "Heartbeat",
            "HeartbeatRequest",
            "HeartbeatResponse",
        ))
        .build();

    let member = Service::builder()
        .name("MemberService")
        .package("hatokuse")
        .method(unary(
            "replicate",
            "Replicate",
            "ReplicateRequest",
            "ReplicateResponse",
        ))
        .method(unary("fetch", "Fetch", "FetchRequest", "FetchResponse"))
        .method(unary("delete", "Delete", "DeleteRequest", "DeleteResponse"))
        .method(unary(
            "health_check",
            "HealthCheck",
            "HealthCheckRequest",
            "HealthCheckResponse",
        ))
        .build();

    println!("cargo:rerun-if-changed=build.rs");
    Builder::new().compile(&[leader, member]);
}
