//! End-to-end flows: `GrpcWebClient` + `BlockRangeService` against the
//! mock proxy over loopback HTTP.

mod grpc_web_flows;
