// slipstream-common — definitions shared between the host and client sides
// of the engine: wire codec, entity arena, command queues, runtime config.

pub mod clock;
pub mod config;
pub mod entity;
pub mod inbound;
pub mod math;
pub mod netbuf;
pub mod queue;
pub mod session;
pub mod wire;
