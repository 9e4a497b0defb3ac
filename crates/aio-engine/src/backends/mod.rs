//! Concrete backend implementations, one per `aio_opcode` dispatch
//! target. Never constructed directly — go through `aio_engine::factory`.

pub mod completion_port;
pub mod kernel_aio;
pub mod simulated;
