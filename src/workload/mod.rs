//! Workload synthesis
//!
//! Everything the connection core draws on to fabricate traffic: size and
//! inter-arrival distributions, the deterministic key renderer, the weighted
//! operation mix, and the shared value byte table.

pub mod generator;
pub mod keygen;
pub mod mix;
pub mod random_data;

pub use generator::Distribution;
pub use keygen::KeyGenerator;
pub use mix::{MixCase, OpMix};
