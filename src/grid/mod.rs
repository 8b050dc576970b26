pub mod inputs;
pub mod model;
pub mod topology;

pub use inputs::{ClassLoads, SolveInput};
pub use model::{GridModel, SolveError, SolveResult};
pub use topology::{CustomerClass, GridTopology, TopologyError};
