pub mod io;
pub mod lookup;
pub mod quad;
pub mod sim;

// Prelude
pub use io::ini::Config;
pub use lookup::LookupTable;
pub use sim::driver::Simulation;
