pub mod geometry;
pub mod map;
pub mod state;
pub mod task;
pub mod vehicle;

pub use geometry::*;
pub use map::*;
pub use state::*;
pub use task::*;
pub use vehicle::*;
