pub mod csv;
pub mod lists;
pub mod normalize;
pub mod pipeline;
pub mod progress;
