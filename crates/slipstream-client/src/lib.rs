pub mod estimate;
pub mod net;
