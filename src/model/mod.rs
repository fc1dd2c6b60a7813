pub mod architecture;
pub mod checkpoint;
pub mod constants;
pub mod data;
pub mod training;
