pub mod bias;
pub mod guards;
pub mod scope;
pub mod scoring;
