//! Reading and writing entity graphs through routing maps

pub mod denormalizer;
pub mod normalizer;

pub use denormalizer::Denormalizer;
pub use normalizer::Normalizer;
