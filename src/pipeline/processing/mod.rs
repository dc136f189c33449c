// Pipeline processing: normalization, entity resolution, relationships, features,
// aggregation and statistics

pub mod aggregate;
pub mod features;
pub mod normalize;
pub mod relationships;
pub mod resolve;
pub mod statistics;
