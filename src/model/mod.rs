pub mod activation;
pub mod features;
pub mod logistic;
pub mod mlp;
pub mod trainer;
