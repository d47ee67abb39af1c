pub mod dataloader;
pub mod ensemble;
pub mod evaluate;
pub mod model;
pub mod pipeline;
