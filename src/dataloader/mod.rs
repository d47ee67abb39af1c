pub mod balance;
pub mod config;
pub mod data_batch;
pub mod datasource;
pub mod error;
pub mod for_imagescsv;
pub mod for_imagesdir;
pub mod image_loader;
pub mod info;
pub mod par_iter;
pub mod sample;
pub mod split;
