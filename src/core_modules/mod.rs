pub mod background_model;
pub mod blob;
pub mod blob_extractor;
pub mod centroid_tracker;
pub mod frame;
pub mod image_helper;
pub mod line_counter;
pub mod mask_processor;
