pub mod image_file_capture_store;
