pub mod detection_worker;
pub mod onnx_blazeface_engine;
