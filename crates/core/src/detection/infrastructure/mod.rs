pub mod bytetrack_tracker;
pub mod math;
pub mod model_resolver;
pub mod null_detector;
pub mod onnx_pose_detector;
