pub mod cadence_controller;
pub mod frame_source;
pub mod pipeline_logger;
pub mod region_filter;
pub mod relay_hub;
pub mod single_slot_relay;
pub mod stream_consumer;
