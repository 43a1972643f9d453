pub mod push_codec;
pub mod stream_emitter;
