pub mod config;
pub mod gemini_adapter;
pub mod microphone;
pub mod renderer_bridge;
pub mod simli_adapter;
