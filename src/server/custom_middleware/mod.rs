pub mod logging_layer;
pub mod timeout_layer;
