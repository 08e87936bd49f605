/// upstream adapter over a rodbus client channel
pub mod client;
/// local rodbus server backed by the register store
pub mod server;
