pub mod device;
pub mod event;
pub mod node;
pub mod session;
