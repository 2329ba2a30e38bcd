pub mod gateway;
pub mod lifecycle;
pub mod reconciler;
pub mod toast;
pub mod transport;
