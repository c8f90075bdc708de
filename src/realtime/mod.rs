pub mod registry;
pub mod socket;

pub use registry::ChannelRegistry;
