pub mod automation;
pub mod browser_manager;
pub mod court_match;
pub mod portal;

pub use automation::{AutomationFactory, AutomationFault, FaultKind, PortalAutomation};
pub use portal::{CdpPortal, CdpPortalFactory};
