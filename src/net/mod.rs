pub mod pnet_port;
pub mod port;

pub use pnet_port::PnetEthernetPort;
pub use port::EthernetPort;
