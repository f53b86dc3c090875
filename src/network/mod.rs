//! Network module - target expansion, name resolution, port/service tables

mod dns;
pub mod ports;
mod target;

pub use dns::{resolve_host, reverse_dns, reverse_lookup};
pub use ports::{
    COMMON_PORTS, EXTRA_PORTS, PROCESS_SERVICE_KEYWORDS, SERVICE_PORTS, ScanMethod,
    service_for_port, service_for_process,
};
pub use target::{TargetSpec, expand_cidr, expand_range, is_special_address};
