// Pre-flight check operations

mod memory;
mod port;
mod sys_pref;

pub use memory::{check_memory_capacity, CheckMemoryOperation};
pub use port::{check_port_occupied, join_roles, CheckPortOccupiedOperation};
pub use sys_pref::CheckSysPrefOperation;
