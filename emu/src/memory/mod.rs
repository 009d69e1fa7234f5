pub mod internal_memory;
pub mod io_bus;
pub mod region;
pub mod wait_states;
