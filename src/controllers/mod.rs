pub mod reassignment_controller;
pub mod swap_controller;
