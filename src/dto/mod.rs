pub mod api_response;
pub mod reassignment_dto;
pub mod swap_dto;

pub use api_response::*;
pub use reassignment_dto::*;
pub use swap_dto::*;
