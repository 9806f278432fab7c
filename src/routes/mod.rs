pub mod ledger_routes;
pub mod reassignment_routes;
pub mod swap_routes;
