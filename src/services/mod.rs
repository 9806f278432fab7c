//! Services module
//!
//! Este módulo contiene el motor de reasignación: ledger de capacidad,
//! selección de candidatos, reparto automático, resolución de permutaciones,
//! área de preparación, coordinador de commits y swaps. Los servicios de
//! alto nivel (`ReassignmentService`, `SwapService`) son los que consumen los
//! controllers.

pub mod auto_split_planner;
pub mod candidate_selector;
pub mod capacity_ledger;
pub mod commit_coordinator;
pub mod permutation_resolver;
pub mod plan_validator;
pub mod reassignment_service;
pub mod staging_area;
pub mod swap_service;
pub mod sweeper;

#[cfg(test)]
pub mod fixtures;

pub use commit_coordinator::{CommitCoordinator, CommitOutcome, RollbackOutcome};
pub use reassignment_service::ReassignmentService;
pub use swap_service::SwapService;
pub use sweeper::{spawn_sweeper, Sweeper};
