//! Query builder and mini-ORM for dbstudio
//!
//! [`QueryBuilder`] renders statements for one table with bound parameters
//! in the placeholder style of the target dialect. [`Repository`] runs those
//! statements against a [`dbs_drivers::Driver`].

pub mod builder;
pub mod condition;
pub mod repository;

pub use builder::{QueryBuilder, Statement, Values};
pub use condition::{Condition, Direction, Join, JoinKind, Operator, Select};
pub use repository::{Record, Repository};
