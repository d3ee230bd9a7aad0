//! Data Transfer Objects for REST request/response serialization.

pub mod common_dto;
pub mod ranking_dto;
pub mod round_dto;
pub mod snapshot_dto;

pub use common_dto::*;
pub use ranking_dto::*;
pub use round_dto::*;
pub use snapshot_dto::*;
