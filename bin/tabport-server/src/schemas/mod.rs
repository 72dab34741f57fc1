//! Request / response DTOs with OpenAPI schemas.

pub mod v1;
