//! nuget-lens - version resolution for NuGet dependencies
//!
//! Given the packages a project has installed, this crate determines which
//! versions exist, the latest stable and pre-release versions, whether an
//! update is available and what kind it is, and which known vulnerabilities
//! affect the pinned version. Registry data is cached in memory and
//! concurrent requests for the same package share one fetch.

pub mod cache;
pub mod config;
pub mod registries;
pub mod reports;
pub mod resolver;
pub mod update;
pub mod utils;
pub mod vulnerabilities;
