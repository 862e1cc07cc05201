// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Session and entity cache coordinator for EKS and GKE clusters.
//!
//! [`KubeDeck`] is the entry point: register clusters, store provider
//! credentials, check health, list and delete pods and services. Tokens are
//! obtained and refreshed on demand by the [`session::SessionCoordinator`].

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod facade;
pub mod kubernetes;
pub mod model;
pub mod progress;
pub mod provider;
pub mod registry;
pub mod session;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::SessionError;
pub use facade::KubeDeck;
