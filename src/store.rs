// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Shared in-memory state owned by one [`crate::facade::KubeDeck`]

use crate::cache::EntityCache;
use crate::credentials::CredentialStore;
use crate::registry::ClusterRegistry;

#[derive(Debug, Default)]
pub struct Store {
    pub registry: ClusterRegistry,
    pub cache: EntityCache,
    pub credentials: CredentialStore,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }
}
